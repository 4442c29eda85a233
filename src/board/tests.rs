use super::*;
use crate::perft::perft;
use crate::types::{mated_in, Score};

fn board(fen: &str) -> Board {
    Board::from_fen(fen).expect("test FEN is valid")
}

fn do_uci_move(board: &mut Board, text: &str) {
    let mv = board.parse_move(text).unwrap_or_else(|| panic!("move {text} should be legal"));
    board.do_move(mv);
}

#[test]
fn starting_position_round_trips() {
    let board = Board::starting_position();
    assert!(board.fen().starts_with(START_FEN));
    assert_eq!(board.side_to_move(), crate::types::Color::White);
    assert!(!board.checkers());
}

#[test]
fn perft_from_the_opening() {
    let mut board = Board::starting_position();
    assert_eq!(perft(&mut board, 1), 44);
    assert_eq!(perft(&mut board, 2), 1920);
    assert_eq!(perft(&mut board, 3), 79_666);
}

#[test]
fn make_undo_preserves_state() {
    let mut board = Board::starting_position();
    let key = board.key();
    let fen = board.fen();

    for text in ["h2e2", "h9g7", "h0g2", "i9h9"] {
        do_uci_move(&mut board, text);
    }
    for _ in 0..4 {
        let mv = board.last_move();
        board.undo_move(mv);
    }

    assert_eq!(board.key(), key);
    assert_eq!(board.fen(), fen);
}

#[test]
fn rook_check_is_detected() {
    let board = board("4k4/9/9/9/9/9/9/9/9/3KR4 b");
    assert!(board.checkers());
}

#[test]
fn kings_may_not_face() {
    let board = board("4k4/9/9/9/9/9/9/9/9/3K5 w");
    assert!(board.parse_move("d0e0").is_none());
    assert!(board.parse_move("d0d1").is_some());
}

#[test]
fn knight_legs_block() {
    let board = board("4k4/9/9/9/9/9/9/1P7/1N7/5K3 w");
    // The pawn on b2 hobbles the knight's jumps over it.
    assert!(board.parse_move("b1a3").is_none());
    assert!(board.parse_move("b1c3").is_none());
    assert!(board.parse_move("b1d2").is_some());
    assert!(board.parse_move("b1d0").is_some());
}

#[test]
fn cannon_needs_a_screen_to_capture() {
    let board = Board::starting_position();
    assert!(board.parse_move("b2b9").is_some());
    assert!(board.parse_move("b2b7").is_none());
    // Quiet cannon slides stop in front of the screen.
    assert!(board.parse_move("b2b6").is_some());
    assert!(board.parse_move("b2b8").is_none());
}

#[test]
fn pawns_widen_after_the_river() {
    let board1 = board("4k4/9/9/9/3P5/9/9/9/9/3K5 w");
    assert!(board1.parse_move("d5e5").is_some());
    assert!(board1.parse_move("d5c5").is_some());
    assert!(board1.parse_move("d5d4").is_none());

    let board2 = board("4k4/9/9/9/9/3P5/9/9/9/3K5 w");
    assert!(board2.parse_move("d4d5").is_some());
    assert!(board2.parse_move("d4e4").is_none());
}

#[test]
fn see_judges_exchanges() {
    // A river pawn wins a whole rook.
    let board1 = board("4k4/9/9/9/3Pr4/9/9/9/9/4K4 w");
    let mv = board1.parse_move("d5e5").unwrap();
    assert!(board1.see_ge(mv, 500));

    // A rook grabbing a defended pawn loses the exchange.
    let board2 = board("4k4/4r4/9/9/4p4/9/9/4R4/9/4K4 w");
    let mv2 = board2.parse_move("e2e5").unwrap();
    assert!(!board2.see_ge(mv2, 0));
    assert!(board2.see_ge(mv2, -1200));
}

#[test]
fn bland_repetition_is_a_draw() {
    let mut board = board("3ak4/9/9/9/9/9/9/9/9/R2K5 w");
    for text in ["a0a1", "d9e8", "a1a0", "e8d9"] {
        do_uci_move(&mut board, text);
    }
    assert_eq!(board.rule_judge(4), RuleJudgement::Final(Score::DRAW));
}

#[test]
fn perpetual_check_loses() {
    let mut board = board("3k5/9/9/9/4R4/9/9/9/9/5K3 w");
    for text in ["e5d5", "d9e9", "d5e5", "e9d9"] {
        do_uci_move(&mut board, text);
    }
    assert_eq!(board.rule_judge(4), RuleJudgement::Provisional(mated_in(4)));
}

#[test]
fn rule60_runs_out() {
    let mut board = board("3ak4/9/9/9/9/9/9/9/9/R2K5 w");
    // Shuffle rook and advisor far apart so no repetition interferes.
    let cycle = ["a0b0", "d9e8", "b0b1", "e8d9", "b1a1", "d9e8", "a1a0", "e8d9"];
    'outer: loop {
        for text in cycle {
            if board.rule60_count() >= 120 {
                break 'outer;
            }
            do_uci_move(&mut board, text);
        }
    }
    assert_eq!(board.rule_judge(10), RuleJudgement::Final(Score::DRAW));
}
