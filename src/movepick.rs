use crate::{
    thread::ThreadData,
    types::{piece_value, Move, MoveEntry, MoveList},
};

#[derive(PartialEq)]
enum Stage {
    HashMove,
    Scoring,
    GoodNoisy,
    Quiets,
    BadNoisy,
}

const HASH_SCORE: i32 = 1 << 21;
const GOOD_NOISY_SCORE: i32 = 1 << 20;

/// Staged move picker. Moves come out hash move first, then winning
/// captures, quiets, and finally the captures that lost their exchange;
/// each batch is ordered by the history tables of the owning worker.
pub struct MovePicker {
    moves: MoveList,
    bad_noisies: MoveList,
    tt_move: Move,
    threshold: i32,
    stage: Stage,
    skip_quiets: bool,
}

impl MovePicker {
    /// Picker for the main search.
    pub fn new(td: &ThreadData, tt_move: Move) -> Self {
        Self {
            moves: td.board.generate_moves(),
            bad_noisies: MoveList::new(),
            tt_move,
            threshold: -110,
            stage: Stage::HashMove,
            skip_quiets: false,
        }
    }

    /// Picker for quiescence and ProbCut: captures only, against a SEE
    /// threshold; when in check every evasion is considered instead.
    pub fn new_noisy(td: &ThreadData, threshold: i32) -> Self {
        Self {
            moves: if td.board.checkers() {
                td.board.generate_moves()
            } else {
                td.board.generate_captures()
            },
            bad_noisies: MoveList::new(),
            tt_move: Move::NONE,
            threshold,
            stage: Stage::Scoring,
            skip_quiets: false,
        }
    }

    /// From here on quiet moves are not worth trying.
    pub fn skip_quiet_moves(&mut self) {
        self.skip_quiets = true;
    }

    pub fn next(&mut self, td: &ThreadData) -> Option<(Move, i32)> {
        if self.moves.is_empty() {
            if self.bad_noisies.is_empty() {
                return None;
            }
            self.stage = Stage::BadNoisy;
        }

        if self.stage == Stage::HashMove {
            self.stage = Stage::Scoring;

            for i in 0..self.moves.len() {
                if self.moves[i].mv == self.tt_move {
                    return Some((self.moves.remove(i), HASH_SCORE));
                }
            }
        }

        if self.stage == Stage::Scoring {
            self.stage = Stage::GoodNoisy;
            self.score_moves(td);
        }

        if self.stage == Stage::GoodNoisy {
            let index = self.select_next();
            let mv = self.moves[index].mv;

            if td.board.capture(mv) {
                self.moves.remove(index);

                if td.board.see_ge(mv, self.threshold) {
                    return Some((mv, GOOD_NOISY_SCORE));
                }

                self.bad_noisies.push(mv);
                return self.next(td);
            }

            self.stage = Stage::Quiets;
            return self.next(td);
        }

        if self.stage == Stage::Quiets {
            if self.skip_quiets {
                self.moves = MoveList::new();
                return self.next(td);
            }

            let index = self.select_next();
            let entry = self.moves[index];
            self.moves.remove(index);
            return Some((entry.mv, entry.score));
        }

        if self.bad_noisies.is_empty() {
            None
        } else {
            Some((self.bad_noisies.remove(0), -GOOD_NOISY_SCORE))
        }
    }

    fn score_moves(&mut self, td: &ThreadData) {
        let stm = td.board.side_to_move();
        let pawn_key = td.board.pawn_key();
        let ply = td.ply;

        for i in 0..self.moves.len() {
            let mv = self.moves[i].mv;
            let score = if td.board.capture(mv) {
                let captured = td.board.piece_on(mv.to()).piece_type();
                let piece = td.board.moved_piece(mv);

                GOOD_NOISY_SCORE
                    + piece_value(captured) * 32
                    + td.capture_history.get(piece, mv.to(), captured)
            } else {
                let piece = td.board.moved_piece(mv);

                td.main_history.get(stm, mv)
                    + td.pawn_history.get(pawn_key, piece, mv.to())
                    + td.conthist(1, mv)
                    + td.conthist(2, mv)
                    + td.low_ply_history.get(ply, mv)
            };
            self.moves[i] = MoveEntry { mv, score };
        }
    }

    fn select_next(&mut self) -> usize {
        let mut index = 0;
        for i in 1..self.moves.len() {
            if self.moves[i].score > self.moves[index].score {
                index = i;
            }
        }
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{board::Board, thread::SharedContext, thread::ThreadData};
    use std::sync::Arc;

    fn worker_with(fen: &str) -> ThreadData {
        let mut td = ThreadData::new(0, Arc::new(SharedContext::default()));
        td.board = Board::from_fen(fen).unwrap();
        td.stack.reset();
        td
    }

    #[test]
    fn hash_move_comes_first() {
        let td = worker_with(crate::board::START_FEN);
        let tt_move = td.board.parse_move("h0g2").unwrap();

        let mut picker = MovePicker::new(&td, tt_move);
        let (first, score) = picker.next(&td).unwrap();

        assert_eq!(first, tt_move);
        assert_eq!(score, HASH_SCORE);
    }

    #[test]
    fn winning_captures_precede_quiets() {
        // A hanging black rook behind the pawn screen: the cannon capture
        // must surface before any quiet move.
        let td = worker_with("4k4/9/4r4/9/9/4P4/9/4C4/9/4K4 w");
        let mut picker = MovePicker::new(&td, Move::NONE);

        let (first, score) = picker.next(&td).unwrap();
        assert!(td.board.capture(first));
        assert_eq!(score, GOOD_NOISY_SCORE);
    }

    #[test]
    fn skipping_quiets_still_yields_bad_captures() {
        // A defended pawn capture is all that remains once quiets are cut.
        let td = worker_with("4k4/4r4/9/9/4p4/9/9/4R4/9/4K4 w");
        let mut picker = MovePicker::new(&td, Move::NONE);
        picker.skip_quiet_moves();

        let mut saw_bad_capture = false;
        while let Some((mv, score)) = picker.next(&td) {
            assert!(td.board.capture(mv));
            if score < 0 {
                saw_bad_capture = true;
            }
        }
        assert!(saw_bad_capture);
    }

    #[test]
    fn every_move_is_yielded_exactly_once() {
        let td = worker_with(crate::board::START_FEN);
        let mut picker = MovePicker::new(&td, Move::NONE);

        let mut count = 0;
        while picker.next(&td).is_some() {
            count += 1;
        }
        assert_eq!(count as usize, td.board.generate_moves().len());
    }
}
