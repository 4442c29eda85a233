use crate::{
    board::Board,
    types::{is_decisive, piece_value, Color, PieceType, Score, Square},
};

/// Static evaluation from the side to move's point of view: material plus
/// piece-square terms, blended with the caller's optimism and damped as the
/// rule60 counter climbs, exactly mirroring how the search consumes it.
pub fn evaluate(board: &Board, optimism: i32) -> i32 {
    debug_assert!(!board.checkers());

    let material = psqt_material(board);
    let v = match board.side_to_move() {
        Color::White => material,
        Color::Black => -material,
    };

    let mm = board.total_major_material() / 40;
    let mut v = (v * (443 + mm) + optimism * (76 + mm)) / 503;

    // Damp down the evaluation linearly when shuffling.
    v -= v * board.rule60_count() as i32 / 267;

    v.clamp(Score::MATED_IN_MAX + 1, Score::MATE_IN_MAX - 1)
}

/// Raw material + piece-square sum from white's (red's) point of view.
fn psqt_material(board: &Board) -> i32 {
    let mut total = 0;

    for index in 0..Square::NUM as u8 {
        let sq = Square::new(index);
        let piece = board.piece_on(sq);
        if !piece.is_some() {
            continue;
        }

        let value = piece_value(piece.piece_type()) + psqt(piece.piece_type(), sq, piece.color());
        total += match piece.color() {
            Color::White => value,
            Color::Black => -value,
        };
    }

    total
}

fn psqt(pt: PieceType, sq: Square, color: Color) -> i32 {
    // Tables are written from the far rank down, so a white piece reads row
    // `9 - rank` and a black piece the mirrored row.
    let row = match color {
        Color::White => 9 - sq.rank(),
        Color::Black => sq.rank(),
    } as usize;
    let index = row * 9 + sq.file() as usize;

    match pt {
        PieceType::Rook => ROOK_PSQT[index],
        PieceType::Cannon => CANNON_PSQT[index],
        PieceType::Knight => KNIGHT_PSQT[index],
        PieceType::Pawn => PAWN_PSQT[index],
        PieceType::Advisor | PieceType::Bishop => GUARD_PSQT[index],
        _ => 0,
    }
}

pub fn evaluate_trace(board: &Board) -> String {
    if board.checkers() {
        return "Final evaluation: none (in check)".to_string();
    }

    let material = psqt_material(board);
    let v = evaluate(board, 0);
    let white_view = match board.side_to_move() {
        Color::White => v,
        Color::Black => -v,
    };

    format!(
        "Material (white side): {:+.2}\nFinal evaluation (white side): {:+.2}",
        material as f64 / 100.0,
        white_view as f64 / 100.0,
    )
}

#[rustfmt::skip]
const ROOK_PSQT: [i32; 90] = [
     14,  18,  12,  24,  26,  24,  12,  18,  14,
     16,  28,  16,  32,  32,  32,  16,  28,  16,
     12,  18,  12,  24,  26,  24,  12,  18,  12,
     12,  20,  14,  26,  28,  26,  14,  20,  12,
     10,  16,  12,  22,  24,  22,  12,  16,  10,
      8,  14,  10,  18,  18,  18,  10,  14,   8,
      4,  10,   6,  14,  12,  14,   6,  10,   4,
     -2,   8,   4,  12,   2,  12,   4,   8,  -2,
     -4,   6,   2,  10,   0,  10,   2,   6,  -4,
     -6,   4,   0,  12,   0,  12,   0,   4,  -6,
];

#[rustfmt::skip]
const CANNON_PSQT: [i32; 90] = [
      6,   6,   2,  -8, -12,  -8,   2,   6,   6,
      4,   4,   2,  -6, -10,  -6,   2,   4,   4,
      2,   2,   0,  -6,  -8,  -6,   0,   2,   2,
      0,   2,   4,   2,   6,   2,   4,   2,   0,
      2,   2,   2,   2,   8,   2,   2,   2,   2,
      2,   2,   2,   2,  10,   2,   2,   2,   2,
      0,   2,   4,   4,  12,   4,   4,   2,   0,
      0,   0,   2,   2,   6,   2,   2,   0,   0,
      2,   2,   0,   2,   4,   2,   0,   2,   2,
      0,   2,   4,   6,   6,   6,   4,   2,   0,
];

#[rustfmt::skip]
const KNIGHT_PSQT: [i32; 90] = [
      4,  10,  22,  24,  12,  24,  22,  10,   4,
      6,  20,  30,  34,  42,  34,  30,  20,   6,
     10,  26,  32,  36,  36,  36,  32,  26,  10,
     10,  26,  38,  40,  42,  40,  38,  26,  10,
      6,  22,  32,  34,  36,  34,  32,  22,   6,
      4,  20,  24,  30,  28,  30,  24,  20,   4,
      2,  10,  16,  18,  22,  18,  16,  10,   2,
      0,   6,   8,  12,   8,  12,   8,   6,   0,
     -4,   0,   4,   4,  -4,   4,   4,   0,  -4,
     -8,  -6,   0,   0,   0,   0,   0,  -6,  -8,
];

#[rustfmt::skip]
const PAWN_PSQT: [i32; 90] = [
      4,   4,   4,   6,   8,   6,   4,   4,   4,
     18,  26,  32,  38,  40,  38,  32,  26,  18,
     16,  24,  28,  34,  36,  34,  28,  24,  16,
     12,  18,  22,  28,  30,  28,  22,  18,  12,
      6,  12,  14,  18,  20,  18,  14,  12,   6,
      2,   0,   8,   0,  10,   0,   8,   0,   2,
      0,   0,   4,   0,   6,   0,   4,   0,   0,
      0,   0,   0,   0,   0,   0,   0,   0,   0,
      0,   0,   0,   0,   0,   0,   0,   0,   0,
      0,   0,   0,   0,   0,   0,   0,   0,   0,
];

#[rustfmt::skip]
const GUARD_PSQT: [i32; 90] = [
      0,   0,   0,   0,   0,   0,   0,   0,   0,
      0,   0,   0,   0,   0,   0,   0,   0,   0,
      0,   0,   0,   0,   0,   0,   0,   0,   0,
      0,   0,   0,   0,   0,   0,   0,   0,   0,
      0,   0,   6,   0,   8,   0,   6,   0,   0,
      0,   0,   0,   0,   6,   0,   0,   0,   0,
      0,   0,   4,   0,   0,   0,   4,   0,   0,
      0,   0,   0,   2,   6,   2,   0,   0,   0,
      0,   0,   2,   0,   4,   0,   2,   0,   0,
      0,   0,   0,   2,   2,   2,   0,   0,   0,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_position_is_balanced() {
        let board = Board::starting_position();
        assert_eq!(evaluate(&board, 0), 0);
    }

    #[test]
    fn a_spare_rook_decides() {
        let board = Board::from_fen("4k4/9/9/9/9/9/9/9/9/R2K5 w").unwrap();
        let v = evaluate(&board, 0);
        assert!(v > 1000);
        assert!(!is_decisive(v));

        let black_view = Board::from_fen("4k4/9/9/9/9/9/9/9/9/R2K5 b").unwrap();
        assert!(evaluate(&black_view, 0) < -1000);
    }

    #[test]
    fn optimism_moves_the_needle() {
        let board = Board::from_fen("4k4/9/9/9/9/9/9/9/9/R2K5 w").unwrap();
        assert!(evaluate(&board, 120) > evaluate(&board, 0));
    }
}
