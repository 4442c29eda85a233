use super::{attacked, on_board, Board, DIAGONALS, KNIGHT_DELTAS, ORTHOGONALS};
use crate::types::{piece_value, Color, Move, Piece, PieceType, Square};

impl Board {
    /// Static exchange evaluation: true when the capture sequence starting
    /// with `mv` nets at least `threshold`. Attackers are recomputed on the
    /// shrinking occupancy each round, which keeps cannon screens and
    /// knight legs exact as pieces disappear.
    pub fn see_ge(&self, mv: Move, threshold: i32) -> bool {
        debug_assert!(mv.is_ok());

        let mut swap = piece_value(self.pieces[mv.to()].piece_type()) - threshold;
        if swap < 0 {
            return false;
        }

        swap = piece_value(self.pieces[mv.from()].piece_type()) - swap;
        if swap <= 0 {
            return true;
        }

        let mut occupancy = self.pieces;
        occupancy[mv.to()] = occupancy[mv.from()];
        occupancy[mv.from()] = Piece::None;

        let mut side = !self.side;
        let mut result = true;

        loop {
            let Some((sq, pt)) = least_valuable_attacker(&occupancy, mv.to(), side) else {
                break;
            };

            // A king can only recapture if doing so is not suicide.
            if pt == PieceType::King {
                let mut after = occupancy;
                after[mv.to()] = after[sq];
                after[sq] = Piece::None;
                if attacked(&after, mv.to(), !side) {
                    break;
                }
            }

            result = !result;

            swap = piece_value(pt) - swap;
            if swap < result as i32 {
                break;
            }

            occupancy[mv.to()] = occupancy[sq];
            occupancy[sq] = Piece::None;
            side = !side;
        }

        result
    }
}

/// Finds the cheapest piece of `side` attacking `sq` on this occupancy.
fn least_valuable_attacker(
    pieces: &[Piece; Square::NUM], sq: Square, side: Color,
) -> Option<(Square, PieceType)> {
    let mut best: Option<(Square, PieceType)> = None;
    let mut best_value = i32::MAX;

    let mut consider = |source: Square, pt: PieceType| {
        // The king recaptures only as a last resort.
        let value = if pt == PieceType::King { i32::MAX - 1 } else { piece_value(pt) };
        if value < best_value {
            best_value = value;
            best = Some((source, pt));
        }
    };

    let (file, rank) = (sq.file() as i8, sq.rank() as i8);

    for (df, dr) in ORTHOGONALS {
        let mut screens = 0;
        let mut step = 1;
        while let Some(source) = on_board(file + df * step, rank + dr * step) {
            let piece = pieces[source];
            if piece.is_some() {
                if piece.color() == side {
                    let pt = piece.piece_type();
                    if screens == 0 && pt == PieceType::Rook {
                        consider(source, pt);
                    }
                    if screens == 0 && pt == PieceType::King && step == 1 && sq.in_palace(side) {
                        consider(source, pt);
                    }
                    if screens == 1 && pt == PieceType::Cannon {
                        consider(source, pt);
                    }
                }
                screens += 1;
                if screens > 1 {
                    break;
                }
            }
            step += 1;
        }
    }

    for (df, dr) in KNIGHT_DELTAS {
        let Some(source) = on_board(file + df, rank + dr) else { continue };
        let piece = pieces[source];
        if !piece.is_some() || piece.color() != side || piece.piece_type() != PieceType::Knight {
            continue;
        }
        let leg_df = if df.abs() == 2 { -df.signum() } else { 0 };
        let leg_dr = if dr.abs() == 2 { -dr.signum() } else { 0 };
        let leg = on_board(file + df + leg_df, rank + dr + leg_dr).expect("leg is between");
        if !pieces[leg].is_some() {
            consider(source, PieceType::Knight);
        }
    }

    let behind = match side {
        Color::White => on_board(file, rank - 1),
        Color::Black => on_board(file, rank + 1),
    };
    if let Some(source) = behind {
        let piece = pieces[source];
        if piece.is_some() && piece.color() == side && piece.piece_type() == PieceType::Pawn {
            consider(source, PieceType::Pawn);
        }
    }
    for df in [-1, 1] {
        let Some(source) = on_board(file + df, rank) else { continue };
        let piece = pieces[source];
        if piece.is_some()
            && piece.color() == side
            && piece.piece_type() == PieceType::Pawn
            && source.crossed_river(side)
        {
            consider(source, PieceType::Pawn);
        }
    }

    if sq.in_palace(side) {
        for (df, dr) in DIAGONALS {
            let Some(source) = on_board(file + df, rank + dr) else { continue };
            let piece = pieces[source];
            if piece.is_some()
                && piece.color() == side
                && piece.piece_type() == PieceType::Advisor
                && source.in_palace(side)
            {
                consider(source, PieceType::Advisor);
            }
        }
    }

    if !sq.crossed_river(side) {
        for (df, dr) in DIAGONALS {
            let Some(source) = on_board(file + 2 * df, rank + 2 * dr) else { continue };
            let piece = pieces[source];
            if !piece.is_some() || piece.color() != side || piece.piece_type() != PieceType::Bishop
            {
                continue;
            }
            let eye = on_board(file + df, rank + dr).expect("eye is between");
            if !pieces[eye].is_some() {
                consider(source, PieceType::Bishop);
            }
        }
    }

    best
}
