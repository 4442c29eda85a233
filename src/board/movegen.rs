use super::{on_board, Board, DIAGONALS, KNIGHT_DELTAS, ORTHOGONALS};
use crate::types::{Color, Move, MoveList, PieceType, Square};

#[derive(Copy, Clone, Eq, PartialEq)]
enum GenType {
    All,
    Captures,
}

impl Board {
    /// Generates pseudo-legal moves: piece geometry is respected, king
    /// safety and the flying-general rule are left to `legal`.
    pub fn generate_moves(&self) -> MoveList {
        self.generate(GenType::All)
    }

    pub fn generate_captures(&self) -> MoveList {
        self.generate(GenType::Captures)
    }

    fn generate(&self, gen: GenType) -> MoveList {
        let mut list = MoveList::new();
        let us = self.side;

        for index in 0..Square::NUM as u8 {
            let from = Square::new(index);
            let piece = self.pieces[from];
            if !piece.is_some() || piece.color() != us {
                continue;
            }

            match piece.piece_type() {
                PieceType::Rook => self.gen_rook(&mut list, from, gen),
                PieceType::Cannon => self.gen_cannon(&mut list, from, gen),
                PieceType::Knight => self.gen_knight(&mut list, from, gen),
                PieceType::Bishop => self.gen_bishop(&mut list, from, gen),
                PieceType::Advisor => self.gen_advisor(&mut list, from, gen),
                PieceType::King => self.gen_king(&mut list, from, gen),
                PieceType::Pawn => self.gen_pawn(&mut list, from, gen),
                PieceType::None => unreachable!(),
            }
        }

        list
    }

    fn emit(&self, list: &mut MoveList, from: Square, to: Square, gen: GenType) {
        let target = self.pieces[to];
        if target.is_some() {
            if target.color() != self.side {
                list.add(from, to);
            }
        } else if gen == GenType::All {
            list.add(from, to);
        }
    }

    fn gen_rook(&self, list: &mut MoveList, from: Square, gen: GenType) {
        let (file, rank) = (from.file() as i8, from.rank() as i8);
        for (df, dr) in ORTHOGONALS {
            let mut step = 1;
            while let Some(to) = on_board(file + df * step, rank + dr * step) {
                self.emit(list, from, to, gen);
                if self.pieces[to].is_some() {
                    break;
                }
                step += 1;
            }
        }
    }

    fn gen_cannon(&self, list: &mut MoveList, from: Square, gen: GenType) {
        let (file, rank) = (from.file() as i8, from.rank() as i8);
        for (df, dr) in ORTHOGONALS {
            let mut step = 1;
            let mut behind_screen = false;
            while let Some(to) = on_board(file + df * step, rank + dr * step) {
                let target = self.pieces[to];
                if !behind_screen {
                    if target.is_some() {
                        behind_screen = true;
                    } else if gen == GenType::All {
                        list.add(from, to);
                    }
                } else if target.is_some() {
                    if target.color() != self.side {
                        list.add(from, to);
                    }
                    break;
                }
                step += 1;
            }
        }
    }

    fn gen_knight(&self, list: &mut MoveList, from: Square, gen: GenType) {
        let (file, rank) = (from.file() as i8, from.rank() as i8);
        for (df, dr) in KNIGHT_DELTAS {
            let Some(to) = on_board(file + df, rank + dr) else { continue };
            let leg_df = if df.abs() == 2 { df.signum() } else { 0 };
            let leg_dr = if dr.abs() == 2 { dr.signum() } else { 0 };
            let leg = on_board(file + leg_df, rank + leg_dr).expect("leg is adjacent");
            if !self.pieces[leg].is_some() {
                self.emit(list, from, to, gen);
            }
        }
    }

    fn gen_bishop(&self, list: &mut MoveList, from: Square, gen: GenType) {
        let us = self.side;
        let (file, rank) = (from.file() as i8, from.rank() as i8);
        for (df, dr) in DIAGONALS {
            let Some(to) = on_board(file + 2 * df, rank + 2 * dr) else { continue };
            if to.crossed_river(us) {
                continue;
            }
            let eye = on_board(file + df, rank + dr).expect("eye is adjacent");
            if !self.pieces[eye].is_some() {
                self.emit(list, from, to, gen);
            }
        }
    }

    fn gen_advisor(&self, list: &mut MoveList, from: Square, gen: GenType) {
        let us = self.side;
        let (file, rank) = (from.file() as i8, from.rank() as i8);
        for (df, dr) in DIAGONALS {
            let Some(to) = on_board(file + df, rank + dr) else { continue };
            if to.in_palace(us) {
                self.emit(list, from, to, gen);
            }
        }
    }

    fn gen_king(&self, list: &mut MoveList, from: Square, gen: GenType) {
        let us = self.side;
        let (file, rank) = (from.file() as i8, from.rank() as i8);
        for (df, dr) in ORTHOGONALS {
            let Some(to) = on_board(file + df, rank + dr) else { continue };
            if to.in_palace(us) {
                self.emit(list, from, to, gen);
            }
        }
    }

    fn gen_pawn(&self, list: &mut MoveList, from: Square, gen: GenType) {
        let us = self.side;
        let (file, rank) = (from.file() as i8, from.rank() as i8);
        let forward = if us == Color::White { 1 } else { -1 };

        if let Some(to) = on_board(file, rank + forward) {
            self.emit(list, from, to, gen);
        }
        if from.crossed_river(us) {
            for df in [-1, 1] {
                if let Some(to) = on_board(file + df, rank) {
                    self.emit(list, from, to, gen);
                }
            }
        }
    }

    /// Counts strictly legal moves; used at the root and by mate detection
    /// in tests.
    pub fn has_legal_moves(&self) -> bool {
        self.generate_moves().iter().any(|entry| self.legal(entry.mv))
    }

    pub fn is_pseudo_legal(&self, mv: Move) -> bool {
        mv.is_ok() && self.generate_moves().contains(mv)
    }
}

impl Board {
    /// Resolves a move given in coordinate notation against the legal moves
    /// of this position.
    pub fn parse_move(&self, text: &str) -> Option<Move> {
        let mv = Move::try_from(text).ok()?;
        if self.is_pseudo_legal(mv) && self.legal(mv) {
            Some(mv)
        } else {
            None
        }
    }
}
