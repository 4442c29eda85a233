use super::{zobrist::Zobrist, Board, Undo};
use crate::types::{Move, Piece, PieceType, Square};

impl Board {
    pub fn do_move(&mut self, mv: Move) {
        debug_assert!(mv.is_ok());

        let us = self.side;
        let (from, to) = (mv.from(), mv.to());
        let moved = self.pieces[from];
        let captured = self.pieces[to];

        debug_assert!(moved.is_some() && moved.color() == us);
        debug_assert!(!captured.is_some() || captured.color() != us);

        self.history.push(Undo {
            mv,
            key: self.key,
            rule60: self.rule60,
            captured,
            in_check: self.in_check,
        });

        if captured.is_some() {
            self.xor_piece(captured, to);
            self.rule60 = 0;
        } else {
            self.rule60 = self.rule60.saturating_add(1);
        }

        self.xor_piece(moved, from);
        self.pieces[from] = Piece::None;
        self.pieces[to] = moved;
        self.xor_piece(moved, to);

        if moved.piece_type() == PieceType::King {
            self.king_sq[us] = to;
        }

        self.key ^= Zobrist::SIDE;
        self.side = !us;
        self.game_ply += 1;
        self.captured = captured;
        self.in_check = self.compute_check();
    }

    pub fn undo_move(&mut self, mv: Move) {
        debug_assert!(mv.is_ok());

        let undo = self.history.pop().expect("undo without a prior move");
        debug_assert!(undo.mv == mv);

        self.side = !self.side;
        self.game_ply -= 1;

        let (from, to) = (mv.from(), mv.to());
        let moved = self.pieces[to];

        self.xor_piece(moved, to);
        self.pieces[to] = undo.captured;
        self.pieces[from] = moved;
        self.xor_piece(moved, from);

        if undo.captured.is_some() {
            self.xor_piece(undo.captured, to);
        }

        if moved.piece_type() == PieceType::King {
            self.king_sq[self.side] = from;
        }

        self.key ^= Zobrist::SIDE;
        debug_assert!(self.key == undo.key);

        self.rule60 = undo.rule60;
        self.in_check = undo.in_check;
        self.captured = self.history.last().map_or(Piece::None, |u| u.captured);
    }

    pub fn do_null_move(&mut self) {
        debug_assert!(!self.in_check);

        self.history.push(Undo {
            mv: Move::NULL,
            key: self.key,
            rule60: self.rule60,
            captured: Piece::None,
            in_check: self.in_check,
        });

        self.key ^= Zobrist::SIDE;
        self.side = !self.side;
        self.rule60 = self.rule60.saturating_add(1);
        self.captured = Piece::None;
        self.in_check = false;
    }

    pub fn undo_null_move(&mut self) {
        let undo = self.history.pop().expect("undo without a prior null move");
        debug_assert!(undo.mv == Move::NULL);

        self.key ^= Zobrist::SIDE;
        self.side = !self.side;
        self.rule60 = undo.rule60;
        self.in_check = undo.in_check;
        self.captured = self.history.last().map_or(Piece::None, |u| u.captured);
    }

    /// The position key after `mv`, used to prefetch the TT entry before the
    /// move is actually made.
    pub fn key_after(&self, mv: Move) -> u64 {
        let moved = self.pieces[mv.from()];
        let captured = self.pieces[mv.to()];

        let mut key = self.key ^ Zobrist::SIDE;
        key ^= Zobrist::piece(moved, mv.from()) ^ Zobrist::piece(moved, mv.to());
        if captured.is_some() {
            key ^= Zobrist::piece(captured, mv.to());
        }
        key
    }

    pub(crate) fn xor_piece(&mut self, piece: Piece, sq: Square) {
        let z = Zobrist::piece(piece, sq);
        self.key ^= z;

        match piece.piece_type() {
            PieceType::Pawn => self.pawn_key ^= z,
            PieceType::Rook | PieceType::Cannon | PieceType::Knight => {
                self.major_key ^= z;
                self.non_pawn_key[piece.color()] ^= z;
            }
            PieceType::Advisor | PieceType::Bishop => {
                self.minor_key ^= z;
                self.non_pawn_key[piece.color()] ^= z;
            }
            _ => self.non_pawn_key[piece.color()] ^= z,
        }
    }
}
