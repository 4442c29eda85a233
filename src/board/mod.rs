mod makemove;
mod movegen;
mod parser;
mod rule;
mod see;
#[cfg(test)]
mod tests;
mod zobrist;

pub use parser::ParseFenError;
pub use rule::RuleJudgement;

use crate::types::{piece_value, Color, Move, Piece, PieceType, Square};

pub const START_FEN: &str = "rnbakabnr/9/1c5c1/p1p1p1p1p/9/9/P1P1P1P1P/1C5C1/9/RNBAKABNR w";

/// A Xiangqi position: mailbox board, incremental zobrist keys, and an undo
/// stack that doubles as the repetition history for the rule arbiter.
#[derive(Clone)]
pub struct Board {
    pieces: [Piece; Square::NUM],
    king_sq: [Square; Color::NUM],
    side: Color,

    key: u64,
    pawn_key: u64,
    major_key: u64,
    minor_key: u64,
    non_pawn_key: [u64; Color::NUM],

    rule60: u8,
    game_ply: usize,
    captured: Piece,
    in_check: bool,

    history: Vec<Undo>,
}

#[derive(Copy, Clone)]
pub(crate) struct Undo {
    pub mv: Move,
    pub key: u64,
    pub rule60: u8,
    pub captured: Piece,
    pub in_check: bool,
}

impl Board {
    pub fn starting_position() -> Self {
        Self::from_fen(START_FEN).expect("start position FEN is valid")
    }

    pub const fn side_to_move(&self) -> Color {
        self.side
    }

    pub const fn key(&self) -> u64 {
        self.key
    }

    pub const fn pawn_key(&self) -> u64 {
        self.pawn_key
    }

    pub const fn major_key(&self) -> u64 {
        self.major_key
    }

    pub const fn minor_key(&self) -> u64 {
        self.minor_key
    }

    pub const fn non_pawn_key(&self, color: Color) -> u64 {
        self.non_pawn_key[color as usize]
    }

    pub const fn rule60_count(&self) -> u8 {
        self.rule60
    }

    pub const fn game_ply(&self) -> usize {
        self.game_ply
    }

    /// The piece taken by the last move, `Piece::None` after a quiet move.
    pub const fn captured_piece(&self) -> Piece {
        self.captured
    }

    pub fn last_move(&self) -> Move {
        self.history.last().map_or(Move::NONE, |undo| undo.mv)
    }

    /// True when the side to move is in check.
    pub const fn checkers(&self) -> bool {
        self.in_check
    }

    pub fn piece_on(&self, sq: Square) -> Piece {
        self.pieces[sq]
    }

    pub fn moved_piece(&self, mv: Move) -> Piece {
        self.pieces[mv.from()]
    }

    pub fn king_square(&self, color: Color) -> Square {
        self.king_sq[color]
    }

    pub fn capture(&self, mv: Move) -> bool {
        mv.is_ok() && self.pieces[mv.to()].is_some()
    }

    /// Sum of rook, cannon, and knight material for one side. The search
    /// treats a side with none of these as unable to stand a null move.
    pub fn major_material(&self, color: Color) -> i32 {
        let mut total = 0;
        for sq in 0..Square::NUM as u8 {
            let piece = self.pieces[Square::new(sq)];
            if piece.is_some() && piece.color() == color && piece.piece_type().is_major() {
                total += piece_value(piece.piece_type());
            }
        }
        total
    }

    pub fn total_major_material(&self) -> i32 {
        self.major_material(Color::White) + self.major_material(Color::Black)
    }

    pub fn count(&self, pt: PieceType) -> i32 {
        self.pieces.iter().filter(|p| p.is_some() && p.piece_type() == pt).count() as i32
    }

    /// Tests a pseudo-legal move for full legality: the mover's king must not
    /// be attacked afterwards, which also covers the flying-general rule
    /// since a bare king "attacks" along an open file.
    pub fn legal(&self, mv: Move) -> bool {
        debug_assert!(mv.is_ok());

        let us = self.side;
        let mut pieces = self.pieces;
        let moved = pieces[mv.from()];

        pieces[mv.to()] = moved;
        pieces[mv.from()] = Piece::None;

        let ksq = if moved.piece_type() == PieceType::King { mv.to() } else { self.king_sq[us] };
        !attacked(&pieces, ksq, !us)
    }

    pub fn gives_check(&self, mv: Move) -> bool {
        debug_assert!(mv.is_ok());

        let us = self.side;
        let mut pieces = self.pieces;

        pieces[mv.to()] = pieces[mv.from()];
        pieces[mv.from()] = Piece::None;

        attacked(&pieces, self.king_sq[!us], us)
    }

    pub(crate) fn compute_check(&self) -> bool {
        attacked(&self.pieces, self.king_sq[self.side], !self.side)
    }
}

pub(crate) fn on_board(file: i8, rank: i8) -> Option<Square> {
    if (0..9).contains(&file) && (0..10).contains(&rank) {
        Some(Square::from_file_rank(file as u8, rank as u8))
    } else {
        None
    }
}

const ORTHOGONALS: [(i8, i8); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];
const KNIGHT_DELTAS: [(i8, i8); 8] =
    [(1, 2), (-1, 2), (1, -2), (-1, -2), (2, 1), (-2, 1), (2, -1), (-2, -1)];
const DIAGONALS: [(i8, i8); 4] = [(1, 1), (-1, 1), (1, -1), (-1, -1)];

/// Whether any piece of `by` attacks `sq` on the given occupancy. Covers
/// every piece kind, including the cannon's screen capture and the
/// flying-general file attack.
pub(crate) fn attacked(pieces: &[Piece; Square::NUM], sq: Square, by: Color) -> bool {
    let (file, rank) = (sq.file() as i8, sq.rank() as i8);

    // Rooks, cannons, the adjacent king, and the facing king all work along
    // the four orthogonal rays.
    for (df, dr) in ORTHOGONALS {
        let mut screens = 0;
        let mut step = 1;
        while let Some(target) = on_board(file + df * step, rank + dr * step) {
            let piece = pieces[target];
            if piece.is_some() {
                if piece.color() == by {
                    let pt = piece.piece_type();
                    if screens == 0 && pt == PieceType::Rook {
                        return true;
                    }
                    if screens == 0
                        && pt == PieceType::King
                        && (df == 0 || (step == 1 && sq.in_palace(by)))
                    {
                        return true;
                    }
                    if screens == 1 && pt == PieceType::Cannon {
                        return true;
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

    // A knight attacks around its leg square, seen from the target side.
    for (df, dr) in KNIGHT_DELTAS {
        let Some(source) = on_board(file + df, rank + dr) else { continue };
        let piece = pieces[source];
        if !piece.is_some() || piece.color() != by || piece.piece_type() != PieceType::Knight {
            continue;
        }
        let leg_df = if df.abs() == 2 { -df.signum() } else { 0 };
        let leg_dr = if dr.abs() == 2 { -dr.signum() } else { 0 };
        let leg = on_board(file + df + leg_df, rank + dr + leg_dr).expect("leg is between");
        if !pieces[leg].is_some() {
            return true;
        }
    }

    // Pawns push into the square from behind, or sideways once across the
    // river.
    let behind = match by {
        Color::White => on_board(file, rank - 1),
        Color::Black => on_board(file, rank + 1),
    };
    if let Some(source) = behind {
        let piece = pieces[source];
        if piece.is_some() && piece.color() == by && piece.piece_type() == PieceType::Pawn {
            return true;
        }
    }
    for df in [-1, 1] {
        let Some(source) = on_board(file + df, rank) else { continue };
        let piece = pieces[source];
        if piece.is_some()
            && piece.color() == by
            && piece.piece_type() == PieceType::Pawn
            && source.crossed_river(by)
        {
            return true;
        }
    }

    // Advisors inside the palace.
    if sq.in_palace(by) {
        for (df, dr) in DIAGONALS {
            let Some(source) = on_board(file + df, rank + dr) else { continue };
            let piece = pieces[source];
            if piece.is_some()
                && piece.color() == by
                && piece.piece_type() == PieceType::Advisor
                && source.in_palace(by)
            {
                return true;
            }
        }
    }

    // Elephants two diagonals out, blocked at the eye, never across the
    // river.
    if !sq.crossed_river(by) {
        for (df, dr) in DIAGONALS {
            let Some(source) = on_board(file + 2 * df, rank + 2 * dr) else { continue };
            let piece = pieces[source];
            if !piece.is_some() || piece.color() != by || piece.piece_type() != PieceType::Bishop {
                continue;
            }
            let eye = on_board(file + df, rank + dr).expect("eye is between");
            if !pieces[eye].is_some() {
                return true;
            }
        }
    }

    false
}

impl std::fmt::Display for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, " +---------------------------+")?;
        for rank in (0..10u8).rev() {
            write!(f, " |")?;
            for file in 0..9u8 {
                let piece = self.pieces[Square::from_file_rank(file, rank)];
                let c = if piece.is_some() { piece.to_fen_char() } else { '.' };
                write!(f, " {c} ")?;
            }
            writeln!(f, "| {rank}")?;
        }
        writeln!(f, " +---------------------------+")?;
        writeln!(f, "   a  b  c  d  e  f  g  h  i")?;
        writeln!(f)?;
        writeln!(f, "Fen: {}", self.fen())?;
        write!(f, "Key: {:016X}", self.key)
    }
}
