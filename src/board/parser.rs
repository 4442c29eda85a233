use super::Board;
use crate::types::{Color, Piece, PieceType, Square};

/// Why a FEN string was rejected.
#[derive(Debug, Eq, PartialEq)]
pub enum ParseFenError {
    BadBoard,
    BadSideToMove,
    MissingKing,
}

impl std::fmt::Display for ParseFenError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let reason = match self {
            Self::BadBoard => "malformed board field",
            Self::BadSideToMove => "side to move must be 'w' or 'b'",
            Self::MissingKing => "both kings must be on the board",
        };
        f.write_str(reason)
    }
}

impl std::error::Error for ParseFenError {}

impl Board {
    /// Parses a Xiangqi FEN. Only the board and side-to-move fields are
    /// required; trailing clock fields are accepted and the halfmove clock
    /// is honored when present.
    pub fn from_fen(fen: &str) -> Result<Self, ParseFenError> {
        let mut fields = fen.split_whitespace();
        let board_field = fields.next().ok_or(ParseFenError::BadBoard)?;
        let side_field = fields.next().unwrap_or("w");

        let mut board = Self {
            pieces: [Piece::None; Square::NUM],
            king_sq: [Square::NONE; Color::NUM],
            side: Color::White,
            key: 0,
            pawn_key: 0,
            major_key: 0,
            minor_key: 0,
            non_pawn_key: [0; Color::NUM],
            rule60: 0,
            game_ply: 0,
            captured: Piece::None,
            in_check: false,
            history: Vec::with_capacity(256),
        };

        let mut rank: i8 = 9;
        let mut file: i8 = 0;
        for c in board_field.chars() {
            match c {
                '/' => {
                    if file != 9 {
                        return Err(ParseFenError::BadBoard);
                    }
                    rank -= 1;
                    file = 0;
                }
                '1'..='9' => file += c as i8 - b'0' as i8,
                _ => {
                    let piece = Piece::from_fen_char(c).ok_or(ParseFenError::BadBoard)?;
                    if !(0..9).contains(&file) || !(0..10).contains(&rank) {
                        return Err(ParseFenError::BadBoard);
                    }
                    let sq = Square::from_file_rank(file as u8, rank as u8);
                    board.pieces[sq] = piece;
                    board.xor_piece(piece, sq);
                    if piece.piece_type() == PieceType::King {
                        board.king_sq[piece.color()] = sq;
                    }
                    file += 1;
                }
            }
        }
        if rank != 0 || file != 9 {
            return Err(ParseFenError::BadBoard);
        }

        board.side = match side_field {
            "w" | "r" => Color::White,
            "b" => Color::Black,
            _ => return Err(ParseFenError::BadSideToMove),
        };
        if board.side == Color::Black {
            board.key ^= super::zobrist::Zobrist::SIDE;
        }

        if !board.king_sq[Color::White].is_some() || !board.king_sq[Color::Black].is_some() {
            return Err(ParseFenError::MissingKing);
        }

        // Optional "- - halfmove fullmove" tail.
        let mut tail = fields.skip_while(|field| *field == "-");
        if let Some(halfmove) = tail.next().and_then(|f| f.parse::<u32>().ok()) {
            board.rule60 = halfmove.min(120) as u8;
        }
        if let Some(fullmove) = tail.next().and_then(|f| f.parse::<usize>().ok()) {
            board.game_ply = 2 * fullmove.saturating_sub(1)
                + (board.side == Color::Black) as usize;
        }

        board.in_check = board.compute_check();
        Ok(board)
    }

    pub fn fen(&self) -> String {
        let mut out = String::with_capacity(64);

        for rank in (0..10u8).rev() {
            let mut empty = 0;
            for file in 0..9u8 {
                let piece = self.pieces[Square::from_file_rank(file, rank)];
                if piece.is_some() {
                    if empty > 0 {
                        out.push((b'0' + empty) as char);
                        empty = 0;
                    }
                    out.push(piece.to_fen_char());
                } else {
                    empty += 1;
                }
            }
            if empty > 0 {
                out.push((b'0' + empty) as char);
            }
            if rank > 0 {
                out.push('/');
            }
        }

        out.push(' ');
        out.push(if self.side == Color::White { 'w' } else { 'b' });
        out.push_str(&format!(
            " - - {} {}",
            self.rule60,
            1 + self.game_ply / 2
        ));
        out
    }
}
