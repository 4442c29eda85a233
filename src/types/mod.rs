mod macros;

pub mod arrayvec;
pub mod color;
pub mod movelist;
pub mod moves;
pub mod piece;
pub mod score;
pub mod square;

pub use arrayvec::*;
pub use color::*;
pub use movelist::*;
pub use moves::*;
pub use piece::*;
pub use score::*;
pub use square::*;

/// The maximum number of plies that can be searched.
pub const MAX_PLY: usize = 246;

/// Upper bound on the number of pseudo-legal moves in any Xiangqi position.
pub const MAX_MOVES: usize = 128;
