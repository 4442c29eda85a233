use crate::types::{Move, MAX_PLY};

/// Triangular principal-variation table.
///
/// See [Triangular PV Table](https://www.chessprogramming.org/Triangular_PV-Table).
pub struct PvTable {
    table: Box<[[Move; MAX_PLY + 1]; MAX_PLY + 1]>,
    len: Box<[usize; MAX_PLY + 1]>,
}

impl PvTable {
    pub fn clear(&mut self, ply: usize) {
        self.len[ply] = 0;
    }

    /// Prepends `mv` to the child line, making it this ply's line.
    pub fn update(&mut self, ply: usize, mv: Move) {
        self.table[ply][0] = mv;
        self.len[ply] = self.len[ply + 1] + 1;
        for i in 0..self.len[ply + 1] {
            self.table[ply][i + 1] = self.table[ply + 1][i];
        }
    }

    pub fn line(&self, ply: usize) -> &[Move] {
        &self.table[ply][..self.len[ply]]
    }
}

impl Default for PvTable {
    fn default() -> Self {
        Self {
            table: vec![[Move::NONE; MAX_PLY + 1]; MAX_PLY + 1]
                .into_boxed_slice()
                .try_into()
                .map_err(|_| ())
                .unwrap(),
            len: Box::new([0; MAX_PLY + 1]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Square;

    #[test]
    fn lines_chain_upward() {
        let mut pv = PvTable::default();
        let first = Move::new(Square::new(0), Square::new(9));
        let second = Move::new(Square::new(40), Square::new(41));

        pv.clear(2);
        pv.clear(1);
        pv.update(1, second);
        pv.update(0, first);

        assert_eq!(pv.line(0), &[first, second]);
    }
}
