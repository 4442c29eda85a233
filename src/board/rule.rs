use super::Board;
use crate::types::{mate_in, mated_in, Score};

/// Verdict of the repetition/rule60 arbiter for the current position.
///
/// `Final` settles the node outright. `Provisional` comes from a two-fold
/// repetition whose outcome the opponent may still steer away from; the
/// search narrows its window toward the draw score instead of returning.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RuleJudgement {
    None,
    Final(i32),
    Provisional(i32),
}

impl Board {
    /// Arbitrates repetitions and the 60-move (120-ply) rule.
    ///
    /// A cycle forced by one side's uninterrupted checks is scored as a
    /// mate against the checking side; anything else repeats to a draw.
    /// Mutual perpetual check is also a draw.
    pub fn rule_judge(&self, ply: usize) -> RuleJudgement {
        if self.rule60 >= 120 && !self.in_check {
            return RuleJudgement::Final(Score::DRAW);
        }

        let len = self.history.len();
        let window = (self.rule60 as usize).min(len);
        if window < 4 {
            return RuleJudgement::None;
        }

        // A repeating cycle arbitrates provisionally on its first return and
        // definitively on the second; drawish cycles settle right away.
        let mut verdict = None;
        let mut distance = 2;
        while distance <= window {
            let index = len - distance;
            if self.history[index].key == self.key {
                let v = self.arbitrate_cycle(index, ply);
                if v == Score::DRAW {
                    return RuleJudgement::Final(v);
                }
                match verdict {
                    None => verdict = Some(v),
                    Some(first) => return RuleJudgement::Final(first),
                }
            }
            distance += 2;
        }

        match verdict {
            Some(v) => RuleJudgement::Provisional(v),
            None => RuleJudgement::None,
        }
    }

    /// Scores the cycle from history index `start` to the present. Check
    /// flags live on the position a move leads into: entry `k` records
    /// whether the side to move at `k` stood in check.
    fn arbitrate_cycle(&self, start: usize, ply: usize) -> i32 {
        let len = self.history.len();

        // Checks delivered by the opponent land on our positions: start,
        // start + 2, ... up to and including the current node.
        let mut they_always_check = self.in_check;
        let mut index = start;
        while index < len {
            if !self.history[index].in_check {
                they_always_check = false;
                break;
            }
            index += 2;
        }

        // Checks we deliver land on their positions: start + 1, start + 3...
        let mut we_always_check = true;
        let mut index = start + 1;
        while index < len {
            if !self.history[index].in_check {
                we_always_check = false;
                break;
            }
            index += 2;
        }

        match (we_always_check, they_always_check) {
            (true, false) => mated_in(ply),
            (false, true) => mate_in(ply),
            _ => Score::DRAW,
        }
    }
}
