use std::time::Instant;

use crate::{engine::Options, types::Color};

pub type TimePoint = i64;

/// Everything a `go` command may constrain. Times are milliseconds unless
/// `npmsec` switches the engine into nodes-as-time mode, in which case every
/// clock is reinterpreted as a node count.
#[derive(Clone, Debug)]
pub struct Limits {
    pub time: [TimePoint; Color::NUM],
    pub inc: [TimePoint; Color::NUM],
    pub movestogo: i32,
    pub movetime: TimePoint,
    pub depth: i32,
    pub nodes: u64,
    pub mate: i32,
    pub perft: usize,
    pub infinite: bool,
    pub ponder_mode: bool,
    pub searchmoves: Vec<String>,
    pub start_time: Instant,
    pub npmsec: TimePoint,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            time: [0; Color::NUM],
            inc: [0; Color::NUM],
            movestogo: 0,
            movetime: 0,
            depth: 0,
            nodes: 0,
            mate: 0,
            perft: 0,
            infinite: false,
            ponder_mode: false,
            searchmoves: Vec::new(),
            start_time: Instant::now(),
            npmsec: 0,
        }
    }
}

impl Limits {
    pub fn use_time_management(&self) -> bool {
        self.time[Color::White] != 0 || self.time[Color::Black] != 0
    }
}

/// Budgets thinking time for one move: `optimum` is the target the
/// iteration-level controller modulates, `maximum` the hard ceiling the
/// periodic check enforces.
pub struct TimeManager {
    start_time: Instant,
    optimum: TimePoint,
    maximum: TimePoint,
    use_nodes_time: bool,
    available_nodes: i64,
}

impl Default for TimeManager {
    fn default() -> Self {
        Self {
            start_time: Instant::now(),
            optimum: 0,
            maximum: 0,
            use_nodes_time: false,
            available_nodes: -1,
        }
    }
}

impl TimeManager {
    pub const fn optimum(&self) -> TimePoint {
        self.optimum
    }

    pub const fn maximum(&self) -> TimePoint {
        self.maximum
    }

    pub const fn use_nodes_time(&self) -> bool {
        self.use_nodes_time
    }

    pub const fn available_nodes(&self) -> i64 {
        self.available_nodes
    }

    /// Forgets the nodes-as-time budget, usually on `ucinewgame`.
    pub fn clear(&mut self) {
        self.available_nodes = -1;
    }

    /// Books the nodes a finished search actually consumed.
    pub fn advance_nodes_time(&mut self, nodes: i64) {
        debug_assert!(self.use_nodes_time);
        self.available_nodes = (self.available_nodes - nodes).max(0);
    }

    /// Elapsed "time" for stop decisions: wall clock normally, searched
    /// nodes when `nodestime` is active.
    pub fn elapsed(&self, nodes: impl FnOnce() -> u64) -> TimePoint {
        if self.use_nodes_time {
            nodes() as TimePoint
        } else {
            self.elapsed_time()
        }
    }

    /// Wall clock since the search started, for PV output only.
    pub fn elapsed_time(&self) -> TimePoint {
        self.start_time.elapsed().as_millis() as TimePoint
    }

    /// Computes `optimum` and `maximum` for this move. The constants come
    /// tuned from the original engine and are reproduced exactly;
    /// `original_time_adjust` carries its state from move to move.
    pub fn init(
        &mut self, limits: &mut Limits, us: Color, ply: usize, options: &Options,
        original_time_adjust: &mut f64,
    ) {
        let npmsec = options.nodestime;

        self.start_time = limits.start_time;
        self.use_nodes_time = npmsec != 0;
        self.optimum = 0;
        self.maximum = 0;

        if limits.time[us] == 0 {
            return;
        }

        let mut move_overhead = options.move_overhead;

        // In nodes-as-time mode clocks are converted into node budgets; the
        // first move of a game seeds the pool.
        if self.use_nodes_time {
            if self.available_nodes == -1 {
                self.available_nodes = npmsec * limits.time[us];
            }

            limits.time[us] = self.available_nodes;
            limits.inc[us] *= npmsec;
            limits.npmsec = npmsec;
            move_overhead *= npmsec;
        }

        let scale_factor = if self.use_nodes_time { npmsec } else { 1 };
        let scaled_time = limits.time[us] / scale_factor;
        let scaled_inc = limits.inc[us] / scale_factor;

        let mut mtg = if limits.movestogo != 0 { limits.movestogo.min(60) } else { 60 };

        // Avoid flagging when under a second remains.
        if scaled_time < 1000 && mtg as f64 / scaled_inc.max(1) as f64 > 0.05 {
            mtg = (scaled_time as f64 * 0.05) as i32;
        }

        let time_left = (limits.time[us] + limits.inc[us] * (mtg as i64 - 1)
            - move_overhead * (2 + mtg as i64))
            .max(1);

        let opt_scale: f64;
        let max_scale: f64;

        if limits.movestogo == 0 {
            // Sudden death: allocate on a log curve of the remaining time.
            if *original_time_adjust < 0.0 {
                *original_time_adjust = 0.3285 * (time_left as f64).log10() - 0.4830;
            }

            let log_time = (scaled_time as f64 / 1000.0).log10();
            let opt_constant = (0.00344 + 0.000200 * log_time).min(0.00450);
            let max_constant = (3.90 + 3.10 * log_time).max(2.50);

            opt_scale = (0.0155 + (ply as f64 + 3.0).powf(0.45) * opt_constant)
                .min(0.2 * limits.time[us] as f64 / time_left as f64)
                * *original_time_adjust;
            max_scale = (max_constant + ply as f64 / 13.6).min(6.5);
        } else {
            // Fixed number of moves to the next control.
            opt_scale = ((0.88 + ply as f64 / 116.4) / mtg as f64)
                .min(0.88 * limits.time[us] as f64 / time_left as f64);
            max_scale = (1.5 + 0.11 * mtg as f64).min(6.3);
        }

        self.optimum = (opt_scale * time_left as f64) as TimePoint;
        self.maximum = ((0.81 * limits.time[us] as f64 - move_overhead as f64)
            .min(max_scale * self.optimum as f64)) as TimePoint
            - 10;

        if options.ponder {
            self.optimum += self.optimum / 4;
        }

        // The raw formulas can cross over on starved clocks; the rest of the
        // search relies on 0 < optimum <= maximum.
        self.optimum = self.optimum.max(1);
        self.maximum = self.maximum.max(self.optimum);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init(
        time: TimePoint, inc: TimePoint, movestogo: i32, options: &Options,
    ) -> (TimeManager, Limits) {
        let mut limits = Limits {
            time: [time; 2],
            inc: [inc; 2],
            movestogo,
            ..Limits::default()
        };
        let mut tm = TimeManager::default();
        let mut adjust = -1.0;
        tm.init(&mut limits, Color::White, 20, options, &mut adjust);
        (tm, limits)
    }

    #[test]
    fn optimum_never_exceeds_maximum() {
        let options = Options::default();
        for time in [50, 100, 1000, 60_000, 3_600_000] {
            for inc in [0, 100, 2000] {
                for movestogo in [0, 1, 25, 60] {
                    let (tm, _) = init(time, inc, movestogo, &options);
                    assert!(
                        tm.optimum() <= tm.maximum(),
                        "optimum {} > maximum {} at time {time} inc {inc} mtg {movestogo}",
                        tm.optimum(),
                        tm.maximum(),
                    );
                }
            }
        }
    }

    #[test]
    fn tight_clock_stays_under_the_cap() {
        // go wtime 100: the hard cap is 0.81 * 100 - overhead - 10.
        let mut options = Options::default();
        options.move_overhead = 0;

        let (tm, _) = init(100, 0, 0, &options);
        assert!(tm.optimum() < 100);
        assert!(tm.maximum() <= 71);
        assert!(tm.optimum() > 0);
    }

    #[test]
    fn ponder_bumps_the_optimum() {
        let mut options = Options::default();
        let (without, _) = init(60_000, 1000, 0, &options);

        options.ponder = true;
        let (with, _) = init(60_000, 1000, 0, &options);

        assert!(with.optimum() > without.optimum());
        assert_eq!(with.optimum(), without.optimum() + without.optimum() / 4);
    }

    #[test]
    fn nodes_as_time_seeds_and_advances() {
        let mut options = Options::default();
        options.nodestime = 800_000;

        let mut limits = Limits { time: [1000, 1000], ..Limits::default() };
        let mut tm = TimeManager::default();
        let mut adjust = -1.0;
        tm.init(&mut limits, Color::White, 0, &options, &mut adjust);

        assert!(tm.use_nodes_time());
        assert_eq!(tm.available_nodes(), 800_000 * 1000);
        assert_eq!(limits.time[Color::White], 800_000 * 1000);

        tm.advance_nodes_time(10_000_000);
        assert_eq!(tm.available_nodes(), 800_000 * 1000 - 10_000_000);

        // The budget never goes negative.
        tm.advance_nodes_time(i64::MAX);
        assert_eq!(tm.available_nodes(), 0);
    }

    #[test]
    fn no_clock_means_no_budget() {
        let options = Options::default();
        let (tm, _) = init(0, 0, 0, &options);
        assert_eq!(tm.optimum(), 0);
        assert_eq!(tm.maximum(), 0);
    }
}
