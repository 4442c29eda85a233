use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use crate::{
    board::Board,
    engine::Options,
    history::{
        CaptureHistory, ContinuationCorrectionHistory, ContinuationHistory, CorrectionHistory,
        LowPlyHistory, MainHistory, PawnHistory,
    },
    pv::PvTable,
    search::{self, SearchCallbacks},
    stack::Stack,
    timeman::{Limits, TimeManager, TimePoint},
    transposition::TranspositionTable,
    types::{is_loss, is_win, Color, Move, Score, MAX_MOVES, MAX_PLY},
};

/// State every worker shares: the transposition table and the atomics that
/// coordinate stopping. There is no locking on the search path.
pub struct SharedContext {
    pub tt: TranspositionTable,
    pub stop: AtomicBool,
    pub aborted_search: AtomicBool,
    pub increase_depth: AtomicBool,
    pub ponder: AtomicBool,
    pub stop_on_ponderhit: AtomicBool,
    pub nodes: AtomicU64,
}

impl Default for SharedContext {
    fn default() -> Self {
        Self {
            tt: TranspositionTable::default(),
            stop: AtomicBool::new(false),
            aborted_search: AtomicBool::new(false),
            increase_depth: AtomicBool::new(true),
            ponder: AtomicBool::new(false),
            stop_on_ponderhit: AtomicBool::new(false),
            nodes: AtomicU64::new(0),
        }
    }
}

/// A move at the root with the statistics iterative deepening keeps for it.
#[derive(Clone)]
pub struct RootMove {
    pub mv: Move,
    pub pv: Vec<Move>,
    pub score: i32,
    pub previous_score: i32,
    pub average_score: i32,
    pub mean_squared_score: i64,
    pub uci_score: i32,
    pub sel_depth: i32,
    pub effort: u64,
    pub score_lowerbound: bool,
    pub score_upperbound: bool,
}

impl RootMove {
    pub fn new(mv: Move) -> Self {
        Self {
            mv,
            pv: vec![mv],
            score: -Score::INFINITE,
            previous_score: -Score::INFINITE,
            average_score: -Score::INFINITE,
            mean_squared_score: -(Score::INFINITE as i64) * Score::INFINITE as i64,
            uci_score: -Score::INFINITE,
            sel_depth: 0,
            effort: 0,
            score_lowerbound: false,
            score_upperbound: false,
        }
    }
}

/// Stable-sorts root moves best first, preserving the previous iteration's
/// order among unsearched moves.
pub fn sort_root_moves(moves: &mut [RootMove]) {
    moves.sort_by(|a, b| {
        (b.score, b.previous_score).cmp(&(a.score, a.previous_score))
    });
}

/// Per-thread search state: its own board, stack, histories, and root move
/// list. The shared context is the only thing it holds in common with the
/// other workers.
pub struct ThreadData {
    pub id: usize,
    pub shared: Arc<SharedContext>,

    pub board: Board,
    pub stack: Stack,
    pub pv: PvTable,
    pub ply: usize,

    pub root_moves: Vec<RootMove>,
    pub root_depth: i32,
    pub completed_depth: i32,
    pub sel_depth: i32,
    pub nmp_min_ply: i32,
    pub root_delta: i32,
    pub pv_idx: usize,
    pub pv_last: usize,
    pub optimism: [i32; Color::NUM],
    pub nodes: u64,
    pub best_move_changes: Arc<AtomicU64>,

    pub main_history: MainHistory,
    pub low_ply_history: LowPlyHistory,
    pub capture_history: CaptureHistory,
    pub pawn_history: PawnHistory,
    pub continuation_history: ContinuationHistory,
    pub pawn_correction_history: CorrectionHistory,
    pub major_correction_history: CorrectionHistory,
    pub minor_correction_history: CorrectionHistory,
    pub non_pawn_correction_history: [CorrectionHistory; Color::NUM],
    pub continuation_correction_history: ContinuationCorrectionHistory,

    reductions: Box<[i32; REDUCTION_SIZE]>,
}

const REDUCTION_SIZE: usize = if MAX_PLY > MAX_MOVES { MAX_PLY + 1 } else { MAX_MOVES + 1 };

impl ThreadData {
    pub fn new(id: usize, shared: Arc<SharedContext>) -> Self {
        let mut td = Self {
            id,
            shared,
            board: Board::starting_position(),
            stack: Stack::default(),
            pv: PvTable::default(),
            ply: 0,
            root_moves: Vec::new(),
            root_depth: 0,
            completed_depth: 0,
            sel_depth: 0,
            nmp_min_ply: 0,
            root_delta: 1,
            pv_idx: 0,
            pv_last: 0,
            optimism: [0; Color::NUM],
            nodes: 0,
            best_move_changes: Arc::new(AtomicU64::new(0)),
            main_history: MainHistory::default(),
            low_ply_history: LowPlyHistory::default(),
            capture_history: CaptureHistory::default(),
            pawn_history: PawnHistory::default(),
            continuation_history: ContinuationHistory::default(),
            pawn_correction_history: CorrectionHistory::default(),
            major_correction_history: CorrectionHistory::default(),
            minor_correction_history: CorrectionHistory::default(),
            non_pawn_correction_history: [CorrectionHistory::default(), CorrectionHistory::default()],
            continuation_correction_history: ContinuationCorrectionHistory::default(),
            reductions: Box::new([0; REDUCTION_SIZE]),
        };
        td.clear();
        td
    }

    /// Resets the histories to their tuned baselines; used by `ucinewgame`.
    pub fn clear(&mut self) {
        self.main_history.fill(61);
        self.low_ply_history.fill(106);
        self.capture_history.fill(-598);
        self.pawn_history.fill(-1181);
        self.continuation_history.fill(-427);
        self.pawn_correction_history.fill(0);
        self.major_correction_history.fill(0);
        self.minor_correction_history.fill(0);
        self.non_pawn_correction_history[Color::White].fill(0);
        self.non_pawn_correction_history[Color::Black].fill(0);
        self.continuation_correction_history.fill(0);

        for i in 1..REDUCTION_SIZE {
            self.reductions[i] = (14.60 * (i as f64).ln()) as i32;
        }
    }

    pub fn is_main(&self) -> bool {
        self.id == 0
    }

    pub fn stopped(&self) -> bool {
        self.shared.stop.load(Ordering::Relaxed)
    }

    /// Base late-move reduction in 1024ths of a ply.
    pub fn reduction(&self, improving: bool, depth: i32, move_count: i32, delta: i32) -> i32 {
        let scale = self.reductions[depth as usize] * self.reductions[move_count as usize];
        scale - delta * 1181 / self.root_delta + !improving as i32 * scale / 3 + 2199
    }

    /// Continuation history of the move `offset` plies back, applied to the
    /// piece-to pair of `mv`.
    pub fn conthist(&self, offset: isize, mv: Move) -> i32 {
        let entry = &self.stack[self.ply as isize - offset];
        if !entry.current_move.is_ok() {
            return 0;
        }
        ContinuationHistory::get(entry.conthist, self.board.moved_piece(mv), mv.to())
    }
}

/// Aggregated statistics and time control, owned by the main worker only.
pub struct SearchManager {
    pub tm: TimeManager,
    pub calls_cnt: i32,
    pub best_previous_score: i32,
    pub best_previous_average_score: i32,
    pub iter_value: [i32; 4],
    pub previous_time_reduction: f64,
    pub original_time_adjust: f64,
}

impl Default for SearchManager {
    fn default() -> Self {
        Self {
            tm: TimeManager::default(),
            calls_cnt: 0,
            best_previous_score: Score::INFINITE,
            best_previous_average_score: Score::INFINITE,
            iter_value: [0; 4],
            previous_time_reduction: 1.0,
            original_time_adjust: -1.0,
        }
    }
}

impl SearchManager {
    /// Periodic stop check, run by the main worker every `calls_cnt` nodes.
    pub fn check_time(&mut self, shared: &SharedContext, limits: &Limits, completed_depth: i32) {
        self.calls_cnt -= 1;
        if self.calls_cnt > 0 {
            return;
        }

        self.calls_cnt = if limits.nodes != 0 {
            512.min((limits.nodes / 1024) as i32).max(1)
        } else {
            512
        };

        // Never interrupt pondering; the GUI owns that clock.
        if shared.ponder.load(Ordering::Relaxed) {
            return;
        }

        let elapsed = self.tm.elapsed(|| shared.nodes.load(Ordering::Relaxed));
        let out_of_time = limits.use_time_management()
            && (elapsed > self.tm.maximum()
                || self.stop_on_ponderhit(shared));

        if completed_depth >= 1
            && (out_of_time
                || (limits.movetime != 0 && elapsed >= limits.movetime)
                || (limits.nodes != 0
                    && shared.nodes.load(Ordering::Relaxed) >= limits.nodes))
        {
            shared.stop.store(true, Ordering::Relaxed);
            shared.aborted_search.store(true, Ordering::Relaxed);
        }
    }

    fn stop_on_ponderhit(&self, shared: &SharedContext) -> bool {
        shared.stop_on_ponderhit.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self, shared: &SharedContext) -> TimePoint {
        self.tm.elapsed(|| shared.nodes.load(Ordering::Relaxed))
    }
}

/// Owns the worker states and runs a search across them on scoped threads.
pub struct ThreadPool {
    pub vector: Vec<ThreadData>,
    pub manager: SearchManager,
    pub shared: Arc<SharedContext>,
}

impl ThreadPool {
    pub fn new(shared: Arc<SharedContext>) -> Self {
        Self {
            vector: vec![ThreadData::new(0, shared.clone())],
            manager: SearchManager::default(),
            shared,
        }
    }

    pub fn set_count(&mut self, threads: usize) {
        let shared = self.shared.clone();
        self.vector.clear();
        self.vector.extend((0..threads.max(1)).map(|id| ThreadData::new(id, shared.clone())));
    }

    pub fn clear(&mut self) {
        for td in &mut self.vector {
            td.clear();
        }
        self.manager = SearchManager::default();
        self.manager.tm.clear();
        self.shared.tt.clear(self.vector.len());
    }

    pub fn nodes_searched(&self) -> u64 {
        self.shared.nodes.load(Ordering::Relaxed)
    }

    /// Runs one `go`: starts every worker, enforces the ponder/infinite
    /// output contract, picks the best thread, and reports `bestmove`.
    pub fn run(
        &mut self, board: &Board, mut limits: Limits, options: &Options,
        callbacks: &dyn SearchCallbacks,
    ) {
        let shared = self.shared.clone();

        shared.tt.new_search();
        shared.stop.store(false, Ordering::Relaxed);
        shared.aborted_search.store(false, Ordering::Relaxed);
        shared.increase_depth.store(true, Ordering::Relaxed);
        shared.ponder.store(limits.ponder_mode, Ordering::Relaxed);
        shared.stop_on_ponderhit.store(false, Ordering::Relaxed);
        shared.nodes.store(0, Ordering::Relaxed);

        let root_moves = build_root_moves(board, &limits.searchmoves);

        if root_moves.is_empty() {
            callbacks.on_update_no_moves();
            while !shared.stop.load(Ordering::Relaxed)
                && (shared.ponder.load(Ordering::Relaxed) || limits.infinite)
            {
                std::hint::spin_loop();
            }
            callbacks.on_bestmove(Move::NONE, Move::NONE);
            return;
        }

        self.manager.tm.init(
            &mut limits,
            board.side_to_move(),
            board.game_ply(),
            options,
            &mut self.manager.original_time_adjust,
        );
        self.manager.calls_cnt = 1;

        for td in &mut self.vector {
            td.board = board.clone();
            td.root_moves = root_moves.clone();
            td.nodes = 0;
            td.ply = 0;
            td.root_depth = 0;
            td.completed_depth = 0;
            td.sel_depth = 0;
            td.nmp_min_ply = 0;
            td.pv_idx = 0;
            td.pv_last = root_moves.len();
            td.best_move_changes.store(0, Ordering::Relaxed);
        }

        let change_counters: Vec<Arc<AtomicU64>> =
            self.vector.iter().map(|td| td.best_move_changes.clone()).collect();
        let thread_count = self.vector.len();
        let manager = &mut self.manager;
        let limits_ref = &limits;

        std::thread::scope(|scope| {
            let (main, helpers) = self.vector.split_first_mut().expect("pool is never empty");

            for td in helpers.iter_mut() {
                let builder = std::thread::Builder::new()
                    .name(format!("zhuque-worker-{}", td.id))
                    .stack_size(32 * 1024 * 1024);
                builder
                    .spawn_scoped(scope, move || {
                        let mut worker = search::Worker {
                            td,
                            manager: None,
                            limits: limits_ref,
                            options,
                            callbacks,
                            thread_count,
                            change_counters: &[],
                        };
                        worker.iterative_deepening();
                    })
                    .expect("failed to spawn worker thread");
            }

            let mut worker = search::Worker {
                td: main,
                manager: Some(manager),
                limits: limits_ref,
                options,
                callbacks,
                thread_count,
                change_counters: &change_counters,
            };
            worker.iterative_deepening();

            // In infinite or ponder mode the best move may be ready long
            // before the GUI wants it; hold it until stop or ponderhit.
            while !shared.stop.load(Ordering::Relaxed)
                && (shared.ponder.load(Ordering::Relaxed) || limits_ref.infinite)
            {
                std::hint::spin_loop();
            }
            shared.stop.store(true, Ordering::Relaxed);
        });

        if limits.npmsec != 0 {
            let us = board.side_to_move();
            self.manager
                .tm
                .advance_nodes_time(self.nodes_searched() as i64 - limits.inc[us]);
        }

        let multi_pv = (options.multi_pv as usize).min(root_moves.len());
        let mut best = 0;
        if multi_pv == 1
            && limits.depth == 0
            && self.vector[0].root_moves[0].pv[0].is_some()
        {
            best = self.get_best_thread();
        }

        self.manager.best_previous_score = self.vector[best].root_moves[0].score;
        self.manager.best_previous_average_score = self.vector[best].root_moves[0].average_score;

        // A different winner means its PV was never printed; do it now.
        if best != 0 {
            let td = &self.vector[best];
            search::report_pv(td, self.manager.elapsed(&shared), options, callbacks, td.completed_depth);
        }

        let best_rm = &self.vector[best].root_moves[0];
        let best_move = best_rm.pv[0];
        let ponder_move = match best_rm.pv.get(1) {
            Some(&mv) => mv,
            None => extract_ponder_from_tt(&shared.tt, &mut self.vector[best].board.clone(), best_move),
        };

        callbacks.on_bestmove(best_move, ponder_move);
    }

    /// Votes across workers for the most trustworthy result: depth-weighted
    /// score sums, with decisive scores short-circuiting the election.
    fn get_best_thread(&self) -> usize {
        let mut votes = std::collections::HashMap::<u16, i64>::new();
        let min_score = self
            .vector
            .iter()
            .map(|td| td.root_moves[0].score)
            .min()
            .unwrap_or(-Score::INFINITE);

        for td in &self.vector {
            let rm = &td.root_moves[0];
            *votes.entry(rm.mv.raw()).or_default() +=
                (rm.score - min_score + 14) as i64 * td.completed_depth as i64;
        }

        let mut best = 0;
        for index in 1..self.vector.len() {
            let best_rm = &self.vector[best].root_moves[0];
            let this_rm = &self.vector[index].root_moves[0];

            let better = if is_loss(best_rm.score) {
                // Losing positions prefer the longest resistance found.
                this_rm.score > best_rm.score
            } else if is_win(this_rm.score) {
                this_rm.score > best_rm.score
            } else {
                !is_loss(this_rm.score)
                    && votes[&this_rm.mv.raw()] > votes[&best_rm.mv.raw()]
            };

            if better {
                best = index;
            }
        }

        best
    }
}

fn build_root_moves(board: &Board, searchmoves: &[String]) -> Vec<RootMove> {
    let mut moves = Vec::new();
    for entry in board.generate_moves().iter() {
        if !board.legal(entry.mv) {
            continue;
        }
        if !searchmoves.is_empty() && !searchmoves.iter().any(|m| m == &entry.mv.to_string()) {
            continue;
        }
        moves.push(RootMove::new(entry.mv));
    }
    moves
}

/// Recovers a ponder move from the TT when the PV ended after one ply.
fn extract_ponder_from_tt(tt: &TranspositionTable, board: &mut Board, best_move: Move) -> Move {
    if !best_move.is_ok() {
        return Move::NONE;
    }

    board.do_move(best_move);
    let ponder = tt
        .read(board.key(), 0, board.rule60_count())
        .map_or(Move::NONE, |entry| entry.mv);
    let legal = ponder.is_ok() && board.is_pseudo_legal(ponder) && board.legal(ponder);
    board.undo_move(best_move);

    if legal {
        ponder
    } else {
        Move::NONE
    }
}
