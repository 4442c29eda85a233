use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::{
    board::{Board, RuleJudgement},
    engine::Options,
    evaluate::evaluate,
    history::{ContinuationCorrectionHistory, ContinuationHistory, CORRECTION_HISTORY_LIMIT},
    movepick::MovePicker,
    thread::{sort_root_moves, SearchManager, ThreadData},
    timeman::{Limits, TimePoint},
    transposition::{Bound, DEPTH_QS, DEPTH_UNSEARCHED},
    types::{
        is_decisive, is_loss, is_valid, is_win, mate_in, mated_in, piece_value, ArrayVec, Color,
        Move, Piece, PieceType, Score, Square, MAX_PLY,
    },
};

/// One line of analysis ready for `info` output.
pub struct PvInfo<'a> {
    pub depth: i32,
    pub sel_depth: i32,
    pub multipv: usize,
    pub score: i32,
    pub lowerbound: bool,
    pub upperbound: bool,
    pub nodes: u64,
    pub nps: u64,
    pub hashfull: usize,
    pub tb_hits: u64,
    pub time_ms: TimePoint,
    pub pv: &'a [Move],
    pub board: &'a Board,
}

/// Sinks for everything the search wants to tell the outside world. The
/// protocol driver implements them over stdout; tests collect them.
pub trait SearchCallbacks: Sync {
    fn on_update_full(&self, info: &PvInfo);
    fn on_iter(&self, depth: i32, currmove: Move, currmovenumber: usize);
    fn on_update_no_moves(&self);
    fn on_bestmove(&self, best: Move, ponder: Move);
}

/// A worker running one search: its thread state plus borrowed search-wide
/// inputs. Only the main worker carries the manager.
pub struct Worker<'a> {
    pub td: &'a mut ThreadData,
    pub manager: Option<&'a mut SearchManager>,
    pub limits: &'a Limits,
    pub options: &'a Options,
    pub callbacks: &'a dyn SearchCallbacks,
    pub thread_count: usize,
    pub change_counters: &'a [Arc<AtomicU64>],
}

fn stat_bonus(depth: i32) -> i32 {
    (158 * depth - 87).min(2168)
}

fn stat_malus(depth: i32) -> i32 {
    (977 * depth - 282).min(1524)
}

/// A hair of noise on draw scores steers the search away from repetition
/// blindness.
fn value_draw(nodes: u64) -> i32 {
    Score::DRAW - 1 + (nodes & 2) as i32
}

fn futility_margin(depth: i32, no_tt_cut_node: bool, improving: bool, worsening: bool) -> i32 {
    let futility_mult = 140 - 33 * no_tt_cut_node as i32;
    let improving_deduction = improving as i32 * futility_mult * 2;
    let worsening_deduction = worsening as i32 * futility_mult / 3;

    futility_mult * depth - improving_deduction - worsening_deduction
}

const fn futility_move_count(improving: bool, depth: i32) -> i32 {
    (3 + depth * depth) / (2 - improving as i32)
}

const CONTHIST_BONUSES: [(isize, i32); 5] = [(1, 1024), (2, 571), (3, 339), (4, 500), (6, 592)];

impl Worker<'_> {
    fn is_main(&self) -> bool {
        self.manager.is_some()
    }

    fn count_node(&mut self) {
        self.td.nodes += 1;
        self.td.shared.nodes.fetch_add(1, Ordering::Relaxed);
    }

    fn evaluate(&self) -> i32 {
        evaluate(&self.td.board, self.td.optimism[self.td.board.side_to_move()])
    }

    /// Iterative deepening with aspiration windows, the time controller on
    /// the main worker, and last-trusted-PV bookkeeping for aborted stops.
    pub fn iterative_deepening(&mut self) {
        let us = self.td.board.side_to_move();

        let mut last_best_pv = vec![Move::NONE];
        let mut last_best_score = -Score::INFINITE;
        let mut last_best_move_depth = 0;

        let mut time_reduction = 1.0f64;
        let mut tot_best_move_changes = 0.0f64;
        let mut iter_idx = 0usize;
        let mut search_again_counter = 0;

        self.td.stack.reset();
        self.td.pv.clear(0);
        self.td.ply = 0;

        if let Some(manager) = &mut self.manager {
            let seed = if manager.best_previous_score == Score::INFINITE {
                Score::ZERO
            } else {
                manager.best_previous_score
            };
            manager.iter_value = [seed; 4];
        }

        let multi_pv = (self.options.multi_pv as usize).min(self.td.root_moves.len());
        self.td.low_ply_history.fill(106);

        let mut best_value = -Score::INFINITE;

        loop {
            self.td.root_depth += 1;
            if self.td.root_depth >= MAX_PLY as i32
                || self.td.stopped()
                || (self.limits.depth != 0
                    && self.is_main()
                    && self.td.root_depth > self.limits.depth)
            {
                break;
            }

            // Age out the PV variability metric.
            if self.is_main() {
                tot_best_move_changes /= 2.0;
            }

            for rm in &mut self.td.root_moves {
                rm.previous_score = rm.score;
            }

            let pv_first = 0;
            self.td.pv_last = self.td.root_moves.len();

            if !self.td.shared.increase_depth.load(Ordering::Relaxed) {
                search_again_counter += 1;
            }

            let mut pv_idx = 0;
            while pv_idx < multi_pv {
                self.td.pv_idx = pv_idx;
                self.td.sel_depth = 0;

                // Aspiration window centered on the running average score.
                let rm = &self.td.root_moves[pv_idx];
                let mut delta = 10 + (rm.mean_squared_score.abs() / 44420) as i32;
                let avg = rm.average_score;
                let mut alpha = (avg - delta).max(-Score::INFINITE);
                let mut beta = ((avg as i64 + delta as i64).min(Score::INFINITE as i64)) as i32;

                self.td.optimism[us] = 99 * avg / (avg.abs() + 92);
                self.td.optimism[!us] = -self.td.optimism[us];

                let mut failed_high_cnt = 0;
                loop {
                    let adjusted_depth = (self.td.root_depth
                        - failed_high_cnt
                        - 3 * (search_again_counter + 1) / 4)
                        .max(1);
                    self.td.root_delta = beta - alpha;
                    best_value = self.search::<true>(alpha, beta, adjusted_depth, false);

                    let pv_last = self.td.pv_last;
                    sort_root_moves(&mut self.td.root_moves[pv_idx..pv_last]);

                    if self.td.stopped() {
                        break;
                    }

                    // Keep the GUI in the loop on long re-searches.
                    if self.is_main()
                        && multi_pv == 1
                        && (best_value <= alpha || best_value >= beta)
                        && self.td.nodes > 10_000_000
                    {
                        self.report_current_pv(self.td.root_depth);
                    }

                    if best_value <= alpha {
                        beta = (alpha + beta) / 2;
                        alpha = (best_value - delta).max(-Score::INFINITE);

                        failed_high_cnt = 0;
                        if self.is_main() {
                            self.td.shared.stop_on_ponderhit.store(false, Ordering::Relaxed);
                        }
                    } else if best_value >= beta {
                        beta = ((best_value as i64 + delta as i64)
                            .min(Score::INFINITE as i64)) as i32;
                        failed_high_cnt += 1;
                    } else {
                        break;
                    }

                    delta += delta / 3;

                    debug_assert!(alpha >= -Score::INFINITE && beta <= Score::INFINITE);
                }

                sort_root_moves(&mut self.td.root_moves[pv_first..pv_idx + 1]);

                if self.is_main()
                    && (self.td.stopped()
                        || pv_idx + 1 == multi_pv
                        || self.td.nodes > 10_000_000)
                    // An aborted thread may carry a mated-in score it never
                    // proved; suppress it and fall back below.
                    && !(self.td.shared.aborted_search.load(Ordering::Relaxed)
                        && is_loss(self.td.root_moves[0].uci_score))
                {
                    self.report_current_pv(self.td.root_depth);
                }

                if self.td.stopped() {
                    break;
                }
                pv_idx += 1;
            }

            if !self.td.stopped() {
                self.td.completed_depth = self.td.root_depth;
            }

            // Revert to the last trusted line when an aborted search left an
            // unproven mated score on top.
            if self.td.shared.aborted_search.load(Ordering::Relaxed)
                && self.td.root_moves[0].score != -Score::INFINITE
                && is_loss(self.td.root_moves[0].score)
            {
                if let Some(index) =
                    self.td.root_moves.iter().position(|rm| rm.mv == last_best_pv[0])
                {
                    self.td.root_moves[..=index].rotate_right(1);
                }
                self.td.root_moves[0].pv = last_best_pv.clone();
                self.td.root_moves[0].score = last_best_score;
                self.td.root_moves[0].uci_score = last_best_score;
            } else if self.td.root_moves[0].pv[0] != last_best_pv[0] {
                last_best_pv = self.td.root_moves[0].pv.clone();
                last_best_score = self.td.root_moves[0].score;
                last_best_move_depth = self.td.root_depth;
            }

            if !self.is_main() {
                continue;
            }

            // Have we found a "mate in x"?
            let rm = &self.td.root_moves[0];
            if self.limits.mate != 0
                && rm.score == rm.uci_score
                && ((rm.score >= Score::MATE_IN_MAX
                    && Score::MATE - rm.score <= 2 * self.limits.mate)
                    || (rm.score != -Score::INFINITE
                        && rm.score <= Score::MATED_IN_MAX
                        && Score::MATE + rm.score <= 2 * self.limits.mate))
            {
                self.td.shared.stop.store(true, Ordering::Relaxed);
            }

            for counter in self.change_counters {
                tot_best_move_changes += counter.swap(0, Ordering::Relaxed) as f64;
            }

            // Do we have time for the next iteration? Can we stop now?
            let shared = self.td.shared.clone();
            if self.limits.use_time_management()
                && !self.td.stopped()
                && !shared.stop_on_ponderhit.load(Ordering::Relaxed)
            {
                let manager = self.manager.as_mut().expect("main worker owns the manager");

                let nodes_effort =
                    self.td.root_moves[0].effort * 144 / self.td.nodes.max(1);

                let falling_eval = ((86
                    + 14 * (manager.best_previous_average_score - best_value)
                    + 4 * (manager.iter_value[iter_idx] - best_value))
                    as f64
                    / 566.87)
                    .clamp(0.62, 1.76);

                // A best move stable over many iterations earns a shorter
                // think.
                time_reduction =
                    if last_best_move_depth + 12 < self.td.completed_depth { 1.59 } else { 0.63 };
                let reduction =
                    (1.91 + manager.previous_time_reduction) / (3.17 * time_reduction);
                let instability = 0.87 + 1.62 * tot_best_move_changes / self.thread_count as f64;

                let total_time =
                    manager.tm.optimum() as f64 * falling_eval * reduction * instability;
                let elapsed = manager.tm.elapsed(|| shared.nodes.load(Ordering::Relaxed));

                if self.td.completed_depth >= 9
                    && nodes_effort >= 111
                    && elapsed as f64 > total_time * 0.73
                    && !shared.ponder.load(Ordering::Relaxed)
                {
                    shared.stop.store(true, Ordering::Relaxed);
                }

                if elapsed as f64 > total_time {
                    // Keep pondering until the GUI sends ponderhit or stop.
                    if shared.ponder.load(Ordering::Relaxed) {
                        shared.stop_on_ponderhit.store(true, Ordering::Relaxed);
                    } else {
                        shared.stop.store(true, Ordering::Relaxed);
                    }
                } else {
                    shared.increase_depth.store(
                        shared.ponder.load(Ordering::Relaxed)
                            || elapsed as f64 <= total_time * 0.279,
                        Ordering::Relaxed,
                    );
                }
            }

            if let Some(manager) = &mut self.manager {
                manager.iter_value[iter_idx] = best_value;
            }
            iter_idx = (iter_idx + 1) & 3;
        }

        if let Some(manager) = &mut self.manager {
            manager.previous_time_reduction = time_reduction;
        }
    }

    fn report_current_pv(&mut self, depth: i32) {
        let elapsed = self
            .manager
            .as_ref()
            .map_or(1, |manager| manager.tm.elapsed_time() + 1);
        report_pv(self.td, elapsed, self.options, self.callbacks, depth);
    }

    fn check_time(&mut self) {
        let td = &self.td;
        if let Some(manager) = &mut self.manager {
            manager.check_time(&td.shared, self.limits, td.completed_depth);
        }
    }

    /// The full-width alpha-beta search; `PV` selects the node kind, ply 0
    /// in a PV search is the root.
    fn search<const PV: bool>(
        &mut self, mut alpha: i32, mut beta: i32, mut depth: i32, cut_node: bool,
    ) -> i32 {
        // Dive into quiescence when the depth runs out.
        if depth <= 0 {
            return self.qsearch::<PV>(alpha, beta);
        }

        // Limit the depth in case extensions ran away.
        depth = depth.min(MAX_PLY as i32 - 1);

        debug_assert!(-Score::INFINITE <= alpha && alpha < beta && beta <= Score::INFINITE);
        debug_assert!(PV || alpha == beta - 1);
        debug_assert!(!(PV && cut_node));

        let ply = self.td.ply as isize;
        let root_node = PV && ply == 0;
        let all_node = !(PV || cut_node);
        let us = self.td.board.side_to_move();
        let in_check = self.td.board.checkers();
        let prior_capture = self.td.board.captured_piece();
        let excluded_move = self.td.stack[ply].excluded;
        let pawn_key = self.td.board.pawn_key();

        // Step 1. Initialize the node.
        self.td.stack[ply].in_check = in_check;
        self.td.stack[ply].move_count = 0;
        let mut best_value = -Score::INFINITE;

        if PV {
            self.td.pv.clear(ply as usize);
            if self.td.sel_depth < ply as i32 + 1 {
                self.td.sel_depth = ply as i32 + 1;
            }
        }

        if self.is_main() {
            self.check_time();
        }

        if !root_node {
            // Step 2. Rule arbitration (repetitions, rule60) and aborts.
            match self.td.board.rule_judge(ply as usize) {
                RuleJudgement::Final(v) => {
                    return if v == Score::DRAW { value_draw(self.td.nodes) } else { v };
                }
                RuleJudgement::Provisional(v) => {
                    debug_assert!(v != Score::DRAW);
                    // A provisionally winning cycle still guarantees at
                    // least a draw for us along this line, and vice versa.
                    if v > Score::DRAW {
                        alpha = alpha.max(Score::DRAW - 1);
                    } else {
                        beta = beta.min(Score::DRAW + 1);
                    }
                }
                RuleJudgement::None => {}
            }

            if self.td.stopped() || ply >= MAX_PLY as isize {
                return if ply >= MAX_PLY as isize && !in_check {
                    self.evaluate()
                } else {
                    value_draw(self.td.nodes)
                };
            }

            // Step 3. Mate distance pruning.
            alpha = alpha.max(mated_in(ply as usize));
            beta = beta.min(mate_in(ply as usize + 1));
            if alpha >= beta {
                return alpha;
            }
        }

        debug_assert!(ply >= 0 && ply < MAX_PLY as isize);

        let mut best_move = Move::NONE;
        self.td.stack[ply + 2].cutoff_count = 0;
        let prev_move = self.td.stack[ply - 1].current_move;
        let prev_sq = if prev_move.is_ok() { prev_move.to() } else { Square::NONE };
        self.td.stack[ply].stat_score = 0;

        // Step 4. Transposition table lookup.
        let key = self.td.board.key();
        let entry = self.td.shared.tt.read(key, ply as usize, self.td.board.rule60_count());
        self.td.stack[ply].tt_hit = entry.is_some();

        let tt_move = if root_node {
            self.td.root_moves[self.td.pv_idx].pv[0]
        } else {
            entry.map_or(Move::NONE, |e| e.mv)
        };
        let tt_value = entry.map_or(Score::NONE, |e| e.score);
        let tt_depth = entry.map_or(DEPTH_UNSEARCHED, |e| e.depth);
        let tt_bound = entry.map_or(Bound::None, |e| e.bound);

        let mut tt_pv = if excluded_move.is_some() {
            self.td.stack[ply].tt_pv
        } else {
            PV || entry.is_some_and(|e| e.pv)
        };
        self.td.stack[ply].tt_pv = tt_pv;
        let tt_capture = tt_move.is_ok() && self.td.board.capture(tt_move);

        // At non-PV nodes we check for an early TT cutoff.
        if !PV
            && !excluded_move.is_some()
            && tt_depth > depth - (tt_value <= beta) as i32
            && is_valid(tt_value)
            && tt_bound.supports(tt_value >= beta)
            && (cut_node == (tt_value >= beta) || depth > 9)
        {
            // A quiet TT move that fails high gets its ordering refreshed
            // even though we never search it here.
            if tt_move.is_some() && tt_value >= beta {
                if !tt_capture {
                    self.update_quiet_histories(tt_move, stat_bonus(depth) * 747 / 1024);
                }

                if prev_sq != Square::NONE
                    && self.td.stack[ply - 1].move_count <= 2
                    && !prior_capture.is_some()
                {
                    let piece = self.td.board.piece_on(prev_sq);
                    self.update_continuation_histories(
                        ply - 1,
                        piece,
                        prev_sq,
                        -stat_malus(depth + 1) * 1091 / 1024,
                    );
                }
            }

            // Graph-history interaction: high rule60 counts make stored
            // results unsound, so no cutoff there.
            if self.td.board.rule60_count() < 110 {
                return tt_value;
            }
        }

        // Step 5. Static evaluation.
        let correction_value = self.correction_value();
        let mut unadjusted_eval = Score::NONE;
        let mut improving = false;

        if in_check {
            // Skip early pruning while in check; carry the grandparent eval
            // so `improving` chains stay defined.
            let carried = self.td.stack[ply - 2].static_eval;
            self.td.stack[ply].static_eval = carried;
        } else {
            let mut eval;

            if excluded_move.is_some() {
                unadjusted_eval = self.td.stack[ply].static_eval;
                eval = unadjusted_eval;
            } else if let Some(e) = entry {
                // Never assume anything about values stored in the TT.
                unadjusted_eval = if is_valid(e.eval) { e.eval } else { self.evaluate() };
                eval = corrected_eval(unadjusted_eval, correction_value);
                self.td.stack[ply].static_eval = eval;

                // The TT value can be a tighter position estimate.
                if is_valid(tt_value) && tt_bound.supports(tt_value > eval) {
                    eval = tt_value;
                }
            } else {
                unadjusted_eval = self.evaluate();
                eval = corrected_eval(unadjusted_eval, correction_value);
                self.td.stack[ply].static_eval = eval;

                self.td.shared.tt.write(
                    key,
                    DEPTH_UNSEARCHED,
                    Score::NONE,
                    unadjusted_eval,
                    Bound::None,
                    Move::NONE,
                    ply as usize,
                    tt_pv,
                );
            }

            // Use the eval swing of the previous quiet move to improve its
            // ordering.
            if prev_move.is_ok() && !self.td.stack[ply - 1].in_check && !prior_capture.is_some() {
                let bonus = (-17
                    * (self.td.stack[ply - 1].static_eval + self.td.stack[ply].static_eval))
                    .clamp(-1024, 2058)
                    + 332;
                self.td.main_history.update(!us, prev_move, bonus * 1340 / 1024);

                let prev_piece = self.td.board.piece_on(prev_sq);
                if prev_piece.piece_type() != PieceType::Pawn {
                    self.td.pawn_history.update(pawn_key, prev_piece, prev_sq, bonus * 1159 / 1024);
                }
            }

            improving = self.td.stack[ply].static_eval > self.td.stack[ply - 2].static_eval;
            let opponent_worsening =
                self.td.stack[ply].static_eval + self.td.stack[ply - 1].static_eval > 2;

            // Step 6. Razoring: hopeless evals verify with quiescence.
            if eval < alpha - 1373 - 252 * depth * depth {
                let value = self.qsearch::<false>(alpha - 1, alpha);
                if value < alpha && !is_decisive(value) {
                    return value;
                }
            }

            // Step 7. Futility pruning: the margin is depth-scaled and the
            // depth condition matters for mate finding.
            if !tt_pv
                && depth < 16
                && eval
                    - futility_margin(
                        depth,
                        cut_node && !self.td.stack[ply].tt_hit,
                        improving,
                        opponent_worsening,
                    )
                    - self.td.stack[ply - 1].stat_score / 159
                    + (self.td.stack[ply].static_eval == eval) as i32
                        * (40 - correction_value.abs() / 131072)
                    >= beta
                && eval >= beta
                && (!tt_move.is_some() || tt_capture)
                && !is_loss(beta)
                && !is_win(eval)
            {
                return beta + (eval - beta) / 3;
            }

            improving = improving || self.td.stack[ply].static_eval >= beta + 113;

            // Step 8. Null move search with verification.
            if cut_node
                && prev_move != Move::NULL
                && eval >= beta
                && self.td.stack[ply].static_eval >= beta - 8 * depth + 189
                && !excluded_move.is_some()
                && self.td.board.major_material(us) > 0
                && ply as i32 >= self.td.nmp_min_ply
                && !is_loss(beta)
            {
                debug_assert!(eval >= beta);

                // Dynamic reduction based on depth and eval.
                let r = ((eval - beta) / 254).min(5) + depth / 3 + 5;

                self.td.stack[ply].current_move = Move::NULL;
                self.td.stack[ply].piece = Piece::None;
                self.td.stack[ply].conthist = self
                    .td
                    .continuation_history
                    .subtable_ptr(false, false, Piece::None, Square::new(0));
                self.td.stack[ply].contcorrhist = self
                    .td
                    .continuation_correction_history
                    .subtable_ptr(Piece::None, Square::new(0));

                self.td.ply += 1;
                self.td.board.do_null_move();
                let null_value = -self.search::<false>(-beta, -beta + 1, depth - r, false);
                self.td.board.undo_null_move();
                self.td.ply -= 1;

                if self.td.stopped() {
                    return Score::ZERO;
                }

                // Never return an unproven mate.
                if null_value >= beta && !is_win(null_value) {
                    if self.td.nmp_min_ply != 0 || depth < 15 {
                        return null_value;
                    }

                    // Recursive verification is not allowed.
                    debug_assert!(self.td.nmp_min_ply == 0);

                    // Verify at high depth with null moves disabled down to
                    // nmp_min_ply.
                    self.td.nmp_min_ply = ply as i32 + 3 * (depth - r) / 4;
                    let v = self.search::<false>(beta - 1, beta, depth - r, false);
                    self.td.nmp_min_ply = 0;

                    if v >= beta {
                        return null_value;
                    }
                }
            }

            // Step 9. Internal iterative reductions.
            if PV && !tt_move.is_some() {
                depth -= 2;
            }

            if depth <= 0 {
                return self.qsearch::<PV>(alpha, beta);
            }

            if cut_node && depth >= 7 && (!tt_move.is_some() || tt_bound == Bound::Upper) {
                depth -= 1 + !tt_move.is_some() as i32;
            }

            // Step 10. ProbCut: a good capture that beats beta by a margin
            // on a reduced search prunes the node.
            let probcut_beta = beta + 234 - 66 * improving as i32;
            if !PV
                && depth > 4
                && !is_decisive(beta)
                && !(tt_depth >= depth - 3 && is_valid(tt_value) && tt_value < probcut_beta)
            {
                debug_assert!(probcut_beta < Score::INFINITE && probcut_beta > beta);

                let static_eval = self.td.stack[ply].static_eval;
                let mut picker = MovePicker::new_noisy(self.td, probcut_beta - static_eval);

                while let Some((mv, _)) = picker.next(self.td) {
                    if mv == excluded_move || !self.td.board.legal(mv) {
                        continue;
                    }

                    debug_assert!(self.td.board.capture(mv));

                    let moved = self.td.board.moved_piece(mv);
                    let captured_pt = self.td.board.piece_on(mv.to()).piece_type();

                    self.td.shared.tt.prefetch(self.td.board.key_after(mv));

                    self.td.stack[ply].current_move = mv;
                    self.td.stack[ply].piece = moved;
                    self.td.stack[ply].conthist = self
                        .td
                        .continuation_history
                        .subtable_ptr(in_check, true, moved, mv.to());
                    self.td.stack[ply].contcorrhist =
                        self.td.continuation_correction_history.subtable_ptr(moved, mv.to());

                    self.count_node();
                    self.td.ply += 1;
                    self.td.board.do_move(mv);

                    // Preliminary qsearch to verify the move holds.
                    let mut value = -self.qsearch::<false>(-probcut_beta, -probcut_beta + 1);

                    // If it held, confirm with a regular reduced search.
                    if value >= probcut_beta && depth > 4 {
                        value = -self.search::<false>(
                            -probcut_beta,
                            -probcut_beta + 1,
                            depth - 4,
                            !cut_node,
                        );
                    }

                    self.td.board.undo_move(mv);
                    self.td.ply -= 1;

                    if self.td.stopped() {
                        return Score::ZERO;
                    }

                    if value >= probcut_beta {
                        self.td.capture_history.update(moved, mv.to(), captured_pt, 1226);
                        self.td.shared.tt.write(
                            key,
                            depth - 3,
                            value,
                            unadjusted_eval,
                            Bound::Lower,
                            mv,
                            ply as usize,
                            tt_pv,
                        );

                        return if is_decisive(value) {
                            value
                        } else {
                            value - (probcut_beta - beta)
                        };
                    }
                }
            }
        }

        // Step 11. A small ProbCut idea on the TT data alone.
        let probcut_beta = beta + 441;
        if tt_bound.supports(true)
            && tt_depth >= depth - 3
            && is_valid(tt_value)
            && tt_value >= probcut_beta
            && !is_decisive(beta)
            && !is_decisive(tt_value)
        {
            return probcut_beta;
        }

        let mut quiets_searched = ArrayVec::<Move, 32>::new();
        let mut captures_searched = ArrayVec::<Move, 32>::new();

        let mut move_count = 0;
        let mut picker = MovePicker::new(self.td, tt_move);

        // Step 12. Loop over the moves until none remain or one fails high.
        while let Some((mv, _)) = picker.next(self.td) {
            debug_assert!(mv.is_ok());

            if mv == excluded_move {
                continue;
            }

            if !self.td.board.legal(mv) {
                continue;
            }

            // At the root obey searchmoves and skip PV lines already
            // searched in MultiPV mode.
            if root_node
                && !self.td.root_moves[self.td.pv_idx..self.td.pv_last]
                    .iter()
                    .any(|rm| rm.mv == mv)
            {
                continue;
            }

            move_count += 1;
            self.td.stack[ply].move_count = move_count;

            if root_node && self.is_main() && self.td.nodes > 10_000_000 {
                self.callbacks.on_iter(depth, mv, move_count as usize + self.td.pv_idx);
            }

            let capture = self.td.board.capture(mv);
            let moved = self.td.board.moved_piece(mv);
            let gives_check = self.td.board.gives_check(mv);

            let mut new_depth = depth - 1;
            let delta = beta - alpha;
            let mut r = self.td.reduction(improving, depth, move_count, delta);

            // Step 13. Pruning at shallow depth. Depth conditions matter
            // for mate finding.
            if !root_node && self.td.board.major_material(us) > 0 && !is_loss(best_value) {
                // Move-count based pruning.
                if move_count >= futility_move_count(improving, depth) {
                    picker.skip_quiet_moves();
                }

                let mut lmr_depth = new_depth - r / 1054;

                if capture || gives_check {
                    let captured_pt = self.td.board.piece_on(mv.to()).piece_type();
                    let capt_hist = self.td.capture_history.get(moved, mv.to(), captured_pt);

                    // Futility pruning for captures.
                    if !gives_check && lmr_depth < 18 && !in_check {
                        let futility_value = self.td.stack[ply].static_eval
                            + 332
                            + 371 * lmr_depth
                            + piece_value(captured_pt)
                            + capt_hist / 5;
                        if futility_value <= alpha {
                            continue;
                        }
                    }

                    // SEE based pruning for captures and checks.
                    let see_hist = (capt_hist / 28).clamp(-243 * depth, 179 * depth);
                    if !self.td.board.see_ge(mv, -275 * depth - see_hist) {
                        continue;
                    }
                } else {
                    let mut history = self.td.conthist(1, mv)
                        + self.td.conthist(2, mv)
                        + self.td.pawn_history.get(pawn_key, moved, mv.to());

                    // Continuation history based pruning.
                    if history < -3190 * depth {
                        continue;
                    }

                    history += 2 * self.td.main_history.get(us, mv);
                    lmr_depth += history / 3718;

                    let futility_value = self.td.stack[ply].static_eval
                        + if best_value < self.td.stack[ply].static_eval - 45 { 215 } else { 96 }
                        + 120 * lmr_depth;

                    // Futility pruning at the parent node.
                    if !in_check && lmr_depth < 10 && futility_value <= alpha {
                        if best_value <= futility_value
                            && !is_decisive(best_value)
                            && !is_win(futility_value)
                        {
                            best_value = futility_value;
                        }
                        continue;
                    }

                    lmr_depth = lmr_depth.max(0);

                    // Prune moves with a bad enough static exchange.
                    if !self.td.board.see_ge(mv, -36 * lmr_depth * lmr_depth) {
                        continue;
                    }
                }
            }

            // Step 14. Extensions; restrained, or the search gets stuck.
            let mut extension = 0;
            if (ply as i32) < self.td.root_depth * 2 {
                // Singular extension: the TT move is tried against a search
                // that excludes it; failing low proves it singular.
                if !root_node
                    && mv == tt_move
                    && !excluded_move.is_some()
                    && depth >= 4 - (self.td.completed_depth > 32) as i32 + tt_pv as i32
                    && is_valid(tt_value)
                    && !is_decisive(tt_value)
                    && tt_bound.supports(true)
                    && tt_depth >= depth - 3
                {
                    let singular_beta =
                        tt_value - (41 + 73 * (tt_pv && !PV) as i32) * depth / 76;
                    let singular_depth = new_depth / 2;

                    self.td.stack[ply].excluded = mv;
                    let value = self.search::<false>(
                        singular_beta - 1,
                        singular_beta,
                        singular_depth,
                        cut_node,
                    );
                    self.td.stack[ply].excluded = Move::NONE;

                    if self.td.stopped() {
                        return Score::ZERO;
                    }

                    if value < singular_beta {
                        let double_margin = 246 * PV as i32 - 108 * !tt_capture as i32;
                        let triple_margin =
                            132 + 334 * PV as i32 - 279 * !tt_capture as i32 + 68 * tt_pv as i32;

                        extension = 1
                            + (value < singular_beta - double_margin) as i32
                            + (value < singular_beta - triple_margin) as i32;

                        depth += (!PV && depth < 20) as i32;
                    }
                    // Multi-cut: even without the TT move the node beats
                    // beta, so a softbound settles the whole subtree.
                    else if value >= beta && !is_decisive(value) {
                        return value;
                    }
                    // Negative extensions when the TT move is not singular.
                    else if tt_value >= beta {
                        extension = -3;
                    } else if cut_node {
                        extension = -2;
                    }
                }
                // Recapture extension on the previous target square.
                else if PV
                    && mv.to() == prev_sq
                    && self.td.capture_history.get(
                        moved,
                        mv.to(),
                        self.td.board.piece_on(mv.to()).piece_type(),
                    ) > 5255
                {
                    extension = 1;
                }
            }

            new_depth += extension;

            // Speculative TT prefetch as early as possible.
            self.td.shared.tt.prefetch(self.td.board.key_after(mv));

            let captured_pt = self.td.board.piece_on(mv.to()).piece_type();
            let stat_score = if capture {
                7 * piece_value(captured_pt)
                    + self.td.capture_history.get(moved, mv.to(), captured_pt)
                    - 5000
            } else {
                2 * self.td.main_history.get(us, mv)
                    + self.td.conthist(1, mv)
                    + self.td.conthist(2, mv)
                    - 4241
            };
            self.td.stack[ply].stat_score = stat_score;

            // This must happen after the singular search wrote to the same
            // stack slot.
            self.td.stack[ply].current_move = mv;
            self.td.stack[ply].piece = moved;
            self.td.stack[ply].conthist =
                self.td.continuation_history.subtable_ptr(in_check, capture, moved, mv.to());
            self.td.stack[ply].contcorrhist =
                self.td.continuation_correction_history.subtable_ptr(moved, mv.to());

            let node_count_before = if root_node { self.td.nodes } else { 0 };

            // Step 15. Make the move.
            self.count_node();
            self.td.ply += 1;
            self.td.board.do_move(mv);

            // Reduction adjustments with proven non-linear scaling first.
            if tt_pv {
                r -= 1024
                    + (tt_value > alpha) as i32 * 1024
                    + (tt_depth >= depth) as i32 * 1024;
            }

            if PV {
                r -= 1024;
            }

            r += 330;
            r -= correction_value.abs() / 32768;

            if cut_node {
                r += 3179 - (tt_depth >= depth && tt_pv) as i32 * 949;
            }

            if tt_capture && !capture {
                r += 1401 + (depth < 8) as i32 * 1471;
            }

            if self.td.stack[ply + 1].cutoff_count > 3 {
                r += 1332 + all_node as i32 * 959;
            } else if mv == tt_move {
                r -= 2775;
            }

            r -= stat_score * 2652 / 18912;

            let mut value = Score::ZERO;

            // Step 16. Late move reduction with a verified re-search.
            if depth >= 2 && move_count > 1 {
                let d = 1.max(
                    (new_depth - r / 1024)
                        .min(new_depth + !all_node as i32 + (PV && !best_move.is_some()) as i32),
                );

                value = -self.search::<false>(-(alpha + 1), -alpha, d, true);

                // The reduced search beat alpha: re-search at full depth,
                // deeper or shallower depending on how it did.
                if value > alpha && d < new_depth {
                    let do_deeper = (value > best_value + 58 + 2 * new_depth) as i32;
                    let do_shallower = (value < best_value + 8) as i32;

                    new_depth += do_deeper - do_shallower;

                    if new_depth > d {
                        value =
                            -self.search::<false>(-(alpha + 1), -alpha, new_depth, !cut_node);
                    }

                    let bonus = (value >= beta) as i32 * 2048;
                    self.update_continuation_histories(ply, moved, mv.to(), bonus);
                }
            }
            // Step 17. Full-depth zero window search when LMR is skipped.
            else if !PV || move_count > 1 {
                if !tt_move.is_some() {
                    r += 1744;
                }

                value = -self.search::<false>(
                    -(alpha + 1),
                    -alpha,
                    new_depth - (r > 4047) as i32,
                    !cut_node,
                );
            }

            // Full PV search for the first move and for fail highs.
            if PV && (move_count == 1 || value > alpha) {
                // Extend the TT move if we are about to dive into qsearch.
                if mv == tt_move && (ply as i32) <= self.td.root_depth * 2 {
                    new_depth = new_depth.max(1);
                }

                value = -self.search::<true>(-beta, -alpha, new_depth, false);
            }

            // Step 18. Undo the move.
            self.td.board.undo_move(mv);
            self.td.ply -= 1;

            // Step 19. A stopped search cannot trust this value; bail out
            // without touching the best move, PV, or TT.
            if self.td.stopped() {
                return Score::ZERO;
            }

            debug_assert!(value > -Score::INFINITE && value < Score::INFINITE);

            if root_node {
                let line: Vec<Move> = self.td.pv.line(1).to_vec();
                let sel_depth = self.td.sel_depth;
                let searched_nodes = self.td.nodes - node_count_before;
                let pv_idx = self.td.pv_idx;

                let rm = self
                    .td
                    .root_moves
                    .iter_mut()
                    .find(|rm| rm.mv == mv)
                    .expect("root move list contains every searched root move");

                rm.effort += searched_nodes;

                rm.average_score = if rm.average_score != -Score::INFINITE {
                    (2 * value + rm.average_score) / 3
                } else {
                    value
                };

                rm.mean_squared_score =
                    if rm.mean_squared_score != -(Score::INFINITE as i64) * Score::INFINITE as i64
                    {
                        (value as i64 * value.abs() as i64 + rm.mean_squared_score) / 2
                    } else {
                        value as i64 * value.abs() as i64
                    };

                if move_count == 1 || value > alpha {
                    rm.score = value;
                    rm.uci_score = value;
                    rm.sel_depth = sel_depth;
                    rm.score_lowerbound = false;
                    rm.score_upperbound = false;

                    if value >= beta {
                        rm.score_lowerbound = true;
                        rm.uci_score = beta;
                    } else if value <= alpha {
                        rm.score_upperbound = true;
                        rm.uci_score = alpha;
                    }

                    rm.pv = vec![mv];
                    rm.pv.extend_from_slice(&line);

                    // Best-move churn feeds the time controller's
                    // instability term; only the first PV line counts.
                    if move_count > 1 && pv_idx == 0 {
                        self.td.best_move_changes.fetch_add(1, Ordering::Relaxed);
                    }
                } else {
                    // All other moves drop to the bottom; the stable sort
                    // keeps their relative order.
                    rm.score = -Score::INFINITE;
                }
            }

            // An equal-valued alternative may take over as best move every
            // so often, fighting arbitrary tie resolution.
            let inc = (value == best_value
                && ply as i32 + 2 >= self.td.root_depth
                && (self.td.nodes & 15) == 0
                && !is_win(value.abs() + 1)) as i32;

            if value + inc > best_value {
                best_value = value;

                if value + inc > alpha {
                    best_move = mv;

                    if PV && !root_node {
                        self.td.pv.update(ply as usize, mv);
                    }

                    if value >= beta {
                        self.td.stack[ply].cutoff_count +=
                            !tt_move.is_some() as i32 + (extension < 2) as i32;
                        break;
                    }

                    // Shrink the remaining depth a little once something
                    // improved.
                    if depth > 2 && depth < 10 && !is_decisive(value) {
                        depth -= 2;
                    }

                    debug_assert!(depth > 0);
                    alpha = value;
                }
            }

            if mv != best_move && move_count <= 32 {
                if capture {
                    captures_searched.push(mv);
                } else {
                    quiets_searched.push(mv);
                }
            }
        }

        // Step 20. Mate detection and terminal bookkeeping.
        debug_assert!(
            move_count != 0 || !in_check || excluded_move.is_some()
                || !self.td.board.has_legal_moves()
        );

        // Soften fail highs at non-PV nodes toward beta.
        if !PV
            && best_value >= beta
            && !is_decisive(best_value)
            && !is_decisive(beta)
            && !is_decisive(alpha)
        {
            best_value = (best_value * depth + beta) / (depth + 1);
        }

        if move_count == 0 {
            best_value = if excluded_move.is_some() { alpha } else { mated_in(ply as usize) };
        } else if best_move.is_some() {
            self.update_all_stats(ply, best_move, prev_sq, &quiets_searched, &captures_searched, depth);
        } else if !prior_capture.is_some() && prev_sq != Square::NONE {
            // The fail low vindicates the opponent's previous quiet move.
            let mut bonus_scale = 184 * (depth > 6) as i32
                + 80 * !all_node as i32
                + 152 * (self.td.stack[ply - 1].move_count > 11) as i32
                + 77 * (!in_check && best_value <= self.td.stack[ply].static_eval - 157) as i32
                + 169 * (!self.td.stack[ply - 1].in_check
                    && best_value <= -self.td.stack[ply - 1].static_eval - 99)
                    as i32;

            // Proportional to how much damage there is to undo.
            bonus_scale += (-self.td.stack[ply - 1].stat_score / 79).min(234);
            bonus_scale = bonus_scale.max(0);

            let scaled_bonus = stat_bonus(depth) * bonus_scale / 32;

            let prev_piece = self.td.board.piece_on(prev_sq);
            self.update_continuation_histories(
                ply - 1,
                prev_piece,
                prev_sq,
                scaled_bonus * 416 / 1024,
            );

            self.td.main_history.update(!us, prev_move, scaled_bonus * 212 / 1024);

            if prev_piece.piece_type() != PieceType::Pawn {
                self.td.pawn_history.update(
                    pawn_key,
                    prev_piece,
                    prev_sq,
                    scaled_bonus * 1073 / 1024,
                );
            }
        } else if prior_capture.is_some() && prev_sq != Square::NONE {
            let prev_piece = self.td.board.piece_on(prev_sq);
            self.td.capture_history.update(
                prev_piece,
                prev_sq,
                prior_capture.piece_type(),
                stat_bonus(depth) * 2,
            );
        } else if tt_move.is_some() && !all_node {
            // Fail low with a TT move still says something about it.
            self.td.main_history.update(us, tt_move, stat_bonus(depth) * 287 / 1024);
        }

        // A fail low under a ttPv parent marks this position as worth a
        // second look from the opponent's perspective.
        if best_value <= alpha {
            tt_pv = tt_pv || (self.td.stack[ply - 1].tt_pv && depth > 3);
            self.td.stack[ply].tt_pv = tt_pv;
        }

        // The unadjusted static eval goes into the TT, not the corrected
        // one.
        if !excluded_move.is_some() && !(root_node && self.td.pv_idx > 0) {
            let bound = if best_value >= beta {
                Bound::Lower
            } else if PV && best_move.is_some() {
                Bound::Exact
            } else {
                Bound::Upper
            };
            self.td.shared.tt.write(
                key,
                depth,
                best_value,
                unadjusted_eval,
                bound,
                best_move,
                ply as usize,
                tt_pv,
            );
        }

        // Adjust the correction histories when the search result disagrees
        // with the static eval in a direction the bound can vouch for.
        if !in_check
            && !(best_move.is_some() && self.td.board.capture(best_move))
            && ((best_value < self.td.stack[ply].static_eval && best_value < beta)
                || (best_value > self.td.stack[ply].static_eval && best_move.is_some()))
        {
            let non_pawn_weight = 139;
            let bonus = ((best_value - self.td.stack[ply].static_eval) * depth / 8)
                .clamp(-CORRECTION_HISTORY_LIMIT / 4, CORRECTION_HISTORY_LIMIT / 4);

            let board = &self.td.board;
            self.td.pawn_correction_history.update(us, board.pawn_key(), bonus * 148 / 128);
            self.td.major_correction_history.update(us, board.major_key(), bonus * 185 / 128);
            self.td.minor_correction_history.update(us, board.minor_key(), bonus * 101 / 128);
            self.td.non_pawn_correction_history[Color::White].update(
                us,
                board.non_pawn_key(Color::White),
                bonus * non_pawn_weight / 128,
            );
            self.td.non_pawn_correction_history[Color::Black].update(
                us,
                board.non_pawn_key(Color::Black),
                bonus * non_pawn_weight / 128,
            );

            if prev_move.is_ok() {
                let piece = self.td.board.piece_on(prev_move.to());
                ContinuationCorrectionHistory::update(
                    self.td.stack[ply - 2].contcorrhist,
                    piece,
                    prev_move.to(),
                    bonus,
                );
            }
        }

        debug_assert!(best_value > -Score::INFINITE && best_value < Score::INFINITE);

        best_value
    }

    /// Quiescence search: resolves captures (and evasions while in check)
    /// before standing on the static eval.
    ///
    /// See <https://www.chessprogramming.org/Quiescence_Search>.
    fn qsearch<const PV: bool>(&mut self, mut alpha: i32, mut beta: i32) -> i32 {
        debug_assert!(-Score::INFINITE <= alpha && alpha < beta && beta <= Score::INFINITE);
        debug_assert!(PV || alpha == beta - 1);

        let ply = self.td.ply as isize;
        let us = self.td.board.side_to_move();
        let in_check = self.td.board.checkers();
        let pawn_key = self.td.board.pawn_key();

        // Step 1. Initialize the node.
        if PV {
            self.td.pv.clear(ply as usize);
            if self.td.sel_depth < ply as i32 + 1 {
                self.td.sel_depth = ply as i32 + 1;
            }
        }

        self.td.stack[ply].in_check = in_check;
        let mut best_move = Move::NONE;

        // Step 2. Rule arbitration; two-fold cycles narrow straight to the
        // draw score here.
        match self.td.board.rule_judge(ply as usize) {
            RuleJudgement::Final(v) => return v,
            RuleJudgement::Provisional(v) => {
                debug_assert!(v != Score::DRAW);
                if v > Score::DRAW {
                    alpha = alpha.max(Score::DRAW);
                } else {
                    beta = beta.min(Score::DRAW);
                }
                if alpha >= beta {
                    return alpha;
                }
            }
            RuleJudgement::None => {}
        }

        if ply >= MAX_PLY as isize {
            return if !in_check { self.evaluate() } else { Score::DRAW };
        }

        debug_assert!(ply >= 0 && ply < MAX_PLY as isize);

        // Step 3. Transposition table lookup.
        let key = self.td.board.key();
        let entry = self.td.shared.tt.read(key, ply as usize, self.td.board.rule60_count());
        self.td.stack[ply].tt_hit = entry.is_some();
        let tt_value = entry.map_or(Score::NONE, |e| e.score);
        let tt_bound = entry.map_or(Bound::None, |e| e.bound);
        let pv_hit = entry.is_some_and(|e| e.pv);

        // At non-PV nodes a bound match settles the node outright.
        if !PV
            && entry.is_some_and(|e| e.depth >= DEPTH_QS)
            && is_valid(tt_value)
            && tt_bound.supports(tt_value >= beta)
        {
            return tt_value;
        }

        // Step 4. Static evaluation ("stand pat").
        let correction_value = self.correction_value();
        let mut unadjusted_eval = Score::NONE;
        let mut best_value;
        let futility_base;

        if in_check {
            best_value = -Score::INFINITE;
            futility_base = -Score::INFINITE;
        } else {
            if let Some(e) = entry {
                // Never assume anything about values stored in the TT.
                unadjusted_eval = if is_valid(e.eval) { e.eval } else { self.evaluate() };
                best_value = corrected_eval(unadjusted_eval, correction_value);
                self.td.stack[ply].static_eval = best_value;

                if is_valid(tt_value) && tt_bound.supports(tt_value > best_value) {
                    best_value = tt_value;
                }
            } else {
                // After a null move the sign-flipped parent eval is free.
                unadjusted_eval = if self.td.stack[ply - 1].current_move != Move::NULL {
                    self.evaluate()
                } else {
                    -self.td.stack[ply - 1].static_eval
                };
                best_value = corrected_eval(unadjusted_eval, correction_value);
                self.td.stack[ply].static_eval = best_value;
            }

            // Stand pat: return at once when the static value reaches beta.
            if best_value >= beta {
                if !is_decisive(best_value) {
                    best_value = (best_value + beta) / 2;
                }
                if !self.td.stack[ply].tt_hit {
                    self.td.shared.tt.write(
                        key,
                        DEPTH_UNSEARCHED,
                        best_value,
                        unadjusted_eval,
                        Bound::Lower,
                        Move::NONE,
                        ply as usize,
                        false,
                    );
                }
                return best_value;
            }

            if best_value > alpha {
                alpha = best_value;
            }

            futility_base = self.td.stack[ply].static_eval + 204;
        }

        let prev_move = self.td.stack[ply - 1].current_move;
        let prev_sq = if prev_move.is_ok() { prev_move.to() } else { Square::NONE };

        let mut move_count = 0;
        let mut picker = MovePicker::new_noisy(self.td, -110);

        // Step 5. Loop over the tactical moves.
        while let Some((mv, _)) = picker.next(self.td) {
            debug_assert!(mv.is_ok());

            if !self.td.board.legal(mv) {
                continue;
            }

            let gives_check = self.td.board.gives_check(mv);
            let capture = self.td.board.capture(mv);

            move_count += 1;

            // Step 6. Pruning.
            if !is_loss(best_value) && self.td.board.major_material(us) > 0 {
                // Futility and move-count pruning.
                if !gives_check && mv.to() != prev_sq && !is_loss(futility_base) {
                    if move_count > 2 {
                        continue;
                    }

                    let futility_value =
                        futility_base + piece_value(self.td.board.piece_on(mv.to()).piece_type());

                    // The capture plus margin still cannot reach alpha.
                    if futility_value <= alpha {
                        best_value = best_value.max(futility_value);
                        continue;
                    }

                    // Neither can a losing exchange.
                    if !self.td.board.see_ge(mv, alpha - futility_base) {
                        best_value = alpha.min(futility_base);
                        continue;
                    }
                }

                // Continuation history based pruning for quiet evasions.
                if !capture {
                    let moved = self.td.board.moved_piece(mv);
                    let cont = self.td.conthist(1, mv)
                        + self.td.conthist(2, mv)
                        + self.td.pawn_history.get(pawn_key, moved, mv.to());
                    if cont <= 3047 {
                        continue;
                    }
                }

                // Bad enough SEE values are not worth resolving.
                if !self.td.board.see_ge(mv, -102) {
                    continue;
                }
            }

            // Speculative TT prefetch.
            self.td.shared.tt.prefetch(self.td.board.key_after(mv));

            let moved = self.td.board.moved_piece(mv);
            self.td.stack[ply].current_move = mv;
            self.td.stack[ply].piece = moved;
            self.td.stack[ply].conthist =
                self.td.continuation_history.subtable_ptr(in_check, capture, moved, mv.to());
            self.td.stack[ply].contcorrhist =
                self.td.continuation_correction_history.subtable_ptr(moved, mv.to());

            // Step 7. Make and search the move.
            self.count_node();
            self.td.ply += 1;
            self.td.board.do_move(mv);
            let value = -self.qsearch::<PV>(-beta, -alpha);
            self.td.board.undo_move(mv);
            self.td.ply -= 1;

            if self.td.stopped() {
                return Score::ZERO;
            }

            debug_assert!(value > -Score::INFINITE && value < Score::INFINITE);

            // Step 8. Check for a new best move.
            if value > best_value {
                best_value = value;

                if value > alpha {
                    best_move = mv;

                    if PV {
                        self.td.pv.update(ply as usize, mv);
                    }

                    if value < beta {
                        alpha = value;
                    } else {
                        break;
                    }
                }
            }
        }

        // Step 9. No evasion from a check means mate.
        if in_check && best_value == -Score::INFINITE {
            return mated_in(ply as usize);
        }

        if !is_decisive(best_value) && best_value >= beta {
            best_value = (3 * best_value + beta) / 4;
        }

        let bound = if best_value >= beta { Bound::Lower } else { Bound::Upper };
        self.td.shared.tt.write(
            key,
            DEPTH_QS,
            best_value,
            unadjusted_eval,
            bound,
            best_move,
            ply as usize,
            pv_hit,
        );

        debug_assert!(best_value > -Score::INFINITE && best_value < Score::INFINITE);

        best_value
    }

    /// Weighted sum of every correction table for the current position.
    fn correction_value(&self) -> i32 {
        let td = &self.td;
        let board = &td.board;
        let us = board.side_to_move();
        let ply = td.ply as isize;

        let pcv = td.pawn_correction_history.get(us, board.pawn_key());
        let macv = td.major_correction_history.get(us, board.major_key());
        let micv = td.minor_correction_history.get(us, board.minor_key());
        let wnpcv =
            td.non_pawn_correction_history[Color::White].get(us, board.non_pawn_key(Color::White));
        let bnpcv =
            td.non_pawn_correction_history[Color::Black].get(us, board.non_pawn_key(Color::Black));

        let prev_move = td.stack[ply - 1].current_move;
        let cntcv = if prev_move.is_ok() {
            ContinuationCorrectionHistory::get(
                td.stack[ply - 2].contcorrhist,
                board.piece_on(prev_move.to()),
                prev_move.to(),
            )
        } else {
            0
        };

        4539 * pcv + 3697 * macv + 3347 * micv + 7373 * (wnpcv + bnpcv) + 8482 * cntcv
    }

    /// Updates the statistics of all searched moves once a best move was
    /// confirmed.
    fn update_all_stats(
        &mut self, ply: isize, best_move: Move, prev_sq: Square,
        quiets_searched: &ArrayVec<Move, 32>, captures_searched: &ArrayVec<Move, 32>, depth: i32,
    ) {
        let bonus = stat_bonus(depth);
        let malus = stat_malus(depth);

        if !self.td.board.capture(best_move) {
            self.update_quiet_histories(best_move, bonus * 1131 / 1024);

            for &mv in quiets_searched.iter() {
                self.update_quiet_histories(mv, -malus * 1028 / 1024);
            }
        } else {
            let moved = self.td.board.moved_piece(best_move);
            let captured = self.td.board.piece_on(best_move.to()).piece_type();
            self.td.capture_history.update(moved, best_move.to(), captured, bonus * 1291 / 1024);
        }

        // Extra penalty for an early quiet move of the previous ply that
        // just got refuted.
        if prev_sq != Square::NONE
            && self.td.stack[ply - 1].move_count
                == 1 + self.td.stack[ply - 1].tt_hit as i32
            && !self.td.board.captured_piece().is_some()
        {
            let piece = self.td.board.piece_on(prev_sq);
            self.update_continuation_histories(ply - 1, piece, prev_sq, -malus * 919 / 1024);
        }

        for &mv in captures_searched.iter() {
            let moved = self.td.board.moved_piece(mv);
            let captured = self.td.board.piece_on(mv.to()).piece_type();
            self.td.capture_history.update(moved, mv.to(), captured, -malus * 1090 / 1024);
        }
    }

    /// Updates every quiet-move ordering table at once.
    fn update_quiet_histories(&mut self, mv: Move, bonus: i32) {
        let us = self.td.board.side_to_move();
        let ply = self.td.ply;
        let moved = self.td.board.moved_piece(mv);
        let pawn_key = self.td.board.pawn_key();

        self.td.main_history.update(us, mv, bonus);
        self.td.low_ply_history.update(ply, mv, bonus * 874 / 1024);
        self.update_continuation_histories(ply as isize, moved, mv.to(), bonus * 853 / 1024);
        self.td.pawn_history.update(pawn_key, moved, mv.to(), bonus * 628 / 1024);
    }

    /// Updates the continuation histories of the move pairs formed with the
    /// moves 1, 2, 3, 4, and 6 plies back.
    fn update_continuation_histories(&mut self, ply: isize, piece: Piece, to: Square, bonus: i32) {
        let in_check = self.td.stack[ply].in_check;

        for (offset, weight) in CONTHIST_BONUSES {
            // In check only the immediate continuations stay meaningful.
            if in_check && offset > 2 {
                break;
            }
            let entry = &self.td.stack[ply - offset];
            if entry.current_move.is_ok() {
                ContinuationHistory::update(entry.conthist, piece, to, bonus * weight / 1024);
            }
        }
    }
}

/// Emits `info` lines for the worker's current PV set.
pub fn report_pv(
    td: &ThreadData, elapsed_ms: TimePoint, options: &Options, callbacks: &dyn SearchCallbacks,
    depth: i32,
) {
    let nodes = td.shared.nodes.load(Ordering::Relaxed);
    let time = elapsed_ms.max(1);
    let multi_pv = (options.multi_pv as usize).min(td.root_moves.len());
    let hashfull = td.shared.tt.hashfull(0);

    for i in 0..multi_pv {
        let rm = &td.root_moves[i];
        let updated = rm.score != -Score::INFINITE;

        if depth == 1 && !updated && i > 0 {
            continue;
        }

        let d = if updated { depth } else { (depth - 1).max(1) };
        let mut v = if updated { rm.uci_score } else { rm.previous_score };
        if v == -Score::INFINITE {
            v = Score::ZERO;
        }

        // Previous-iteration scores are exact, so bounds only apply to the
        // line being searched right now.
        let exact = i == td.pv_idx && updated;

        callbacks.on_update_full(&PvInfo {
            depth: d,
            sel_depth: rm.sel_depth,
            multipv: i + 1,
            score: v,
            lowerbound: exact && rm.score_lowerbound,
            upperbound: exact && rm.score_upperbound,
            nodes,
            nps: nodes * 1000 / time.max(1) as u64,
            hashfull,
            tb_hits: 0,
            time_ms: time,
            pv: &rm.pv,
            board: &td.board,
        });
    }
}

fn corrected_eval(value: i32, correction_value: i32) -> i32 {
    (value + correction_value / 131072)
        .clamp(Score::MATED_IN_MAX + 1, Score::MATE_IN_MAX - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::{SharedContext, ThreadPool};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        lines: Mutex<Vec<(i32, i32, Vec<Move>)>>,
        best: Mutex<Option<(Move, Move)>>,
        no_moves: Mutex<bool>,
    }

    impl SearchCallbacks for Recorder {
        fn on_update_full(&self, info: &PvInfo) {
            self.lines.lock().unwrap().push((info.depth, info.score, info.pv.to_vec()));
        }

        fn on_iter(&self, _depth: i32, _currmove: Move, _currmovenumber: usize) {}

        fn on_update_no_moves(&self) {
            *self.no_moves.lock().unwrap() = true;
        }

        fn on_bestmove(&self, best: Move, ponder: Move) {
            *self.best.lock().unwrap() = Some((best, ponder));
        }
    }

    fn run_search(fen: &str, limits: Limits, threads: usize) -> (ThreadPool, Recorder) {
        let shared = Arc::new(SharedContext::default());
        let mut pool = ThreadPool::new(shared);
        pool.set_count(threads);

        let board = Board::from_fen(fen).expect("test FEN is valid");
        let recorder = Recorder::default();
        pool.run(&board, limits, &Options::default(), &recorder);

        (pool, recorder)
    }

    #[test]
    fn depth_one_yields_a_legal_best_move() {
        let limits = Limits { depth: 1, ..Limits::default() };
        let (_, recorder) = run_search(crate::board::START_FEN, limits, 1);

        let (best, _) = recorder.best.lock().unwrap().expect("bestmove must be reported");
        let board = Board::starting_position();
        assert!(board.parse_move(&best.to_string()).is_some(), "{best} is not legal");

        // Depth 1 info precedes the best move.
        let lines = recorder.lines.lock().unwrap();
        assert!(lines.iter().any(|(depth, _, _)| *depth == 1));
    }

    #[test]
    fn finds_mate_in_one() {
        // Two red rooks ladder the bare king: h7h9 mates on the spot.
        let limits = Limits { mate: 1, ..Limits::default() };
        let (pool, recorder) = run_search("4k4/R8/7R1/9/9/9/9/9/9/3K5 w", limits, 1);

        let (best, _) = recorder.best.lock().unwrap().expect("bestmove must be reported");
        assert_eq!(best.to_string(), "h7h9");

        assert_eq!(pool.vector[0].root_moves[0].score, mate_in(1));
        assert!(pool.vector[0].completed_depth < 5);
    }

    #[test]
    fn mated_position_reports_no_moves() {
        let (_, recorder) = run_search("4k2R1/R8/9/9/9/9/9/9/9/3K5 b", Limits::default(), 1);

        assert!(*recorder.no_moves.lock().unwrap());
        let (best, ponder) = recorder.best.lock().unwrap().expect("bestmove is still due");
        assert_eq!(best, Move::NONE);
        assert_eq!(ponder, Move::NONE);
    }

    #[test]
    fn node_limit_stops_the_search() {
        let limits = Limits { nodes: 50_000, ..Limits::default() };
        let (pool, recorder) = run_search(crate::board::START_FEN, limits, 1);

        assert!(recorder.best.lock().unwrap().is_some());

        // The limit may be overshot only by the polling granularity.
        let nodes = pool.nodes_searched();
        assert!(nodes >= 50_000, "stopped early at {nodes} nodes");
        assert!(nodes < 60_000, "stopped late at {nodes} nodes");
    }

    #[test]
    fn searchmoves_restricts_the_root() {
        let limits = Limits {
            depth: 4,
            searchmoves: vec!["h2e2".to_string()],
            ..Limits::default()
        };
        let (pool, recorder) = run_search(crate::board::START_FEN, limits, 1);

        let (best, _) = recorder.best.lock().unwrap().expect("bestmove must be reported");
        assert_eq!(best.to_string(), "h2e2");
        assert_eq!(pool.vector[0].root_moves.len(), 1);
    }

    #[test]
    fn infinite_search_holds_bestmove_until_stop() {
        let shared = Arc::new(SharedContext::default());
        let mut pool = ThreadPool::new(shared.clone());
        let board = Board::starting_position();
        let recorder = Recorder::default();

        std::thread::scope(|scope| {
            let handle = scope.spawn(|| {
                let limits = Limits { infinite: true, ..Limits::default() };
                pool.run(&board, limits, &Options::default(), &recorder);
            });

            std::thread::sleep(std::time::Duration::from_millis(60));
            assert!(
                recorder.best.lock().unwrap().is_none(),
                "bestmove must not appear before stop in infinite mode"
            );

            shared.stop.store(true, Ordering::Relaxed);
            handle.join().unwrap();
        });

        assert!(recorder.best.lock().unwrap().is_some());
    }

    #[test]
    fn helpers_share_the_node_counter() {
        let limits = Limits { depth: 5, ..Limits::default() };
        let (pool, recorder) = run_search(crate::board::START_FEN, limits, 2);

        assert!(recorder.best.lock().unwrap().is_some());
        assert!(pool.nodes_searched() > 0);
    }
}
