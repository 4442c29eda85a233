use std::sync::{
    atomic::Ordering,
    Arc, Mutex,
};
use std::thread::JoinHandle;

use crate::{
    board::Board,
    evaluate::evaluate_trace,
    perft::run_perft,
    search::SearchCallbacks,
    thread::{SharedContext, ThreadPool},
    timeman::Limits,
    transposition::{MAX_TT_SIZE, MIN_TT_SIZE},
};

pub const MAX_THREADS: usize = 1024;
pub const MAX_MULTI_PV: i32 = 128;

/// The UCI-visible configuration.
#[derive(Clone, Debug)]
pub struct Options {
    pub threads: usize,
    pub hash: usize,
    pub multi_pv: i32,
    pub move_overhead: i64,
    pub nodestime: i64,
    pub ponder: bool,
    pub show_wdl: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            threads: 1,
            hash: crate::transposition::DEFAULT_TT_SIZE,
            multi_pv: 1,
            move_overhead: 10,
            nodestime: 0,
            ponder: false,
            show_wdl: false,
        }
    }
}

/// The engine object: position, worker pool, transposition table, and
/// options, with the `new -> configure -> go -> drop` lifecycle the
/// protocol driver expects. `go` returns immediately; the search runs on
/// its own thread and reports through the registered callbacks.
pub struct Engine {
    pub board: Board,
    options: Options,
    shared: Arc<SharedContext>,
    pool: Arc<Mutex<ThreadPool>>,
    callbacks: Arc<dyn SearchCallbacks + Send + Sync>,
    handle: Option<JoinHandle<()>>,
}

impl Engine {
    pub fn new(callbacks: Arc<dyn SearchCallbacks + Send + Sync>) -> Self {
        let shared = Arc::new(SharedContext::default());
        Self {
            board: Board::starting_position(),
            options: Options::default(),
            pool: Arc::new(Mutex::new(ThreadPool::new(shared.clone()))),
            shared,
            callbacks,
            handle: None,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Applies a `setoption` after any in-flight search has finished.
    /// Returns false for unknown options.
    pub fn set_option(&mut self, name: &str, value: &str) -> bool {
        self.wait_for_search_finished();

        // Option names are matched with spaces ignored, so both
        // "MoveOverhead" and "Move Overhead" address the same knob.
        let key = name.replace(' ', "").to_ascii_lowercase();
        match key.as_str() {
            "threads" => {
                if let Ok(threads) = value.parse::<usize>() {
                    self.options.threads = threads.clamp(1, MAX_THREADS);
                    self.pool.lock().unwrap().set_count(self.options.threads);
                }
            }
            "hash" => {
                if let Ok(hash) = value.parse::<usize>() {
                    self.options.hash = hash.clamp(MIN_TT_SIZE, MAX_TT_SIZE);
                    self.shared.tt.resize(self.options.threads, self.options.hash);
                }
            }
            "multipv" => {
                if let Ok(multi_pv) = value.parse::<i32>() {
                    self.options.multi_pv = multi_pv.clamp(1, MAX_MULTI_PV);
                }
            }
            "moveoverhead" => {
                if let Ok(overhead) = value.parse::<i64>() {
                    self.options.move_overhead = overhead.clamp(0, 5000);
                }
            }
            "nodestime" => {
                if let Ok(npmsec) = value.parse::<i64>() {
                    self.options.nodestime = npmsec.max(0);
                }
            }
            "ponder" => self.options.ponder = value.eq_ignore_ascii_case("true"),
            "uci_showwdl" => self.options.show_wdl = value.eq_ignore_ascii_case("true"),
            _ => return false,
        }
        true
    }

    /// Installs a new position. Moves that fail to parse or are illegal cut
    /// the list short; the prefix up to that point stands.
    pub fn set_position(&mut self, fen: &str, moves: &[&str]) {
        self.wait_for_search_finished();

        let mut board = match Board::from_fen(fen) {
            Ok(board) => board,
            Err(err) => {
                log::warn!("rejecting position, {err}: '{fen}'");
                return;
            }
        };

        for text in moves {
            match board.parse_move(text) {
                Some(mv) => board.do_move(mv),
                None => {
                    log::warn!("ignoring illegal move '{text}' and the rest of the line");
                    break;
                }
            }
        }

        self.board = board;
    }

    /// Launches a search for the current position. Returns at once; the
    /// `bestmove` arrives via the callbacks.
    pub fn go(&mut self, limits: Limits) {
        self.wait_for_search_finished();

        let board = self.board.clone();
        let options = self.options.clone();
        let pool = self.pool.clone();
        let callbacks = self.callbacks.clone();

        let builder = std::thread::Builder::new()
            .name("zhuque-search".to_string())
            .stack_size(32 * 1024 * 1024);

        self.handle = Some(
            builder
                .spawn(move || {
                    let mut pool = pool.lock().unwrap();
                    pool.run(&board, limits, &options, callbacks.as_ref());
                })
                .expect("failed to spawn the search thread"),
        );
    }

    /// Requests the current search to stop as soon as possible.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Relaxed);
    }

    /// The GUI confirmed the pondered move: leave ponder mode and let time
    /// management take over, stopping right away if the budget already ran
    /// out while pondering.
    pub fn ponderhit(&self) {
        self.shared.ponder.store(false, Ordering::Relaxed);
        if self.shared.stop_on_ponderhit.load(Ordering::Relaxed) {
            self.shared.stop.store(true, Ordering::Relaxed);
        }
    }

    pub fn wait_for_search_finished(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.join().expect("search thread panicked");
        }
    }

    /// Resets all search state: histories, time-manager carry-overs, and
    /// the transposition table.
    pub fn new_game(&mut self) {
        self.wait_for_search_finished();
        self.pool.lock().unwrap().clear();
        self.board = Board::starting_position();
    }

    pub fn perft(&mut self, depth: usize) -> u64 {
        run_perft(&mut self.board.clone(), depth)
    }

    pub fn nodes_searched(&self) -> u64 {
        self.shared.nodes.load(Ordering::Relaxed)
    }

    pub fn visualize(&self) -> String {
        self.board.to_string()
    }

    pub fn trace_eval(&self) -> String {
        evaluate_trace(&self.board)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
        self.wait_for_search_finished();
    }
}
