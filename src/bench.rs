use std::time::Instant;

use crate::{engine::Engine, timeman::Limits};

/// A small spread of openings, middlegames, and endgames; enough to get a
/// stable nodes-per-second figure without taking minutes.
const POSITIONS: [&str; 6] = [
    "rnbakabnr/9/1c5c1/p1p1p1p1p/9/9/P1P1P1P1P/1C5C1/9/RNBAKABNR w",
    "rnbakabnr/9/1c5c1/p1p1p1p1p/9/9/P1P1P1P1P/1C2C4/9/RNBAKABNR b",
    "rnbakab1r/9/1c4nc1/p1p1p1p1p/9/9/P1P1P1P1P/1C4NC1/9/RNBAKAB1R w",
    "3k5/9/9/9/9/9/9/4C4/9/4K1R2 w",
    "4k4/9/9/4p4/9/9/4P4/9/9/4K4 w",
    "2bakab2/9/9/9/9/4P4/9/9/9/2BAKAB2 b",
];

const DEFAULT_DEPTH: i32 = 10;

/// Fixed-depth sweep over the bench positions, reporting total nodes and
/// throughput on stderr so the UCI stream stays clean.
pub fn run(engine: &mut Engine, args: &[&str]) {
    let depth = args.first().and_then(|d| d.parse().ok()).unwrap_or(DEFAULT_DEPTH);

    let mut nodes = 0u64;
    let started = Instant::now();

    for (index, fen) in POSITIONS.iter().enumerate() {
        eprintln!("\nPosition: {}/{} ({})", index + 1, POSITIONS.len(), fen);

        engine.new_game();
        engine.set_position(fen, &[]);
        engine.go(Limits { depth, ..Limits::default() });
        engine.wait_for_search_finished();

        nodes += engine.nodes_searched();
    }

    let elapsed = started.elapsed().as_millis().max(1) as u64;

    eprintln!("\n===========================");
    eprintln!("Total time (ms) : {elapsed}");
    eprintln!("Nodes searched  : {nodes}");
    eprintln!("Nodes/second    : {}", 1000 * nodes / elapsed);
}
