use std::time::Instant;

use crate::board::Board;

/// Counts leaf nodes of the legal move tree, the standard movegen
/// correctness check.
pub fn perft(board: &mut Board, depth: usize) -> u64 {
    if depth == 0 {
        return 1;
    }

    let moves = board.generate_moves();
    let mut nodes = 0;

    for entry in moves.iter() {
        if !board.legal(entry.mv) {
            continue;
        }
        if depth == 1 {
            nodes += 1;
        } else {
            board.do_move(entry.mv);
            nodes += perft(board, depth - 1);
            board.undo_move(entry.mv);
        }
    }

    nodes
}

/// Runs a divided perft and reports per-move counts, the total, and the
/// throughput.
pub fn run_perft(board: &mut Board, depth: usize) -> u64 {
    let now = Instant::now();
    let mut total = 0;

    let moves = board.generate_moves();
    for entry in moves.iter() {
        if !board.legal(entry.mv) {
            continue;
        }
        board.do_move(entry.mv);
        let nodes = perft(board, depth.saturating_sub(1));
        board.undo_move(entry.mv);

        println!("{}: {nodes}", entry.mv);
        total += nodes;
    }

    let elapsed = now.elapsed();
    println!();
    println!("Nodes searched: {total}");
    println!("Time: {} ms", elapsed.as_millis());
    println!("NPS: {:.0}", total as f64 / elapsed.as_secs_f64().max(1e-9));

    total
}
