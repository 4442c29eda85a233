use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::time::Instant;

use crate::{
    bench,
    board::Board,
    engine::{Engine, MAX_MULTI_PV, MAX_THREADS},
    search::{PvInfo, SearchCallbacks},
    timeman::Limits,
    transposition::{DEFAULT_TT_SIZE, MAX_TT_SIZE, MIN_TT_SIZE},
    types::{is_loss, is_win, Color, Move, PieceType, Score},
};

/// Entry point for the protocol loop. Arguments on the command line are
/// executed as a single command; otherwise stdin is read until `quit`.
pub fn run(args: &[String]) -> anyhow::Result<()> {
    let sink = Arc::new(UciSink::default());
    let mut engine = Engine::new(sink.clone());

    if !args.is_empty() {
        let command = args.join(" ");
        execute(&mut engine, &sink, &command);
        engine.wait_for_search_finished();
        return Ok(());
    }

    loop {
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line)? == 0 {
            // EOF behaves like quit.
            break;
        }
        if !execute(&mut engine, &sink, &line) {
            break;
        }
    }

    engine.stop();
    engine.wait_for_search_finished();
    Ok(())
}

/// Dispatches one command line. Returns false once the engine should exit.
pub fn execute(engine: &mut Engine, sink: &UciSink, input: &str) -> bool {
    let tokens = input.split_whitespace().collect::<Vec<_>>();

    match tokens.as_slice() {
        ["uci"] => identify(),
        ["isready"] => println!("readyok"),

        ["setoption", rest @ ..] => set_option(engine, sink, rest),
        ["ucinewgame"] => engine.new_game(),

        ["position", rest @ ..] => position(engine, rest),
        // The bare forms without the `position` keyword are accepted too.
        ["fen", ..] | ["startpos", ..] => position(engine, &tokens),

        ["go", rest @ ..] => go(engine, rest),
        ["stop"] => engine.stop(),
        ["ponderhit"] => engine.ponderhit(),

        ["quit"] => {
            engine.stop();
            return false;
        }

        // Diagnostics outside the protocol proper.
        ["d"] => println!("{}", engine.visualize()),
        ["eval"] => println!("{}", engine.trace_eval()),
        ["bench", rest @ ..] => bench::run(engine, rest),
        ["compiler"] => println!("Compiled with rustc (release profile, LTO)"),
        ["help"] | ["--help"] | ["license"] | ["--license"] => help(),

        [] => {}
        _ => println!("Unknown command: '{}'. Type help for more information.", input.trim_end()),
    }

    true
}

fn identify() {
    println!("id name Zhuque {}", env!("CARGO_PKG_VERSION"));
    println!("id author the Zhuque developers");
    println!();
    println!("option name Threads type spin default 1 min 1 max {MAX_THREADS}");
    println!("option name Hash type spin default {DEFAULT_TT_SIZE} min {MIN_TT_SIZE} max {MAX_TT_SIZE}");
    println!("option name MultiPV type spin default 1 min 1 max {MAX_MULTI_PV}");
    println!("option name MoveOverhead type spin default 10 min 0 max 5000");
    println!("option name nodestime type spin default 0 min 0 max 10000000");
    println!("option name Ponder type check default false");
    println!("option name UCI_ShowWDL type check default false");
    println!("uciok");
}

fn help() {
    println!();
    println!("Zhuque is a UCI xiangqi engine for playing and analyzing.");
    println!("It is released as free software licensed under the GNU GPLv3 License.");
    println!("Zhuque is normally used with a graphical user interface (GUI) and implements");
    println!("the Universal Chess Interface (UCI) protocol to communicate with a GUI or an API.");
    println!();
}

fn set_option(engine: &mut Engine, sink: &UciSink, tokens: &[&str]) {
    let Some(rest) = tokens.strip_prefix(&["name"]) else {
        println!("Unknown option: '{}'", tokens.join(" "));
        return;
    };

    let split = rest.iter().position(|&t| t == "value").unwrap_or(rest.len());
    let name = rest[..split].join(" ");
    let value = rest.get(split + 1..).unwrap_or(&[]).join(" ");

    if !engine.set_option(&name, &value) {
        println!("Unknown option: '{name}'");
        return;
    }

    sink.show_wdl.store(engine.options().show_wdl, Ordering::Relaxed);
}

fn position(engine: &mut Engine, mut tokens: &[&str]) {
    if tokens.first() == Some(&"position") {
        tokens = &tokens[1..];
    }

    let (fen, rest) = match tokens {
        ["startpos", rest @ ..] => (crate::board::START_FEN.to_string(), rest),
        ["fen", rest @ ..] => {
            let end = rest.iter().position(|&t| t == "moves").unwrap_or(rest.len());
            (rest[..end].join(" "), &rest[end..])
        }
        _ => return,
    };

    let moves = match rest {
        ["moves", moves @ ..] => moves,
        _ => &[],
    };

    engine.set_position(&fen, moves);
}

fn go(engine: &mut Engine, tokens: &[&str]) {
    let limits = parse_limits(tokens);

    if limits.perft > 0 {
        engine.perft(limits.perft);
    } else {
        engine.go(limits);
    }
}

fn parse_limits(tokens: &[&str]) -> Limits {
    // The search clock starts as early as possible.
    let mut limits = Limits { start_time: Instant::now(), ..Limits::default() };

    let mut iter = tokens.iter();
    while let Some(&token) = iter.next() {
        match token {
            // Needs to be the last keyword on the line.
            "searchmoves" => {
                limits.searchmoves = iter.map(|m| m.to_string()).collect();
                break;
            }
            "infinite" => limits.infinite = true,
            "ponder" => limits.ponder_mode = true,
            _ => {
                let Some(value) = iter.clone().next().and_then(|v| v.parse::<i64>().ok()) else {
                    continue;
                };
                match token {
                    "wtime" => limits.time[Color::White] = value,
                    "btime" => limits.time[Color::Black] = value,
                    "winc" => limits.inc[Color::White] = value,
                    "binc" => limits.inc[Color::Black] = value,
                    "movestogo" => limits.movestogo = value as i32,
                    "depth" => limits.depth = value as i32,
                    "nodes" => limits.nodes = value as u64,
                    "movetime" => limits.movetime = value,
                    "mate" => limits.mate = value as i32,
                    "perft" => limits.perft = value as usize,
                    _ => continue,
                }
                iter.next();
            }
        }
    }

    limits
}

/// The stdout end of the search callbacks. A lock serializes whole lines so
/// worker output never interleaves.
pub struct UciSink {
    lock: Mutex<()>,
    pub show_wdl: AtomicBool,
}

impl Default for UciSink {
    fn default() -> Self {
        Self { lock: Mutex::new(()), show_wdl: AtomicBool::new(false) }
    }
}

impl SearchCallbacks for UciSink {
    fn on_update_full(&self, info: &PvInfo) {
        let _guard = self.lock.lock().unwrap();

        let mut line = format!(
            "info depth {} seldepth {} multipv {} score {}",
            info.depth,
            info.sel_depth,
            info.multipv,
            format_score(info.score, info.board),
        );

        if self.show_wdl.load(Ordering::Relaxed) {
            let (w, d, l) = wdl(info.score, info.board);
            line.push_str(&format!(" wdl {w} {d} {l}"));
        }

        if info.lowerbound {
            line.push_str(" lowerbound");
        } else if info.upperbound {
            line.push_str(" upperbound");
        }

        line.push_str(&format!(
            " nodes {} nps {} hashfull {} tbhits {} time {} pv",
            info.nodes, info.nps, info.hashfull, info.tb_hits, info.time_ms,
        ));
        for mv in info.pv {
            line.push_str(&format!(" {mv}"));
        }

        println!("{line}");
    }

    fn on_iter(&self, depth: i32, currmove: Move, currmovenumber: usize) {
        let _guard = self.lock.lock().unwrap();
        println!("info depth {depth} currmove {currmove} currmovenumber {currmovenumber}");
    }

    fn on_update_no_moves(&self) {
        let _guard = self.lock.lock().unwrap();
        println!("info depth 0 score mate 0");
    }

    fn on_bestmove(&self, best: Move, ponder: Move) {
        let _guard = self.lock.lock().unwrap();
        if ponder.is_ok() {
            println!("bestmove {best} ponder {ponder}");
        } else {
            println!("bestmove {best}");
        }
    }
}

/// Renders a score as `cp N` (normalized centipawns) or `mate N` (moves,
/// not plies).
pub fn format_score(score: i32, board: &Board) -> String {
    if is_win(score) {
        let plies = Score::MATE - score;
        format!("mate {}", (plies + 1) / 2)
    } else if is_loss(score) {
        let plies = -Score::MATE - score;
        format!("mate {}", plies / 2)
    } else {
        format!("cp {}", to_cp(score, board))
    }
}

/// Material-dependent parameters of the win-rate model, fitted against the
/// original engine's long-time-control data.
fn win_rate_params(board: &Board) -> (f64, f64) {
    let material = 10 * board.count(PieceType::Rook)
        + 5 * (board.count(PieceType::Knight) + board.count(PieceType::Cannon))
        + 3 * board.count(PieceType::Bishop)
        + 2 * board.count(PieceType::Advisor)
        + board.count(PieceType::Pawn);

    let m = material.clamp(17, 110) as f64 / 65.0;

    let a = ((220.59891365 * m - 810.35730430) * m + 928.68185198) * m + 79.83955423;
    let b = ((61.99287416 * m - 233.72674182) * m + 325.85508322) * m - 68.72720854;

    (a, b)
}

/// Converts an internal value to centipawns for display.
pub fn to_cp(value: i32, board: &Board) -> i32 {
    let (a, _) = win_rate_params(board);
    (100.0 * value as f64 / a).round() as i32
}

/// The win rate in permille from the model `1 / (1 + exp((a - v) / b))`.
fn win_rate_model(value: i32, board: &Board) -> i32 {
    let (a, b) = win_rate_params(board);
    (0.5 + 1000.0 / (1.0 + ((a - value as f64) / b).exp())) as i32
}

/// Win/draw/loss expectation in permille for the side to move.
pub fn wdl(value: i32, board: &Board) -> (i32, i32, i32) {
    let win = win_rate_model(value, board);
    let loss = win_rate_model(-value, board);
    let draw = 1000 - win - loss;
    (win, draw, loss)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{mate_in, mated_in};

    macro_rules! assert_limits {
        ($($name:ident: $input:expr, $check:expr,)*) => {$(
            #[test]
            fn $name() {
                let tokens = $input.split_whitespace().collect::<Vec<_>>();
                let limits = parse_limits(&tokens);
                let check: fn(&Limits) -> bool = $check;
                assert!(check(&limits), "unexpected limits for '{}'", $input);
            }
        )*};
    }

    assert_limits!(
        go_infinite: "infinite", |l| l.infinite,
        go_depth: "depth 10", |l| l.depth == 10,
        go_movetime: "movetime 5000", |l| l.movetime == 5000,
        go_nodes: "nodes 250000", |l| l.nodes == 250_000,
        go_mate: "mate 3", |l| l.mate == 3,
        go_perft: "perft 4", |l| l.perft == 4,
        go_ponder: "ponder wtime 100 btime 200", |l| {
            l.ponder_mode && l.time[Color::White] == 100 && l.time[Color::Black] == 200
        },
        go_clocks: "wtime 60000 btime 55000 winc 1000 binc 1000 movestogo 30", |l| {
            l.time[Color::White] == 60000
                && l.time[Color::Black] == 55000
                && l.inc[Color::White] == 1000
                && l.movestogo == 30
        },
        go_searchmoves: "depth 8 searchmoves h2e2 b2e2", |l| {
            l.depth == 8 && l.searchmoves == vec!["h2e2".to_string(), "b2e2".to_string()]
        },
        go_garbage: "bananas 42", |l| {
            !l.infinite && l.depth == 0 && l.nodes == 0 && l.movetime == 0
        },
    );

    #[test]
    fn wdl_is_a_probability() {
        let board = Board::starting_position();
        for value in [-2000, -500, -100, 0, 100, 500, 2000] {
            let (w, d, l) = wdl(value, &board);
            assert!(w >= 0 && d >= 0 && l >= 0, "negative component at {value}");
            assert!(w + d + l == 1000);
        }
    }

    #[test]
    fn wdl_is_symmetric() {
        let board = Board::starting_position();
        let (w, _, l) = wdl(150, &board);
        let (w2, _, l2) = wdl(-150, &board);
        assert_eq!(w, l2);
        assert_eq!(l, w2);
    }

    #[test]
    fn score_formatting() {
        let board = Board::starting_position();
        assert_eq!(format_score(mate_in(3), &board), "mate 2");
        assert_eq!(format_score(mate_in(4), &board), "mate 2");
        assert_eq!(format_score(mated_in(2), &board), "mate -1");
        assert_eq!(format_score(0, &board), "cp 0");
        assert!(format_score(200, &board).starts_with("cp "));
    }

    #[test]
    fn centipawns_track_sign() {
        let board = Board::starting_position();
        assert!(to_cp(300, &board) > 0);
        assert!(to_cp(-300, &board) < 0);
        assert_eq!(to_cp(0, &board), 0);
    }
}
