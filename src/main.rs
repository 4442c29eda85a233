use anyhow::Result;

mod bench;
mod board;
mod engine;
mod evaluate;
mod history;
mod movepick;
mod perft;
mod pv;
mod search;
mod stack;
mod thread;
mod timeman;
mod transposition;
mod types;
mod uci;

fn main() -> Result<()> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "warn"),
    );

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    uci::run(&args)
}
