use anyhow::Result;
use clap::Parser;

mod bus;
mod cli;
mod console;
mod digits;
mod dispatch;
mod frame;
mod oneshot;
mod peer;
mod port;
mod proto;
mod run;
mod scheduler;
mod stats;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match args.cmd {
        cli::Cmd::Run(opts) => run::run(opts),
        cli::Cmd::Ping(opts) => oneshot::ping(opts),
        cli::Cmd::Cancel(opts) => oneshot::cancel(opts),
        cli::Cmd::Peer(opts) => peer::run(opts),
        cli::Cmd::Digits(opts) => {
            let s: String = digits::series(opts.start, opts.count)
                .into_iter()
                .map(|d| char::from(b'0' + d))
                .collect();
            println!("{}", s);
            Ok(())
        }
    }
}
