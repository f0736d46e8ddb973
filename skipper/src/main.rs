mod app;
mod config;
mod localfile;
mod logging;
mod signal;

use clap::Parser;

fn main() -> anyhow::Result<()> {
    let args = config::Args::parse();
    logging::init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(app::run(args))
}
