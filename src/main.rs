// src/main.rs

use taskline::{cli, logging, run};

// No `#[tokio::main]`: the supervisor builds its own single-threaded runtime
// and forks from it.
fn main() {
    if let Err(err) = run_main() {
        eprintln!("taskline error: {err:?}");
        std::process::exit(1);
    }
}

fn run_main() -> anyhow::Result<()> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    run(args)
}
