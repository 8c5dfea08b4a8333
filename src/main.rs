use std::{
    env,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use n4_avionics::{
    mode::{ModeArbiter, OperatingMode},
    parameters::Parameters,
    runner::build_strategy,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/params.toml")]
    params: PathBuf,

    /// Overrides the mode jumper: daq, replay or flight
    #[arg(short, long)]
    mode: Option<OperatingMode>,

    /// Altitude CSV to replay instead of the configured one
    #[arg(short, long)]
    replay_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    // Default log level to "info"
    if env::var("RUST_LOG").is_err() {
        unsafe { env::set_var("RUST_LOG", "info") }
    }

    pretty_env_logger::init();
    n4();

    let args = Args::parse();

    let mut params = Parameters::from_file(&args.params)
        .with_context(|| format!("Cannot load parameters from '{}'", args.params.display()))?;

    if let Some(file) = args.replay_file {
        params.replay.file = file;
    }

    let mode = ModeArbiter::new(params.mode.signal)
        .force(args.mode)
        .resolve()?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            warn!("Interrupted, stopping");
            running.store(false, Ordering::Release);
        })?;
    }

    let strategy = build_strategy(mode, params, running)?;
    let summary = strategy.run()?;

    info!("{summary}");
    info!("Boom!");

    Ok(())
}

fn n4() {
    println!("            /\\");
    println!("           /  \\");
    println!("          | N4 |");
    println!("          |    |");
    println!("          |    |");
    println!("         /|    |\\");
    println!("        / |    | \\");
    println!("       /__|____|__\\");
    println!("          ' || '");
    println!("           '||'");
    println!("            ''");
}
