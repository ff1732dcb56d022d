use clap::Parser;
use colored::*;
use tracing_subscriber::EnvFilter;

use wave_bucket::{
    cli::{self, Args, Command},
    config::Bundle,
    store::StoredDecision,
};

fn init_tracing(verbose: bool) {
    let default = if verbose { "wave_bucket=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).with_target(true).init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.verbose);

    match args.command {
        Command::Check { bundle } => {
            let loaded = Bundle::from_path(&bundle)?;
            let rows = cli::check(&loaded)?;
            print!("{}", cli::render_check(&rows));
            eprintln!("{} {} wave(s) OK", "✓".green().bold(), rows.len());
        }
        Command::Simulate { bundle, visitors, seed, preview, json } => {
            let loaded = Bundle::from_path(&bundle)?;
            let report = cli::simulate(&loaded, visitors, seed, &preview)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", cli::render_simulation(&report));
            }
        }
        Command::Decode { token, json } => {
            let decision = StoredDecision::decode(&token);
            if json {
                println!("{}", cli::decode_json(&decision));
            } else {
                println!("{}", cli::render_decode(&decision));
            }
        }
    }

    Ok(())
}
