//! The `bamm` binary: load a control file, run the rjMCMC chain to
//! completion, write its outputs. Everything below the control-file load
//! is a thin wiring layer over `bamm-core`/`bamm-io`/`bamm-rng` — no
//! domain logic lives here.

mod error;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use bamm_core::MCMCDriver;
use bamm_rng::BammRng;
use error::CliError;

/// Bayesian rjMCMC inference of macroevolutionary rate shifts.
#[derive(Parser, Debug)]
#[command(name = "bamm", version, about)]
struct Cli {
    /// Path to the control file.
    control_file: PathBuf,

    /// Increase log verbosity (repeatable: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(cli: &Cli) -> Result<(), CliError> {
    let control_path = cli.control_file.to_string_lossy().into_owned();
    let loaded = bamm_io::load_run(&control_path)?;

    let rng = match loaded.config.seed {
        Some(seed) => BammRng::seed_from_u64(seed),
        None => BammRng::from_entropy(),
    };

    let outputs = &loaded.config.outputs;
    let mut sink = bamm_io::FileOutputSink::create(
        loaded.tree.clone(),
        &outputs.mcmc_outfile,
        &outputs.event_data_outfile,
        &outputs.branch_rates_outfile,
    )?;

    let mut model = bamm_core::Model::new(
        loaded.tree,
        loaded.config,
        rng,
        loaded.initial_events,
        loaded.tip_trait_values,
    )?;

    tracing::info!(
        treefile = %model.config().treefile,
        generations = model.config().number_generations,
        "starting rjMCMC chain"
    );

    let driver = MCMCDriver::new(model.config());
    driver.run(&mut model, &mut sink)?;
    sink.flush()?;

    tracing::info!(
        generation = model.generation(),
        log_likelihood = model.log_likelihood(),
        "chain complete"
    );
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e.exit_code();
            // anyhow is reserved for exactly this boundary: pretty,
            // source-chained error reporting for a human reading the
            // terminal. Everywhere upstream of here uses thiserror.
            eprintln!("bamm: {:#}", anyhow::Error::from(e));
            ExitCode::from(code as u8)
        }
    }
}
