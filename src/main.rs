use std::{fs, path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use kigali::{
    EngineError, Program, SimulationRunner,
    error::SimError,
    report::csv,
};

const EXIT_OK: u8 = 0;
const EXIT_FILE_NOT_FOUND: u8 = 1;
const EXIT_PARSE_ERROR: u8 = 2;
const EXIT_SCENARIO_NOT_FOUND: u8 = 3;
const EXIT_EXECUTION_ERROR: u8 = 4;
const EXIT_CSV_WRITE_ERROR: u8 = 5;
const EXIT_INVALID_REPLICATES: u8 = 6;

#[derive(Parser)]
#[command(name = "kigali", about = "Substance-consumption policy simulation engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program and write result rows as CSV
    Run {
        /// Program file (JSON-encoded parsed program)
        script: PathBuf,

        /// Output CSV path
        #[arg(short, long)]
        output: PathBuf,

        /// Monte-Carlo replicates per scenario
        #[arg(short, long, default_value_t = 1)]
        replicates: i64,

        /// Restrict the run to one scenario
        #[arg(short, long)]
        simulation: Option<String>,

        /// Seed for trial-driven sampling
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },

    /// Check a program file without running it
    Validate {
        /// Program file (JSON-encoded parsed program)
        script: PathBuf,
    },

    /// Print the version
    Version,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Run {
            script,
            output,
            replicates,
            simulation,
            seed,
        } => run(&script, &output, replicates, simulation.as_deref(), seed),
        Commands::Validate { script } => validate(&script),
        Commands::Version => {
            println!("kigali {}", env!("CARGO_PKG_VERSION"));
            EXIT_OK
        }
    };
    ExitCode::from(code)
}

fn run(
    script: &PathBuf,
    output: &PathBuf,
    replicates: i64,
    simulation: Option<&str>,
    seed: u64,
) -> u8 {
    if replicates < 1 {
        eprintln!("error: replicates must be at least 1 (got {replicates})");
        return EXIT_INVALID_REPLICATES;
    }

    let text = match fs::read_to_string(script) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("error: cannot read {}: {e}", script.display());
            return EXIT_FILE_NOT_FOUND;
        }
    };

    let program = match Program::from_json(&text) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("error: cannot parse {}: {e}", script.display());
            return EXIT_PARSE_ERROR;
        }
    };

    if let Some(name) = simulation
        && program.scenario(name).is_err()
    {
        eprintln!("error: scenario not found: '{name}'");
        return EXIT_SCENARIO_NOT_FOUND;
    }

    let scenario_count = simulation.map_or(program.scenarios.len(), |_| 1);
    let progress = ProgressBar::new_spinner().with_message(format!(
        "running {scenario_count} scenario(s) x {replicates} trial(s)"
    ));
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} [{elapsed}]") {
        progress.set_style(style);
    }
    progress.enable_steady_tick(std::time::Duration::from_millis(120));

    let runner = SimulationRunner::new()
        .with_replicates(replicates as u64)
        .with_seed(seed);
    let result = match simulation {
        Some(name) => runner.run_scenario(&program, name),
        None => runner.run(&program),
    };
    progress.finish_and_clear();

    let rows = match result {
        Ok(rows) => rows,
        Err(EngineError::Sim(SimError::ScenarioNotFound(name))) => {
            eprintln!("error: scenario not found: '{name}'");
            return EXIT_SCENARIO_NOT_FOUND;
        }
        Err(e) => {
            eprintln!("error: execution failed: {e}");
            return EXIT_EXECUTION_ERROR;
        }
    };

    let mut file = match fs::File::create(output) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("error: cannot create {}: {e}", output.display());
            return EXIT_CSV_WRITE_ERROR;
        }
    };
    if let Err(e) = csv::write_rows(&mut file, &rows) {
        eprintln!("error: cannot write {}: {e}", output.display());
        return EXIT_CSV_WRITE_ERROR;
    }

    println!("{} rows -> {}", rows.len(), output.display());
    EXIT_OK
}

fn validate(script: &PathBuf) -> u8 {
    let text = match fs::read_to_string(script) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("error: cannot read {}: {e}", script.display());
            return EXIT_FILE_NOT_FOUND;
        }
    };

    match Program::from_json(&text).and_then(|program| program.validate()) {
        Ok(()) => {
            println!("ok");
            EXIT_OK
        }
        Err(e) => {
            eprintln!("error: {e}");
            EXIT_PARSE_ERROR
        }
    }
}
