use std::path::PathBuf;
use std::rc::Rc;

use clap::Parser;

use cipherbench::abi::SharedLibBackend;
use cipherbench::config::Config;
use cipherbench::engine::{CancelFlag, Engine};
use cipherbench::error::HarnessError;
use cipherbench::report::{self, RunSummary};

const EXIT_OK: i32 = 0;
const EXIT_BENCH_FAILED: i32 = 1;
const EXIT_BACKEND_ERROR: i32 = 2;
const EXIT_CONFIG_ERROR: i32 = 3;
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser, Debug)]
#[command(
    name = "cipherbench",
    version,
    about = "cipherbench — benchmarking harness for homomorphic-encryption backends"
)]
struct Cli {
    /// Backend shared library (overrides the config file value)
    #[arg(long = "backend_lib_path")]
    backend_lib_path: Option<PathBuf>,

    /// YAML configuration file
    #[arg(long = "config_file")]
    config_file: Option<PathBuf>,

    /// Seed override; 0 derives the seed from the clock
    #[arg(long = "random_seed")]
    random_seed: Option<u64>,

    /// Directory that receives one report directory per benchmark
    #[arg(long = "report_root", default_value = "reports")]
    report_root: PathBuf,

    /// Only run benchmarks whose canonical path contains this substring
    #[arg(long)]
    filter: Option<String>,

    /// List the canonical paths of every supported benchmark and exit
    #[arg(long)]
    list: bool,

    /// Print the default YAML configuration and exit
    #[arg(long)]
    dump: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    // ── --dump: no backend needed ──
    if cli.dump {
        print!("{}", Config::default_yaml());
        std::process::exit(EXIT_OK);
    }

    // ── Config: file, then CLI overrides ──
    let mut config = match &cli.config_file {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("error: {e}");
                std::process::exit(EXIT_CONFIG_ERROR);
            }
        },
        None => Config::default(),
    };
    if let Some(path) = &cli.backend_lib_path {
        config.backend_lib_path = path.display().to_string();
    }
    if let Some(seed) = cli.random_seed {
        config.random_seed = seed;
    }
    if config.backend_lib_path.is_empty() {
        eprintln!("error: backend_lib_path is required (flag or config file)");
        std::process::exit(EXIT_CONFIG_ERROR);
    }

    // ── SIGINT wiring ──
    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || cancel.cancel()) {
            eprintln!("error: cannot install SIGINT handler: {e}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    }

    // ── Backend + engine ──
    let backend = match SharedLibBackend::load(config.backend_lib_path.as_ref()) {
        Ok(b) => Rc::new(b),
        Err(e @ HarnessError::Config(_)) => {
            eprintln!("error: {e}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(EXIT_BACKEND_ERROR);
        }
    };
    let engine = match Engine::new(backend, config.clone()) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(exit_code_for(&e));
        }
    };

    // ── --list: enumerate and exit ──
    if cli.list {
        match engine.enumerate() {
            Ok(matched) => {
                for (_, token) in &matched {
                    println!("{}", token.report_path());
                }
                std::process::exit(EXIT_OK);
            }
            Err(e) => {
                eprintln!("error: {e}");
                std::process::exit(exit_code_for(&e));
            }
        }
    }

    // ── Run ──
    let outcome = match engine.run(&cli.report_root, cli.filter.as_deref(), &cancel) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(exit_code_for(&e));
        }
    };

    // Record the seed the engine actually used; re-deriving it here would
    // race the clock when random_seed is 0.
    let summary = RunSummary {
        backend_lib_path: config.backend_lib_path.clone(),
        random_seed: engine.seed(),
        benchmarks: outcome.records.clone(),
    };
    if let Err(e) = report::write_run_summary(&cli.report_root, &summary) {
        eprintln!("error: {e}");
        std::process::exit(EXIT_BACKEND_ERROR);
    }

    if outcome.cancelled {
        eprintln!("interrupted: {} benchmarks completed", outcome.records.len());
        std::process::exit(EXIT_INTERRUPTED);
    }
    if outcome.failed > 0 {
        eprintln!("{} of {} benchmarks failed", outcome.failed, outcome.records.len());
        std::process::exit(EXIT_BENCH_FAILED);
    }
    std::process::exit(EXIT_OK);
}

fn exit_code_for(e: &HarnessError) -> i32 {
    match e {
        HarnessError::Config(_) => EXIT_CONFIG_ERROR,
        HarnessError::Cancelled => EXIT_INTERRUPTED,
        _ => EXIT_BACKEND_ERROR,
    }
}
