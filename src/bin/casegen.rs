//! Command line driver for the case generators.
//!
//! Usage:
//! `casegen tier1 [-o OUT] INPUT...`
//! `casegen abstract --base BASE... [-o OUT] OVERRIDES...`

use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::process;

use casegen::{
    analyze_sources, generate_abstract_file, generate_tier1_file, CasesError, CasesResult,
    GeneratorConfig,
};

#[derive(Parser, Debug)]
#[command(name = "casegen")]
#[command(about = "Generate interpreter cases from stack-effect instruction definitions")]
struct Args {
    /// Increase log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate the concrete interpreter cases
    Tier1 {
        /// Definition files, analyzed together
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Generate the abstract interpreter cases
    Abstract {
        /// Base definition files
        #[arg(long, required = true)]
        base: Vec<PathBuf>,

        /// Override definition files
        #[arg(required = true)]
        overrides: Vec<PathBuf>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn read_sources(paths: &[PathBuf]) -> CasesResult<Vec<(String, String)>> {
    paths
        .iter()
        .map(|path| {
            let name = path.display().to_string();
            fs::read_to_string(path)
                .map(|text| (name.clone(), text))
                .map_err(|e| CasesError::Io { path: name, message: e.to_string() })
        })
        .collect()
}

fn display_names(paths: &[PathBuf]) -> Vec<String> {
    paths.iter().map(|p| p.display().to_string()).collect()
}

fn write_output(output: Option<&PathBuf>, text: &str) -> CasesResult<()> {
    match output {
        Some(path) => fs::write(path, text).map_err(|e| CasesError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        }),
        None => {
            print!("{}", text);
            Ok(())
        }
    }
}

fn run(command: &Command) -> CasesResult<()> {
    let config = GeneratorConfig::default();
    match command {
        Command::Tier1 { inputs, output } => {
            let analysis = analyze_sources(&read_sources(inputs)?)?;
            let text = generate_tier1_file(&analysis, &display_names(inputs), &config)?;
            write_output(output.as_ref(), &text)
        }
        Command::Abstract { base, overrides, output } => {
            let base_analysis = analyze_sources(&read_sources(base)?)?;
            let override_analysis = analyze_sources(&read_sources(overrides)?)?;
            let inputs: Vec<String> = display_names(base)
                .into_iter()
                .chain(display_names(overrides))
                .collect();
            let text = generate_abstract_file(&base_analysis, &override_analysis, &inputs, &config)?;
            write_output(output.as_ref(), &text)
        }
    }
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(e) = run(&args.command) {
        log::error!("{}", e);
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
