use clap::{Parser, Subcommand};
use royalbit_sheetcheck::cli::{self, AnalyzeOptions};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "sheetcheck")]
#[command(about = "Spreadsheet correctness analysis for .xlsx workbooks")]
#[command(long_about = "Sheetcheck - find what is wrong in a workbook before anyone relies on it

Reports formula errors, circular references, data inconsistencies and format
problems, each with a severity, a location and a suggested fix.

EXECUTION PATHS:
  Workbooks below the streaming threshold (default 10 MiB) are loaded whole
  and every formula is evaluated. Larger ones are streamed row by row in
  bounded memory. A failed stream falls back to a full load.

COMMANDS:
  analyze   - Analyze a workbook
  optimize  - Suggest a simpler form of a formula

EXAMPLES:
  sheetcheck analyze book.xlsx
  sheetcheck analyze book.xlsx --json > report.json
  sheetcheck analyze big.xlsx --memory-ceiling 104857600
  sheetcheck optimize \"=VLOOKUP(A1,B:C,2,FALSE)\"

Logging: RUST_LOG=royalbit_sheetcheck=debug")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(long_about = "Analyze a workbook and print its findings.

Findings are grouped by severity. Exits with status 1 when the workbook could
not be read at all; findings alone never change the exit status.

CONFIG FILE (YAML, every key optional):
  streaming_threshold_bytes: 10485760
  memory_ceiling_bytes: 209715200
  watchdog_interval_rows: 1000
  max_precedents: 10
  duplicate_min_length: 3
  mixed_type_min_cells: 5

Command-line flags override the config file.")]
    /// Analyze a workbook
    Analyze {
        /// Path to the workbook (.xlsx)
        file: PathBuf,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,

        /// YAML config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Inputs of at least this many bytes are streamed
        #[arg(long, env = "SHEETCHECK_STREAMING_THRESHOLD")]
        streaming_threshold: Option<u64>,

        /// Resident memory (bytes) above which streaming releases spare buffers
        #[arg(long, env = "SHEETCHECK_MEMORY_CEILING")]
        memory_ceiling: Option<u64>,

        /// Keep the result as JSON in this directory
        #[arg(long)]
        store: Option<PathBuf>,
    },

    /// Suggest a simpler form of a formula
    Optimize {
        /// Formula text, e.g. \"=SUM(A1:A10)*1\"
        formula: String,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "royalbit_sheetcheck=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            file,
            json,
            config,
            streaming_threshold,
            memory_ceiling,
            store,
        } => {
            let options = AnalyzeOptions {
                json,
                config,
                streaming_threshold,
                memory_ceiling,
                store,
            };
            let success = cli::analyze(file, options)?;
            Ok(if success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        Commands::Optimize { formula, json } => {
            cli::optimize(formula, json)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
