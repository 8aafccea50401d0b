use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::Value;

use partfinder::murata::MurataAdapter;
use partfinder::reasoning::ReasoningResolver;
use partfinder::{
    Config, CrossReferenceRequest, CrossReferenceSearch, Criteria, MpnRequest, MpnSearch,
    ParametricRequest, ParametricSearch, ProductRecord, ResolutionEngine, Search, SearchError,
};

/// Exit code for searches whose identifiers could not be resolved.
const EXIT_RESOLUTION_FAILURE: i32 = 2;

#[derive(Parser)]
#[command(
    name = "partfinder",
    about = "Search vendor catalogs by part number, parameters or cross-reference"
)]
struct Cli {
    /// Reasoning service credential (overrides ANTHROPIC_API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Write results as pretty JSON to this file
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// Cache directory (overrides PARTFINDER_CACHE_DIR)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Search by manufacturer part number
    Mpn { mpn: String },
    /// Search a category by parameters
    Parametric {
        #[arg(long)]
        category: String,
        #[arg(long)]
        subcategory: Option<String>,
        #[arg(long, help = "JSON criteria, or a path to a JSON file")]
        parameters: Option<String>,
        #[arg(long, default_value = "10", help = "Maximum results, 0 for no limit")]
        max_results: usize,
    },
    /// Search equivalents of a competitor part number
    Xref {
        mpn: String,
        #[arg(long, help = "JSON array of category names, or a path to a JSON file")]
        category_path: Option<String>,
        #[arg(long, help = "Maximum results, 0 for no limit")]
        max_results: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(key) = cli.api_key.filter(|k| !k.trim().is_empty()) {
        config = config.with_api_key(key);
    }
    if let Some(dir) = cli.cache_dir {
        config = config.with_cache_dir(dir);
    }

    let adapter = Arc::new(MurataAdapter::new(&config)?);
    let engine = Arc::new(ResolutionEngine::new(
        adapter,
        ReasoningResolver::from_config(&config),
    ));

    let result = match cli.command {
        Command::Mpn { mpn } => MpnSearch::new(engine).search(&MpnRequest { mpn }).await,
        Command::Parametric {
            category,
            subcategory,
            parameters,
            max_results,
        } => {
            let criteria = match parameters {
                Some(arg) => Some(Criteria::from_json(load_json(&arg, "parameters")?)?),
                None => None,
            };
            let request = ParametricRequest {
                category,
                subcategory,
                criteria,
                max_results: Some(max_results),
            };
            ParametricSearch::new(engine).search(&request).await
        }
        Command::Xref {
            mpn,
            category_path,
            max_results,
        } => {
            let category_path = match category_path {
                Some(arg) => Some(serde_json::from_value::<Vec<String>>(load_json(
                    &arg,
                    "category path",
                )?)?),
                None => None,
            };
            let request = CrossReferenceRequest {
                competitor_mpn: mpn,
                category_path,
                max_results,
            };
            CrossReferenceSearch::new(engine).search(&request).await
        }
    };

    let records = match result {
        Ok(records) => records,
        Err(SearchError::Resolution(failure)) => {
            eprintln!("error: {failure}");
            std::process::exit(EXIT_RESOLUTION_FAILURE);
        }
        Err(e) => return Err(e.into()),
    };

    write_results(&records, cli.output.as_deref())?;
    Ok(())
}

/// Parse `arg` as JSON text, or read it as a JSON file when it names one.
fn load_json(arg: &str, what: &str) -> Result<Value, String> {
    let path = Path::new(arg);
    if path.is_file() {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {what} file {}: {e}", path.display()))?;
        serde_json::from_str(&text).map_err(|e| format!("{what} file is not valid JSON: {e}"))
    } else {
        serde_json::from_str(arg).map_err(|e| format!("{what} must be valid JSON: {e}"))
    }
}

fn write_results(
    records: &[ProductRecord],
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string_pretty(records)?;
    if let Some(path) = output {
        if records.is_empty() {
            eprintln!("No results, {} not written.", path.display());
        } else {
            std::fs::write(path, &json)?;
            eprintln!("Wrote {} results to {}", records.len(), path.display());
        }
    }
    println!("{json}");
    Ok(())
}
