use clap::{Parser, Subcommand};
use renta_core::{RentaError, Result};
use renta_sources::{SearchCriteria, SourceRegistry};
use tracing::{error, info, Level};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch rental listings from a source
    #[command(about = "Fetch rental listings from a source")]
    #[command(long_about = "Fetch normalized rental listings from a registered source and print them as JSON.")]
    Fetch(FetchCommand),

    /// List the registered sources
    #[command(about = "List the registered sources")]
    Sources,
}

#[derive(Parser)]
#[command(about = "Fetch rental listings")]
struct FetchCommand {
    /// Source identifier, case-insensitive (-s, --source)
    #[arg(short = 's', long)]
    source: String,

    /// Type of property to search for (-t, --property-type)
    #[arg(short = 't', long, default_value = "casa")]
    property_type: String,

    /// Province to search in (-p, --province)
    #[arg(short = 'p', long, default_value = "mendoza")]
    province: String,

    /// Cities to search in (-c, --cities). Can be specified multiple times.
    #[arg(short = 'c', long, num_args = 1.., value_delimiter = ',')]
    cities: Vec<String>,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();
    let registry = SourceRegistry::with_defaults();

    match cli.command {
        Commands::Fetch(cmd) => {
            let criteria = SearchCriteria::new(cmd.property_type, cmd.province, cmd.cities);
            let records = match registry.get_listings(&cmd.source, &criteria).await {
                Ok(records) => records,
                Err(err) => {
                    if let RentaError::SourceUnavailable { ref cause, .. } = err {
                        error!(
                            "{} is unreachable (would answer {}): {}",
                            cmd.source,
                            cause.suggested_status(),
                            err
                        );
                    }
                    return Err(err);
                }
            };

            info!("fetched {} listings from {}", records.len(), cmd.source);
            let output = if cmd.pretty {
                serde_json::to_string_pretty(&records)
            } else {
                serde_json::to_string(&records)
            }
            .map_err(|e| RentaError::Extraction(e.to_string()))?;
            println!("{}", output);
        }
        Commands::Sources => {
            for id in registry.source_ids() {
                println!("{}", id);
            }
        }
    }

    Ok(())
}
