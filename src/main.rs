use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use helpdesk_client::{Config, Endpoint, HelpdeskClient, Record, ResultGenerator};
use serde_json::Value;
use std::fs::OpenOptions;
use std::path::PathBuf;
use tracing_appender::non_blocking;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "hdc")]
#[command(about = "Query a helpdesk from the command line")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/hdc/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Print one record
  Show { kind: String, id: String },
  /// Print records of a kind, one JSON object per line
  List {
    kind: String,
    #[arg(short, long)]
    limit: Option<usize>,
  },
  /// Print the number of records of a kind
  Count { kind: String },
  /// Print search results, one JSON object per line
  Search {
    query: String,
    #[arg(short, long)]
    limit: Option<usize>,
  },
}

/// File logging under the data dir; stdout is reserved for command output.
fn init_logging() -> Result<WorkerGuard> {
  let log_dir = dirs::data_dir()
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("hdc");
  std::fs::create_dir_all(&log_dir)?;

  let log_file = OpenOptions::new()
    .create(true)
    .append(true)
    .open(log_dir.join("hdc.log"))?;
  let (writer, guard) = non_blocking(log_file);

  let env_filter =
    EnvFilter::try_from_env("HDC_LOG").unwrap_or_else(|_| EnvFilter::new("helpdesk_client=info"));

  let file_layer = tracing_subscriber::fmt::layer()
    .with_writer(writer)
    .with_target(true)
    .with_ansi(false)
    .with_filter(env_filter);

  tracing_subscriber::registry().with(file_layer).init();
  Ok(guard)
}

fn print_record(record: &Record) -> Result<()> {
  println!("{}", serde_json::to_string(&Value::Object(record.to_full_map()))?);
  Ok(())
}

fn print_stream(records: ResultGenerator, limit: Option<usize>) -> Result<()> {
  for record in records.take(limit.unwrap_or(usize::MAX)) {
    print_record(&record?)?;
  }
  Ok(())
}

fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging()?;

  let config = Config::load(args.config.as_deref())?;
  let client = HelpdeskClient::new(&config)?;

  match args.command {
    Command::Show { kind, id } => print_record(&client.get(&Endpoint::for_kind(&kind), id)?)?,
    Command::List { kind, limit } => print_stream(client.list(&Endpoint::for_kind(&kind))?, limit)?,
    Command::Count { kind } => println!("{}", client.count(&Endpoint::for_kind(&kind))?),
    Command::Search { query, limit } => print_stream(client.search(&query)?, limit)?,
  }

  Ok(())
}
