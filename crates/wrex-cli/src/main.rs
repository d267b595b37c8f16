use std::path::PathBuf;

use clap::{builder::ArgAction, Parser, Subcommand};
use console::{style, Emoji};
use errors::WrexCliError;
use tracing::{debug, trace};
use tracing_subscriber::EnvFilter;
use wrex::{start_query, ConnectionConfig, ReqwestTransport};

pub mod errors;

static LOOKING_GLASS: Emoji<'_, '_> = Emoji("🔍 ", "");
static BOOKS: Emoji<'_, '_> = Emoji("📚 ", "");
static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "");
static SAVE: Emoji<'_, '_> = Emoji("💾 ", "");
static WARNING: Emoji<'_, '_> = Emoji("⚠️  ", "");
static SUCCESS: Emoji<'_, '_> = Emoji("✨ ", "");

#[derive(Parser)]
#[command(author, version, about = "Retrieve complete Web of Science result sets and export them")]
struct Cli {
  /// Verbose mode (-v, -vv, -vvv)
  #[arg(
        short,
        long,
        action = ArgAction::Count,
        global = true,
        help = "Increase logging verbosity"
    )]
  verbose: u8,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Write a connection config file
  Init {
    /// Path where the config should be written
    #[arg(long, short)]
    path:  Option<PathBuf>,
    /// Web of Science API key, prompted for if not given
    #[arg(long, short)]
    key:   Option<String>,
    /// API base URL, if not the public endpoint
    #[arg(long, short)]
    url:   Option<String>,
    /// Overwrite an existing config without asking
    #[arg(long)]
    force: bool,
  },
  /// Run a search and export every retrieved record
  Search {
    /// Web of Science advanced search query, e.g. "TS=(graphene) AND PY=2019"
    query:           String,
    /// Config file to use instead of the default one
    #[arg(long, short)]
    config:          Option<PathBuf>,
    /// File to write the export to, stdout if not given
    #[arg(long, short)]
    output:          Option<PathBuf>,
    /// Only keep the first page of results
    #[arg(long)]
    first_page_only: bool,
    /// Records requested per page
    #[arg(long)]
    page_size:       Option<usize>,
  },
}

/// Setup logging with the specified verbosity level
fn setup_logging(verbosity: u8) {
  let filter = match verbosity {
    0 => "warn",
    1 => "info",
    2 => "debug",
    _ => "trace",
  };

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

  // stdout carries the export
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .with_file(true)
    .with_line_number(true)
    .with_target(true)
    .init();
}

/// Loads the given config file, else the default one, else the environment.
fn load_config(path: Option<PathBuf>) -> Result<ConnectionConfig, WrexCliError> {
  let path = path.or_else(|| Some(ConnectionConfig::default_path()).filter(|p| p.exists()));
  match path {
    Some(path) => {
      trace!("Using config at: {}", path.display());
      Ok(ConnectionConfig::load(&path)?)
    },
    None => {
      trace!("No config file found, reading the environment");
      Ok(ConnectionConfig::from_env()?)
    },
  }
}

#[tokio::main]
async fn main() -> Result<(), WrexCliError> {
  let cli = Cli::parse();
  setup_logging(cli.verbose);

  match cli.command {
    Commands::Init { path, key, url, force } => {
      let path = path.unwrap_or_else(|| {
        let default_path = ConnectionConfig::default_path();
        println!(
          "{} Using default config path: {}",
          style(BOOKS).cyan(),
          style(default_path.display()).yellow()
        );
        default_path
      });

      if path.exists() && !force {
        println!(
          "{} Config already exists at: {}",
          style(WARNING).yellow(),
          style(path.display()).yellow()
        );

        let confirm = dialoguer::Confirm::new()
          .with_prompt("Do you want to overwrite it?")
          .default(false)
          .interact()?;

        if !confirm {
          println!("{} Keeping existing config", style("ℹ").blue());
          return Ok(());
        }
      }

      let key = match key {
        Some(key) => key,
        None => dialoguer::Input::<String>::new()
          .with_prompt("Web of Science API key")
          .interact_text()?,
      };

      let mut config = ConnectionConfig::new(key)?;
      if let Some(url) = url {
        config = config.with_base_url(&url)?;
      }

      println!("{} Writing config to: {}", style(ROCKET).cyan(), style(path.display()).yellow());
      config.save(&path)?;
      debug!("Config: {config}");

      println!("{} Config written successfully!", style(SUCCESS).green());
      Ok(())
    },

    Commands::Search { query, config, output, first_page_only, page_size } => {
      let mut config = load_config(config)?;
      if let Some(page_size) = page_size {
        config = config.with_page_size(page_size);
      }
      debug!("{config}");

      eprintln!("{} Searching for: {}", style(LOOKING_GLASS).cyan(), style(&query).yellow());

      let transport = ReqwestTransport::new();
      let mut results = start_query(&transport, &config, &query).await?;
      eprintln!(
        "{} Found {} records, {} in the first page",
        style(SUCCESS).green(),
        style(results.total_found()).yellow(),
        style(results.len()).yellow()
      );

      if !first_page_only {
        let mut report = |done: usize, total: usize| {
          eprintln!("   {} {done}/{total}", style("Retrieved").green());
        };
        results.retrieve_all(&transport, Some(&mut report)).await?;
      }

      let status = results.status();
      if status.complete {
        eprintln!("{} {status}", style(SUCCESS).green());
      } else {
        eprintln!("{} {status}", style(WARNING).yellow());
      }

      match output {
        Some(path) => {
          results.write_export(&path, cli.verbose > 0).await?;
          eprintln!(
            "{} Saved {} records to: {}",
            style(SAVE).green(),
            style(results.len()).yellow(),
            style(path.display()).yellow()
          );
        },
        None => println!("{}", results.export(cli.verbose > 0)),
      }
      Ok(())
    },
  }
}
