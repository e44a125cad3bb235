use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use composite_assets::url_keys::decode_paths;
use composite_assets::{
  CompositeConfig, CompositeUrlRequest, Dependency, DependencyType, InMemoryFileMap,
  UrlKeyStrategy,
};

#[derive(Debug, Parser)]
#[command(name = "composite-assets", version, about = "Build and inspect composite asset URLs")]
struct Cli {
  /// Configuration file; defaults to composite.config.json in the current directory.
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
  /// Print the composite URLs for a list of dependencies.
  Urls {
    /// Dependency type: css or js.
    #[arg(long = "type", value_parser = parse_type)]
    dependency_type: DependencyType,
    /// Override the configured urlType.
    #[arg(long)]
    strategy: Option<String>,
    /// Dependency paths in serving order.
    #[arg(required = true)]
    paths: Vec<String>,
  },
  /// Print the paths encoded in a composite URL token.
  Decode {
    /// Value of the `s` parameter or the dependency id path segment.
    token: String,
  },
  /// Report whether a host may be bundled under the configured bundle domains.
  CheckDomain {
    /// Host name to check.
    host: String,
    /// Port the resource is served on.
    #[arg(long, default_value_t = 80)]
    port: u16,
  },
}

fn parse_type(value: &str) -> Result<DependencyType, String> {
  value.parse()
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();
  let config = match &cli.config {
    Some(path) => CompositeConfig::load(path)
      .with_context(|| format!("failed to load {}", path.display()))?,
    None => CompositeConfig::discover(&std::env::current_dir()?),
  };

  match cli.command {
    Command::Urls {
      dependency_type,
      strategy,
      paths,
    } => {
      let settings = config.into_settings()?;
      let strategy = match strategy {
        Some(name) => UrlKeyStrategy::parse(&name)
          .ok_or_else(|| anyhow!("unknown strategy `{name}`"))?,
        None => settings.strategy,
      };
      let request = CompositeUrlRequest::from_settings(
        &settings,
        dependency_type,
        paths
          .into_iter()
          .map(|path| Dependency::new(path, dependency_type))
          .collect(),
      );

      let file_map = InMemoryFileMap::new();
      let urls = settings
        .url_builder()
        .with_map_provider(&file_map)
        .build(&request, strategy)?;
      for url in urls {
        println!("{url}");
      }
    }
    Command::Decode { token } => {
      for path in decode_paths(&token)? {
        println!("{path}");
      }
    }
    Command::CheckDomain { host, port } => {
      let settings = config.into_settings()?;
      let verdict = if settings.whitelist.matches(&host, port) {
        "allowed"
      } else {
        "denied"
      };
      println!("{verdict}");
    }
  }

  Ok(())
}
