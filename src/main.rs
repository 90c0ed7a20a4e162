use clap::{Parser, Subcommand, ValueEnum};
use docpipe::build::{self, Project};
use docpipe::config;
use docpipe::context::{BuildContext, BuildMode};
use docpipe::output;
use docpipe::watch;
use std::path::{Path, PathBuf};
use tracing::error;

#[derive(Parser)]
#[command(name = "docpipe")]
#[command(about = "Content build pipeline for multi-device documentation sites")]
#[command(long_about = "\
Content build pipeline for multi-device documentation sites

Markdown sources go in; pages, per-device variants, redirect stubs and a
search index come out.

Project structure:

  project/
  ├── config.toml          # Build settings (optional)
  ├── devices.json         # Device catalog: { \"photon\": { \"wifi\": true } }
  ├── redirects.json       # Static redirects: { \"old/page\": \"new/page\" }
  └── src/
      ├── index.md
      └── reference/
          └── firmware.md  # devices = [\"photon\", \"electron\"] forks this page

Documents may open with TOML frontmatter fenced by +++.

Set SEARCH_INDEX=0 to skip the search index.
Run 'docpipe gen-config' to generate a documented config.toml.")]
#[command(version)]
struct Cli {
    /// Project root (where config.toml lives)
    #[arg(long, default_value = ".", global = true)]
    root: PathBuf,

    /// More log output (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Build the site into the destination directory
    Build,
    /// Build for review, always including the search index
    Preview,
    /// Build, then rebuild whenever a source file changes
    Dev,
    /// Run the whole pipeline without writing anything
    Check,
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    match cli.command {
        Command::Build => build_once(&cli.root, BuildMode::Build)?,
        Command::Preview => build_once(&cli.root, BuildMode::Preview)?,
        Command::Dev => {
            // a broken initial build shouldn't stop the watcher; the next save may fix it
            if let Err(e) = build_once(&cli.root, BuildMode::Development) {
                error!(error = %e, "initial build failed");
            }
            watch::watch(&cli.root, BuildMode::Development)?;
        }
        Command::Check => {
            let project = Project::load(&cli.root)?;
            let context = BuildContext::from_env(&cli.root, BuildMode::Build, &project.config);
            let pool = build::worker_pool(&context)?;
            let outcome = build::run(&project, &context, &pool)?;

            output::print_pipeline(&outcome.stages);
            println!();
            output::print_pages(&outcome.files);
            println!();
            let summary =
                output::summarize(&outcome.files, &outcome.excluded, &project.config.search.path);
            output::print_build_summary(&summary, &outcome.excluded, None);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

fn build_once(root: &Path, mode: BuildMode) -> Result<(), Box<dyn std::error::Error>> {
    let project = Project::load(root)?;
    let context = BuildContext::from_env(root, mode, &project.config);
    let outcome = build::build_site(&project, &context)?;

    let summary = output::summarize(&outcome.files, &outcome.excluded, &project.config.search.path);
    output::print_build_summary(
        &summary,
        &outcome.excluded,
        Some((outcome.written, &project.destination_dir())),
    );
    Ok(())
}

fn init_tracing(verbose: u8, format: LogFormat) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match verbose {
        0 => "docpipe=info",
        1 => "docpipe=debug",
        _ => "docpipe=trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match format {
        LogFormat::Text => fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}
