use clap::Parser;
use photopack::{config, output, pack};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "photopack")]
#[command(about = "Build photo packs from a library of originals")]
#[command(long_about = "\
Build photo packs from a library of originals

Every photo under <basepath>/<originaldir> is scanned for metadata (file
facts, EXIF, XMP) into <basepath>/<exportindex>. Each pack selects photos by
criteria; each format renders the selected photos at its size and quality,
then applies its watermarks in order.

Output layout:

  <basepath>/
  ├── index.json                   # Metadata index, rewritten every run
  ├── 20240309170502.log           # Run log: {success: [...], error: [...]}
  └── <outputdir>/
      └── <pack>/
          └── <format>/
              └── <photo>.jpg

Exit status: 0 clean run, 1 run aborted, 2 run finished with item errors.")]
#[command(version)]
struct Cli {
    /// Configuration file (JSON, or TOML by extension)
    #[arg(value_name = "CONFIG", required_unless_present = "config")]
    config_path: Option<PathBuf>,

    /// Configuration file, as a flag
    #[arg(long, short, conflicts_with = "config_path")]
    config: Option<PathBuf>,

    /// Scan and select, but do not generate renditions
    #[arg(long)]
    dry_run: bool,

    /// Upper bound on parallel workers (clamped to the core count)
    #[arg(long)]
    max_processes: Option<usize>,

    /// Log debug detail, including per-item progress
    #[arg(long, short)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let Some(path) = cli.config_path.or(cli.config) else {
        error!("no configuration file given");
        return ExitCode::from(1);
    };

    let config = match config::load_config(&path) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %path.display(), error = %e, "cannot load configuration");
            return ExitCode::from(1);
        }
    };

    let options = pack::RunOptions {
        dry_run: cli.dry_run,
        max_processes: cli.max_processes,
        observer: Some(output::progress_logger()),
    };
    match pack::run(&config, options) {
        Ok(report) => {
            output::print_run_summary(&report);
            if report.is_clean() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }
        Err(e) => {
            error!(error = %e, "run aborted");
            ExitCode::from(1)
        }
    }
}
