use clap::{Args, Parser, Subcommand};
use dopfetch::{delete_images, AreaOfInterest};
use dopfetch_cli::{load_mask, run_download, AreaInput, CliError, DownloadConfig, Overrides};
use geo::Area;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dopfetch", author, version, about = "Download German digital orthophotos tile by tile")]
struct Cli {
    /// YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter such as `debug` or `dopfetch=trace` (default: RUST_LOG, then info)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct AreaArgs {
    /// Area bounds in EPSG:25832
    #[arg(
        num_args = 4,
        value_names = ["WEST", "SOUTH", "EAST", "NORTH"],
        required_unless_present = "area",
        conflicts_with = "area"
    )]
    bounds: Vec<f64>,

    /// GeoJSON file with the area polygon instead of bounds
    #[arg(long)]
    area: Option<PathBuf>,
}

impl AreaArgs {
    fn input(&self) -> Result<AreaInput, CliError> {
        if let Some(path) = &self.area {
            return Ok(AreaInput::File(path.clone()));
        }
        match self.bounds.as_slice() {
            &[west, south, east, north] => Ok(AreaInput::Bounds([west, south, east, north])),
            other => Err(CliError::Config(format!("expected 4 bounds, got {}", other.len()))),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download imagery for an area, split by federal state
    Download {
        /// Name of the dataset
        name: String,

        #[command(flatten)]
        area: AreaArgs,

        /// GeoJSON polygon limiting which tiles are fetched
        #[arg(long)]
        mask: Option<PathBuf>,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// List the federal states an area intersects
    Detect {
        #[command(flatten)]
        area: AreaArgs,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Delete downloaded images and their directory
    Clean {
        /// Directories holding only PNG or TIFF files
        #[arg(required = true)]
        dirs: Vec<PathBuf>,
    },
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn load_config(path: Option<&PathBuf>, overrides: &Overrides) -> Result<DownloadConfig, CliError> {
    let mut config = match path {
        Some(path) => DownloadConfig::load(path)?,
        None => DownloadConfig::default(),
    };
    config.apply(overrides)?;
    Ok(config)
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Download {
            name,
            area,
            mask,
            overrides,
        } => {
            let config = load_config(cli.config.as_ref(), &overrides)?;
            let downloader = config.auto_downloader();
            let aoi: AreaOfInterest = area.input()?.load(config.area_crs)?;
            let mask = mask
                .map(|path| load_mask(&path, config.area_crs, downloader.crs()))
                .transpose()?;

            let summary = run_download(&downloader, &config, &name, &aoi, mask.as_ref())?;
            println!("{}", summary);
        }
        Command::Detect { area, overrides } => {
            let config = load_config(cli.config.as_ref(), &overrides)?;
            let downloader = config.auto_downloader();
            let aoi = area.input()?.load(config.area_crs)?;

            let states = downloader.detect_intersecting(&aoi)?;
            if states.is_empty() {
                println!("No federal states intersect with the given area");
            }
            for state in states {
                println!(
                    "{}\t{}\t{:.3} km²",
                    state.code,
                    state.name,
                    state.geometry.unsigned_area() / 1_000_000.0
                );
            }
        }
        Command::Clean { dirs } => {
            for dir in dirs {
                if delete_images(&dir)? {
                    println!("Deleted {}", dir.display());
                } else {
                    println!("Skipped {}", dir.display());
                }
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
