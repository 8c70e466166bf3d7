//! Command line front end of `dopfetch`.
//!
//! The `dopfetch` binary reads an optional YAML configuration, applies
//! command line overrides and runs the multi-state downloader, writing a
//! `dataset.json` manifest into every state directory.

pub mod config;
mod error;
pub mod run;

pub use config::{DownloadConfig, Overrides, Product};
pub use error::CliError;
pub use dopfetch::MANIFEST_FILE_NAME;
pub use run::{load_mask, run_download, AreaInput, DownloadSummary, StateSummary};
