//! nwb-cli: convert one LIMS ecephys session into an NWB session document
//!
//! ```text
//! nwb-cli <ecephys_session_id> [--nwb-path PATH] [--remove-file] [--config FILE]
//! ```
//!
//! The document is written to `<ecephys_session_id>.nwb` unless `--nwb-path`
//! is given, overwriting any file already there. `--remove-file` deletes the
//! target first and fails if there is nothing to delete.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use nwb_core::io::{write_document, WriteMode};
use nwb_core::LimsNwbConfig;
use nwb_ingest::pipeline::{build_document, default_nwb_path, report_for};
use nwb_ingest::LimsSessionSource;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_CONFIG: &str = "lims_nwb.toml";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "nwb-cli",
    version,
    about = "Write a LIMS ecephys session to an NWB session document"
)]
struct Cli {
    /// LIMS ecephys session id (e.g. 754312389)
    ecephys_session_id: i64,

    /// Output path [default: <ecephys_session_id>.nwb]
    #[arg(long)]
    nwb_path: Option<PathBuf>,

    /// Delete the file at the output path before writing (it must exist)
    #[arg(long)]
    remove_file: bool,

    /// Configuration file (optional; missing file means defaults)
    #[arg(short, long, env = "LIMS_NWB_CONFIG", default_value = DEFAULT_CONFIG)]
    config: String,
}

impl Cli {
    fn output_path(&self) -> PathBuf {
        self.nwb_path
            .clone()
            .unwrap_or_else(|| default_nwb_path(self.ecephys_session_id))
    }

    fn write_mode(&self) -> WriteMode {
        if self.remove_file {
            WriteMode::RemoveFirst
        } else {
            WriteMode::Overwrite
        }
    }
}

// ============================================================================
// Main
// ============================================================================

async fn run(cli: Cli) -> anyhow::Result<()> {
    let start = Instant::now();
    let config = LimsNwbConfig::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config))?;
    let path = cli.output_path();

    let source = LimsSessionSource::connect(&config.database)
        .await
        .context("failed to connect to LIMS")?;
    match source.health_check().await {
        Ok(version) => tracing::info!("Connected to LIMS: {}", version),
        Err(e) => {
            source.close().await;
            return Err(e).context("LIMS health check failed");
        }
    }
    let built = build_document(&source, cli.ecephys_session_id, &config).await;
    source.close().await;
    let doc = built?;

    write_document(&doc, &path, cli.write_mode())
        .with_context(|| format!("failed to write {}", path.display()))?;

    let report = report_for(&doc, cli.ecephys_session_id, &path, start);
    tracing::info!(
        "Session {} written to {}: {} probes, {} electrodes, {} units in {}ms",
        report.session_id,
        report.path.display(),
        report.probes,
        report.electrodes,
        report.units,
        report.elapsed_ms
    );
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Load .env file if present (LIMS_DATABASE_URL in development)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("nwb-cli: {:#}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // ========================================================================
    // TEST 1: output path defaults to <session_id>.nwb
    // ========================================================================
    #[test]
    fn test_default_output_path() {
        let cli = Cli::parse_from(["nwb-cli", "754312389"]);
        assert_eq!(cli.output_path(), PathBuf::from("754312389.nwb"));
        assert_eq!(cli.write_mode(), WriteMode::Overwrite);
        assert_eq!(cli.config, DEFAULT_CONFIG);
    }

    // ========================================================================
    // TEST 2: explicit path and --remove-file
    // ========================================================================
    #[test]
    fn test_explicit_path_and_remove_flag() {
        let cli = Cli::parse_from([
            "nwb-cli",
            "754312389",
            "--nwb-path",
            "/tmp/session.nwb",
            "--remove-file",
        ]);
        assert_eq!(cli.output_path(), PathBuf::from("/tmp/session.nwb"));
        assert_eq!(cli.write_mode(), WriteMode::RemoveFirst);
    }

    // ========================================================================
    // TEST 3: session id must be an integer
    // ========================================================================
    #[test]
    fn test_non_integer_session_id_rejected() {
        assert!(Cli::try_parse_from(["nwb-cli", "session-abc"]).is_err());
        assert!(Cli::try_parse_from(["nwb-cli"]).is_err());
    }
}
