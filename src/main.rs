//! Drive Uploadr - quota-aware Google Drive uploader
//!
//! Uploads a file or a zipped directory to a Drive folder, optionally
//! evicting the service account's oldest files to make room.

use anyhow::Context;
use clap::{ArgAction, Parser};
use drive_uploadr::config::{
    default_api_url, default_page_size, Config, DriveSettings, UploadSettings,
};
use drive_uploadr::drive::auth::ServiceAccountKey;
use drive_uploadr::drive::DriveClient;
use drive_uploadr::logging::{self, LogFormat};
use drive_uploadr::pipeline::UploadPipeline;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

/// Drive Uploadr - upload a file or directory to Google Drive
#[derive(Parser, Debug)]
#[command(name = "drive-uploadr")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML configuration file (replaces the upload flags)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// File or directory to upload
    #[arg(long, env = "src_path", required_unless_present = "config")]
    src_path: Option<PathBuf>,

    /// Drive folder id to upload into
    #[arg(long, env = "dest_folder", required_unless_present = "config")]
    dest_folder: Option<String>,

    /// Remote name without extension (defaults to the source name)
    #[arg(long, env = "dest_file_name")]
    dest_file_name: Option<String>,

    /// Base64-encoded service account key
    #[arg(
        long,
        env = "credentials",
        hide_env_values = true,
        required_unless_present = "config"
    )]
    credentials: Option<String>,

    /// Delete the oldest owned files when the quota is short
    #[arg(long, env = "auto_delete", action = ArgAction::SetTrue, value_parser = exact_true)]
    auto_delete: bool,

    /// Destination folder is on a shared drive
    #[arg(long, env = "is_shared_drive", action = ArgAction::SetTrue, value_parser = exact_true)]
    shared_drive: bool,

    /// Drive API root
    #[arg(long, env = "DRIVE_API_URL", default_value_t = default_api_url())]
    api_url: String,

    /// Files listed per eviction pass (1-1000)
    #[arg(long, default_value_t = default_page_size())]
    page_size: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

/// Switch values: only the exact string `true` turns a switch on
fn exact_true(value: &str) -> Result<bool, std::convert::Infallible> {
    Ok(value == "true")
}

impl Args {
    fn into_config(self) -> anyhow::Result<Config> {
        if let Some(path) = &self.config {
            let config = Config::load(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?;
            info!("Loaded configuration from {:?}", path);
            return Ok(config);
        }

        let config = Config {
            upload: UploadSettings {
                source_path: self.src_path.unwrap_or_default(),
                destination_folder: self.dest_folder.unwrap_or_default(),
                file_name: self.dest_file_name.filter(|name| !name.trim().is_empty()),
                auto_delete: self.auto_delete,
                shared_drive: self.shared_drive,
            },
            drive: DriveSettings {
                credentials: self.credentials.unwrap_or_default(),
                api_url: self.api_url,
                page_size: self.page_size,
            },
        };
        config.validate()?;
        Ok(config)
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let key = ServiceAccountKey::from_base64(&config.drive.credentials)
        .context("decoding service account credentials")?;
    let client =
        DriveClient::from_service_account(key, &config.drive.api_url, config.drive.page_size)?;

    let outcome = UploadPipeline::new(client)
        .run(&config.upload_request())
        .await?;

    info!(
        name = %outcome.name,
        bytes = outcome.bytes,
        id = %outcome.remote_id,
        deleted = outcome.reclaim.as_ref().map_or(0, |report| report.deleted.len()),
        "Upload finished"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        let mut argv = vec!["drive-uploadr", "--config", "uploadr.yaml"];
        argv.extend_from_slice(args);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_switch_values_must_be_exactly_true() {
        assert!(exact_true("true").unwrap());
        for value in ["yes", "1", "TRUE", "on", "false", ""] {
            assert!(!exact_true(value).unwrap(), "value {:?}", value);
        }
    }

    #[test]
    fn test_bare_flags_enable_switches() {
        let args = parse(&["--auto-delete", "--shared-drive"]);
        assert!(args.auto_delete);
        assert!(args.shared_drive);

        let args = parse(&[]);
        assert!(!args.auto_delete);
        assert!(!args.shared_drive);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = logging::init(&args.log_level, args.log_format) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    info!("Starting Drive Uploadr v{}", drive_uploadr::VERSION);

    let result = match args.into_config() {
        Ok(config) => run(config).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
