use directories::ProjectDirs;
use log::LevelFilter;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use crate::lib::error::{ConfigError, Result};

/// Initialize the logger with file and console output
///
/// Console output goes to stderr so table/JSON/YAML output on stdout stays clean.
///
/// # Arguments
///
/// * `verbose` - Enable debug level logging
/// * `quiet` - Suppress console output (logs still written to file). Forced for the
///   interactive review, which owns the terminal.
///
/// # Platform-specific log locations
///
/// * **macOS**: `~/Library/Application Support/io.rightsizer.rightsizer/rightsizer.log`
/// * **Linux**: `~/.local/share/rightsizer/rightsizer.log`
/// * **Windows**: `C:\Users\<User>\AppData\Local\rightsizer\rightsizer\data\rightsizer.log`
///
pub fn init_logger(verbose: bool, quiet: bool) -> Result<PathBuf> {
    let log_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let log_path = log_file_path()?;

    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| ConfigError::InvalidValue(format!("Failed to open log file: {}", e)))?;

    // Dependencies only log warnings unless RUST_LOG says otherwise
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(LevelFilter::Warn)
        .filter_module("rightsizer", log_level)
        .parse_default_env()
        .format_timestamp_secs();

    if quiet {
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    } else {
        struct MultiWriter {
            stderr: std::io::Stderr,
            file: fs::File,
        }

        impl Write for MultiWriter {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.stderr.write_all(buf)?;
                self.file.write_all(buf)?;
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                self.stderr.flush()?;
                self.file.flush()?;
                Ok(())
            }
        }

        let multi_writer = MultiWriter {
            stderr: std::io::stderr(),
            file: log_file,
        };
        builder.target(env_logger::Target::Pipe(Box::new(multi_writer)));
    }

    builder.init();

    log::debug!("Logging to: {}", log_path.display());
    Ok(log_path)
}

fn log_file_path() -> Result<PathBuf> {
    if let Some(proj_dirs) = ProjectDirs::from("io", "rightsizer", "rightsizer") {
        let log_dir = proj_dirs.data_local_dir();
        fs::create_dir_all(log_dir).map_err(|e| {
            ConfigError::InvalidValue(format!("Failed to create log directory: {}", e))
        })?;
        return Ok(log_dir.join("rightsizer.log"));
    }

    // No home directory: log next to the working directory
    Ok(std::env::current_dir()
        .map_err(|e| ConfigError::InvalidValue(format!("Failed to get current directory: {}", e)))?
        .join("rightsizer.log"))
}
