//! Config validation CLI tool
//!
//! Validates a wonderland configuration file and reports any errors.

use std::path::PathBuf;
use std::process::ExitCode;
use wonderland_util::default_config_path;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a wonderland configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match wonderland_config::load_config(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", wonderland_config::CURRENT_CONFIG_VERSION);
            println!("  Socket: {}", config.socket_path.display());
            println!(
                "  Channels: {}{}<id>",
                config.channel_dir.display(),
                config.channel_prefix
            );
            println!("  Max payload: {} bytes", config.max_payload_bytes);
            println!("  Server version: {}", config.server_version);
            match config.read_timeout {
                Some(timeout) => println!("  Read timeout: {}s", timeout.as_secs()),
                None => println!("  Read timeout: none"),
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                wonderland_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                wonderland_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                wonderland_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                wonderland_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        wonderland_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
