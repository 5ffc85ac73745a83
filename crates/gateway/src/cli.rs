//! Command-line interface.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use mg_domain::config::Config;
use mg_policy::validate_bundle;

#[derive(Parser)]
#[command(name = "medgate", about = "Conversational healthcare-scheduling gateway")]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the gateway server (default).
    Serve,
    /// Rule bundle tooling.
    Rules {
        #[command(subcommand)]
        command: RulesCommand,
    },
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
pub enum RulesCommand {
    /// Validate rule bundle files against the v1 contract.
    Validate {
        /// JSON bundle files to validate.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Only print summary counts instead of detailed problems.
        #[arg(long)]
        summary: bool,
    },
}

/// Load the configuration: file if present, defaults otherwise, then
/// environment overrides on top.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let mut config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
            toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))?
        }
        None => Config::default(),
    };
    config.apply_env();
    Ok(config)
}

/// Validate bundle files; prints per-problem location and message.
/// Returns `true` when every file is clean.
pub fn validate_rule_files(paths: &[PathBuf], summary: bool) -> bool {
    let mut clean = true;

    for path in paths {
        let problems = validate_file(path);
        if problems.is_empty() {
            if !summary {
                println!("{}: OK", path.display());
            }
            continue;
        }

        clean = false;
        if summary {
            println!("{}: {} issue(s) found", path.display(), problems.len());
        } else {
            println!("{}:", path.display());
            for (location, message) in &problems {
                println!("  - {location}: {message}");
            }
        }
    }

    clean
}

fn validate_file(path: &Path) -> Vec<(String, String)> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return vec![(path.display().to_string(), "File not found".into())],
    };

    let bundle: serde_json::Value = match serde_json::from_str(&raw) {
        Ok(bundle) => bundle,
        Err(e) => {
            return vec![(
                path.display().to_string(),
                format!(
                    "Invalid JSON at line {} column {}: {e}",
                    e.line(),
                    e.column()
                ),
            )]
        }
    };

    validate_bundle(&bundle)
        .into_iter()
        .map(|p| (p.location, p.message))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn clean_bundle_file_validates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "{}",
            mg_policy::starter::starter_pack_bundle("starter-pack")
        )
        .unwrap();
        assert!(validate_rule_files(&[file.path().to_path_buf()], false));
    }

    #[test]
    fn broken_bundle_file_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"bundle_id\": 5}}").unwrap();
        assert!(!validate_rule_files(&[file.path().to_path_buf()], true));
    }

    #[test]
    fn missing_file_fails() {
        assert!(!validate_rule_files(
            &[PathBuf::from("/nonexistent/bundle.json")],
            false
        ));
    }
}
