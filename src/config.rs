//! Process configuration: CLI flags, with an optional `config.toml` overlay.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

/// Command-line flags, as specified in §6.
#[derive(Debug, Parser)]
#[command(name = "kvaultd", about = "An in-memory key/value server with leader/follower replication")]
pub struct Cli {
    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long)]
    pub bind: Option<String>,

    #[arg(long)]
    pub dir: Option<String>,

    #[arg(long)]
    pub dbfilename: Option<String>,

    /// `"<host> <port>"`, space-separated.
    #[arg(long)]
    pub replicaof: Option<String>,

    /// Optional overlay file, checked before CLI flags are applied.
    #[arg(long, default_value = "config.toml")]
    pub config_file: PathBuf,
}

/// The `config.toml` overlay shape. Every field is optional; anything absent
/// falls through to the built-in default, then to a CLI flag if given.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    port: Option<u16>,
    bind: Option<String>,
    dir: Option<String>,
    dbfilename: Option<String>,
    replicaof: Option<String>,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidReplicaof(String),
    FileUnreadable(PathBuf, std::io::Error),
    FileMalformed(PathBuf, toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidReplicaof(s) => {
                write!(f, "--replicaof must be \"<host> <port>\", got {s:?}")
            }
            ConfigError::FileUnreadable(path, e) => write!(f, "cannot read {}: {e}", path.display()),
            ConfigError::FileMalformed(path, e) => write!(f, "cannot parse {}: {e}", path.display()),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Fully resolved server configuration, CLI flags taking precedence over
/// `config.toml`, which takes precedence over built-in defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: String,
    pub dir: String,
    pub dbfilename: String,
    pub replicaof: Option<(String, u16)>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 6379, bind: "127.0.0.1".to_string(), dir: "/tmp".to_string(), dbfilename: "dump.rdb".to_string(), replicaof: None }
    }
}

fn parse_replicaof(s: &str) -> Result<(String, u16), ConfigError> {
    let mut parts = s.split_whitespace();
    let host = parts.next();
    let port = parts.next();
    match (host, port, parts.next()) {
        (Some(host), Some(port), None) => {
            let port: u16 = port.parse().map_err(|_| ConfigError::InvalidReplicaof(s.to_string()))?;
            Ok((host.to_string(), port))
        }
        _ => Err(ConfigError::InvalidReplicaof(s.to_string())),
    }
}

impl ServerConfig {
    pub fn load(cli: Cli) -> Result<Self, ConfigError> {
        let file = read_file_config(&cli.config_file)?;
        let mut cfg = ServerConfig::default();

        if let Some(port) = file.port {
            cfg.port = port;
        }
        if let Some(bind) = file.bind {
            cfg.bind = bind;
        }
        if let Some(dir) = file.dir {
            cfg.dir = dir;
        }
        if let Some(dbfilename) = file.dbfilename {
            cfg.dbfilename = dbfilename;
        }
        if let Some(replicaof) = file.replicaof {
            cfg.replicaof = Some(parse_replicaof(&replicaof)?);
        }

        if let Some(port) = cli.port {
            cfg.port = port;
        }
        if let Some(bind) = cli.bind {
            cfg.bind = bind;
        }
        if let Some(dir) = cli.dir {
            cfg.dir = dir;
        }
        if let Some(dbfilename) = cli.dbfilename {
            cfg.dbfilename = dbfilename;
        }
        if let Some(replicaof) = cli.replicaof {
            cfg.replicaof = Some(parse_replicaof(&replicaof)?);
        }

        Ok(cfg)
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let text = fs::read_to_string(path).map_err(|e| ConfigError::FileUnreadable(path.to_path_buf(), e))?;
    toml::from_str(&text).map_err(|e| ConfigError::FileMalformed(path.to_path_buf(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_replicaof() {
        assert_eq!(parse_replicaof("localhost 6380").unwrap(), ("localhost".to_string(), 6380));
    }

    #[test]
    fn rejects_malformed_replicaof() {
        assert!(parse_replicaof("localhost").is_err());
        assert!(parse_replicaof("localhost notaport").is_err());
        assert!(parse_replicaof("localhost 6380 extra").is_err());
    }

    #[test]
    fn default_config_matches_spec_defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.port, 6379);
        assert_eq!(cfg.bind, "127.0.0.1");
        assert_eq!(cfg.dir, "/tmp");
        assert_eq!(cfg.dbfilename, "dump.rdb");
    }
}
