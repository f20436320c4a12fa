// Configuration module for the Ok status server
// Resolution order for every setting: CLI flag > environment variable > default

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::ffi::OsString;

pub const DEFAULT_SERVER_IP: &str = "0.0.0.0";
pub const DEFAULT_SERVER_PORT: &str = "8080";
pub const DEFAULT_METRICS_PORT: &str = "2112";

/// Long flags that are also accepted with a single dash (`-ip`, `-port=8080`).
const SINGLE_DASH_FLAGS: &[&str] = &[
    "ip",
    "port",
    "metricsIP",
    "metricsPort",
    "log-level",
    "log-format",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Resolved bind and logging configuration. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OkConfig {
    pub server_ip: String,
    pub server_port: String,
    pub metrics_ip: String,
    pub metrics_port: String,
    pub log_level: LogLevel,
    pub log_format: LogFormat,
}

impl Default for OkConfig {
    fn default() -> Self {
        OkConfig {
            server_ip: DEFAULT_SERVER_IP.to_string(),
            server_port: DEFAULT_SERVER_PORT.to_string(),
            metrics_ip: DEFAULT_SERVER_IP.to_string(),
            metrics_port: DEFAULT_METRICS_PORT.to_string(),
            log_level: LogLevel::default(),
            log_format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Default, Parser)]
#[command(name = "ok")]
#[command(about = "Liveness/readiness status server with a request counter", long_about = None)]
#[command(version)]
pub struct CliArgs {
    /// Server IP address to bind to.
    #[arg(long = "ip")]
    pub ip: Option<String>,

    /// Server port.
    #[arg(long = "port")]
    pub port: Option<String>,

    /// Falls back to same IP as server.
    #[arg(long = "metricsIP")]
    pub metrics_ip: Option<String>,

    /// Metrics port.
    #[arg(long = "metricsPort")]
    pub metrics_port: Option<String>,

    /// Log level
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Log format
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,
}

impl OkConfig {
    /// Parse the process arguments and environment once.
    pub fn load() -> Result<Self> {
        let cli_args = CliArgs::parse_from(normalize_args(std::env::args_os()));
        Self::resolve(cli_args, process_env)
    }

    /// Merge flags over environment over defaults. `env` is only consulted,
    /// never mutated; an empty value counts as unset.
    pub fn resolve<F>(cli: CliArgs, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| env(key).filter(|value| !value.is_empty());

        let server_ip = cli
            .ip
            .or_else(|| lookup("IP"))
            .unwrap_or_else(|| DEFAULT_SERVER_IP.to_string());

        let server_port = cli
            .port
            .or_else(|| lookup("PORT"))
            .unwrap_or_else(|| DEFAULT_SERVER_PORT.to_string());

        // Falls back to the already-resolved server IP, not to its default.
        let metrics_ip = cli
            .metrics_ip
            .or_else(|| lookup("METRICS_IP"))
            .unwrap_or_else(|| server_ip.clone());

        let metrics_port = cli
            .metrics_port
            .or_else(|| lookup("METRICS_PORT"))
            .unwrap_or_else(|| DEFAULT_METRICS_PORT.to_string());

        let log_level = match cli.log_level {
            Some(level) => level,
            None => match lookup("LOG_LEVEL") {
                Some(level) => <LogLevel as ValueEnum>::from_str(&level, true)
                    .map_err(|e| anyhow::anyhow!("Invalid LOG_LEVEL {:?}: {}", level, e))?,
                None => LogLevel::default(),
            },
        };

        let log_format = match cli.log_format {
            Some(format) => format,
            None => match lookup("LOG_FORMAT") {
                Some(format) => <LogFormat as ValueEnum>::from_str(&format, true)
                    .map_err(|e| anyhow::anyhow!("Invalid LOG_FORMAT {:?}: {}", format, e))?,
                None => LogFormat::default(),
            },
        };

        Ok(OkConfig {
            server_ip,
            server_port,
            metrics_ip,
            metrics_port,
            log_level,
            log_format,
        })
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_ip, self.server_port)
    }

    pub fn metrics_address(&self) -> String {
        format!("{}:{}", self.metrics_ip, self.metrics_port)
    }
}

/// Reads a variable from the real process environment.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Rewrite single-dash long flags (`-ip`, `-metricsPort=2113`) into the
/// double-dash form clap understands. Stops at a bare `--`.
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut passthrough = false;

    args.into_iter()
        .map(Into::into)
        .map(|arg| {
            if passthrough {
                return arg;
            }

            let Some(text) = arg.to_str() else {
                return arg;
            };

            if text == "--" {
                passthrough = true;
                return arg;
            }

            if text.starts_with("--") {
                return arg;
            }

            match text.strip_prefix('-') {
                Some(flag) => {
                    let name = flag.split_once('=').map_or(flag, |(name, _)| name);
                    if SINGLE_DASH_FLAGS.contains(&name) {
                        OsString::from(format!("-{}", text))
                    } else {
                        arg
                    }
                }
                None => arg,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_leaves_program_name_and_values() {
        let args = normalize_args(["ok", "-port", "9000"]);
        assert_eq!(args, vec!["ok", "--port", "9000"]);
    }

    #[test]
    fn test_normalize_handles_equals_form() {
        let args = normalize_args(["ok", "-metricsPort=2113", "-metricsIP=127.0.0.1"]);
        assert_eq!(args, vec!["ok", "--metricsPort=2113", "--metricsIP=127.0.0.1"]);
    }

    #[test]
    fn test_normalize_ignores_unknown_and_short_flags() {
        let args = normalize_args(["ok", "-h", "-V", "-bogus", "--ip", "1.2.3.4"]);
        assert_eq!(args, vec!["ok", "-h", "-V", "-bogus", "--ip", "1.2.3.4"]);
    }

    #[test]
    fn test_normalize_stops_at_double_dash() {
        let args = normalize_args(["ok", "--", "-ip"]);
        assert_eq!(args, vec!["ok", "--", "-ip"]);
    }

    #[test]
    fn test_addresses_join_ip_and_port() {
        let config = OkConfig::default();
        assert_eq!(config.server_address(), "0.0.0.0:8080");
        assert_eq!(config.metrics_address(), "0.0.0.0:2112");
    }
}
