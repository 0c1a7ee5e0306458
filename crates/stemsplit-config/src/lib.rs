//! Environment-derived configuration for the Stemsplit service.
//!
//! # Design
//! - One immutable snapshot assembled at startup; no runtime mutation.
//! - Every value carries a default so a bare environment still boots.
//! - Parse failures are structured errors naming the offending variable.
#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions, clippy::multiple_crate_versions)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors produced while assembling the service configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable held a value that failed to parse.
    #[error("invalid configuration value")]
    InvalidValue {
        /// Variable that failed to parse.
        variable: &'static str,
        /// Offending value.
        value: String,
        /// Static reason for the failure.
        reason: &'static str,
    },
}

/// Default listener address when neither `STEMSPLIT_BIND_ADDR` nor `PORT` is set.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
/// Default root directory for per-job workspaces.
pub const DEFAULT_WORKSPACE_ROOT: &str = "/tmp/stemsplit";
/// Default separation tool binary resolved via `PATH`.
pub const DEFAULT_TOOL_BINARY: &str = "spleeter";
/// Default hard deadline for a single separation run.
pub const DEFAULT_TOOL_DEADLINE: Duration = Duration::from_secs(300);
/// Default age threshold for the startup workspace sweep.
pub const DEFAULT_SWEEP_MAX_AGE: Duration = Duration::from_secs(3_600);
/// Default upload size cap (25 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 25 * 1024 * 1024;

/// Immutable service configuration snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceConfig {
    /// Address the HTTP listener binds to.
    pub bind_addr: SocketAddr,
    /// Root directory under which per-job workspaces are created.
    pub workspace_root: PathBuf,
    /// Separation tool executable (name or absolute path).
    pub tool_binary: String,
    /// Hard wall-clock deadline for one separation run.
    pub tool_deadline: Duration,
    /// Entries under the workspace root older than this are swept at startup.
    pub sweep_max_age: Duration,
    /// Maximum accepted upload payload size in bytes.
    pub max_upload_bytes: u64,
}

impl ServiceConfig {
    /// Assemble the configuration from the process environment.
    ///
    /// `PORT` (as used by container platforms) overrides the port component of
    /// the bind address unless `STEMSPLIT_BIND_ADDR` is set explicitly.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any present variable fails to parse.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Assemble the configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any present variable fails to parse.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let bind_addr = match lookup("STEMSPLIT_BIND_ADDR") {
            Some(raw) => parse_socket_addr("STEMSPLIT_BIND_ADDR", &raw)?,
            None => {
                let mut addr = parse_socket_addr("STEMSPLIT_BIND_ADDR", DEFAULT_BIND_ADDR)?;
                if let Some(raw_port) = lookup("PORT") {
                    let port = raw_port.trim().parse::<u16>().map_err(|_| {
                        ConfigError::InvalidValue {
                            variable: "PORT",
                            value: raw_port.clone(),
                            reason: "expected a TCP port number",
                        }
                    })?;
                    addr.set_port(port);
                }
                addr
            }
        };

        let workspace_root = lookup("STEMSPLIT_WORKSPACE_ROOT")
            .map_or_else(|| PathBuf::from(DEFAULT_WORKSPACE_ROOT), PathBuf::from);

        let tool_binary = lookup("STEMSPLIT_TOOL")
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TOOL_BINARY.to_string());

        let tool_deadline = match lookup("STEMSPLIT_TOOL_DEADLINE_SECS") {
            Some(raw) => parse_secs("STEMSPLIT_TOOL_DEADLINE_SECS", &raw)?,
            None => DEFAULT_TOOL_DEADLINE,
        };

        let sweep_max_age = match lookup("STEMSPLIT_SWEEP_MAX_AGE_SECS") {
            Some(raw) => parse_secs("STEMSPLIT_SWEEP_MAX_AGE_SECS", &raw)?,
            None => DEFAULT_SWEEP_MAX_AGE,
        };

        let max_upload_bytes = match lookup("STEMSPLIT_MAX_UPLOAD_BYTES") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                ConfigError::InvalidValue {
                    variable: "STEMSPLIT_MAX_UPLOAD_BYTES",
                    value: raw.clone(),
                    reason: "expected a byte count",
                }
            })?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        Ok(Self {
            bind_addr,
            workspace_root,
            tool_binary,
            tool_deadline,
            sweep_max_age,
            max_upload_bytes,
        })
    }
}

fn parse_socket_addr(variable: &'static str, raw: &str) -> ConfigResult<SocketAddr> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            variable,
            value: raw.to_string(),
            reason: "expected host:port",
        })
}

fn parse_secs(variable: &'static str, raw: &str) -> ConfigResult<Duration> {
    let secs = raw
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidValue {
            variable,
            value: raw.to_string(),
            reason: "expected a duration in whole seconds",
        })?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            variable,
            value: raw.to_string(),
            reason: "duration must be positive",
        });
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let map: HashMap<&'static str, String> = pairs
            .iter()
            .map(|(key, value)| (*key, (*value).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_on_empty_environment() -> ConfigResult<()> {
        let config = ServiceConfig::from_lookup(|_| None)?;
        assert_eq!(config.bind_addr.port(), 8000);
        assert_eq!(config.workspace_root, PathBuf::from(DEFAULT_WORKSPACE_ROOT));
        assert_eq!(config.tool_binary, DEFAULT_TOOL_BINARY);
        assert_eq!(config.tool_deadline, DEFAULT_TOOL_DEADLINE);
        assert_eq!(config.sweep_max_age, DEFAULT_SWEEP_MAX_AGE);
        assert_eq!(config.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        Ok(())
    }

    #[test]
    fn port_variable_overrides_default_bind_port() -> ConfigResult<()> {
        let config = ServiceConfig::from_lookup(lookup_from(&[("PORT", "9090")]))?;
        assert_eq!(config.bind_addr.port(), 9090);
        Ok(())
    }

    #[test]
    fn explicit_bind_addr_wins_over_port() -> ConfigResult<()> {
        let config = ServiceConfig::from_lookup(lookup_from(&[
            ("STEMSPLIT_BIND_ADDR", "127.0.0.1:7070"),
            ("PORT", "9090"),
        ]))?;
        assert_eq!(config.bind_addr, "127.0.0.1:7070".parse().unwrap());
        Ok(())
    }

    #[test]
    fn invalid_deadline_is_rejected() {
        let err = ServiceConfig::from_lookup(lookup_from(&[(
            "STEMSPLIT_TOOL_DEADLINE_SECS",
            "soon",
        )]))
        .expect_err("non-numeric deadline should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                variable: "STEMSPLIT_TOOL_DEADLINE_SECS",
                ..
            }
        ));
    }

    #[test]
    fn zero_sweep_age_is_rejected() {
        let err = ServiceConfig::from_lookup(lookup_from(&[(
            "STEMSPLIT_SWEEP_MAX_AGE_SECS",
            "0",
        )]))
        .expect_err("zero age should fail");
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn custom_tool_and_root_are_honoured() -> ConfigResult<()> {
        let config = ServiceConfig::from_lookup(lookup_from(&[
            ("STEMSPLIT_TOOL", "/opt/separator/bin/spleeter"),
            ("STEMSPLIT_WORKSPACE_ROOT", "/var/lib/stemsplit"),
            ("STEMSPLIT_MAX_UPLOAD_BYTES", "1048576"),
        ]))?;
        assert_eq!(config.tool_binary, "/opt/separator/bin/spleeter");
        assert_eq!(config.workspace_root, PathBuf::from("/var/lib/stemsplit"));
        assert_eq!(config.max_upload_bytes, 1_048_576);
        Ok(())
    }
}
