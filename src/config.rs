//! Deployment-wide configuration (AMBIENT STACK: Configuration), read once
//! at startup — distinct from `session::Args`, which is the per-run,
//! per-target configuration the CLI builds from flags.

use std::env;

use anyhow::{anyhow, Context, Result};

use crate::telemetry::{RotatingWriter, TelemetrySink};

#[derive(Debug, Clone)]
pub struct RotationConfig {
    pub max_bytes: Option<u64>,
    pub keep: usize,
    pub compress: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub telemetry_file: Option<String>,
    pub rotation: RotationConfig,
    pub log_stdout: bool,
    pub http_timeout_ms: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let telemetry_file = env::var("SSTI_TELEMETRY_FILE").ok();

        let rotation = RotationConfig {
            max_bytes: parse_optional_u64("SSTI_LOG_MAX_BYTES")?,
            keep: parse_optional_u64("SSTI_LOG_ROTATE_KEEP")?.unwrap_or(1) as usize,
            compress: parse_bool_env("SSTI_LOG_ROTATE_COMPRESS")?.unwrap_or(false),
        };

        let log_stdout = parse_bool_env("SSTI_LOG_STDOUT")?.unwrap_or(false);
        let http_timeout_ms = parse_optional_u64("SSTI_HTTP_TIMEOUT_MS")?.unwrap_or(10_000);

        Ok(Self {
            telemetry_file,
            rotation,
            log_stdout,
            http_timeout_ms,
        })
    }

    /// Build the telemetry sink this config describes. A missing
    /// `telemetry_file` is not an error — the sink just has no backing
    /// writer and falls back to stdout mirroring alone.
    pub fn build_telemetry(&self) -> Result<TelemetrySink> {
        let writer = match &self.telemetry_file {
            Some(path) => {
                let writer = RotatingWriter::open(path, self.rotation.max_bytes, self.rotation.keep, self.rotation.compress)
                    .with_context(|| format!("failed to open SSTI_TELEMETRY_FILE '{}'", path))?;
                Some(writer)
            }
            None => None,
        };
        Ok(TelemetrySink::new(writer, self.log_stdout))
    }
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool_env(var: &str) -> Result<Option<bool>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => {
            parse_bool(&value).map(Some).ok_or_else(|| anyhow!("{} must be a boolean (true/false/1/0)", var))
        }
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::sync::Mutex;

    static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    #[test]
    fn parses_environment_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap();
        std::env::remove_var("SSTI_TELEMETRY_FILE");
        std::env::remove_var("SSTI_LOG_MAX_BYTES");
        std::env::remove_var("SSTI_LOG_ROTATE_KEEP");
        std::env::remove_var("SSTI_LOG_ROTATE_COMPRESS");
        std::env::remove_var("SSTI_LOG_STDOUT");
        std::env::remove_var("SSTI_HTTP_TIMEOUT_MS");

        let cfg = AppConfig::from_env().unwrap();
        assert!(cfg.telemetry_file.is_none());
        assert_eq!(cfg.rotation.keep, 1);
        assert!(!cfg.log_stdout);
        assert_eq!(cfg.http_timeout_ms, 10_000);
    }

    #[test]
    fn parses_full_configuration() {
        let _guard = ENV_MUTEX.lock().unwrap();
        std::env::set_var("SSTI_TELEMETRY_FILE", "/tmp/ssti-telemetry.log");
        std::env::set_var("SSTI_LOG_MAX_BYTES", "1024");
        std::env::set_var("SSTI_LOG_ROTATE_KEEP", "5");
        std::env::set_var("SSTI_LOG_ROTATE_COMPRESS", "true");
        std::env::set_var("SSTI_LOG_STDOUT", "1");
        std::env::set_var("SSTI_HTTP_TIMEOUT_MS", "2500");

        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.telemetry_file.as_deref(), Some("/tmp/ssti-telemetry.log"));
        assert_eq!(cfg.rotation.max_bytes, Some(1024));
        assert_eq!(cfg.rotation.keep, 5);
        assert!(cfg.rotation.compress);
        assert!(cfg.log_stdout);
        assert_eq!(cfg.http_timeout_ms, 2500);

        std::env::remove_var("SSTI_TELEMETRY_FILE");
        std::env::remove_var("SSTI_LOG_MAX_BYTES");
        std::env::remove_var("SSTI_LOG_ROTATE_KEEP");
        std::env::remove_var("SSTI_LOG_ROTATE_COMPRESS");
        std::env::remove_var("SSTI_LOG_STDOUT");
        std::env::remove_var("SSTI_HTTP_TIMEOUT_MS");
    }

    #[test]
    fn rejects_non_integer_max_bytes() {
        let _guard = ENV_MUTEX.lock().unwrap();
        std::env::set_var("SSTI_LOG_MAX_BYTES", "not-a-number");
        assert!(AppConfig::from_env().is_err());
        std::env::remove_var("SSTI_LOG_MAX_BYTES");
    }
}
