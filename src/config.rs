use std::str::FromStr;
use std::time::Duration;

// ── Defaults ─────────────────────────────────────────────────────────────────

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_MAX_IMAGE_SIZE: usize = 32 * 1024 * 1024;
const DEFAULT_MAX_BATCH_SIZE: usize = 10;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
#[error("invalid value {value:?} for {var}")]
pub struct ConfigError {
    var: &'static str,
    value: String,
}

// ── Config ───────────────────────────────────────────────────────────────────

/// Service limits, loaded once at startup and passed to constructors.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub max_image_size: usize,
    pub max_batch_size: usize,
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_image_size: DEFAULT_MAX_IMAGE_SIZE,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl Config {
    /// Load from `PORT`, `MAX_IMAGE_SIZE`, `MAX_BATCH_SIZE` and
    /// `REQUEST_TIMEOUT`. Unset or empty variables fall back to defaults;
    /// values that fail to parse are a startup error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            port: parse_var(&lookup, "PORT", DEFAULT_PORT)?,
            max_image_size: parse_var(&lookup, "MAX_IMAGE_SIZE", DEFAULT_MAX_IMAGE_SIZE)?,
            max_batch_size: parse_var(&lookup, "MAX_BATCH_SIZE", DEFAULT_MAX_BATCH_SIZE)?,
            request_timeout: Duration::from_secs(parse_var(
                &lookup,
                "REQUEST_TIMEOUT",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?),
        })
    }

    /// Request body ceiling: a full batch of images, with headroom for base64
    /// expansion and JSON framing.
    pub fn body_limit(&self) -> usize {
        self.max_image_size.saturating_mul(self.max_batch_size).saturating_mul(2)
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var).filter(|raw| !raw.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError { var, value: raw }),
        None => Ok(default),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
