use clap::Parser;
use serde::Deserialize;
use silent_common::fingerprint::is_valid_pin;
use silent_common::types::{DEFAULT_HARD_MAX, DEFAULT_SOFT_MAX};
use silent_common::FrameLimits;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command-line interface for the chat client.
#[derive(Parser, Debug)]
#[command(name = "silentc", about = "Silent chat client")]
#[command(version)]
pub struct Cli {
    /// Path to a custom configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Server host; prompted for when omitted.
    #[arg(long)]
    pub host: Option<String>,

    /// Server port; prompted for when omitted.
    #[arg(long)]
    pub port: Option<u16>,

    /// Chat username; prompted for when omitted.
    #[arg(short, long)]
    pub username: Option<String>,

    /// Expected SHA-256 fingerprint of the server certificate.
    #[arg(long, env = "CHAT_SERVER_FINGERPRINT")]
    pub fingerprint: Option<String>,

    /// Increase log verbosity (repeat for more detail).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Write logs to a file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

/// Runtime configuration loaded from defaults, file, env and CLI.
///
/// Built once at startup and shared read-only.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ClientConfig {
    /// Pinned server certificate fingerprint. `None` means trust on first use.
    #[serde(default)]
    pub fingerprint: Option<String>,
    /// Frame size limits.
    pub limits: LimitsConfig,
    /// Network timeouts.
    pub timeouts: TimeoutConfig,
    /// Reconnect policy.
    pub reconnect: ReconnectConfig,
    /// Decoy traffic settings.
    pub decoy: DecoyConfig,
    /// Outbound send jitter.
    pub jitter: JitterConfig,
}

/// Frame body size limits, in bytes.
#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    /// Enforced on both encode and decode.
    pub soft_max_bytes: usize,
    /// Enforced on decode only; larger frames are treated as hostile.
    pub hard_max_bytes: usize,
}

/// Network timeouts, in milliseconds.
#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutConfig {
    /// Budget for TCP connect plus TLS handshake.
    pub dial_ms: u64,
    /// How long to wait for the authentication reply.
    pub auth_ms: u64,
    /// Per-read deadline in the receive loop. 0 disables it.
    pub read_ms: u64,
}

/// Reconnect policy parameters.
#[derive(Debug, Deserialize, Clone)]
pub struct ReconnectConfig {
    /// Delay between attempts while below `max_retries`, in milliseconds.
    pub delay_ms: u64,
    /// Extra delay added per failure at or beyond `max_retries`, in milliseconds.
    pub backoff_increment_ms: u64,
    /// Failures tolerated before the delay starts escalating.
    pub max_retries: u32,
    /// Ceiling for the escalating delay, in milliseconds. 0 means no ceiling.
    pub max_delay_ms: u64,
    /// Delay after the server rejects the credentials, in milliseconds.
    pub auth_fail_delay_ms: u64,
}

/// Decoy traffic settings.
#[derive(Debug, Deserialize, Clone)]
pub struct DecoyConfig {
    /// Whether decoy frames are sent at all.
    pub enabled: bool,
    /// Lower bound of the randomly chosen period, in seconds.
    pub min_period_s: u64,
    /// Upper bound of the randomly chosen period, in seconds.
    pub max_period_s: u64,
    /// Minimum filler length, in characters.
    pub min_len: usize,
    /// Maximum filler length, in characters.
    pub max_len: usize,
}

/// Random delay applied before each outbound chat line.
#[derive(Debug, Deserialize, Clone)]
pub struct JitterConfig {
    /// Upper bound of the delay, in milliseconds. 0 disables it.
    pub max_send_delay_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            soft_max_bytes: DEFAULT_SOFT_MAX,
            hard_max_bytes: DEFAULT_HARD_MAX,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            dial_ms: 15_000,
            auth_ms: 5_000,
            read_ms: 0,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay_ms: 5_000,
            backoff_increment_ms: 2_000,
            max_retries: 5,
            max_delay_ms: 60_000,
            auth_fail_delay_ms: 1_000,
        }
    }
}

impl Default for DecoyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_period_s: 1,
            max_period_s: 30,
            min_len: 1,
            max_len: 19,
        }
    }
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            max_send_delay_ms: 1_000,
        }
    }
}

impl ClientConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(ref pin) = self.fingerprint {
            if !is_valid_pin(pin) {
                return Err(format!(
                    "fingerprint must be 64 hex digits (colons allowed), got: {pin}"
                ));
            }
        }

        if self.limits.soft_max_bytes == 0 {
            return Err("limits.soft_max_bytes must be greater than 0".to_string());
        }
        if self.limits.hard_max_bytes == 0 {
            return Err("limits.hard_max_bytes must be greater than 0".to_string());
        }
        if self.limits.soft_max_bytes > self.limits.hard_max_bytes {
            return Err("limits.soft_max_bytes must be <= hard_max_bytes".to_string());
        }
        if u32::try_from(self.limits.hard_max_bytes).is_err() {
            return Err("limits.hard_max_bytes must fit in a 4-byte length prefix".to_string());
        }

        if self.timeouts.dial_ms == 0 {
            return Err("timeouts.dial_ms must be greater than 0".to_string());
        }
        if self.timeouts.auth_ms == 0 {
            return Err("timeouts.auth_ms must be greater than 0".to_string());
        }

        if self.reconnect.delay_ms == 0 {
            return Err("reconnect.delay_ms must be greater than 0".to_string());
        }
        if self.reconnect.max_delay_ms != 0 && self.reconnect.max_delay_ms < self.reconnect.delay_ms
        {
            return Err("reconnect.max_delay_ms must be 0 or >= delay_ms".to_string());
        }

        if self.decoy.enabled {
            if self.decoy.min_period_s == 0 {
                return Err("decoy.min_period_s must be greater than 0".to_string());
            }
            if self.decoy.min_period_s > self.decoy.max_period_s {
                return Err("decoy.min_period_s must be <= max_period_s".to_string());
            }
            if self.decoy.min_len == 0 {
                return Err("decoy.min_len must be greater than 0".to_string());
            }
            if self.decoy.min_len > self.decoy.max_len {
                return Err("decoy.min_len must be <= max_len".to_string());
            }
        }

        Ok(())
    }

    /// Frame limits for the codec.
    #[must_use]
    pub const fn frame_limits(&self) -> FrameLimits {
        FrameLimits::new(self.limits.soft_max_bytes, self.limits.hard_max_bytes)
    }

    /// Expected fingerprint, ignoring a blank value.
    #[must_use]
    pub fn pinned_fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref().filter(|p| !p.trim().is_empty())
    }
}

impl TimeoutConfig {
    /// TCP connect plus TLS handshake budget.
    #[must_use]
    pub const fn dial(&self) -> Duration {
        Duration::from_millis(self.dial_ms)
    }

    /// Authentication reply deadline.
    #[must_use]
    pub const fn auth(&self) -> Duration {
        Duration::from_millis(self.auth_ms)
    }

    /// Receive-loop read deadline, if enabled.
    #[must_use]
    pub const fn read(&self) -> Option<Duration> {
        if self.read_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.read_ms))
        }
    }
}

impl DecoyConfig {
    /// Range the decoy period is drawn from.
    #[must_use]
    pub const fn period_range_s(&self) -> RangeInclusive<u64> {
        self.min_period_s..=self.max_period_s
    }

    /// Range the filler length is drawn from.
    #[must_use]
    pub const fn len_range(&self) -> RangeInclusive<usize> {
        self.min_len..=self.max_len
    }
}

/// Loads configuration from defaults, an optional TOML file and `SILENTC_*`
/// environment variables, in increasing precedence.
///
/// # Errors
///
/// Returns an error if the configuration file cannot be read or parsed.
#[allow(clippy::cast_possible_wrap)]
pub fn load_config(path: Option<&Path>) -> anyhow::Result<ClientConfig> {
    let defaults = ClientConfig::default();
    let mut builder = config::Config::builder()
        .set_default(
            "limits.soft_max_bytes",
            defaults.limits.soft_max_bytes as i64,
        )?
        .set_default(
            "limits.hard_max_bytes",
            defaults.limits.hard_max_bytes as i64,
        )?
        .set_default("timeouts.dial_ms", defaults.timeouts.dial_ms as i64)?
        .set_default("timeouts.auth_ms", defaults.timeouts.auth_ms as i64)?
        .set_default("timeouts.read_ms", defaults.timeouts.read_ms as i64)?
        .set_default("reconnect.delay_ms", defaults.reconnect.delay_ms as i64)?
        .set_default(
            "reconnect.backoff_increment_ms",
            defaults.reconnect.backoff_increment_ms as i64,
        )?
        .set_default(
            "reconnect.max_retries",
            i64::from(defaults.reconnect.max_retries),
        )?
        .set_default(
            "reconnect.max_delay_ms",
            defaults.reconnect.max_delay_ms as i64,
        )?
        .set_default(
            "reconnect.auth_fail_delay_ms",
            defaults.reconnect.auth_fail_delay_ms as i64,
        )?
        .set_default("decoy.enabled", defaults.decoy.enabled)?
        .set_default("decoy.min_period_s", defaults.decoy.min_period_s as i64)?
        .set_default("decoy.max_period_s", defaults.decoy.max_period_s as i64)?
        .set_default("decoy.min_len", defaults.decoy.min_len as i64)?
        .set_default("decoy.max_len", defaults.decoy.max_len as i64)?
        .set_default(
            "jitter.max_send_delay_ms",
            defaults.jitter.max_send_delay_ms as i64,
        )?;

    if let Some(config_path) = path {
        if config_path.exists() {
            builder = builder.add_source(config::File::from(config_path));
        }
    } else {
        // Platform-native config dir first, then ~/.config/silentc/
        let native_path = dirs::config_dir().map(|d| d.join("silentc").join("config.toml"));
        let xdg_path =
            dirs::home_dir().map(|d| d.join(".config").join("silentc").join("config.toml"));

        let resolved = native_path
            .filter(|p| p.exists())
            .or_else(|| xdg_path.filter(|p| p.exists()));

        if let Some(config_path) = resolved {
            builder = builder.add_source(config::File::from(config_path));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SILENTC")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let settings = builder.build()?;
    let config: ClientConfig = settings.try_deserialize()?;

    Ok(config)
}
