//! Configuration loading: TOML file with environment variable overrides.
//!
//! Looks for `gattlinkd.toml` in the working directory. Every field has a
//! sensible default so the file is optional. Environment variables take
//! precedence over file values.

use std::time::Duration;

use serde::Deserialize;
use uuid::Uuid;

use gattlink_adapter_btleplug::BtleplugConfig;
use gattlink_app::config::EngineConfig;
use gattlink_domain::codec::{DecodeRequest, ValueFormat, WriteValue};
use gattlink_domain::frame::FrameKind;
use gattlink_domain::gatt::CharacteristicRef;
use gattlink_domain::id::PeripheralAddress;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Engine behaviour.
    pub engine: EngineConfig,
    /// Host adapter selection.
    pub btleplug: BtleplugConfig,
    /// Scan duration and connection target.
    pub scan: ScanConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Characteristics read once the target is ready.
    pub read: Vec<CharacteristicJob>,
    /// Characteristics subscribed to once the target is ready.
    pub subscribe: Vec<CharacteristicJob>,
    /// Values written once the target is ready.
    pub write: Vec<WriteJob>,
}

/// Scan settings and which peripheral to connect to afterwards.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// How long to scan before picking a target, in seconds.
    pub duration_secs: u16,
    /// 1-based position in the ranked device list.
    pub connect_position: Option<usize>,
    /// Peripheral address; takes the place of `connect_position`.
    pub connect_address: Option<String>,
    /// How long to wait for each GATT step before giving up, in seconds.
    pub operation_timeout_secs: u16,
    /// How long to keep listening for notifications, in seconds.
    pub listen_secs: u16,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// A characteristic and how to decode its values.
#[derive(Debug, Clone, Deserialize)]
pub struct CharacteristicJob {
    pub service: Uuid,
    pub characteristic: Uuid,
    #[serde(default)]
    pub format: ValueFormat,
    #[serde(default)]
    pub offset: usize,
    /// Composite frame layout applied to the raw bytes when printing.
    #[serde(default)]
    pub frame: Option<FrameKind>,
}

/// A value to write: either `int` with an integer `format`, or `text`.
#[derive(Debug, Clone, Deserialize)]
pub struct WriteJob {
    pub service: Uuid,
    pub characteristic: Uuid,
    #[serde(default)]
    pub int: Option<i64>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub format: Option<ValueFormat>,
    #[serde(default)]
    pub offset: usize,
}

/// Where to connect after scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Position(usize),
    Address(PeripheralAddress),
}

impl Config {
    /// Load configuration from `gattlinkd.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// result does not validate.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("gattlinkd.toml")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("GATTLINK_SCAN_SECS")
            && let Ok(secs) = val.parse()
        {
            self.scan.duration_secs = secs;
        }
        if let Ok(val) = std::env::var("GATTLINK_CONNECT") {
            self.scan.connect_address = Some(val);
            self.scan.connect_position = None;
        }
        if let Ok(val) = std::env::var("GATTLINK_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.scan.duration_secs == 0 {
            return Err(ConfigError::Validation(
                "scan duration must be non-zero".to_string(),
            ));
        }
        if self.scan.connect_position == Some(0) {
            return Err(ConfigError::Validation(
                "connect_position is 1-based".to_string(),
            ));
        }
        if self.scan.connect_position.is_some() && self.scan.connect_address.is_some() {
            return Err(ConfigError::Validation(
                "set either connect_position or connect_address, not both".to_string(),
            ));
        }
        if self.engine.event_buffer == 0 {
            return Err(ConfigError::Validation(
                "event_buffer must be non-zero".to_string(),
            ));
        }
        for job in &self.write {
            job.value()?;
        }
        for job in self.read.iter().chain(&self.subscribe) {
            if job.frame.is_some() && job.request() != DecodeRequest::bytes() {
                return Err(ConfigError::Validation(format!(
                    "frame on {} needs the raw bytes format at offset 0",
                    job.reference()
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.scan.duration_secs))
    }

    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.scan.operation_timeout_secs))
    }

    #[must_use]
    pub fn listen_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.scan.listen_secs))
    }

    /// Peripheral to connect to, if any.
    #[must_use]
    pub fn target(&self) -> Option<Target> {
        match (&self.scan.connect_address, self.scan.connect_position) {
            (Some(address), _) => Some(Target::Address(address.as_str().into())),
            (None, Some(position)) => Some(Target::Position(position)),
            (None, None) => None,
        }
    }
}

impl CharacteristicJob {
    #[must_use]
    pub fn reference(&self) -> CharacteristicRef {
        CharacteristicRef::new(self.service, self.characteristic)
    }

    #[must_use]
    pub fn request(&self) -> DecodeRequest {
        DecodeRequest::new(self.format, self.offset)
    }
}

impl WriteJob {
    #[must_use]
    pub fn reference(&self) -> CharacteristicRef {
        CharacteristicRef::new(self.service, self.characteristic)
    }

    /// The value this job writes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] unless exactly one of `int` (with
    /// an integer `format`) or `text` is set.
    pub fn value(&self) -> Result<WriteValue, ConfigError> {
        match (&self.int, &self.text, self.format) {
            (Some(value), None, Some(ValueFormat::Int(format))) => Ok(WriteValue::Int {
                value: *value,
                format,
                offset: self.offset,
            }),
            (None, Some(text), None | Some(ValueFormat::Utf8)) => Ok(WriteValue::Text(text.clone())),
            _ => Err(ConfigError::Validation(format!(
                "write to {} needs either `int` with an integer format or `text`",
                self.reference()
            ))),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            duration_secs: 10,
            connect_position: None,
            connect_address: None,
            operation_timeout_secs: 10,
            listen_secs: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "gattlinkd=info,gattlink=info".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
