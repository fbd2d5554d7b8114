//! Configuration surface for the telemetry poller and navigation controller.
//!
//! Configuration is declarative YAML deserialized with serde. Pointer chain
//! offsets accept either plain integers or `0x`-prefixed hex strings, since
//! published offset tables are usually written in hex:
//!
//! ```yaml
//! process_name: Wow.exe
//! anchor_module: Wow.exe
//! poll_hz: 10
//! scalar_width: float
//! heading_units: degrees
//! position_x_ptr: { module: Wow.exe, offsets: ["0xC72E50", 0x30, "0x798"] }
//! position_y_ptr: { module: Wow.exe, offsets: ["0xC72E50", 0x30, "0x79C"] }
//! heading_ptr:    { module: Wow.exe, offsets: ["0xC72E50", 0x30, "0x7A8"] }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::{Result, TelemetryError};

/// Width of the scalar value at the end of a pointer chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarWidth {
    /// 4-byte IEEE-754 float.
    #[default]
    Float,
    /// 8-byte IEEE-754 double.
    Double,
}

impl ScalarWidth {
    /// Exact byte count a read of this width must return.
    pub fn byte_len(self) -> usize {
        match self {
            ScalarWidth::Float => 4,
            ScalarWidth::Double => 8,
        }
    }
}

/// Units of the raw heading value in target memory.
///
/// Decided once at configuration time; the poller converts unconditionally
/// based on this flag and never re-infers units per sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeadingUnits {
    #[default]
    Degrees,
    Radians,
}

/// An anchor module plus an ordered sequence of byte offsets.
///
/// The first offset is added to the module base; each subsequent offset
/// except the last is applied after dereferencing a pointer-sized value; the
/// last offset yields the address of the scalar itself. Immutable once
/// constructed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PointerSpec {
    /// Module whose base address roots the chain (case-insensitive).
    pub module: String,
    /// At least one offset; hops beyond the first dereference pointers.
    #[serde(deserialize_with = "deserialize_offsets")]
    pub offsets: Vec<u64>,
}

impl PointerSpec {
    /// Build a spec, rejecting an empty offset list.
    pub fn new(module: impl Into<String>, offsets: Vec<u64>) -> Result<Self> {
        if offsets.is_empty() {
            return Err(TelemetryError::config_error("pointer spec needs at least one offset"));
        }
        Ok(Self { module: module.into(), offsets })
    }
}

/// Offsets may be supplied as integers or decimal/hex strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawOffset {
    Int(u64),
    Text(String),
}

fn deserialize_offsets<'de, D>(deserializer: D) -> std::result::Result<Vec<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<RawOffset>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|entry| match entry {
            RawOffset::Int(value) => Ok(value),
            RawOffset::Text(text) => parse_offset(&text).map_err(serde::de::Error::custom),
        })
        .collect()
}

/// Parse a single offset from `"0x1A0"`, `"416"`, or similar.
pub fn parse_offset(text: &str) -> std::result::Result<u64, String> {
    let trimmed = text.trim();
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_err(|e| format!("invalid hex offset '{trimmed}': {e}"))
    } else {
        trimmed.parse::<u64>().map_err(|e| format!("invalid offset '{trimmed}': {e}"))
    }
}

fn default_poll_hz() -> u32 {
    10
}

fn default_teleport_threshold() -> f64 {
    2000.0
}

/// Configuration consumed by the telemetry poller.
#[derive(Debug, Clone, Deserialize)]
pub struct PollerConfig {
    /// Process to attach to, matched case-insensitively by exact name.
    pub process_name: String,
    /// Module whose presence is required for an attachment to succeed.
    pub anchor_module: String,
    /// Target sampling rate in Hz. Must be positive; clamped to >= 2 at run time.
    #[serde(default = "default_poll_hz")]
    pub poll_hz: u32,
    /// Width of the three scalar reads.
    #[serde(default)]
    pub scalar_width: ScalarWidth,
    /// Units of the raw heading value.
    #[serde(default)]
    pub heading_units: HeadingUnits,
    /// Per-axis displacement beyond which a candidate sample is rejected as
    /// a teleport (a freshly reallocated or type-punned structure).
    #[serde(default = "default_teleport_threshold")]
    pub teleport_threshold: f64,
    pub position_x_ptr: PointerSpec,
    pub position_y_ptr: PointerSpec,
    pub heading_ptr: PointerSpec,
}

impl PollerConfig {
    /// Load and validate a poller configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            TelemetryError::config_error_with_source(
                format!("cannot read poller config {}", path.as_ref().display()),
                Box::new(e),
            )
        })?;
        let config: PollerConfig = serde_yaml_ng::from_str(&text).map_err(|e| {
            TelemetryError::config_error_with_source(
                format!("cannot parse poller config {}", path.as_ref().display()),
                Box::new(e),
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.process_name.is_empty() {
            return Err(TelemetryError::config_error("process_name must not be empty"));
        }
        if self.poll_hz == 0 {
            return Err(TelemetryError::config_error("poll_hz must be positive"));
        }
        if !self.teleport_threshold.is_finite() || self.teleport_threshold <= 0.0 {
            return Err(TelemetryError::config_error("teleport_threshold must be positive"));
        }
        for (name, spec) in [
            ("position_x_ptr", &self.position_x_ptr),
            ("position_y_ptr", &self.position_y_ptr),
            ("heading_ptr", &self.heading_ptr),
        ] {
            if spec.offsets.is_empty() {
                return Err(TelemetryError::config_error(format!(
                    "{name} needs at least one offset"
                )));
            }
        }
        Ok(())
    }
}

/// Controller tunables. The defaults are empirical; everything is a field
/// because none of them carry a derivation.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct NavTunables {
    /// Forward speed in distance units per second.
    pub move_speed: f64,
    /// Turn rate in degrees per second.
    pub turn_rate_dps: f64,
    /// Distance below which a waypoint counts as reached.
    pub reach_epsilon: f64,
    /// Heading error below which facing counts as good enough, in degrees.
    pub heading_epsilon_deg: f64,
    /// Longest single actuation sub-step in seconds; bounds stop latency.
    pub max_step_secs: f64,
}

impl Default for NavTunables {
    fn default() -> Self {
        Self {
            move_speed: 7.0,
            turn_rate_dps: 200.0,
            reach_epsilon: 0.75,
            heading_epsilon_deg: 5.0,
            max_step_secs: 1.0,
        }
    }
}

impl NavTunables {
    /// One sub-step's worth of forward travel.
    pub fn step_distance(&self) -> f64 {
        self.move_speed * self.max_step_secs
    }
}

/// Watchdog timing. Staleness detection latency is bounded by
/// `stale_timeout + stale_poll_interval`.
#[derive(Debug, Clone, Copy)]
pub struct WatchdogConfig {
    pub stale_timeout: Duration,
    pub panic_poll_interval: Duration,
    pub stale_poll_interval: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            stale_timeout: Duration::from_secs(3),
            panic_poll_interval: Duration::from_millis(100),
            stale_poll_interval: Duration::from_millis(500),
        }
    }
}

/// A navigation target in the same coordinate space as telemetry positions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub x: f64,
    pub y: f64,
}

impl Waypoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Load an ordered waypoint list from a YAML file.
///
/// A runnable path needs at least two records: the first seeds the simulated
/// start pose, the rest are targets.
pub fn load_waypoints<P: AsRef<Path>>(path: P) -> Result<Vec<Waypoint>> {
    let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
        TelemetryError::config_error_with_source(
            format!("cannot read path file {}", path.as_ref().display()),
            Box::new(e),
        )
    })?;
    let waypoints: Vec<Waypoint> = serde_yaml_ng::from_str(&text).map_err(|e| {
        TelemetryError::config_error_with_source(
            format!("cannot parse path file {}", path.as_ref().display()),
            Box::new(e),
        )
    })?;
    if waypoints.len() < 2 {
        return Err(TelemetryError::PathTooShort { count: waypoints.len() });
    }
    Ok(waypoints)
}
