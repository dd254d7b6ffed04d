//! Monitor configuration
//!
//! The monitor reads a JSON [`ControllerConfig`], for example:
//!
//! ```json
//! {
//!   "binding": { "type": "vid_pid", "vid": "4D43", "pid": "4D50" },
//!   "settings": { "baud_rate": 115200 },
//!   "auto_connect": true,
//!   "watcher": { "poll_interval_secs": 1 }
//! }
//! ```
//!
//! Without a file the monitor follows the default device below.

use std::fs;
use std::path::Path;

use anyhow::Context;
use hotcom_link::{ControllerConfig, PortSettings};

/// Vendor ID followed when no configuration is given
pub const DEFAULT_VID: &str = "4D43";
/// Product ID followed when no configuration is given
pub const DEFAULT_PID: &str = "4D50";

/// Configuration used without a file
pub fn default_config() -> ControllerConfig {
    ControllerConfig::vid_pid(DEFAULT_VID, DEFAULT_PID)
        .with_settings(PortSettings::with_baud_rate(115200))
        .with_auto_connect(true)
}

/// Load configuration from a file, or the default when no path is given
pub fn load(path: Option<&Path>) -> anyhow::Result<ControllerConfig> {
    let Some(path) = path else {
        return Ok(default_config());
    };
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    parse(&contents).with_context(|| format!("invalid config {}", path.display()))
}

/// Parse a JSON configuration
pub fn parse(contents: &str) -> anyhow::Result<ControllerConfig> {
    Ok(serde_json::from_str(contents)?)
}
