use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::device::constants::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_SCAN_DURATION};

// durations are written the human way in the config file: "5s", "1m 30s"
mod human_duration {
    use std::time::Duration;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let value = String::deserialize(deserializer)?;
        humantime::parse_duration(&value).map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    #[serde(with = "human_duration")]
    pub scan_duration: Duration,
    #[serde(with = "human_duration")]
    pub connect_timeout: Duration,
    pub preferred_device: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            scan_duration: DEFAULT_SCAN_DURATION,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            preferred_device: None,
        }
    }
}
