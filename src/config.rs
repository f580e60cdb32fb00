use std::path::PathBuf;

use crate::engine::calendar::DAY_SECS;
use crate::engine::filters::{DURATION_STAGE, STAFF_MEMBER_STAGE};
use crate::model::Secs;

/// Runtime settings, read from `SESSIONPICK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Sessions endpoint of the remote API.
    pub endpoint: String,
    pub fetch_method: String,
    /// IANA name of the display timezone.
    pub timezone: String,
    /// Sessions at least this long occupy whole days.
    pub daily_threshold: Secs,
    /// Filter stage names, in cascade order.
    pub filters: Vec<String>,
    /// JSON service description used by the binary.
    pub service_file: Option<PathBuf>,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080/sessions".into(),
            fetch_method: "GET".into(),
            timezone: "UTC".into(),
            daily_threshold: DAY_SECS,
            filters: vec![DURATION_STAGE.into(), STAFF_MEMBER_STAGE.into()],
            service_file: None,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Unset or unparsable values
    /// fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            endpoint: lookup("SESSIONPICK_ENDPOINT").unwrap_or(defaults.endpoint),
            fetch_method: lookup("SESSIONPICK_FETCH_METHOD")
                .map(|m| m.to_uppercase())
                .unwrap_or(defaults.fetch_method),
            timezone: lookup("SESSIONPICK_TIMEZONE").unwrap_or(defaults.timezone),
            daily_threshold: lookup("SESSIONPICK_DAILY_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.daily_threshold),
            filters: lookup("SESSIONPICK_FILTERS")
                .map(|s| {
                    s.split(',')
                        .map(str::trim)
                        .filter(|f| !f.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or(defaults.filters),
            service_file: lookup("SESSIONPICK_SERVICE_FILE").map(PathBuf::from),
            metrics_port: lookup("SESSIONPICK_METRICS_PORT").and_then(|s| s.parse().ok()),
        }
    }
}
