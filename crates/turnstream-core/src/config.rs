use std::time::Duration;

use crate::errors::ConfigError;
use crate::splitter::Markers;

/// Default minimum spacing between two streaming re-renders of the response slot.
pub const DEFAULT_RENDER_INTERVAL: Duration = Duration::from_millis(50);

const OPEN_MARKER_ENV: &str = "TURNSTREAM_THINKING_OPEN";
const CLOSE_MARKER_ENV: &str = "TURNSTREAM_THINKING_CLOSE";
const RENDER_INTERVAL_ENV: &str = "TURNSTREAM_RENDER_INTERVAL_MS";

/// Per-coordinator settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnConfig {
    /// Marker that opens a reasoning span inside streamed answer text.
    pub open_marker: String,
    /// Marker that closes a reasoning span.
    pub close_marker: String,
    /// Minimum spacing between streaming response re-renders.
    ///
    /// `Duration::ZERO` renders on every delta.
    pub render_interval: Duration,
}

impl Default for TurnConfig {
    fn default() -> Self {
        let markers = Markers::thinking();
        Self {
            open_marker: markers.open().to_string(),
            close_marker: markers.close().to_string(),
            render_interval: DEFAULT_RENDER_INTERVAL,
        }
    }
}

impl TurnConfig {
    /// Builds a config from `TURNSTREAM_*` environment variables, falling back
    /// to defaults for unset keys.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(open) = lookup(OPEN_MARKER_ENV) {
            config.open_marker = open;
        }
        if let Some(close) = lookup(CLOSE_MARKER_ENV) {
            config.close_marker = close;
        }
        if let Some(raw) = lookup(RENDER_INTERVAL_ENV) {
            let millis = raw
                .trim()
                .parse::<u64>()
                .map_err(|err| ConfigError::InvalidValue {
                    key: RENDER_INTERVAL_ENV.to_string(),
                    message: err.to_string(),
                })?;
            config.render_interval = Duration::from_millis(millis);
        }
        config.validate()?;
        Ok(config)
    }

    /// Overrides the reasoning span opening marker.
    pub fn open_marker(mut self, marker: impl Into<String>) -> Self {
        self.open_marker = marker.into();
        self
    }

    /// Overrides the reasoning span closing marker.
    pub fn close_marker(mut self, marker: impl Into<String>) -> Self {
        self.close_marker = marker.into();
        self
    }

    /// Overrides the streaming render interval.
    pub fn render_interval(mut self, interval: Duration) -> Self {
        self.render_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.markers().map(|_| ())
    }

    /// The validated marker pair.
    pub fn markers(&self) -> Result<Markers, ConfigError> {
        Markers::new(self.open_marker.clone(), self.close_marker.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let config = TurnConfig::from_lookup(lookup(&[])).expect("config");
        assert_eq!(config, TurnConfig::default());
        assert_eq!(config.open_marker, "<thinking>");
        assert_eq!(config.render_interval, Duration::from_millis(50));
    }

    #[test]
    fn environment_overrides_every_field() {
        let config = TurnConfig::from_lookup(lookup(&[
            (OPEN_MARKER_ENV, "<think>"),
            (CLOSE_MARKER_ENV, "</think>"),
            (RENDER_INTERVAL_ENV, " 0 "),
        ]))
        .expect("config");
        assert_eq!(config.open_marker, "<think>");
        assert_eq!(config.close_marker, "</think>");
        assert_eq!(config.render_interval, Duration::ZERO);
    }

    #[test]
    fn rejects_unparsable_interval() {
        let err = TurnConfig::from_lookup(lookup(&[(RENDER_INTERVAL_ENV, "fast")]))
            .expect_err("invalid interval");
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == RENDER_INTERVAL_ENV));
    }

    #[test]
    fn rejects_identical_markers() {
        let err = TurnConfig::default()
            .open_marker("|")
            .close_marker("|")
            .validate()
            .expect_err("identical markers");
        assert!(matches!(err, ConfigError::IdenticalMarkers { .. }));
    }
}
