//! # Inbound Data
//!
//! The watcher consumes newline-delimited JSON updates, one per line:
//!
//! ```json
//! {"path": "environment.depth.belowSurface", "value": 4.2,
//!  "source": {"type": "NMEA0183", "talker": "SD"}}
//! ```
//!
//! Only the configured depth, position and engine RPM paths are of interest;
//! everything else is dropped by [`route`].

use crate::config::SourcesConfig;
use crate::Position;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Where an update came from, used to pick one depth sounder among several.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct SourceRef {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub talker: String,
}

/// One raw inbound update.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct SourceUpdate {
    pub path: String,
    pub value: Value,
    #[serde(default)]
    pub source: Option<SourceRef>,
}

impl SourceUpdate {
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// An update the watcher acts on.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Input {
    /// Depth below surface in meters
    Depth(f64),
    Position(Position),
    /// Engine revolutions (any unit, only `> 0` matters)
    EngineRpm(f64),
}

/// Map an update onto the configured paths.
///
/// Depth updates from a source that does not match the configured type and
/// talker are dropped. Values of the wrong shape are dropped too.
pub fn route(update: &SourceUpdate, sources: &SourcesConfig) -> Option<Input> {
    let path = update.path.as_str();

    if path == sources.depth_path {
        if !depth_source_matches(update.source.as_ref(), sources) {
            debug!(path, source = ?update.source, "Ignoring depth from other source");
            return None;
        }
        return finite(&update.value).map(Input::Depth);
    }

    if path == sources.pos_path {
        return serde_json::from_value::<Position>(update.value.clone())
            .ok()
            .filter(|p| p.latitude.is_finite() && p.longitude.is_finite())
            .map(Input::Position);
    }

    if path == sources.engine_rpm_path {
        return finite(&update.value).map(Input::EngineRpm);
    }

    None
}

fn finite(value: &Value) -> Option<f64> {
    value.as_f64().filter(|v| v.is_finite())
}

fn depth_source_matches(source: Option<&SourceRef>, sources: &SourcesConfig) -> bool {
    let empty = SourceRef::default();
    let source = source.unwrap_or(&empty);
    wildcard_eq(&sources.depth_source_type, &source.kind)
        && wildcard_eq(&sources.depth_source_talker, &source.talker)
}

/// An empty filter matches anything.
fn wildcard_eq(filter: &str, actual: &str) -> bool {
    filter.is_empty() || filter == actual
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources() -> SourcesConfig {
        SourcesConfig::default()
    }

    #[test]
    fn test_parse_depth_update() {
        let update = SourceUpdate::parse(
            r#"{"path":"environment.depth.belowSurface","value":4.2,"source":{"type":"NMEA0183","talker":"SD"}}"#,
        )
        .unwrap();
        assert_eq!(update.source.as_ref().unwrap().talker, "SD");
        assert_eq!(route(&update, &sources()), Some(Input::Depth(4.2)));
    }

    #[test]
    fn test_route_position_and_rpm() {
        let pos = SourceUpdate::parse(
            r#"{"path":"navigation.position","value":{"latitude":41.5,"longitude":-70.6}}"#,
        )
        .unwrap();
        assert_eq!(
            route(&pos, &sources()),
            Some(Input::Position(Position::new(41.5, -70.6)))
        );

        let rpm = SourceUpdate::parse(r#"{"path":"propulsion.1.revolutions","value":12.5}"#).unwrap();
        assert_eq!(route(&rpm, &sources()), Some(Input::EngineRpm(12.5)));
    }

    #[test]
    fn test_unknown_path_and_bad_values_ignored() {
        let other = SourceUpdate::parse(r#"{"path":"environment.wind.speedTrue","value":3}"#).unwrap();
        assert_eq!(route(&other, &sources()), None);

        let text = SourceUpdate::parse(r#"{"path":"environment.depth.belowSurface","value":"deep"}"#)
            .unwrap();
        assert_eq!(route(&text, &sources()), None);

        let pos = SourceUpdate::parse(r#"{"path":"navigation.position","value":null}"#).unwrap();
        assert_eq!(route(&pos, &sources()), None);
    }

    #[test]
    fn test_depth_source_filter() {
        let mut filtered = sources();
        filtered.depth_source_talker = "SD".to_string();

        let sd = SourceUpdate::parse(
            r#"{"path":"environment.depth.belowSurface","value":3.0,"source":{"type":"NMEA0183","talker":"II"}}"#,
        )
        .unwrap();
        assert_eq!(route(&sd, &filtered), None);

        let unlabeled =
            SourceUpdate::parse(r#"{"path":"environment.depth.belowSurface","value":3.0}"#).unwrap();
        assert_eq!(route(&unlabeled, &filtered), None);
        assert_eq!(route(&unlabeled, &sources()), Some(Input::Depth(3.0)));
    }

    #[test]
    fn test_malformed_line_is_error() {
        assert!(SourceUpdate::parse("not json").is_err());
        assert!(SourceUpdate::parse(r#"{"value":1}"#).is_err());
    }
}
