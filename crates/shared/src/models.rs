//! Marker domain model and WebSocket wire types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// WebSocket message and event types.
pub mod ws_types {
    /// Envelope type for every server→client message.
    pub const TEXT: &str = "text";
    /// Client→server event that submits a new marker.
    pub const ADD_MARKER: &str = "addMarker";
}

/// Inclusive latitude bound in degrees.
pub const MAX_LAT: f64 = 90.0;
/// Inclusive longitude bound in degrees.
pub const MAX_LON: f64 = 180.0;

fn add_marker_event_type() -> String {
    ws_types::ADD_MARKER.to_string()
}

/// A named geographic point. Immutable once accepted by the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    #[serde(rename = "eventType", default = "add_marker_event_type")]
    pub event_type: String,
    pub name: String,
    pub description: String,
    #[serde(deserialize_with = "coordinate::deserialize")]
    pub lat: f64,
    #[serde(deserialize_with = "coordinate::deserialize")]
    pub lon: f64,
    /// ISO-8601 creation time, assigned by the hub.
    pub timestamp: String,
}

/// Inbound `addMarker` event (client → hub).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddMarkerEvent {
    #[serde(rename = "eventType", default = "add_marker_event_type")]
    pub event_type: String,
    pub name: String,
    pub description: String,
    #[serde(deserialize_with = "coordinate::deserialize")]
    pub lat: f64,
    #[serde(deserialize_with = "coordinate::deserialize")]
    pub lon: f64,
}

impl AddMarkerEvent {
    pub fn new(name: impl Into<String>, description: impl Into<String>, lat: f64, lon: f64) -> Self {
        Self {
            event_type: add_marker_event_type(),
            name: name.into(),
            description: description.into(),
            lat,
            lon,
        }
    }

    /// Reject coordinates that are not finite or fall outside the globe.
    pub fn validate(&self) -> Result<(), InboundError> {
        if !self.lat.is_finite() || self.lat.abs() > MAX_LAT {
            return Err(InboundError::InvalidMarker(format!(
                "lat out of range: {}",
                self.lat
            )));
        }
        if !self.lon.is_finite() || self.lon.abs() > MAX_LON {
            return Err(InboundError::InvalidMarker(format!(
                "lon out of range: {}",
                self.lon
            )));
        }
        Ok(())
    }

    /// Stamp the event into a marker.
    pub fn into_marker(self, timestamp: impl Into<String>) -> Marker {
        Marker {
            event_type: add_marker_event_type(),
            name: self.name,
            description: self.description,
            lat: self.lat,
            lon: self.lon,
            timestamp: timestamp.into(),
        }
    }
}

/// Result of classifying one inbound text message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    AddMarker(AddMarkerEvent),
    /// Valid JSON that is not an event the hub acts on.
    Ignored,
}

#[derive(Debug, Error)]
pub enum InboundError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid marker: {0}")]
    InvalidMarker(String),
}

/// Parse a client message. Unknown events and non-object payloads are
/// `Ignored`; an `addMarker` event must carry name, description, lat and lon.
pub fn parse_inbound(text: &str) -> Result<Inbound, InboundError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let is_add_marker = value
        .get("eventType")
        .and_then(|v| v.as_str())
        .map_or(false, |t| t == ws_types::ADD_MARKER);
    if !is_add_marker {
        return Ok(Inbound::Ignored);
    }
    let event: AddMarkerEvent = serde_json::from_value(value)
        .map_err(|e| InboundError::InvalidMarker(e.to_string()))?;
    event.validate()?;
    Ok(Inbound::AddMarker(event))
}

// --- WebSocket envelope ---

/// Server→client envelope: `{"type":"text","value":"<json>"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub r#type: String,
    pub value: String,
}

impl Envelope {
    /// Wrap a marker as a text envelope. The marker is JSON-encoded into `value`.
    pub fn text(marker: &Marker) -> Result<Self, serde_json::Error> {
        Ok(Self {
            r#type: ws_types::TEXT.to_string(),
            value: serde_json::to_string(marker)?,
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode the carried marker, if this is a text envelope holding one.
    pub fn marker(&self) -> Option<Marker> {
        if self.r#type != ws_types::TEXT {
            return None;
        }
        serde_json::from_str(&self.value).ok()
    }
}

/// Encode a marker straight to the envelope JSON sent on the wire.
pub fn encode_marker(marker: &Marker) -> Result<String, serde_json::Error> {
    Envelope::text(marker)?.to_json()
}

/// Lenient coordinate parsing: JSON numbers, or numeric strings as produced by
/// browser `toFixed`.
mod coordinate {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(n),
            Raw::Text(s) => {
                let n: f64 = s
                    .trim()
                    .parse()
                    .map_err(|_| D::Error::custom(format!("not a coordinate: {:?}", s)))?;
                if n.is_finite() {
                    Ok(n)
                } else {
                    Err(D::Error::custom(format!("not a coordinate: {:?}", s)))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(name: &str) -> Marker {
        AddMarkerEvent::new(name, "by the dock", 42.3187, -71.0094)
            .into_marker("2025-01-01T00:00:00.000000Z")
    }

    #[test]
    fn parse_add_marker_event() {
        let text = r#"{"eventType":"addMarker","name":"Pier","description":"d","lat":42.1,"lon":-71.2}"#;
        match parse_inbound(text).unwrap() {
            Inbound::AddMarker(ev) => {
                assert_eq!(ev.name, "Pier");
                assert_eq!(ev.lat, 42.1);
                assert_eq!(ev.lon, -71.2);
            }
            other => panic!("expected AddMarker, got {:?}", other),
        }
    }

    #[test]
    fn parse_accepts_numeric_string_coordinates() {
        let text = r#"{"eventType":"addMarker","name":"a","description":"b","lat":"42.3187","lon":" -71.0094 "}"#;
        let Inbound::AddMarker(ev) = parse_inbound(text).unwrap() else {
            panic!("expected AddMarker");
        };
        assert_eq!(ev.lat, 42.3187);
        assert_eq!(ev.lon, -71.0094);
    }

    #[test]
    fn parse_rejects_each_missing_required_field() {
        for missing in ["name", "description", "lat", "lon"] {
            let mut value = serde_json::json!({
                "eventType": "addMarker",
                "name": "a",
                "description": "b",
                "lat": 1.0,
                "lon": 2.0
            });
            value.as_object_mut().unwrap().remove(missing);
            let err = parse_inbound(&value.to_string()).unwrap_err();
            assert!(
                matches!(err, InboundError::InvalidMarker(_)),
                "missing {} should be invalid, got {:?}",
                missing,
                err
            );
        }
    }

    #[test]
    fn parse_rejects_out_of_range_and_garbage_coordinates() {
        let out_of_range = r#"{"eventType":"addMarker","name":"a","description":"b","lat":91,"lon":0}"#;
        assert!(matches!(
            parse_inbound(out_of_range),
            Err(InboundError::InvalidMarker(_))
        ));
        let garbage = r#"{"eventType":"addMarker","name":"a","description":"b","lat":"north","lon":0}"#;
        assert!(matches!(
            parse_inbound(garbage),
            Err(InboundError::InvalidMarker(_))
        ));
        let nan = r#"{"eventType":"addMarker","name":"a","description":"b","lat":"NaN","lon":0}"#;
        assert!(parse_inbound(nan).is_err());
    }

    #[test]
    fn parse_ignores_other_events_and_non_objects() {
        assert_eq!(
            parse_inbound(r#"{"eventType":"removeMarker","name":"a"}"#).unwrap(),
            Inbound::Ignored
        );
        assert_eq!(parse_inbound(r#"{"hello":"world"}"#).unwrap(), Inbound::Ignored);
        assert_eq!(parse_inbound("[1,2,3]").unwrap(), Inbound::Ignored);
        assert_eq!(parse_inbound("42").unwrap(), Inbound::Ignored);
    }

    #[test]
    fn parse_rejects_invalid_json() {
        assert!(matches!(parse_inbound("{not json"), Err(InboundError::Json(_))));
    }

    #[test]
    fn envelope_wraps_marker_as_json_string() {
        let m = marker("Pier");
        let json = encode_marker(&m).unwrap();
        let raw: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(raw["type"], "text");
        let inner: serde_json::Value =
            serde_json::from_str(raw["value"].as_str().unwrap()).unwrap();
        assert_eq!(inner["eventType"], "addMarker");
        assert_eq!(inner["name"], "Pier");
        assert_eq!(inner["lat"], 42.3187);
        assert_eq!(inner["timestamp"], "2025-01-01T00:00:00.000000Z");

        let env: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(env.marker(), Some(m));
    }

    #[test]
    fn envelope_of_other_type_has_no_marker() {
        let env = Envelope {
            r#type: "binary".to_string(),
            value: encode_marker(&marker("x")).unwrap(),
        };
        assert_eq!(env.marker(), None);
    }

    #[test]
    fn stored_marker_without_event_type_defaults_to_add_marker() {
        let json = r#"{"name":"a","description":"b","lat":"1.5","lon":2,"timestamp":"t"}"#;
        let m: Marker = serde_json::from_str(json).unwrap();
        assert_eq!(m.event_type, ws_types::ADD_MARKER);
        assert_eq!(m.lat, 1.5);
        assert_eq!(m.lon, 2.0);
    }
}
