//! Wire types shared by the master hub and the node bridge.
//!
//! All WebSocket payloads are JSON text. Unlike a tagged protocol, the node
//! endpoint's uplink messages are not discriminated by an envelope field —
//! a [`MetadataFrame`] is told apart from a [`ReadingFrame`] by the presence
//! of the `meta` marker key, exactly as the frames arrive on the wire.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Wildcard node label accepted in downlink commands and `user` matches.
pub const WILDCARD_USER: &str = "X";

/// Key whose presence in an uplinked JSON object marks it as a [`MetadataFrame`]
/// rather than a [`ReadingFrame`].
pub const METADATA_MARKER_KEY: &str = "meta";

// ---------------------------------------------------------------------------
// ReadingFrame
// ---------------------------------------------------------------------------

/// One per-tick reading uplinked by a node.
///
/// `channels` carries the `ch0..chN` keys; on `error == true` it is typically
/// empty. Channel order follows the order in which the node inserted them
/// (an [`IndexMap`], not a [`std::collections::HashMap`]) so that the first
/// frame from a node can be used directly as a schema declaration by the
/// store — see the master's per-node table creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingFrame {
    pub user: String,
    pub error: bool,
    pub x: f64,
    #[serde(flatten)]
    pub channels: IndexMap<String, f64>,
}

impl ReadingFrame {
    pub fn error(user: impl Into<String>, x: f64) -> Self {
        ReadingFrame {
            user: user.into(),
            error: true,
            x,
            channels: IndexMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// MetadataFrame
// ---------------------------------------------------------------------------

/// A node's self-description, uplinked once per (re)connect.
///
/// `labels` maps `ch*` keys to a human-readable channel description
/// (e.g. `"ch0" -> "temp"`). The `meta` marker is always `true` when present
/// on the wire, so it isn't modeled as a settable field — see [`as_wire`](MetadataFrame::as_wire).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataFrame {
    pub user: String,
    #[serde(flatten)]
    pub labels: IndexMap<String, String>,
}

impl MetadataFrame {
    fn to_json_value(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("user".to_owned(), serde_json::Value::String(self.user.clone()));
        map.insert(METADATA_MARKER_KEY.to_owned(), serde_json::Value::Bool(true));
        for (k, v) in &self.labels {
            map.insert(k.clone(), serde_json::Value::String(v.clone()));
        }
        serde_json::Value::Object(map)
    }

    /// Wrap for serialization with the `meta` marker interleaved, e.g.
    /// `serde_json::to_string(&frame.as_wire())`.
    pub fn as_wire(&self) -> MetadataFrameWire<'_> {
        MetadataFrameWire(self)
    }
}

pub struct MetadataFrameWire<'a>(&'a MetadataFrame);

impl Serialize for MetadataFrameWire<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.to_json_value().serialize(serializer)
    }
}

// ---------------------------------------------------------------------------
// Uplink decoding
// ---------------------------------------------------------------------------

/// A decoded node uplink message: either a reading or a metadata frame.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeUplinkFrame {
    Reading(ReadingFrame),
    Metadata(MetadataFrame),
}

/// Parse one uplinked JSON text message, discriminating on the metadata
/// marker key rather than an envelope tag (the wire format in spec §6 has
/// no `kind` field).
pub fn parse_node_uplink(text: &str) -> Result<NodeUplinkFrame, FrameParseError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| FrameParseError(e.to_string()))?;
    let is_metadata = value
        .as_object()
        .is_some_and(|obj| obj.contains_key(METADATA_MARKER_KEY));
    if is_metadata {
        let user = value
            .get("user")
            .and_then(|v| v.as_str())
            .ok_or_else(|| FrameParseError("metadata frame missing 'user'".to_owned()))?
            .to_owned();
        let mut labels = IndexMap::new();
        if let Some(obj) = value.as_object() {
            for (k, v) in obj {
                if k == "user" || k == METADATA_MARKER_KEY {
                    continue;
                }
                if let Some(s) = v.as_str() {
                    labels.insert(k.clone(), s.to_owned());
                }
            }
        }
        Ok(NodeUplinkFrame::Metadata(MetadataFrame { user, labels }))
    } else {
        let frame: ReadingFrame =
            serde_json::from_value(value).map_err(|e| FrameParseError(e.to_string()))?;
        Ok(NodeUplinkFrame::Reading(frame))
    }
}

// ---------------------------------------------------------------------------
// Downlink command (client/master -> node)
// ---------------------------------------------------------------------------

/// A decoded `user,pin,value` downlink command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownlinkCommand {
    pub user: String,
    pub pin: u8,
    pub value: bool,
}

impl DownlinkCommand {
    pub fn wildcard(pin: u8, value: bool) -> Self {
        DownlinkCommand {
            user: WILDCARD_USER.to_owned(),
            pin,
            value,
        }
    }

    /// True if this command targets `label`, either directly or via the
    /// broadcast wildcard.
    pub fn targets(&self, label: &str) -> bool {
        self.user == label || self.user == WILDCARD_USER
    }
}

impl std::fmt::Display for DownlinkCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{},{}", self.user, self.pin, u8::from(self.value))
    }
}

/// Parse a `user,pin,value` CSV downlink command.
pub fn parse_downlink_command(text: &str) -> Result<DownlinkCommand, FrameParseError> {
    let mut parts = text.splitn(3, ',');
    let user = parts
        .next()
        .ok_or_else(|| FrameParseError("empty command".to_owned()))?
        .to_owned();
    let pin = parts
        .next()
        .ok_or_else(|| FrameParseError("missing pin field".to_owned()))?
        .parse::<u8>()
        .map_err(|e| FrameParseError(format!("invalid pin: {e}")))?;
    let value_str = parts
        .next()
        .ok_or_else(|| FrameParseError("missing value field".to_owned()))?;
    let value = match value_str.trim() {
        "1" => true,
        "0" => false,
        other => return Err(FrameParseError(format!("invalid value: '{other}'"))),
    };
    Ok(DownlinkCommand { user, pin, value })
}

/// The default wildcard no-op broadcast sent by the master's broadcast tick.
pub fn default_broadcast_command() -> DownlinkCommand {
    DownlinkCommand::wildcard(50, false)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("frame parse error: {0}")]
pub struct FrameParseError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_frame_round_trips_through_json() {
        let mut channels = IndexMap::new();
        channels.insert("ch0".to_owned(), 1.65);
        channels.insert("ch1".to_owned(), 0.5);
        let frame = ReadingFrame {
            user: "lab7".to_owned(),
            error: false,
            x: 1_700_000_000.0,
            channels,
        };
        let json = serde_json::to_string(&frame).unwrap();
        match parse_node_uplink(&json).unwrap() {
            NodeUplinkFrame::Reading(parsed) => assert_eq!(parsed, frame),
            NodeUplinkFrame::Metadata(_) => panic!("expected reading frame"),
        }
    }

    #[test]
    fn error_frame_has_no_channels() {
        let frame = ReadingFrame::error("lab7", 1_700_000_000.0);
        let json = serde_json::to_string(&frame).unwrap();
        assert!(!json.contains("ch0"));
    }

    #[test]
    fn metadata_frame_is_discriminated_by_marker_key() {
        let mut labels = IndexMap::new();
        labels.insert("ch0".to_owned(), "temp".to_owned());
        labels.insert("ch1".to_owned(), "laser".to_owned());
        let frame = MetadataFrame {
            user: "lab7".to_owned(),
            labels,
        };
        let json = serde_json::to_string(&frame.as_wire()).unwrap();
        match parse_node_uplink(&json).unwrap() {
            NodeUplinkFrame::Metadata(parsed) => assert_eq!(parsed, frame),
            NodeUplinkFrame::Reading(_) => panic!("expected metadata frame"),
        }
    }

    #[test]
    fn downlink_command_parses_and_targets() {
        let cmd = parse_downlink_command("lab7,3,1").unwrap();
        assert_eq!(
            cmd,
            DownlinkCommand {
                user: "lab7".to_owned(),
                pin: 3,
                value: true
            }
        );
        assert!(cmd.targets("lab7"));
        assert!(!cmd.targets("lab9"));
    }

    #[test]
    fn wildcard_command_targets_every_label() {
        let cmd = parse_downlink_command("X,50,0").unwrap();
        assert!(cmd.targets("lab7"));
        assert!(cmd.targets("anything"));
    }

    #[test]
    fn rejects_malformed_downlink_command() {
        assert!(parse_downlink_command("lab7,3").is_err());
        assert!(parse_downlink_command("lab7,3,2").is_err());
        assert!(parse_downlink_command("lab7,abc,1").is_err());
    }
}
