//! Build-time channel semantics, uplinked once per (re)connect as a
//! [`MetadataFrame`] (spec.md §4.2, §6). The original left this as
//! hardcoded dict literals per deployment script; here it is one table
//! matching this binary's wiring (`units::convert`'s post-scaled channel
//! included).

use indexmap::IndexMap;
use telemetry_protocol::MetadataFrame;

/// `ch*` key to human-readable label, in upload order.
pub const CHANNEL_LABELS: &[(&str, &str)] = &[
    ("ch0", "temperature"),
    ("ch1", "laser"),
    ("ch2", "photodiode"),
    ("ch3", "aux0"),
    ("ch4", "aux1"),
    ("ch5", "aux2"),
];

/// Build this node's metadata descriptor for `label`.
pub fn build(label: &str) -> MetadataFrame {
    let mut labels = IndexMap::new();
    for (channel, description) in CHANNEL_LABELS {
        labels.insert((*channel).to_owned(), (*description).to_owned());
    }
    MetadataFrame {
        user: label.to_owned(),
        labels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_declares_every_known_channel() {
        let frame = build("lab7");
        assert_eq!(frame.user, "lab7");
        assert_eq!(frame.labels.len(), CHANNEL_LABELS.len());
        assert_eq!(frame.labels.get("ch0").map(String::as_str), Some("temperature"));
    }
}
