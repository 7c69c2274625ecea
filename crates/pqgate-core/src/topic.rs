//! Topic conventions shared by the south adapter, the filters and the
//! broadcaster.
//!
//! Devices publish on `{station}/{kind}top` style topics, for example
//! `STMS1/pdstop`. The final path segment selects the frame layout and the
//! second path segment is the category subscribers register under.

use serde::{Deserialize, Serialize};

/// Frame family carried by a message, selected from its topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Analog data set (ADS).
    Analog,
    /// Digital data set (DDS).
    Digital,
    /// Three-phase power data set (PDS).
    Phase,
    /// Power-quality aggregate (PQ).
    PowerQuality,
}

impl MessageKind {
    /// All kinds, in selection priority order.
    pub const ALL: [MessageKind; 4] = [
        MessageKind::Analog,
        MessageKind::Phase,
        MessageKind::Digital,
        MessageKind::PowerQuality,
    ];

    /// Case-sensitive marker searched for in the topic's final segment.
    pub fn marker(&self) -> &'static str {
        match self {
            Self::Analog => "adstop",
            Self::Digital => "ddstop",
            Self::Phase => "pdstop",
            Self::PowerQuality => "pqstop",
        }
    }

    /// Short name used in logs and CLI output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analog => "ads",
            Self::Digital => "dds",
            Self::Phase => "pds",
            Self::PowerQuality => "pq",
        }
    }

    /// Select the kind from a topic, or `None` if no marker matches.
    pub fn from_topic(topic: &str) -> Option<Self> {
        let last = final_segment(topic);
        Self::ALL.into_iter().find(|k| last.contains(k.marker()))
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final `/`-separated segment of a topic.
pub fn final_segment(topic: &str) -> &str {
    topic.rsplit('/').next().unwrap_or(topic)
}

/// Second path segment of a topic, the key subscribers register under.
///
/// `STMS1/pdstop` yields `pdstop`; a single-segment topic yields `None`.
pub fn topic_category(topic: &str) -> Option<&str> {
    topic.split('/').nth(1).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_topic() {
        assert_eq!(MessageKind::from_topic("STMS1/adstop"), Some(MessageKind::Analog));
        assert_eq!(MessageKind::from_topic("STMS1/ddstop"), Some(MessageKind::Digital));
        assert_eq!(MessageKind::from_topic("STMS1/pdstop"), Some(MessageKind::Phase));
        assert_eq!(MessageKind::from_topic("a/b/pqstop"), Some(MessageKind::PowerQuality));
        assert_eq!(MessageKind::from_topic("STMS1/conditions"), None);
    }

    #[test]
    fn test_kind_marker_is_case_sensitive_and_last_segment_only() {
        assert_eq!(MessageKind::from_topic("STMS1/PDSTOP"), None);
        assert_eq!(MessageKind::from_topic("pdstop/other"), None);
    }

    #[test]
    fn test_topic_category() {
        assert_eq!(topic_category("STMS1/pdstop"), Some("pdstop"));
        assert_eq!(topic_category("STMS1/pqstop/extra"), Some("pqstop"));
        assert_eq!(topic_category("STMS1"), None);
        assert_eq!(topic_category("STMS1/"), None);
    }
}
