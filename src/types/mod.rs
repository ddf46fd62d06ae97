//! Core data model shared by every stage of the pipeline.
//!
//! An [`Ordinal`] is the positional index that ties together the embedding
//! matrix row, the record table row, the ANN index internal id and the
//! projection point of one item.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Positional index shared across all aligned artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ordinal(pub u32);

impl Ordinal {
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn as_usize(&self) -> usize {
        self.0 as usize
    }

    /// Converts a row position to an ordinal, failing past `u32::MAX`.
    pub fn from_position(position: usize) -> Option<Self> {
        u32::try_from(position).ok().map(Self)
    }
}

impl fmt::Display for Ordinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Ordinal {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Media type of a raw record, also used as the query modality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Text,
    Image,
    Audio,
    Video,
}

/// The modality of a query is drawn from the same set as record media types.
pub type Modality = MediaType;

impl MediaType {
    pub const ALL: [MediaType; 4] = [
        MediaType::Text,
        MediaType::Image,
        MediaType::Audio,
        MediaType::Video,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MediaType::Text => "text",
            MediaType::Image => "image",
            MediaType::Audio => "audio",
            MediaType::Video => "video",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string names no known media type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown media type '{0}'. Supported types: text, image, audio, video")]
pub struct UnknownMediaType(pub String);

impl FromStr for MediaType {
    type Err = UnknownMediaType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(MediaType::Text),
            "image" => Ok(MediaType::Image),
            "audio" => Ok(MediaType::Audio),
            "video" => Ok(MediaType::Video),
            _ => Err(UnknownMediaType(s.to_string())),
        }
    }
}

/// One row of the positional record table, materialized with its ordinal.
///
/// Serializes as `{index, data, media_type}` for the query API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(rename = "index")]
    pub ordinal: Ordinal,
    pub data: String,
    pub media_type: MediaType,
}

/// A 2D layout position plus cluster label, aligned 1:1 with record ordinals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectionPoint {
    pub x: f32,
    pub y: f32,
    pub cluster: u32,
}

impl ProjectionPoint {
    /// The `[x, y, cluster]` triple consumed by the visualization client.
    #[must_use]
    pub fn to_triple(&self) -> [f32; 3] {
        [self.x, self.y, self.cluster as f32]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_parsing() {
        assert_eq!("text".parse::<MediaType>().unwrap(), MediaType::Text);
        assert_eq!(" Audio ".parse::<MediaType>().unwrap(), MediaType::Audio);
        assert!("hologram".parse::<MediaType>().is_err());

        for media in MediaType::ALL {
            assert_eq!(media.as_str().parse::<MediaType>().unwrap(), media);
        }
    }

    #[test]
    fn test_raw_record_serializes_as_api_shape() {
        let record = RawRecord {
            ordinal: Ordinal::new(7),
            data: "Asian stock markets".to_string(),
            media_type: MediaType::Text,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["index"], 7);
        assert_eq!(json["data"], "Asian stock markets");
        assert_eq!(json["media_type"], "text");
    }

    #[test]
    fn test_ordinal_from_position() {
        assert_eq!(Ordinal::from_position(12), Some(Ordinal::new(12)));
        assert!(Ordinal::from_position(u32::MAX as usize + 1).is_none());
    }
}
