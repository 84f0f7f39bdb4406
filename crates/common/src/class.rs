//! Image class partitioning.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{FINALS_SEGMENT, ORIGINALS_SEGMENT};
use crate::error::ClassParseError;

/// Which bucket of a gallery's images a byte count belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageClass {
    /// Uploaded source images, before client selection.
    Original,
    /// Delivered images tied to an order.
    Final,
}

impl ImageClass {
    /// Both classes, in the order a reconciliation aggregates them.
    pub const ALL: [ImageClass; 2] = [ImageClass::Original, ImageClass::Final];

    /// Value of the `type` attribute in the image index.
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageClass::Original => "original",
            ImageClass::Final => "final",
        }
    }

    /// Key segment directly under the gallery id.
    pub fn key_segment(&self) -> &'static str {
        match self {
            ImageClass::Original => ORIGINALS_SEGMENT,
            ImageClass::Final => FINALS_SEGMENT,
        }
    }

    /// Listing prefix for this class within a gallery.
    /// Returns: "{gallery_id}/originals/" or "{gallery_id}/final/"
    ///
    /// # Arguments
    /// * `gallery_id` - Gallery identifier
    pub fn prefix(&self, gallery_id: &str) -> String {
        format!("{}/{}/", gallery_id, self.key_segment())
    }
}

impl fmt::Display for ImageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageClass {
    type Err = ClassParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "original" => Ok(ImageClass::Original),
            "final" => Ok(ImageClass::Final),
            other => Err(ClassParseError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixes() {
        assert_eq!(ImageClass::Original.prefix("g1"), "g1/originals/");
        assert_eq!(ImageClass::Final.prefix("g1"), "g1/final/");
    }

    #[test]
    fn test_parse() {
        assert_eq!("original".parse::<ImageClass>(), Ok(ImageClass::Original));
        assert_eq!("final".parse::<ImageClass>(), Ok(ImageClass::Final));
        assert!("thumb".parse::<ImageClass>().is_err());
    }
}
