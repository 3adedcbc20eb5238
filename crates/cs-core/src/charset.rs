//! Supported character-set labels
//!
//! The override never installs a label outside this fixed set; anything else
//! is rejected before any engine or store mutation. The canonical spelling
//! below is what gets persisted and written into header values.

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// =============================================================================
// Charset
// =============================================================================

/// A supported character encoding label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Charset {
    Utf8 = 0,
    Gbk = 1,
    Gb18030 = 2,
    Big5 = 3,
    ShiftJis = 4,
    EucJp = 5,
    EucKr = 6,
    Windows1251 = 7,
    Windows1252 = 8,
}

/// All supported charsets, in menu order.
pub const SUPPORTED_CHARSETS: [Charset; 9] = [
    Charset::Utf8,
    Charset::Gbk,
    Charset::Gb18030,
    Charset::Big5,
    Charset::ShiftJis,
    Charset::EucJp,
    Charset::EucKr,
    Charset::Windows1251,
    Charset::Windows1252,
];

impl Charset {
    /// Canonical label, as persisted and as written into header values.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Utf8 => "UTF-8",
            Self::Gbk => "GBK",
            Self::Gb18030 => "GB18030",
            Self::Big5 => "Big5",
            Self::ShiftJis => "Shift_JIS",
            Self::EucJp => "EUC-JP",
            Self::EucKr => "EUC-KR",
            Self::Windows1251 => "windows-1251",
            Self::Windows1252 => "windows-1252",
        }
    }

    /// Case-insensitive lookup against the supported set.
    pub fn from_label(label: &str) -> Result<Self, UnknownLabel> {
        let trimmed = label.trim();
        for charset in SUPPORTED_CHARSETS {
            if charset.as_str().eq_ignore_ascii_case(trimmed) {
                return Ok(charset);
            }
        }
        Err(UnknownLabel(trimmed.to_string()))
    }

    /// `Content-Type` value a rule writes for this charset.
    pub fn content_type_value(self) -> String {
        format!("text/html; charset={}", self.as_str())
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Charset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Charset {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LabelVisitor;

        impl Visitor<'_> for LabelVisitor {
            type Value = Charset;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a supported charset label")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Charset, E> {
                Charset::from_label(value).map_err(|e| E::custom(e))
            }
        }

        deserializer.deserialize_str(LabelVisitor)
    }
}

// =============================================================================
// Errors
// =============================================================================

/// A label outside the supported set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported charset label: '{0}'")]
pub struct UnknownLabel(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(Charset::from_label("utf-8"), Ok(Charset::Utf8));
        assert_eq!(Charset::from_label("GBK"), Ok(Charset::Gbk));
        assert_eq!(Charset::from_label("shift_jis"), Ok(Charset::ShiftJis));
        assert_eq!(Charset::from_label("WINDOWS-1251"), Ok(Charset::Windows1251));
        assert_eq!(Charset::from_label("  Big5  "), Ok(Charset::Big5));
    }

    #[test]
    fn unknown_labels_are_rejected() {
        assert!(Charset::from_label("KOI8-R").is_err());
        assert!(Charset::from_label("").is_err());
        assert!(Charset::from_label("utf8").is_err());
    }

    #[test]
    fn canonical_spelling_survives_lossy_input() {
        let charset = Charset::from_label("euc-jp").unwrap();
        assert_eq!(charset.as_str(), "EUC-JP");
    }

    #[test]
    fn content_type_value_carries_label() {
        assert_eq!(
            Charset::Big5.content_type_value(),
            "text/html; charset=Big5"
        );
        assert_eq!(
            Charset::Utf8.content_type_value(),
            "text/html; charset=UTF-8"
        );
    }

    #[test]
    fn serde_round_trip_uses_canonical_label() {
        let json = serde_json::to_string(&Charset::EucKr).unwrap();
        assert_eq!(json, "\"EUC-KR\"");
        let back: Charset = serde_json::from_str("\"euc-kr\"").unwrap();
        assert_eq!(back, Charset::EucKr);
        assert!(serde_json::from_str::<Charset>("\"latin-9\"").is_err());
    }

    #[test]
    fn supported_set_has_no_duplicates() {
        for (i, a) in SUPPORTED_CHARSETS.iter().enumerate() {
            for b in &SUPPORTED_CHARSETS[i + 1..] {
                assert_ne!(a.as_str(), b.as_str());
            }
        }
    }
}
