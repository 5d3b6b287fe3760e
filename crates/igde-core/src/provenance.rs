use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{IgdeError, Value};

pub mod source_codes {
    pub const NHD_WATERBODY: &str = "nhdw";
    pub const NHD_FLOWLINE: &str = "nhdf";
    pub const NNHP: &str = "nnhp";
    pub const LANDFIRE: &str = "lf";
    pub const DRI_PHREATOPHYTES: &str = "drip";
    pub const DRI_WETLANDS: &str = "driw";
    pub const SSI: &str = "ssi";
    /// Classified vegetation rasters, one code per mapped area.
    pub const TNC_RASTERS: [&str; 11] = [
        "nvtnc1", "nvtnc2", "nvtnc3", "nvtnc4", "nvtnc5", "nvtnc6", "nvtnc7", "nvtnc8", "nvtnc9",
        "nvtnc10", "nvtnc11",
    ];
}

/// Provenance tag written to `SOURCE_CODE`: lowercase ASCII letters and digits, 1..=10 long.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct SourceCode(String);

impl SourceCode {
    /// # Errors
    /// Returns [`IgdeError::Validation`] when `value` is empty, longer than ten
    /// characters, or contains anything other than lowercase letters and digits.
    pub fn parse(value: &str) -> Result<Self, IgdeError> {
        let valid = !value.is_empty()
            && value.len() <= 10
            && value.chars().all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit());
        if valid {
            Ok(Self(value.to_string()))
        } else {
            Err(IgdeError::Validation(format!("invalid source code: {value:?}")))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::text(&self.0)
    }
}

impl Display for SourceCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SourceCode {
    type Error = IgdeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SourceCode> for String {
    fn from(value: SourceCode) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_parse() {
        for code in [
            source_codes::NHD_WATERBODY,
            source_codes::NHD_FLOWLINE,
            source_codes::NNHP,
            source_codes::LANDFIRE,
            source_codes::DRI_PHREATOPHYTES,
            source_codes::DRI_WETLANDS,
            source_codes::SSI,
        ]
        .into_iter()
        .chain(source_codes::TNC_RASTERS)
        {
            let parsed = SourceCode::parse(code).map(|parsed| parsed.to_string());
            assert_eq!(parsed, Ok(code.to_string()));
        }
    }

    #[test]
    fn malformed_codes_are_rejected() {
        for code in ["", "NHDW", "nhd w", "waytoolongcode"] {
            assert!(SourceCode::parse(code).is_err(), "{code:?} should be rejected");
        }
    }

    #[test]
    fn serde_validates_on_the_way_in() {
        let parsed: Result<SourceCode, _> = serde_json::from_str("\"ssi\"");
        assert!(parsed.is_ok());
        let rejected: Result<SourceCode, _> = serde_json::from_str("\"SSI\"");
        assert!(rejected.is_err());
    }
}
