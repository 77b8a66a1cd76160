//! ISO 3166-1 alpha-2 country codes.

use core::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Errors that can occur when parsing a [`CountryCode`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CountryCodeError {
    /// The input string is empty.
    #[error("country code cannot be empty")]
    Empty,
    /// The input is not two ASCII letters.
    #[error("country code must be two letters (got {0:?})")]
    Malformed(String),
}

/// A destination country, normalised to upper case.
///
/// `UK` is accepted as an alias and stored as `GB`, which is what payment
/// gateways send back in shipping addresses.
///
/// ```
/// use backline_core::CountryCode;
///
/// assert_eq!(CountryCode::parse(" de ").unwrap().as_str(), "DE");
/// assert_eq!(CountryCode::parse("uk").unwrap().as_str(), "GB");
/// assert!(CountryCode::parse("Germany").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct CountryCode(String);

impl CountryCode {
    /// Parse a country code.
    ///
    /// # Errors
    ///
    /// Returns an error if the trimmed input is empty or is not exactly two
    /// ASCII letters.
    pub fn parse(s: &str) -> Result<Self, CountryCodeError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(CountryCodeError::Empty);
        }

        if trimmed.len() != 2 || !trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(CountryCodeError::Malformed(trimmed.to_owned()));
        }

        let upper = trimmed.to_ascii_uppercase();
        if upper == "UK" {
            return Ok(Self("GB".to_owned()));
        }

        Ok(Self(upper))
    }

    /// Returns the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CountryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for CountryCode {
    type Err = CountryCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for CountryCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for CountryCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalises_case() {
        assert_eq!(CountryCode::parse("fr").unwrap().as_str(), "FR");
    }

    #[test]
    fn test_uk_alias() {
        assert_eq!(CountryCode::parse("UK").unwrap(), CountryCode::parse("gb").unwrap());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(CountryCode::parse(""), Err(CountryCodeError::Empty)));
        assert!(matches!(
            CountryCode::parse("DEU"),
            Err(CountryCodeError::Malformed(_))
        ));
        assert!(matches!(
            CountryCode::parse("1A"),
            Err(CountryCodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_deserialize_validates() {
        let code: CountryCode = serde_json::from_str("\"ch\"").unwrap();
        assert_eq!(code.as_str(), "CH");
        assert!(serde_json::from_str::<CountryCode>("\"Switzerland\"").is_err());
    }
}
