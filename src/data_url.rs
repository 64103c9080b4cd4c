//! `data:` URL encoding for images in transit.
//!
//! Images travel between the record store and the generation service as
//! `data:<mime>;base64,<payload>` strings, the same form a browser produces
//! when reading a file as a data URL.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::{Error, Result};

/// MIME type attached to every image the service hands back.
pub const OUTPUT_MIME: &str = "image/png";

/// An image encoded as a `data:` URL with a base64 payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUrl {
    mime_type: String,
    payload: String,
}

impl DataUrl {
    /// Encode raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8], mime_type: &str) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            payload: STANDARD.encode(bytes),
        }
    }

    /// Wrap an already base64-encoded payload without re-encoding it.
    #[must_use]
    pub fn from_base64(payload: impl Into<String>, mime_type: &str) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            payload: payload.into(),
        }
    }

    /// Parse a `data:<mime>;base64,<payload>` string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDataUrl`] if the scheme, the base64 marker or
    /// the comma separator is missing.
    pub fn parse(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix("data:")
            .ok_or_else(|| Error::InvalidDataUrl("missing data: scheme".to_string()))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| Error::InvalidDataUrl("missing ',' separator".to_string()))?;
        let mime_type = header
            .strip_suffix(";base64")
            .ok_or_else(|| Error::InvalidDataUrl(format!("not base64-encoded: {header}")))?;
        Ok(Self::from_base64(payload, mime_type))
    }

    /// MIME type declared in the header.
    #[must_use]
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// The base64 payload, without header.
    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Decode the payload back to raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Base64`] if the payload is not valid base64.
    pub fn decode(&self) -> Result<Vec<u8>> {
        Ok(STANDARD.decode(self.payload.as_bytes())?)
    }
}

impl fmt::Display for DataUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data:{};base64,{}", self.mime_type, self.payload)
    }
}

/// Strip a transport prefix such as `data:image/jpeg;base64,`.
///
/// Anything after the first comma is the payload; input without a comma is
/// returned unchanged.
#[must_use]
pub fn strip_transport_prefix(encoded: &str) -> &str {
    match encoded.split_once(',') {
        Some((_, payload)) if !payload.is_empty() => payload,
        _ => encoded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reads_mime_and_payload() {
        let url = DataUrl::parse("data:image/jpeg;base64,AAEC").unwrap();
        assert_eq!(url.mime_type(), "image/jpeg");
        assert_eq!(url.payload(), "AAEC");
        assert_eq!(url.decode().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn parse_rejects_non_data_urls() {
        assert!(matches!(
            DataUrl::parse("blob:1234"),
            Err(Error::InvalidDataUrl(_))
        ));
        assert!(matches!(
            DataUrl::parse("data:image/png,plain"),
            Err(Error::InvalidDataUrl(_))
        ));
        assert!(matches!(
            DataUrl::parse("data:image/png;base64"),
            Err(Error::InvalidDataUrl(_))
        ));
    }

    #[test]
    fn display_matches_browser_form() {
        let url = DataUrl::from_bytes(b"hi", OUTPUT_MIME);
        assert_eq!(url.to_string(), "data:image/png;base64,aGk=");
    }

    #[test]
    fn strip_transport_prefix_handles_both_forms() {
        assert_eq!(strip_transport_prefix("data:image/png;base64,aGk="), "aGk=");
        assert_eq!(strip_transport_prefix("aGk="), "aGk=");
        assert_eq!(strip_transport_prefix("data:image/png;base64,"), "data:image/png;base64,");
    }

    #[test]
    fn decode_rejects_garbage() {
        let url = DataUrl::from_base64("***", OUTPUT_MIME);
        assert!(matches!(url.decode(), Err(Error::Base64(_))));
    }
}
