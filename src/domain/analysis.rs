use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::DomainError;

/// Upper bound on text sent for analysis, in bytes.
pub const MAX_TEXT_BYTES: usize = 32 * 1024;

/// Text submitted for categorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub text: String,
}

impl AnalysisRequest {
    /// Trims surrounding whitespace and rejects empty or oversized input.
    pub fn new(text: impl AsRef<str>) -> Result<Self, DomainError> {
        let text = text.as_ref().trim();
        if text.is_empty() {
            return Err(DomainError::validation("text must not be empty"));
        }
        if text.len() > MAX_TEXT_BYTES {
            return Err(DomainError::validation(format!(
                "text exceeds {MAX_TEXT_BYTES} bytes"
            )));
        }
        Ok(Self {
            text: text.to_string(),
        })
    }

    /// Stable cache key: hex SHA-256 of the trimmed text.
    pub fn cache_key(&self) -> String {
        hex::encode(Sha256::digest(self.text.as_bytes()))
    }
}

/// Structured result returned by the analysis service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Categorization {
    pub category: String,
    pub confidence: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_and_keys_by_content() {
        let padded = AnalysisRequest::new("  buy milk \n").expect("valid");
        let plain = AnalysisRequest::new("buy milk").expect("valid");

        assert_eq!(padded, plain);
        assert_eq!(padded.cache_key(), plain.cache_key());
        assert_eq!(padded.cache_key().len(), 64);
        assert_ne!(
            plain.cache_key(),
            AnalysisRequest::new("buy bread").expect("valid").cache_key()
        );
    }

    #[test]
    fn rejects_blank_and_oversized_text() {
        assert!(matches!(
            AnalysisRequest::new(" \t "),
            Err(DomainError::Validation { .. })
        ));
        assert!(AnalysisRequest::new("x".repeat(MAX_TEXT_BYTES + 1)).is_err());
    }

    #[test]
    fn categorization_tolerates_missing_optional_fields() {
        let parsed: Categorization =
            serde_json::from_str(r#"{"category":"errand","confidence":0.9}"#).expect("parse");
        assert!(parsed.tags.is_empty());
        assert!(parsed.summary.is_empty());
    }
}
