//! Normalized AI gateway result

use serde::{Deserialize, Serialize};
use tagiato_common::{AiOperation, GpsCoordinates};

/// Coarse trust label a locate backend attaches to its guess
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

impl ConfidenceTier {
    /// Map a model-supplied label; `None` for anything outside the three tiers
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "high" => Some(ConfidenceTier::High),
            "medium" => Some(ConfidenceTier::Medium),
            "low" => Some(ConfidenceTier::Low),
            _ => None,
        }
    }
}

/// Structured result of one describe/locate invocation
///
/// `empty` distinguishes "the model had nothing to say" from a failed call;
/// failures never produce an `AiResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiResult {
    pub operation: AiOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refined_gps: Option<GpsCoordinates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_name: Option<String>,
    /// Passed through exactly as the model reported it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub empty: bool,
}

impl AiResult {
    pub fn empty(operation: AiOperation) -> Self {
        Self {
            operation,
            description: None,
            refined_gps: None,
            location_name: None,
            confidence: None,
            reasoning: None,
            empty: true,
        }
    }

    /// Typed view of the confidence label, if it is one of the known tiers
    pub fn confidence_tier(&self) -> Option<ConfidenceTier> {
        self.confidence.as_deref().and_then(ConfidenceTier::from_label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_tier_mapping() {
        assert_eq!(ConfidenceTier::from_label("HIGH"), Some(ConfidenceTier::High));
        assert_eq!(ConfidenceTier::from_label(" medium "), Some(ConfidenceTier::Medium));
        assert_eq!(ConfidenceTier::from_label("certain"), None);
    }

    #[test]
    fn test_unknown_confidence_kept_verbatim() {
        let mut result = AiResult::empty(AiOperation::Locate);
        result.confidence = Some("very sure".to_string());
        assert_eq!(result.confidence.as_deref(), Some("very sure"));
        assert_eq!(result.confidence_tier(), None);
    }
}
