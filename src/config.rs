//! Configuration for the consolidation pipeline
//!
//! Every threshold the stages use lives here so it can be tuned against a real
//! corpus. All structs deserialize from JSON with missing fields falling back
//! to the defaults below.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Errors raised while loading or checking configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level options for an extraction run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Minimum detector confidence to avoid rejection (0.0 - 1.0)
    pub confidence_threshold: f32,
    /// Drop letterhead and running header/footer spans before title resolution
    pub exclude_headers: bool,
    /// Run the relationship linker
    pub capture_context: bool,
    /// Feed canonical tables into the pattern memory
    pub enable_learning: bool,
    /// Worker-pool size for cross-document concurrency
    pub parallel_agents: usize,
    pub titles: TitleConfig,
    pub merge: MergeConfig,
    pub linking: LinkConfig,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.95,
            exclude_headers: true,
            capture_context: true,
            enable_learning: true,
            parallel_agents: 5,
            titles: TitleConfig::default(),
            merge: MergeConfig::default(),
            linking: LinkConfig::default(),
        }
    }
}

impl ExtractionConfig {
    /// Load a configuration file (JSON), normalize and validate it
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: ExtractionConfig = serde_json::from_str(&raw)?;
        let config = config.normalized();
        config.validate()?;
        Ok(config)
    }

    /// Accept thresholds written on a 0-100 scale (e.g. `95`)
    pub fn normalized(mut self) -> Self {
        if self.confidence_threshold > 1.0 && self.confidence_threshold <= 100.0 {
            log::warn!(
                "confidence_threshold {} looks like a percentage, using {}",
                self.confidence_threshold,
                self.confidence_threshold / 100.0
            );
            self.confidence_threshold /= 100.0;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::Invalid {
                field: "confidence_threshold",
                reason: format!("{} is outside 0.0..=1.0", self.confidence_threshold),
            });
        }
        if self.parallel_agents == 0 {
            return Err(ConfigError::Invalid {
                field: "parallel_agents",
                reason: "must be at least 1".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.merge.header_similarity_threshold) {
            return Err(ConfigError::Invalid {
                field: "merge.header_similarity_threshold",
                reason: format!("{} is outside 0.0..=1.0", self.merge.header_similarity_threshold),
            });
        }
        if self.titles.max_title_distance <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "titles.max_title_distance",
                reason: "must be positive".into(),
            });
        }
        if self.linking.min_shared_title_terms == 0 {
            return Err(ConfigError::Invalid {
                field: "linking.min_shared_title_terms",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Title/caption resolution tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TitleConfig {
    /// Maximum vertical gap (points) for a span above the table to count as its title
    pub max_title_distance: f32,
    /// Lower-cased keywords marking letterhead and contact lines
    pub letterhead_keywords: Vec<String>,
}

impl Default for TitleConfig {
    fn default() -> Self {
        let keywords = [
            "office",
            "tel",
            "fax",
            "phone",
            "mobile",
            "suite",
            "street",
            "avenue",
            "p.o. box",
            "confidential",
            "copyright",
            "©",
            "all rights reserved",
            "letterhead",
        ];
        Self {
            max_title_distance: 60.0,
            letterhead_keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Deduplication and merge tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Minimum header token-set overlap for two detections to be one table
    pub header_similarity_threshold: f32,
    /// Box overlap above which two same-page detections are duplicates
    pub duplicate_overlap_ratio: f32,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            header_similarity_threshold: 0.6,
            duplicate_overlap_ratio: 0.5,
        }
    }
}

/// A keyword group mapping titles to a document section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionRule {
    pub section: String,
    pub keywords: Vec<String>,
}

impl SectionRule {
    pub fn new(section: &str, keywords: &[&str]) -> Self {
        Self {
            section: section.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Relationship linker tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Shared title terms needed for a lexical-overlap edge
    pub min_shared_title_terms: usize,
    /// Words ignored when comparing titles
    pub stopwords: Vec<String>,
    /// Checked in order; first matching rule wins
    pub sections: Vec<SectionRule>,
    /// Section for titles no rule matches
    pub default_section: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        let stopwords = [
            "a", "an", "and", "as", "at", "by", "for", "from", "in", "into", "of", "on", "or",
            "per", "the", "to", "vs", "with", "table",
        ];
        Self {
            min_shared_title_terms: 3,
            stopwords: stopwords.iter().map(|w| w.to_string()).collect(),
            sections: vec![
                SectionRule::new("Financial Summary", &["cost", "budget"]),
                SectionRule::new("Project Timeline", &["milestone", "schedule"]),
            ],
            default_section: "Technical Details".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_surface() {
        let config = ExtractionConfig::default();
        assert!((config.confidence_threshold - 0.95).abs() < 1e-6);
        assert!(config.exclude_headers);
        assert!(config.capture_context);
        assert!(config.enable_learning);
        assert_eq!(config.parallel_agents, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ExtractionConfig =
            serde_json::from_str(r#"{"parallel_agents": 10, "merge": {"duplicate_overlap_ratio": 0.8}}"#)
                .unwrap();
        assert_eq!(config.parallel_agents, 10);
        assert!((config.merge.duplicate_overlap_ratio - 0.8).abs() < 1e-6);
        assert!((config.merge.header_similarity_threshold - 0.6).abs() < 1e-6);
        assert_eq!(config.linking.min_shared_title_terms, 3);
    }

    #[test]
    fn test_percent_threshold_normalized() {
        let config = ExtractionConfig {
            confidence_threshold: 95.0,
            ..Default::default()
        }
        .normalized();
        assert!((config.confidence_threshold - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = ExtractionConfig {
            parallel_agents: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "parallel_agents", .. })
        ));

        let config = ExtractionConfig {
            confidence_threshold: 250.0,
            ..Default::default()
        }
        .normalized();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"confidence_threshold": 80, "capture_context": false}"#).unwrap();
        let config = ExtractionConfig::from_file(&path).unwrap();
        assert!((config.confidence_threshold - 0.8).abs() < 1e-6);
        assert!(!config.capture_context);
    }
}
