//! Environment-backed settings.
//!
//! All knobs live in env vars (optionally loaded from `.env` via dotenvy).
//! Values with a sensible default fall back silently; API keys are validated
//! lazily at first use so that offline paths (segmentation, validation) work
//! without any credentials.

use std::env;
use std::sync::OnceLock;

use crate::error::{Error, Result};

/// Process-wide settings resolved from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    // LLM providers
    pub openai_api_key: String,
    pub gemini_api_key: String,
    pub gemini_final_model: String,
    pub gemini_label_model: String,
    pub openai_temperature: f64,
    pub openai_max_tokens: u32,
    pub openai_max_tokens_paid: u32,

    // Segmenter
    pub segmenter_max_segment_length: usize,
    pub segmenter_discourse_marker_min_length: usize,
    pub segmenter_enumeration_min_length: usize,

    // Tier
    pub tier_paid_max_text_length: usize,

    // RAG
    pub rag_enabled: bool,
    pub rag_embedding_model: String,
    pub rag_admin_token: String,
    pub rag_mmr_duplicate_threshold: f32,
    pub database_path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            gemini_api_key: String::new(),
            gemini_final_model: "gemini-2.5-flash".to_string(),
            gemini_label_model: "gemini-2.5-flash-lite".to_string(),
            openai_temperature: 0.85,
            openai_max_tokens: 2000,
            openai_max_tokens_paid: 4000,
            segmenter_max_segment_length: 250,
            segmenter_discourse_marker_min_length: 150,
            segmenter_enumeration_min_length: 120,
            tier_paid_max_text_length: 2000,
            rag_enabled: false,
            rag_embedding_model: "text-embedding-3-small".to_string(),
            rag_admin_token: String::new(),
            rag_mmr_duplicate_threshold: 0.92,
            database_path: "./politely.db".to_string(),
        }
    }
}

impl Settings {
    /// Read settings from the environment, loading `.env` if present.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let d = Settings::default();

        Self {
            openai_api_key: var_or("OPENAI_API_KEY", d.openai_api_key),
            gemini_api_key: var_or("GEMINI_API_KEY", d.gemini_api_key),
            gemini_final_model: var_or("GEMINI_FINAL_MODEL", d.gemini_final_model),
            gemini_label_model: var_or("GEMINI_LABEL_MODEL", d.gemini_label_model),
            openai_temperature: parse_or("OPENAI_TEMPERATURE", d.openai_temperature),
            openai_max_tokens: parse_or("OPENAI_MAX_TOKENS", d.openai_max_tokens),
            openai_max_tokens_paid: parse_or("OPENAI_MAX_TOKENS_PAID", d.openai_max_tokens_paid),
            segmenter_max_segment_length: parse_or(
                "SEGMENTER_MAX_SEGMENT_LENGTH",
                d.segmenter_max_segment_length,
            ),
            segmenter_discourse_marker_min_length: parse_or(
                "SEGMENTER_DISCOURSE_MARKER_MIN_LENGTH",
                d.segmenter_discourse_marker_min_length,
            ),
            segmenter_enumeration_min_length: parse_or(
                "SEGMENTER_ENUMERATION_MIN_LENGTH",
                d.segmenter_enumeration_min_length,
            ),
            tier_paid_max_text_length: parse_or(
                "TIER_PAID_MAX_TEXT_LENGTH",
                d.tier_paid_max_text_length,
            ),
            rag_enabled: parse_or("RAG_ENABLED", d.rag_enabled),
            rag_embedding_model: var_or("RAG_EMBEDDING_MODEL", d.rag_embedding_model),
            rag_admin_token: var_or("RAG_ADMIN_TOKEN", d.rag_admin_token),
            rag_mmr_duplicate_threshold: parse_or(
                "RAG_MMR_DUPLICATE_THRESHOLD",
                d.rag_mmr_duplicate_threshold,
            ),
            database_path: var_or("DATABASE_PATH", d.database_path),
        }
    }

    /// OpenAI API key, failing fast if unset.
    pub fn require_openai_key(&self) -> Result<&str> {
        if self.openai_api_key.is_empty() {
            return Err(Error::config("OPENAI_API_KEY is not set"));
        }
        Ok(&self.openai_api_key)
    }

    /// Gemini API key, failing fast if unset.
    pub fn require_gemini_key(&self) -> Result<&str> {
        if self.gemini_api_key.is_empty() {
            return Err(Error::config("GEMINI_API_KEY is not set"));
        }
        Ok(&self.gemini_api_key)
    }
}

static SETTINGS: OnceLock<Settings> = OnceLock::new();

/// Process-wide settings, resolved from the environment on first access.
pub fn settings() -> &'static Settings {
    SETTINGS.get_or_init(Settings::from_env)
}

/// Install explicit settings (tests, embedders). First install wins.
pub fn init_settings(s: Settings) -> &'static Settings {
    SETTINGS.get_or_init(|| s)
}

fn var_or(key: &str, default: String) -> String {
    env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or(default)
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.segmenter_max_segment_length, 250);
        assert_eq!(s.segmenter_discourse_marker_min_length, 150);
        assert_eq!(s.segmenter_enumeration_min_length, 120);
        assert_eq!(s.openai_max_tokens_paid, 4000);
        assert!((s.rag_mmr_duplicate_threshold - 0.92).abs() < 1e-6);
        assert!(!s.rag_enabled);
    }

    #[test]
    fn test_missing_keys_fail_at_first_use() {
        let s = Settings::default();
        assert!(s.require_openai_key().is_err());
        assert!(s.require_gemini_key().is_err());

        let mut s = Settings::default();
        s.gemini_api_key = "key".to_string();
        assert!(s.require_gemini_key().is_ok());
    }
}
