//! Per-job research configuration.
//!
//! A [`ResearchConfig`] is resolved once when a job is created and stored with
//! the job, so a resumed run in another process sees exactly the settings the
//! job started with.

use crate::types::{AppError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

pub const DEFAULT_REPORT_STRUCTURE: &str = "Use this structure to create a report on the user-provided topic:
Main Body Sections:
   - Each section should focus on a sub-topic of the user-provided topic
   - If the user provided a question, make the critical sections answer that question
   - Do not include an introduction or conclusion";

/// Upper bound for `request_delay_secs`
pub const MAX_REQUEST_DELAY_SECS: f64 = 3600.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchConfig {
    #[serde(default = "default_report_structure")]
    pub report_structure: String,

    /// Search queries generated per provider per step
    #[serde(default = "default_number_of_queries")]
    pub number_of_queries: usize,

    /// Failed grades a section may retry before it is accepted as-is
    #[serde(default = "default_max_reflection")]
    pub max_reflection: u32,

    #[serde(default = "default_max_sections")]
    pub max_sections: usize,

    #[serde(default = "default_max_section_words")]
    pub max_section_words: usize,

    #[serde(default = "default_max_subsection_words")]
    pub max_subsection_words: usize,

    #[serde(default = "default_max_introduction_words")]
    pub max_introduction_words: usize,

    #[serde(default = "default_max_conclusion_words")]
    pub max_conclusion_words: usize,

    #[serde(default = "default_true")]
    pub enable_deep_research: bool,

    #[serde(default = "default_deep_research_depth")]
    pub deep_research_depth: u32,

    #[serde(default = "default_deep_research_breadth")]
    pub deep_research_breadth: usize,

    #[serde(default)]
    pub skip_human_feedback: bool,

    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default = "default_provider")]
    pub introduction_search_provider: String,

    #[serde(default = "default_provider")]
    pub planning_search_provider: String,

    #[serde(default = "default_provider")]
    pub default_search_provider: String,

    #[serde(default = "default_provider_list")]
    pub available_search_providers: Vec<String>,

    #[serde(default = "default_provider_list")]
    pub deep_research_providers: Vec<String>,

    /// Parameter block per search provider id
    #[serde(default = "default_provider_params")]
    pub provider_params: HashMap<String, Value>,

    #[serde(default = "default_max_tokens_per_source")]
    pub max_tokens_per_source: usize,

    /// Courtesy delay awaited before every search and write call
    #[serde(default = "default_request_delay_secs")]
    pub request_delay_secs: f64,

    /// Model used for planning, query generation and grading
    #[serde(default = "default_planner_model")]
    pub planner_model: String,

    #[serde(default = "default_writer_model")]
    pub writer_model: String,

    #[serde(default = "default_writer_model")]
    pub conclusion_model: String,
}

fn default_report_structure() -> String {
    DEFAULT_REPORT_STRUCTURE.to_string()
}

fn default_number_of_queries() -> usize {
    2
}

fn default_max_reflection() -> u32 {
    2
}

fn default_max_sections() -> usize {
    6
}

fn default_max_section_words() -> usize {
    1000
}

fn default_max_subsection_words() -> usize {
    500
}

fn default_max_introduction_words() -> usize {
    500
}

fn default_max_conclusion_words() -> usize {
    500
}

fn default_true() -> bool {
    true
}

fn default_deep_research_depth() -> u32 {
    1
}

fn default_deep_research_breadth() -> usize {
    2
}

fn default_language() -> String {
    "english".to_string()
}

fn default_provider() -> String {
    "duckduckgo".to_string()
}

fn default_provider_list() -> Vec<String> {
    vec![default_provider()]
}

fn default_provider_params() -> HashMap<String, Value> {
    HashMap::from([
        ("duckduckgo".to_string(), json!({ "max_results": 5 })),
        (
            "tavily".to_string(),
            json!({ "max_results": 5, "search_depth": "basic", "include_raw_content": true }),
        ),
        ("arxiv".to_string(), json!({ "max_results": 5 })),
        (
            "local".to_string(),
            json!({ "chunk_size": 300, "chunk_overlap": 50, "top_k": 5, "ephemeral": false }),
        ),
        ("patent".to_string(), json!({ "top_k": 10 })),
    ])
}

fn default_max_tokens_per_source() -> usize {
    8192
}

fn default_request_delay_secs() -> f64 {
    1.0
}

fn default_planner_model() -> String {
    "planner".to_string()
}

fn default_writer_model() -> String {
    "writer".to_string()
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            report_structure: default_report_structure(),
            number_of_queries: default_number_of_queries(),
            max_reflection: default_max_reflection(),
            max_sections: default_max_sections(),
            max_section_words: default_max_section_words(),
            max_subsection_words: default_max_subsection_words(),
            max_introduction_words: default_max_introduction_words(),
            max_conclusion_words: default_max_conclusion_words(),
            enable_deep_research: true,
            deep_research_depth: default_deep_research_depth(),
            deep_research_breadth: default_deep_research_breadth(),
            skip_human_feedback: false,
            language: default_language(),
            introduction_search_provider: default_provider(),
            planning_search_provider: default_provider(),
            default_search_provider: default_provider(),
            available_search_providers: default_provider_list(),
            deep_research_providers: default_provider_list(),
            provider_params: default_provider_params(),
            max_tokens_per_source: default_max_tokens_per_source(),
            request_delay_secs: default_request_delay_secs(),
            planner_model: default_planner_model(),
            writer_model: default_writer_model(),
            conclusion_model: default_writer_model(),
        }
    }
}

impl ResearchConfig {
    /// Resolve a job's configuration by deep-merging `overrides` onto `base`.
    ///
    /// Objects merge key by key, scalars and arrays replace, and `null` never
    /// replaces an existing value.
    pub fn resolve(base: &ResearchConfig, overrides: Option<&Value>) -> Result<ResearchConfig> {
        let Some(overrides) = overrides else {
            return Ok(base.clone());
        };
        if !overrides.is_object() && !overrides.is_null() {
            return Err(AppError::InvalidInput(
                "Research configuration overrides must be a JSON object".to_string(),
            ));
        }

        let mut merged = serde_json::to_value(base)?;
        merge_json(&mut merged, overrides);

        let config: ResearchConfig = serde_json::from_value(merged).map_err(|e| {
            AppError::InvalidInput(format!("Invalid research configuration: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.number_of_queries == 0 {
            return Err(AppError::InvalidInput(
                "number_of_queries must be at least 1".to_string(),
            ));
        }
        if self.max_sections == 0 {
            return Err(AppError::InvalidInput(
                "max_sections must be at least 1".to_string(),
            ));
        }
        if !(0.0..=MAX_REQUEST_DELAY_SECS).contains(&self.request_delay_secs) {
            return Err(AppError::InvalidInput(format!(
                "request_delay_secs must be between 0 and {}",
                MAX_REQUEST_DELAY_SECS
            )));
        }
        if self.default_search_provider.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "default_search_provider must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Parameter block for a provider, or an empty object.
    pub fn params_for(&self, provider_id: &str) -> Value {
        self.provider_params
            .get(provider_id)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }

    pub fn is_available(&self, provider_id: &str) -> bool {
        self.available_search_providers
            .iter()
            .any(|p| p == provider_id)
    }

    /// Courtesy delay before each search and write, clamped to the valid range.
    pub fn request_delay(&self) -> std::time::Duration {
        let secs = if self.request_delay_secs.is_nan() {
            0.0
        } else {
            self.request_delay_secs.clamp(0.0, MAX_REQUEST_DELAY_SECS)
        };
        std::time::Duration::try_from_secs_f64(secs).unwrap_or_default()
    }
}

/// Recursively merge `overlay` into `base`, skipping `null` values.
pub fn merge_json(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_json(existing, value);
                    }
                    _ => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}
