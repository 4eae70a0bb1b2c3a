use std::env;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Backend models and request shaping. Every field can be overridden from the
/// environment via [`EngineConfig::from_env`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub api_base: String,
    pub analysis_model: String,
    pub diagnostic_model: String,
    pub image_model: String,
    pub video_model: String,
    pub request_timeout: Duration,
    pub deep_reasoning_budget: u32,
    pub video_prompt_max_chars: usize,
    pub video_resolution: String,
    pub video_aspect_ratio: String,
    pub image_aspect_ratio: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            analysis_model: "gemini-3-pro-preview".to_string(),
            diagnostic_model: "gemini-2.5-flash".to_string(),
            image_model: "imagen-4.0-generate-001".to_string(),
            video_model: "veo-3.1-fast-generate-preview".to_string(),
            request_timeout: Duration::from_secs(120),
            deep_reasoning_budget: 32768,
            video_prompt_max_chars: 300,
            video_resolution: "720p".to_string(),
            video_aspect_ratio: "16:9".to_string(),
            image_aspect_ratio: "1:1".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(base) = non_empty_env("REFINERY_API_BASE").or_else(|| non_empty_env("GEMINI_API_BASE")) {
            config.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(model) = non_empty_env("REFINERY_ANALYSIS_MODEL") {
            config.analysis_model = model;
        }
        if let Some(model) = non_empty_env("REFINERY_DIAGNOSTIC_MODEL") {
            config.diagnostic_model = model;
        }
        if let Some(model) = non_empty_env("REFINERY_IMAGE_MODEL") {
            config.image_model = model;
        }
        if let Some(model) = non_empty_env("REFINERY_VIDEO_MODEL") {
            config.video_model = model;
        }
        if let Some(seconds) = non_empty_env("REFINERY_REQUEST_TIMEOUT")
            .and_then(|raw| raw.parse::<f64>().ok())
            .filter(|value| value.is_finite() && *value > 0.0)
        {
            config.request_timeout = Duration::from_secs_f64(seconds.clamp(5.0, 600.0));
        }
        config
    }
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::EngineConfig;

    #[test]
    fn defaults_match_the_video_job_contract() {
        let config = EngineConfig::default();
        assert_eq!(config.video_prompt_max_chars, 300);
        assert_eq!(config.video_resolution, "720p");
        assert_eq!(config.video_aspect_ratio, "16:9");
        assert!(!config.api_base.ends_with('/'));
    }
}
