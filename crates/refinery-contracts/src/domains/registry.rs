use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Persona used when a domain has no entry in the registry.
pub const GENERIC_PERSONA: &str = "Expert Assistant";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Image,
    Video,
    Writing,
    Code,
    General,
}

impl Domain {
    pub const ALL: [Domain; 5] = [
        Domain::Image,
        Domain::Video,
        Domain::Writing,
        Domain::Code,
        Domain::General,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Image => "image",
            Domain::Video => "video",
            Domain::Writing => "writing",
            Domain::Code => "code",
            Domain::General => "general",
        }
    }

    /// Only visual domains pause at `ready_to_render` after analysis.
    pub fn supports_render(self) -> bool {
        matches!(self, Domain::Image | Domain::Video)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        Domain::ALL
            .into_iter()
            .find(|domain| domain.as_str() == normalized)
            .ok_or_else(|| {
                format!("Unknown domain '{raw}'. Expected one of: image, video, writing, code, general.")
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainConfig {
    pub domain: Domain,
    pub persona: String,
    pub placeholder: String,
    pub default_target_model: String,
    pub target_models: Vec<String>,
}

impl DomainConfig {
    pub fn offers(&self, target_model: &str) -> bool {
        self.target_models.iter().any(|item| item == target_model)
    }
}

#[derive(Debug, Clone)]
pub struct DomainRegistry {
    domains: IndexMap<Domain, DomainConfig>,
}

impl Default for DomainRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl DomainRegistry {
    pub fn new(domains: Option<IndexMap<Domain, DomainConfig>>) -> Self {
        Self {
            domains: domains.unwrap_or_else(default_domains),
        }
    }

    pub fn get(&self, domain: Domain) -> Option<&DomainConfig> {
        self.domains.get(&domain)
    }

    pub fn list(&self) -> impl Iterator<Item = &DomainConfig> {
        self.domains.values()
    }

    pub fn persona(&self, domain: Domain) -> &str {
        self.get(domain)
            .map(|config| config.persona.as_str())
            .unwrap_or(GENERIC_PERSONA)
    }

    /// Requested target model when given, otherwise the domain default.
    pub fn target_model_or_default(&self, domain: Domain, requested: Option<&str>) -> String {
        if let Some(requested) = requested.map(str::trim).filter(|value| !value.is_empty()) {
            return requested.to_string();
        }
        self.get(domain)
            .map(|config| config.default_target_model.clone())
            .unwrap_or_default()
    }
}

fn default_domains() -> IndexMap<Domain, DomainConfig> {
    let mut map = IndexMap::new();

    let mut insert =
        |domain: Domain, persona: &str, placeholder: &str, default_model: &str, models: &[&str]| {
            map.insert(
                domain,
                DomainConfig {
                    domain,
                    persona: persona.to_string(),
                    placeholder: placeholder.to_string(),
                    default_target_model: default_model.to_string(),
                    target_models: models.iter().map(|item| (*item).to_string()).collect(),
                },
            );
        };

    insert(
        Domain::Image,
        "World-class visual prompt engineer and art director. You think in camera angles, \
         lens choices, lighting setups, materials and composition, and you know exactly which \
         vocabulary each image model responds to.",
        "Describe the image you want, or attach reference images to reverse-engineer them...",
        "midjourney-v6",
        &[
            "midjourney-v6",
            "dall-e-3",
            "stable-diffusion-xl",
            "flux-1-pro",
            "imagen-4",
        ],
    );
    insert(
        Domain::Video,
        "Veteran cinematographer and motion prompt specialist. You describe shots as a sequence \
         of camera movement, subject action, pacing and atmosphere that video models can follow \
         frame by frame.",
        "Describe the shot, camera movement and action you want to generate...",
        "veo-3",
        &["veo-3", "sora", "runway-gen-3", "kling", "pika"],
    );
    insert(
        Domain::Writing,
        "Senior editor and prompt architect for long-form and short-form writing. You specify \
         voice, audience, structure and constraints so language models produce publishable copy.",
        "Paste a rough writing prompt or describe the piece you need...",
        "gpt-4o",
        &["gpt-4o", "claude-sonnet", "gemini-pro"],
    );
    insert(
        Domain::Code,
        "Principal software engineer who writes precise specifications for coding assistants. \
         You pin down language, interfaces, edge cases, tests and output format.",
        "Describe the feature, bug or refactor you want a coding model to handle...",
        "claude-sonnet",
        &["claude-sonnet", "gpt-4o", "gemini-pro", "deepseek-coder"],
    );
    insert(
        Domain::General,
        "Versatile prompt engineer who turns vague requests into clear, structured instructions \
         for any general-purpose assistant.",
        "What do you want the assistant to do?",
        "gpt-4o",
        &["gpt-4o", "claude-sonnet", "gemini-pro"],
    );

    map
}
