use indexmap::IndexMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetModelProfile {
    pub id: String,
    pub label: String,
    pub profile: String,
}

/// Capability and strategy notes per downstream model, used verbatim in
/// composed instructions.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: IndexMap<String, TargetModelProfile>,
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ProfileRegistry {
    pub fn new(profiles: Option<IndexMap<String, TargetModelProfile>>) -> Self {
        Self {
            profiles: profiles.unwrap_or_else(default_profiles),
        }
    }

    pub fn get(&self, id: &str) -> Option<&TargetModelProfile> {
        self.profiles.get(id)
    }

    /// Profile text, or the empty string for an unknown id.
    pub fn profile_text(&self, id: &str) -> &str {
        self.get(id)
            .map(|profile| profile.profile.as_str())
            .unwrap_or("")
    }

    /// Display label, or the raw id for an unknown one.
    pub fn label<'a>(&'a self, id: &'a str) -> &'a str {
        self.get(id)
            .map(|profile| profile.label.as_str())
            .unwrap_or(id)
    }

    pub fn list(&self) -> impl Iterator<Item = &TargetModelProfile> {
        self.profiles.values()
    }
}

fn default_profiles() -> IndexMap<String, TargetModelProfile> {
    let mut map = IndexMap::new();

    let mut insert = |id: &str, label: &str, profile: &str| {
        map.insert(
            id.to_string(),
            TargetModelProfile {
                id: id.to_string(),
                label: label.to_string(),
                profile: profile.to_string(),
            },
        );
    };

    insert(
        "midjourney-v6",
        "Midjourney v6",
        "Responds best to dense comma-separated descriptors ordered from subject to style. \
         Supports parameters such as --ar, --stylize, --chaos and --v 6; put them at the very \
         end. Strong at painterly and cinematic looks; keep literal text in quotes short.",
    );
    insert(
        "dall-e-3",
        "DALL-E 3",
        "Follows natural-language sentences closely and rewrites terse prompts. Write a vivid \
         paragraph with explicit spatial relationships; avoid parameter flags. Good at rendering \
         short text inside the image.",
    );
    insert(
        "stable-diffusion-xl",
        "Stable Diffusion XL",
        "Token-weighted keyword prompts work best, with (term:1.2) emphasis syntax and a \
         separate negative prompt. Name artists, film stocks and render engines explicitly. \
         Keep the positive prompt under 75 tokens per chunk.",
    );
    insert(
        "flux-1-pro",
        "FLUX.1 Pro",
        "Handles long, natural descriptions and precise typography. Describe composition \
         front to back, specify lighting direction and lens, and avoid weighting syntax.",
    );
    insert(
        "imagen-4",
        "Imagen 4",
        "Prefers clear photographic language: subject, setting, lighting, camera and lens. \
         Excellent photorealism and text rendering; state the aspect ratio in words.",
    );
    insert(
        "veo-3",
        "Veo 3",
        "Describe one continuous shot: camera movement, subject action, environment, lighting, \
         and optional audio cues. Use cinematic vocabulary (dolly, crane, rack focus). Keep it \
         under eight seconds of action.",
    );
    insert(
        "sora",
        "Sora",
        "Understands multi-beat scenes and physical interactions. Specify shot type, motion, \
         time of day and style references; describe what changes over time.",
    );
    insert(
        "runway-gen-3",
        "Runway Gen-3",
        "Structure as [camera movement]: [establishing scene]. [additional details]. Favor one \
         clear camera move and concrete subject motion.",
    );
    insert(
        "kling",
        "Kling",
        "Strong at human motion and realistic physics. Describe subject, action, scene and \
         camera language separately; keep the prompt under 200 words.",
    );
    insert(
        "pika",
        "Pika",
        "Short, punchy prompts with a single action and a style tag work best; add motion \
         strength hints when needed.",
    );
    insert(
        "gpt-4o",
        "GPT-4o",
        "Follows structured system prompts with markdown sections. State role, task, context, \
         constraints and output format explicitly; few-shot examples improve consistency.",
    );
    insert(
        "claude-sonnet",
        "Claude Sonnet",
        "Responds well to XML-tagged sections (<context>, <instructions>, <output_format>) and \
         explicit reasoning steps. Give it the full context up front and state success criteria.",
    );
    insert(
        "gemini-pro",
        "Gemini Pro",
        "Handles long context and mixed media. Put instructions before the material, use \
         numbered steps and request a specific response schema when structure matters.",
    );
    insert(
        "deepseek-coder",
        "DeepSeek Coder",
        "Code-first model. Provide language, file layout, function signatures and test cases; \
         ask for complete files rather than fragments.",
    );

    map
}

#[cfg(test)]
mod tests {
    use crate::domains::{Domain, DomainRegistry};

    use super::ProfileRegistry;

    #[test]
    fn unknown_profile_is_empty_and_label_falls_back_to_id() {
        let profiles = ProfileRegistry::default();
        assert_eq!(profiles.profile_text("no-such-model"), "");
        assert_eq!(profiles.label("no-such-model"), "no-such-model");
    }

    #[test]
    fn every_offered_target_model_has_a_profile() {
        let profiles = ProfileRegistry::default();
        let domains = DomainRegistry::default();
        for domain in Domain::ALL {
            let config = domains.get(domain).expect("domain configured");
            for model in &config.target_models {
                assert!(profiles.get(model).is_some(), "{domain}: {model}");
            }
        }
    }
}
