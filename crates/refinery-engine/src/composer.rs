use refinery_contracts::domains::{Domain, DomainRegistry, ProfileRegistry};
use refinery_contracts::error::RefineryResult;

use crate::backend::ContentPart;
use crate::encoding::{encode_attachments, ImageAttachment};

pub const ASSISTANT_IDENTITY: &str =
    "You are Prompt Refinery, an elite prompt-engineering assistant that rewrites rough ideas \
     into production-ready prompts for a specific downstream model.";

/// Content appended when images arrive without any user text.
pub const REVERSE_ENGINEER_TRIGGER: &str =
    "Reverse-engineer the attached image(s) into a reusable prompt following the required \
     three-section format.";

const REVERSE_ENGINEER_TEMPLATE: &str = "TASK: REVERSE-ENGINEER THE REFERENCE IMAGE(S)
Decompose the attached image(s) along exactly these six dimensions:
1. Perspective: camera angle, framing, lens and depth of field.
2. Overall style: medium, art movement, era and references.
3. Materials / texture: surfaces, fabrics, finishes and detail density.
4. Lighting / atmosphere: light sources, direction, colour temperature and mood.
5. Render / quality: fidelity, render engine or film stock, resolution cues.
6. Subject: who or what is depicted, pose, action and placement.

Respond with exactly three sections:
### ANALYSIS
One bullet per dimension above.
### FORMULA
A reusable template of the form [subject], [perspective], [style], [materials], [lighting], [render], with the observed values filled in.
### FINAL PROMPT
One cohesive prompt written for the target model, ready to paste.";

const STYLE_TRANSFER_TEMPLATE: &str = "TASK: STYLE-REFERENCE OPTIMIZATION
Treat the attached image(s) as context and style reference only. Optimize the user's text into a \
prompt for the target model that keeps the user's intent and subject while carrying over the \
reference's composition, palette, lighting and texture. Do not describe the reference subject \
unless the user asks for it.
Respond with the optimized prompt first, then a short bullet list of the stylistic traits you \
borrowed.";

const PLAIN_OPTIMIZE_TEMPLATE: &str = "TASK: PROMPT OPTIMIZATION
Rewrite the user's input into the strongest possible prompt for the target model. Preserve intent, \
resolve ambiguity with sensible defaults, add missing specifics (context, constraints, format, \
style) and use the syntax the target model responds to best.
Respond with the optimized prompt first, then a short bullet list explaining the key changes.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    ReverseEngineer,
    StyleTransfer,
    PlainOptimize,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::ReverseEngineer => "reverse_engineer",
            TaskKind::StyleTransfer => "style_transfer",
            TaskKind::PlainOptimize => "plain_optimize",
        }
    }

    fn template(self) -> &'static str {
        match self {
            TaskKind::ReverseEngineer => REVERSE_ENGINEER_TEMPLATE,
            TaskKind::StyleTransfer => STYLE_TRANSFER_TEMPLATE,
            TaskKind::PlainOptimize => PLAIN_OPTIMIZE_TEMPLATE,
        }
    }
}

/// Rule table for the three templates. `None` means there is nothing to send.
pub fn select_task(has_images: bool, has_text: bool) -> Option<TaskKind> {
    match (has_images, has_text) {
        (false, false) => None,
        (true, false) => Some(TaskKind::ReverseEngineer),
        (true, true) => Some(TaskKind::StyleTransfer),
        (false, true) => Some(TaskKind::PlainOptimize),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComposedRequest {
    pub task: TaskKind,
    pub target_model: String,
    pub system_instruction: String,
    pub parts: Vec<ContentPart>,
}

#[derive(Debug, Clone, Default)]
pub struct RequestComposer {
    domains: DomainRegistry,
    profiles: ProfileRegistry,
}

impl RequestComposer {
    pub fn new(domains: DomainRegistry, profiles: ProfileRegistry) -> Self {
        Self { domains, profiles }
    }

    pub fn domains(&self) -> &DomainRegistry {
        &self.domains
    }

    pub fn profiles(&self) -> &ProfileRegistry {
        &self.profiles
    }

    pub fn system_instruction(&self, domain: Domain, target_model: &str, task: TaskKind) -> String {
        format!(
            "{ASSISTANT_IDENTITY}\n\nPERSONA: {}\nTARGET MODEL: {}\nTARGET MODEL PROFILE: {}\n\n{}",
            self.domains.persona(domain),
            self.profiles.label(target_model),
            self.profiles.profile_text(target_model),
            task.template(),
        )
    }

    /// Build the analysis request. Returns `Ok(None)` when there is neither
    /// text nor an image. Image encoding is the only fallible step.
    pub fn compose(
        &self,
        domain: Domain,
        target_model: Option<&str>,
        user_text: &str,
        images: &[ImageAttachment],
    ) -> RefineryResult<Option<ComposedRequest>> {
        let text = user_text.trim();
        let Some(task) = select_task(!images.is_empty(), !text.is_empty()) else {
            return Ok(None);
        };
        let target_model = self.domains.target_model_or_default(domain, target_model);

        let mut parts = encode_attachments(images)?;
        if !text.is_empty() {
            parts.push(ContentPart::text(text));
        }
        if task == TaskKind::ReverseEngineer {
            parts.push(ContentPart::text(REVERSE_ENGINEER_TRIGGER));
        }

        Ok(Some(ComposedRequest {
            task,
            system_instruction: self.system_instruction(domain, &target_model, task),
            target_model,
            parts,
        }))
    }
}
