pub mod backend;
pub mod composer;
pub mod config;
pub mod diagnostic;
pub mod dryrun;
pub mod encoding;
pub mod gemini;
pub mod orchestrator;

use std::sync::Arc;

use anyhow::{bail, Result};

pub use backend::{Credential, MediaKind, ModelBackend};
pub use composer::{RequestComposer, TaskKind};
pub use config::EngineConfig;
pub use encoding::ImageAttachment;
pub use orchestrator::{
    ExecuteOutcome, GenerationRequest, MediaHandle, Orchestrator, PollPolicy, RejectReason,
    SessionSnapshot,
};

pub const BACKEND_NAMES: [&str; 2] = ["gemini", "dryrun"];

/// Build a backend by name.
pub fn backend_for(name: &str, config: &EngineConfig) -> Result<Arc<dyn ModelBackend>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "gemini" => Ok(Arc::new(gemini::GeminiBackend::new(config))),
        "dryrun" => Ok(Arc::new(dryrun::DryrunBackend::new())),
        other => bail!(
            "unknown backend '{other}' (expected one of: {})",
            BACKEND_NAMES.join(", ")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::{backend_for, EngineConfig};

    #[test]
    fn backends_resolve_by_name() -> anyhow::Result<()> {
        let config = EngineConfig::default();
        assert_eq!(backend_for("gemini", &config)?.name(), "gemini");
        assert_eq!(backend_for(" DryRun ", &config)?.name(), "dryrun");
        assert!(backend_for("openai", &config).is_err());
        Ok(())
    }
}
