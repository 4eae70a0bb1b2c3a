//! Error taxonomy shared by the engine, the library and the CLI.

use thiserror::Error;

/// Categorised failures surfaced to callers.
///
/// Generation failures (`Backend`, `Encoding`, `CredentialMissing`) are folded
/// into the stage machine by the orchestrator. Persistence failures (`Storage`,
/// `Import`) are returned directly from library operations and never touch
/// generation state. `Diagnostic` exists so the best-effort side call has a
/// typed failure to discard.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefineryError {
    #[error("No API key configured. Set one with `refinery key set <KEY>` or export GEMINI_API_KEY.")]
    CredentialMissing,

    #[error("{0}")]
    Backend(String),

    #[error("Could not read attachment '{name}': {message}")]
    Encoding { name: String, message: String },

    #[error("Import failed: {0}")]
    Import(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Diagnostic failed: {0}")]
    Diagnostic(String),
}

impl RefineryError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    pub fn encoding(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Encoding {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn import(message: impl Into<String>) -> Self {
        Self::Import(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Persistence failures are reported separately from the generation stage.
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Import(_))
    }

    /// Flatten an `anyhow` chain into a backend error, keeping every cause.
    /// Any `key=` query value that slipped into a cause is masked.
    pub fn from_backend_chain(err: &anyhow::Error) -> Self {
        let mut parts: Vec<String> = Vec::new();
        for cause in err.chain() {
            let text = redact_query_keys(&cause.to_string());
            let trimmed = text.trim();
            if trimmed.is_empty() || parts.last().map(String::as_str) == Some(trimmed) {
                continue;
            }
            parts.push(trimmed.to_string());
        }
        if parts.is_empty() {
            return Self::Backend(redact_query_keys(&err.to_string()));
        }
        Self::Backend(parts.join(" | caused by: "))
    }
}

pub type RefineryResult<T> = Result<T, RefineryError>;

const REDACTED: &str = "<redacted>";

/// Replace the value of every `?key=` / `&key=` query parameter.
pub fn redact_query_keys(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(index) = find_key_param(rest) {
        let value_start = index + "?key=".len();
        out.push_str(&rest[..value_start]);
        let tail = &rest[value_start..];
        let value_len = tail
            .find(|ch: char| matches!(ch, '&' | '#' | ')' | '"' | '\'') || ch.is_whitespace())
            .unwrap_or(tail.len());
        if value_len > 0 {
            out.push_str(REDACTED);
        }
        rest = &tail[value_len..];
    }
    out.push_str(rest);
    out
}

fn find_key_param(text: &str) -> Option<usize> {
    let question = text.find("?key=");
    let amp = text.find("&key=");
    match (question, amp) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (found, None) | (None, found) => found,
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::{redact_query_keys, RefineryError};

    #[test]
    fn backend_chain_keeps_causes_in_order() {
        let err = Err::<(), _>(anyhow::anyhow!("connection reset"))
            .context("Gemini request failed")
            .unwrap_err();
        assert_eq!(
            RefineryError::from_backend_chain(&err),
            RefineryError::Backend("Gemini request failed | caused by: connection reset".to_string())
        );
    }

    #[test]
    fn persistence_category_excludes_generation_errors() {
        assert!(RefineryError::storage("disk full").is_persistence());
        assert!(RefineryError::import("not an array").is_persistence());
        assert!(!RefineryError::backend("boom").is_persistence());
        assert!(!RefineryError::CredentialMissing.is_persistence());
    }

    #[test]
    fn backend_chain_masks_query_keys() {
        let err = Err::<(), _>(anyhow::anyhow!(
            "error sending request for url (https://host/v1beta/files/abc?alt=media&key=SECRETKEY123)"
        ))
        .context("Media download failed")
        .unwrap_err();
        let message = RefineryError::from_backend_chain(&err).to_string();
        assert!(!message.contains("SECRETKEY123"));
        assert!(message.contains("alt=media&key=<redacted>)"));
    }

    #[test]
    fn redaction_handles_every_key_param() {
        assert_eq!(
            redact_query_keys("GET /a?key=one then /b?x=1&key=two#frag"),
            "GET /a?key=<redacted> then /b?x=1&key=<redacted>#frag"
        );
        assert_eq!(redact_query_keys("monkey=banana ?key="), "monkey=banana ?key=");
    }
}
