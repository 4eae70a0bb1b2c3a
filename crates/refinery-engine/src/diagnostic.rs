use refinery_contracts::diagnostic::{diagnostic_response_schema, DiagnosticResult};
use refinery_contracts::domains::Domain;
use refinery_contracts::error::{RefineryError, RefineryResult};

use crate::backend::{ContentPart, Credential, ModelBackend, TextRequest};

const DIAGNOSTIC_INSTRUCTION: &str = "You are a creative-market analyst. Assess the commercial \
viability of the prompt you are given as a product, campaign or content asset. Return JSON only \
with: score (0-100), potential (Low, Medium, High or Breakout), target_sectors, monetization, \
risk_factors (each a short list of strings) and a one-sentence summary.";

pub fn diagnostic_request(model: &str, domain: Domain, refined: &str) -> TextRequest {
    TextRequest {
        model: model.to_string(),
        parts: vec![ContentPart::text(format!(
            "DOMAIN: {domain}\nPROMPT TO ASSESS:\n{refined}"
        ))],
        system_instruction: Some(DIAGNOSTIC_INSTRUCTION.to_string()),
        grounding: false,
        thinking_budget: None,
        response_schema: Some(diagnostic_response_schema()),
    }
}

/// One best-effort viability call. Callers discard the error.
pub fn run_diagnostic(
    backend: &dyn ModelBackend,
    credential: &Credential,
    model: &str,
    domain: Domain,
    refined: &str,
) -> RefineryResult<DiagnosticResult> {
    let request = diagnostic_request(model, domain, refined);
    let raw = backend
        .generate_text(&request, credential)
        .map_err(|err| RefineryError::Diagnostic(format!("{err:#}")))?;
    DiagnosticResult::from_model_text(&raw)
}

#[cfg(test)]
mod tests {
    use refinery_contracts::domains::Domain;

    use super::diagnostic_request;

    #[test]
    fn request_asks_for_structured_json() {
        let request = diagnostic_request("gemini-2.5-flash", Domain::Video, "slow dolly shot");
        assert!(request.response_schema.is_some());
        assert!(!request.grounding);
        let text = request.parts[0].as_text().unwrap_or_default();
        assert!(text.contains("DOMAIN: video"));
        assert!(text.contains("slow dolly shot"));
    }
}
