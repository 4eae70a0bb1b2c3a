use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{RefineryError, RefineryResult};

/// Viability assessment of a refined artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticResult {
    pub score: f64,
    pub potential: String,
    pub target_sectors: Vec<String>,
    pub monetization: Vec<String>,
    pub risk_factors: Vec<String>,
    pub summary: String,
}

impl DiagnosticResult {
    /// Parse a model reply. Fenced or chatty replies are accepted as long as
    /// they contain one JSON object with every field present and a score in
    /// 0..=100.
    pub fn from_model_text(text: &str) -> RefineryResult<Self> {
        let object = extract_json_object_from_text(text).ok_or_else(|| {
            RefineryError::Diagnostic("response did not contain a JSON object".to_string())
        })?;
        let parsed: DiagnosticResult = serde_json::from_value(Value::Object(object))
            .map_err(|err| RefineryError::Diagnostic(format!("unexpected shape: {err}")))?;
        if !parsed.score.is_finite() || !(0.0..=100.0).contains(&parsed.score) {
            return Err(RefineryError::Diagnostic(format!(
                "score {} is outside 0..=100",
                parsed.score
            )));
        }
        Ok(parsed)
    }
}

/// Response schema sent with the diagnostic request.
pub fn diagnostic_response_schema() -> Value {
    serde_json::json!({
        "type": "OBJECT",
        "properties": {
            "score": { "type": "NUMBER", "description": "Commercial viability from 0 to 100." },
            "potential": { "type": "STRING", "description": "Low, Medium, High or Breakout." },
            "target_sectors": { "type": "ARRAY", "items": { "type": "STRING" } },
            "monetization": { "type": "ARRAY", "items": { "type": "STRING" } },
            "risk_factors": { "type": "ARRAY", "items": { "type": "STRING" } },
            "summary": { "type": "STRING" }
        },
        "required": [
            "score",
            "potential",
            "target_sectors",
            "monetization",
            "risk_factors",
            "summary"
        ]
    })
}

fn strip_code_fence(text: &str) -> String {
    let raw = text.trim();
    if !(raw.starts_with("```") && raw.ends_with("```")) {
        return raw.to_string();
    }
    let lines: Vec<&str> = raw.lines().collect();
    if lines.len() < 2 {
        return raw.to_string();
    }
    let mut body = lines[1..lines.len() - 1].join("\n").trim().to_string();
    if body.to_ascii_lowercase().starts_with("json") {
        body = body[4..].trim().to_string();
    }
    body
}

fn extract_json_object_from_text(text: &str) -> Option<Map<String, Value>> {
    let raw = strip_code_fence(text);
    if raw.trim().is_empty() {
        return None;
    }
    let mut candidates = vec![raw.clone()];
    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if end > start {
            candidates.push(raw[start..=end].to_string());
        }
    }
    candidates.into_iter().find_map(|candidate| {
        serde_json::from_str::<Value>(&candidate)
            .ok()
            .and_then(|parsed| parsed.as_object().cloned())
    })
}

#[cfg(test)]
mod tests {
    use crate::error::RefineryError;

    use super::DiagnosticResult;

    const VALID: &str = r#"{
        "score": 72,
        "potential": "High",
        "target_sectors": ["Advertising", "Gaming"],
        "monetization": ["Stock licensing"],
        "risk_factors": ["Crowded niche"],
        "summary": "Strong cinematic concept."
    }"#;

    #[test]
    fn parses_plain_json() -> anyhow::Result<()> {
        let result = DiagnosticResult::from_model_text(VALID)?;
        assert_eq!(result.score, 72.0);
        assert_eq!(result.target_sectors, vec!["Advertising", "Gaming"]);
        assert_eq!(result.summary, "Strong cinematic concept.");
        Ok(())
    }

    #[test]
    fn parses_fenced_json() -> anyhow::Result<()> {
        let fenced = format!("```json\n{VALID}\n```");
        assert_eq!(DiagnosticResult::from_model_text(&fenced)?.potential, "High");
        Ok(())
    }

    #[test]
    fn rejects_missing_fields_and_bad_scores() {
        for raw in [
            "no json here",
            r#"{"score": 50}"#,
            r#"{"score": 140, "potential": "x", "target_sectors": [], "monetization": [], "risk_factors": [], "summary": ""}"#,
        ] {
            assert!(
                matches!(
                    DiagnosticResult::from_model_text(raw),
                    Err(RefineryError::Diagnostic(_))
                ),
                "{raw}"
            );
        }
    }
}
