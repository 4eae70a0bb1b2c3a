use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domains::Domain;

/// Position of a session in the analyze / render pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStage {
    #[default]
    Idle,
    Analyzing,
    ReadyToRender,
    Rendering,
    Complete,
    Error,
}

impl ProcessStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessStage::Idle => "idle",
            ProcessStage::Analyzing => "analyzing",
            ProcessStage::ReadyToRender => "ready_to_render",
            ProcessStage::Rendering => "rendering",
            ProcessStage::Complete => "complete",
            ProcessStage::Error => "error",
        }
    }

    /// A backend call is outstanding; new executions are rejected.
    pub fn is_in_flight(self) -> bool {
        matches!(self, ProcessStage::Analyzing | ProcessStage::Rendering)
    }
}

impl fmt::Display for ProcessStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageEvent {
    Execute,
    AnalysisSucceeded { domain: Domain },
    AnalysisFailed,
    ConfirmRender,
    RenderSucceeded,
    RenderFailed,
}

impl StageEvent {
    pub fn name(self) -> &'static str {
        match self {
            StageEvent::Execute => "execute",
            StageEvent::AnalysisSucceeded { .. } => "analysis_succeeded",
            StageEvent::AnalysisFailed => "analysis_failed",
            StageEvent::ConfirmRender => "confirm_render",
            StageEvent::RenderSucceeded => "render_succeeded",
            StageEvent::RenderFailed => "render_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: ProcessStage,
    pub event: StageEvent,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "event '{}' is not valid in stage '{}'",
            self.event.name(),
            self.from
        )
    }
}

impl std::error::Error for IllegalTransition {}

/// The only way a session moves between stages.
pub fn transition(
    stage: ProcessStage,
    event: StageEvent,
) -> Result<ProcessStage, IllegalTransition> {
    use ProcessStage::*;

    let next = match (stage, event) {
        (Idle | ReadyToRender | Complete | Error, StageEvent::Execute) => Analyzing,
        (Analyzing, StageEvent::AnalysisSucceeded { domain }) => {
            if domain.supports_render() {
                ReadyToRender
            } else {
                Complete
            }
        }
        (Analyzing, StageEvent::AnalysisFailed) => Error,
        (ReadyToRender, StageEvent::ConfirmRender) => Rendering,
        (Rendering, StageEvent::RenderSucceeded) => Complete,
        (Rendering, StageEvent::RenderFailed) => Error,
        (from, event) => return Err(IllegalTransition { from, event }),
    };
    Ok(next)
}
