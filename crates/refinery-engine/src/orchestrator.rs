use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use refinery_contracts::credentials::CredentialResolver;
use refinery_contracts::diagnostic::DiagnosticResult;
use refinery_contracts::domains::Domain;
use refinery_contracts::error::{RefineryError, RefineryResult};
use refinery_contracts::events::{emit_quiet, EventKind, EventWriter};
use refinery_contracts::stage::{transition, IllegalTransition, ProcessStage, StageEvent};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::backend::{Credential, MediaBytes, MediaKind, MediaRequest, ModelBackend, TextRequest};
use crate::composer::{RequestComposer, TaskKind};
use crate::config::EngineConfig;
use crate::diagnostic::run_diagnostic;
use crate::encoding::{detect_mime, extension_for_mime, ImageAttachment};

/// Prefix that marks a failed analysis in the visible artifact.
pub const ERROR_PREFIX: &str = "Error: ";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(4);

/// Waits between job status checks.
pub trait Pacer: Send + Sync {
    fn pause(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn pause(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Status-check cadence for long-running jobs. No deadline means the loop
/// waits for the backend indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub deadline: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            deadline: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub domain: Domain,
    pub target_model: Option<String>,
    pub user_text: String,
    pub images: Vec<ImageAttachment>,
    pub use_deep_reasoning: bool,
    pub use_grounding: bool,
}

impl GenerationRequest {
    pub fn new(domain: Domain) -> Self {
        Self {
            domain,
            target_model: None,
            user_text: String::new(),
            images: Vec::new(),
            use_deep_reasoning: false,
            use_grounding: false,
        }
    }

    pub fn text(domain: Domain, text: impl Into<String>) -> Self {
        Self {
            user_text: text.into(),
            ..Self::new(domain)
        }
    }

    pub fn with_images(mut self, images: Vec<ImageAttachment>) -> Self {
        self.images = images;
        self
    }

    pub fn with_target_model(mut self, target_model: impl Into<String>) -> Self {
        self.target_model = Some(target_model.into());
        self
    }

    fn is_empty(&self) -> bool {
        self.user_text.trim().is_empty() && self.images.is_empty()
    }
}

/// Rendered media written to a local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaHandle {
    pub kind: MediaKind,
    pub path: PathBuf,
    pub mime_type: String,
    pub byte_len: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub stage: ProcessStage,
    pub domain: Option<Domain>,
    pub target_model: Option<String>,
    pub task: Option<TaskKind>,
    pub refined: Option<String>,
    pub diagnostic: Option<DiagnosticResult>,
    pub media: Option<MediaHandle>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    EmptyInput,
    InFlight(ProcessStage),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecuteOutcome {
    Rejected(RejectReason),
    /// No key and no host-managed selection; nothing was sent.
    CredentialMissing { message: String },
    Finished(SessionSnapshot),
}

#[derive(Default)]
struct Session {
    stage: ProcessStage,
    domain: Option<Domain>,
    target_model: Option<String>,
    task: Option<TaskKind>,
    refined: Option<String>,
    diagnostic: Option<DiagnosticResult>,
    media: Option<MediaHandle>,
    error: Option<String>,
    generation: u64,
    credential: Option<Credential>,
    diagnostic_task: Option<JoinHandle<()>>,
}

impl Session {
    fn clear_artifacts(&mut self) {
        self.task = None;
        self.refined = None;
        self.diagnostic = None;
        self.media = None;
        self.error = None;
        self.diagnostic_task = None;
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            stage: self.stage,
            domain: self.domain,
            target_model: self.target_model.clone(),
            task: self.task,
            refined: self.refined.clone(),
            diagnostic: self.diagnostic.clone(),
            media: self.media.clone(),
            error: self.error.clone(),
        }
    }
}

/// Drives one session through analyze, the optional render, and the
/// best-effort diagnostic.
///
/// Backend calls run without holding the session lock; the stage guard is what
/// keeps a second pipeline from starting while one is in flight.
pub struct Orchestrator {
    backend: Arc<dyn ModelBackend>,
    credentials: CredentialResolver,
    composer: RequestComposer,
    config: EngineConfig,
    media_dir: PathBuf,
    pacer: Arc<dyn Pacer>,
    poll: PollPolicy,
    events: Option<EventWriter>,
    session: Arc<Mutex<Session>>,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        credentials: CredentialResolver,
        config: EngineConfig,
        media_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            backend,
            credentials,
            composer: RequestComposer::default(),
            config,
            media_dir: media_dir.into(),
            pacer: Arc::new(ThreadPacer),
            poll: PollPolicy::default(),
            events: None,
            session: Arc::new(Mutex::new(Session::default())),
        }
    }

    pub fn with_composer(mut self, composer: RequestComposer) -> Self {
        self.composer = composer;
        self
    }

    pub fn with_pacer(mut self, pacer: Arc<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self.emit(
            EventKind::SessionStarted,
            json!({ "backend": self.backend.name() }),
        );
        self
    }

    pub fn composer(&self) -> &RequestComposer {
        &self.composer
    }

    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    pub fn stage(&self) -> ProcessStage {
        self.lock_session().stage
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock_session().snapshot()
    }

    /// Start (or restart) the pipeline with a new request.
    pub fn execute(&self, request: GenerationRequest) -> ExecuteOutcome {
        if request.is_empty() {
            self.emit(EventKind::ExecuteRejected, json!({ "reason": "empty_input" }));
            return ExecuteOutcome::Rejected(RejectReason::EmptyInput);
        }

        let (generation, credential) = {
            let mut session = self.lock_session();
            if session.stage.is_in_flight() {
                let stage = session.stage;
                drop(session);
                self.emit(
                    EventKind::ExecuteRejected,
                    json!({ "reason": "in_flight", "stage": stage.as_str() }),
                );
                return ExecuteOutcome::Rejected(RejectReason::InFlight(stage));
            }
            let Some(credential) = self.resolve_credential() else {
                drop(session);
                self.emit(EventKind::CredentialMissing, json!({}));
                return ExecuteOutcome::CredentialMissing {
                    message: RefineryError::CredentialMissing.to_string(),
                };
            };
            if let Err(err) = self.advance(&mut session, StageEvent::Execute) {
                return ExecuteOutcome::Rejected(RejectReason::InFlight(err.from));
            }
            session.clear_artifacts();
            session.domain = Some(request.domain);
            session.target_model = Some(
                self.composer
                    .domains()
                    .target_model_or_default(request.domain, request.target_model.as_deref()),
            );
            session.generation += 1;
            session.credential = Some(credential.clone());
            (session.generation, credential)
        };

        self.emit(
            EventKind::AnalysisStarted,
            json!({
                "domain": request.domain,
                "images": request.images.len(),
                "deep_reasoning": request.use_deep_reasoning,
                "grounding": request.use_grounding,
            }),
        );

        match self.analyze(&request, &credential) {
            Ok((task, refined)) => {
                {
                    let mut session = self.lock_session();
                    session.task = Some(task);
                    session.refined = Some(refined.clone());
                    let _ = self.advance(
                        &mut session,
                        StageEvent::AnalysisSucceeded {
                            domain: request.domain,
                        },
                    );
                }
                self.emit(
                    EventKind::AnalysisFinished,
                    json!({ "task": task.as_str(), "chars": refined.chars().count() }),
                );
                self.spawn_diagnostic(generation, request.domain, refined, credential);
            }
            Err(err) => {
                let message = err.to_string();
                {
                    let mut session = self.lock_session();
                    session.refined = Some(format!("{ERROR_PREFIX}{message}"));
                    session.error = Some(message.clone());
                    let _ = self.advance(&mut session, StageEvent::AnalysisFailed);
                }
                self.emit(EventKind::AnalysisFailed, json!({ "error": message }));
            }
        }

        ExecuteOutcome::Finished(self.snapshot())
    }

    /// Confirm the render step for an image or video session.
    pub fn render(&self) -> Result<SessionSnapshot, IllegalTransition> {
        let (domain, prompt, credential) = {
            let mut session = self.lock_session();
            self.advance(&mut session, StageEvent::ConfirmRender)?;
            (
                session.domain,
                session.refined.clone().unwrap_or_default(),
                self.resolve_credential().or_else(|| session.credential.clone()),
            )
        };
        self.emit(EventKind::RenderStarted, json!({ "domain": domain }));

        let outcome = match (domain, credential) {
            (_, None) => Err(anyhow::Error::new(RefineryError::CredentialMissing)),
            (Some(Domain::Video), Some(credential)) => self
                .render_video(&prompt, &credential)
                .and_then(|media| self.materialize(media, MediaKind::Video)),
            (Some(Domain::Image), Some(credential)) => self
                .render_image(&prompt, &credential)
                .and_then(|media| self.materialize(media, MediaKind::Image)),
            (other, Some(_)) => Err(anyhow::anyhow!(
                "domain {} has no render step",
                other.map(Domain::as_str).unwrap_or("unknown")
            )),
        };

        match outcome {
            Ok(handle) => {
                self.emit(
                    EventKind::RenderFinished,
                    json!({
                        "path": handle.path.to_string_lossy(),
                        "mime_type": handle.mime_type,
                        "bytes": handle.byte_len,
                    }),
                );
                let mut session = self.lock_session();
                session.media = Some(handle);
                let _ = self.advance(&mut session, StageEvent::RenderSucceeded);
            }
            Err(err) => {
                let message = RefineryError::from_backend_chain(&err).to_string();
                self.emit(EventKind::RenderFailed, json!({ "error": message }));
                let mut session = self.lock_session();
                session.error = Some(message);
                let _ = self.advance(&mut session, StageEvent::RenderFailed);
            }
        }
        Ok(self.snapshot())
    }

    /// Block until the current diagnostic call (if any) has settled.
    pub fn join_diagnostic(&self) -> Option<DiagnosticResult> {
        let task = self.lock_session().diagnostic_task.take();
        if let Some(task) = task {
            let _ = task.join();
        }
        self.lock_session().diagnostic.clone()
    }

    fn resolve_credential(&self) -> Option<Credential> {
        if let Some(key) = self.credentials.resolve() {
            return Some(Credential::ApiKey(key));
        }
        if self.backend.host_key_selection() {
            return Some(Credential::HostManaged);
        }
        None
    }

    fn analyze(
        &self,
        request: &GenerationRequest,
        credential: &Credential,
    ) -> RefineryResult<(TaskKind, String)> {
        let composed = self
            .composer
            .compose(
                request.domain,
                request.target_model.as_deref(),
                &request.user_text,
                &request.images,
            )?
            .ok_or_else(|| RefineryError::backend("nothing to analyze"))?;
        let text_request = TextRequest {
            model: self.config.analysis_model.clone(),
            parts: composed.parts,
            system_instruction: Some(composed.system_instruction),
            grounding: request.use_grounding,
            thinking_budget: request
                .use_deep_reasoning
                .then_some(self.config.deep_reasoning_budget),
            response_schema: None,
        };
        let refined = self
            .backend
            .generate_text(&text_request, credential)
            .map_err(|err| RefineryError::from_backend_chain(&err))?;
        Ok((composed.task, refined))
    }

    fn spawn_diagnostic(
        &self,
        generation: u64,
        domain: Domain,
        refined: String,
        credential: Credential,
    ) {
        let backend = Arc::clone(&self.backend);
        let session = Arc::clone(&self.session);
        let events = self.events.clone();
        let model = self.config.diagnostic_model.clone();

        let spawned = thread::Builder::new()
            .name("refinery-diagnostic".to_string())
            .spawn(move || {
                match run_diagnostic(backend.as_ref(), &credential, &model, domain, &refined) {
                    Ok(result) => {
                        let mut guard = session.lock().unwrap_or_else(PoisonError::into_inner);
                        if guard.generation != generation {
                            drop(guard);
                            emit_quiet(
                                events.as_ref(),
                                EventKind::DiagnosticSkipped,
                                json!({ "reason": "superseded" }),
                            );
                            return;
                        }
                        let score = result.score;
                        guard.diagnostic = Some(result);
                        drop(guard);
                        emit_quiet(
                            events.as_ref(),
                            EventKind::DiagnosticFinished,
                            json!({ "score": score }),
                        );
                    }
                    Err(err) => emit_quiet(
                        events.as_ref(),
                        EventKind::DiagnosticSkipped,
                        json!({ "reason": err.to_string() }),
                    ),
                }
            });

        match spawned {
            Ok(handle) => {
                let mut session = self.lock_session();
                if session.generation == generation {
                    session.diagnostic_task = Some(handle);
                }
            }
            Err(err) => self.emit(
                EventKind::DiagnosticSkipped,
                json!({ "reason": format!("thread spawn failed: {err}") }),
            ),
        }
    }

    fn render_image(&self, prompt: &str, credential: &Credential) -> Result<MediaBytes> {
        let request = MediaRequest {
            model: self.config.image_model.clone(),
            prompt: prompt.to_string(),
            kind: MediaKind::Image,
            aspect_ratio: self.config.image_aspect_ratio.clone(),
            resolution: None,
            count: 1,
        };
        self.backend.generate_image(&request, credential)
    }

    /// Submit a video job, then check its status every poll interval until
    /// the backend reports it done.
    fn render_video(&self, prompt: &str, credential: &Credential) -> Result<MediaBytes> {
        let request = MediaRequest {
            model: self.config.video_model.clone(),
            prompt: truncate_chars(prompt, self.config.video_prompt_max_chars),
            kind: MediaKind::Video,
            aspect_ratio: self.config.video_aspect_ratio.clone(),
            resolution: Some(self.config.video_resolution.clone()),
            count: 1,
        };
        let mut job = self.backend.submit_video(&request, credential)?;
        self.emit(EventKind::JobSubmitted, json!({ "job": job.name }));

        let mut waited = Duration::ZERO;
        let mut checks: u64 = 0;
        while !job.done {
            if let Some(deadline) = self.poll.deadline {
                if waited >= deadline {
                    bail!(
                        "video job {} did not finish within {:.0}s",
                        job.name,
                        deadline.as_secs_f64()
                    );
                }
            }
            self.pacer.pause(self.poll.interval);
            waited += self.poll.interval;
            checks += 1;
            job = self
                .backend
                .poll_operation(&job, credential)
                .with_context(|| format!("status check {checks} for {} failed", job.name))?;
            self.emit(
                EventKind::JobPolled,
                json!({ "job": job.name, "check": checks, "done": job.done }),
            );
        }

        if let Some(error) = job.error.as_deref() {
            bail!("video job {} failed: {error}", job.name);
        }
        let uri = job
            .result_uri
            .as_deref()
            .with_context(|| format!("video job {} finished without a result uri", job.name))?;
        self.backend.fetch_media(uri, credential)
    }

    fn materialize(&self, media: MediaBytes, kind: MediaKind) -> Result<MediaHandle> {
        if media.bytes.is_empty() {
            bail!("backend returned an empty {} payload", kind.as_str());
        }
        let mime_type = media
            .mime_type
            .as_deref()
            .and_then(|raw| raw.split(';').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| match kind {
                MediaKind::Image => detect_mime(&media.bytes, "").to_string(),
                MediaKind::Video => "video/mp4".to_string(),
            });
        let mut hasher = Sha256::new();
        hasher.update(&media.bytes);
        let digest = hex::encode(hasher.finalize());
        let path = self.media_dir.join(format!(
            "{}-{}.{}",
            kind.as_str(),
            &digest[..16],
            extension_for_mime(&mime_type)
        ));
        std::fs::create_dir_all(&self.media_dir)
            .with_context(|| format!("failed creating {}", self.media_dir.display()))?;
        std::fs::write(&path, &media.bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(MediaHandle {
            kind,
            path,
            mime_type,
            byte_len: media.bytes.len(),
        })
    }

    fn advance(
        &self,
        session: &mut Session,
        event: StageEvent,
    ) -> Result<(), IllegalTransition> {
        let from = session.stage;
        let next = transition(from, event)?;
        session.stage = next;
        self.emit(
            EventKind::StageChanged,
            json!({ "from": from.as_str(), "to": next.as_str(), "event": event.name() }),
        );
        Ok(())
    }

    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, kind: EventKind, payload: Value) {
        emit_quiet(self.events.as_ref(), kind, payload);
    }
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
