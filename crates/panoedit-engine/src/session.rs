use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use panoedit_contracts::catalog::{static_prompts, REFUSAL_MESSAGE, VALIDATION_MESSAGE};
use panoedit_contracts::events::{EventLog, EventPayload};
use panoedit_contracts::models::{
    Capability, ModelPair, ModelRegistry, ModelSelection, ModelSelector,
};
use panoedit_contracts::{HistoryStore, PendingMessage, SessionState, Version, ViewMode};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::backend::BackendRegistry;
use crate::error::{ProtocolError, SessionError, UploadError, ValidationError};
use crate::normalize::normalize;
use crate::protocol::{EditOutcome, EditRequestProtocol, SuggestionProtocol};
use crate::upload::{fetch_upload, read_upload, Upload};

/// Model choices for a session. `None`, or a model that cannot be served,
/// picks the first registered model with the needed capability and a
/// registered backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionConfig {
    pub edit_model: Option<String>,
    pub suggest_model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    NewVersion { index: usize },
    Clarification(String),
    Refused,
    Failed(String),
    /// The session moved on (reset or new upload) while the request was out.
    Discarded,
}

/// An accepted edit waiting for its backend call.
///
/// Tickets are `Send`, so the call can run on another thread while the
/// session stays in `LOADING`.
pub struct EditTicket {
    session_id: String,
    base_index: usize,
    source: Version,
    instruction: String,
    protocol: EditRequestProtocol,
}

impl EditTicket {
    pub fn base_index(&self) -> usize {
        self.base_index
    }

    pub fn execute(self) -> CompletedEdit {
        let result = self.protocol.request_edit(&self.source, &self.instruction);
        CompletedEdit {
            session_id: self.session_id,
            instruction: self.instruction,
            result,
        }
    }
}

pub struct CompletedEdit {
    session_id: String,
    instruction: String,
    result: Result<EditOutcome, ProtocolError>,
}

struct SuggestionBatch {
    session_id: String,
    prompts: Vec<String>,
}

/// Sequences uploads, edits and history navigation for one user.
///
/// `INITIAL -> EDITING` on a successful upload, `EDITING -> LOADING` while an
/// edit is out, back to `EDITING` once its outcome is applied, and any state
/// returns to `INITIAL` on reset. Only normalization and upload failures reset
/// the session; every other failure leaves history intact.
pub struct EditSession {
    state: SessionState,
    history: HistoryStore,
    message: Option<PendingMessage>,
    suggestions: Vec<String>,
    suggestions_pending: bool,
    session_id: String,
    editor: EditRequestProtocol,
    suggester: SuggestionProtocol,
    backends: BackendRegistry,
    selector: ModelSelector,
    events: EventLog,
    suggestion_tx: Sender<SuggestionBatch>,
    suggestion_rx: Receiver<SuggestionBatch>,
}

impl EditSession {
    pub fn new(
        config: &SessionConfig,
        backends: BackendRegistry,
        events: EventLog,
    ) -> Result<Self, SessionError> {
        let selector = ModelSelector::new(ModelRegistry::default(), backends.names());
        let ModelPair { edit, suggest } = selector.select_pair(
            config.edit_model.as_deref(),
            config.suggest_model.as_deref(),
        )?;
        let editor = EditRequestProtocol::new(backends.get(&edit.model.backend)?, &edit.model.name);
        let suggester = SuggestionProtocol::new(
            backends.get(&suggest.model.backend)?,
            &suggest.model.name,
            events.clone(),
        );
        let mut session = Self::from_protocols(editor, suggester, events);
        session.backends = backends;
        session.selector = selector;
        for selection in [&edit, &suggest] {
            if selection.fallback.is_some() {
                session.log_model_selection(selection);
            }
        }
        Ok(session)
    }

    /// Builds a session around already constructed protocols. Model switching
    /// is unavailable until backends are registered through [`EditSession::new`].
    pub fn from_protocols(
        editor: EditRequestProtocol,
        suggester: SuggestionProtocol,
        events: EventLog,
    ) -> Self {
        let (suggestion_tx, suggestion_rx) = mpsc::channel();
        let session_id = Uuid::new_v4().to_string();
        events.set_session_id(&session_id);
        let session = Self {
            state: SessionState::Initial,
            history: HistoryStore::new(),
            message: None,
            suggestions: static_prompts(),
            suggestions_pending: false,
            session_id,
            editor,
            suggester,
            backends: BackendRegistry::new(),
            selector: ModelSelector::new(ModelRegistry::default(), Vec::<String>::new()),
            events,
            suggestion_tx,
            suggestion_rx,
        };
        session.emit(
            "session_started",
            fields([
                ("edit_model", json!(session.editor.model())),
                ("edit_backend", json!(session.editor.backend_name())),
                ("suggest_model", json!(session.suggester.model())),
            ]),
        );
        session
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn message(&self) -> Option<&PendingMessage> {
        self.message.as_ref()
    }

    pub fn suggestions(&self) -> &[String] {
        &self.suggestions
    }

    pub fn suggestions_pending(&self) -> bool {
        self.suggestions_pending
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn edit_model(&self) -> &str {
        self.editor.model()
    }

    pub fn suggest_model(&self) -> &str {
        self.suggester.model()
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn view_mode(&self) -> ViewMode {
        self.history.view_mode()
    }

    pub fn displayed(&self) -> Option<&Version> {
        self.history.displayed()
    }

    pub fn displayed_index(&self) -> Option<usize> {
        self.history.displayed_index()
    }

    pub fn set_edit_model(&mut self, name: &str) -> Result<ModelSelection, SessionError> {
        let selection = self.selector.select(Some(name), Capability::Edit)?;
        let backend = self.backends.get(&selection.model.backend)?;
        self.editor = EditRequestProtocol::new(backend, &selection.model.name);
        self.log_model_selection(&selection);
        Ok(selection)
    }

    pub fn set_suggest_model(&mut self, name: &str) -> Result<ModelSelection, SessionError> {
        let selection = self.selector.select(Some(name), Capability::Suggest)?;
        let backend = self.backends.get(&selection.model.backend)?;
        self.suggester =
            SuggestionProtocol::new(backend, &selection.model.name, self.events.clone());
        self.log_model_selection(&selection);
        Ok(selection)
    }

    pub fn open_file(&mut self, path: &Path) -> Result<(), SessionError> {
        match read_upload(path) {
            Ok(upload) => self.load_image(upload),
            Err(err) => Err(self.reject_upload(&path.display().to_string(), err)),
        }
    }

    pub fn open_url(&mut self, http: &HttpClient, url: &str) -> Result<(), SessionError> {
        match fetch_upload(http, url) {
            Ok(upload) => self.load_image(upload),
            Err(err) => Err(self.reject_upload(url, err)),
        }
    }

    /// Starts a fresh session from `upload`: reset, normalize, seed, then ask
    /// for suggestions in the background.
    pub fn load_image(&mut self, upload: Upload) -> Result<(), SessionError> {
        self.clear();
        let version = match normalize(&upload.bytes, &upload.media_type) {
            Ok(version) => version,
            Err(err) => {
                self.message = Some(PendingMessage::Error(err.to_string()));
                self.emit(
                    "image_rejected",
                    fields([("source", json!(upload.source)), ("error", json!(err.to_string()))]),
                );
                return Err(err.into());
            }
        };
        self.history.seed(version.clone())?;
        self.state = SessionState::Editing;
        self.emit(
            "image_loaded",
            fields([
                ("source", json!(upload.source)),
                ("upload_media_type", json!(upload.media_type)),
                ("media_type", json!(version.media_type())),
                ("bytes", json!(version.len())),
                ("version_id", json!(version.short_id())),
            ]),
        );
        self.request_suggestions(version);
        Ok(())
    }

    pub fn load_bytes(
        &mut self,
        bytes: Vec<u8>,
        media_type: &str,
        source: &str,
    ) -> Result<(), SessionError> {
        self.load_image(Upload {
            bytes,
            media_type: media_type.to_string(),
            source: source.to_string(),
        })
    }

    /// Validates and accepts an edit, moving the session to `LOADING`.
    pub fn begin_edit(&mut self, instruction: &str) -> Result<EditTicket, SessionError> {
        if self.state == SessionState::Loading {
            return Err(ValidationError::Busy.into());
        }
        let instruction = instruction.trim();
        let Some(source) = self.history.current().cloned() else {
            return Err(self.reject_locally(ValidationError::NoImage));
        };
        if instruction.is_empty() {
            return Err(self.reject_locally(ValidationError::EmptyInstruction));
        }

        self.message = None;
        self.state = SessionState::Loading;
        let base_index = self.history.cursor();
        self.emit(
            "edit_requested",
            fields([
                ("instruction", json!(instruction)),
                ("base_index", json!(base_index)),
                ("model", json!(self.editor.model())),
            ]),
        );
        Ok(EditTicket {
            session_id: self.session_id.clone(),
            base_index,
            source,
            instruction: instruction.to_string(),
            protocol: self.editor.clone(),
        })
    }

    /// Applies a finished edit. Results from a session that has since been
    /// reset or reloaded are dropped without touching history.
    pub fn finish_edit(&mut self, done: CompletedEdit) -> SubmitOutcome {
        if done.session_id != self.session_id || self.state != SessionState::Loading {
            self.emit(
                "edit_discarded",
                fields([
                    ("instruction", json!(done.instruction)),
                    ("ticket_session_id", json!(done.session_id)),
                ]),
            );
            return SubmitOutcome::Discarded;
        }
        self.state = SessionState::Editing;

        match done.result {
            Ok(EditOutcome::Image(version)) => {
                let media_type = version.media_type().to_string();
                let (bytes, version_id) = (version.len(), version.short_id());
                match self.history.append(version) {
                    Ok(index) => {
                        self.message = None;
                        self.emit(
                            "version_created",
                            fields([
                                ("index", json!(index)),
                                ("instruction", json!(done.instruction)),
                                ("media_type", json!(media_type)),
                                ("bytes", json!(bytes)),
                                ("version_id", json!(version_id)),
                            ]),
                        );
                        SubmitOutcome::NewVersion { index }
                    }
                    Err(err) => self.fail_edit(&done.instruction, err.to_string()),
                }
            }
            Ok(EditOutcome::Clarification(text)) => {
                self.message = Some(PendingMessage::Clarification(text.clone()));
                self.emit(
                    "clarification_received",
                    fields([
                        ("instruction", json!(done.instruction)),
                        ("text", json!(text)),
                    ]),
                );
                SubmitOutcome::Clarification(text)
            }
            Ok(EditOutcome::Empty) => {
                self.message = Some(PendingMessage::Error(REFUSAL_MESSAGE.to_string()));
                self.emit(
                    "edit_refused",
                    fields([("instruction", json!(done.instruction))]),
                );
                SubmitOutcome::Refused
            }
            Err(err) => self.fail_edit(&done.instruction, err.to_string()),
        }
    }

    /// Runs an edit to completion on the calling thread.
    pub fn submit(&mut self, instruction: &str) -> Result<SubmitOutcome, SessionError> {
        let ticket = self.begin_edit(instruction)?;
        Ok(self.finish_edit(ticket.execute()))
    }

    /// Accepts the suggestion at `index` (0-based) as the edit instruction.
    pub fn begin_suggestion(&mut self, index: usize) -> Result<EditTicket, SessionError> {
        let prompt = self
            .suggestions
            .get(index)
            .cloned()
            .ok_or(ValidationError::NoSuggestion(index))?;
        self.begin_edit(&prompt)
    }

    pub fn try_suggestion(&mut self, index: usize) -> Result<SubmitOutcome, SessionError> {
        let ticket = self.begin_suggestion(index)?;
        Ok(self.finish_edit(ticket.execute()))
    }

    pub fn select(&mut self, index: usize) -> Result<(), SessionError> {
        self.ensure_idle()?;
        self.history.select(index)?;
        self.emit("version_selected", fields([("index", json!(index))]));
        Ok(())
    }

    pub fn set_view_mode(&mut self, mode: ViewMode) -> Result<(), SessionError> {
        if self.history.is_empty() {
            return Err(ValidationError::NoImage.into());
        }
        self.history.set_view_mode(mode);
        self.emit(
            "view_mode_changed",
            fields([
                ("mode", json!(mode.as_str())),
                ("displayed_index", json!(self.history.displayed_index())),
            ]),
        );
        Ok(())
    }

    /// Flips between the cursor version and its predecessor. Refused on the
    /// original, which has nothing before it.
    pub fn toggle_view_mode(&mut self) -> Result<ViewMode, SessionError> {
        if self.history.is_empty() {
            return Err(ValidationError::NoImage.into());
        }
        if !self.history.can_compare() {
            return Err(ValidationError::NothingToCompare.into());
        }
        let mode = self.history.view_mode().toggled();
        self.set_view_mode(mode)?;
        Ok(mode)
    }

    pub fn dismiss_message(&mut self) {
        self.message = None;
    }

    pub fn reset(&mut self) {
        self.clear();
        self.emit("session_reset", EventPayload::new());
    }

    /// Applies any suggestion results that have arrived. Returns true when
    /// the list changed.
    pub fn poll_suggestions(&mut self) -> bool {
        let mut updated = false;
        while let Ok(batch) = self.suggestion_rx.try_recv() {
            updated |= self.apply_suggestions(batch);
        }
        updated
    }

    /// Blocks until the outstanding suggestion request for this session
    /// resolves or `timeout` passes.
    pub fn wait_for_suggestions(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut updated = self.poll_suggestions();
        while self.suggestions_pending {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.suggestion_rx.recv_timeout(remaining) {
                Ok(batch) => updated |= self.apply_suggestions(batch),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        updated
    }

    fn request_suggestions(&mut self, original: Version) {
        self.suggestions_pending = true;
        let suggester = self.suggester.clone();
        let tx = self.suggestion_tx.clone();
        let session_id = self.session_id.clone();
        thread::spawn(move || {
            let prompts = suggester.suggest(&original, &session_id);
            let _ = tx.send(SuggestionBatch { session_id, prompts });
        });
    }

    fn apply_suggestions(&mut self, batch: SuggestionBatch) -> bool {
        if batch.session_id != self.session_id {
            return false;
        }
        self.suggestions_pending = false;
        if batch.prompts.is_empty() {
            return false;
        }
        self.suggestions = batch.prompts;
        self.emit(
            "suggestions_updated",
            fields([
                ("count", json!(self.suggestions.len())),
                ("model", json!(self.suggester.model())),
            ]),
        );
        true
    }

    fn ensure_idle(&self) -> Result<(), ValidationError> {
        match self.state {
            SessionState::Initial => Err(ValidationError::NoImage),
            SessionState::Loading => Err(ValidationError::Busy),
            SessionState::Editing => Ok(()),
        }
    }

    fn reject_locally(&mut self, err: ValidationError) -> SessionError {
        self.message = Some(PendingMessage::Error(VALIDATION_MESSAGE.to_string()));
        err.into()
    }

    fn reject_upload(&mut self, source: &str, err: UploadError) -> SessionError {
        self.clear();
        self.message = Some(PendingMessage::Error(err.to_string()));
        self.emit(
            "image_rejected",
            fields([("source", json!(source)), ("error", json!(err.to_string()))]),
        );
        err.into()
    }

    fn fail_edit(&mut self, instruction: &str, reason: String) -> SubmitOutcome {
        let text = format!("Failed to edit image: {reason}");
        self.message = Some(PendingMessage::Error(text.clone()));
        self.emit(
            "edit_failed",
            fields([("instruction", json!(instruction)), ("error", json!(reason))]),
        );
        SubmitOutcome::Failed(text)
    }

    fn log_model_selection(&self, selection: &ModelSelection) {
        let reason = selection.fallback.as_ref().map(ToString::to_string);
        self.emit(
            "model_selected",
            fields([
                ("capability", json!(selection.capability.as_str())),
                ("model", json!(selection.model.name)),
                ("requested", json!(selection.requested)),
                ("fallback_reason", json!(reason)),
            ]),
        );
    }

    /// Back to `INITIAL` under a new session id so in-flight results from the
    /// old one are recognised as stale.
    fn clear(&mut self) {
        self.history.reset();
        self.state = SessionState::Initial;
        self.message = None;
        self.suggestions = static_prompts();
        self.suggestions_pending = false;
        self.session_id = Uuid::new_v4().to_string();
        self.events.set_session_id(&self.session_id);
    }

    fn emit(&self, event_type: &str, payload: EventPayload) {
        let _ = self.events.emit(event_type, payload);
    }
}

fn fields<const N: usize>(pairs: [(&str, Value); N]) -> EventPayload {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use panoedit_contracts::catalog::STATIC_EXAMPLE_PROMPTS;

    use panoedit_contracts::models::{FallbackReason, NoModelAvailable};

    use super::*;
    use crate::backend::{
        default_backend_registry, BackendConfig, EditReply, EditRequest, GenerativeBackend,
        InlineImage, SuggestionRequest,
    };
    use crate::error::BackendError;

    #[derive(Default)]
    struct Scripted {
        edits: Mutex<VecDeque<Result<EditReply, BackendError>>>,
        suggestion: Mutex<Option<Result<String, BackendError>>>,
        suggest_gate: Mutex<Option<Receiver<()>>>,
        instructions: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn push_edit(&self, reply: Result<EditReply, BackendError>) {
            self.edits.lock().unwrap().push_back(reply);
        }

        fn push_image(&self, tag: &[u8]) {
            self.push_edit(Ok(EditReply {
                image: Some(InlineImage {
                    bytes: tag.to_vec(),
                    media_type: Some("image/png".to_string()),
                }),
                text: None,
            }));
        }
    }

    impl GenerativeBackend for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn edit(&self, request: &EditRequest) -> Result<EditReply, BackendError> {
            self.instructions
                .lock()
                .unwrap()
                .push(request.instruction.clone());
            self.edits
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(EditReply::default()))
        }

        fn suggest(&self, _request: &SuggestionRequest) -> Result<String, BackendError> {
            let gate = self.suggest_gate.lock().unwrap().take();
            if let Some(gate) = gate {
                let _ = gate.recv();
            }
            self.suggestion
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Err(BackendError::Transport("no script".to_string())))
        }
    }

    fn session_with(backend: Arc<Scripted>) -> (EditSession, EventLog) {
        let events = EventLog::in_memory();
        let session = EditSession::from_protocols(
            EditRequestProtocol::new(backend.clone(), "scripted-edit"),
            SuggestionProtocol::new(backend, "scripted-suggest", events.clone()),
            events.clone(),
        );
        (session, events)
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([40, 90, 160])))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .expect("encode fixture");
        bytes
    }

    fn loaded(backend: Arc<Scripted>) -> (EditSession, EventLog) {
        let (mut session, events) = session_with(backend);
        session
            .load_bytes(png(8, 4), "image/png", "fixture.png")
            .expect("load");
        (session, events)
    }

    #[test]
    fn wide_upload_then_edit_select_and_refusal() -> anyhow::Result<()> {
        let backend = Arc::new(Scripted::default());
        let (mut session, events) = session_with(backend.clone());

        session.load_bytes(png(16, 4), "image/png", "wide.png")?;
        assert_eq!(session.state(), SessionState::Editing);
        let original = session.history().original().expect("original");
        let decoded = image::load_from_memory(original.content())?;
        assert_eq!((decoded.width(), decoded.height()), (16, 8));

        backend.push_image(b"plant");
        assert_eq!(
            session.submit("add a plant")?,
            SubmitOutcome::NewVersion { index: 1 }
        );
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history().cursor(), 1);
        assert_eq!(session.view_mode(), ViewMode::Edited);

        session.select(0)?;
        session.set_view_mode(ViewMode::Original)?;
        assert_eq!(session.displayed_index(), Some(0));

        session.select(1)?;
        backend.push_edit(Ok(EditReply::default()));
        assert_eq!(session.submit("add a lamp")?, SubmitOutcome::Refused);
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history().cursor(), 1);
        assert_eq!(
            session.message(),
            Some(&PendingMessage::Error(REFUSAL_MESSAGE.to_string()))
        );
        assert_eq!(session.state(), SessionState::Editing);

        let types = events.types();
        assert!(types.contains(&"version_created".to_string()));
        assert!(types.contains(&"edit_refused".to_string()));
        Ok(())
    }

    #[test]
    fn editing_from_an_older_version_truncates_forward_history() -> anyhow::Result<()> {
        let backend = Arc::new(Scripted::default());
        let (mut session, _) = loaded(backend.clone());
        backend.push_image(b"one");
        backend.push_image(b"two");
        backend.push_image(b"branch");
        session.submit("one")?;
        session.submit("two")?;
        assert_eq!(session.history().len(), 3);

        session.select(1)?;
        assert_eq!(
            session.submit("branch")?,
            SubmitOutcome::NewVersion { index: 2 }
        );
        assert_eq!(session.history().len(), 3);
        assert_eq!(
            session.history().current().map(Version::content),
            Some(&b"branch"[..])
        );
        Ok(())
    }

    #[test]
    fn clarification_keeps_history_and_surfaces_text() -> anyhow::Result<()> {
        let backend = Arc::new(Scripted::default());
        let (mut session, _) = loaded(backend.clone());
        backend.push_edit(Ok(EditReply {
            image: None,
            text: Some("Which wall should be painted?".to_string()),
        }));

        let outcome = session.submit("paint the wall")?;
        assert_eq!(
            outcome,
            SubmitOutcome::Clarification("Which wall should be painted?".to_string())
        );
        assert_eq!(session.history().len(), 1);
        assert_eq!(
            session.message().map(PendingMessage::is_error),
            Some(false)
        );

        session.dismiss_message();
        assert!(session.message().is_none());
        Ok(())
    }

    #[test]
    fn backend_failure_is_recoverable() -> anyhow::Result<()> {
        let backend = Arc::new(Scripted::default());
        let (mut session, _) = loaded(backend.clone());
        backend.push_edit(Err(BackendError::Status {
            code: 429,
            message: "quota exceeded".to_string(),
        }));

        let outcome = session.submit("add a rug")?;
        assert_eq!(
            outcome,
            SubmitOutcome::Failed("Failed to edit image: quota exceeded".to_string())
        );
        assert_eq!(session.state(), SessionState::Editing);
        assert_eq!(session.history().len(), 1);

        backend.push_image(b"rug");
        assert_eq!(
            session.submit("add a rug")?,
            SubmitOutcome::NewVersion { index: 1 }
        );
        assert!(session.message().is_none());
        Ok(())
    }

    #[test]
    fn failed_edit_is_sent_once_and_leaves_history_alone() -> anyhow::Result<()> {
        let backend = Arc::new(Scripted::default());
        let (mut session, events) = loaded(backend.clone());
        let original = session.history().original().cloned();
        backend.push_edit(Err(BackendError::Transport("connection reset".to_string())));
        backend.push_image(b"would-be-retry");

        assert!(matches!(session.submit("add a rug")?, SubmitOutcome::Failed(_)));
        assert_eq!(*backend.instructions.lock().unwrap(), vec!["add a rug"]);
        assert_eq!(backend.edits.lock().unwrap().len(), 1);
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history().cursor(), 0);
        assert_eq!(session.history().current().cloned(), original);
        let requested = events.types().iter().filter(|kind| *kind == "edit_requested").count();
        assert_eq!(requested, 1);
        Ok(())
    }

    #[test]
    fn local_validation_rejects_before_any_call() {
        let backend = Arc::new(Scripted::default());
        let (mut session, _) = session_with(backend.clone());

        let err = session.submit("add a plant").unwrap_err();
        assert!(matches!(
            err,
            SessionError::Validation(ValidationError::NoImage)
        ));
        assert_eq!(session.state(), SessionState::Initial);
        assert_eq!(
            session.message(),
            Some(&PendingMessage::Error(VALIDATION_MESSAGE.to_string()))
        );

        session
            .load_bytes(png(8, 4), "image/png", "fixture.png")
            .unwrap();
        let err = session.submit("   ").unwrap_err();
        assert!(matches!(
            err,
            SessionError::Validation(ValidationError::EmptyInstruction)
        ));
        assert_eq!(session.state(), SessionState::Editing);
        assert!(backend.instructions.lock().unwrap().is_empty());
    }

    #[test]
    fn only_one_edit_in_flight() -> anyhow::Result<()> {
        let backend = Arc::new(Scripted::default());
        let (mut session, _) = loaded(backend.clone());

        let ticket = session.begin_edit("add a plant")?;
        assert_eq!(session.state(), SessionState::Loading);
        assert!(matches!(
            session.begin_edit("add a lamp"),
            Err(SessionError::Validation(ValidationError::Busy))
        ));
        assert!(matches!(
            session.select(0),
            Err(SessionError::Validation(ValidationError::Busy))
        ));

        backend.push_image(b"plant");
        let done = thread::spawn(move || ticket.execute())
            .join()
            .expect("edit thread");
        assert_eq!(
            session.finish_edit(done),
            SubmitOutcome::NewVersion { index: 1 }
        );
        Ok(())
    }

    #[test]
    fn results_for_a_reset_session_are_discarded() -> anyhow::Result<()> {
        let backend = Arc::new(Scripted::default());
        let (mut session, events) = loaded(backend.clone());
        backend.push_image(b"late");

        let ticket = session.begin_edit("add a plant")?;
        session.reset();
        assert_eq!(session.state(), SessionState::Initial);
        assert_eq!(session.finish_edit(ticket.execute()), SubmitOutcome::Discarded);
        assert!(session.history().is_empty());

        session.load_bytes(png(8, 4), "image/png", "again.png")?;
        backend.push_image(b"stale");
        let stale = session.begin_edit("add a lamp")?;
        session.load_bytes(png(8, 4), "image/png", "third.png")?;
        assert_eq!(session.finish_edit(stale.execute()), SubmitOutcome::Discarded);
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.state(), SessionState::Editing);
        assert!(events.types().contains(&"edit_discarded".to_string()));
        Ok(())
    }

    #[test]
    fn unreadable_upload_resets_to_initial() -> anyhow::Result<()> {
        let backend = Arc::new(Scripted::default());
        let (mut session, events) = loaded(backend.clone());

        let err = session
            .load_bytes(b"not an image".to_vec(), "image/png", "broken.png")
            .unwrap_err();
        assert!(matches!(err, SessionError::Normalization(_)));
        assert_eq!(session.state(), SessionState::Initial);
        assert!(session.history().is_empty());
        assert!(session
            .message()
            .map(|message| message.text().contains("corrupt"))
            .unwrap_or(false));
        assert_eq!(events.types().last().map(String::as_str), Some("image_rejected"));

        let temp = tempfile::tempdir()?;
        let err = session.open_file(&temp.path().join("missing.png")).unwrap_err();
        assert!(matches!(err, SessionError::Upload(UploadError::Io(_))));
        assert_eq!(session.state(), SessionState::Initial);
        Ok(())
    }

    #[test]
    fn view_toggle_needs_a_previous_version() -> anyhow::Result<()> {
        let backend = Arc::new(Scripted::default());
        let (mut session, _) = loaded(backend.clone());
        assert!(matches!(
            session.toggle_view_mode(),
            Err(SessionError::Validation(ValidationError::NothingToCompare))
        ));

        backend.push_image(b"edit");
        session.submit("edit")?;
        assert_eq!(session.toggle_view_mode()?, ViewMode::Original);
        assert_eq!(
            session.displayed().map(Version::content),
            session.history().original().map(Version::content)
        );
        assert_eq!(session.toggle_view_mode()?, ViewMode::Edited);
        assert_eq!(session.displayed_index(), Some(1));

        session.toggle_view_mode()?;
        session.select(1)?;
        assert_eq!(session.view_mode(), ViewMode::Edited);
        Ok(())
    }

    #[test]
    fn selection_keeps_pending_message() -> anyhow::Result<()> {
        let backend = Arc::new(Scripted::default());
        let (mut session, _) = loaded(backend.clone());
        backend.push_image(b"edit");
        session.submit("edit")?;
        backend.push_edit(Ok(EditReply::default()));
        session.submit("nothing")?;

        session.select(0)?;
        assert!(session.message().is_some());
        assert!(matches!(
            session.select(5),
            Err(SessionError::History(_))
        ));
        Ok(())
    }

    #[test]
    fn suggestions_replace_defaults_when_they_arrive() {
        let backend = Arc::new(Scripted::default());
        *backend.suggestion.lock().unwrap() =
            Some(Ok(r#"{"prompts": ["Add a rug", 3, "Warm lights"]}"#.to_string()));
        let (mut session, events) = loaded(backend.clone());

        assert!(session.wait_for_suggestions(Duration::from_secs(10)));
        assert!(!session.suggestions_pending());
        assert_eq!(session.suggestions(), ["Add a rug", "Warm lights"]);
        assert!(events.types().contains(&"suggestions_updated".to_string()));

        backend.push_image(b"rug");
        assert_eq!(
            session.try_suggestion(0).unwrap(),
            SubmitOutcome::NewVersion { index: 1 }
        );
        assert_eq!(backend.instructions.lock().unwrap()[0], "Add a rug");
        assert!(matches!(
            session.try_suggestion(9),
            Err(SessionError::Validation(ValidationError::NoSuggestion(9)))
        ));
    }

    #[test]
    fn failed_suggestions_keep_static_defaults() {
        let backend = Arc::new(Scripted::default());
        let (mut session, events) = loaded(backend);

        assert!(!session.wait_for_suggestions(Duration::from_secs(10)));
        assert!(!session.suggestions_pending());
        assert_eq!(session.suggestions(), STATIC_EXAMPLE_PROMPTS);
        assert!(session.message().is_none());
        assert!(events.types().contains(&"suggestions_failed".to_string()));
    }

    #[test]
    fn stale_suggestions_are_ignored() {
        let backend = Arc::new(Scripted::default());
        *backend.suggestion.lock().unwrap() = Some(Ok(r#"{"prompts": ["Old"]}"#.to_string()));
        let (mut session, _) = loaded(backend);

        session.reset();
        thread::sleep(Duration::from_millis(200));
        assert!(!session.poll_suggestions());
        assert_eq!(session.suggestions(), STATIC_EXAMPLE_PROMPTS);
    }

    #[test]
    fn late_suggestion_failure_is_logged_for_the_asking_session() -> anyhow::Result<()> {
        let backend = Arc::new(Scripted::default());
        let (release, gate) = mpsc::channel();
        *backend.suggest_gate.lock().unwrap() = Some(gate);
        let (mut session, events) = loaded(backend);
        let asking = session.session_id().to_string();

        session.reset();
        assert_ne!(session.session_id(), asking);
        release.send(())?;

        let deadline = Instant::now() + Duration::from_secs(10);
        let failed = loop {
            let found = events
                .snapshot()
                .into_iter()
                .find(|event| event["type"] == "suggestions_failed");
            match found {
                Some(event) => break event,
                None if Instant::now() < deadline => thread::sleep(Duration::from_millis(10)),
                None => anyhow::bail!("suggestion failure was never logged"),
            }
        };
        assert_eq!(failed["session_id"], json!(asking));
        assert!(!session.poll_suggestions());
        Ok(())
    }

    #[test]
    fn new_session_resolves_models_through_registry() -> anyhow::Result<()> {
        let events = EventLog::in_memory();
        let mut session = EditSession::new(
            &SessionConfig {
                edit_model: Some("dryrun-image-1".to_string()),
                suggest_model: None,
            },
            default_backend_registry(&BackendConfig::default()),
            events.clone(),
        )?;
        assert_eq!(session.edit_model(), "dryrun-image-1");
        assert_eq!(session.suggest_model(), "gemini-2.5-flash");
        assert_eq!(events.types()[0], "session_started");

        let selection = session.set_edit_model("no-such-model")?;
        assert_eq!(selection.model.name, "gemini-2.5-flash-image-preview");
        assert_eq!(
            selection.fallback,
            Some(FallbackReason::UnknownModel("no-such-model".to_string()))
        );
        assert_eq!(session.edit_model(), "gemini-2.5-flash-image-preview");

        session.set_edit_model("dryrun-image-1")?;
        session.load_bytes(png(8, 4), "image/png", "fixture.png")?;
        assert_eq!(
            session.submit("add a plant")?,
            SubmitOutcome::NewVersion { index: 1 }
        );
        Ok(())
    }

    #[test]
    fn models_without_a_registered_backend_fall_back() -> anyhow::Result<()> {
        let mut backends = BackendRegistry::new();
        backends.register(crate::dryrun::DryrunBackend);
        let events = EventLog::in_memory();
        let session = EditSession::new(
            &SessionConfig {
                edit_model: Some("gemini-2.5-flash-image".to_string()),
                suggest_model: Some("gemini-2.5-pro".to_string()),
            },
            backends,
            events.clone(),
        )?;
        assert_eq!(session.edit_model(), "dryrun-image-1");
        assert_eq!(session.suggest_model(), "dryrun-image-1");

        let selected: Vec<Value> = events
            .snapshot()
            .into_iter()
            .filter(|event| event["type"] == "model_selected")
            .collect();
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0]["capability"], "edit");
        assert_eq!(
            selected[0]["fallback_reason"],
            "Model 'gemini-2.5-flash-image' needs the 'gemini' backend, which is not available."
        );
        assert_eq!(selected[1]["capability"], "suggest");
        Ok(())
    }

    #[test]
    fn empty_backend_registry_cannot_start_a_session() {
        let result = EditSession::new(
            &SessionConfig::default(),
            BackendRegistry::new(),
            EventLog::in_memory(),
        );
        assert!(matches!(
            result,
            Err(SessionError::Model(NoModelAvailable { capability: Capability::Edit }))
        ));
    }
}
