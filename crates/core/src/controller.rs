//! The voice session controller.
//!
//! One controller owns at most one room connection and at most one local
//! microphone track. All mutations go through a single `Inner` behind a
//! mutex that is never held across an await; every change is published as a
//! [`StatusSnapshot`] on a `watch` channel while the lock is held, so
//! observers see transitions in the order they happened.

use crate::{
    backend::{BackendClient, FileUploader, TokenSource, UploadFile, UploadedFile},
    config::ClientConfig,
    error::{ErrorKind, MediaError, SessionError},
    media::{
        AgentActivity, AudioAttachment, LocalAudioTrack, MediaRoom, Microphone, RoomConnector,
        RoomEvent, TrackKind,
    },
    session::{Session, SessionInfo, random_display_name, resolve_room_url},
    status::{
        ASSISTANT_NAME, Activity, ConnectionState, ControlFlags, Notice, Phase, StatusSnapshot,
        derive_state, error_message, phase_message,
    },
};
use secrecy::ExposeSecret;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, info, instrument, warn};

/// The external collaborators a controller drives.
#[derive(Clone)]
pub struct Collaborators {
    pub tokens: Arc<dyn TokenSource>,
    pub uploader: Arc<dyn FileUploader>,
    pub microphone: Arc<dyn Microphone>,
    pub connector: Arc<dyn RoomConnector>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Start,
    ToggleMic,
    Upload,
}

struct Inner {
    phase: Phase,
    activity: Activity,
    message: String,
    in_flight: Option<Operation>,
    teardown_requested: bool,
    /// Bumped on every `start()`; room events carry the epoch they belong to.
    epoch: u64,
    session: Option<Session>,
    room: Option<Arc<dyn MediaRoom>>,
    mic_track: Option<Box<dyn LocalAudioTrack>>,
    attachments: Vec<Box<dyn AudioAttachment>>,
    pump: Option<JoinHandle<()>>,
    notice: Option<Notice>,
    notices_raised: u64,
    last_error: Option<String>,
}

impl Inner {
    fn new() -> Self {
        Self {
            phase: Phase::Idle,
            activity: Activity::default(),
            message: phase_message(&Phase::Idle),
            in_flight: None,
            teardown_requested: false,
            epoch: 0,
            session: None,
            room: None,
            mic_track: None,
            attachments: Vec::new(),
            pump: None,
            notice: None,
            notices_raised: 0,
            last_error: None,
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        self.message = phase_message(&phase);
        self.phase = phase;
    }

    fn next_notice_id(&mut self) -> u64 {
        self.notices_raised += 1;
        self.notices_raised
    }

    fn raise(&mut self, notice: Notice) {
        self.notice = Some(notice);
    }

    fn is_established(&self) -> bool {
        self.phase == Phase::Ready && self.room.is_some()
    }

    fn holds_resources(&self) -> bool {
        self.session.is_some()
            || self.room.is_some()
            || self.mic_track.is_some()
            || !self.attachments.is_empty()
    }

    /// Stops the local track, detaches playback and drops the session.
    /// Returns the room so the caller can disconnect it outside the lock.
    fn release(&mut self) -> Option<Arc<dyn MediaRoom>> {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        for mut attachment in self.attachments.drain(..) {
            attachment.detach();
        }
        if let Some(mut track) = self.mic_track.take() {
            track.stop();
        }
        self.session = None;
        self.activity = Activity::default();
        self.room.take()
    }
}

/// Resources acquired by one `start()` attempt before they are handed over
/// to `Inner`. Whatever is still here when the attempt ends gets released.
#[derive(Default)]
struct Acquired {
    room: Option<Arc<dyn MediaRoom>>,
    events: Option<mpsc::UnboundedReceiver<RoomEvent>>,
    track: Option<Box<dyn LocalAudioTrack>>,
}

impl Acquired {
    async fn release(&mut self) {
        if let Some(mut track) = self.track.take() {
            track.stop();
        }
        self.events = None;
        if let Some(room) = self.room.take() {
            room.disconnect().await;
        }
    }
}

impl Drop for Acquired {
    fn drop(&mut self) {
        if let Some(mut track) = self.track.take() {
            track.stop();
        }
        if let Some(room) = self.room.take() {
            disconnect_in_background(room);
        }
    }
}

fn disconnect_in_background(room: Arc<dyn MediaRoom>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { room.disconnect().await });
        }
        Err(_) => warn!(room = room.name(), "No runtime to disconnect room on drop"),
    }
}

struct Shared {
    inner: Mutex<Inner>,
    status_tx: watch::Sender<StatusSnapshot>,
    collaborators: Collaborators,
    config: ClientConfig,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(room) = inner.release() {
            info!(room = room.name(), "Controller dropped; releasing room");
            disconnect_in_background(room);
        }
    }
}

/// Clears the in-flight marker if an operation's future is dropped before it
/// settles, so the controller does not stay busy forever.
struct FlightGuard<'a> {
    controller: &'a SessionController,
    op: Operation,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.controller.lock();
        if inner.in_flight != Some(self.op) {
            return;
        }
        inner.in_flight = None;
        if self.op == Operation::Start {
            inner.teardown_requested = false;
            inner.set_phase(Phase::Idle);
        }
        self.controller.publish(&inner);
    }
}

/// Establishes, maintains and tears down one voice session at a time.
///
/// Cloning yields another handle to the same controller. When the last
/// handle is dropped any live room and microphone track are released.
#[derive(Clone)]
pub struct SessionController {
    shared: Arc<Shared>,
}

impl SessionController {
    pub fn new(config: ClientConfig, collaborators: Collaborators) -> Self {
        let (status_tx, _) = watch::channel(StatusSnapshot::default());
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::new()),
                status_tx,
                collaborators,
                config,
            }),
        }
    }

    /// Builds a controller that talks to the Kali-E backend over HTTP.
    pub fn with_backend(
        config: ClientConfig,
        microphone: Arc<dyn Microphone>,
        connector: Arc<dyn RoomConnector>,
    ) -> Result<Self, SessionError> {
        let backend = Arc::new(BackendClient::new(&config)?);
        let collaborators = Collaborators {
            tokens: backend.clone(),
            uploader: backend,
            microphone,
            connector,
        };
        Ok(Self::new(config, collaborators))
    }

    /// The latest published snapshot.
    pub fn status(&self) -> StatusSnapshot {
        self.shared.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.shared.status_tx.subscribe()
    }

    pub fn status_stream(&self) -> WatchStream<StatusSnapshot> {
        WatchStream::new(self.subscribe())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Publishes the state held in `inner`. Callers must hold the lock.
    fn publish(&self, inner: &Inner) {
        let state = derive_state(&inner.phase, inner.activity);
        let message = match state {
            ConnectionState::Speaking => format!("{} is speaking…", ASSISTANT_NAME),
            ConnectionState::UsingTools => format!("{} is using tools…", ASSISTANT_NAME),
            _ => inner.message.clone(),
        };
        let busy = inner.in_flight.is_some();
        let established = state.is_established();
        self.shared.status_tx.send_modify(|snapshot| {
            *snapshot = StatusSnapshot {
                revision: snapshot.revision + 1,
                state,
                message,
                listening: established && inner.activity.listening,
                speaking: established && inner.activity.speaking,
                using_tools: established && inner.activity.using_tools,
                busy,
                controls: ControlFlags::for_busy(busy),
                notice: inner.notice.clone(),
                session: inner.session.as_ref().map(Session::info),
                last_error: inner.last_error.clone(),
            };
        });
    }

    /// Moves to the next setup phase unless a teardown was requested meanwhile.
    fn advance(&self, phase: Phase) -> Result<(), SessionError> {
        let mut inner = self.lock();
        if inner.teardown_requested {
            return Err(SessionError::Cancelled);
        }
        debug!(?phase, "Session setup advancing");
        inner.set_phase(phase);
        self.publish(&inner);
        Ok(())
    }

    fn reject(&self, inner: &mut Inner, intent: &str) -> SessionError {
        let err = if inner.in_flight.is_some() {
            SessionError::Busy
        } else {
            SessionError::NotReady
        };
        warn!(intent, error = %err, "Rejected intent");
        let id = inner.next_notice_id();
        inner.raise(Notice::not_ready(id));
        self.publish(inner);
        err
    }

    /// Connects a new voice session.
    ///
    /// Any failure unwinds everything this attempt acquired before the error
    /// state is published.
    #[instrument(name = "session_start", skip(self))]
    pub async fn start(&self) -> Result<SessionInfo, SessionError> {
        let epoch = {
            let mut inner = self.lock();
            if inner.in_flight.is_some() {
                warn!("start() rejected: another operation is in flight");
                return Err(SessionError::Busy);
            }
            if inner.holds_resources() {
                warn!("start() rejected: a session is already active");
                return Err(SessionError::AlreadyActive);
            }
            inner.in_flight = Some(Operation::Start);
            inner.teardown_requested = false;
            inner.epoch += 1;
            inner.activity = Activity::default();
            inner.notice = None;
            inner.last_error = None;
            inner.epoch
        };
        let _guard = FlightGuard {
            controller: self,
            op: Operation::Start,
        };
        info!(epoch, "Starting voice session");

        let mut acquired = Acquired::default();
        let outcome = self.establish(&mut acquired).await;
        self.finish_start(epoch, outcome, acquired).await
    }

    async fn establish(&self, acquired: &mut Acquired) -> Result<Session, SessionError> {
        let Collaborators {
            tokens,
            microphone,
            connector,
            ..
        } = &self.shared.collaborators;

        self.advance(Phase::RequestingPermission)?;
        microphone
            .request_permission()
            .await
            .map_err(|e| SessionError::PermissionDenied(e.to_string()))?;

        self.advance(Phase::FetchingToken)?;
        let display_name = random_display_name();
        let grant = tokens.fetch_token(&display_name).await?;
        let url = resolve_room_url(&grant.url, self.shared.config.fallback_room_url.as_deref())?;
        let session = Session::from_grant(grant);

        self.advance(Phase::Connecting {
            room: session.room_name.clone(),
        })?;
        let timeout = self.shared.config.connect_timeout;
        let connected = tokio::time::timeout(
            timeout,
            connector.connect(&url, session.token.expose_secret()),
        )
        .await;
        let (room, events) = match connected {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(SessionError::Connection(e.to_string())),
            Err(_) => {
                return Err(SessionError::Connection(
                    MediaError::Timeout(timeout).to_string(),
                ));
            }
        };
        acquired.room = Some(room.clone());
        acquired.events = Some(events);
        info!(room = %session.room_name, %url, "Connected to room");

        self.advance(Phase::PublishingMic)?;
        let track = microphone
            .create_track()
            .await
            .map_err(|e| SessionError::MicPublish(e.to_string()))?;
        let track = acquired.track.insert(track);
        room.publish_track(&**track)
            .await
            .map_err(|e| SessionError::MicPublish(e.to_string()))?;

        Ok(session)
    }

    async fn finish_start(
        &self,
        epoch: u64,
        outcome: Result<Session, SessionError>,
        mut acquired: Acquired,
    ) -> Result<SessionInfo, SessionError> {
        let session = match outcome {
            Ok(session) => session,
            Err(err) => {
                acquired.release().await;
                return Err(self.fail_start(err));
            }
        };

        let teardown = self.lock().teardown_requested;
        if teardown {
            acquired.release().await;
            return Err(self.fail_start(SessionError::Cancelled));
        }

        let (room, events, track) = match (
            acquired.room.take(),
            acquired.events.take(),
            acquired.track.take(),
        ) {
            (Some(room), Some(events), Some(track)) => (room, events, track),
            (room, events, track) => {
                acquired = Acquired {
                    room,
                    events,
                    track,
                };
                acquired.release().await;
                return Err(self.fail_start(SessionError::Connection(
                    "setup finished without a room".to_string(),
                )));
            }
        };

        let mut inner = self.lock();
        let info = session.info();
        inner.room = Some(room);
        inner.mic_track = Some(track);
        inner.session = Some(session);
        inner.pump = Some(spawn_event_pump(
            Arc::downgrade(&self.shared),
            epoch,
            events,
        ));
        inner.in_flight = None;
        inner.set_phase(Phase::Ready);
        self.publish(&inner);
        info!(room = %info.room_name, session_id = %info.id, "Voice session ready");
        Ok(info)
    }

    /// Records a failed or cancelled start. Resources must already be released.
    fn fail_start(&self, err: SessionError) -> SessionError {
        let mut inner = self.lock();
        inner.in_flight = None;
        let cancelled = inner.teardown_requested || matches!(err, SessionError::Cancelled);
        inner.teardown_requested = false;

        match err.kind() {
            Some(kind) if !cancelled => {
                error!(error = %err, ?kind, "Voice session failed to start");
                let id = inner.next_notice_id();
                inner.raise(Notice::for_error(id, kind));
                inner.last_error = Some(err.to_string());
                inner.set_phase(Phase::Error(kind));
            }
            _ => {
                info!("Voice session start cancelled by teardown");
                inner.set_phase(Phase::Idle);
            }
        }
        self.publish(&inner);
        if cancelled {
            SessionError::Cancelled
        } else {
            err
        }
    }

    /// Flips the local microphone between listening and not listening.
    ///
    /// Returns whether the mic is listening afterwards. Failures leave the
    /// session connected.
    #[instrument(name = "session_toggle_mic", skip(self))]
    pub async fn toggle_mic(&self) -> Result<bool, SessionError> {
        let (room, epoch, was_listening) = {
            let mut inner = self.lock();
            if inner.in_flight.is_some() || !inner.is_established() {
                return Err(self.reject(&mut inner, "toggle_mic"));
            }
            let Some(room) = inner.room.clone() else {
                return Err(self.reject(&mut inner, "toggle_mic"));
            };
            inner.in_flight = Some(Operation::ToggleMic);
            inner.notice = None;
            // Release the current track before anything else so at most one
            // capture is ever alive.
            if let Some(mut stale) = inner.mic_track.take() {
                stale.stop();
            }
            let was_listening = inner.activity.listening;
            if was_listening {
                inner.activity.listening = false;
                inner.in_flight = None;
                inner.message = "Tap the mic to talk again".to_string();
            }
            self.publish(&inner);
            (room, inner.epoch, was_listening)
        };
        if was_listening {
            info!("Microphone stopped");
            return Ok(false);
        }
        let _guard = FlightGuard {
            controller: self,
            op: Operation::ToggleMic,
        };

        let mut track = match self.shared.collaborators.microphone.create_track().await {
            Ok(track) => track,
            Err(e) => return Err(self.fail_local(SessionError::MicAccess(e.to_string()))),
        };
        if let Err(e) = room.publish_track(&*track).await {
            track.stop();
            return Err(self.fail_local(SessionError::MicPublish(e.to_string())));
        }

        let mut inner = self.lock();
        inner.in_flight = None;
        if inner.epoch != epoch || !inner.is_established() {
            track.stop();
            self.publish(&inner);
            return Err(SessionError::Cancelled);
        }
        inner.mic_track = Some(track);
        inner.activity.listening = true;
        inner.message = "Listening…".to_string();
        self.publish(&inner);
        info!("Microphone listening");
        Ok(true)
    }

    /// Surfaces an error that only affects a sub-state of an established
    /// session.
    fn fail_local(&self, err: SessionError) -> SessionError {
        let mut inner = self.lock();
        inner.in_flight = None;
        if let Some(kind) = err.kind() {
            error!(error = %err, ?kind, "Session operation failed");
            let id = inner.next_notice_id();
            inner.raise(Notice::for_error(id, kind));
            inner.last_error = Some(err.to_string());
            if inner.is_established() {
                inner.message = error_message(kind).to_string();
            }
        }
        self.publish(&inner);
        err
    }

    /// Sends files to the backend for the current room.
    #[instrument(name = "session_upload", skip(self, files), fields(count = files.len()))]
    pub async fn upload_files(
        &self,
        files: Vec<UploadFile>,
    ) -> Result<Vec<UploadedFile>, SessionError> {
        let room_name = {
            let mut inner = self.lock();
            if inner.in_flight.is_some() || !inner.is_established() {
                return Err(self.reject(&mut inner, "upload_files"));
            }
            let Some(room_name) = inner.session.as_ref().map(|s| s.room_name.clone()) else {
                return Err(self.reject(&mut inner, "upload_files"));
            };
            if files.is_empty() {
                return Ok(Vec::new());
            }
            inner.in_flight = Some(Operation::Upload);
            inner.notice = None;
            inner.message = format!("Uploading {}…", files_label(files.len()));
            self.publish(&inner);
            room_name
        };
        let _guard = FlightGuard {
            controller: self,
            op: Operation::Upload,
        };

        match self
            .shared
            .collaborators
            .uploader
            .upload(&room_name, files)
            .await
        {
            Ok(uploaded) => {
                let mut inner = self.lock();
                inner.in_flight = None;
                let summary = format!("Uploaded {}", files_label(uploaded.len()));
                if inner.is_established() {
                    inner.message = summary.clone();
                }
                let id = inner.next_notice_id();
                inner.raise(Notice::info(id, "Files uploaded", summary));
                self.publish(&inner);
                info!(count = uploaded.len(), room = %room_name, "Files uploaded");
                Ok(uploaded)
            }
            Err(e) => {
                let err = match e {
                    SessionError::Upload(_) => e,
                    other => SessionError::Upload(other.to_string()),
                };
                Err(self.fail_local(err))
            }
        }
    }

    /// Tears the session down. Idempotent; a no-op when nothing is held.
    ///
    /// If `start()` is still running, the teardown is recorded and the start
    /// attempt releases whatever it acquired as soon as its current step
    /// settles.
    #[instrument(name = "session_stop", skip(self))]
    pub async fn stop(&self) {
        let room = {
            let mut inner = self.lock();
            if inner.in_flight == Some(Operation::Start) {
                info!("Teardown requested while session start is in flight");
                inner.teardown_requested = true;
                return;
            }
            if !inner.holds_resources() {
                debug!("stop() with no session; nothing to release");
                return;
            }
            let room = inner.release();
            inner.set_phase(Phase::Idle);
            self.publish(&inner);
            room
        };
        if let Some(room) = room {
            room.disconnect().await;
            info!(room = room.name(), "Voice session stopped");
        }
    }

    /// Tears down any current session and starts a fresh one.
    #[instrument(name = "session_reset", skip(self))]
    pub async fn reset(&self) -> Result<SessionInfo, SessionError> {
        let busy = self.lock().in_flight.is_some();
        if busy {
            warn!("reset() rejected: another operation is in flight");
            return Err(SessionError::Busy);
        }
        self.stop().await;
        self.start().await
    }

    /// Folds one room event into the current session's state.
    pub async fn apply_room_event(&self, event: RoomEvent) {
        let epoch = self.lock().epoch;
        self.apply_event(epoch, event).await;
    }

    async fn apply_event(&self, epoch: u64, event: RoomEvent) {
        if let Some(room) = self.fold_event(epoch, event) {
            room.disconnect().await;
        }
    }

    fn fold_event(&self, epoch: u64, event: RoomEvent) -> Option<Arc<dyn MediaRoom>> {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            debug!(?event, "Dropping event from a previous session");
            return None;
        }
        let Some(session) = inner.session.as_ref() else {
            debug!(?event, "Dropping event with no active session");
            return None;
        };
        let from_agent = event.participant().is_some_and(|p| session.is_agent(p));

        match event {
            RoomEvent::TrackSubscribed {
                participant,
                kind: TrackKind::Audio,
                mut track,
            } if from_agent => {
                info!(%participant, sid = track.sid(), "Attaching agent audio");
                // A resubscription replaces the previous playback.
                for mut previous in inner.attachments.drain(..) {
                    previous.detach();
                }
                let attachment = track.attach();
                inner.attachments.push(attachment);
                None
            }
            RoomEvent::TrackMuted {
                kind: TrackKind::Audio,
                ..
            } if from_agent => {
                inner.activity.speaking = false;
                self.publish(&inner);
                None
            }
            RoomEvent::TrackUnmuted {
                kind: TrackKind::Audio,
                ..
            } if from_agent => {
                inner.activity.speaking = true;
                self.publish(&inner);
                None
            }
            RoomEvent::AgentActivityChanged { activity, .. } if from_agent => {
                inner.activity.using_tools = activity == AgentActivity::UsingTools;
                self.publish(&inner);
                None
            }
            RoomEvent::Disconnected { reason } => {
                let err = SessionError::Connection(format!("room disconnected: {}", reason));
                error!(error = %err, "Lost room connection");
                // Only the room reference is handed back; the pump is this
                // task, so detach its handle instead of aborting it.
                inner.pump.take();
                let room = inner.release();
                let id = inner.next_notice_id();
                inner.raise(Notice::for_error(id, ErrorKind::Connection));
                inner.last_error = Some(err.to_string());
                inner.set_phase(Phase::Error(ErrorKind::Connection));
                self.publish(&inner);
                room
            }
            other => {
                debug!(event = ?other, "Ignoring room event");
                None
            }
        }
    }
}

fn files_label(count: usize) -> String {
    if count == 1 {
        "1 file".to_string()
    } else {
        format!("{} files", count)
    }
}

fn spawn_event_pump(
    shared: Weak<Shared>,
    epoch: u64,
    mut events: mpsc::UnboundedReceiver<RoomEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let Some(shared) = shared.upgrade() else {
                break;
            };
            let controller = SessionController { shared };
            controller.apply_event(epoch, event).await;
        }
        debug!(epoch, "Room event stream closed");
    })
}
