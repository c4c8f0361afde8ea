//! Recording fakes for the media seams, used by the controller tests.

use crate::error::MediaError;
use crate::media::{
    AudioAttachment, LocalAudioTrack, MediaRoom, Microphone, RemoteTrack, RoomConnector, RoomEvent,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

/// Counts live tracks across every track a [`FakeMicrophone`] hands out.
#[derive(Default)]
pub struct TrackLedger {
    pub created: AtomicUsize,
    pub stopped: AtomicUsize,
    pub live: AtomicUsize,
    pub max_live: AtomicUsize,
}

impl TrackLedger {
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }
}

pub struct FakeTrack {
    id: String,
    stopped: bool,
    ledger: Arc<TrackLedger>,
}

impl LocalAudioTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.ledger.stopped.fetch_add(1, Ordering::SeqCst);
            self.ledger.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[derive(Default)]
pub struct FakeMicrophone {
    pub deny_permission: AtomicBool,
    pub fail_create: AtomicBool,
    pub permission_requests: AtomicUsize,
    pub ledger: Arc<TrackLedger>,
}

#[async_trait]
impl Microphone for FakeMicrophone {
    async fn request_permission(&self) -> Result<(), MediaError> {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.deny_permission.load(Ordering::SeqCst) {
            Err(MediaError::PermissionDenied("user dismissed prompt".into()))
        } else {
            Ok(())
        }
    }

    async fn create_track(&self) -> Result<Box<dyn LocalAudioTrack>, MediaError> {
        tokio::task::yield_now().await;
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(MediaError::DeviceUnavailable("no input device".into()));
        }
        let n = self.ledger.created.fetch_add(1, Ordering::SeqCst) + 1;
        let live = self.ledger.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.ledger.max_live.fetch_max(live, Ordering::SeqCst);
        Ok(Box::new(FakeTrack {
            id: format!("mic-{}", n),
            stopped: false,
            ledger: self.ledger.clone(),
        }))
    }
}

#[derive(Default)]
pub struct FakeRoom {
    pub name: String,
    pub fail_publish: AtomicBool,
    pub published: Mutex<Vec<String>>,
    pub disconnects: AtomicUsize,
}

impl FakeRoom {
    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaRoom for FakeRoom {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish_track(&self, track: &dyn LocalAudioTrack) -> Result<(), MediaError> {
        tokio::task::yield_now().await;
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(MediaError::Transport("publish rejected".into()));
        }
        self.published
            .lock()
            .expect("published lock")
            .push(track.id().to_string());
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out a fresh [`FakeRoom`] per connect and keeps the event sender.
#[derive(Default)]
pub struct FakeConnector {
    pub fail: AtomicBool,
    pub delay: Mutex<Option<Duration>>,
    pub gate: Mutex<Option<Arc<Notify>>>,
    pub connects: AtomicUsize,
    pub urls: Mutex<Vec<String>>,
    pub rooms: Mutex<Vec<Arc<FakeRoom>>>,
    pub events: Mutex<Option<mpsc::UnboundedSender<RoomEvent>>>,
    pub fail_publish: AtomicBool,
}

impl FakeConnector {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn room(&self, index: usize) -> Arc<FakeRoom> {
        self.rooms.lock().expect("rooms lock")[index].clone()
    }

    pub fn emit(&self, event: RoomEvent) {
        let events = self.events.lock().expect("events lock");
        events
            .as_ref()
            .expect("no room connected")
            .send(event)
            .expect("event pump gone");
    }
}

#[async_trait]
impl RoomConnector for FakeConnector {
    async fn connect(
        &self,
        url: &str,
        _token: &str,
    ) -> Result<(Arc<dyn MediaRoom>, mpsc::UnboundedReceiver<RoomEvent>), MediaError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().expect("urls lock").push(url.to_string());

        let gate = self.gate.lock().expect("gate lock").clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let delay = *self.delay.lock().expect("delay lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(MediaError::Transport("signal connection refused".into()));
        }

        let room = Arc::new(FakeRoom {
            name: "room-test".into(),
            fail_publish: AtomicBool::new(self.fail_publish.load(Ordering::SeqCst)),
            ..Default::default()
        });
        self.rooms.lock().expect("rooms lock").push(room.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock().expect("events lock") = Some(tx);
        Ok((room, rx))
    }
}

#[derive(Default)]
pub struct PlaybackLedger {
    pub attached: AtomicUsize,
    pub detached: AtomicUsize,
}

pub struct FakeRemoteTrack {
    pub sid: String,
    pub ledger: Arc<PlaybackLedger>,
}

impl RemoteTrack for FakeRemoteTrack {
    fn sid(&self) -> &str {
        &self.sid
    }

    fn attach(&mut self) -> Box<dyn AudioAttachment> {
        self.ledger.attached.fetch_add(1, Ordering::SeqCst);
        Box::new(FakeAttachment {
            detached: false,
            ledger: self.ledger.clone(),
        })
    }
}

pub struct FakeAttachment {
    detached: bool,
    ledger: Arc<PlaybackLedger>,
}

impl AudioAttachment for FakeAttachment {
    fn detach(&mut self) {
        if !self.detached {
            self.detached = true;
            self.ledger.detached.fetch_add(1, Ordering::SeqCst);
        }
    }
}
