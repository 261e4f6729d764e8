//! # Live Session Controller
//!
//! Owns the lifecycle of one bidirectional, real-time audio exchange with the
//! remote interview agent: microphone capture feeds the encoder and the
//! transport; received agent audio feeds the decoder and the playback
//! scheduler; barge-in interruption cuts playback instantly.
//!
//! ## State machine:
//! `Idle → Streaming → Closed`, with a Receiving sub-state active whenever
//! agent audio is in flight (live playback sources exist). Exactly one
//! controller exists per active simulation; concurrent simulations are
//! separate controller instances, never shared globals.
//!
//! ## Event model:
//! All session activity (capture frames, transport events, playback
//! completions, stop and status commands) arrives on one controller-owned
//! channel, processed by a single worker task. That task is the only writer
//! of session state, so mutation is serialized without locks and events from
//! each producer are handled in production order.

use crate::audio::capture::CaptureDevice;
use crate::audio::codec::{decode_blob, encode_frame, AudioFrame};
use crate::audio::playback::{PlaybackScheduler, SourceId};
use crate::coaching::{
    BehavioralAnalyzer, FeedbackService, SessionStore, StoredSession, PLACEHOLDER_TRANSCRIPT,
};
use crate::error::AppError;
use crate::transport::{Transport, TransportEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Primary lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created but not started (a failed start leaves the session here)
    Idle,
    /// Capturing microphone audio and streaming it upstream
    Streaming,
    /// Torn down; every device/transport/playback resource released
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Streaming => "streaming",
            SessionState::Closed => "closed",
        }
    }
}

/// Everything a session worker reacts to, on one ordered channel.
pub enum SessionEvent {
    /// One captured microphone block, in capture order
    Frame(AudioFrame),
    /// An event from the upstream transport
    Transport(TransportEvent),
    /// A scheduled playback source finished naturally
    PlaybackEnded(SourceId),
    /// Explicit stop; replies with the stored feedback record, if analysis ran
    Stop {
        reply: oneshot::Sender<Option<StoredSession>>,
    },
    /// Status query
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

/// Point-in-time view of a session for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub state: &'static str,
    /// Receiving sub-state: agent audio is scheduled but unfinished
    pub receiving: bool,
    pub live_sources: usize,
    pub started_at: DateTime<Utc>,
}

/// Collaborators injected into a session at start.
pub struct SessionDeps {
    pub capture: Box<dyn CaptureDevice>,
    pub transport: Box<dyn Transport>,
    pub scheduler: PlaybackScheduler,
    /// Natural-completion notifications from the playback sink
    pub playback_ended: mpsc::UnboundedReceiver<SourceId>,
    pub feedback: Arc<dyn FeedbackService>,
    pub store: Arc<dyn SessionStore>,
    pub analyzer: Arc<BehavioralAnalyzer>,
}

/// Handle held by the session manager and HTTP handlers.
#[derive(Debug)]
pub struct SessionHandle {
    pub session_id: String,
    pub user_id: String,
    pub field: String,
    pub created_at: DateTime<Utc>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionHandle {
    /// Explicit stop. Idempotent: a second call (or a call after a
    /// remote-driven close) finds the worker gone and returns `None`
    /// without error.
    pub async fn stop(&self) -> Option<StoredSession> {
        let (reply, rx) = oneshot::channel();
        if self.events.send(SessionEvent::Stop { reply }).is_err() {
            return None;
        }
        rx.await.ok().flatten()
    }

    /// Current status. A session whose worker already ended reports Closed.
    pub async fn snapshot(&self) -> SessionSnapshot {
        let (reply, rx) = oneshot::channel();
        if self.events.send(SessionEvent::Snapshot { reply }).is_ok() {
            if let Ok(snapshot) = rx.await {
                return snapshot;
            }
        }
        SessionSnapshot {
            session_id: self.session_id.clone(),
            state: SessionState::Closed.as_str(),
            receiving: false,
            live_sources: 0,
            started_at: self.created_at,
        }
    }

    /// Whether the worker task has ended (stopped or remote-closed).
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

#[cfg(test)]
impl SessionHandle {
    /// Handle with no worker behind it. The returned receiver stands in for
    /// the worker's end of the event channel; dropping it makes the handle
    /// report closed.
    pub(crate) fn detached(session_id: &str) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                session_id: session_id.to_string(),
                user_id: "tester".to_string(),
                field: "Software Engineering".to_string(),
                created_at: Utc::now(),
                events,
            },
            events_rx,
        )
    }
}

/// Start a live session.
///
/// ## Atomicity:
/// Resources are acquired in order, capture device first and then the
/// transport; a failure at any sub-step releases everything already
/// acquired. A
/// failed start leaves no orphaned device or connection and the session in
/// Idle (i.e. no handle exists).
pub async fn start_session(
    session_id: String,
    user_id: String,
    field: String,
    mut deps: SessionDeps,
) -> Result<SessionHandle, AppError> {
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<AudioFrame>();
    deps.capture.start(frame_tx)?;

    let (transport_tx, mut transport_rx) = mpsc::unbounded_channel::<TransportEvent>();
    if let Err(err) = deps.transport.open(transport_tx).await {
        deps.capture.stop();
        return Err(err);
    }

    deps.analyzer.start_analysis();
    info!(session_id, user_id, field, "Live session started");

    let (events_tx, events_rx) = mpsc::unbounded_channel::<SessionEvent>();

    // Forwarders funnel every producer into the single ordered event channel
    let frames_to_events = events_tx.clone();
    tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            if frames_to_events.send(SessionEvent::Frame(frame)).is_err() {
                break;
            }
        }
    });

    let transport_to_events = events_tx.clone();
    tokio::spawn(async move {
        while let Some(event) = transport_rx.recv().await {
            if transport_to_events
                .send(SessionEvent::Transport(event))
                .is_err()
            {
                break;
            }
        }
    });

    let mut playback_ended = std::mem::replace(&mut deps.playback_ended, mpsc::unbounded_channel().1);
    let ended_to_events = events_tx.clone();
    tokio::spawn(async move {
        while let Some(id) = playback_ended.recv().await {
            if ended_to_events.send(SessionEvent::PlaybackEnded(id)).is_err() {
                break;
            }
        }
    });

    let worker = SessionWorker {
        session_id: session_id.clone(),
        user_id: user_id.clone(),
        field: field.clone(),
        started_at: Utc::now(),
        state: SessionState::Streaming,
        capture: deps.capture,
        transport: deps.transport,
        scheduler: deps.scheduler,
        feedback: deps.feedback,
        store: deps.store,
        analyzer: deps.analyzer,
    };
    let created_at = worker.started_at;
    tokio::spawn(worker.run(events_rx));

    Ok(SessionHandle {
        session_id,
        user_id,
        field,
        created_at,
        events: events_tx,
    })
}

/// The single owner and writer of all session state.
struct SessionWorker {
    session_id: String,
    user_id: String,
    field: String,
    started_at: DateTime<Utc>,
    state: SessionState,
    capture: Box<dyn CaptureDevice>,
    transport: Box<dyn Transport>,
    scheduler: PlaybackScheduler,
    feedback: Arc<dyn FeedbackService>,
    store: Arc<dyn SessionStore>,
    analyzer: Arc<BehavioralAnalyzer>,
}

impl SessionWorker {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Frame(frame) => {
                    if self.state == SessionState::Streaming {
                        // Encode within this tick and hand off immediately;
                        // no batching, capture order preserved
                        self.transport.send(encode_frame(&frame));
                    }
                }
                SessionEvent::Transport(TransportEvent::Open) => {
                    debug!(session_id = %self.session_id, "Transport reported open");
                }
                SessionEvent::Transport(TransportEvent::Message(server_event)) => {
                    if self.state != SessionState::Streaming {
                        continue;
                    }
                    if let Some(blob) = server_event.audio {
                        match decode_blob(&blob, 1) {
                            Ok(mut channels) => {
                                self.scheduler.schedule(channels.remove(0));
                            }
                            Err(err) => {
                                // Drop the single message, keep the session
                                warn!(session_id = %self.session_id, "{}", err);
                            }
                        }
                    }
                    if server_event.interrupted {
                        info!(session_id = %self.session_id, "Agent barge-in, cutting playback");
                        self.scheduler.interrupt();
                    }
                }
                SessionEvent::Transport(TransportEvent::Error(message)) => {
                    error!(session_id = %self.session_id, "Transport failed: {}", message);
                    self.teardown(false).await;
                    break;
                }
                SessionEvent::Transport(TransportEvent::Closed) => {
                    info!(session_id = %self.session_id, "Agent closed the session");
                    self.teardown(false).await;
                    break;
                }
                SessionEvent::PlaybackEnded(id) => {
                    self.scheduler.on_source_ended(id);
                }
                SessionEvent::Stop { reply } => {
                    let record = self.teardown(true).await;
                    let _ = reply.send(record);
                    break;
                }
                SessionEvent::Snapshot { reply } => {
                    let _ = reply.send(SessionSnapshot {
                        session_id: self.session_id.clone(),
                        state: self.state.as_str(),
                        receiving: self.scheduler.is_receiving(),
                        live_sources: self.scheduler.live_count(),
                        started_at: self.started_at,
                    });
                }
            }
        }
    }

    /// Release every acquired resource exactly once.
    ///
    /// Remote-driven closes skip the analysis step; only an explicit stop
    /// produces a feedback record (observed product behavior, preserved).
    async fn teardown(&mut self, run_analysis: bool) -> Option<StoredSession> {
        if self.state == SessionState::Closed {
            return None;
        }
        self.state = SessionState::Closed;

        self.capture.stop();
        self.transport.close().await;
        self.scheduler.interrupt();
        self.analyzer.stop_analysis();
        info!(session_id = %self.session_id, "Session closed");

        if !run_analysis {
            return None;
        }

        match self.feedback.analyze_transcript(PLACEHOLDER_TRANSCRIPT).await {
            Ok(feedback) => match self.store.save_session(&self.user_id, &self.field, feedback) {
                Ok(record) => Some(record),
                Err(err) => {
                    error!(session_id = %self.session_id, "Could not save session: {}", err);
                    None
                }
            },
            Err(err) => {
                error!(session_id = %self.session_id, "Transcript analysis failed: {}", err);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::{EncodedBlob, CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE};
    use crate::audio::playback::PlaybackSink;
    use crate::coaching::feedback::CannedFeedback;
    use crate::coaching::InterviewFeedback;
    use crate::error::AppResult;
    use crate::transport::ServerEvent;
    use async_trait::async_trait;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Capture stub that records lifecycle calls and can be told to fail.
    struct ScriptedCapture {
        fail: bool,
        started: Arc<AtomicBool>,
        stopped: Arc<AtomicBool>,
    }

    impl CaptureDevice for ScriptedCapture {
        fn start(&mut self, _frames: mpsc::UnboundedSender<AudioFrame>) -> Result<(), AppError> {
            if self.fail {
                return Err(AppError::Device("microphone permission denied".to_string()));
            }
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    /// Transport stub recording sent blobs and open/close calls.
    struct RecordingTransport {
        opened: Arc<AtomicBool>,
        closed: Arc<AtomicBool>,
        sent: Arc<Mutex<Vec<EncodedBlob>>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn open(
            &mut self,
            _events: mpsc::UnboundedSender<TransportEvent>,
        ) -> Result<(), AppError> {
            self.opened.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn send(&self, blob: EncodedBlob) {
            self.sent.lock().unwrap().push(blob);
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Sink with a fixed clock; completions are driven by the tests.
    #[derive(Clone)]
    struct ManualSink {
        stopped: Arc<Mutex<Vec<SourceId>>>,
    }

    impl PlaybackSink for ManualSink {
        fn now(&self) -> f64 {
            0.0
        }
        fn schedule(&mut self, _id: SourceId, _samples: Vec<f32>, _start: f64) {}
        fn stop(&mut self, id: SourceId) {
            self.stopped.lock().unwrap().push(id);
        }
    }

    struct MemoryStore {
        saved: Mutex<Vec<StoredSession>>,
    }

    impl SessionStore for MemoryStore {
        fn save_session(
            &self,
            user_id: &str,
            field: &str,
            feedback: InterviewFeedback,
        ) -> AppResult<StoredSession> {
            let record = StoredSession {
                id: uuid::Uuid::new_v4(),
                user_id: user_id.to_string(),
                date: Utc::now(),
                field: field.to_string(),
                feedback,
            };
            self.saved.lock().unwrap().push(record.clone());
            Ok(record)
        }

        fn get_history(&self, user_id: &str) -> AppResult<Vec<StoredSession>> {
            Ok(self
                .saved
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.user_id == user_id)
                .cloned()
                .collect())
        }
    }

    struct Fixture {
        capture_started: Arc<AtomicBool>,
        capture_stopped: Arc<AtomicBool>,
        transport_opened: Arc<AtomicBool>,
        transport_closed: Arc<AtomicBool>,
        sent: Arc<Mutex<Vec<EncodedBlob>>>,
        sink_stopped: Arc<Mutex<Vec<SourceId>>>,
        store: Arc<MemoryStore>,
        analyzer: Arc<BehavioralAnalyzer>,
        deps: SessionDeps,
    }

    fn fixture(fail_capture: bool) -> Fixture {
        let capture_started = Arc::new(AtomicBool::new(false));
        let capture_stopped = Arc::new(AtomicBool::new(false));
        let transport_opened = Arc::new(AtomicBool::new(false));
        let transport_closed = Arc::new(AtomicBool::new(false));
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink_stopped = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::new(MemoryStore {
            saved: Mutex::new(Vec::new()),
        });
        let analyzer = Arc::new(BehavioralAnalyzer::new());

        let deps = SessionDeps {
            capture: Box::new(ScriptedCapture {
                fail: fail_capture,
                started: capture_started.clone(),
                stopped: capture_stopped.clone(),
            }),
            transport: Box::new(RecordingTransport {
                opened: transport_opened.clone(),
                closed: transport_closed.clone(),
                sent: sent.clone(),
            }),
            scheduler: PlaybackScheduler::new(
                Box::new(ManualSink {
                    stopped: sink_stopped.clone(),
                }),
                PLAYBACK_SAMPLE_RATE,
            ),
            playback_ended: mpsc::unbounded_channel().1,
            feedback: Arc::new(CannedFeedback),
            store: store.clone(),
            analyzer: analyzer.clone(),
        };

        Fixture {
            capture_started,
            capture_stopped,
            transport_opened,
            transport_closed,
            sent,
            sink_stopped,
            store,
            analyzer,
            deps,
        }
    }

    fn audio_message(seconds: f64) -> ServerEvent {
        let sample_count = (seconds * PLAYBACK_SAMPLE_RATE as f64) as usize;
        let bytes: Vec<u8> = std::iter::repeat([0x00, 0x10])
            .take(sample_count)
            .flatten()
            .collect();
        ServerEvent {
            audio: Some(EncodedBlob {
                data: BASE64.encode(bytes),
                mime_type: format!("audio/pcm;rate={}", PLAYBACK_SAMPLE_RATE),
            }),
            interrupted: false,
        }
    }

    #[tokio::test]
    async fn test_failed_capture_leaves_idle_and_no_transport() {
        let fx = fixture(true);
        let result = start_session(
            "s1".to_string(),
            "alice".to_string(),
            "Software Engineering".to_string(),
            fx.deps,
        )
        .await;

        assert!(matches!(result, Err(AppError::Device(_))));
        // The transport was never opened and nothing needs cleanup
        assert!(!fx.transport_opened.load(Ordering::SeqCst));
        assert!(!fx.capture_started.load(Ordering::SeqCst));
        assert!(!fx.analyzer.is_analyzing());
    }

    #[tokio::test]
    async fn test_capture_frames_reach_transport_in_fifo_order() {
        let fx = fixture(false);
        let handle = start_session(
            "s1".to_string(),
            "alice".to_string(),
            "Software Engineering".to_string(),
            fx.deps,
        )
        .await
        .unwrap();

        // Distinguishable frames, pushed in capture order
        for amplitude in [0.1f32, 0.2, 0.3, 0.4] {
            handle
                .events
                .send(SessionEvent::Frame(AudioFrame::new(
                    vec![amplitude; 8],
                    CAPTURE_SAMPLE_RATE,
                )))
                .unwrap();
        }
        // The snapshot reply proves every earlier event was processed
        let snapshot = handle.snapshot().await;
        assert_eq!(snapshot.state, "streaming");

        let sent = fx.sent.lock().unwrap();
        assert_eq!(sent.len(), 4);
        let expected: Vec<EncodedBlob> = [0.1f32, 0.2, 0.3, 0.4]
            .iter()
            .map(|&a| encode_frame(&AudioFrame::new(vec![a; 8], CAPTURE_SAMPLE_RATE)))
            .collect();
        assert_eq!(*sent, expected);
    }

    #[tokio::test]
    async fn test_interruption_clears_playback_and_resets_cursor() {
        let fx = fixture(false);
        let handle = start_session(
            "s1".to_string(),
            "alice".to_string(),
            "AI & ML".to_string(),
            fx.deps,
        )
        .await
        .unwrap();

        // One second of agent audio arrives, then barge-in before it finishes
        handle
            .events
            .send(SessionEvent::Transport(TransportEvent::Message(
                audio_message(1.0),
            )))
            .unwrap();
        let snapshot = handle.snapshot().await;
        assert!(snapshot.receiving);
        assert_eq!(snapshot.live_sources, 1);

        handle
            .events
            .send(SessionEvent::Transport(TransportEvent::Message(ServerEvent {
                audio: None,
                interrupted: true,
            })))
            .unwrap();
        let snapshot = handle.snapshot().await;
        assert!(!snapshot.receiving);
        assert_eq!(snapshot.live_sources, 0);
        assert_eq!(fx.sink_stopped.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_explicit_stop_releases_everything_and_saves_feedback() {
        let fx = fixture(false);
        let handle = start_session(
            "s1".to_string(),
            "alice".to_string(),
            "Data Science".to_string(),
            fx.deps,
        )
        .await
        .unwrap();
        assert!(fx.analyzer.is_analyzing());

        let record = handle.stop().await.expect("feedback record");
        assert_eq!(record.user_id, "alice");
        assert_eq!(record.field, "Data Science");
        assert!(fx.capture_stopped.load(Ordering::SeqCst));
        assert!(fx.transport_closed.load(Ordering::SeqCst));
        assert!(!fx.analyzer.is_analyzing());
        assert_eq!(fx.store.get_history("alice").unwrap().len(), 1);

        // Second stop: worker is gone, no error, nothing saved twice
        assert!(handle.stop().await.is_none());
        assert_eq!(fx.store.get_history("alice").unwrap().len(), 1);
        assert_eq!(handle.snapshot().await.state, "closed");
    }

    #[tokio::test]
    async fn test_remote_close_tears_down_without_analysis() {
        let fx = fixture(false);
        let handle = start_session(
            "s1".to_string(),
            "alice".to_string(),
            "Product Management".to_string(),
            fx.deps,
        )
        .await
        .unwrap();

        handle
            .events
            .send(SessionEvent::Transport(TransportEvent::Closed))
            .unwrap();

        // Worker exits; handle reports closed
        let snapshot = handle.snapshot().await;
        assert_eq!(snapshot.state, "closed");
        assert!(handle.is_closed());
        assert!(fx.capture_stopped.load(Ordering::SeqCst));
        // Only explicit stop triggers post-session analysis
        assert!(fx.store.get_history("alice").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_is_fatal_like_remote_close() {
        let fx = fixture(false);
        let handle = start_session(
            "s1".to_string(),
            "bob".to_string(),
            "Cloud & DevOps".to_string(),
            fx.deps,
        )
        .await
        .unwrap();

        handle
            .events
            .send(SessionEvent::Transport(TransportEvent::Error(
                "socket reset".to_string(),
            )))
            .unwrap();

        assert_eq!(handle.snapshot().await.state, "closed");
        assert!(fx.transport_closed.load(Ordering::SeqCst));
        assert!(fx.store.get_history("bob").unwrap().is_empty());
    }
}
