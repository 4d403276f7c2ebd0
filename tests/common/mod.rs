//! Shared test utilities
//!
//! Fake collaborators that record what the microphone was asked to do, and
//! a harness that runs a full `VoiceService` on top of them.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use voicegate::voice::{
    AssistantReply, CaptureError, CaptureFormat, EngineError, PlaybackError, Player, Recorder,
    RecorderEvent, RecordingStore, StaticPermission, UploadError, Uploader, WakeWordEngine,
};
use voicegate::{
    ArbiterConfig, Collaborators, ConversationOrchestrator, EventBus, LifecycleEvent,
    MicrophoneArbiter, PressPatternDetector, SignalSender, SilenceGate, VoiceEvent, VoiceService,
    signal,
};

/// Something done to the microphone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicAction {
    ListenerStart,
    ListenerStop,
    RecorderStart,
    RecorderStop,
}

/// Time-stamped log of microphone actions shared by the fakes
#[derive(Debug, Clone, Default)]
pub struct MicLog(Arc<Mutex<Vec<(Instant, MicAction)>>>);

impl MicLog {
    pub fn push(&self, action: MicAction) {
        self.0.lock().unwrap().push((Instant::now(), action));
    }

    pub fn entries(&self) -> Vec<(Instant, MicAction)> {
        self.0.lock().unwrap().clone()
    }

    pub fn actions(&self) -> Vec<MicAction> {
        self.entries().into_iter().map(|(_, a)| a).collect()
    }

    pub fn count(&self, action: MicAction) -> usize {
        self.entries().iter().filter(|(_, a)| *a == action).count()
    }

    pub fn last(&self, action: MicAction) -> Option<Instant> {
        self.entries()
            .into_iter()
            .rev()
            .find(|(_, a)| *a == action)
            .map(|(t, _)| t)
    }

    /// Never both active, and every handover leaves the microphone idle for `settle`
    pub fn assert_exclusive(&self, settle: Duration) {
        let mut listener = false;
        let mut recorder = false;
        let mut released: Option<Instant> = None;

        for (at, action) in self.entries() {
            match action {
                MicAction::ListenerStart | MicAction::RecorderStart => {
                    assert!(!listener && !recorder, "{action:?} while the microphone is held");
                    if let Some(released) = released {
                        assert!(
                            at - released >= settle,
                            "{action:?} only {:?} after release",
                            at - released
                        );
                    }
                    if action == MicAction::ListenerStart {
                        listener = true;
                    } else {
                        recorder = true;
                    }
                }
                MicAction::ListenerStop => {
                    listener = false;
                    released = Some(at);
                }
                MicAction::RecorderStop => {
                    recorder = false;
                    released = Some(at);
                }
            }
        }
    }
}

/// Wake word engine that only logs
pub struct FakeEngine {
    log: MicLog,
    running: bool,
    fail_start: bool,
}

impl FakeEngine {
    pub fn new(log: MicLog, fail_start: bool) -> Self {
        Self {
            log,
            running: false,
            fail_start,
        }
    }
}

impl WakeWordEngine for FakeEngine {
    fn start(&mut self) -> Result<(), EngineError> {
        if self.fail_start {
            return Err(EngineError::NoInputDevice);
        }
        self.running = true;
        self.log.push(MicAction::ListenerStart);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        if !self.running {
            return Err(EngineError::NotRunning);
        }
        self.running = false;
        self.log.push(MicAction::ListenerStop);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

/// Recorder that writes a fixed-size file on stop
///
/// `finish` and `fail` end the recording without a stop request, the way a
/// capture thread does when the device or the disk gives out.
pub struct FakeRecorder {
    log: MicLog,
    signals: SignalSender,
    current: Mutex<Option<PathBuf>>,
    bytes: usize,
}

impl FakeRecorder {
    /// `bytes` of zero produce an empty recording
    pub fn new(log: MicLog, signals: SignalSender, bytes: usize) -> Self {
        Self {
            log,
            signals,
            current: Mutex::new(None),
            bytes,
        }
    }

    /// End the recording on the recorder's own initiative
    pub fn finish(&self) {
        match self.finalize() {
            Ok(()) | Err(CaptureError::NotRecording) => {}
            Err(e) => {
                self.signals.recorder(RecorderEvent::Failed(e));
            }
        }
    }

    /// Abort the recording as if the disk filled up
    pub fn fail(&self) {
        if self.current.lock().unwrap().take().is_some() {
            self.log.push(MicAction::RecorderStop);
            self.signals
                .recorder(RecorderEvent::Failed(CaptureError::StorageExhausted));
        }
    }

    fn finalize(&self) -> Result<(), CaptureError> {
        let path = self
            .current
            .lock()
            .unwrap()
            .take()
            .ok_or(CaptureError::NotRecording)?;
        self.log.push(MicAction::RecorderStop);

        std::fs::write(&path, vec![0u8; self.bytes]).map_err(CaptureError::Io)?;
        self.signals.recorder(RecorderEvent::Finished {
            path,
            duration_ms: if self.bytes == 0 { 0 } else { 1_000 },
            size_bytes: self.bytes as u64,
        });
        Ok(())
    }
}

impl Recorder for FakeRecorder {
    fn start(&self, path: &Path, _format: CaptureFormat) -> Result<(), CaptureError> {
        let mut current = self.current.lock().unwrap();
        if current.is_some() {
            return Err(CaptureError::AlreadyRecording);
        }
        *current = Some(path.to_path_buf());
        self.log.push(MicAction::RecorderStart);
        self.signals.recorder(RecorderEvent::Started {
            path: path.to_path_buf(),
        });
        Ok(())
    }

    fn stop(&self) -> Result<(), CaptureError> {
        self.finalize()
    }

    fn pause(&self) -> Result<(), CaptureError> {
        self.signals.recorder(RecorderEvent::Paused);
        Ok(())
    }

    fn resume(&self) -> Result<(), CaptureError> {
        self.signals.recorder(RecorderEvent::Resumed);
        Ok(())
    }

    fn is_recording(&self) -> bool {
        self.current.lock().unwrap().is_some()
    }
}

/// What the fake assistant answers
#[derive(Debug, Clone, Copy)]
pub enum Scripted {
    Reply { continue_conversation: bool },
    Status(u16),
}

/// Uploader answering from a script
pub struct FakeUploader {
    script: Mutex<VecDeque<Scripted>>,
    reply_dir: PathBuf,
    delay: Duration,
    pub uploads: Mutex<Vec<PathBuf>>,
    pub finished_at: Mutex<Option<Instant>>,
}

impl FakeUploader {
    pub fn new(script: Vec<Scripted>, reply_dir: PathBuf, delay: Duration) -> Self {
        Self {
            script: Mutex::new(script.into()),
            reply_dir,
            delay,
            uploads: Mutex::new(Vec::new()),
            finished_at: Mutex::new(None),
        }
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

#[async_trait]
impl Uploader for FakeUploader {
    async fn upload(&self, file: &Path) -> Result<AssistantReply, UploadError> {
        self.uploads.lock().unwrap().push(file.to_path_buf());
        tokio::time::sleep(self.delay).await;

        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Scripted::Reply {
                continue_conversation: false,
            });
        *self.finished_at.lock().unwrap() = Some(Instant::now());

        match next {
            Scripted::Reply {
                continue_conversation,
            } => {
                let mut audio = tempfile::Builder::new()
                    .suffix(".mp3")
                    .tempfile_in(&self.reply_dir)
                    .map_err(UploadError::SaveReply)?;
                std::io::Write::write_all(&mut audio, b"ID3 fake reply").map_err(UploadError::SaveReply)?;

                Ok(AssistantReply {
                    transcription: Some("what is next".to_string()),
                    response_text: Some("call the dentist".to_string()),
                    continue_conversation,
                    audio: audio.into_temp_path(),
                })
            }
            Scripted::Status(code) => Err(UploadError::Status { code }),
        }
    }
}

/// Player that waits a fixed time
pub struct FakePlayer {
    duration: Duration,
    fail: bool,
    pub played: Mutex<Vec<PathBuf>>,
    pub stops: AtomicUsize,
    pub playing: AtomicBool,
}

impl FakePlayer {
    pub fn new(duration: Duration, fail: bool) -> Self {
        Self {
            duration,
            fail,
            played: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
            playing: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Player for FakePlayer {
    async fn play(&self, path: &Path) -> Result<(), PlaybackError> {
        assert!(path.exists(), "reply audio must exist while it plays");
        self.played.lock().unwrap().push(path.to_path_buf());
        self.playing.store(true, Ordering::SeqCst);
        tokio::time::sleep(self.duration).await;
        self.playing.store(false, Ordering::SeqCst);

        if self.fail {
            return Err(PlaybackError::Decode("corrupt reply".to_string()));
        }
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.playing.store(false, Ordering::SeqCst);
    }
}

/// Knobs for a harness run
pub struct Options {
    pub permitted: bool,
    pub engine_fails: bool,
    pub recording_bytes: usize,
    pub script: Vec<Scripted>,
    pub upload_delay: Duration,
    pub playback: Duration,
    pub playback_fails: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            permitted: true,
            engine_fails: false,
            recording_bytes: 4_096,
            script: Vec::new(),
            upload_delay: Duration::from_millis(500),
            playback: Duration::from_secs(1),
            playback_fails: false,
        }
    }
}

/// A running service on fakes
pub struct Harness {
    pub signals: SignalSender,
    pub events: broadcast::Receiver<LifecycleEvent>,
    pub log: MicLog,
    pub recorder: Arc<FakeRecorder>,
    pub uploader: Arc<FakeUploader>,
    pub player: Arc<FakePlayer>,
    pub service: JoinHandle<voicegate::Result<()>>,
    pub dir: TempDir,
}

impl Harness {
    pub fn start(options: Options) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let replies = dir.path().join("replies");
        std::fs::create_dir_all(&replies).expect("failed to create reply dir");

        let events = EventBus::new();
        let rx = events.subscribe();
        let (signals, inbox) = signal::channel();
        let log = MicLog::default();

        let engine = FakeEngine::new(log.clone(), options.engine_fails);
        let recorder = Arc::new(FakeRecorder::new(
            log.clone(),
            signals.clone(),
            options.recording_bytes,
        ));
        let arbiter = MicrophoneArbiter::new(
            Box::new(engine),
            Arc::clone(&recorder) as Arc<dyn Recorder>,
            ArbiterConfig::default(),
            events.clone(),
        );

        let uploader = Arc::new(FakeUploader::new(options.script, replies, options.upload_delay));
        let player = Arc::new(FakePlayer::new(options.playback, options.playback_fails));
        let collaborators = Collaborators {
            uploader: Arc::clone(&uploader) as Arc<dyn Uploader>,
            player: Arc::clone(&player) as Arc<dyn Player>,
            permission: Box::new(StaticPermission(options.permitted)),
        };

        let orchestrator = ConversationOrchestrator::new(
            arbiter,
            collaborators,
            RecordingStore::new(dir.path().join("recordings")),
            CaptureFormat::default(),
            signals.clone(),
            events.clone(),
        );
        let service = VoiceService::new(
            orchestrator,
            SilenceGate::default(),
            PressPatternDetector::default(),
            events,
            inbox,
        );

        Self {
            signals,
            events: rx,
            log,
            recorder,
            uploader,
            player,
            service: tokio::spawn(service.run()),
            dir,
        }
    }

    /// Wait for the first event matching `pred`, returning it
    pub async fn wait_for<F>(&mut self, pred: F) -> VoiceEvent
    where
        F: Fn(&VoiceEvent) -> bool,
    {
        let deadline = Duration::from_secs(120);
        tokio::time::timeout(deadline, async {
            loop {
                let event = self.events.recv().await.expect("event bus closed").event;
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    /// Wait for the turn to reach `state`
    pub async fn wait_state(&mut self, state: voicegate::TurnState) -> u64 {
        match self
            .wait_for(|e| matches!(e, VoiceEvent::TurnStateChanged { state: s, .. } if *s == state))
            .await
        {
            VoiceEvent::TurnStateChanged { turn, .. } => turn,
            _ => unreachable!(),
        }
    }

    /// Events already published, without waiting
    pub fn drain(&mut self) -> Vec<VoiceEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event.event);
        }
        out
    }

    /// Stop the service and wait for it
    pub async fn shutdown(self) -> (voicegate::Result<()>, MicLog) {
        self.signals.shutdown();
        let result = self.service.await.expect("service task panicked");
        (result, self.log)
    }
}

/// Send progress at `amplitude` every 100ms for `duration`
pub async fn feed_amplitude(signals: SignalSender, amplitude: u16, duration: Duration) {
    let mut elapsed_ms = 0;
    while elapsed_ms < duration.as_millis() as u64 {
        signals.recorder(RecorderEvent::Progress {
            elapsed_ms,
            amplitude,
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        elapsed_ms += 100;
    }
}
