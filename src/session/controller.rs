use std::{sync::Arc, time::Duration};

use chrono::Utc;
use log::info;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::SessionError,
    feedback::{AudioPlayer, FeedbackDispatcher, MessagePicker},
    history::HistoryStore,
    inference::{ClassifierAdapter, PostureModel, SessionSummarizer, SpeechSynthesizer},
    models::SessionRecord,
    sensing::{FrameSource, Sampler},
    settings::CoachSettings,
};

use super::{
    aggregator::Aggregator,
    events::SessionEvent,
    state::{SessionPhase, SessionSnapshot, SessionState},
    tracker::Transition,
};

// Set to false to silence per-pass logging
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info};

const EVENT_CAPACITY: usize = 64;

/// External collaborators the controller drives.
#[derive(Clone)]
pub struct Collaborators {
    pub frames: Arc<dyn FrameSource>,
    pub posture: Arc<dyn PostureModel>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub player: Arc<dyn AudioPlayer>,
    pub summarizer: Arc<dyn SessionSummarizer>,
}

/// How one analysis pass ended when it did not abort the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Recorded(Transition),
    /// Another pass is still waiting on the classifier.
    Busy,
    NoSample,
    /// The session ended (or never was active) before the pass could apply.
    Stale,
}

struct SessionTimers {
    generation: u64,
    cancel: CancellationToken,
    ticker: JoinHandle<()>,
    analysis: JoinHandle<()>,
}

#[derive(Clone)]
pub struct SessionController {
    state: Arc<Mutex<SessionState>>,
    timers: Arc<Mutex<Option<SessionTimers>>>,
    sampler: Sampler,
    classifier: ClassifierAdapter,
    feedback: Option<FeedbackDispatcher>,
    aggregator: Aggregator,
    history: HistoryStore,
    events: broadcast::Sender<SessionEvent>,
    tick_interval: Duration,
    analysis_interval: Duration,
}

impl SessionController {
    pub fn new(
        collaborators: Collaborators,
        history: HistoryStore,
        settings: &CoachSettings,
        picker: MessagePicker,
    ) -> Self {
        let feedback = settings.feedback_enabled.then(|| {
            FeedbackDispatcher::new(
                collaborators.speech.clone(),
                collaborators.player.clone(),
                picker,
            )
        });
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            state: Arc::new(Mutex::new(SessionState::new())),
            timers: Arc::new(Mutex::new(None)),
            sampler: Sampler::new(collaborators.frames, settings.capture_timeout()),
            classifier: ClassifierAdapter::new(collaborators.posture),
            feedback,
            aggregator: Aggregator::new(collaborators.summarizer, settings.request_timeout()),
            history,
            events,
            tick_interval: settings.elapsed_tick(),
            analysis_interval: settings.analysis_interval(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.state.lock().await.snapshot()
    }

    /// Starts a session and runs the first analysis pass before returning.
    ///
    /// Fails with `AlreadyActive` unless the controller is idle, and with
    /// `AnalysisFailed` if that first pass already loses the classifier.
    pub async fn start(&self) -> Result<SessionSnapshot, SessionError> {
        let generation = {
            let mut state = self.state.lock().await;
            if state.phase != SessionPhase::Inactive {
                return Err(SessionError::AlreadyActive);
            }
            state.begin(Utc::now())
        };

        self.spawn_timers(generation).await;

        {
            let mut state = self.state.lock().await;
            state.phase = SessionPhase::Active;
        }
        info!(
            "Focus session started (analysis every {}s)",
            self.analysis_interval.as_secs()
        );
        self.emit_state_changed().await;

        self.run_analysis_pass(generation).await?;

        Ok(self.snapshot().await)
    }

    /// Ends the active session and returns its record. A no-op returning
    /// `Ok(None)` when no session is active, or when `shutdown` abandoned the
    /// session before its aggregation finished.
    pub async fn stop(&self) -> Result<Option<SessionRecord>, SessionError> {
        let (generation, log, started_at) = {
            let mut state = self.state.lock().await;
            if state.phase != SessionPhase::Active {
                return Ok(None);
            }
            state.phase = SessionPhase::Stopping;
            (
                state.generation,
                state.tracker.take_log(),
                state.started_at.unwrap_or_else(Utc::now),
            )
        };

        self.cancel_timers(Some(generation), true).await;
        self.emit_state_changed().await;
        info!("Focus session stopping with {} sample(s)", log.len());

        // Run aggregation on its own task so a panicking collaborator ends up
        // as an aggregation failure instead of unwinding through the caller.
        let aggregator = self.aggregator.clone();
        let outcome = tokio::spawn(async move { aggregator.aggregate(&log).await }).await;

        match outcome {
            Ok(aggregation) => {
                let record = SessionRecord {
                    id: started_at.timestamp_millis(),
                    date: Utc::now(),
                    duration_minutes: aggregation.duration_minutes,
                    focus_percentage: aggregation.focus_percentage,
                    summary: aggregation.insights.summary,
                    tip: aggregation.insights.tip,
                    highlight_frames: aggregation.highlight_frames,
                };

                {
                    // `shutdown` may have abandoned this session while it was
                    // aggregating, and a newer one may already be running. The
                    // lock is held across the write so neither can slip in.
                    let mut state = self.state.lock().await;
                    if state.generation != generation {
                        info!("Session was abandoned during aggregation; discarding its record");
                        return Ok(None);
                    }
                    self.history.add(record.clone()).await;
                    state.finish();
                    state.last_record = Some(record.clone());
                }
                info!(
                    "Focus session complete: {} min, {:.0}% focused",
                    record.duration_minutes, record.focus_percentage
                );
                self.emit_state_changed().await;
                self.emit(SessionEvent::SessionCompleted {
                    record: record.clone(),
                });
                Ok(Some(record))
            }
            Err(join_err) => {
                let err = SessionError::AggregationFailed(join_err.to_string());
                log_error!("Session aggregation failed: {join_err}");
                {
                    let mut state = self.state.lock().await;
                    if state.generation != generation {
                        return Ok(None);
                    }
                    state.finish();
                    state.last_error = Some(err.to_string());
                }
                self.emit_state_changed().await;
                self.emit(SessionEvent::SessionFailed {
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Process teardown: cancels timers and abandons any running or stopping
    /// session without recording it.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock().await;
            if state.phase != SessionPhase::Inactive {
                info!("Abandoning {:?} session on shutdown", state.phase);
                state.finish();
            }
        }
        self.cancel_timers(None, true).await;
    }

    /// One sample → classify → track cycle.
    ///
    /// Capture misses and overlapping or stale passes are silent. A classifier
    /// failure ends the session and is returned as `AnalysisFailed`.
    pub async fn run_analysis_pass(&self, generation: u64) -> Result<PassOutcome, SessionError> {
        let _guard = {
            let state = self.state.lock().await;
            if !state.is_live(generation) {
                return Ok(PassOutcome::Stale);
            }
            match state.try_begin_pass() {
                Some(guard) => guard,
                None => {
                    log_debug!("Previous analysis pass still in flight; skipping tick");
                    return Ok(PassOutcome::Busy);
                }
            }
        };

        let Some(frame) = self.sampler.sample().await else {
            return Ok(PassOutcome::NoSample);
        };

        let classification = self.classifier.classify(&frame).await;

        let mut state = self.state.lock().await;
        if !state.is_live(generation) {
            log_debug!("Session ended while classifying; dropping result");
            return Ok(PassOutcome::Stale);
        }

        match classification {
            Ok(status) => {
                let step = state.tracker.record(Utc::now(), status, frame);
                let samples = state.tracker.log().len();
                drop(state);

                log_info!("Sample {samples}: {status}");
                if step.negative_edge {
                    if let Some(feedback) = &self.feedback {
                        // Detached; the pass never waits on feedback.
                        drop(feedback.dispatch());
                    }
                }
                if step.changed() {
                    self.emit_state_changed().await;
                }
                Ok(PassOutcome::Recorded(step))
            }
            Err(err) => {
                log_error!("Analysis failed: {err}");
                let session_err = SessionError::AnalysisFailed(err.to_string());
                state.finish();
                state.last_error = Some(session_err.to_string());
                drop(state);

                // Possibly running on the analysis task itself, so only cancel.
                self.cancel_timers(Some(generation), false).await;
                self.emit_state_changed().await;
                self.emit(SessionEvent::SessionFailed {
                    message: session_err.to_string(),
                });
                Err(session_err)
            }
        }
    }

    async fn spawn_timers(&self, generation: u64) {
        let mut timers = self.timers.lock().await;
        if let Some(old) = timers.take() {
            old.cancel.cancel();
            old.ticker.abort();
            old.analysis.abort();
        }

        let cancel = CancellationToken::new();
        let ticker = tokio::spawn(self.clone().elapsed_loop(generation, cancel.clone()));
        let analysis = tokio::spawn(self.clone().analysis_loop(generation, cancel.clone()));

        *timers = Some(SessionTimers {
            generation,
            cancel,
            ticker,
            analysis,
        });
    }

    /// Cancels both schedules, or only those of `generation` when given, so a
    /// late caller from an ended session leaves a newer session's timers alone.
    /// `abort_tasks` is false when called from code that may itself be running
    /// on one of the timer tasks.
    async fn cancel_timers(&self, generation: Option<u64>, abort_tasks: bool) {
        let mut slot = self.timers.lock().await;
        let owned = match (slot.as_ref(), generation) {
            (Some(timers), Some(generation)) => timers.generation == generation,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !owned {
            return;
        }
        if let Some(timers) = slot.take() {
            timers.cancel.cancel();
            if abort_tasks {
                timers.ticker.abort();
                timers.analysis.abort();
            }
        }
    }

    async fn elapsed_loop(self, generation: u64, cancel: CancellationToken) {
        let mut interval = time::interval_at(Instant::now() + self.tick_interval, self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let elapsed_secs = {
                        let mut state = self.state.lock().await;
                        if !state.is_live(generation) {
                            break;
                        }
                        state.elapsed_secs += self.tick_interval.as_secs();
                        state.elapsed_secs
                    };
                    self.emit(SessionEvent::Tick { elapsed_secs });
                }
                _ = cancel.cancelled() => break,
            }
        }
    }

    /// Fires at a fixed period regardless of how long passes take; the pass
    /// gate drops ticks that arrive while the previous pass is still running.
    async fn analysis_loop(self, generation: u64, cancel: CancellationToken) {
        let mut interval =
            time::interval_at(Instant::now() + self.analysis_interval, self.analysis_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if !self.state.lock().await.is_live(generation) {
                        break;
                    }
                    let controller = self.clone();
                    tokio::spawn(async move {
                        // Failures are reported through state and events.
                        let _ = controller.run_analysis_pass(generation).await;
                    });
                }
                _ = cancel.cancelled() => {
                    log_debug!("Analysis schedule cancelled");
                    break;
                }
            }
        }
    }

    async fn emit_state_changed(&self) {
        let (phase, status) = {
            let state = self.state.lock().await;
            (state.phase, state.tracker.current())
        };
        self.emit(SessionEvent::StateChanged { phase, status });
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::{InferenceError, PlaybackError},
        history::{MemoryHistoryBlob, MAX_HISTORY},
        inference::SessionFacts,
        models::{AttentivenessState, AudioClip, Frame},
    };
    use anyhow::Result;
    use async_trait::async_trait;
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex as StdMutex,
        },
    };

    /// Returns a frame unless the next scripted slot says otherwise.
    #[derive(Default)]
    struct ScriptedFrames {
        misses: StdMutex<VecDeque<bool>>,
    }

    #[async_trait]
    impl FrameSource for ScriptedFrames {
        async fn capture(&self) -> Result<Option<Frame>> {
            let miss = self.misses.lock().unwrap().pop_front().unwrap_or(false);
            Ok((!miss).then(|| Frame::jpeg(vec![7; 16])))
        }
    }

    enum Reply {
        Says(&'static str),
        Slow(&'static str, u64),
        Fails,
    }

    struct ScriptedPosture {
        replies: StdMutex<VecDeque<Reply>>,
        calls: AtomicUsize,
    }

    impl ScriptedPosture {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: StdMutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PostureModel for ScriptedPosture {
        async fn describe_posture(&self, _frame: &Frame) -> Result<String, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Reply::Says("FOCUSED"));
            match reply {
                Reply::Says(text) => Ok(text.to_string()),
                Reply::Slow(text, secs) => {
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                    Ok(text.to_string())
                }
                Reply::Fails => Err(InferenceError::Status {
                    status: 500,
                    body: "internal".into(),
                }),
            }
        }
    }

    #[derive(Default)]
    struct CountingSpeech {
        calls: AtomicUsize,
        /// Never answers, like a synthesis request stuck on the network.
        hang: bool,
    }

    #[async_trait]
    impl SpeechSynthesizer for CountingSpeech {
        async fn synthesize(&self, _text: &str) -> Result<AudioClip, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(AudioClip::new(vec![0, 0]))
        }
    }

    struct SilentPlayer;

    #[async_trait]
    impl AudioPlayer for SilentPlayer {
        async fn play(&self, _clip: AudioClip) -> Result<(), PlaybackError> {
            Ok(())
        }
    }

    struct FixedSummarizer(&'static str);

    #[async_trait]
    impl SessionSummarizer for FixedSummarizer {
        async fn summarize(&self, _facts: &SessionFacts) -> Result<String, InferenceError> {
            Ok(self.0.to_string())
        }
    }

    struct SlowSummarizer(u64);

    #[async_trait]
    impl SessionSummarizer for SlowSummarizer {
        async fn summarize(&self, _facts: &SessionFacts) -> Result<String, InferenceError> {
            tokio::time::sleep(Duration::from_secs(self.0)).await;
            Ok(r#"{"summary":"Late.","tip":"Later."}"#.to_string())
        }
    }

    struct PanickingSummarizer;

    #[async_trait]
    impl SessionSummarizer for PanickingSummarizer {
        async fn summarize(&self, _facts: &SessionFacts) -> Result<String, InferenceError> {
            panic!("summarizer exploded");
        }
    }

    struct Harness {
        controller: SessionController,
        frames: Arc<ScriptedFrames>,
        posture: Arc<ScriptedPosture>,
        speech: Arc<CountingSpeech>,
        blob: Arc<MemoryHistoryBlob>,
    }

    async fn harness_with(
        replies: Vec<Reply>,
        summarizer: Arc<dyn SessionSummarizer>,
    ) -> Harness {
        harness_full(replies, summarizer, Arc::new(CountingSpeech::default())).await
    }

    async fn harness_full(
        replies: Vec<Reply>,
        summarizer: Arc<dyn SessionSummarizer>,
        speech: Arc<CountingSpeech>,
    ) -> Harness {
        let frames = Arc::new(ScriptedFrames::default());
        let posture = ScriptedPosture::new(replies);
        let blob = Arc::new(MemoryHistoryBlob::default());
        let history = HistoryStore::load(blob.clone(), MAX_HISTORY).await;

        let controller = SessionController::new(
            Collaborators {
                frames: frames.clone(),
                posture: posture.clone(),
                speech: speech.clone(),
                player: Arc::new(SilentPlayer),
                summarizer,
            },
            history,
            &CoachSettings::default(),
            MessagePicker::seeded(11),
        );

        Harness {
            controller,
            frames,
            posture,
            speech,
            blob,
        }
    }

    async fn harness(replies: Vec<Reply>) -> Harness {
        harness_with(
            replies,
            Arc::new(FixedSummarizer(r#"{"summary":"Well done.","tip":"Take breaks."}"#)),
        )
        .await
    }

    /// Lets the analysis schedule fire `passes` more times.
    async fn run_passes(passes: u64) {
        tokio::time::sleep(Duration::from_secs(8 * passes) + Duration::from_millis(100)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_runs_first_pass_immediately() {
        let h = harness(vec![Reply::Says("FOCUSED")]).await;

        let snapshot = h.controller.start().await.unwrap();

        assert_eq!(snapshot.phase, SessionPhase::Active);
        assert_eq!(snapshot.status, AttentivenessState::Focused);
        assert_eq!(snapshot.samples, 1);
        h.controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn starting_twice_is_rejected() {
        let h = harness(vec![]).await;
        h.controller.start().await.unwrap();

        assert_eq!(h.controller.start().await.unwrap_err(), SessionError::AlreadyActive);
        h.controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_without_session_is_a_no_op() {
        let h = harness(vec![]).await;
        assert_eq!(h.controller.stop().await.unwrap(), None);
        assert!(h.controller.history().is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_passes_append_one_entry_each() {
        let h = harness(vec![]).await;
        h.controller.start().await.unwrap();

        run_passes(3).await;

        let snapshot = h.controller.snapshot().await;
        assert_eq!(snapshot.samples, 4);
        assert_eq!(h.posture.calls.load(Ordering::SeqCst), 4);
        assert!(snapshot.elapsed_secs >= 24);
        h.controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn capture_miss_skips_only_that_tick() {
        let h = harness(vec![]).await;
        h.frames
            .misses
            .lock()
            .unwrap()
            .extend([false, true, false]);

        h.controller.start().await.unwrap();
        run_passes(2).await;

        let snapshot = h.controller.snapshot().await;
        assert_eq!(snapshot.phase, SessionPhase::Active);
        assert_eq!(snapshot.samples, 2);
        assert_eq!(h.posture.calls.load(Ordering::SeqCst), 2);
        h.controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn classifier_failure_on_third_pass_abandons_session() {
        let h = harness(vec![
            Reply::Says("FOCUSED"),
            Reply::Says("FOCUSED"),
            Reply::Fails,
        ])
        .await;
        let mut events = h.controller.subscribe();

        h.controller.start().await.unwrap();
        run_passes(2).await;

        let snapshot = h.controller.snapshot().await;
        assert_eq!(snapshot.phase, SessionPhase::Inactive);
        assert_eq!(snapshot.status, AttentivenessState::Idle);
        assert_eq!(snapshot.samples, 0);
        assert!(snapshot.last_error.unwrap().contains("Focus analysis failed"));
        assert!(h.controller.history().is_empty().await);
        assert_eq!(h.blob.value(), None);

        // Timers are gone: no further classifier calls.
        run_passes(3).await;
        assert_eq!(h.posture.calls.load(Ordering::SeqCst), 3);

        let mut failures = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SessionEvent::SessionFailed { .. }) {
                failures += 1;
            }
        }
        assert_eq!(failures, 1);

        // Stop after an aborted session does nothing.
        assert_eq!(h.controller.stop().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_on_first_pass_is_returned_from_start() {
        let h = harness(vec![Reply::Fails]).await;

        let err = h.controller.start().await.unwrap_err();

        assert!(matches!(err, SessionError::AnalysisFailed(_)));
        assert_eq!(h.controller.snapshot().await.phase, SessionPhase::Inactive);
        // A new session can start afterwards.
        h.controller.start().await.unwrap();
        h.controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn feedback_fires_once_per_negative_edge() {
        let h = harness(vec![
            Reply::Says("FOCUSED"),
            Reply::Says("DISTRACTED"),
            Reply::Says("DISTRACTED"),
            Reply::Says("DISTRACTED"),
            Reply::Says("FOCUSED"),
            Reply::Says("AWAY"),
        ])
        .await;

        h.controller.start().await.unwrap();
        run_passes(5).await;

        assert_eq!(h.controller.snapshot().await.samples, 6);
        assert_eq!(h.speech.calls.load(Ordering::SeqCst), 2);
        h.controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_aggregates_and_stores_record() {
        let h = harness(vec![
            Reply::Says("FOCUSED"),
            Reply::Says("FOCUSED"),
            Reply::Says("DISTRACTED"),
            Reply::Says("FOCUSED"),
        ])
        .await;
        let mut events = h.controller.subscribe();

        let started = h.controller.start().await.unwrap();
        run_passes(3).await;
        let record = h.controller.stop().await.unwrap().unwrap();

        assert_eq!(record.id, started.started_at.unwrap().timestamp_millis());
        assert_eq!(record.focus_percentage, 75.0);
        assert_eq!(record.summary, "Well done.");
        assert_eq!(record.tip, "Take breaks.");
        assert_eq!(record.highlight_frames.len(), 3);

        let snapshot = h.controller.snapshot().await;
        assert_eq!(snapshot.phase, SessionPhase::Inactive);
        assert_eq!(snapshot.status, AttentivenessState::Idle);
        assert_eq!(snapshot.samples, 0);
        assert_eq!(snapshot.last_record, Some(record.clone()));

        assert_eq!(h.controller.history().latest().await, Some(record.clone()));
        assert!(h.blob.value().is_some());

        let mut completed = false;
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::SessionCompleted { record: done } = event {
                completed = done == record;
            }
        }
        assert!(completed);

        // Timers are cancelled.
        run_passes(2).await;
        assert_eq!(h.posture.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_pass_is_ignored_after_stop() {
        let h = harness(vec![Reply::Says("FOCUSED"), Reply::Slow("AWAY", 20)]).await;

        h.controller.start().await.unwrap();
        run_passes(1).await; // second pass now waiting on the classifier
        let record = h.controller.stop().await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(record.focus_percentage, 100.0);
        assert_eq!(h.speech.calls.load(Ordering::SeqCst), 0);
        let snapshot = h.controller.snapshot().await;
        assert_eq!(snapshot.samples, 0);
        assert_eq!(snapshot.status, AttentivenessState::Idle);
        assert_eq!(h.controller.history().len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_pass_is_skipped() {
        let h = harness(vec![Reply::Says("FOCUSED"), Reply::Slow("FOCUSED", 12)]).await;
        let started = h.controller.start().await.unwrap();
        assert_eq!(started.samples, 1);

        // The tick at 16s arrives while the slow pass (8s..20s) is in flight.
        run_passes(2).await;
        assert_eq!(h.posture.calls.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.controller.snapshot().await.samples, 2);
        h.controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stale_generation_pass_is_ignored() {
        let h = harness(vec![]).await;
        let generation = {
            h.controller.start().await.unwrap();
            h.controller.state.lock().await.generation
        };
        h.controller.stop().await.unwrap();

        let outcome = h.controller.run_analysis_pass(generation).await.unwrap();
        assert_eq!(outcome, PassOutcome::Stale);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_summary_still_completes_session() {
        let h = harness_with(
            vec![Reply::Says("FOCUSED"), Reply::Says("FOCUSED")],
            Arc::new(FixedSummarizer("not json at all")),
        )
        .await;

        h.controller.start().await.unwrap();
        run_passes(1).await;
        let record = h.controller.stop().await.unwrap().unwrap();

        assert_eq!(record.focus_percentage, 100.0);
        assert_eq!(
            record.summary,
            crate::session::SessionInsights::fallback().summary
        );
        assert_eq!(h.controller.history().len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn aggregation_panic_surfaces_error_without_record() {
        let h = harness_with(
            vec![Reply::Says("FOCUSED"), Reply::Says("FOCUSED")],
            Arc::new(PanickingSummarizer),
        )
        .await;

        h.controller.start().await.unwrap();
        run_passes(1).await;
        let err = h.controller.stop().await.unwrap_err();

        assert!(matches!(err, SessionError::AggregationFailed(_)));
        let snapshot = h.controller.snapshot().await;
        assert_eq!(snapshot.phase, SessionPhase::Inactive);
        assert_eq!(snapshot.last_record, None);
        assert!(h.controller.history().is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_timers_without_recording() {
        let h = harness(vec![]).await;
        h.controller.start().await.unwrap();

        h.controller.shutdown().await;
        run_passes(3).await;

        assert_eq!(h.posture.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.controller.snapshot().await.phase, SessionPhase::Inactive);
        assert!(h.controller.history().is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_feedback_never_holds_up_analysis() {
        let speech = Arc::new(CountingSpeech {
            hang: true,
            ..CountingSpeech::default()
        });
        let h = harness_full(
            vec![
                Reply::Says("DISTRACTED"),
                Reply::Says("FOCUSED"),
                Reply::Says("AWAY"),
            ],
            Arc::new(FixedSummarizer(r#"{"summary":"s","tip":"t"}"#)),
            speech,
        )
        .await;

        let started = tokio::time::timeout(Duration::from_secs(1), h.controller.start())
            .await
            .expect("start waited on feedback delivery")
            .unwrap();
        assert_eq!(started.status, AttentivenessState::Distracted);
        assert_eq!(started.samples, 1);

        run_passes(2).await;

        let snapshot = h.controller.snapshot().await;
        assert_eq!(snapshot.phase, SessionPhase::Active);
        assert_eq!(snapshot.samples, 3);
        assert_eq!(snapshot.status, AttentivenessState::Away);
        assert_eq!(h.speech.calls.load(Ordering::SeqCst), 2);
        h.controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_aggregation_discards_record_and_spares_next_session() {
        let h = harness_with(vec![], Arc::new(SlowSummarizer(20))).await;
        h.controller.start().await.unwrap();
        run_passes(1).await;

        let stopping = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.stop().await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.controller.snapshot().await.phase, SessionPhase::Stopping);

        h.controller.shutdown().await;
        assert_eq!(h.controller.snapshot().await.phase, SessionPhase::Inactive);
        h.controller.start().await.unwrap();

        // The abandoned stop finishes while the new session runs.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(stopping.await.unwrap().unwrap(), None);
        assert!(h.controller.history().is_empty().await);
        assert_eq!(h.blob.value(), None);

        let snapshot = h.controller.snapshot().await;
        assert_eq!(snapshot.phase, SessionPhase::Active);
        assert_eq!(snapshot.samples, 4);
        assert_eq!(snapshot.last_record, None);

        let record = h.controller.stop().await.unwrap().unwrap();
        assert_eq!(record.summary, "Late.");
        assert_eq!(h.controller.history().len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn late_cancel_from_ended_session_leaves_new_timers_running() {
        let h = harness(vec![]).await;
        h.controller.start().await.unwrap();
        let old_generation = h.controller.state.lock().await.generation;
        h.controller.shutdown().await;

        h.controller.start().await.unwrap();
        h.controller.cancel_timers(Some(old_generation), false).await;
        run_passes(2).await;

        let snapshot = h.controller.snapshot().await;
        assert_eq!(snapshot.samples, 3);
        assert!(snapshot.elapsed_secs >= 16);
        h.controller.shutdown().await;
    }
}
