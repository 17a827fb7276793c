use crate::core::action::Gesture;
use crate::core::backoff::Backoff;
use crate::core::fingerprint::Fingerprint;
use crate::core::gate::{ActionGate, Admission, GateState};
use crate::core::oracle::{Oracle, OracleError, OracleRequest};
use crate::core::session::SessionSettings;
use crate::core::snapshot::Snapshot;
use crate::core::state::{DelayMode, ProfileTable, VigilConfig};
use crate::io::actuation::{DispatchOutcome, Dispatcher};
use crate::io::capture::ObservationSource;
use crate::io::history::{DecisionLog, DecisionRecord};
use crate::io::status::{Phase, Status, StatusSink};
use chrono::Utc;
use colored::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, sleep_until, Instant, Interval, MissedTickBehavior};
use uuid::Uuid;

/// How one tick ended. Every variant leaves the session running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    MissingCredential,
    Throttled,
    Unchanged,
    Waiting,
    Suppressed,
    Unmapped,
    Expired,
    Cancelled,
    Executed(Gesture),
    NotCalibrated(Gesture),
    Failed(String),
    RateLimited,
}

#[derive(Debug, Clone, Default)]
pub struct LoopState {
    pub running: bool,
    /// Start epoch of the current run.
    pub epoch: u64,
    pub last_snapshot: Option<Snapshot>,
    /// Set once MissingCredential has been published for this run.
    pub credential_reported: bool,
}

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub tick_interval: Duration,
    pub retry_window: Duration,
    pub cooldown: Duration,
    pub delay: DelayMode,
}

impl From<&VigilConfig> for LoopConfig {
    fn from(config: &VigilConfig) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            retry_window: config.retry_window(),
            cooldown: config.cooldown(),
            delay: config.delay,
        }
    }
}

pub struct Collaborators {
    pub source: Arc<dyn ObservationSource>,
    pub oracle: Arc<dyn Oracle>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub sink: Arc<dyn StatusSink>,
    pub history: Arc<dyn DecisionLog>,
}

/// The scheduler. Sole owner and writer of gate, backoff and loop state;
/// control commands only reach it through the watch channel.
pub struct DecisionLoop {
    config: LoopConfig,
    profiles: ProfileTable,
    parts: Collaborators,
    control: watch::Receiver<SessionSettings>,
    gate: ActionGate,
    gate_state: GateState,
    backoff: Backoff,
    state: LoopState,
    rng: StdRng,
}

impl DecisionLoop {
    pub fn new(
        config: LoopConfig,
        profiles: ProfileTable,
        parts: Collaborators,
        control: watch::Receiver<SessionSettings>,
    ) -> Self {
        Self {
            gate: ActionGate::new(config.retry_window),
            backoff: Backoff::new(config.cooldown),
            config,
            profiles,
            parts,
            control,
            gate_state: GateState::default(),
            state: LoopState::default(),
            rng: StdRng::from_entropy(),
        }
    }

    pub fn gate_state(&self) -> &GateState {
        &self.gate_state
    }

    pub fn loop_state(&self) -> &LoopState {
        &self.state
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Drives ticks until every `SessionControl` handle is dropped.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.apply_control(&mut ticker);

        loop {
            let resume_at = self.backoff.resume_at();
            tokio::select! {
                biased;

                changed = self.control.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.apply_control(&mut ticker);
                }
                _ = sleep_until(resume_at.unwrap_or_else(Instant::now)), if resume_at.is_some() => {
                    self.backoff.clear();
                    if self.state.running {
                        self.publish(Status::new(Phase::Resumed, "Cooldown elapsed, resuming."));
                        ticker.reset_immediately();
                    }
                }
                _ = ticker.tick(), if self.state.running && resume_at.is_none() => {
                    self.tick().await;
                }
            }
        }

        println!("{}", "👋 Decision loop shut down.".green());
    }

    fn apply_control(&mut self, ticker: &mut Interval) {
        let settings = self.control.borrow_and_update().clone();
        let restarted = self.state.running && settings.epoch != self.state.epoch;
        if settings.running && (!self.state.running || restarted) {
            if restarted {
                self.publish(Status::new(Phase::Stopped, "Session stopped."));
            }
            self.state.running = true;
            self.state.epoch = settings.epoch;
            self.state.last_snapshot = None;
            self.state.credential_reported = false;
            self.gate_state.clear();
            self.publish(Status::new(
                Phase::Started,
                format!("Profile '{}'", settings.profile),
            ));
            ticker.reset_immediately();
        } else if !settings.running && self.state.running {
            self.state.running = false;
            self.publish(Status::new(Phase::Stopped, "Session stopped."));
        }
    }

    /// False once the session was stopped, or stopped and started again,
    /// since the tick began.
    fn is_current(&self, epoch: u64) -> bool {
        let settings = self.control.borrow();
        settings.running && settings.epoch == epoch
    }

    fn publish(&self, status: Status) {
        self.parts.sink.publish(status);
    }

    /// One period: capture, analyze, gate, delay, re-verify, actuate.
    pub async fn tick(&mut self) -> TickOutcome {
        let settings = self.control.borrow().clone();
        if !settings.running {
            return TickOutcome::Idle;
        }
        let Some(credential) = settings.credential().map(str::to_string) else {
            if !self.state.credential_reported {
                self.state.credential_reported = true;
                self.publish(Status::new(Phase::MissingCredential, "Set an API key to begin."));
            }
            return TickOutcome::MissingCredential;
        };
        self.state.credential_reported = false;
        if self.backoff.is_throttled(Instant::now()) {
            return TickOutcome::Throttled;
        }

        let snapshot = match self.parts.source.capture().await {
            Ok(s) => s,
            Err(e) => return self.fail(format!("Capture failed: {:#}", e)),
        };
        if self.state.last_snapshot.as_ref() == Some(&snapshot) {
            return TickOutcome::Unchanged;
        }
        self.state.last_snapshot = Some(snapshot.clone());

        let profile = self.profiles.resolve(&settings.profile).clone();
        self.publish(Status::new(
            Phase::Analyzing,
            format!("Frame {}", &snapshot.digest()[..12]),
        ));

        let request = OracleRequest {
            snapshot: &snapshot,
            credential: &credential,
            profile: &profile,
        };
        let rec = match self.parts.oracle.recommend(request).await {
            Ok(r) => r,
            Err(OracleError::RateLimited) => return self.enter_backoff(),
            Err(e) => return self.fail(e.to_string()),
        };

        if rec.is_waiting() {
            self.publish(
                Status::new(Phase::Waiting, rec.rationale.clone())
                    .with_metrics(rec.metrics.as_ref()),
            );
            self.gate_state.clear();
            return TickOutcome::Waiting;
        }

        let fingerprint = Fingerprint::from(&rec);
        let admission = self
            .gate
            .admit(fingerprint.clone(), Instant::now(), &mut self.gate_state);
        if !admission.is_admitted() {
            return TickOutcome::Suppressed;
        }

        self.publish(
            Status::new(Phase::Acting, format!("Executing {}...", rec.action))
                .with_action(&rec.action)
                .with_metrics(rec.metrics.as_ref()),
        );
        self.parts.history.record(&DecisionRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action: rec.action.clone(),
            fingerprint,
            rationale: rec.rationale.clone(),
            metrics: rec.metrics.clone(),
            verified_turn: rec.is_actor_turn,
            retry: admission == Admission::Retry,
        });

        let Some(gesture) = rec.action.gesture() else {
            self.publish(
                Status::new(Phase::Skipped, format!("No gesture for {}", rec.action))
                    .with_action(&rec.action),
            );
            return TickOutcome::Unmapped;
        };

        sleep(self.next_delay()).await;
        if !self.is_current(settings.epoch) {
            return self.cancel();
        }

        let recheck = match self.parts.source.capture().await {
            Ok(s) => s,
            Err(e) => return self.fail(format!("Capture failed: {:#}", e)),
        };
        let request = OracleRequest {
            snapshot: &recheck,
            credential: &credential,
            profile: &profile,
        };
        match self.parts.oracle.verify_turn(request).await {
            Ok(true) => {}
            Ok(false) => {
                println!("{}", "🛑 Turn expired during analysis. Aborting.".yellow());
                self.publish(Status::new(Phase::Expired, "Table updated.").with_action(&rec.action));
                return TickOutcome::Expired;
            }
            Err(OracleError::RateLimited) => return self.enter_backoff(),
            Err(e) => return self.fail(e.to_string()),
        }

        if !self.is_current(settings.epoch) {
            return self.cancel();
        }

        match self.parts.dispatcher.dispatch(gesture).await {
            Ok(DispatchOutcome::Dispatched) => {
                self.publish(
                    Status::new(Phase::Executed, rec.rationale.clone())
                        .with_action(&rec.action)
                        .with_metrics(rec.metrics.as_ref()),
                );
                TickOutcome::Executed(gesture)
            }
            Ok(DispatchOutcome::NotCalibrated) => {
                self.publish(
                    Status::new(Phase::NotCalibrated, format!("{} is not mapped", gesture))
                        .with_action(&rec.action),
                );
                TickOutcome::NotCalibrated(gesture)
            }
            Err(e) => self.fail(format!("Actuation failed: {:#}", e)),
        }
    }

    fn next_delay(&mut self) -> Duration {
        match self.config.delay {
            DelayMode::Jitter { min_ms, max_ms } => {
                Duration::from_millis(self.rng.gen_range(min_ms..=max_ms.max(min_ms)))
            }
            DelayMode::Deliberate { ms } => Duration::from_millis(ms),
        }
    }

    fn enter_backoff(&mut self) -> TickOutcome {
        // The throttled frame was never fully handled; let it be analyzed again.
        self.state.last_snapshot = None;
        let wait = self.backoff.on_rate_limited(Instant::now());
        self.publish(Status::new(
            Phase::RateLimited,
            format!("Waiting {}s...", wait.as_secs()),
        ));
        TickOutcome::RateLimited
    }

    fn cancel(&self) -> TickOutcome {
        self.publish(Status::new(Phase::Cancelled, "Session stopped before actuation."));
        TickOutcome::Cancelled
    }

    fn fail(&self, message: String) -> TickOutcome {
        self.publish(Status::new(Phase::Error, message.clone()));
        TickOutcome::Failed(message)
    }
}

#[cfg(test)]
mod tests {
    use super::{Collaborators, DecisionLoop, LoopConfig, TickOutcome};
    use crate::core::action::{Action, Gesture};
    use crate::core::oracle::{Oracle, OracleError, OracleRequest, Recommendation};
    use crate::core::session::{SessionControl, SessionSettings};
    use crate::core::snapshot::Snapshot;
    use crate::core::state::{DelayMode, VigilConfig};
    use crate::io::actuation::{DispatchOutcome, Dispatcher};
    use crate::io::capture::ObservationSource;
    use crate::io::history::{DecisionLog, DecisionRecord};
    use crate::io::status::{Phase, Status, StatusSink};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::{advance, sleep};

    // --- Scripted collaborators ---

    /// Hands out a fresh frame per capture unless a fixed frame is pinned.
    #[derive(Default)]
    struct FrameSource {
        captures: AtomicUsize,
        pinned: Mutex<Option<Vec<u8>>>,
        failing: Mutex<bool>,
    }

    impl FrameSource {
        fn pin(&self, frame: &[u8]) {
            *self.pinned.lock().unwrap() = Some(frame.to_vec());
        }

        fn captures(&self) -> usize {
            self.captures.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ObservationSource for FrameSource {
        async fn capture(&self) -> Result<Snapshot> {
            let n = self.captures.fetch_add(1, Ordering::SeqCst);
            if *self.failing.lock().unwrap() {
                return Err(anyhow!("display surface unavailable"));
            }
            let bytes = match self.pinned.lock().unwrap().clone() {
                Some(frame) => frame,
                None => (n as u64).to_le_bytes().to_vec(),
            };
            Ok(Snapshot::new(bytes, "image/jpeg"))
        }
    }

    struct ScriptedOracle {
        recommendations: Mutex<VecDeque<Result<Recommendation, OracleError>>>,
        fallback: Mutex<Recommendation>,
        verdicts: Mutex<VecDeque<Result<bool, OracleError>>>,
        recommend_calls: AtomicUsize,
        verify_calls: AtomicUsize,
        stop_on_verify: Mutex<Option<SessionControl>>,
    }

    impl ScriptedOracle {
        fn new(fallback: Recommendation) -> Self {
            Self {
                recommendations: Mutex::new(VecDeque::new()),
                fallback: Mutex::new(fallback),
                verdicts: Mutex::new(VecDeque::new()),
                recommend_calls: AtomicUsize::new(0),
                verify_calls: AtomicUsize::new(0),
                stop_on_verify: Mutex::new(None),
            }
        }

        fn queue(&self, reply: Result<Recommendation, OracleError>) {
            self.recommendations.lock().unwrap().push_back(reply);
        }

        fn queue_verdict(&self, verdict: Result<bool, OracleError>) {
            self.verdicts.lock().unwrap().push_back(verdict);
        }

        fn set_fallback(&self, rec: Recommendation) {
            *self.fallback.lock().unwrap() = rec;
        }

        fn recommend_calls(&self) -> usize {
            self.recommend_calls.load(Ordering::SeqCst)
        }

        fn verify_calls(&self) -> usize {
            self.verify_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Oracle for ScriptedOracle {
        async fn recommend(&self, _request: OracleRequest<'_>) -> Result<Recommendation, OracleError> {
            self.recommend_calls.fetch_add(1, Ordering::SeqCst);
            let queued = self.recommendations.lock().unwrap().pop_front();
            queued.unwrap_or_else(|| Ok(self.fallback.lock().unwrap().clone()))
        }

        async fn verify_turn(&self, _request: OracleRequest<'_>) -> Result<bool, OracleError> {
            self.verify_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(control) = self.stop_on_verify.lock().unwrap().as_ref() {
                control.stop();
            }
            let queued = self.verdicts.lock().unwrap().pop_front();
            queued.unwrap_or(Ok(true))
        }
    }

    struct RecordingDispatcher {
        calibrated: bool,
        dispatched: Mutex<Vec<Gesture>>,
    }

    impl RecordingDispatcher {
        fn new(calibrated: bool) -> Self {
            Self { calibrated, dispatched: Mutex::new(Vec::new()) }
        }

        fn dispatched(&self) -> Vec<Gesture> {
            self.dispatched.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Dispatcher for RecordingDispatcher {
        async fn dispatch(&self, gesture: Gesture) -> Result<DispatchOutcome> {
            if !self.calibrated {
                return Ok(DispatchOutcome::NotCalibrated);
            }
            self.dispatched.lock().unwrap().push(gesture);
            Ok(DispatchOutcome::Dispatched)
        }
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<Status>>);

    impl RecordingSink {
        fn phases(&self) -> Vec<Phase> {
            self.0.lock().unwrap().iter().map(|s| s.phase).collect()
        }

        fn count(&self, phase: Phase) -> usize {
            self.phases().into_iter().filter(|p| *p == phase).count()
        }
    }

    impl StatusSink for RecordingSink {
        fn publish(&self, status: Status) {
            self.0.lock().unwrap().push(status);
        }
    }

    #[derive(Default)]
    struct RecordingLog(Mutex<Vec<DecisionRecord>>);

    impl DecisionLog for RecordingLog {
        fn record(&self, record: &DecisionRecord) {
            self.0.lock().unwrap().push(record.clone());
        }
    }

    // --- Harness ---

    fn rec(turn: bool, action: Action) -> Recommendation {
        Recommendation {
            is_actor_turn: turn,
            action,
            subject_cards: "AhKd".to_string(),
            context: "QsJh7d".to_string(),
            rationale: "scripted".to_string(),
            metrics: None,
        }
    }

    struct Harness {
        control: SessionControl,
        source: Arc<FrameSource>,
        oracle: Arc<ScriptedOracle>,
        dispatcher: Arc<RecordingDispatcher>,
        sink: Arc<RecordingSink>,
        log: Arc<RecordingLog>,
        decision_loop: DecisionLoop,
    }

    fn harness_with(running: bool, credential: Option<&str>, calibrated: bool) -> Harness {
        let config = VigilConfig {
            delay: DelayMode::Deliberate { ms: 500 },
            ..VigilConfig::default()
        };
        let (control, rx) = SessionControl::new(SessionSettings {
            running,
            credential: credential.map(str::to_string),
            profile: "default".to_string(),
            ..SessionSettings::default()
        });
        let source = Arc::new(FrameSource::default());
        let oracle = Arc::new(ScriptedOracle::new(rec(true, Action::Raise)));
        let dispatcher = Arc::new(RecordingDispatcher::new(calibrated));
        let sink = Arc::new(RecordingSink::default());
        let log = Arc::new(RecordingLog::default());

        let parts = Collaborators {
            source: source.clone(),
            oracle: oracle.clone(),
            dispatcher: dispatcher.clone(),
            sink: sink.clone(),
            history: log.clone(),
        };
        let decision_loop =
            DecisionLoop::new(LoopConfig::from(&config), config.profile_table(), parts, rx);

        Harness { control, source, oracle, dispatcher, sink, log, decision_loop }
    }

    fn harness() -> Harness {
        harness_with(true, Some("key"), true)
    }

    // --- Tick properties ---

    #[tokio::test(start_paused = true)]
    async fn test_raise_scenario_suppress_then_single_retry() {
        let mut h = harness();

        assert_eq!(h.decision_loop.tick().await, TickOutcome::Executed(Gesture::Raise));

        advance(Duration::from_secs(3)).await;
        assert_eq!(h.decision_loop.tick().await, TickOutcome::Suppressed);

        advance(Duration::from_secs(10)).await;
        assert_eq!(h.decision_loop.tick().await, TickOutcome::Executed(Gesture::Raise));

        for _ in 0..5 {
            advance(Duration::from_secs(11)).await;
            assert_eq!(h.decision_loop.tick().await, TickOutcome::Suppressed);
        }

        assert_eq!(h.dispatcher.dispatched(), vec![Gesture::Raise, Gesture::Raise]);
        let log = h.log.0.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert!(!log[0].retry);
        assert!(log[1].retry);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suppression_within_window() {
        let mut h = harness();

        for _ in 0..4 {
            h.decision_loop.tick().await;
            advance(Duration::from_secs(2)).await;
        }
        assert_eq!(h.dispatcher.dispatched().len(), 1);
        assert_eq!(h.oracle.verify_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_snapshot_skips_oracle() {
        let mut h = harness();
        h.source.pin(b"frame-a");

        h.decision_loop.tick().await;
        assert_eq!(h.oracle.recommend_calls(), 1);

        assert_eq!(h.decision_loop.tick().await, TickOutcome::Unchanged);
        assert_eq!(h.oracle.recommend_calls(), 1);
        assert_eq!(h.sink.count(Phase::Analyzing), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_stale_actuation_for_any_action() {
        for action in [Action::Fold, Action::Check, Action::Call, Action::Raise, Action::Bet, Action::SitBack] {
            let mut h = harness();
            h.oracle.set_fallback(rec(true, action.clone()));
            h.oracle.queue_verdict(Ok(false));

            assert_eq!(h.decision_loop.tick().await, TickOutcome::Expired, "{}", action);
            assert!(h.dispatcher.dispatched().is_empty());
            assert_eq!(h.sink.count(Phase::Expired), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_clears_gate() {
        let mut h = harness();

        assert_eq!(h.decision_loop.tick().await, TickOutcome::Executed(Gesture::Raise));
        h.oracle.queue(Ok(rec(false, Action::Raise)));
        assert_eq!(h.decision_loop.tick().await, TickOutcome::Waiting);
        assert!(h.decision_loop.gate_state().last_fingerprint.is_none());

        assert_eq!(h.decision_loop.tick().await, TickOutcome::Executed(Gesture::Raise));
        assert_eq!(h.dispatcher.dispatched().len(), 2);
        assert_eq!(h.sink.count(Phase::Waiting), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_wait_is_waiting() {
        let mut h = harness();
        h.oracle.set_fallback(rec(true, Action::Wait));

        assert_eq!(h.decision_loop.tick().await, TickOutcome::Waiting);
        assert_eq!(h.oracle.verify_calls(), 0);
        assert!(h.log.0.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecognized_action_never_dispatches() {
        let mut h = harness();
        h.oracle.set_fallback(rec(true, Action::parse("ALL_IN")));

        assert_eq!(h.decision_loop.tick().await, TickOutcome::Unmapped);
        assert_eq!(h.oracle.verify_calls(), 0);
        assert!(h.dispatcher.dispatched().is_empty());
        assert_eq!(h.sink.count(Phase::Skipped), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_credential_makes_no_calls() {
        let mut h = harness_with(true, None, true);

        assert_eq!(h.decision_loop.tick().await, TickOutcome::MissingCredential);
        assert_eq!(h.source.captures(), 0);
        assert_eq!(h.oracle.recommend_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_credential_reported_once() {
        let mut h = harness_with(true, None, true);
        for _ in 0..3 {
            assert_eq!(h.decision_loop.tick().await, TickOutcome::MissingCredential);
        }
        assert_eq!(h.sink.count(Phase::MissingCredential), 1);

        h.control.set_credential("key");
        assert_eq!(h.decision_loop.tick().await, TickOutcome::Executed(Gesture::Raise));

        h.control.set_credential("");
        assert_eq!(h.decision_loop.tick().await, TickOutcome::MissingCredential);
        assert_eq!(h.sink.count(Phase::MissingCredential), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_session_is_idle() {
        let mut h = harness_with(false, Some("key"), true);
        assert_eq!(h.decision_loop.tick().await, TickOutcome::Idle);
        assert_eq!(h.source.captures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_ends_tick_only() {
        let mut h = harness();
        h.oracle.queue(Err(OracleError::Transport("bad json".to_string())));

        assert!(matches!(h.decision_loop.tick().await, TickOutcome::Failed(_)));
        assert_eq!(h.sink.count(Phase::Error), 1);

        assert_eq!(h.decision_loop.tick().await, TickOutcome::Executed(Gesture::Raise));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_failure_is_reported() {
        let mut h = harness();
        *h.source.failing.lock().unwrap() = true;

        assert!(matches!(h.decision_loop.tick().await, TickOutcome::Failed(_)));
        assert_eq!(h.oracle.recommend_calls(), 0);
        assert_eq!(h.sink.count(Phase::Error), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_calibrated_is_reported() {
        let mut h = harness_with(true, Some("key"), false);

        assert_eq!(
            h.decision_loop.tick().await,
            TickOutcome::NotCalibrated(Gesture::Raise)
        );
        assert_eq!(h.sink.count(Phase::NotCalibrated), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_during_verify_blocks_dispatch() {
        let mut h = harness();
        h.oracle.queue_verdict(Err(OracleError::RateLimited));

        assert_eq!(h.decision_loop.tick().await, TickOutcome::RateLimited);
        assert!(h.dispatcher.dispatched().is_empty());
        assert!(h.decision_loop.backoff().resume_at().is_some());

        assert_eq!(h.decision_loop.tick().await, TickOutcome::Throttled);
        assert_eq!(h.oracle.recommend_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_delay_cancels() {
        let h = harness();
        let control = h.control.clone();
        let oracle = h.oracle.clone();
        let dispatcher = h.dispatcher.clone();
        let mut decision_loop = h.decision_loop;

        let task = tokio::spawn(async move { decision_loop.tick().await });
        sleep(Duration::from_millis(200)).await;
        control.stop();

        assert_eq!(task.await.unwrap(), TickOutcome::Cancelled);
        assert_eq!(oracle.verify_calls(), 0);
        assert!(dispatcher.dispatched().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_verify_prevents_dispatch() {
        let mut h = harness();
        *h.oracle.stop_on_verify.lock().unwrap() = Some(h.control.clone());

        assert_eq!(h.decision_loop.tick().await, TickOutcome::Cancelled);
        assert_eq!(h.oracle.verify_calls(), 1);
        assert!(h.dispatcher.dispatched().is_empty());
    }

    // --- Run loop ---

    #[tokio::test(start_paused = true)]
    async fn test_backoff_resumes_once() {
        let h = harness();
        h.oracle.queue(Err(OracleError::RateLimited));
        h.oracle.set_fallback(rec(false, Action::Wait));

        let control = h.control.clone();
        let oracle = h.oracle.clone();
        let sink = h.sink.clone();
        let task = tokio::spawn(h.decision_loop.run());

        sleep(Duration::from_secs(14)).await;
        assert_eq!(oracle.recommend_calls(), 1);
        assert_eq!(sink.count(Phase::RateLimited), 1);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(oracle.recommend_calls(), 2);
        assert_eq!(sink.count(Phase::Resumed), 1);

        drop(control);
        drop(h.control);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_backoff_never_resumes() {
        let h = harness();
        h.oracle.queue(Err(OracleError::RateLimited));

        let control = h.control.clone();
        let oracle = h.oracle.clone();
        let source = h.source.clone();
        let sink = h.sink.clone();
        let task = tokio::spawn(h.decision_loop.run());

        sleep(Duration::from_secs(5)).await;
        control.stop();
        sleep(Duration::from_secs(30)).await;

        assert_eq!(oracle.recommend_calls(), 1);
        assert_eq!(source.captures(), 1);
        assert_eq!(sink.count(Phase::Resumed), 0);
        assert_eq!(sink.count(Phase::Stopped), 1);

        drop(control);
        drop(h.control);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_during_delay_resets_state() {
        let h = harness();
        h.source.pin(b"frame-a");

        let control = h.control.clone();
        let oracle = h.oracle.clone();
        let dispatcher = h.dispatcher.clone();
        let sink = h.sink.clone();
        let task = tokio::spawn(h.decision_loop.run());

        // inside the first tick's 500ms delay
        sleep(Duration::from_millis(200)).await;
        control.stop();
        control.start();
        sleep(Duration::from_secs(2)).await;

        // the interrupted tick is cancelled; the same frame is analyzed afresh
        assert_eq!(oracle.recommend_calls(), 2);
        assert_eq!(oracle.verify_calls(), 1);
        assert_eq!(dispatcher.dispatched(), vec![Gesture::Raise]);
        assert_eq!(
            sink.phases(),
            vec![
                Phase::Started,
                Phase::Analyzing,
                Phase::Acting,
                Phase::Cancelled,
                Phase::Stopped,
                Phase::Started,
                Phase::Analyzing,
                Phase::Acting,
                Phase::Executed,
            ]
        );

        drop(control);
        drop(h.control);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_cycle() {
        let h = harness_with(false, Some("key"), true);
        h.oracle.set_fallback(rec(false, Action::Wait));

        let control = h.control.clone();
        let source = h.source.clone();
        let sink = h.sink.clone();
        let task = tokio::spawn(h.decision_loop.run());

        sleep(Duration::from_secs(10)).await;
        assert_eq!(source.captures(), 0);

        control.start();
        sleep(Duration::from_millis(7_500)).await;
        // immediate tick plus ticks at +3s and +6s
        assert_eq!(source.captures(), 3);

        control.stop();
        sleep(Duration::from_secs(20)).await;
        assert_eq!(source.captures(), 3);
        assert_eq!(sink.phases().first(), Some(&Phase::Started));
        assert_eq!(sink.count(Phase::Stopped), 1);

        drop(control);
        drop(h.control);
        task.await.unwrap();
    }
}
