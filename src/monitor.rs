// =============================================================================
// Per-account monitor — one task, one adapter, one anchor, own cadence
// =============================================================================
//
// State machine:
//
//   CONNECTING ──ok──► OBSERVING ──snapshot error──► RECONNECTING ──► CONNECTING
//       │                   │                              │
//       └──auth──► FAILED   └──cancel──► STOPPED ◄──cancel─┘
//
// The loop is single-threaded per account: one snapshot is processed to
// completion before the next is fetched. Reconnect delays use exponential
// backoff with full jitter (base 1 s, factor 2, cap 60 s). Every adapter call
// is wrapped in the operation timeout; exceeding it counts as transient.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval, timeout, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::anchor::{DayAnchor, DayStartAnchored};
use crate::config::AccountConfig;
use crate::errors::AdapterError;
use crate::evaluator::evaluate;
use crate::notify::Notifier;
use crate::platform::{PlatformAdapter, DEFAULT_OP_TIMEOUT};
use crate::rules::{RuleBreach, Rules};
use crate::types::BreachLevel;

const BACKOFF_BASE_SECS: f64 = 1.0;
const BACKOFF_CAP_SECS: f64 = 60.0;

/// Breach summaries retained per account for the status view.
const STATUS_RING: usize = 20;

/// Monitor lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorState {
    Connecting,
    Observing,
    Reconnecting,
    Failed,
    Stopped,
}

impl std::fmt::Display for MonitorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Connecting => "CONNECTING",
            Self::Observing => "OBSERVING",
            Self::Reconnecting => "RECONNECTING",
            Self::Failed => "FAILED",
            Self::Stopped => "STOPPED",
        };
        write!(f, "{s}")
    }
}

/// Read-only per-account status published for health handlers.
#[derive(Debug, Clone, Serialize)]
pub struct AccountStatus {
    pub label: String,
    pub account_id: String,
    pub state: MonitorState,
    pub last_snapshot_at: Option<DateTime<Utc>>,
    pub last_breach_summary: Option<String>,
    /// Recent breach summaries, oldest first, bounded.
    pub recent_breaches: Vec<String>,
    /// Recent day-start anchor events, oldest first, bounded.
    pub recent_anchor_events: Vec<DayStartAnchored>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl AccountStatus {
    pub fn new(label: &str, account_id: &str) -> Self {
        Self {
            label: label.to_string(),
            account_id: account_id.to_string(),
            state: MonitorState::Connecting,
            last_snapshot_at: None,
            last_breach_summary: None,
            recent_breaches: Vec::new(),
            recent_anchor_events: Vec::new(),
            consecutive_failures: 0,
            last_error: None,
        }
    }
}

/// Shared, copy-on-read status cell.
pub type StatusCell = Arc<RwLock<AccountStatus>>;

/// Full-jitter exponential backoff delay for the given attempt (0-based).
pub(crate) fn backoff_delay<R: Rng>(attempt: u32, rng: &mut R) -> Duration {
    let cap = (BACKOFF_BASE_SECS * 2f64.powi(attempt.min(16) as i32)).min(BACKOFF_CAP_SECS);
    Duration::from_secs_f64(rng.gen_range(0.0..=cap))
}

fn summarise(breaches: &[RuleBreach]) -> String {
    let hard = breaches.iter().filter(|b| b.is_hard()).count();
    let warn = breaches.len() - hard;
    let codes: Vec<String> = breaches
        .iter()
        .map(|b| format!("{}:{}", b.level, b.code))
        .collect();
    format!("{hard} hard / {warn} warn [{}]", codes.join(", "))
}

/// One account's monitoring loop.
pub struct AccountMonitor {
    config: AccountConfig,
    rules: Rules,
    adapter: Box<dyn PlatformAdapter>,
    anchor: DayAnchor,
    notifier: Notifier,
    status: StatusCell,
    shutdown: watch::Receiver<bool>,
    cached_leverage: Option<f64>,
}

impl AccountMonitor {
    pub fn new(
        config: AccountConfig,
        rules: Rules,
        adapter: Box<dyn PlatformAdapter>,
        notifier: Notifier,
        status: StatusCell,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let anchor = DayAnchor::new(config.account_id.clone());
        Self {
            config,
            rules,
            adapter,
            anchor,
            notifier,
            status,
            shutdown,
            cached_leverage: None,
        }
    }

    fn set_state(&self, state: MonitorState) {
        self.status.write().state = state;
    }

    fn record_error(&self, error: &AdapterError) {
        let mut status = self.status.write();
        status.consecutive_failures += 1;
        status.last_error = Some(error.to_string());
    }

    fn record_anchor(&self, event: DayStartAnchored) {
        let mut status = self.status.write();
        status.recent_anchor_events.push(event);
        while status.recent_anchor_events.len() > STATUS_RING {
            status.recent_anchor_events.remove(0);
        }
    }

    fn record_snapshot(&self, at: DateTime<Utc>, breaches: &[RuleBreach]) {
        let mut status = self.status.write();
        status.consecutive_failures = 0;
        status.last_error = None;
        status.last_snapshot_at = Some(at);
        if !breaches.is_empty() {
            let summary = summarise(breaches);
            status.last_breach_summary = Some(summary.clone());
            status.recent_breaches.push(summary);
            while status.recent_breaches.len() > STATUS_RING {
                status.recent_breaches.remove(0);
            }
        }
    }

    fn cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Run until cancellation, terminal auth failure, or process exit.
    pub async fn run(mut self) {
        info!(
            account = %self.config.label,
            platform = %self.config.platform,
            interval_secs = self.config.check_interval,
            rules = %self.rules.name,
            "monitor starting"
        );

        let mut attempt: u32 = 0;

        'lifecycle: loop {
            if self.cancelled() {
                break 'lifecycle;
            }

            // ── CONNECTING ───────────────────────────────────────────────
            self.set_state(MonitorState::Connecting);
            let connected = timeout(DEFAULT_OP_TIMEOUT, self.adapter.connect()).await;
            match connected {
                Ok(Ok(())) => {
                    attempt = 0;
                    // Leverage rarely changes; fetch once per session.
                    let leverage = timeout(DEFAULT_OP_TIMEOUT, self.adapter.leverage()).await;
                    self.cached_leverage = match leverage {
                        Ok(Ok(lev)) => lev,
                        _ => None,
                    };
                }
                Ok(Err(e)) if e.is_auth() => {
                    error!(account = %self.config.label, error = %e,
                           "authentication failed — monitor is giving up");
                    self.record_error(&e);
                    self.set_state(MonitorState::Failed);
                    self.adapter.disconnect().await;
                    return;
                }
                Ok(Err(e)) => {
                    self.record_error(&e);
                    if self.backoff_or_cancel(&mut attempt, &e).await {
                        break 'lifecycle;
                    }
                    continue 'lifecycle;
                }
                Err(_) => {
                    let e = AdapterError::Transient("connect timed out".to_string());
                    self.record_error(&e);
                    if self.backoff_or_cancel(&mut attempt, &e).await {
                        break 'lifecycle;
                    }
                    continue 'lifecycle;
                }
            }

            // ── OBSERVING ────────────────────────────────────────────────
            self.set_state(MonitorState::Observing);
            let mut ticker = interval(Duration::from_secs(self.config.check_interval));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = self.shutdown.changed() => {
                        if self.cancelled() {
                            break 'lifecycle;
                        }
                        continue;
                    }
                }

                let fetched = timeout(DEFAULT_OP_TIMEOUT, self.adapter.snapshot()).await;
                match fetched {
                    Ok(Ok(mut snapshot)) => {
                        attempt = 0;

                        if let Some(event) = self.anchor.observe(&mut snapshot) {
                            info!(
                                account = %self.config.label,
                                date = %event.date,
                                balance = event.day_start_balance,
                                equity = event.day_start_equity,
                                "day-start anchor recorded"
                            );
                            self.record_anchor(event);
                        }

                        if snapshot.leverage.is_none() {
                            snapshot.leverage = self.cached_leverage;
                        }

                        let breaches =
                            evaluate(&self.rules, &snapshot, self.config.starting_balance);

                        self.record_snapshot(snapshot.observed_at_wall, &breaches);

                        if breaches.is_empty() {
                            debug!(
                                account = %self.config.label,
                                equity = snapshot.equity,
                                unrealized = snapshot.unrealized_total(),
                                positions = snapshot.positions.len(),
                                "compliant snapshot"
                            );
                        } else {
                            let hard = breaches
                                .iter()
                                .filter(|b| b.level == BreachLevel::Hard)
                                .count();
                            warn!(
                                account = %self.config.label,
                                total = breaches.len(),
                                hard,
                                "rule findings"
                            );
                            // Finish the evaluation even when cancelled; only
                            // the dispatch is skipped.
                            if !self.cancelled() {
                                self.notifier.dispatch(&self.config.label, breaches);
                            }
                        }

                        if self.cancelled() {
                            break 'lifecycle;
                        }
                    }
                    Ok(Err(e)) if e.is_auth() => {
                        error!(account = %self.config.label, error = %e,
                               "authentication lost — monitor is giving up");
                        self.record_error(&e);
                        self.set_state(MonitorState::Failed);
                        self.adapter.disconnect().await;
                        return;
                    }
                    Ok(Err(e)) => {
                        self.record_error(&e);
                        if self.backoff_or_cancel(&mut attempt, &e).await {
                            break 'lifecycle;
                        }
                        continue 'lifecycle;
                    }
                    Err(_) => {
                        let e = AdapterError::Transient("snapshot timed out".to_string());
                        self.record_error(&e);
                        if self.backoff_or_cancel(&mut attempt, &e).await {
                            break 'lifecycle;
                        }
                        continue 'lifecycle;
                    }
                }
            }
        }

        // ── STOPPED ──────────────────────────────────────────────────────
        self.adapter.disconnect().await;
        self.set_state(MonitorState::Stopped);
        info!(account = %self.config.label, "monitor stopped");
    }

    /// Sleep the backoff delay in RECONNECTING, cancellable. Returns true when
    /// cancellation was requested.
    async fn backoff_or_cancel(&mut self, attempt: &mut u32, error: &AdapterError) -> bool {
        self.set_state(MonitorState::Reconnecting);
        let delay = backoff_delay(*attempt, &mut rand::thread_rng());
        warn!(
            account = %self.config.label,
            error = %error,
            attempt = *attempt,
            delay_ms = delay.as_millis() as u64,
            "transient failure — backing off"
        );
        *attempt = attempt.saturating_add(1);

        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = self.shutdown.changed() => self.cancelled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{FixedOffset, TimeZone};

    use crate::notify::{Notifier, NotifySink};
    use crate::snapshot::AccountSnapshot;
    use crate::types::Platform;

    #[test]
    fn backoff_is_bounded_and_jittered() {
        let mut rng = rand::thread_rng();
        for attempt in 0..20 {
            let cap = (1u64 << attempt.min(6)).min(60) as f64;
            for _ in 0..50 {
                let delay = backoff_delay(attempt, &mut rng);
                assert!(delay.as_secs_f64() <= cap + 1e-9, "attempt {attempt}");
                assert!(delay.as_secs_f64() <= 60.0 + 1e-9);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Scripted fake adapter
    // -------------------------------------------------------------------------

    enum Step {
        ConnectOk,
        ConnectAuthFail,
        ConnectTransient,
        SnapshotOk(f64, f64), // balance, equity
        SnapshotTransient,
    }

    struct FakeAdapter {
        script: Mutex<VecDeque<Step>>,
    }

    impl FakeAdapter {
        fn new(steps: Vec<Step>) -> Box<Self> {
            Box::new(Self {
                script: Mutex::new(steps.into()),
            })
        }

        fn snapshot_with(balance: f64, equity: f64) -> AccountSnapshot {
            AccountSnapshot {
                account_id: "10012345".to_string(),
                platform: Platform::Mt5,
                currency: "USD".to_string(),
                balance,
                equity,
                margin_used: 0.0,
                margin_free: equity,
                day_start_balance: None,
                day_start_equity: None,
                leverage: None,
                positions: Vec::new(),
                observed_at_server: FixedOffset::east_opt(0)
                    .unwrap()
                    .with_ymd_and_hms(2025, 3, 12, 12, 0, 0)
                    .unwrap(),
                observed_at_wall: Utc::now(),
            }
        }
    }

    #[async_trait]
    impl PlatformAdapter for FakeAdapter {
        fn platform(&self) -> Platform {
            Platform::Mt5
        }

        async fn connect(&mut self) -> Result<(), AdapterError> {
            let step = self.script.lock().unwrap().pop_front();
            match step {
                Some(Step::ConnectOk) | None => Ok(()),
                Some(Step::ConnectAuthFail) => Err(AdapterError::Auth("bad creds".into())),
                Some(Step::ConnectTransient) => Err(AdapterError::Transient("refused".into())),
                Some(other) => {
                    // Put non-connect steps back for the snapshot path.
                    self.script.lock().unwrap().push_front(other);
                    Ok(())
                }
            }
        }

        async fn disconnect(&mut self) {}

        async fn server_time(
            &self,
        ) -> Result<chrono::DateTime<FixedOffset>, AdapterError> {
            Ok(Utc::now().with_timezone(&FixedOffset::east_opt(0).unwrap()))
        }

        async fn snapshot(&self) -> Result<AccountSnapshot, AdapterError> {
            let step = self.script.lock().unwrap().pop_front();
            match step {
                Some(Step::SnapshotOk(balance, equity)) => {
                    Ok(Self::snapshot_with(balance, equity))
                }
                Some(Step::SnapshotTransient) => Err(AdapterError::Transient("dropped".into())),
                _ => Ok(Self::snapshot_with(100_000.0, 100_000.0)),
            }
        }

        async fn leverage(&self) -> Result<Option<f64>, AdapterError> {
            Ok(None)
        }
    }

    struct CollectingSink {
        dispatches: Mutex<Vec<(String, usize)>>,
    }

    impl NotifySink for CollectingSink {
        fn name(&self) -> &str {
            "collecting"
        }

        fn deliver(&self, label: &str, breaches: &[RuleBreach]) -> anyhow::Result<()> {
            self.dispatches
                .lock()
                .unwrap()
                .push((label.to_string(), breaches.len()));
            Ok(())
        }
    }

    fn account_config() -> AccountConfig {
        AccountConfig {
            label: "test-acct".to_string(),
            firm: "FTMO".to_string(),
            program_id: None,
            platform: Platform::Mt5,
            account_id: "10012345".to_string(),
            starting_balance: 100_000.0,
            check_interval: 1,
            enabled: true,
            rules: None,
        }
    }

    fn rules() -> Rules {
        serde_json::from_str(
            r#"{ "name": "Test", "max_daily_drawdown_pct": 5.0, "max_total_drawdown_pct": 10.0 }"#,
        )
        .unwrap()
    }

    fn harness(
        adapter: Box<dyn PlatformAdapter>,
    ) -> (
        AccountMonitor,
        StatusCell,
        watch::Sender<bool>,
        Arc<CollectingSink>,
    ) {
        let sink = Arc::new(CollectingSink {
            dispatches: Mutex::new(Vec::new()),
        });
        let (notifier, _drain) = Notifier::start(vec![sink.clone()], 16);
        let status: StatusCell = Arc::new(RwLock::new(AccountStatus::new("test-acct", "10012345")));
        let (tx, rx) = watch::channel(false);
        let monitor = AccountMonitor::new(
            account_config(),
            rules(),
            adapter,
            notifier,
            status.clone(),
            rx,
        );
        (monitor, status, tx, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_is_terminal() {
        let adapter = FakeAdapter::new(vec![Step::ConnectAuthFail]);
        let (monitor, status, _tx, _sink) = harness(adapter);

        monitor.run().await;

        let status = status.read();
        assert_eq!(status.state, MonitorState::Failed);
        assert!(status.last_error.as_deref().unwrap().contains("bad creds"));
        assert_eq!(status.consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_recover_and_breaches_are_dispatched() {
        let adapter = FakeAdapter::new(vec![
            Step::ConnectTransient,
            Step::ConnectOk,
            // First snapshot anchors at 100k/100k; clean.
            Step::SnapshotOk(100_000.0, 100_000.0),
            // One dropped fetch, then a 6% daily loss → DAILY_DD hard.
            Step::SnapshotTransient,
            Step::SnapshotOk(100_000.0, 94_000.0),
        ]);
        let (monitor, status, tx, sink) = harness(adapter);

        let run = tokio::spawn(monitor.run());

        // Paused time auto-advances through intervals and backoff sleeps.
        // Poll real task progress until the breach dispatch lands.
        for _ in 0..500 {
            tokio::time::sleep(Duration::from_millis(200)).await;
            if !sink.dispatches.lock().unwrap().is_empty() {
                break;
            }
        }

        {
            let dispatches = sink.dispatches.lock().unwrap();
            assert!(!dispatches.is_empty(), "breach dispatch expected");
            assert_eq!(dispatches[0].0, "test-acct");
            // DAILY_DD hard (6% vs 5%); TOTAL_DD 6% is below its 8% warn zone.
            assert_eq!(dispatches[0].1, 1);
        }
        {
            let s = status.read();
            assert_eq!(s.state, MonitorState::Observing);
            assert!(s.last_snapshot_at.is_some());
            assert!(s.last_breach_summary.as_deref().unwrap().contains("DAILY_DD"));
            assert_eq!(s.consecutive_failures, 0);
            // The first snapshot's anchoring is surfaced in the status view.
            assert_eq!(s.recent_anchor_events.len(), 1);
            assert_eq!(
                s.recent_anchor_events[0].date,
                chrono::NaiveDate::from_ymd_opt(2025, 3, 12).unwrap()
            );
            assert_eq!(s.recent_anchor_events[0].day_start_equity, 100_000.0);
        }

        tx.send(true).unwrap();
        run.await.unwrap();
        assert_eq!(status.read().state, MonitorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_loop() {
        let adapter = FakeAdapter::new(vec![Step::ConnectOk]);
        let (monitor, status, tx, _sink) = harness(adapter);

        let run = tokio::spawn(monitor.run());
        tokio::time::sleep(Duration::from_millis(1500)).await;

        tx.send(true).unwrap();
        run.await.unwrap();

        assert_eq!(status.read().state, MonitorState::Stopped);
    }
}
