// =============================================================================
// Notifier — fan-out of breach dispatches over a bounded drop-oldest queue
// =============================================================================
//
// Monitors push dispatches without blocking; a single drain task delivers
// them to every registered sink. When the queue is full the oldest dispatch
// for the same account is dropped (falling back to the global oldest) and
// counted, so a stuck terminal can never back up an evaluator.
//
// Sink failures are logged and swallowed: monitoring must not die because a
// notification failed.
// =============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossterm::style::Stylize;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::rules::RuleBreach;
use crate::types::BreachLevel;

/// Default queue capacity, in dispatches.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// A delivery target for breach panels.
pub trait NotifySink: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver one dispatch. Never called with an empty breach list.
    fn deliver(&self, account_label: &str, breaches: &[RuleBreach]) -> anyhow::Result<()>;
}

/// One queued delivery.
#[derive(Debug, Clone)]
struct Dispatch {
    account_label: String,
    breaches: Vec<RuleBreach>,
}

struct Shared {
    queue: Mutex<VecDeque<Dispatch>>,
    wakeup: Notify,
    dropped: AtomicU64,
    capacity: usize,
}

/// Cloneable handle monitors use to enqueue dispatches.
#[derive(Clone)]
pub struct Notifier {
    shared: Arc<Shared>,
}

impl Notifier {
    /// Create the notifier and spawn its drain task over `sinks`. The sink
    /// registry is fixed from this point on.
    pub fn start(
        sinks: Vec<Arc<dyn NotifySink>>,
        capacity: usize,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            wakeup: Notify::new(),
            dropped: AtomicU64::new(0),
            capacity,
        });

        let drain_shared = shared.clone();
        let handle = tokio::spawn(async move {
            loop {
                let batch: Vec<Dispatch> = {
                    let mut queue = drain_shared.queue.lock();
                    queue.drain(..).collect()
                };

                for dispatch in &batch {
                    for sink in &sinks {
                        if let Err(e) = sink.deliver(&dispatch.account_label, &dispatch.breaches) {
                            warn!(
                                sink = sink.name(),
                                account = %dispatch.account_label,
                                error = %e,
                                "notification sink failed"
                            );
                        }
                    }
                }

                drain_shared.wakeup.notified().await;
            }
        });

        (Self { shared }, handle)
    }

    /// Enqueue a dispatch. An empty breach list is a no-op. Never blocks; on
    /// overflow the oldest dispatch for the same account (or the global
    /// oldest) is dropped and counted.
    pub fn dispatch(&self, account_label: &str, breaches: Vec<RuleBreach>) {
        if breaches.is_empty() {
            return;
        }

        {
            let mut queue = self.shared.queue.lock();
            if queue.len() >= self.shared.capacity {
                let victim = queue
                    .iter()
                    .position(|d| d.account_label == account_label)
                    .unwrap_or(0);
                queue.remove(victim);
                let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 {
                    warn!(account = account_label, "notification queue full, dropping oldest");
                } else {
                    debug!(account = account_label, dropped, "notification dispatch dropped");
                }
            }
            queue.push_back(Dispatch {
                account_label: account_label.to_string(),
                breaches,
            });
        }

        self.shared.wakeup.notify_one();
    }

    /// Dispatches dropped because the queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn queued(&self) -> Vec<(String, usize)> {
        self.shared
            .queue
            .lock()
            .iter()
            .map(|d| (d.account_label.clone(), d.breaches.len()))
            .collect()
    }
}

// =============================================================================
// Terminal sink
// =============================================================================

/// Default sink: one colored panel per dispatch on stdout.
pub struct TerminalSink;

impl TerminalSink {
    fn render(account_label: &str, breaches: &[RuleBreach]) -> String {
        let mut out = String::new();
        let worst = breaches
            .iter()
            .map(|b| b.level)
            .max()
            .unwrap_or(BreachLevel::Warn);

        let header = format!(
            "── {account_label} · {} · {} finding(s) ",
            breaches
                .first()
                .map(|b| b.observed_at.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
            breaches.len()
        );
        let header = match worst {
            BreachLevel::Hard => header.red().bold().to_string(),
            BreachLevel::Warn => header.yellow().bold().to_string(),
        };
        out.push_str(&header);
        out.push('\n');

        for breach in breaches {
            let tag = match breach.level {
                BreachLevel::Hard => format!("[{} {}]", breach.level, breach.code)
                    .red()
                    .to_string(),
                BreachLevel::Warn => format!("[{} {}]", breach.level, breach.code)
                    .yellow()
                    .to_string(),
            };
            let line = match (breach.value, breach.threshold) {
                (Some(value), Some(threshold)) => format!(
                    "  {tag} {} (value {value:.2}, limit {threshold:.2})",
                    breach.message
                ),
                _ => format!("  {tag} {}", breach.message),
            };
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}

impl NotifySink for TerminalSink {
    fn name(&self) -> &str {
        "terminal"
    }

    fn deliver(&self, account_label: &str, breaches: &[RuleBreach]) -> anyhow::Result<()> {
        print!("{}", Self::render(account_label, breaches));
        Ok(())
    }
}
