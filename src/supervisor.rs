// =============================================================================
// Supervisor — owns the monitor fleet, per-account failure isolation
// =============================================================================
//
// Startup resolves Rules and builds an adapter for every enabled account; an
// account that cannot start is recorded as FAILED and the rest run anyway.
// Shutdown broadcasts cancellation, waits up to the grace period per monitor,
// then aborts stragglers.
// =============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::time::{timeout, Duration};
use tracing::{error, info, warn};

use crate::config::MonitorConfig;
use crate::monitor::{AccountMonitor, AccountStatus, MonitorState, StatusCell};
use crate::notify::Notifier;
use crate::platform::build_adapter;
use crate::resolver::Resolver;

/// How long monitors get to wind down after cancellation.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Cloneable read handle over every account's status cell.
#[derive(Clone)]
pub struct StatusView {
    cells: Arc<Vec<StatusCell>>,
}

impl StatusView {
    /// Copy-on-read snapshot of all account statuses.
    pub fn snapshot(&self) -> Vec<AccountStatus> {
        self.cells.iter().map(|cell| cell.read().clone()).collect()
    }
}

/// The running monitor fleet.
pub struct Supervisor {
    status: StatusView,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<(String, tokio::task::JoinHandle<()>)>,
}

impl Supervisor {
    /// Resolve rules, build adapters, and spawn one monitor per enabled
    /// account. Individual account failures are isolated: they are recorded
    /// in the status view and do not abort the rest of the fleet.
    pub async fn start(
        config: &MonitorConfig,
        resolver: Arc<Resolver>,
        notifier: Notifier,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut cells: Vec<StatusCell> = Vec::new();
        let mut handles = Vec::new();

        for account in config.enabled_accounts() {
            let cell: StatusCell = Arc::new(RwLock::new(AccountStatus::new(
                &account.label,
                &account.account_id,
            )));
            cells.push(cell.clone());

            // Tier chain: store (keyed by the account's real firm and program
            // id) → preset (explicit reference wins over the firm name) →
            // inline custom.
            let resolved = resolver
                .resolve_with_preset(
                    &account.firm,
                    account.program_id.as_deref(),
                    account.preset_name(),
                    account.custom_rules(),
                )
                .await;

            let rules = match resolved {
                Ok((rules, source)) => {
                    info!(
                        account = %account.label,
                        firm = %account.firm,
                        rules = %rules.name,
                        source = %source,
                        "rules resolved"
                    );
                    rules
                }
                Err(e) => {
                    error!(account = %account.label, error = %e,
                           "rule resolution failed — account will not be monitored");
                    let mut status = cell.write();
                    status.state = MonitorState::Failed;
                    status.last_error = Some(e.to_string());
                    continue;
                }
            };

            let adapter = match build_adapter(account) {
                Ok(adapter) => adapter,
                Err(e) => {
                    error!(account = %account.label, error = %e,
                           "adapter construction failed — account will not be monitored");
                    let mut status = cell.write();
                    status.state = MonitorState::Failed;
                    status.last_error = Some(e.to_string());
                    continue;
                }
            };

            let monitor = AccountMonitor::new(
                account.clone(),
                rules,
                adapter,
                notifier.clone(),
                cell,
                shutdown_rx.clone(),
            );
            handles.push((account.label.clone(), tokio::spawn(monitor.run())));
        }

        info!(
            monitors = handles.len(),
            accounts = cells.len(),
            "supervisor started"
        );

        Self {
            status: StatusView {
                cells: Arc::new(cells),
            },
            shutdown_tx,
            handles,
        }
    }

    /// Read handle for health endpoints and the CLI status line.
    pub fn status_view(&self) -> StatusView {
        self.status.clone()
    }

    /// Number of monitors actually spawned.
    pub fn running_monitors(&self) -> usize {
        self.handles.len()
    }

    /// Cancel all monitors and wait out the grace period.
    pub async fn shutdown(self) {
        info!("supervisor shutting down");
        let _ = self.shutdown_tx.send(true);

        for (label, handle) in self.handles {
            let abort = handle.abort_handle();
            match timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(account = %label, error = %e, "monitor task panicked"),
                Err(_) => {
                    warn!(account = %label, "monitor exceeded shutdown grace period — aborting");
                    abort.abort();
                }
            }
        }
        info!("supervisor stopped");
    }
}
