//! Starts each collector on its configured cadence, bounds feed
//! concurrency (inside the feed collector itself), and handles graceful
//! shutdown.
//!
//! Each collector runs as an independent in-process periodic task,
//! coordinated only through the cursor table — no shared job queue or
//! worker pool. Cancellation uses `tokio_util::sync::CancellationToken`,
//! the ecosystem's standard single-signal-to-many-tasks primitive.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::store::Store;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Owns the set of collector tasks and the shared cancellation token.
pub struct Supervisor {
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Supervisor {
    /// Spawn one recurring task per enabled collector. Each task is a
    /// loop: `run_cycle().await; sleep(interval-or-cancelled)`. Disabled
    /// collectors (per config) are never spawned.
    pub fn start(store: Store, config: Arc<Config>) -> Self {
        let cancel = CancellationToken::new();
        let mut handles = Vec::new();

        if config.feed_collector.enabled {
            handles.push(spawn_loop(
                "feed",
                cancel.clone(),
                config.feed_collector.poll_interval(),
                {
                    let store = store.clone();
                    let config = config.clone();
                    move || {
                        let store = store.clone();
                        let config = config.clone();
                        async move {
                            crate::collectors::feed::run_cycle(
                                &store,
                                &config.feeds,
                                &config.feed_collector,
                            )
                            .await;
                        }
                    }
                },
            ));
        }

        if config.nvd.common.enabled {
            handles.push(spawn_loop(
                "nvd",
                cancel.clone(),
                config.nvd.common.poll_interval(),
                {
                    let store = store.clone();
                    let config = config.clone();
                    move || {
                        let store = store.clone();
                        let config = config.clone();
                        async move {
                            if let Err(e) = crate::collectors::nvd::run_cycle(&store, &config.nvd).await {
                                error!(collector = "nvd", error = %e, "cycle failed, next tick will retry");
                            }
                        }
                    }
                },
            ));
        }

        if config.kev.enabled {
            handles.push(spawn_loop(
                "kev",
                cancel.clone(),
                config.kev.poll_interval(),
                {
                    let store = store.clone();
                    let config = config.clone();
                    move || {
                        let store = store.clone();
                        let config = config.clone();
                        async move {
                            if let Err(e) = crate::collectors::kev::run_cycle(&store, &config.kev).await {
                                error!(collector = "kev", error = %e, "cycle failed, next tick will retry");
                            }
                        }
                    }
                },
            ));
        }

        if config.epss.enabled {
            handles.push(spawn_loop(
                "epss",
                cancel.clone(),
                config.epss.poll_interval(),
                {
                    let store = store.clone();
                    let config = config.clone();
                    move || {
                        let store = store.clone();
                        let config = config.clone();
                        async move {
                            if let Err(e) = crate::collectors::epss::run_cycle(&store, &config.epss).await {
                                error!(collector = "epss", error = %e, "cycle failed, next tick will retry");
                            }
                        }
                    }
                },
            ));
        }

        Self { handles, cancel }
    }

    /// A clone of the shared cancellation token, for wiring into the
    /// health server or an OS signal handler.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Signal cancellation and wait for every collector task to return,
    /// up to a 10-second grace window.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let join_all = futures::future::join_all(self.handles);

        if tokio::time::timeout(SHUTDOWN_GRACE, join_all).await.is_err() {
            error!("collectors did not finish within the shutdown grace window");
        } else {
            info!("all collectors shut down cleanly");
        }
    }
}

/// Build one recurring task: run a cycle, then sleep until the next tick
/// or until cancelled, whichever comes first. Cancellation is observed at
/// the sleep suspension point; an in-flight cycle only unwinds at its own
/// internal suspension points (network/DB awaits), which each collector's
/// `run_cycle` implementation reaches naturally between pages/batches.
fn spawn_loop<F, Fut>(
    name: &'static str,
    cancel: CancellationToken,
    interval: Duration,
    mut make_cycle: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        loop {
            info!(collector = name, "starting cycle");
            make_cycle().await;

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => {
                    info!(collector = name, "cancellation observed, exiting");
                    break;
                }
            }
        }
    })
}
