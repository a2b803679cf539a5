//! Periodic driver: one check loop per active resource of a pipeline.

use crate::clock::Clock;
use crate::error::ScanError;
use crate::scanner::ResourceScanner;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct ScanLoop {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// Keeps a [`ResourceScanner::run`] loop going for every active resource.
///
/// Build the scanner with
/// [`with_cancellation`](ResourceScanner::with_cancellation) using the token
/// later passed to [`run`](Self::run) so in-flight checks see it too.
pub struct Radar {
    scanner: Arc<ResourceScanner>,
    clock: Arc<dyn Clock>,
    sync_interval: Duration,
}

impl Radar {
    pub fn new(scanner: Arc<ResourceScanner>, clock: Arc<dyn Clock>, sync_interval: Duration) -> Self {
        Self {
            scanner,
            clock,
            sync_interval,
        }
    }

    /// Run until `cancel` fires, then stop every loop and wait for them.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut loops: HashMap<String, ScanLoop> = HashMap::new();

        loop {
            self.sync(&mut loops, &cancel).await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.clock.sleep(self.sync_interval) => {}
            }
        }

        for (_, scan_loop) in loops.drain() {
            scan_loop.stop.cancel();
            if let Err(err) = scan_loop.handle.await {
                tracing::error!(error = %err, "scan loop panicked");
            }
        }
        tracing::info!(pipeline = self.scanner.pipeline().pipeline_name(), "radar stopped");
    }

    async fn sync(&self, loops: &mut HashMap<String, ScanLoop>, cancel: &CancellationToken) {
        let names = match self.scanner.pipeline().resource_names().await {
            Ok(names) => names,
            Err(err) => {
                tracing::warn!(error = %err, "failed to list resources");
                return;
            }
        };

        let stale: Vec<String> = loops
            .iter()
            .filter(|(name, scan_loop)| !names.contains(name) || scan_loop.handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect();
        for name in stale {
            let Some(scan_loop) = loops.remove(&name) else {
                continue;
            };
            scan_loop.stop.cancel();
            // A running loop exits at its next wait; only finished ones are joined.
            if scan_loop.handle.is_finished() {
                if let Err(err) = scan_loop.handle.await {
                    tracing::error!(resource = %name, error = %err, "scan loop panicked");
                }
            }
        }

        for name in names {
            if loops.contains_key(&name) {
                continue;
            }
            tracing::debug!(resource = %name, "starting scan loop");
            let stop = cancel.child_token();
            let handle = tokio::spawn(scan_loop(
                self.scanner.clone(),
                self.clock.clone(),
                name.clone(),
                stop.clone(),
            ));
            loops.insert(name, ScanLoop { stop, handle });
        }
    }
}

async fn scan_loop(
    scanner: Arc<ResourceScanner>,
    clock: Arc<dyn Clock>,
    name: String,
    stop: CancellationToken,
) {
    loop {
        let (interval, result) = scanner.run(&name).await;
        match result {
            Ok(()) => {}
            Err(ScanError::FailedToAcquireLock) => {
                tracing::debug!(resource = %name, "resource is being checked elsewhere");
            }
            Err(ScanError::ResourceNotFound(_)) => {
                tracing::info!(resource = %name, "resource disappeared, stopping scan loop");
                return;
            }
            Err(err) => {
                tracing::warn!(resource = %name, error = %err, "check failed");
            }
        }

        tokio::select! {
            _ = stop.cancelled() => return,
            _ = clock.sleep(interval) => {}
        }
    }
}
