//! Orchestrator: owns the schedules and routes work between stages.

use crate::creator::OnChainCreator;
use crate::downloader::DownloadWorker;
use crate::error::SyncError;
use crate::metrics;
use crate::poller::MetadataPoller;
use crate::quota::QuotaTracker;
use crate::uploader::Uploader;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info, warn};

/// Cadence of the download/create/upload dispatch loop.
const DISPATCH_PERIOD: Duration = Duration::from_secs(60);
/// Cadence of the UTC-midnight quota reset check.
const QUOTA_CHECK_PERIOD: Duration = Duration::from_secs(60);

/// Top-level scheduling loop for the sync pipeline.
pub struct Orchestrator {
    poller: Arc<MetadataPoller>,
    downloader: Arc<DownloadWorker>,
    creator: Arc<OnChainCreator>,
    uploader: Arc<Uploader>,
    quota: Arc<QuotaTracker>,
    polling_period: Duration,
    probe_period: Duration,
    shutdown_grace: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        poller: Arc<MetadataPoller>,
        downloader: Arc<DownloadWorker>,
        creator: Arc<OnChainCreator>,
        uploader: Arc<Uploader>,
        quota: Arc<QuotaTracker>,
        polling_period: Duration,
        probe_period: Duration,
        shutdown_grace: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            poller,
            downloader,
            creator,
            uploader,
            quota,
            polling_period,
            probe_period,
            shutdown_grace,
            shutdown,
        }
    }

    /// Run until the shutdown flag flips, then drain and return.
    pub async fn run(&mut self) -> Result<(), SyncError> {
        info!(
            polling_period_s = self.polling_period.as_secs(),
            probe_period_s = self.probe_period.as_secs(),
            "Orchestrator starting"
        );

        let mut poll_timer = interval(self.polling_period);
        let mut dispatch_timer = interval(DISPATCH_PERIOD);
        let mut probe_timer = interval(self.probe_period);
        let mut quota_timer = interval(QUOTA_CHECK_PERIOD);
        let mut shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                _ = poll_timer.tick() => {
                    self.poll_cycle().await;
                }

                _ = dispatch_timer.tick() => {
                    self.dispatch_cycle().await;
                }

                _ = probe_timer.tick() => {
                    self.uploader.probe_response_times().await;
                }

                _ = quota_timer.tick() => {
                    self.quota.reset_if_new_day(Utc::now());
                }
            }
        }

        self.drain().await;
        info!("Orchestrator stopped");
        Ok(())
    }

    async fn poll_cycle(&self) {
        match self.poller.run_cycle().await {
            Ok(report) => {
                metrics::VIDEOS_DISCOVERED.inc_by(report.videos_discovered as f64);
                // Channel data is fresh; voucher halts expire here.
                self.creator.clear_voucher_halts().await;
            }
            Err(SyncError::QuotaExhausted(pool)) => {
                warn!(pool, "Poll cycle aborted: QuotaLimitExceeded");
            }
            Err(e) => {
                error!(error = %e, "Poll cycle failed");
            }
        }
    }

    async fn dispatch_cycle(&self) {
        match self.downloader.run_cycle().await {
            Ok(report) => metrics::VIDEOS_STAGED.inc_by(report.staged as f64),
            Err(e) => error!(error = %e, "Download drain failed"),
        }

        match self.creator.run_cycle().await {
            Ok(report) => metrics::VIDEOS_CREATED.inc_by(report.created as f64),
            Err(e) => error!(error = %e, "Creation pass failed"),
        }

        match self.uploader.run_cycle().await {
            Ok(report) => metrics::VIDEOS_UPLOADED.inc_by(report.uploaded as f64),
            Err(e) => error!(error = %e, "Upload drain failed"),
        }
    }

    /// Drain stages in reverse order (UP, OC, DL, MP admissions are already
    /// stopped) within the grace period; whatever survives is abandoned.
    /// State stays safe: transitions are only written after external
    /// acknowledgements.
    async fn drain(&self) {
        info!(grace_s = self.shutdown_grace.as_secs(), "Draining stages before exit");

        let drain_all = async {
            if let Err(e) = self.uploader.run_cycle().await {
                warn!(error = %e, "Uploader drain failed");
            }
            if let Err(e) = self.creator.run_cycle().await {
                warn!(error = %e, "Creator drain failed");
            }
            if let Err(e) = self.downloader.run_cycle().await {
                warn!(error = %e, "Downloader drain failed");
            }
        };

        if tokio::time::timeout(self.shutdown_grace, drain_all).await.is_err() {
            warn!("Drain grace period elapsed, abandoning in-flight work");
        }
    }
}
