//! Application context
//!
//! `AnalyticsEngine` is the explicitly-constructed owner of the record
//! store, synchronizer and recovery orchestrator. UI-level callers read
//! synchronously through `apply_filter`/`get_metrics` and refresh through
//! the recovery-wrapped `refresh_full`/`refresh_incremental`.

use anyhow::Result;
use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::data::{DataSource, HttpDataSource};
use crate::error::EnhancedError;
use crate::filter::{filter_records, FilterSpec};
use crate::metrics;
use crate::recovery::{Recovered, RecoveryOrchestrator, RecoveryTelemetry, UserNotification};
use crate::snapshot::SnapshotStore;
use crate::store::{CacheStatistics, LoadReport, RecordStore};
use crate::sync::{SyncAction, Synchronizer};
use crate::{MetricsSnapshot, TradeRecord};

/// How a refresh request ended
#[derive(Debug)]
pub enum RefreshOutcome {
    /// Store updated from the remote datastore
    Completed { report: LoadReport },
    /// Remote unavailable; the prior cached dataset is being served
    ServedCached { message: String },
    /// Remote unavailable and no usable cache; a placeholder stands in
    Degraded { message: String },
    /// Another load finished first; this result was discarded
    Superseded,
    /// A load was already in flight; this trigger was dropped
    AlreadyRunning,
    /// The periodic check decided nothing was needed
    Noop,
}

/// Top-level analytics context
pub struct AnalyticsEngine<S: DataSource = HttpDataSource> {
    store: RecordStore,
    sync: Synchronizer<S>,
    recovery: RecoveryOrchestrator,
    snapshots: Option<SnapshotStore>,
}

impl AnalyticsEngine<HttpDataSource> {
    /// Build the production engine from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let source = HttpDataSource::new(
            &config.datastore.base_url,
            config.datastore.api_key.clone(),
            config.datastore.timeout_secs,
        );
        let snapshots = if config.snapshot.enabled {
            Some(SnapshotStore::open(&config.snapshot.db_path)?)
        } else {
            None
        };
        Ok(Self::new(config.clone(), source, snapshots))
    }
}

impl<S: DataSource> AnalyticsEngine<S> {
    pub fn new(config: Config, source: S, snapshots: Option<SnapshotStore>) -> Self {
        let mut engine = AnalyticsEngine {
            store: RecordStore::new(config.cache),
            sync: Synchronizer::new(source),
            recovery: RecoveryOrchestrator::new(config.retry),
            snapshots,
        };
        engine.seed_from_snapshot();
        engine
    }

    /// Seed the store from the persisted snapshot, if one is fresh enough.
    ///
    /// Runs once at construction, before any network fetch.
    fn seed_from_snapshot(&mut self) {
        let Some(snapshots) = &self.snapshots else {
            return;
        };
        let window = Duration::seconds(self.store.config().freshness_window_secs);
        if let Some(snapshot) = snapshots.load_fresh(window) {
            let report = self.store.seed(snapshot.records, snapshot.timestamp);
            info!(
                "Store seeded from snapshot: {} records ({} skipped)",
                report.inserted, report.skipped
            );
        }
    }

    // =========================================================================
    // Synchronous reads
    // =========================================================================

    /// Filtered records from the current store contents. No I/O.
    pub fn apply_filter(&self, spec: &FilterSpec) -> Result<Vec<TradeRecord>, EnhancedError> {
        spec.validate()?;
        Ok(filter_records(self.store.records(), spec, Utc::now()))
    }

    /// Metrics over the filtered subset of the current store contents
    pub fn get_metrics(&self, spec: &FilterSpec) -> Result<MetricsSnapshot, EnhancedError> {
        let filtered = self.apply_filter(spec)?;
        Ok(metrics::compute(&filtered))
    }

    pub fn get_statistics(&self) -> CacheStatistics {
        self.store.statistics()
    }

    pub fn telemetry(&self) -> &RecoveryTelemetry {
        self.recovery.telemetry()
    }

    /// Drain user notifications recorded by the recovery pipeline
    pub fn take_notifications(&mut self) -> Vec<UserNotification> {
        self.recovery.take_notifications()
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn source(&self) -> &S {
        self.sync.source()
    }

    // =========================================================================
    // Refresh operations
    // =========================================================================

    /// Replace the store from the remote datastore
    pub async fn refresh_full(&mut self) -> Result<RefreshOutcome, EnhancedError> {
        let Some(_flight) = self.sync.begin() else {
            return Ok(RefreshOutcome::AlreadyRunning);
        };
        self.do_full().await
    }

    /// Merge records newer than the last incremental timestamp.
    ///
    /// Falls back to a full reload when the store has never been loaded.
    pub async fn refresh_incremental(&mut self) -> Result<RefreshOutcome, EnhancedError> {
        let Some(_flight) = self.sync.begin() else {
            return Ok(RefreshOutcome::AlreadyRunning);
        };
        match self.store.last_incremental() {
            Some(since) => self.do_incremental(since).await,
            None => self.do_full().await,
        }
    }

    /// Periodic check: full reload, delta, or nothing, per the planner
    pub async fn tick(&mut self) -> Result<RefreshOutcome, EnhancedError> {
        let Some(_flight) = self.sync.begin() else {
            return Ok(RefreshOutcome::AlreadyRunning);
        };
        match self.sync.plan(&self.store, Utc::now()) {
            SyncAction::Noop => {
                debug!("Sync check: store fresh, nothing to do");
                Ok(RefreshOutcome::Noop)
            }
            SyncAction::FullReload => self.do_full().await,
            SyncAction::Incremental { since } => self.do_incremental(since).await,
        }
    }

    /// Reset the store (and the persisted snapshot) to COLD
    pub fn clear(&mut self) {
        self.store.clear();
        if let Some(snapshots) = &self.snapshots {
            if let Err(e) = snapshots.clear() {
                warn!("Failed to clear snapshot slot: {}", e);
            }
        }
    }

    async fn do_full(&mut self) -> Result<RefreshOutcome, EnhancedError> {
        let expected = self.store.version();
        let cache_populated = !self.store.is_empty();
        let source = self.sync.source();

        let fetched = self
            .recovery
            .execute("refresh_full", cache_populated, || async {
                let completed = source.fetch_completed(None).await?;
                let active = source.fetch_active(None).await?;
                Ok((completed, active))
            })
            .await?;

        match fetched {
            Recovered::Fresh((completed, active)) => {
                match self
                    .sync
                    .apply_full(&mut self.store, completed, active, expected)
                    .await
                {
                    Some(report) => {
                        self.persist_snapshot();
                        Ok(RefreshOutcome::Completed { report })
                    }
                    None => Ok(RefreshOutcome::Superseded),
                }
            }
            Recovered::Stale { message } => Ok(RefreshOutcome::ServedCached { message }),
            Recovered::Degraded { message } => Ok(RefreshOutcome::Degraded { message }),
        }
    }

    async fn do_incremental(&mut self, since: chrono::DateTime<Utc>) -> Result<RefreshOutcome, EnhancedError> {
        let expected = self.store.version();
        let cache_populated = !self.store.is_empty();
        let source = self.sync.source();

        let fetched = self
            .recovery
            .execute("refresh_incremental", cache_populated, || async {
                let completed = source.fetch_completed(Some(since)).await?;
                let active = source.fetch_active(Some(since)).await?;
                Ok((completed, active))
            })
            .await?;

        match fetched {
            Recovered::Fresh((completed, active)) => {
                match self
                    .sync
                    .apply_incremental(&mut self.store, completed, active, expected)
                    .await
                {
                    Some(report) => {
                        self.persist_snapshot();
                        Ok(RefreshOutcome::Completed { report })
                    }
                    None => Ok(RefreshOutcome::Superseded),
                }
            }
            Recovered::Stale { message } => Ok(RefreshOutcome::ServedCached { message }),
            Recovered::Degraded { message } => Ok(RefreshOutcome::Degraded { message }),
        }
    }

    /// Best-effort persistence of the current record set; failures are
    /// logged, never surfaced.
    fn persist_snapshot(&self) {
        let Some(snapshots) = &self.snapshots else {
            return;
        };
        let records: Vec<TradeRecord> = self.store.records().cloned().collect();
        let anomalies = self.store.statistics().anomalies;
        if let Err(e) = snapshots.save(records, anomalies) {
            warn!("Snapshot persistence failed: {}", e);
        }
    }
}
