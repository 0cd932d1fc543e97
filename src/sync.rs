//! Incremental synchronizer
//!
//! Decides on each periodic check whether the store needs a full reload
//! (COLD), an incremental delta (the incremental interval elapsed), or
//! nothing. Enforces single-flight: at most one load of either kind per
//! store at a time; a second trigger while one is in flight is dropped,
//! never queued.

use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::data::{DataSource, FetchError};
use crate::store::{CacheState, LoadReport, RecordStore};
use crate::{RawTradeRow, RecordKind, TradeRecord};

/// What a sync check decided to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    FullReload,
    Incremental { since: DateTime<Utc> },
    Noop,
}

/// Guard held for the duration of one load; dropping it releases the slot.
///
/// Owns its handle so holding a guard does not borrow the synchronizer.
pub struct FlightGuard(Arc<AtomicBool>);

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Plans and executes store refreshes against a data source
pub struct Synchronizer<S> {
    source: S,
    in_flight: Arc<AtomicBool>,
}

impl<S: DataSource> Synchronizer<S> {
    pub fn new(source: S) -> Self {
        Synchronizer {
            source,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Try to claim the single load slot.
    ///
    /// Returns None when a load is already in flight; the caller drops the
    /// trigger in that case.
    pub fn begin(&self) -> Option<FlightGuard> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("load already in flight, dropping trigger");
            None
        } else {
            Some(FlightGuard(Arc::clone(&self.in_flight)))
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Decide what (if anything) the store needs right now
    pub fn plan(&self, store: &RecordStore, now: DateTime<Utc>) -> SyncAction {
        match store.state_at(now) {
            CacheState::Cold => SyncAction::FullReload,
            CacheState::Hot | CacheState::Warm => match store.last_incremental() {
                Some(last) => {
                    let interval = Duration::seconds(store.config().incremental_interval_secs);
                    if now - last >= interval {
                        SyncAction::Incremental { since: last }
                    } else {
                        SyncAction::Noop
                    }
                }
                None => SyncAction::Incremental { since: now },
            },
        }
    }

    /// Replace the store contents with fetched rows.
    ///
    /// `expected_version` implements advisory cancellation: if the store
    /// advanced while the fetch was outstanding, the result is discarded
    /// and `None` returned.
    pub async fn apply_full(
        &self,
        store: &mut RecordStore,
        completed: Vec<RawTradeRow>,
        active: Vec<RawTradeRow>,
        expected_version: u64,
    ) -> Option<LoadReport> {
        if store.version() != expected_version {
            debug!("full load superseded (store version advanced), discarding");
            return None;
        }
        Some(store.bulk_load(convert_rows(completed, active)).await)
    }

    /// Merge fetched rows into the store, same cancellation rule as
    /// `apply_full`
    pub async fn apply_incremental(
        &self,
        store: &mut RecordStore,
        completed: Vec<RawTradeRow>,
        active: Vec<RawTradeRow>,
        expected_version: u64,
    ) -> Option<LoadReport> {
        if store.version() != expected_version {
            debug!("incremental load superseded (store version advanced), discarding");
            return None;
        }
        Some(store.merge_incremental(convert_rows(completed, active)).await)
    }

    /// Fetch both record kinds and replace the store contents
    pub async fn run_full(
        &self,
        store: &mut RecordStore,
        expected_version: u64,
    ) -> Result<Option<LoadReport>, FetchError> {
        let completed = self.source.fetch_completed(None).await?;
        let active = self.source.fetch_active(None).await?;
        Ok(self
            .apply_full(store, completed, active, expected_version)
            .await)
    }

    /// Fetch only records newer than `since` and merge them in
    pub async fn run_incremental(
        &self,
        store: &mut RecordStore,
        since: DateTime<Utc>,
        expected_version: u64,
    ) -> Result<Option<LoadReport>, FetchError> {
        let completed = self.source.fetch_completed(Some(since)).await?;
        let active = self.source.fetch_active(Some(since)).await?;
        Ok(self
            .apply_incremental(store, completed, active, expected_version)
            .await)
    }
}

/// Tag wire rows with their kind and convert them for the store
pub fn convert_rows(completed: Vec<RawTradeRow>, active: Vec<RawTradeRow>) -> Vec<TradeRecord> {
    completed
        .into_iter()
        .map(|row| row.into_record(RecordKind::Completed))
        .chain(
            active
                .into_iter()
                .map(|row| row.into_record(RecordKind::Active)),
        )
        .collect()
}
