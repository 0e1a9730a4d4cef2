// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Maintenance operations over a store.
//!
//! [`MaintenanceService`] is what applications call to bring balances up to
//! date. Each refresh runs in a single store transaction: it either commits
//! the drained pending set together with the balance writes, or rolls back
//! and leaves every pending entry in place for the next attempt.
//!
//! Refreshes block for time proportional to the pending set (incremental)
//! or the whole ledger (full), so they belong on a worker thread.

use crate::error::LedgerResult;
use crate::reconcile::{self, Discrepancy, RebuildReport, ReconcileReport};
use crate::store::TransactionalStore;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Refresh and housekeeping entry points for one store.
#[derive(Debug)]
pub struct MaintenanceService<S> {
    store: Arc<S>,
    /// Held for the duration of a refresh so two passes never drain at once.
    refresh_lock: Mutex<()>,
}

impl<S: TransactionalStore> MaintenanceService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Incrementally reconciles every pending pair. Returns elapsed time.
    ///
    /// A no-op when nothing is pending.
    ///
    /// # Errors
    ///
    /// Storage failures propagate unchanged; the pending set is intact
    /// afterwards and the call can be retried.
    pub fn refresh_materialized_views(&self) -> LedgerResult<Duration> {
        let started = Instant::now();
        let report = self.reconcile()?;
        let elapsed = started.elapsed();
        if report.pairs_examined == 0 {
            debug!(?elapsed, "refresh found nothing pending");
        } else {
            info!(
                pairs = report.pairs_examined,
                upserted = report.rows_upserted,
                deleted = report.rows_deleted,
                ?elapsed,
                "materialized balances refreshed"
            );
        }
        Ok(elapsed)
    }

    /// Rebuilds every balance row from the ledger. Returns elapsed time.
    pub fn full_refresh_materialized_views(&self) -> LedgerResult<Duration> {
        let started = Instant::now();
        let report = self.full_reconcile()?;
        let elapsed = started.elapsed();
        info!(
            removed = report.rows_removed,
            written = report.rows_written,
            pending_cleared = report.pending_cleared,
            ?elapsed,
            "materialized balances rebuilt"
        );
        Ok(elapsed)
    }

    /// Incremental pass, returning what it changed.
    pub fn reconcile(&self) -> LedgerResult<ReconcileReport> {
        let _guard = self.refresh_lock.lock();
        self.store
            .transaction(|tx| reconcile::reconcile_pending(tx))
            .inspect_err(|err| warn!(%err, "incremental refresh rolled back"))
    }

    /// Full rebuild, returning what it changed.
    pub fn full_reconcile(&self) -> LedgerResult<RebuildReport> {
        let _guard = self.refresh_lock.lock();
        self.store
            .transaction(|tx| reconcile::rebuild_all(tx))
            .inspect_err(|err| warn!(%err, "full refresh rolled back"))
    }

    /// Number of pending-change entries, duplicates included.
    pub fn pending_changes(&self) -> LedgerResult<usize> {
        self.store.transaction(|tx| tx.pending_count())
    }

    /// Lists pairs whose stored row differs from a full rebuild.
    pub fn verify(&self) -> LedgerResult<Vec<Discrepancy>> {
        self.store.transaction(|tx| reconcile::verify(&*tx))
    }

    pub fn reindex(&self) -> LedgerResult<Duration> {
        timed("reindex", || self.store.reindex())
    }

    pub fn vacuum(&self) -> LedgerResult<Duration> {
        timed("vacuum", || self.store.vacuum())
    }

    pub fn analyze(&self) -> LedgerResult<Duration> {
        timed("analyze", || self.store.analyze())
    }
}

fn timed(task: &'static str, run: impl FnOnce() -> LedgerResult<()>) -> LedgerResult<Duration> {
    let started = Instant::now();
    run()?;
    let elapsed = started.elapsed();
    info!(task, ?elapsed, "maintenance task finished");
    Ok(elapsed)
}
