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

//! Balance reconciliation.
//!
//! Keeps the materialized `(account, currency) -> balance` rows equal to
//!
//! ```text
//! sum(amount where target = account) - sum(amount where source = account)
//! ```
//!
//! over the transfers of that currency, with a row present exactly when at
//! least one transfer references the pair.
//!
//! Two paths reach that state:
//!
//! - [`reconcile_pending`] drains the change tracker and re-derives only the
//!   drained pairs from the current ledger. Balances are never adjusted by
//!   deltas, so a pair marked many times, or reconciled twice, ends up with
//!   the same row.
//! - [`rebuild_all`] discards every row and rebuilds from one grouped
//!   aggregation over the ledger. It is the reference the incremental path
//!   must always agree with.
//!
//! Both functions run inside a caller-supplied transaction and leave
//! atomicity to it: a failure anywhere must roll back the drain together
//! with the writes.

use crate::base::BalanceKey;
use crate::error::{LedgerError, LedgerResult};
use crate::store::{BalanceStore, LedgerReader, PendingChangeStore};
use std::collections::BTreeSet;
use tracing::{debug, trace};

/// Outcome of an incremental pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Distinct pairs drained from the change tracker.
    pub pairs_examined: usize,
    /// Rows inserted or rewritten with a new balance.
    pub rows_upserted: usize,
    /// Rows removed because no transfer references their pair any more.
    pub rows_deleted: usize,
    /// Pairs whose stored row (or absence of one) was already correct.
    pub rows_unchanged: usize,
}

/// Outcome of a full rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildReport {
    /// Rows present before the rebuild.
    pub rows_removed: usize,
    /// Rows written by the rebuild.
    pub rows_written: usize,
    /// Pending-change entries discarded as already covered.
    pub pending_cleared: usize,
}

/// What happened to a single pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairOutcome {
    Upserted(i64),
    Deleted,
    Unchanged,
}

/// A pair whose stored row disagrees with the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Discrepancy {
    pub key: BalanceKey,
    /// Row currently stored, if any.
    pub stored: Option<i64>,
    /// Row the ledger implies, if any.
    pub expected: Option<i64>,
}

/// Computes `sum_incoming - sum_outgoing` for `key` from the ledger.
pub fn true_balance<T>(ledger: &T, key: BalanceKey) -> LedgerResult<i64>
where
    T: LedgerReader + ?Sized,
{
    let incoming = ledger.sum_incoming(key)?;
    let outgoing = ledger.sum_outgoing(key)?;
    incoming
        .checked_sub(outgoing)
        .ok_or(LedgerError::Overflow(key))
}

/// Brings the stored row for `key` in line with the current ledger.
///
/// # Errors
///
/// - [`LedgerError::InconsistentPair`] - the ledger reports a nonzero
///   balance for a pair no transfer references.
/// - [`LedgerError::Overflow`] - the pair's sums leave the `i64` range.
/// - [`LedgerError::Storage`] - any read or write failed.
pub fn reconcile_pair<T>(store: &mut T, key: BalanceKey) -> LedgerResult<PairOutcome>
where
    T: LedgerReader + BalanceStore + ?Sized,
{
    let balance = true_balance(&*store, key)?;
    let referenced = store.exists_any_transfer(key)?;

    if !referenced {
        if balance != 0 {
            return Err(LedgerError::InconsistentPair { key, balance });
        }
        return Ok(if store.delete_balance(key)? {
            PairOutcome::Deleted
        } else {
            PairOutcome::Unchanged
        });
    }

    if store.balance(key)? == Some(balance) {
        return Ok(PairOutcome::Unchanged);
    }
    store.upsert_balance(key, balance)?;
    Ok(PairOutcome::Upserted(balance))
}

/// Drains the change tracker and reconciles every drained pair.
///
/// Returns immediately when nothing is pending. Pairs are independent, so
/// the order they are processed in does not affect the result.
pub fn reconcile_pending<T>(store: &mut T) -> LedgerResult<ReconcileReport>
where
    T: LedgerReader + BalanceStore + PendingChangeStore + ?Sized,
{
    let pending = store.drain_all()?;
    reconcile_pairs(store, &pending)
}

/// Reconciles an explicit set of pairs without touching the change tracker.
pub fn reconcile_pairs<T>(store: &mut T, pairs: &BTreeSet<BalanceKey>) -> LedgerResult<ReconcileReport>
where
    T: LedgerReader + BalanceStore + ?Sized,
{
    let mut report = ReconcileReport {
        pairs_examined: pairs.len(),
        ..ReconcileReport::default()
    };
    for key in pairs {
        let outcome = reconcile_pair(store, *key)?;
        trace!(%key, ?outcome, "reconciled pair");
        match outcome {
            PairOutcome::Upserted(_) => report.rows_upserted += 1,
            PairOutcome::Deleted => report.rows_deleted += 1,
            PairOutcome::Unchanged => report.rows_unchanged += 1,
        }
    }
    if !pairs.is_empty() {
        debug!(
            pairs = report.pairs_examined,
            upserted = report.rows_upserted,
            deleted = report.rows_deleted,
            "incremental reconcile applied"
        );
    }
    Ok(report)
}

/// Discards every balance row and rebuilds them from the ledger.
///
/// Also clears the change tracker: everything pending is covered by the
/// rebuild.
pub fn rebuild_all<T>(store: &mut T) -> LedgerResult<RebuildReport>
where
    T: LedgerReader + BalanceStore + PendingChangeStore + ?Sized,
{
    let rows_removed = store.truncate_balances()?;
    let active = store.all_distinct_pairs_with_activity()?;
    let balances = store.net_balances()?;
    if let Some((key, balance)) = balances.iter().find(|(key, _)| !active.contains(*key)) {
        return Err(LedgerError::InconsistentPair {
            key: *key,
            balance: *balance,
        });
    }
    for key in &active {
        store.upsert_balance(*key, balances.get(key).copied().unwrap_or_default())?;
    }
    let pending_cleared = store.pending_count()?;
    store.drain_all()?;

    let report = RebuildReport {
        rows_removed,
        rows_written: active.len(),
        pending_cleared,
    };
    debug!(
        removed = report.rows_removed,
        written = report.rows_written,
        pending_cleared = report.pending_cleared,
        "full rebuild applied"
    );
    Ok(report)
}

/// Compares the stored rows against what a full rebuild would produce.
///
/// Read-only. Pairs still waiting in the change tracker show up here too,
/// so the result is only meaningful right after a reconcile pass.
pub fn verify<T>(store: &T) -> LedgerResult<Vec<Discrepancy>>
where
    T: LedgerReader + BalanceStore + ?Sized,
{
    let stored = store.balances()?;
    let expected = store.net_balances()?;
    let keys: BTreeSet<BalanceKey> = stored.keys().chain(expected.keys()).copied().collect();

    Ok(keys
        .into_iter()
        .filter_map(|key| {
            let stored = stored.get(&key).copied();
            let expected = expected.get(&key).copied();
            (stored != expected).then_some(Discrepancy {
                key,
                stored,
                expected,
            })
        })
        .collect())
}
