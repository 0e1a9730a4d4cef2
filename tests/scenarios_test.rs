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

//! End-to-end refresh scenarios, run against both store backends.

use chrono::{DateTime, Duration, TimeZone, Utc};
use ledger_views::{
    Account, BalanceKey, Currency, Ledger, LedgerError, MaintenanceService, MemoryStore,
    SqliteStore, TransactionalStore, TransferDraft,
};
use std::sync::Arc;

// =============================================================================
// Helper Functions
// =============================================================================

struct Harness<S> {
    ledger: Ledger<S>,
    maintenance: MaintenanceService<S>,
    usd: Currency,
}

impl<S: TransactionalStore> Harness<S> {
    fn new(store: S) -> Self {
        let store = Arc::new(store);
        let ledger = Ledger::new(Arc::clone(&store));
        let usd = ledger.create_currency("USD", 2).unwrap();
        Self {
            ledger,
            maintenance: MaintenanceService::new(store),
            usd,
        }
    }

    fn account(&self, name: &str) -> Account {
        self.ledger.ensure_account(name).unwrap()
    }

    fn draft(&self, from: &Account, to: &Account, amount: i64, at: DateTime<Utc>) -> TransferDraft {
        TransferDraft::new(at, from.id, to.id, self.usd.id, amount)
    }

    fn balance(&self, account: &Account) -> Option<i64> {
        self.ledger.balance(account.id, self.usd.id).unwrap()
    }

    fn pending(&self) -> usize {
        self.maintenance.pending_changes().unwrap()
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

fn memory() -> Harness<MemoryStore> {
    Harness::new(MemoryStore::new())
}

fn sqlite() -> Harness<SqliteStore> {
    Harness::new(SqliteStore::open_in_memory().unwrap())
}

/// Instantiates one scenario body for every backend.
macro_rules! on_both_backends {
    ($name:ident, $body:ident) => {
        mod $name {
            use super::*;

            #[test]
            fn memory_store() {
                $body(memory());
            }

            #[test]
            fn sqlite_store() {
                $body(sqlite());
            }
        }
    };
}

// =============================================================================
// Scenarios
// =============================================================================

fn full_refresh_after_first_transfer<S: TransactionalStore>(h: Harness<S>) {
    let a1 = h.account("A1");
    let a2 = h.account("A2");
    h.ledger.insert_transfer(h.draft(&a1, &a2, 100, t0())).unwrap();

    h.maintenance.full_refresh_materialized_views().unwrap();

    assert_eq!(h.balance(&a1), Some(-100));
    assert_eq!(h.balance(&a2), Some(100));
    assert_eq!(h.pending(), 0);
}

fn incremental_refresh_after_second_transfer<S: TransactionalStore>(h: Harness<S>) {
    let a1 = h.account("A1");
    let a2 = h.account("A2");
    h.ledger.insert_transfer(h.draft(&a1, &a2, 100, t0())).unwrap();
    h.maintenance.full_refresh_materialized_views().unwrap();

    h.ledger
        .insert_transfer(h.draft(&a1, &a2, 50, t0() + Duration::hours(1)))
        .unwrap();
    assert!(h.pending() > 0);

    h.maintenance.refresh_materialized_views().unwrap();

    assert_eq!(h.balance(&a1), Some(-150));
    assert_eq!(h.balance(&a2), Some(150));
    assert_eq!(h.pending(), 0);
}

fn backdated_insert_is_order_independent<S: TransactionalStore>(h: Harness<S>) {
    let a1 = h.account("A1");
    let a2 = h.account("A2");
    h.ledger.insert_transfer(h.draft(&a1, &a2, 100, t0())).unwrap();
    h.ledger
        .insert_transfer(h.draft(&a1, &a2, 50, t0() - Duration::hours(1)))
        .unwrap();

    h.maintenance.refresh_materialized_views().unwrap();

    assert_eq!(h.balance(&a1), Some(-150));
    assert_eq!(h.balance(&a2), Some(150));
}

fn update_moving_both_accounts<S: TransactionalStore>(h: Harness<S>) {
    let a1 = h.account("A1");
    let a2 = h.account("A2");
    let a3 = h.account("A3");
    let a4 = h.account("A4");
    let transfer = h.ledger.insert_transfer(h.draft(&a1, &a2, 100, t0())).unwrap();
    h.maintenance.refresh_materialized_views().unwrap();
    assert_eq!(h.balance(&a1), Some(-100));

    h.ledger
        .update_transfer(transfer.id, h.draft(&a3, &a4, 100, t0()))
        .unwrap();
    h.maintenance.refresh_materialized_views().unwrap();

    assert_eq!(h.balance(&a1), None);
    assert_eq!(h.balance(&a2), None);
    assert_eq!(h.balance(&a3), Some(-100));
    assert_eq!(h.balance(&a4), Some(100));
}

fn deleting_only_transfer_removes_row<S: TransactionalStore>(h: Harness<S>) {
    let a1 = h.account("A1");
    let a2 = h.account("A2");
    let transfer = h.ledger.insert_transfer(h.draft(&a1, &a2, 75, t0())).unwrap();
    h.maintenance.refresh_materialized_views().unwrap();
    assert_eq!(h.balance(&a1), Some(-75));

    h.ledger.delete_transfer(transfer.id).unwrap();
    h.maintenance.refresh_materialized_views().unwrap();

    assert_eq!(h.balance(&a1), None);
    assert_eq!(h.balance(&a2), None);
    assert!(h.ledger.balances().unwrap().is_empty());
}

fn alternating_transfers_match_full_rebuild<S: TransactionalStore>(h: Harness<S>) {
    let a1 = h.account("A1");
    let a2 = h.account("A2");
    for (i, amount) in [10, 20, 30, 40, 50].into_iter().enumerate() {
        let at = t0() + Duration::minutes(i as i64);
        let draft = if i % 2 == 0 {
            h.draft(&a1, &a2, amount, at)
        } else {
            h.draft(&a2, &a1, amount, at)
        };
        h.ledger.insert_transfer(draft).unwrap();
    }

    h.maintenance.refresh_materialized_views().unwrap();
    let incremental = h.ledger.balances().unwrap();

    h.maintenance.full_refresh_materialized_views().unwrap();
    let rebuilt = h.ledger.balances().unwrap();

    assert_eq!(incremental, rebuilt);
    // A1 sends 10+30+50 and receives 20+40.
    assert_eq!(h.balance(&a1), Some(-30));
    assert_eq!(h.balance(&a2), Some(30));
}

on_both_backends!(scenario_full_refresh, full_refresh_after_first_transfer);
on_both_backends!(scenario_incremental_refresh, incremental_refresh_after_second_transfer);
on_both_backends!(scenario_backdated_insert, backdated_insert_is_order_independent);
on_both_backends!(scenario_update_both_accounts, update_moving_both_accounts);
on_both_backends!(scenario_delete_only_transfer, deleting_only_transfer_removes_row);
on_both_backends!(scenario_alternating_transfers, alternating_transfers_match_full_rebuild);

// =============================================================================
// Edge Cases
// =============================================================================

fn refresh_with_nothing_pending_is_a_no_op<S: TransactionalStore>(h: Harness<S>) {
    let a1 = h.account("A1");
    let a2 = h.account("A2");
    h.ledger.insert_transfer(h.draft(&a1, &a2, 5, t0())).unwrap();
    h.maintenance.refresh_materialized_views().unwrap();
    let before = h.ledger.balances().unwrap();

    let report = h.maintenance.reconcile().unwrap();

    assert_eq!(report.pairs_examined, 0);
    assert_eq!(h.ledger.balances().unwrap(), before);
    assert_eq!(h.pending(), 0);
}

fn offsetting_transfers_keep_a_zero_row<S: TransactionalStore>(h: Harness<S>) {
    let a1 = h.account("A1");
    let a2 = h.account("A2");
    h.ledger.insert_transfer(h.draft(&a1, &a2, 40, t0())).unwrap();
    h.ledger.insert_transfer(h.draft(&a2, &a1, 40, t0())).unwrap();

    h.maintenance.refresh_materialized_views().unwrap();
    assert_eq!(h.balance(&a1), Some(0));

    h.maintenance.full_refresh_materialized_views().unwrap();
    assert_eq!(h.balance(&a1), Some(0));
}

fn unknown_transfer_leaves_state_untouched<S: TransactionalStore>(h: Harness<S>) {
    let a1 = h.account("A1");
    let a2 = h.account("A2");
    let transfer = h.ledger.insert_transfer(h.draft(&a1, &a2, 5, t0())).unwrap();
    h.maintenance.refresh_materialized_views().unwrap();

    let missing = ledger_views::TransferId(transfer.id.0 + 1000);
    assert_eq!(
        h.ledger.delete_transfer(missing),
        Err(LedgerError::TransferNotFound(missing))
    );
    assert_eq!(h.pending(), 0);
}

fn removing_an_account_cascades<S: TransactionalStore>(h: Harness<S>) {
    let a1 = h.account("A1");
    let a2 = h.account("A2");
    let a3 = h.account("A3");
    h.ledger.insert_transfer(h.draft(&a1, &a2, 10, t0())).unwrap();
    h.ledger.insert_transfer(h.draft(&a3, &a1, 25, t0())).unwrap();
    h.ledger.insert_transfer(h.draft(&a2, &a3, 7, t0())).unwrap();
    h.maintenance.refresh_materialized_views().unwrap();

    let removed = h.ledger.remove_account(a1.id).unwrap();
    assert_eq!(removed.len(), 2);
    h.maintenance.refresh_materialized_views().unwrap();

    assert_eq!(h.balance(&a1), None);
    assert_eq!(h.balance(&a2), Some(-7));
    assert_eq!(h.balance(&a3), Some(7));
    assert!(h.maintenance.verify().unwrap().is_empty());
}

fn removing_a_currency_cascades<S: TransactionalStore>(h: Harness<S>) {
    let a1 = h.account("A1");
    let a2 = h.account("A2");
    let eur = h.ledger.create_currency("EUR", 2).unwrap();
    h.ledger.insert_transfer(h.draft(&a1, &a2, 100, t0())).unwrap();
    h.ledger
        .insert_transfer(TransferDraft::new(t0(), a1.id, a2.id, eur.id, 40))
        .unwrap();
    h.ledger
        .insert_transfer(TransferDraft::new(t0(), a2.id, a1.id, eur.id, 15))
        .unwrap();
    h.maintenance.refresh_materialized_views().unwrap();
    let usd_rows = |h: &Harness<S>| {
        h.ledger
            .balances()
            .unwrap()
            .into_iter()
            .filter(|(key, _)| key.currency == h.usd.id)
            .collect::<Vec<_>>()
    };
    let before = usd_rows(&h);

    let removed = h.ledger.remove_currency(eur.id).unwrap();
    assert_eq!(removed.len(), 2);
    assert_eq!(h.pending(), 2);
    h.maintenance.refresh_materialized_views().unwrap();

    assert_eq!(h.ledger.balance(a1.id, eur.id).unwrap(), None);
    assert_eq!(h.ledger.balance(a2.id, eur.id).unwrap(), None);
    assert!(h.ledger.balances().unwrap().keys().all(|key| key.currency != eur.id));
    assert_eq!(usd_rows(&h), before);
    assert_eq!(h.balance(&a1), Some(-100));
    assert!(h.maintenance.verify().unwrap().is_empty());
}

fn overflowing_transfer_is_rejected<S: TransactionalStore>(h: Harness<S>) {
    let a1 = h.account("A1");
    let a2 = h.account("A2");
    h.ledger.insert_transfer(h.draft(&a1, &a2, i64::MAX, t0())).unwrap();

    let result = h.ledger.insert_transfer(h.draft(&a1, &a2, 1, t0()));

    assert_eq!(
        result,
        Err(LedgerError::Overflow(BalanceKey::new(a1.id, h.usd.id)))
    );
    assert_eq!(h.pending(), 2);
    h.maintenance.refresh_materialized_views().unwrap();
    assert_eq!(h.balance(&a2), Some(i64::MAX));
    assert_eq!(h.balance(&a1), Some(-i64::MAX));
    assert!(h.maintenance.verify().unwrap().is_empty());
}

fn bulk_import_marks_each_pair_once<S: TransactionalStore>(h: Harness<S>) {
    let a1 = h.account("A1");
    let a2 = h.account("A2");
    let drafts = (0..20).map(|i| h.draft(&a1, &a2, 1 + i, t0() + Duration::seconds(i)));

    let inserted = h.ledger.import_transfers(drafts.collect::<Vec<_>>()).unwrap();

    assert_eq!(inserted.len(), 20);
    assert_eq!(h.pending(), 2);
    h.maintenance.refresh_materialized_views().unwrap();
    assert_eq!(h.balance(&a2), Some((1..=20).sum()));
}

fn failed_import_inserts_nothing<S: TransactionalStore>(h: Harness<S>) {
    let a1 = h.account("A1");
    let a2 = h.account("A2");
    let drafts = vec![
        h.draft(&a1, &a2, 10, t0()),
        h.draft(&a1, &a1, 10, t0()),
    ];

    assert!(matches!(
        h.ledger.import_transfers(drafts),
        Err(LedgerError::InvalidTransfer(_))
    ));
    assert_eq!(h.pending(), 0);
    h.maintenance.full_refresh_materialized_views().unwrap();
    assert!(h.ledger.balances().unwrap().is_empty());
}

on_both_backends!(edge_nothing_pending, refresh_with_nothing_pending_is_a_no_op);
on_both_backends!(edge_offsetting_transfers, offsetting_transfers_keep_a_zero_row);
on_both_backends!(edge_unknown_transfer, unknown_transfer_leaves_state_untouched);
on_both_backends!(edge_account_cascade, removing_an_account_cascades);
on_both_backends!(edge_currency_cascade, removing_a_currency_cascades);
on_both_backends!(edge_overflow, overflowing_transfer_is_rejected);
on_both_backends!(edge_bulk_import, bulk_import_marks_each_pair_once);
on_both_backends!(edge_failed_import, failed_import_inserts_nothing);
