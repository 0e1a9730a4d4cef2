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

//! Storage seams shared by the ledger, the change tracker and the
//! reconciliation engine.
//!
//! The ledger, the balance rows and the pending-change log all live in one
//! transactional store. Each concern is exposed through its own narrow
//! trait so the reconciliation engine only depends on what it reads and
//! writes:
//!
//! - [`LedgerReader`]: source-of-truth queries over transfers.
//! - [`LedgerWriter`]: CRUD primitives used by [`Ledger`](crate::Ledger).
//! - [`BalanceStore`]: the materialized `(account, currency) -> balance` rows.
//! - [`PendingChangeStore`]: the change tracker's log of dirty pairs.
//!
//! [`TransactionalStore::transaction`] hands out all four at once, bound
//! to a single storage transaction.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::account::Account;
use crate::base::{AccountId, BalanceKey, CurrencyId, TransferId};
use crate::currency::Currency;
use crate::error::LedgerResult;
use crate::transfer::{Transfer, TransferDraft};
use std::collections::{BTreeMap, BTreeSet};

/// Read access to the ledger of transfers and its reference data.
pub trait LedgerReader {
    /// Sum of amounts of transfers whose target is `key.account`.
    fn sum_incoming(&self, key: BalanceKey) -> LedgerResult<i64>;

    /// Sum of amounts of transfers whose source is `key.account`.
    fn sum_outgoing(&self, key: BalanceKey) -> LedgerResult<i64>;

    /// Whether any transfer currently references the pair on either side.
    fn exists_any_transfer(&self, key: BalanceKey) -> LedgerResult<bool>;

    /// Every pair referenced by at least one transfer.
    fn all_distinct_pairs_with_activity(&self) -> LedgerResult<BTreeSet<BalanceKey>>;

    /// Net balance of every pair with activity, computed in one grouped pass.
    fn net_balances(&self) -> LedgerResult<BTreeMap<BalanceKey, i64>>;

    fn transfer(&self, id: TransferId) -> LedgerResult<Option<Transfer>>;

    /// Transfers with `account` as source or target.
    fn transfers_referencing_account(&self, account: AccountId) -> LedgerResult<Vec<Transfer>>;

    fn transfers_in_currency(&self, currency: CurrencyId) -> LedgerResult<Vec<Transfer>>;

    fn account(&self, id: AccountId) -> LedgerResult<Option<Account>>;

    fn account_by_name(&self, name: &str) -> LedgerResult<Option<Account>>;

    fn currency(&self, id: CurrencyId) -> LedgerResult<Option<Currency>>;

    fn currency_by_code(&self, code: &str) -> LedgerResult<Option<Currency>>;
}

/// Raw ledger mutations.
///
/// These do not validate or track changes; [`Ledger`](crate::Ledger)
/// wraps them with both.
pub trait LedgerWriter {
    fn insert_account(&mut self, name: &str) -> LedgerResult<Account>;

    fn delete_account(&mut self, id: AccountId) -> LedgerResult<Account>;

    fn insert_currency(&mut self, code: &str, fraction_digits: u8) -> LedgerResult<Currency>;

    fn delete_currency(&mut self, id: CurrencyId) -> LedgerResult<Currency>;

    fn insert_transfer(&mut self, draft: TransferDraft) -> LedgerResult<Transfer>;

    /// Replaces a transfer's contents, keeping its id. Returns the prior state.
    fn update_transfer(&mut self, id: TransferId, draft: TransferDraft) -> LedgerResult<Transfer>;

    /// Removes a transfer. Returns its last state.
    fn delete_transfer(&mut self, id: TransferId) -> LedgerResult<Transfer>;
}

/// The materialized balance rows.
pub trait BalanceStore {
    fn balance(&self, key: BalanceKey) -> LedgerResult<Option<i64>>;

    fn balances(&self) -> LedgerResult<BTreeMap<BalanceKey, i64>>;

    fn upsert_balance(&mut self, key: BalanceKey, balance: i64) -> LedgerResult<()>;

    /// Returns whether a row existed.
    fn delete_balance(&mut self, key: BalanceKey) -> LedgerResult<bool>;

    /// Removes every row. Returns how many there were.
    fn truncate_balances(&mut self) -> LedgerResult<usize>;
}

/// The change tracker's append-only log of pairs needing recomputation.
pub trait PendingChangeStore {
    /// Appends `key`. Repeated markings of the same pair are allowed.
    fn mark_pending(&mut self, key: BalanceKey) -> LedgerResult<()>;

    /// Returns the distinct pending pairs and clears the log.
    ///
    /// The clear is part of the enclosing transaction: if that transaction
    /// rolls back, the entries are still pending afterwards.
    fn drain_all(&mut self) -> LedgerResult<BTreeSet<BalanceKey>>;

    /// Number of log entries, duplicates included.
    fn pending_count(&self) -> LedgerResult<usize>;
}

/// Everything reachable inside one storage transaction.
pub trait StoreTransaction: LedgerReader + LedgerWriter + BalanceStore + PendingChangeStore {}

impl<T> StoreTransaction for T where T: LedgerReader + LedgerWriter + BalanceStore + PendingChangeStore {}

/// A store that runs closures inside serialized, atomic transactions.
pub trait TransactionalStore: Send + Sync {
    /// Runs `f` in a transaction.
    ///
    /// Commits if `f` returns `Ok`; otherwise nothing `f` did is visible
    /// afterwards. Transactions are serialized: at most one runs at a time.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, or [`LedgerError::Storage`] if the
    /// transaction could not begin or commit.
    ///
    /// [`LedgerError::Storage`]: crate::LedgerError::Storage
    fn transaction<T, F>(&self, f: F) -> LedgerResult<T>
    where
        F: FnOnce(&mut dyn StoreTransaction) -> LedgerResult<T>;

    /// Rebuilds physical indexes.
    fn reindex(&self) -> LedgerResult<()>;

    /// Compacts storage.
    fn vacuum(&self) -> LedgerResult<()>;

    /// Refreshes query planner statistics.
    fn analyze(&self) -> LedgerResult<()>;
}
