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

//! In-memory store.
//!
//! State is kept in persistent (structurally shared) maps, so cloning it is
//! O(1). A transaction mutates a private clone and publishes it only when
//! the closure succeeds; an aborted transaction just drops its clone.

use super::{BalanceStore, LedgerReader, LedgerWriter, PendingChangeStore, StoreTransaction, TransactionalStore};
use crate::account::Account;
use crate::base::{AccountId, BalanceKey, CurrencyId, TransferId};
use crate::currency::Currency;
use crate::error::{LedgerError, LedgerResult};
use crate::transfer::{Transfer, TransferDraft};
use im::{OrdMap, Vector};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    accounts: OrdMap<AccountId, Account>,
    currencies: OrdMap<CurrencyId, Currency>,
    transfers: OrdMap<TransferId, Transfer>,
    balances: OrdMap<BalanceKey, i64>,
    pending: Vector<BalanceKey>,
    last_account_id: u32,
    last_currency_id: u32,
    last_transfer_id: u64,
}

impl MemoryState {
    fn sum_where(&self, key: BalanceKey, side: fn(&Transfer) -> AccountId) -> LedgerResult<i64> {
        self.transfers
            .values()
            .filter(|transfer| transfer.currency == key.currency && side(transfer) == key.account)
            .try_fold(0i64, |total, transfer| {
                total
                    .checked_add(transfer.amount)
                    .ok_or(LedgerError::Overflow(key))
            })
    }
}

impl LedgerReader for MemoryState {
    fn sum_incoming(&self, key: BalanceKey) -> LedgerResult<i64> {
        self.sum_where(key, |transfer| transfer.target)
    }

    fn sum_outgoing(&self, key: BalanceKey) -> LedgerResult<i64> {
        self.sum_where(key, |transfer| transfer.source)
    }

    fn exists_any_transfer(&self, key: BalanceKey) -> LedgerResult<bool> {
        Ok(self.transfers.values().any(|transfer| transfer.touches(&key)))
    }

    fn all_distinct_pairs_with_activity(&self) -> LedgerResult<BTreeSet<BalanceKey>> {
        Ok(self
            .transfers
            .values()
            .flat_map(Transfer::affected_pairs)
            .collect())
    }

    fn net_balances(&self) -> LedgerResult<BTreeMap<BalanceKey, i64>> {
        let mut balances = BTreeMap::new();
        for transfer in self.transfers.values() {
            let [source, target] = transfer.affected_pairs();
            let outgoing: &mut i64 = balances.entry(source).or_default();
            *outgoing = outgoing
                .checked_sub(transfer.amount)
                .ok_or(LedgerError::Overflow(source))?;
            let incoming: &mut i64 = balances.entry(target).or_default();
            *incoming = incoming
                .checked_add(transfer.amount)
                .ok_or(LedgerError::Overflow(target))?;
        }
        Ok(balances)
    }

    fn transfer(&self, id: TransferId) -> LedgerResult<Option<Transfer>> {
        Ok(self.transfers.get(&id).cloned())
    }

    fn transfers_referencing_account(&self, account: AccountId) -> LedgerResult<Vec<Transfer>> {
        Ok(self
            .transfers
            .values()
            .filter(|transfer| transfer.source == account || transfer.target == account)
            .cloned()
            .collect())
    }

    fn transfers_in_currency(&self, currency: CurrencyId) -> LedgerResult<Vec<Transfer>> {
        Ok(self
            .transfers
            .values()
            .filter(|transfer| transfer.currency == currency)
            .cloned()
            .collect())
    }

    fn account(&self, id: AccountId) -> LedgerResult<Option<Account>> {
        Ok(self.accounts.get(&id).cloned())
    }

    fn account_by_name(&self, name: &str) -> LedgerResult<Option<Account>> {
        Ok(self
            .accounts
            .values()
            .find(|account| account.name == name)
            .cloned())
    }

    fn currency(&self, id: CurrencyId) -> LedgerResult<Option<Currency>> {
        Ok(self.currencies.get(&id).cloned())
    }

    fn currency_by_code(&self, code: &str) -> LedgerResult<Option<Currency>> {
        Ok(self
            .currencies
            .values()
            .find(|currency| currency.code == code)
            .cloned())
    }
}

impl LedgerWriter for MemoryState {
    fn insert_account(&mut self, name: &str) -> LedgerResult<Account> {
        self.last_account_id += 1;
        let account = Account::new(AccountId(self.last_account_id), name);
        self.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    fn delete_account(&mut self, id: AccountId) -> LedgerResult<Account> {
        self.accounts
            .remove(&id)
            .ok_or(LedgerError::AccountNotFound(id))
    }

    fn insert_currency(&mut self, code: &str, fraction_digits: u8) -> LedgerResult<Currency> {
        self.last_currency_id += 1;
        let currency = Currency::new(CurrencyId(self.last_currency_id), code, fraction_digits);
        self.currencies.insert(currency.id, currency.clone());
        Ok(currency)
    }

    fn delete_currency(&mut self, id: CurrencyId) -> LedgerResult<Currency> {
        self.currencies
            .remove(&id)
            .ok_or(LedgerError::CurrencyNotFound(id))
    }

    fn insert_transfer(&mut self, draft: TransferDraft) -> LedgerResult<Transfer> {
        self.last_transfer_id += 1;
        let transfer = Transfer::from_draft(TransferId(self.last_transfer_id), draft);
        self.transfers.insert(transfer.id, transfer.clone());
        Ok(transfer)
    }

    fn update_transfer(&mut self, id: TransferId, draft: TransferDraft) -> LedgerResult<Transfer> {
        if !self.transfers.contains_key(&id) {
            return Err(LedgerError::TransferNotFound(id));
        }
        self.transfers
            .insert(id, Transfer::from_draft(id, draft))
            .ok_or(LedgerError::TransferNotFound(id))
    }

    fn delete_transfer(&mut self, id: TransferId) -> LedgerResult<Transfer> {
        self.transfers
            .remove(&id)
            .ok_or(LedgerError::TransferNotFound(id))
    }
}

impl BalanceStore for MemoryState {
    fn balance(&self, key: BalanceKey) -> LedgerResult<Option<i64>> {
        Ok(self.balances.get(&key).copied())
    }

    fn balances(&self) -> LedgerResult<BTreeMap<BalanceKey, i64>> {
        Ok(self
            .balances
            .iter()
            .map(|(key, balance)| (*key, *balance))
            .collect())
    }

    fn upsert_balance(&mut self, key: BalanceKey, balance: i64) -> LedgerResult<()> {
        self.balances.insert(key, balance);
        Ok(())
    }

    fn delete_balance(&mut self, key: BalanceKey) -> LedgerResult<bool> {
        Ok(self.balances.remove(&key).is_some())
    }

    fn truncate_balances(&mut self) -> LedgerResult<usize> {
        let removed = self.balances.len();
        self.balances = OrdMap::new();
        Ok(removed)
    }
}

impl PendingChangeStore for MemoryState {
    fn mark_pending(&mut self, key: BalanceKey) -> LedgerResult<()> {
        self.pending.push_back(key);
        Ok(())
    }

    fn drain_all(&mut self) -> LedgerResult<BTreeSet<BalanceKey>> {
        let drained = self.pending.iter().copied().collect();
        self.pending = Vector::new();
        Ok(drained)
    }

    fn pending_count(&self) -> LedgerResult<usize> {
        Ok(self.pending.len())
    }
}

/// Transactional store held entirely in memory.
///
/// Used as the fake ledger in tests and for short-lived ledgers that do not
/// need to outlive the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransactionalStore for MemoryStore {
    fn transaction<T, F>(&self, f: F) -> LedgerResult<T>
    where
        F: FnOnce(&mut dyn StoreTransaction) -> LedgerResult<T>,
    {
        // Held for the whole closure: transactions are serialized.
        let mut committed = self.state.lock();
        let mut working = committed.clone();
        let output = f(&mut working)?;
        *committed = working;
        Ok(output)
    }

    fn reindex(&self) -> LedgerResult<()> {
        Ok(())
    }

    fn vacuum(&self) -> LedgerResult<()> {
        Ok(())
    }

    fn analyze(&self) -> LedgerResult<()> {
        Ok(())
    }
}
