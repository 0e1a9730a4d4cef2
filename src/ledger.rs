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

//! Ledger mutations with change tracking.
//!
//! The [`Ledger`] is the only path through which transfers, accounts and
//! currencies change. Each operation validates its input, performs the
//! mutation, and records the resulting [`LedgerEvent`] as pending changes,
//! all inside one store transaction. Balances are not touched here; they
//! catch up on the next refresh by the
//! [`MaintenanceService`](crate::MaintenanceService).
//!
//! # Operations
//!
//! | Operation | Pairs marked pending |
//! |-----------|----------------------|
//! | `insert_transfer` | source and target of the new transfer |
//! | `update_transfer` | source and target of the old and the new state |
//! | `delete_transfer` | source and target of the removed transfer |
//! | `remove_account` / `remove_currency` | both sides of every cascaded transfer |
//! | `import_transfers` | each distinct pair once, at the end of the batch |

use crate::account::Account;
use crate::base::{AccountId, BalanceKey, CurrencyId, TransferId};
use crate::currency::{Currency, MAX_FRACTION_DIGITS};
use crate::error::{LedgerError, LedgerResult};
use crate::event::LedgerEvent;
use crate::reconcile;
use crate::store::{StoreTransaction, TransactionalStore};
use crate::tracker::ChangeRecorder;
use crate::transfer::{Transfer, TransferDraft};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Mutating and reading front end over a [`TransactionalStore`].
#[derive(Debug)]
pub struct Ledger<S> {
    store: Arc<S>,
}

impl<S> Clone for Ledger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: TransactionalStore> Ledger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Creates an account.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::DuplicateAccount`] - the name is already in use.
    pub fn create_account(&self, name: &str) -> LedgerResult<Account> {
        self.store.transaction(|tx| {
            if tx.account_by_name(name)?.is_some() {
                return Err(LedgerError::DuplicateAccount(name.to_string()));
            }
            tx.insert_account(name)
        })
    }

    /// Returns the account called `name`, creating it if needed.
    pub fn ensure_account(&self, name: &str) -> LedgerResult<Account> {
        self.store.transaction(|tx| match tx.account_by_name(name)? {
            Some(account) => Ok(account),
            None => tx.insert_account(name),
        })
    }

    /// Creates a currency.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::DuplicateCurrency`] - the code is already in use.
    /// - [`LedgerError::UnsupportedPrecision`] - more than
    ///   [`MAX_FRACTION_DIGITS`] decimal places.
    pub fn create_currency(&self, code: &str, fraction_digits: u8) -> LedgerResult<Currency> {
        check_precision(fraction_digits)?;
        self.store.transaction(|tx| {
            if tx.currency_by_code(code)?.is_some() {
                return Err(LedgerError::DuplicateCurrency(code.to_string()));
            }
            tx.insert_currency(code, fraction_digits)
        })
    }

    /// Returns the currency with `code`, creating it with `fraction_digits`
    /// if needed. An existing currency keeps its own precision.
    pub fn ensure_currency(&self, code: &str, fraction_digits: u8) -> LedgerResult<Currency> {
        self.store.transaction(|tx| match tx.currency_by_code(code)? {
            Some(currency) => Ok(currency),
            None => {
                check_precision(fraction_digits)?;
                tx.insert_currency(code, fraction_digits)
            }
        })
    }

    /// Records a new transfer.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidTransfer`] - same source and target, or a
    ///   non-positive amount.
    /// - [`LedgerError::AccountNotFound`] / [`LedgerError::CurrencyNotFound`] -
    ///   the draft references something that does not exist.
    pub fn insert_transfer(&self, draft: TransferDraft) -> LedgerResult<Transfer> {
        self.store.transaction(|tx| {
            let mut recorder = ChangeRecorder::immediate();
            let transfer = insert_in(tx, draft, &mut recorder)?;
            recorder.finish(tx)?;
            Ok(transfer)
        })
    }

    /// Replaces the contents of transfer `id`. Returns the updated transfer.
    ///
    /// Any field may change, including both accounts and the currency.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::TransferNotFound`] - no transfer with that id.
    /// - Same validation errors as [`Ledger::insert_transfer`].
    pub fn update_transfer(&self, id: TransferId, draft: TransferDraft) -> LedgerResult<Transfer> {
        self.store.transaction(|tx| {
            check_draft(tx, &draft)?;
            let before = tx.update_transfer(id, draft.clone())?;
            let after = Transfer::from_draft(id, draft);
            check_sums(tx, &after)?;
            let event = LedgerEvent::TransferUpdated {
                before,
                after: after.clone(),
            };
            ChangeRecorder::immediate().record(tx, &event)?;
            debug!(transfer = %id, "transfer updated");
            Ok(after)
        })
    }

    /// Removes transfer `id`. Returns its last state.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::TransferNotFound`] - no transfer with that id.
    pub fn delete_transfer(&self, id: TransferId) -> LedgerResult<Transfer> {
        self.store.transaction(|tx| {
            let removed = tx.delete_transfer(id)?;
            let event = LedgerEvent::TransferDeleted(removed.clone());
            ChangeRecorder::immediate().record(tx, &event)?;
            debug!(transfer = %id, "transfer deleted");
            Ok(removed)
        })
    }

    /// Removes an account and every transfer referencing it.
    ///
    /// Returns the transfers removed along with the account.
    pub fn remove_account(&self, id: AccountId) -> LedgerResult<Vec<Transfer>> {
        self.store.transaction(|tx| {
            let transfers = tx.transfers_referencing_account(id)?;
            for transfer in &transfers {
                tx.delete_transfer(transfer.id)?;
            }
            let account = tx.delete_account(id)?;
            info!(account = %id, cascaded = transfers.len(), "account removed");
            let event = LedgerEvent::AccountRemoved {
                account,
                transfers: transfers.clone(),
            };
            ChangeRecorder::immediate().record(tx, &event)?;
            Ok(transfers)
        })
    }

    /// Removes a currency and every transfer denominated in it.
    ///
    /// Returns the transfers removed along with the currency.
    pub fn remove_currency(&self, id: CurrencyId) -> LedgerResult<Vec<Transfer>> {
        self.store.transaction(|tx| {
            let transfers = tx.transfers_in_currency(id)?;
            for transfer in &transfers {
                tx.delete_transfer(transfer.id)?;
            }
            let currency = tx.delete_currency(id)?;
            info!(currency = %id, cascaded = transfers.len(), "currency removed");
            let event = LedgerEvent::CurrencyRemoved {
                currency,
                transfers: transfers.clone(),
            };
            ChangeRecorder::immediate().record(tx, &event)?;
            Ok(transfers)
        })
    }

    /// Inserts many transfers in one transaction.
    ///
    /// Change tracking runs batched: affected pairs are collected while
    /// inserting and each is marked once at the end. Either every draft is
    /// inserted or none is.
    pub fn import_transfers<I>(&self, drafts: I) -> LedgerResult<Vec<Transfer>>
    where
        I: IntoIterator<Item = TransferDraft>,
    {
        self.store.transaction(|tx| {
            let mut recorder = ChangeRecorder::batched();
            let mut inserted = Vec::new();
            for draft in drafts {
                inserted.push(insert_in(tx, draft, &mut recorder)?);
            }
            let marked = recorder.finish(tx)?;
            info!(transfers = inserted.len(), pairs = marked, "bulk import committed");
            Ok(inserted)
        })
    }

    pub fn transfer(&self, id: TransferId) -> LedgerResult<Option<Transfer>> {
        self.store.transaction(|tx| tx.transfer(id))
    }

    pub fn account(&self, id: AccountId) -> LedgerResult<Option<Account>> {
        self.store.transaction(|tx| tx.account(id))
    }

    pub fn account_by_name(&self, name: &str) -> LedgerResult<Option<Account>> {
        self.store.transaction(|tx| tx.account_by_name(name))
    }

    pub fn currency(&self, id: CurrencyId) -> LedgerResult<Option<Currency>> {
        self.store.transaction(|tx| tx.currency(id))
    }

    pub fn currency_by_code(&self, code: &str) -> LedgerResult<Option<Currency>> {
        self.store.transaction(|tx| tx.currency_by_code(code))
    }

    /// Materialized balance for one pair, as of the last refresh.
    pub fn balance(&self, account: AccountId, currency: CurrencyId) -> LedgerResult<Option<i64>> {
        self.store
            .transaction(|tx| tx.balance(BalanceKey::new(account, currency)))
    }

    /// Every materialized balance row, as of the last refresh.
    pub fn balances(&self) -> LedgerResult<BTreeMap<BalanceKey, i64>> {
        self.store.transaction(|tx| tx.balances())
    }
}

fn check_precision(fraction_digits: u8) -> LedgerResult<()> {
    if fraction_digits > MAX_FRACTION_DIGITS {
        return Err(LedgerError::UnsupportedPrecision(fraction_digits));
    }
    Ok(())
}

fn check_draft(tx: &dyn StoreTransaction, draft: &TransferDraft) -> LedgerResult<()> {
    draft.validate()?;
    for account in [draft.source, draft.target] {
        if tx.account(account)?.is_none() {
            return Err(LedgerError::AccountNotFound(account));
        }
    }
    if tx.currency(draft.currency)?.is_none() {
        return Err(LedgerError::CurrencyNotFound(draft.currency));
    }
    Ok(())
}

/// Fails if either side of `transfer` now sums past the `i64` range.
///
/// Such a pair could never be reconciled, and its error would roll back
/// every refresh pass after it.
fn check_sums(tx: &dyn StoreTransaction, transfer: &Transfer) -> LedgerResult<()> {
    for key in transfer.affected_pairs() {
        reconcile::true_balance(tx, key)?;
    }
    Ok(())
}

fn insert_in(
    tx: &mut dyn StoreTransaction,
    draft: TransferDraft,
    recorder: &mut ChangeRecorder,
) -> LedgerResult<Transfer> {
    check_draft(tx, &draft)?;
    let transfer = tx.insert_transfer(draft)?;
    check_sums(tx, &transfer)?;
    recorder.record(tx, &LedgerEvent::TransferInserted(transfer.clone()))?;
    Ok(transfer)
}
