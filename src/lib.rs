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

//! # Ledger Views
//!
//! Materialized account balances over a double-entry transfer ledger,
//! maintained incrementally.
//!
//! Every transfer moves an amount of one currency from a source account to
//! a target account. For each `(account, currency)` pair the crate keeps a
//! stored balance row equal to the pair's incoming minus outgoing amounts,
//! without recomputing every row after every write.
//!
//! ## Core Components
//!
//! - [`Ledger`]: mutates transfers, accounts and currencies, and records the
//!   affected pairs as pending changes in the same transaction.
//! - [`ChangeRecorder`]: turns a [`LedgerEvent`] into pending changes,
//!   immediately or batched for bulk imports.
//! - [`reconcile`]: the incremental ([`reconcile_pending`]) and full
//!   ([`rebuild_all`]) reconciliation paths, which always agree.
//! - [`MaintenanceService`]: refresh entry points for applications.
//! - [`MemoryStore`] and [`SqliteStore`]: transactional storage backends.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use chrono::Utc;
//! use ledger_views::{Ledger, MaintenanceService, MemoryStore, TransferDraft};
//!
//! let store = Arc::new(MemoryStore::new());
//! let ledger = Ledger::new(Arc::clone(&store));
//! let maintenance = MaintenanceService::new(store);
//!
//! let checking = ledger.create_account("Checking").unwrap();
//! let savings = ledger.create_account("Savings").unwrap();
//! let usd = ledger.create_currency("USD", 2).unwrap();
//!
//! ledger
//!     .insert_transfer(TransferDraft::new(Utc::now(), checking.id, savings.id, usd.id, 100))
//!     .unwrap();
//! maintenance.refresh_materialized_views().unwrap();
//!
//! assert_eq!(ledger.balance(checking.id, usd.id).unwrap(), Some(-100));
//! assert_eq!(ledger.balance(savings.id, usd.id).unwrap(), Some(100));
//! ```
//!
//! ## Consistency
//!
//! Mutations, pending-change markers and balance rows share one store, and
//! each operation runs in one transaction. A refresh that fails rolls back
//! entirely, so the stored balances always reflect some fully reconciled
//! state and the pending set is never lost.

pub mod account;
mod base;
pub mod config;
pub mod currency;
pub mod error;
mod event;
mod ledger;
mod maintenance;
pub mod reconcile;
pub mod store;
mod tracker;
mod transfer;

pub use account::Account;
pub use base::{AccountId, BalanceKey, CurrencyId, TransferId};
pub use config::{JournalMode, StoreConfig, Synchronous};
pub use currency::Currency;
pub use error::{LedgerError, LedgerResult};
pub use event::LedgerEvent;
pub use ledger::Ledger;
pub use maintenance::MaintenanceService;
pub use reconcile::{
    Discrepancy, PairOutcome, RebuildReport, ReconcileReport, rebuild_all, reconcile_pending,
};
pub use store::{
    BalanceStore, LedgerReader, LedgerWriter, MemoryStore, PendingChangeStore, SqliteStore,
    StoreTransaction, TransactionalStore,
};
pub use tracker::ChangeRecorder;
pub use transfer::{Transfer, TransferDraft};
