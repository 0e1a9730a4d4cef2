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

//! SQLite-backed store.
//!
//! One connection per store, guarded by a mutex. Every transaction starts
//! with `BEGIN IMMEDIATE`, taking the database write lock up front, so the
//! pending-change drain and the balance writes that follow it can never
//! interleave with another writer.

use super::{BalanceStore, LedgerReader, LedgerWriter, PendingChangeStore, StoreTransaction, TransactionalStore};
use crate::account::Account;
use crate::base::{AccountId, BalanceKey, CurrencyId, TransferId};
use crate::config::StoreConfig;
use crate::currency::Currency;
use crate::error::{LedgerError, LedgerResult};
use crate::transfer::{Transfer, TransferDraft};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::time::Duration;

const LEDGER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS currencies (
    id INTEGER PRIMARY KEY,
    code TEXT NOT NULL UNIQUE,
    fraction_digits INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS transfers (
    id INTEGER PRIMARY KEY,
    timestamp TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    source_account_id INTEGER NOT NULL REFERENCES accounts(id),
    target_account_id INTEGER NOT NULL REFERENCES accounts(id),
    currency_id INTEGER NOT NULL REFERENCES currencies(id),
    amount INTEGER NOT NULL CHECK (amount > 0),
    CHECK (source_account_id <> target_account_id)
);
CREATE INDEX IF NOT EXISTS transfers_idx_source_currency
    ON transfers(source_account_id, currency_id);
CREATE INDEX IF NOT EXISTS transfers_idx_target_currency
    ON transfers(target_account_id, currency_id);
CREATE INDEX IF NOT EXISTS transfers_idx_currency
    ON transfers(currency_id);
CREATE TABLE IF NOT EXISTS account_balances (
    account_id INTEGER NOT NULL,
    currency_id INTEGER NOT NULL,
    balance INTEGER NOT NULL,
    PRIMARY KEY (account_id, currency_id)
) WITHOUT ROWID;
CREATE TABLE IF NOT EXISTS pending_balance_changes (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id INTEGER NOT NULL,
    currency_id INTEGER NOT NULL
);
"#;

const TRANSFER_COLUMNS: &str =
    "id, timestamp, description, source_account_id, target_account_id, currency_id, amount";

/// Every `(account, currency)` side of every transfer, with its signed delta.
const SIGNED_DELTAS: &str = "
    SELECT target_account_id AS account_id, currency_id, amount AS delta FROM transfers
    UNION ALL
    SELECT source_account_id AS account_id, currency_id, -amount AS delta FROM transfers";

/// SQLite-backed transactional store.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database described by `config`.
    pub fn open(config: &StoreConfig) -> LedgerResult<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&config.path)?;
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = {}; PRAGMA synchronous = {};",
            config.journal_mode.as_str(),
            config.synchronous.as_str()
        ))?;
        Self::initialize(conn, config.busy_timeout())
    }

    /// Opens a private database that lives as long as the store.
    pub fn open_in_memory() -> LedgerResult<Self> {
        Self::initialize(Connection::open_in_memory()?, Duration::from_secs(5))
    }

    fn initialize(conn: Connection, busy_timeout: Duration) -> LedgerResult<Self> {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(LEDGER_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl TransactionalStore for SqliteStore {
    fn transaction<T, F>(&self, f: F) -> LedgerResult<T>
    where
        F: FnOnce(&mut dyn StoreTransaction) -> LedgerResult<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut handle = SqliteTransaction { tx };
        // On error `handle` drops here and rusqlite rolls the transaction back.
        let output = f(&mut handle)?;
        handle.tx.commit()?;
        Ok(output)
    }

    fn reindex(&self) -> LedgerResult<()> {
        self.conn.lock().execute_batch("REINDEX;")?;
        Ok(())
    }

    fn vacuum(&self) -> LedgerResult<()> {
        self.conn.lock().execute_batch("VACUUM;")?;
        Ok(())
    }

    fn analyze(&self) -> LedgerResult<()> {
        self.conn.lock().execute_batch("ANALYZE;")?;
        Ok(())
    }
}

struct SqliteTransaction<'conn> {
    tx: Transaction<'conn>,
}

impl SqliteTransaction<'_> {
    fn transfers_where(&self, condition: &str, value: u32) -> LedgerResult<Vec<Transfer>> {
        let sql = format!("SELECT {TRANSFER_COLUMNS} FROM transfers WHERE {condition} ORDER BY id");
        let mut stmt = self.tx.prepare_cached(&sql)?;
        let mut rows = stmt.query(params![value])?;
        let mut transfers = Vec::new();
        while let Some(row) = rows.next()? {
            transfers.push(row_to_transfer(row)?);
        }
        Ok(transfers)
    }

    /// Sums the amounts selected by `sql` in checked `i64` arithmetic.
    ///
    /// SQLite's `SUM` aborts with a generic error on overflow, which would
    /// read as a transient storage failure.
    fn checked_amount_sum(&self, sql: &str, key: BalanceKey) -> LedgerResult<i64> {
        let mut stmt = self.tx.prepare_cached(sql)?;
        let mut rows = stmt.query(params![key.account.0, key.currency.0])?;
        let mut total = 0i64;
        while let Some(row) = rows.next()? {
            let amount: i64 = row.get(0)?;
            total = total.checked_add(amount).ok_or(LedgerError::Overflow(key))?;
        }
        Ok(total)
    }

    fn keyed_rows(&self, sql: &str) -> LedgerResult<BTreeMap<BalanceKey, i64>> {
        let mut stmt = self.tx.prepare_cached(sql)?;
        let mut rows = stmt.query([])?;
        let mut balances = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let key = BalanceKey::new(AccountId(row.get(0)?), CurrencyId(row.get(1)?));
            balances.insert(key, row.get(2)?);
        }
        Ok(balances)
    }
}

impl LedgerReader for SqliteTransaction<'_> {
    fn sum_incoming(&self, key: BalanceKey) -> LedgerResult<i64> {
        self.checked_amount_sum(
            "SELECT amount FROM transfers WHERE target_account_id = ?1 AND currency_id = ?2",
            key,
        )
    }

    fn sum_outgoing(&self, key: BalanceKey) -> LedgerResult<i64> {
        self.checked_amount_sum(
            "SELECT amount FROM transfers WHERE source_account_id = ?1 AND currency_id = ?2",
            key,
        )
    }

    fn exists_any_transfer(&self, key: BalanceKey) -> LedgerResult<bool> {
        let exists = self.tx.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM transfers
                WHERE currency_id = ?2 AND (source_account_id = ?1 OR target_account_id = ?1)
             )",
            params![key.account.0, key.currency.0],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn all_distinct_pairs_with_activity(&self) -> LedgerResult<BTreeSet<BalanceKey>> {
        let mut stmt = self.tx.prepare_cached(
            "SELECT source_account_id, currency_id FROM transfers
             UNION
             SELECT target_account_id, currency_id FROM transfers",
        )?;
        let mut rows = stmt.query([])?;
        let mut pairs = BTreeSet::new();
        while let Some(row) = rows.next()? {
            pairs.insert(BalanceKey::new(AccountId(row.get(0)?), CurrencyId(row.get(1)?)));
        }
        Ok(pairs)
    }

    fn net_balances(&self) -> LedgerResult<BTreeMap<BalanceKey, i64>> {
        let sql = format!("SELECT account_id, currency_id, delta FROM ({SIGNED_DELTAS})");
        let mut stmt = self.tx.prepare_cached(&sql)?;
        let mut rows = stmt.query([])?;
        let mut balances = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let key = BalanceKey::new(AccountId(row.get(0)?), CurrencyId(row.get(1)?));
            let delta: i64 = row.get(2)?;
            let balance: &mut i64 = balances.entry(key).or_default();
            *balance = balance.checked_add(delta).ok_or(LedgerError::Overflow(key))?;
        }
        Ok(balances)
    }

    fn transfer(&self, id: TransferId) -> LedgerResult<Option<Transfer>> {
        let sql = format!("SELECT {TRANSFER_COLUMNS} FROM transfers WHERE id = ?1");
        let mut stmt = self.tx.prepare_cached(&sql)?;
        let mut rows = stmt.query(params![id.0 as i64])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_transfer(row)?)),
            None => Ok(None),
        }
    }

    fn transfers_referencing_account(&self, account: AccountId) -> LedgerResult<Vec<Transfer>> {
        self.transfers_where(
            "source_account_id = ?1 OR target_account_id = ?1",
            account.0,
        )
    }

    fn transfers_in_currency(&self, currency: CurrencyId) -> LedgerResult<Vec<Transfer>> {
        self.transfers_where("currency_id = ?1", currency.0)
    }

    fn account(&self, id: AccountId) -> LedgerResult<Option<Account>> {
        let account = self
            .tx
            .query_row(
                "SELECT id, name FROM accounts WHERE id = ?1",
                params![id.0],
                |row| Ok(Account::new(AccountId(row.get(0)?), row.get::<_, String>(1)?)),
            )
            .optional()?;
        Ok(account)
    }

    fn account_by_name(&self, name: &str) -> LedgerResult<Option<Account>> {
        let account = self
            .tx
            .query_row(
                "SELECT id, name FROM accounts WHERE name = ?1",
                params![name],
                |row| Ok(Account::new(AccountId(row.get(0)?), row.get::<_, String>(1)?)),
            )
            .optional()?;
        Ok(account)
    }

    fn currency(&self, id: CurrencyId) -> LedgerResult<Option<Currency>> {
        let currency = self
            .tx
            .query_row(
                "SELECT id, code, fraction_digits FROM currencies WHERE id = ?1",
                params![id.0],
                row_to_currency,
            )
            .optional()?;
        Ok(currency)
    }

    fn currency_by_code(&self, code: &str) -> LedgerResult<Option<Currency>> {
        let currency = self
            .tx
            .query_row(
                "SELECT id, code, fraction_digits FROM currencies WHERE code = ?1",
                params![code],
                row_to_currency,
            )
            .optional()?;
        Ok(currency)
    }
}

impl LedgerWriter for SqliteTransaction<'_> {
    fn insert_account(&mut self, name: &str) -> LedgerResult<Account> {
        self.tx
            .execute("INSERT INTO accounts (name) VALUES (?1)", params![name])?;
        Ok(Account::new(AccountId(last_id(&self.tx)?), name))
    }

    fn delete_account(&mut self, id: AccountId) -> LedgerResult<Account> {
        let account = self.account(id)?.ok_or(LedgerError::AccountNotFound(id))?;
        self.tx
            .execute("DELETE FROM accounts WHERE id = ?1", params![id.0])?;
        Ok(account)
    }

    fn insert_currency(&mut self, code: &str, fraction_digits: u8) -> LedgerResult<Currency> {
        self.tx.execute(
            "INSERT INTO currencies (code, fraction_digits) VALUES (?1, ?2)",
            params![code, fraction_digits],
        )?;
        Ok(Currency::new(CurrencyId(last_id(&self.tx)?), code, fraction_digits))
    }

    fn delete_currency(&mut self, id: CurrencyId) -> LedgerResult<Currency> {
        let currency = self.currency(id)?.ok_or(LedgerError::CurrencyNotFound(id))?;
        self.tx
            .execute("DELETE FROM currencies WHERE id = ?1", params![id.0])?;
        Ok(currency)
    }

    fn insert_transfer(&mut self, draft: TransferDraft) -> LedgerResult<Transfer> {
        self.tx.execute(
            "INSERT INTO transfers (
                timestamp, description, source_account_id, target_account_id, currency_id, amount
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                draft.timestamp.to_rfc3339(),
                draft.description,
                draft.source.0,
                draft.target.0,
                draft.currency.0,
                draft.amount
            ],
        )?;
        let id = TransferId(self.tx.last_insert_rowid() as u64);
        Ok(Transfer::from_draft(id, draft))
    }

    fn update_transfer(&mut self, id: TransferId, draft: TransferDraft) -> LedgerResult<Transfer> {
        let before = self.transfer(id)?.ok_or(LedgerError::TransferNotFound(id))?;
        self.tx.execute(
            "UPDATE transfers
             SET timestamp = ?1, description = ?2, source_account_id = ?3,
                 target_account_id = ?4, currency_id = ?5, amount = ?6
             WHERE id = ?7",
            params![
                draft.timestamp.to_rfc3339(),
                draft.description,
                draft.source.0,
                draft.target.0,
                draft.currency.0,
                draft.amount,
                id.0 as i64
            ],
        )?;
        Ok(before)
    }

    fn delete_transfer(&mut self, id: TransferId) -> LedgerResult<Transfer> {
        let transfer = self.transfer(id)?.ok_or(LedgerError::TransferNotFound(id))?;
        self.tx
            .execute("DELETE FROM transfers WHERE id = ?1", params![id.0 as i64])?;
        Ok(transfer)
    }
}

impl BalanceStore for SqliteTransaction<'_> {
    fn balance(&self, key: BalanceKey) -> LedgerResult<Option<i64>> {
        let balance = self
            .tx
            .query_row(
                "SELECT balance FROM account_balances WHERE account_id = ?1 AND currency_id = ?2",
                params![key.account.0, key.currency.0],
                |row| row.get(0),
            )
            .optional()?;
        Ok(balance)
    }

    fn balances(&self) -> LedgerResult<BTreeMap<BalanceKey, i64>> {
        self.keyed_rows(
            "SELECT account_id, currency_id, balance FROM account_balances
             ORDER BY account_id, currency_id",
        )
    }

    fn upsert_balance(&mut self, key: BalanceKey, balance: i64) -> LedgerResult<()> {
        self.tx.execute(
            "INSERT INTO account_balances (account_id, currency_id, balance)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(account_id, currency_id) DO UPDATE SET balance = excluded.balance",
            params![key.account.0, key.currency.0, balance],
        )?;
        Ok(())
    }

    fn delete_balance(&mut self, key: BalanceKey) -> LedgerResult<bool> {
        let removed = self.tx.execute(
            "DELETE FROM account_balances WHERE account_id = ?1 AND currency_id = ?2",
            params![key.account.0, key.currency.0],
        )?;
        Ok(removed > 0)
    }

    fn truncate_balances(&mut self) -> LedgerResult<usize> {
        Ok(self.tx.execute("DELETE FROM account_balances", [])?)
    }
}

impl PendingChangeStore for SqliteTransaction<'_> {
    fn mark_pending(&mut self, key: BalanceKey) -> LedgerResult<()> {
        self.tx.execute(
            "INSERT INTO pending_balance_changes (account_id, currency_id) VALUES (?1, ?2)",
            params![key.account.0, key.currency.0],
        )?;
        Ok(())
    }

    fn drain_all(&mut self) -> LedgerResult<BTreeSet<BalanceKey>> {
        let mut pairs = BTreeSet::new();
        {
            let mut stmt = self
                .tx
                .prepare_cached("SELECT DISTINCT account_id, currency_id FROM pending_balance_changes")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                pairs.insert(BalanceKey::new(AccountId(row.get(0)?), CurrencyId(row.get(1)?)));
            }
        }
        self.tx.execute("DELETE FROM pending_balance_changes", [])?;
        Ok(pairs)
    }

    fn pending_count(&self) -> LedgerResult<usize> {
        let count: i64 = self
            .tx
            .query_row("SELECT COUNT(*) FROM pending_balance_changes", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn last_id(conn: &Connection) -> LedgerResult<u32> {
    let rowid = conn.last_insert_rowid();
    u32::try_from(rowid).map_err(|_| LedgerError::Serialization(format!("row id {rowid} out of range")))
}

fn row_to_currency(row: &rusqlite::Row<'_>) -> rusqlite::Result<Currency> {
    Ok(Currency::new(
        CurrencyId(row.get(0)?),
        row.get::<_, String>(1)?,
        row.get(2)?,
    ))
}

fn row_to_transfer(row: &rusqlite::Row<'_>) -> LedgerResult<Transfer> {
    let id: i64 = row.get(0)?;
    let timestamp_str: String = row.get(1)?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
        .map_err(|err| {
            LedgerError::Serialization(format!("invalid timestamp {timestamp_str}: {err}"))
        })?
        .with_timezone(&Utc);

    Ok(Transfer {
        id: TransferId(id as u64),
        timestamp,
        description: row.get(2)?,
        source: AccountId(row.get(3)?),
        target: AccountId(row.get(4)?),
        currency: CurrencyId(row.get(5)?),
        amount: row.get(6)?,
    })
}
