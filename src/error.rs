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

//! Error types for ledger mutations and balance reconciliation.

use crate::base::{AccountId, BalanceKey, CurrencyId, TransferId};
use thiserror::Error;

/// Result alias for ledger and reconciliation operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger and reconciliation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The underlying transaction could not complete (lock contention, I/O).
    ///
    /// The transaction was rolled back, so retrying is always safe.
    #[error("storage error: {0}")]
    Storage(String),

    /// A persisted value could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A recomputed balance disagrees with the transfers referencing its pair.
    #[error("inconsistent balance for pair {key}: recomputed {balance} with no referencing transfer")]
    InconsistentPair { key: BalanceKey, balance: i64 },

    /// Summing a pair's transfers left the `i64` range.
    #[error("balance overflow for pair {0}")]
    Overflow(BalanceKey),

    /// Referenced account does not exist
    #[error("account {0} not found")]
    AccountNotFound(AccountId),

    /// Referenced currency does not exist
    #[error("currency {0} not found")]
    CurrencyNotFound(CurrencyId),

    /// Referenced transfer does not exist
    #[error("transfer {0} not found")]
    TransferNotFound(TransferId),

    /// Account name already taken
    #[error("duplicate account name {0:?}")]
    DuplicateAccount(String),

    /// Currency code already taken
    #[error("duplicate currency code {0:?}")]
    DuplicateCurrency(String),

    /// Currency precision beyond what minor-unit amounts can express
    #[error("unsupported precision: {0} fraction digits")]
    UnsupportedPrecision(u8),

    /// Transfer failed validation before reaching the store
    #[error("invalid transfer: {0}")]
    InvalidTransfer(&'static str),
}

impl LedgerError {
    /// Whether the failed operation can simply be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Storage(value.to_string())
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(value: std::io::Error) -> Self {
        Self::Storage(value.to_string())
    }
}
