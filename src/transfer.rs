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

//! Transfer records.
//!
//! A transfer moves a positive `amount` of one currency from `source` to
//! `target`. Its effect on balances is `-amount` for `(source, currency)`
//! and `+amount` for `(target, currency)`; the timestamp plays no part in
//! that effect.

use crate::base::{AccountId, BalanceKey, CurrencyId, TransferId};
use crate::error::{LedgerError, LedgerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Caller-supplied contents of a transfer, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDraft {
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub source: AccountId,
    pub target: AccountId,
    pub currency: CurrencyId,
    /// Magnitude in minor units; direction is always source to target.
    pub amount: i64,
}

impl TransferDraft {
    pub fn new(
        timestamp: DateTime<Utc>,
        source: AccountId,
        target: AccountId,
        currency: CurrencyId,
        amount: i64,
    ) -> Self {
        Self {
            timestamp,
            description: String::new(),
            source,
            target,
            currency,
            amount,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Checks the shape rules the ledger enforces on every transfer.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidTransfer`] - source equals target, or the
    ///   amount is zero or negative.
    pub fn validate(&self) -> LedgerResult<()> {
        if self.source == self.target {
            return Err(LedgerError::InvalidTransfer(
                "source and target accounts must differ",
            ));
        }
        if self.amount <= 0 {
            return Err(LedgerError::InvalidTransfer("amount must be positive"));
        }
        Ok(())
    }
}

/// A transfer as persisted by the ledger store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub source: AccountId,
    pub target: AccountId,
    pub currency: CurrencyId,
    pub amount: i64,
}

impl Transfer {
    pub fn from_draft(id: TransferId, draft: TransferDraft) -> Self {
        Self {
            id,
            timestamp: draft.timestamp,
            description: draft.description,
            source: draft.source,
            target: draft.target,
            currency: draft.currency,
            amount: draft.amount,
        }
    }

    /// The two balance pairs this transfer contributes to, source first.
    pub fn affected_pairs(&self) -> [BalanceKey; 2] {
        [
            BalanceKey::new(self.source, self.currency),
            BalanceKey::new(self.target, self.currency),
        ]
    }

    /// Whether this transfer contributes to `key`.
    pub fn touches(&self, key: &BalanceKey) -> bool {
        self.currency == key.currency && (self.source == key.account || self.target == key.account)
    }
}
