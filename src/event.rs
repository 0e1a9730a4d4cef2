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

//! Ledger mutation events.
//!
//! Every mutating ledger operation describes what it did as a
//! [`LedgerEvent`]. The event alone determines which balance pairs may
//! have changed, so the derivation lives here and nowhere else.

use crate::account::Account;
use crate::base::BalanceKey;
use crate::currency::Currency;
use crate::transfer::Transfer;
use std::collections::BTreeSet;

/// A committed change to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    TransferInserted(Transfer),
    /// Carries both states: moving a transfer to other accounts or another
    /// currency vacates the old pairs as well as touching the new ones.
    TransferUpdated {
        before: Transfer,
        after: Transfer,
    },
    TransferDeleted(Transfer),
    /// An account was removed along with every transfer referencing it.
    AccountRemoved {
        account: Account,
        transfers: Vec<Transfer>,
    },
    /// A currency was removed along with every transfer denominated in it.
    CurrencyRemoved {
        currency: Currency,
        transfers: Vec<Transfer>,
    },
}

impl LedgerEvent {
    /// Returns the deduplicated set of pairs whose balance may have changed.
    ///
    /// | Event | Pairs |
    /// |-------|-------|
    /// | Insert | `(source, currency)`, `(target, currency)` |
    /// | Update | both pairs of the old state and both of the new (up to 4) |
    /// | Delete | both pairs of the deleted state |
    /// | Account/currency removal | both pairs of every cascaded transfer |
    pub fn affected_pairs(&self) -> BTreeSet<BalanceKey> {
        match self {
            Self::TransferInserted(transfer) | Self::TransferDeleted(transfer) => {
                transfer.affected_pairs().into_iter().collect()
            }
            Self::TransferUpdated { before, after } => before
                .affected_pairs()
                .into_iter()
                .chain(after.affected_pairs())
                .collect(),
            Self::AccountRemoved { transfers, .. } | Self::CurrencyRemoved { transfers, .. } => {
                transfers.iter().flat_map(Transfer::affected_pairs).collect()
            }
        }
    }
}
