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

//! Currencies and their minor-unit representation.
//!
//! The ledger stores every amount as an integer count of minor units
//! (cents for USD). Conversion to and from decimal notation only happens
//! at the edges, when reading CSV input or printing balances.
//!
//! ```
//! use ledger_views::{Currency, CurrencyId};
//! use rust_decimal_macros::dec;
//!
//! let usd = Currency::new(CurrencyId(1), "USD", 2);
//! assert_eq!(usd.to_minor_units(dec!(12.34)), Some(1234));
//! assert_eq!(usd.from_minor_units(-150), Some(dec!(-1.50)));
//! ```

use crate::base::CurrencyId;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Largest number of decimal places a currency may have.
///
/// Beyond this, one major unit no longer fits in an `i64` count of minor
/// units.
pub const MAX_FRACTION_DIGITS: u8 = 18;

/// A currency tracked independently by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    pub id: CurrencyId,
    /// Short code, unique within a ledger (e.g. `USD`).
    pub code: String,
    /// Number of decimal places one major unit is split into.
    pub fraction_digits: u8,
}

impl Currency {
    pub fn new(id: CurrencyId, code: impl Into<String>, fraction_digits: u8) -> Self {
        Self {
            id,
            code: code.into(),
            fraction_digits,
        }
    }

    /// Converts a decimal amount into minor units.
    ///
    /// Returns `None` if the amount has more precision than the currency
    /// supports or does not fit in an `i64`.
    pub fn to_minor_units(&self, amount: Decimal) -> Option<i64> {
        let factor = 10i64.checked_pow(u32::from(self.fraction_digits))?;
        let scaled = amount.checked_mul(Decimal::from(factor))?;
        if !scaled.fract().is_zero() {
            return None;
        }
        scaled.to_i64()
    }

    /// Renders a minor-unit amount as a decimal with the currency's precision.
    ///
    /// Returns `None` if the precision exceeds what [`Decimal`] can represent.
    pub fn from_minor_units(&self, minor: i64) -> Option<Decimal> {
        Decimal::try_new(minor, u32::from(self.fraction_digits)).ok()
    }
}
