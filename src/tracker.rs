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

//! Change tracking for ledger mutations.
//!
//! A [`ChangeRecorder`] turns [`LedgerEvent`]s into pending-change entries
//! inside the transaction that performed the mutation. It runs in one of
//! two modes:
//!
//! - **Immediate**: every recorded event marks its pairs right away.
//! - **Batched**: events only accumulate their pairs; [`ChangeRecorder::finish`]
//!   marks each distinct pair once when the bulk operation is done.
//!
//! Both modes leave the same set of pairs pending, so a reconcile pass
//! after either one produces the same balances.

use crate::base::BalanceKey;
use crate::error::LedgerResult;
use crate::event::LedgerEvent;
use crate::store::PendingChangeStore;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Immediate,
    Batched,
}

/// Records the pairs affected by ledger events as pending changes.
#[derive(Debug)]
#[must_use = "a batched recorder marks nothing until finish() is called"]
pub struct ChangeRecorder {
    mode: Mode,
    deferred: BTreeSet<BalanceKey>,
}

impl ChangeRecorder {
    pub fn immediate() -> Self {
        Self {
            mode: Mode::Immediate,
            deferred: BTreeSet::new(),
        }
    }

    pub fn batched() -> Self {
        Self {
            mode: Mode::Batched,
            deferred: BTreeSet::new(),
        }
    }

    pub fn is_batched(&self) -> bool {
        self.mode == Mode::Batched
    }

    /// Records `event`. Returns the number of pairs marked by this call.
    pub fn record<T>(&mut self, store: &mut T, event: &LedgerEvent) -> LedgerResult<usize>
    where
        T: PendingChangeStore + ?Sized,
    {
        let pairs = event.affected_pairs();
        match self.mode {
            Mode::Immediate => mark_all(store, &pairs),
            Mode::Batched => {
                self.deferred.extend(pairs);
                Ok(0)
            }
        }
    }

    /// Marks every deferred pair. Returns the number of pairs marked.
    ///
    /// Must run in the same transaction as the recorded mutations.
    pub fn finish<T>(self, store: &mut T) -> LedgerResult<usize>
    where
        T: PendingChangeStore + ?Sized,
    {
        mark_all(store, &self.deferred)
    }
}

fn mark_all<T>(store: &mut T, pairs: &BTreeSet<BalanceKey>) -> LedgerResult<usize>
where
    T: PendingChangeStore + ?Sized,
{
    for pair in pairs {
        store.mark_pending(*pair)?;
    }
    Ok(pairs.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{AccountId, CurrencyId, TransferId};
    use crate::store::{MemoryStore, TransactionalStore};
    use crate::transfer::{Transfer, TransferDraft};
    use chrono::Utc;

    fn inserted(id: u64, source: u32, target: u32) -> LedgerEvent {
        LedgerEvent::TransferInserted(Transfer::from_draft(
            TransferId(id),
            TransferDraft::new(Utc::now(), AccountId(source), AccountId(target), CurrencyId(1), 10),
        ))
    }

    #[test]
    fn immediate_marks_on_every_event() {
        let store = MemoryStore::new();
        let count = store
            .transaction(|tx| {
                let mut recorder = ChangeRecorder::immediate();
                assert_eq!(recorder.record(tx, &inserted(1, 1, 2))?, 2);
                assert_eq!(recorder.record(tx, &inserted(2, 1, 2))?, 2);
                recorder.finish(tx)?;
                tx.pending_count()
            })
            .unwrap();
        assert_eq!(count, 4);
    }

    #[test]
    fn batched_marks_each_pair_once_on_finish() {
        let store = MemoryStore::new();
        let count = store
            .transaction(|tx| {
                let mut recorder = ChangeRecorder::batched();
                for id in 0..10 {
                    assert_eq!(recorder.record(tx, &inserted(id, 1, 2))?, 0);
                }
                recorder.record(tx, &inserted(11, 2, 3))?;
                assert_eq!(tx.pending_count()?, 0);
                assert_eq!(recorder.finish(tx)?, 3);
                tx.pending_count()
            })
            .unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn both_modes_leave_the_same_pending_set() {
        let events = [inserted(1, 1, 2), inserted(2, 3, 1), inserted(3, 2, 3)];
        let drain_with = |mut recorder: ChangeRecorder| {
            MemoryStore::new()
                .transaction(|tx| {
                    for event in &events {
                        recorder.record(tx, event)?;
                    }
                    recorder.finish(tx)?;
                    tx.drain_all()
                })
                .unwrap()
        };
        assert_eq!(
            drain_with(ChangeRecorder::immediate()),
            drain_with(ChangeRecorder::batched())
        );
    }
}
