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

//! Benchmarks for balance reconciliation.
//!
//! Run with: cargo bench
//!
//! Benchmarks include:
//! - Incremental refresh after a single insert, by ledger size
//! - Full rebuild, by ledger size
//! - Bulk import with batched change tracking

use chrono::{Duration, TimeZone, Utc};
use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use ledger_views::{
    Account, Currency, Ledger, MaintenanceService, MemoryStore, SqliteStore, TransactionalStore,
    TransferDraft,
};
use std::hint::black_box;
use std::sync::Arc;

const NUM_ACCOUNTS: usize = 50;

// =============================================================================
// Helper Functions
// =============================================================================

struct Fixture<S> {
    ledger: Ledger<S>,
    maintenance: MaintenanceService<S>,
    accounts: Vec<Account>,
    usd: Currency,
}

fn make_draft(accounts: &[Account], usd: &Currency, i: usize) -> TransferDraft {
    let source = &accounts[i % accounts.len()];
    let target = &accounts[(i * 7 + 1) % accounts.len()];
    let target = if target.id == source.id {
        &accounts[(i + 1) % accounts.len()]
    } else {
        target
    };
    TransferDraft::new(
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(i as i64),
        source.id,
        target.id,
        usd.id,
        100 + (i as i64 % 1_000),
    )
}

/// A ledger with `transfers` rows, fully refreshed.
fn fixture<S: TransactionalStore>(store: S, transfers: usize) -> Fixture<S> {
    let store = Arc::new(store);
    let ledger = Ledger::new(Arc::clone(&store));
    let accounts: Vec<Account> = (0..NUM_ACCOUNTS)
        .map(|i| ledger.create_account(&format!("acct-{i}")).unwrap())
        .collect();
    let usd = ledger.create_currency("USD", 2).unwrap();
    let drafts: Vec<_> = (0..transfers).map(|i| make_draft(&accounts, &usd, i)).collect();
    ledger.import_transfers(drafts).unwrap();

    let maintenance = MaintenanceService::new(store);
    maintenance.full_refresh_materialized_views().unwrap();
    Fixture {
        ledger,
        maintenance,
        accounts,
        usd,
    }
}

// =============================================================================
// Refresh Benchmarks
// =============================================================================

fn bench_incremental_refresh<S: TransactionalStore>(c: &mut Criterion, name: &str, open: impl Fn() -> S) {
    let mut group = c.benchmark_group(format!("incremental_refresh/{name}"));

    for size in [1_000, 10_000].iter() {
        let f = fixture(open(), *size);
        let mut next = *size;
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter_batched(
                || {
                    next += 1;
                    f.ledger
                        .insert_transfer(make_draft(&f.accounts, &f.usd, next))
                        .unwrap();
                },
                |_| black_box(f.maintenance.refresh_materialized_views().unwrap()),
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn bench_full_refresh<S: TransactionalStore>(c: &mut Criterion, name: &str, open: impl Fn() -> S) {
    let mut group = c.benchmark_group(format!("full_refresh/{name}"));
    group.sample_size(20);

    for size in [1_000, 10_000].iter() {
        let f = fixture(open(), *size);
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(f.maintenance.full_refresh_materialized_views().unwrap()))
        });
    }
    group.finish();
}

fn bench_memory(c: &mut Criterion) {
    bench_incremental_refresh(c, "memory", MemoryStore::new);
    bench_full_refresh(c, "memory", MemoryStore::new);
}

fn bench_sqlite(c: &mut Criterion) {
    let open = || SqliteStore::open_in_memory().unwrap();
    bench_incremental_refresh(c, "sqlite", open);
    bench_full_refresh(c, "sqlite", open);
}

// =============================================================================
// Import Benchmarks
// =============================================================================

fn bench_bulk_import(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk_import");

    for count in [100, 1_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter(|| {
                let f = fixture(SqliteStore::open_in_memory().unwrap(), 0);
                let drafts: Vec<_> = (0..count).map(|i| make_draft(&f.accounts, &f.usd, i)).collect();
                f.ledger.import_transfers(drafts).unwrap();
                black_box(f.maintenance.refresh_materialized_views().unwrap());
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_memory, bench_sqlite, bench_bulk_import);
criterion_main!(benches);
