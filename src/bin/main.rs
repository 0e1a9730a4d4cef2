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

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use csv::{ReaderBuilder, Trim, Writer};
use ledger_views::{
    JournalMode, Ledger, LedgerError, MaintenanceService, SqliteStore, StoreConfig, Synchronous,
    Transfer, TransferDraft, TransferId, TransactionalStore,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Ledger Views - maintain materialized account balances
///
/// Imports transfers into a SQLite ledger and keeps per-account,
/// per-currency balances up to date, incrementally or by full rebuild.
#[derive(Parser, Debug)]
#[command(name = "ledger-views")]
#[command(about = "Maintains materialized account balances over a transfer ledger", long_about = None)]
struct Cli {
    /// Path to the SQLite ledger database
    #[arg(long, env = "LEDGER_VIEWS_DB", default_value = "ledger.db")]
    db: PathBuf,

    /// SQLite journal mode
    #[arg(long, value_enum, default_value_t = JournalMode::Wal)]
    journal_mode: JournalMode,

    /// SQLite synchronous level
    #[arg(long, value_enum, default_value_t = Synchronous::Normal)]
    synchronous: Synchronous,

    /// Milliseconds to wait on a locked database
    #[arg(long, default_value_t = 5_000)]
    busy_timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import transfers from a CSV file in one transaction
    ///
    /// Expected format: timestamp,description,source,target,currency,amount
    /// Unknown accounts and currencies are created on the fly.
    Import {
        #[arg(value_name = "FILE")]
        input: PathBuf,
        /// Decimal places for currencies created by this import
        #[arg(long, default_value_t = 2)]
        fraction_digits: u8,
        /// Refresh balances once the import commits
        #[arg(long)]
        refresh: bool,
    },
    /// Delete a transfer by id
    DeleteTransfer {
        id: u64,
        /// Refresh balances once the delete commits
        #[arg(long)]
        refresh: bool,
    },
    /// Reconcile pending changes into the balance rows
    Refresh,
    /// Rebuild every balance row from the ledger
    FullRefresh,
    /// Print balances as CSV
    Balances,
    /// Compare stored balances against a full rebuild; exits 2 on mismatch
    Verify,
    /// Print the number of pending changes
    Pending,
    /// Run storage housekeeping
    Maintain {
        #[arg(long)]
        reindex: bool,
        #[arg(long)]
        vacuum: bool,
        #[arg(long)]
        analyze: bool,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("line {line}: {reason}")]
    InvalidRecord { line: u64, reason: String },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = StoreConfig {
        path: cli.db.clone(),
        busy_timeout_ms: cli.busy_timeout_ms,
        journal_mode: cli.journal_mode,
        synchronous: cli.synchronous,
    };

    let store = match SqliteStore::open(&config) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("Error opening ledger '{}': {}", config.path.display(), e);
            process::exit(1);
        }
    };

    match run(cli.command, store) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

/// Executes one subcommand. Returns the process exit code.
fn run<S: TransactionalStore>(command: Command, store: Arc<S>) -> Result<i32, CliError> {
    let ledger = Ledger::new(Arc::clone(&store));
    let maintenance = MaintenanceService::new(store);

    match command {
        Command::Import {
            input,
            fraction_digits,
            refresh,
        } => {
            let file = File::open(&input)?;
            let records = read_transfers(BufReader::new(file))?;
            let inserted = import_transfers(&ledger, records, fraction_digits)?;
            eprintln!("Imported {} transfers", inserted.len());
            if refresh {
                maintenance.refresh_materialized_views()?;
            }
        }
        Command::DeleteTransfer { id, refresh } => {
            ledger.delete_transfer(TransferId(id))?;
            if refresh {
                maintenance.refresh_materialized_views()?;
            }
        }
        Command::Refresh => {
            let elapsed = maintenance.refresh_materialized_views()?;
            eprintln!("Refreshed in {:?}", elapsed);
        }
        Command::FullRefresh => {
            let elapsed = maintenance.full_refresh_materialized_views()?;
            eprintln!("Rebuilt in {:?}", elapsed);
        }
        Command::Balances => write_balances(&ledger, io::stdout())?,
        Command::Verify => {
            let discrepancies = maintenance.verify()?;
            let mut wtr = Writer::from_writer(io::stdout());
            wtr.write_record(["account", "currency", "stored", "expected"])?;
            for d in &discrepancies {
                wtr.write_record([
                    d.key.account.to_string(),
                    d.key.currency.to_string(),
                    d.stored.map(|v| v.to_string()).unwrap_or_default(),
                    d.expected.map(|v| v.to_string()).unwrap_or_default(),
                ])?;
            }
            wtr.flush()?;
            if !discrepancies.is_empty() {
                return Ok(2);
            }
        }
        Command::Pending => println!("{}", maintenance.pending_changes()?),
        Command::Maintain {
            reindex,
            vacuum,
            analyze,
        } => {
            if reindex {
                maintenance.reindex()?;
            }
            if vacuum {
                maintenance.vacuum()?;
            }
            if analyze {
                maintenance.analyze()?;
            }
        }
    }
    Ok(0)
}

/// Raw CSV record matching the import format.
///
/// Fields: `timestamp, description, source, target, currency, amount`
#[derive(Debug, Clone, Deserialize, PartialEq)]
struct CsvTransfer {
    timestamp: DateTime<Utc>,
    #[serde(default)]
    description: String,
    source: String,
    target: String,
    currency: String,
    amount: Decimal,
}

/// Reads every transfer record from a CSV reader.
///
/// Unlike account snapshots, a ledger import must not silently drop rows:
/// the first malformed row aborts the read, before anything is written.
///
/// # CSV Format
///
/// ```csv
/// timestamp,description,source,target,currency,amount
/// 2025-01-01T09:00:00Z,Salary,Employer,Checking,USD,2500.00
/// 2025-01-02T12:30:00Z,Rent,Checking,Landlord,USD,1200.00
/// ```
fn read_transfers<R: Read>(reader: R) -> Result<Vec<CsvTransfer>, CliError> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .has_headers(true)
        .from_reader(reader);

    let mut records = Vec::new();
    for result in rdr.deserialize::<CsvTransfer>() {
        let record = result.map_err(|e| CliError::InvalidRecord {
            line: e.position().map(|p| p.line()).unwrap_or_default(),
            reason: e.to_string(),
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Resolves names to ids and imports all records as one batch.
fn import_transfers<S: TransactionalStore>(
    ledger: &Ledger<S>,
    records: Vec<CsvTransfer>,
    fraction_digits: u8,
) -> Result<Vec<Transfer>, CliError> {
    let mut drafts = Vec::with_capacity(records.len());
    for (index, record) in records.into_iter().enumerate() {
        // Header occupies line 1.
        let line = index as u64 + 2;
        let source = ledger.ensure_account(&record.source)?;
        let target = ledger.ensure_account(&record.target)?;
        let currency = ledger.ensure_currency(&record.currency, fraction_digits)?;
        let amount = currency
            .to_minor_units(record.amount)
            .ok_or_else(|| CliError::InvalidRecord {
                line,
                reason: format!(
                    "amount {} does not fit {} with {} decimal places",
                    record.amount, currency.code, currency.fraction_digits
                ),
            })?;
        drafts.push(
            TransferDraft::new(record.timestamp, source.id, target.id, currency.id, amount)
                .with_description(record.description),
        );
    }
    Ok(ledger.import_transfers(drafts)?)
}

#[derive(Debug, Serialize)]
struct BalanceRecord {
    account: String,
    currency: String,
    balance: Decimal,
}

/// Writes the materialized balances as CSV.
///
/// # CSV Format
///
/// ```csv
/// account,currency,balance
/// Checking,USD,1300.00
/// Employer,USD,-2500.00
/// ```
fn write_balances<S: TransactionalStore, W: Write>(
    ledger: &Ledger<S>,
    writer: W,
) -> Result<(), CliError> {
    let mut wtr = Writer::from_writer(writer);

    for (key, balance) in ledger.balances()? {
        let account = ledger
            .account(key.account)?
            .ok_or(LedgerError::AccountNotFound(key.account))?;
        let currency = ledger
            .currency(key.currency)?
            .ok_or(LedgerError::CurrencyNotFound(key.currency))?;
        let balance = currency
            .from_minor_units(balance)
            .ok_or(LedgerError::UnsupportedPrecision(currency.fraction_digits))?;
        wtr.serialize(BalanceRecord {
            account: account.name,
            balance,
            currency: currency.code,
        })?;
    }

    wtr.flush()?;
    Ok(())
}
