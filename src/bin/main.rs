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

use async_trait::async_trait;
use chrono::Duration;
use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use seller_ledger::{
    AdminId, BalanceReleaseScheduler, BankInfo, DisputeId, Ledger, LedgerConfig, ManualClock,
    MemoryStore, MemoryWithdrawalStore, OrderId, PaymentProvider, PixKeyType, ProviderError,
    SellerId, Transfer, TransferRequest, TransferStatus, WithdrawalReleaseScheduler,
    WithdrawalWorkflow,
};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;

/// Seller Ledger - Replay ledger event CSV files
///
/// Reads seller ledger events from a CSV file, runs them through the ledger
/// and the release schedulers on a simulated clock, and writes the final
/// seller balances to stdout.
#[derive(Parser, Debug)]
#[command(name = "seller-ledger")]
#[command(about = "Replays seller ledger events and prints balances", long_about = None)]
struct Args {
    /// Path to CSV file with ledger events
    ///
    /// Expected format: type,seller,reference,amount
    /// Example: cargo run -- events.csv > balances.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    #[command(flatten)]
    config: LedgerConfig,
}

/// Admin recorded on adjustments and approvals made by a replay.
const REPLAY_ADMIN: AdminId = AdminId(0);
const REPLAY_REASON: &str = "replayed from event file";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            error!(path = %args.input.display(), error = %e, "cannot open input file");
            process::exit(1);
        }
    };

    let replay = match replay_events(BufReader::new(file), args.config).await {
        Ok(replay) => replay,
        Err(e) => {
            error!(error = %e, "cannot process events");
            process::exit(1);
        }
    };

    if let Err(e) = write_balances(&replay, std::io::stdout()) {
        error!(error = %e, "cannot write output");
        process::exit(1);
    }
}

/// Pays every transfer immediately; replays never leave the process.
struct AcceptingProvider;

#[async_trait]
impl PaymentProvider for AcceptingProvider {
    async fn create_transfer(&self, request: TransferRequest) -> Result<Transfer, ProviderError> {
        Ok(Transfer {
            id: format!("replay-{}", request.metadata.withdrawal_id),
            status: TransferStatus::Succeeded,
            destination: request.bank_info.masked(),
        })
    }
}

/// Ledger state after a replay.
pub struct Replay {
    ledger: Arc<Ledger>,
    sellers: BTreeSet<SellerId>,
}

/// Raw CSV record matching the input format.
///
/// Fields: `type, seller, reference, amount`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(rename = "type")]
    event: String,
    seller: u32,
    #[serde(default)]
    reference: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    amount: Option<Decimal>,
}

/// Replays ledger events from a CSV reader.
///
/// # CSV Format
///
/// Expected columns: `type, seller, reference, amount`
/// - `sale`, `refund`, `fee`: `reference` is the order id
/// - `hold`, `release`, `chargeback`: `reference` is the dispute id
/// - `adjust`: `reference` is the reason; `amount` may be negative
/// - `withdraw`: `reference` is a PIX key; the request is approved and
///   anticipated at once, and paid out on the next `tick`
/// - `tick`: advances the clock by `amount` hours and runs both schedulers
///
/// # Example
///
/// ```csv
/// type,seller,reference,amount
/// sale,1,order-1,100.0
/// tick,0,,72
/// withdraw,1,seller@example.com,60.0
/// tick,0,,0
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails. Malformed rows and rejected
/// events are logged and skipped.
pub async fn replay_events<R: Read>(reader: R, config: LedgerConfig) -> Result<Replay, csv::Error> {
    let clock = Arc::new(ManualClock::default());
    let ledger = Arc::new(Ledger::new(Arc::new(MemoryStore::new()), clock.clone(), config));
    let workflow = Arc::new(WithdrawalWorkflow::new(
        ledger.clone(),
        Arc::new(MemoryWithdrawalStore::new()),
        Arc::new(AcceptingProvider),
    ));
    let balance_release = BalanceReleaseScheduler::new(ledger.clone());
    let withdrawal_release = WithdrawalReleaseScheduler::new(workflow.clone());
    let mut sellers = BTreeSet::new();

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for result in rdr.deserialize::<CsvRecord>() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "skipping malformed row");
                continue;
            }
        };

        let seller = SellerId(record.seller);
        let Some(amount) = record.amount else {
            warn!(event = %record.event, "skipping row without amount");
            continue;
        };
        let reference = record.reference;
        let event = record.event.to_lowercase();

        let outcome = match event.as_str() {
            "sale" => ledger
                .credit_sale(seller, amount, OrderId(reference), None)
                .map(|_| ())
                .map_err(|e| e.to_string()),
            "refund" => ledger
                .process_refund(seller, amount, OrderId(reference), None)
                .map(|_| ())
                .map_err(|e| e.to_string()),
            "fee" => ledger
                .charge_platform_fee(seller, amount, OrderId(reference))
                .map(|_| ())
                .map_err(|e| e.to_string()),
            "hold" => ledger
                .hold_funds(seller, amount, DisputeId(reference), "dispute opened")
                .map(|_| ())
                .map_err(|e| e.to_string()),
            "release" => ledger
                .release_funds(seller, amount, DisputeId(reference), "dispute resolved")
                .map(|_| ())
                .map_err(|e| e.to_string()),
            "chargeback" => ledger
                .chargeback(seller, amount, DisputeId(reference), "dispute lost")
                .map(|_| ())
                .map_err(|e| e.to_string()),
            "adjust" => ledger
                .manual_adjustment(seller, amount, &reference, REPLAY_ADMIN)
                .map(|_| ())
                .map_err(|e| e.to_string()),
            "withdraw" => {
                let bank_info = BankInfo::Pix {
                    pix_key: reference,
                    pix_key_type: PixKeyType::Random,
                };
                workflow
                    .request_withdrawal(seller, amount, bank_info)
                    .and_then(|w| workflow.approve_withdrawal(w.id, REPLAY_ADMIN))
                    .and_then(|w| {
                        workflow.anticipate_withdrawal(w.id, REPLAY_ADMIN, REPLAY_REASON, None)
                    })
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
            "tick" => match (amount * Decimal::from(60)).to_i64() {
                Some(minutes) if minutes >= 0 => {
                    clock.advance(Duration::minutes(minutes));
                    balance_release.run_once();
                    withdrawal_release.run_once().await;
                    Ok(())
                }
                _ => Err("clock cannot move backwards".to_string()),
            },
            other => Err(format!("unknown event type '{other}'")),
        };

        match outcome {
            Ok(()) => {
                if event != "tick" {
                    sellers.insert(seller);
                }
            }
            Err(reason) => debug!(%event, seller = %seller, %reason, "skipping event"),
        }
    }

    Ok(Replay { ledger, sellers })
}

/// Writes final seller balances as CSV.
///
/// # CSV Format
///
/// Columns: `seller, available, pending, held, total_earned, total_withdrawn`
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_balances<W: Write>(replay: &Replay, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for seller in &replay.sellers {
        wtr.serialize(replay.ledger.get_or_create_balance(*seller))?;
    }

    wtr.flush()?;
    Ok(())
}
