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

//! # Seller Ledger
//!
//! This library tracks what each marketplace seller has earned, what is
//! still on hold, and what can be paid out, and moves money between those
//! buckets without ever double-crediting or double-debiting a seller.
//!
//! ## Core Components
//!
//! - [`Ledger`]: the only writer of seller balances; pairs every change with one journal row
//! - [`LedgerStore`] / [`MemoryStore`]: balances plus the append-only transaction journal
//! - [`WithdrawalWorkflow`]: payout state machine with approval, delay and anticipation
//! - [`BalanceReleaseScheduler`] / [`WithdrawalReleaseScheduler`]: hourly jobs
//! - [`PaymentProvider`]: the seam to whatever actually sends the money
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use chrono::Duration;
//! use rust_decimal_macros::dec;
//! use seller_ledger::{
//!     BalanceReleaseScheduler, Ledger, LedgerConfig, ManualClock, MemoryStore, OrderId, SellerId,
//! };
//!
//! let clock = Arc::new(ManualClock::default());
//! let ledger = Arc::new(Ledger::new(
//!     Arc::new(MemoryStore::new()),
//!     clock.clone(),
//!     LedgerConfig::default(),
//! ));
//!
//! // An order was paid: the sale sits in the pending bucket.
//! ledger.credit_sale(SellerId(1), dec!(100.00), OrderId::from("order-1"), None).unwrap();
//! assert_eq!(ledger.balance(SellerId(1)).unwrap().pending_balance, dec!(100.00));
//!
//! // After the holding period the release job makes it withdrawable.
//! clock.advance(Duration::hours(72));
//! BalanceReleaseScheduler::new(ledger.clone()).run_once();
//! assert_eq!(ledger.balance(SellerId(1)).unwrap().available_balance, dec!(100.00));
//! ```
//!
//! ## Thread Safety
//!
//! Mutations of one seller are serialized on that seller's row; different
//! sellers proceed in parallel.

pub mod balance;
mod base;
mod clock;
mod config;
mod engine;
pub mod error;
mod journal;
mod provider;
mod scheduler;
pub mod store;
mod transaction;
mod withdrawal;
mod workflow;

pub use balance::{BalanceSnapshot, BucketDelta, Overdraft, SellerBalance};
pub use base::{AdminId, DisputeId, OrderId, Reference, SellerId, TransactionId, WithdrawalId};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::LedgerConfig;
pub use engine::Ledger;
pub use error::{ErrorKind, LedgerError, ProviderError, StoreError, WithdrawalError};
pub use journal::Journal;
pub use provider::{PaymentProvider, Transfer, TransferMetadata, TransferRequest, TransferStatus};
pub use scheduler::{
    BalanceReleaseScheduler, ReleaseFailure, ReleaseReport, WithdrawalFailure,
    WithdrawalReleaseScheduler, WithdrawalRunReport,
};
pub use store::{Fault, LedgerStore, MemoryStore, MemoryWithdrawalStore, WithdrawalStore};
pub use transaction::{JournalEntry, Transaction, TransactionStatus, TransactionType, replay};
pub use withdrawal::{BankInfo, PixKeyType, Withdrawal, WithdrawalStatus};
pub use workflow::{MIN_ANTICIPATION_REASON_CHARS, WithdrawalWorkflow};
