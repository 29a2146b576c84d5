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

//! Periodic jobs that move money forward in time.
//!
//! - [`BalanceReleaseScheduler`] promotes pending sales whose holding period
//!   elapsed.
//! - [`WithdrawalReleaseScheduler`] dispatches approved withdrawals whose
//!   delay window closed.
//!
//! Both isolate failures per item and never stop their loop on an error.
//! Both are safe to run repeatedly: released sales and processed withdrawals
//! drop out of the next run's query.

use crate::LedgerError;
use crate::base::{Reference, TransactionId, WithdrawalId};
use crate::engine::Ledger;
use crate::error::ErrorKind;
use crate::transaction::Transaction;
use crate::workflow::WithdrawalWorkflow;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(3600);
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Outcome of one balance release run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    /// Source SALE ids released in this run.
    pub released: Vec<TransactionId>,
    /// Pending sales whose holding period has not elapsed yet.
    pub not_due: usize,
    pub failures: Vec<ReleaseFailure>,
    /// Sales that used up their last attempt in this run.
    pub abandoned: Vec<TransactionId>,
    /// Sales skipped because they were abandoned by an earlier run.
    pub parked: usize,
    /// Sales another worker released first.
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseFailure {
    pub transaction_id: TransactionId,
    pub error: String,
}

/// Promotes due pending sales to available.
///
/// A sale that keeps failing is retried at most `max_attempts` times, then
/// logged once at ERROR and left alone until the scheduler restarts.
pub struct BalanceReleaseScheduler {
    ledger: Arc<Ledger>,
    interval: Duration,
    max_attempts: u32,
    attempts: DashMap<TransactionId, u32>,
}

impl BalanceReleaseScheduler {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            interval: DEFAULT_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempts: DashMap::new(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Failed runs allowed per sale before it is abandoned. At least one.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Releases every pending sale that is due now.
    pub fn run_once(&self) -> ReleaseReport {
        let fallback = self.ledger.config().balance_release_period();
        let now = self.ledger.clock().now();
        let mut report = ReleaseReport::default();

        for sale in self.ledger.pending_sales() {
            if sale.release_at(fallback) > now {
                report.not_due += 1;
                continue;
            }
            if self.is_abandoned(sale.id) {
                report.parked += 1;
                continue;
            }

            let order_id = match &sale.reference {
                Reference::Order(order_id) => order_id.clone(),
                other => {
                    let reason = format!("sale references {other}, not an order");
                    self.record_failure(&sale, reason, &mut report);
                    continue;
                }
            };

            match self
                .ledger
                .make_sale_available(sale.seller_id, sale.amount, order_id, sale.id)
            {
                Ok(_) => {
                    self.attempts.remove(&sale.id);
                    report.released.push(sale.id);
                }
                Err(LedgerError::SaleNotPending(_)) => {
                    debug!(transaction = %sale.id, "sale already released, skipped");
                    report.skipped += 1;
                }
                Err(e) => self.record_failure(&sale, e.to_string(), &mut report),
            }
        }

        if !report.released.is_empty() || !report.failures.is_empty() {
            info!(
                released = report.released.len(),
                failed = report.failures.len(),
                abandoned = report.abandoned.len(),
                not_due = report.not_due,
                "balance release run finished"
            );
        }
        report
    }

    fn is_abandoned(&self, id: TransactionId) -> bool {
        self.attempts
            .get(&id)
            .is_some_and(|attempts| *attempts >= self.max_attempts)
    }

    fn record_failure(&self, sale: &Transaction, reason: String, report: &mut ReleaseReport) {
        let attempts = {
            let mut attempts = self.attempts.entry(sale.id).or_insert(0);
            *attempts += 1;
            *attempts
        };

        if attempts >= self.max_attempts {
            error!(
                transaction = %sale.id,
                seller = %sale.seller_id,
                attempts,
                error = %reason,
                "giving up on pending sale release"
            );
            report.abandoned.push(sale.id);
        } else {
            warn!(
                transaction = %sale.id,
                seller = %sale.seller_id,
                attempt = attempts,
                error = %reason,
                "failed to release pending sale"
            );
        }
        report.failures.push(ReleaseFailure {
            transaction_id: sale.id,
            error: reason,
        });
    }

    /// Runs [`run_once`](Self::run_once) on every tick until the task is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(interval = ?self.interval, "balance release scheduler started");

            loop {
                ticker.tick().await;
                self.run_once();
            }
        })
    }
}

/// Outcome of one withdrawal release run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WithdrawalRunReport {
    pub completed: Vec<WithdrawalId>,
    pub failures: Vec<WithdrawalFailure>,
    /// Items another worker claimed first.
    pub skipped: Vec<WithdrawalId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalFailure {
    pub withdrawal_id: WithdrawalId,
    pub error: String,
}

pub struct WithdrawalReleaseScheduler {
    workflow: Arc<WithdrawalWorkflow>,
    interval: Duration,
}

impl WithdrawalReleaseScheduler {
    pub fn new(workflow: Arc<WithdrawalWorkflow>) -> Self {
        Self {
            workflow,
            interval: DEFAULT_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Processes every withdrawal whose delay window has closed.
    pub async fn run_once(&self) -> WithdrawalRunReport {
        let mut report = WithdrawalRunReport::default();

        for withdrawal in self.workflow.due() {
            let id = withdrawal.id;
            match self.workflow.process_due(id).await {
                Ok(_) => report.completed.push(id),
                Err(e) if e.kind() == ErrorKind::Conflict => {
                    info!(withdrawal = %id, reason = %e, "withdrawal no longer due, skipped");
                    report.skipped.push(id);
                }
                Err(e) => {
                    let reason = e.to_string();
                    // Failures past the claim already marked the row.
                    if let Err(mark) = self.workflow.mark_failed(id, &reason) {
                        if mark.kind() != ErrorKind::Conflict {
                            error!(withdrawal = %id, error = %mark, "could not mark withdrawal failed");
                        }
                    }
                    warn!(withdrawal = %id, error = %reason, "withdrawal processing failed");
                    report.failures.push(WithdrawalFailure {
                        withdrawal_id: id,
                        error: reason,
                    });
                }
            }
        }

        if !report.completed.is_empty() || !report.failures.is_empty() {
            info!(
                completed = report.completed.len(),
                failed = report.failures.len(),
                skipped = report.skipped.len(),
                "withdrawal release run finished"
            );
        }
        report
    }

    /// Runs [`run_once`](Self::run_once) on every tick until the task is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(interval = ?self.interval, "withdrawal release scheduler started");

            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }
}
