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

//! Withdrawal Workflow.
//!
//! Turns available balance into a payout. A request does not touch the
//! balance; the ledger is debited only when processing starts, and the
//! debit is committed before the provider is called so no store lock is
//! ever held across the network call.
//!
//! A failed transfer leaves the debit in place. The provider may have moved
//! the money anyway, so reversing it is an explicit admin adjustment.

use crate::base::{AdminId, SellerId, WithdrawalId};
use crate::engine::Ledger;
use crate::provider::{PaymentProvider, TransferMetadata, TransferRequest, TransferStatus};
use crate::store::WithdrawalStore;
use crate::withdrawal::{BankInfo, Withdrawal, WithdrawalStatus};
use crate::WithdrawalError;
use chrono::Duration;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

/// Shortest justification accepted for skipping the withdrawal delay.
pub const MIN_ANTICIPATION_REASON_CHARS: usize = 10;

pub struct WithdrawalWorkflow {
    ledger: Arc<Ledger>,
    withdrawals: Arc<dyn WithdrawalStore>,
    provider: Arc<dyn PaymentProvider>,
}

impl WithdrawalWorkflow {
    pub fn new(
        ledger: Arc<Ledger>,
        withdrawals: Arc<dyn WithdrawalStore>,
        provider: Arc<dyn PaymentProvider>,
    ) -> Self {
        Self {
            ledger,
            withdrawals,
            provider,
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Files a payout request in PENDING.
    ///
    /// The balance check is read-only: the funds stay available (and
    /// spendable) until the request is processed. Approval checks again.
    ///
    /// # Errors
    ///
    /// - [`WithdrawalError::InvalidAmount`] if `amount <= 0`.
    /// - [`WithdrawalError::BelowMinimum`] if under the configured minimum.
    /// - [`WithdrawalError::InvalidBankInfo`] if the destination is malformed.
    /// - [`WithdrawalError::InsufficientBalance`] if `available < amount`.
    pub fn request_withdrawal(
        &self,
        seller_id: SellerId,
        amount: Decimal,
        bank_info: BankInfo,
    ) -> Result<Withdrawal, WithdrawalError> {
        if amount <= Decimal::ZERO {
            return Err(WithdrawalError::InvalidAmount);
        }
        let config = self.ledger.config();
        if amount < config.min_withdrawal_amount {
            return Err(WithdrawalError::BelowMinimum {
                minimum: config.min_withdrawal_amount,
            });
        }
        bank_info.validate()?;
        self.ensure_available(seller_id, amount)?;

        let withdrawal = Withdrawal::new(
            self.withdrawals.next_id(),
            seller_id,
            amount,
            bank_info,
            config.withdrawal_delay_hours,
            self.ledger.clock().now(),
        );
        self.withdrawals.insert(withdrawal.clone());

        info!(
            withdrawal = %withdrawal.id,
            seller = %seller_id,
            amount = %amount,
            destination = %withdrawal.bank_info.masked(),
            "withdrawal requested"
        );
        Ok(withdrawal)
    }

    /// Approves a pending request and starts its delay window.
    ///
    /// The request passes through APPROVED and rests in WAITING_DELAY with
    /// `can_process_at = now + delay_hours`.
    ///
    /// # Errors
    ///
    /// - [`WithdrawalError::InvalidTransition`] unless PENDING.
    /// - [`WithdrawalError::InsufficientBalance`] if the seller spent the
    ///   funds since requesting.
    pub fn approve_withdrawal(
        &self,
        id: WithdrawalId,
        admin_id: AdminId,
    ) -> Result<Withdrawal, WithdrawalError> {
        let now = self.ledger.clock().now();
        let approved = self.withdrawals.update(id, &mut |w| {
            w.expect_status(&[WithdrawalStatus::Pending], "approve")?;
            self.ensure_available(w.seller_id, w.amount)?;
            w.status = WithdrawalStatus::Approved;
            w.approved_by = Some(admin_id);
            w.approved_at = Some(now);
            w.can_process_at = Some(now + Duration::hours(i64::from(w.delay_hours)));
            w.status = WithdrawalStatus::WaitingDelay;
            Ok(())
        })?;

        info!(
            withdrawal = %id,
            admin = %admin_id,
            can_process_at = ?approved.can_process_at,
            "withdrawal approved"
        );
        Ok(approved)
    }

    /// Rejects a pending request. Nothing was debited, so the ledger is untouched.
    ///
    /// # Errors
    ///
    /// - [`WithdrawalError::ReasonTooShort`] if `reason` is blank.
    /// - [`WithdrawalError::InvalidTransition`] unless PENDING.
    pub fn reject_withdrawal(
        &self,
        id: WithdrawalId,
        admin_id: AdminId,
        reason: &str,
    ) -> Result<Withdrawal, WithdrawalError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(WithdrawalError::ReasonTooShort { minimum: 1 });
        }
        let now = self.ledger.clock().now();
        let rejected = self.withdrawals.update(id, &mut |w| {
            w.expect_status(&[WithdrawalStatus::Pending], "reject")?;
            w.status = WithdrawalStatus::Cancelled;
            w.rejection_reason = Some(reason.to_owned());
            w.processed_by = Some(admin_id);
            w.processed_at = Some(now);
            w.cancelled_at = Some(now);
            Ok(())
        })?;

        info!(withdrawal = %id, admin = %admin_id, reason, "withdrawal rejected");
        Ok(rejected)
    }

    /// Seller withdraws their own pending request.
    ///
    /// # Errors
    ///
    /// - [`WithdrawalError::NotOwner`] if `seller_id` did not file it.
    /// - [`WithdrawalError::InvalidTransition`] unless PENDING.
    pub fn cancel_withdrawal(
        &self,
        id: WithdrawalId,
        reason: Option<&str>,
        seller_id: SellerId,
    ) -> Result<Withdrawal, WithdrawalError> {
        let now = self.ledger.clock().now();
        let reason = reason.map(str::trim).filter(|r| !r.is_empty());
        let cancelled = self.withdrawals.update(id, &mut |w| {
            if w.seller_id != seller_id {
                return Err(WithdrawalError::NotOwner(id));
            }
            w.expect_status(&[WithdrawalStatus::Pending], "cancel")?;
            w.status = WithdrawalStatus::Cancelled;
            w.cancellation_reason = reason.map(str::to_owned);
            w.cancelled_at = Some(now);
            Ok(())
        })?;

        info!(withdrawal = %id, seller = %seller_id, "withdrawal cancelled");
        Ok(cancelled)
    }

    /// Skips what is left of the delay window.
    ///
    /// # Errors
    ///
    /// - [`WithdrawalError::ReasonTooShort`] if `reason` has fewer than
    ///   [`MIN_ANTICIPATION_REASON_CHARS`] characters; nothing changes.
    /// - [`WithdrawalError::InvalidTransition`] unless APPROVED or WAITING_DELAY.
    pub fn anticipate_withdrawal(
        &self,
        id: WithdrawalId,
        admin_id: AdminId,
        reason: &str,
        admin_ip: Option<&str>,
    ) -> Result<Withdrawal, WithdrawalError> {
        let reason = reason.trim();
        if reason.chars().count() < MIN_ANTICIPATION_REASON_CHARS {
            return Err(WithdrawalError::ReasonTooShort {
                minimum: MIN_ANTICIPATION_REASON_CHARS,
            });
        }
        let now = self.ledger.clock().now();
        let anticipated = self.withdrawals.update(id, &mut |w| {
            w.expect_status(
                &[WithdrawalStatus::Approved, WithdrawalStatus::WaitingDelay],
                "anticipate",
            )?;
            w.can_process_at = Some(now);
            w.anticipated = true;
            w.anticipated_by = Some(admin_id);
            w.anticipation_reason = Some(reason.to_owned());
            w.anticipated_at = Some(now);
            w.admin_ip = admin_ip.map(str::to_owned);
            Ok(())
        })?;

        warn!(
            withdrawal = %id,
            admin = %admin_id,
            admin_ip = admin_ip.unwrap_or("-"),
            reason,
            "withdrawal delay skipped by admin"
        );
        Ok(anticipated)
    }

    /// Admin-triggered payout. Same rules as the scheduler: the delay must
    /// have elapsed or been anticipated.
    ///
    /// # Errors
    ///
    /// - [`WithdrawalError::InvalidTransition`] unless APPROVED or WAITING_DELAY.
    /// - [`WithdrawalError::NotYetDue`] if the delay window is still open.
    /// - [`WithdrawalError::Ledger`] if the debit fails; the request is FAILED.
    /// - [`WithdrawalError::TransferFailed`] if the provider fails; the
    ///   request is FAILED and the debit stands.
    pub async fn process_withdrawal(
        &self,
        id: WithdrawalId,
        admin_id: AdminId,
    ) -> Result<Withdrawal, WithdrawalError> {
        self.process(id, Some(admin_id)).await
    }

    /// Scheduler-triggered payout.
    pub async fn process_due(&self, id: WithdrawalId) -> Result<Withdrawal, WithdrawalError> {
        self.process(id, None).await
    }

    /// Marks a request FAILED with `reason` unless it already finished.
    pub fn mark_failed(&self, id: WithdrawalId, reason: &str) -> Result<Withdrawal, WithdrawalError> {
        let now = self.ledger.clock().now();
        self.withdrawals.update(id, &mut |w| {
            if w.status.is_terminal() {
                return Err(WithdrawalError::InvalidTransition {
                    id,
                    status: w.status,
                    action: "fail",
                });
            }
            w.status = WithdrawalStatus::Failed;
            w.failure_reason = Some(reason.to_owned());
            w.processed_at.get_or_insert(now);
            Ok(())
        })
    }

    pub fn get(&self, id: WithdrawalId) -> Option<Withdrawal> {
        self.withdrawals.get(id)
    }

    pub fn list_for_seller(&self, seller_id: SellerId) -> Vec<Withdrawal> {
        self.withdrawals.for_seller(seller_id)
    }

    pub fn list(&self, status: Option<WithdrawalStatus>) -> Vec<Withdrawal> {
        self.withdrawals.list(status)
    }

    /// WAITING_DELAY requests whose window has closed.
    pub fn due(&self) -> Vec<Withdrawal> {
        self.withdrawals.due(self.ledger.clock().now())
    }

    async fn process(
        &self,
        id: WithdrawalId,
        processed_by: Option<AdminId>,
    ) -> Result<Withdrawal, WithdrawalError> {
        let now = self.ledger.clock().now();
        let claimed = self.withdrawals.update(id, &mut |w| {
            w.ensure_due(now)?;
            w.status = WithdrawalStatus::Processing;
            w.processed_by = processed_by;
            w.processed_at = Some(now);
            Ok(())
        })?;

        let debit = match self
            .ledger
            .debit_withdrawal(claimed.seller_id, claimed.amount, id)
        {
            Ok(debit) => debit,
            Err(e) => {
                self.finish_failed(id, &e.to_string())?;
                return Err(e.into());
            }
        };
        self.withdrawals.update(id, &mut |w| {
            w.debit_transaction_id = Some(debit.id);
            Ok(())
        })?;

        let request = TransferRequest {
            amount: claimed.amount,
            bank_info: claimed.bank_info.clone(),
            metadata: TransferMetadata {
                withdrawal_id: id,
                seller_id: claimed.seller_id,
            },
        };
        let timeout = self.ledger.config().provider_timeout();
        let outcome = match tokio::time::timeout(timeout, self.provider.create_transfer(request)).await
        {
            Ok(Ok(transfer)) if transfer.status == TransferStatus::Succeeded => Ok(transfer),
            Ok(Ok(transfer)) => Err(format!(
                "transfer {} returned status {:?}",
                transfer.id, transfer.status
            )),
            Ok(Err(e)) => Err(e.message),
            Err(_) => Err(format!(
                "provider did not answer within {}s",
                timeout.as_secs()
            )),
        };

        match outcome {
            Ok(transfer) => {
                let completed_at = self.ledger.clock().now();
                let completed = self.withdrawals.update(id, &mut |w| {
                    w.expect_status(&[WithdrawalStatus::Processing], "complete")?;
                    w.status = WithdrawalStatus::Completed;
                    w.provider_transfer_id = Some(transfer.id.clone());
                    w.completed_at = Some(completed_at);
                    Ok(())
                })?;
                info!(
                    withdrawal = %id,
                    seller = %claimed.seller_id,
                    amount = %claimed.amount,
                    transfer = %transfer.id,
                    destination = %transfer.destination,
                    "withdrawal completed"
                );
                Ok(completed)
            }
            Err(reason) => {
                warn!(
                    withdrawal = %id,
                    seller = %claimed.seller_id,
                    amount = %claimed.amount,
                    debit = %debit.id,
                    reason = %reason,
                    "transfer failed; ledger debit retained, reverse with a manual adjustment if the payout did not happen"
                );
                self.finish_failed(id, &reason)?;
                Err(WithdrawalError::TransferFailed { id, reason })
            }
        }
    }

    fn finish_failed(&self, id: WithdrawalId, reason: &str) -> Result<Withdrawal, WithdrawalError> {
        self.withdrawals.update(id, &mut |w| {
            w.expect_status(&[WithdrawalStatus::Processing], "fail")?;
            w.status = WithdrawalStatus::Failed;
            w.failure_reason = Some(reason.to_owned());
            Ok(())
        })
    }

    fn ensure_available(&self, seller_id: SellerId, amount: Decimal) -> Result<(), WithdrawalError> {
        let available = self
            .ledger
            .balance(seller_id)
            .map(|b| b.available_balance)
            .unwrap_or(Decimal::ZERO);
        if available < amount {
            return Err(WithdrawalError::InsufficientBalance {
                available,
                requested: amount,
            });
        }
        Ok(())
    }
}
