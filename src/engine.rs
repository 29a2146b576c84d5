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

//! Ledger Engine.
//!
//! The [`Ledger`] is the only component that changes seller balances. Each
//! operation validates its input, plans exactly one journal entry and hands
//! it to [`LedgerStore::commit`], so a balance change without its journal row
//! (or the reverse) cannot happen.
//!
//! # Operations
//!
//! | Operation | Buckets | Entry |
//! |-----------|---------|-------|
//! | `credit_sale` | +pending, +earned | SALE (pending) |
//! | `make_sale_available` | pending → available | SALE_AVAILABLE |
//! | `debit_withdrawal` | −available, +withdrawn | WITHDRAWAL |
//! | `process_refund` | −pending, then −available (may go negative), −earned | REFUND |
//! | `charge_platform_fee` | −pending, then −available, −earned | PLATFORM_FEE |
//! | `hold_funds` | available → held | HOLD |
//! | `release_funds` | held → available | RELEASE |
//! | `chargeback` | −held, −earned | CHARGEBACK |
//! | `manual_adjustment` | ±available | ADJUSTMENT |

use crate::LedgerError;
use crate::balance::{BucketDelta, Overdraft, SellerBalance};
use crate::base::{AdminId, DisputeId, OrderId, Reference, SellerId, TransactionId, WithdrawalId};
use crate::clock::Clock;
use crate::config::LedgerConfig;
use crate::store::LedgerStore;
use crate::transaction::{JournalEntry, Transaction, TransactionType};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The Ledger Engine.
///
/// # Invariants
///
/// - Every committed mutation has exactly one journal row.
/// - `pending_balance` and `held_balance` never go negative.
/// - `available_balance` goes negative only through a refund.
/// - A pending sale is released at most once.
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    config: RwLock<LedgerConfig>,
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>, config: LedgerConfig) -> Self {
        Self {
            store,
            clock,
            config: RwLock::new(config),
        }
    }

    /// A copy of the live configuration.
    pub fn config(&self) -> LedgerConfig {
        self.config.read().clone()
    }

    /// Replaces the live configuration. Sales already credited keep the
    /// release instant they were written with.
    pub fn reconfigure(&self, config: LedgerConfig) {
        info!(
            balance_release_hours = config.balance_release_hours,
            min_withdrawal = %config.min_withdrawal_amount,
            "ledger reconfigured"
        );
        *self.config.write() = config;
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn get_or_create_balance(&self, seller_id: SellerId) -> SellerBalance {
        self.store.get_or_create_balance(seller_id)
    }

    /// Current balance without creating a row.
    pub fn balance(&self, seller_id: SellerId) -> Option<SellerBalance> {
        self.store.balance(seller_id)
    }

    /// Credits a paid order to the seller's pending bucket.
    ///
    /// The release instant is fixed now, from the holding period configured
    /// at the time of the sale.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InvalidAmount`] if `amount <= 0`.
    pub fn credit_sale(
        &self,
        seller_id: SellerId,
        amount: Decimal,
        order_id: OrderId,
        description: Option<&str>,
    ) -> Result<Transaction, LedgerError> {
        ensure_positive(amount)?;
        let now = self.clock.now();
        let release_at = now + self.config.read().balance_release_period();
        let reference = Reference::Order(order_id);
        let description = description.map(str::to_owned);

        self.commit("credit_sale", seller_id, amount, &|_| {
            Ok(JournalEntry::new(
                TransactionType::Sale,
                amount,
                BucketDelta::credit_pending(amount),
                reference.clone(),
                now,
            )
            .with_description(description.clone())
            .releasing_at(release_at))
        })
    }

    /// Moves a released sale from pending to available and marks the source
    /// SALE completed, in one unit of work.
    ///
    /// Refunds and fees take from pending first, so part of the sale may be
    /// gone by the time it is released. Only what pending still holds, up to
    /// `amount`, moves to available. The SALE is completed even when nothing
    /// is left to move.
    ///
    /// Only the balance release scheduler calls this.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] if `amount <= 0`.
    /// - [`LedgerError::SaleNotPending`] if `sale_id` was already released.
    pub(crate) fn make_sale_available(
        &self,
        seller_id: SellerId,
        amount: Decimal,
        order_id: OrderId,
        sale_id: TransactionId,
    ) -> Result<Transaction, LedgerError> {
        ensure_positive(amount)?;
        let now = self.clock.now();
        let reference = Reference::Order(order_id);

        let transaction = self.commit("make_sale_available", seller_id, amount, &|balance| {
            let outstanding = amount.min(balance.pending_balance.max(Decimal::ZERO));
            Ok(JournalEntry::new(
                TransactionType::SaleAvailable,
                outstanding,
                BucketDelta::pending_to_available(outstanding),
                reference.clone(),
                now,
            )
            .completing(sale_id))
        })?;

        if transaction.amount < amount {
            debug!(
                seller = %seller_id,
                sale = %sale_id,
                released = %transaction.amount,
                credited = %amount,
                "sale released short of its credit"
            );
        }
        Ok(transaction)
    }

    /// Pays out `amount` from the available bucket.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] if `amount <= 0`.
    /// - [`LedgerError::InsufficientBalance`] if `available < amount`.
    pub fn debit_withdrawal(
        &self,
        seller_id: SellerId,
        amount: Decimal,
        withdrawal_id: WithdrawalId,
    ) -> Result<Transaction, LedgerError> {
        ensure_positive(amount)?;
        let now = self.clock.now();

        self.commit("debit_withdrawal", seller_id, amount, &|_| {
            Ok(JournalEntry::new(
                TransactionType::Withdrawal,
                -amount,
                BucketDelta::withdraw(amount),
                Reference::Withdrawal(withdrawal_id),
                now,
            ))
        })
    }

    /// Refunds a buyer out of the seller's earnings.
    ///
    /// Takes what it can from pending, then from available. If the two
    /// together fall short the available bucket goes negative; refunds are
    /// never blocked by what the seller already withdrew.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InvalidAmount`] if `amount <= 0`.
    pub fn process_refund(
        &self,
        seller_id: SellerId,
        amount: Decimal,
        order_id: OrderId,
        description: Option<&str>,
    ) -> Result<Transaction, LedgerError> {
        ensure_positive(amount)?;
        let now = self.clock.now();
        let reference = Reference::Order(order_id);
        let description = description.map(str::to_owned);

        let transaction = self.commit("process_refund", seller_id, amount, &|balance| {
            let from_pending = amount.min(balance.pending_balance.max(Decimal::ZERO));
            Ok(JournalEntry::new(
                TransactionType::Refund,
                -amount,
                BucketDelta::debit_earnings(amount, from_pending),
                reference.clone(),
                now,
            )
            .with_description(description.clone())
            .with_overdraft(Overdraft::Allow))
        })?;

        if transaction.balance_after.available < Decimal::ZERO {
            warn!(
                seller = %seller_id,
                transaction = %transaction.id,
                available = %transaction.balance_after.available,
                "refund drove available balance negative"
            );
        }
        Ok(transaction)
    }

    /// Charges the platform's commission against the seller's earnings,
    /// pending bucket first.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] if `amount <= 0`.
    /// - [`LedgerError::InsufficientBalance`] if pending plus available do not
    ///   cover `amount`.
    pub fn charge_platform_fee(
        &self,
        seller_id: SellerId,
        amount: Decimal,
        order_id: OrderId,
    ) -> Result<Transaction, LedgerError> {
        ensure_positive(amount)?;
        let now = self.clock.now();
        let reference = Reference::Order(order_id);

        self.commit("charge_platform_fee", seller_id, amount, &|balance| {
            let from_pending = amount.min(balance.pending_balance.max(Decimal::ZERO));
            Ok(JournalEntry::new(
                TransactionType::PlatformFee,
                -amount,
                BucketDelta::debit_earnings(amount, from_pending),
                reference.clone(),
                now,
            ))
        })
    }

    /// Freezes funds while a dispute is open.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] if `amount <= 0`.
    /// - [`LedgerError::MissingReason`] if `reason` is blank.
    /// - [`LedgerError::InsufficientBalance`] if `available < amount`.
    pub fn hold_funds(
        &self,
        seller_id: SellerId,
        amount: Decimal,
        dispute_id: DisputeId,
        reason: &str,
    ) -> Result<Transaction, LedgerError> {
        self.dispute_movement(
            "hold_funds",
            TransactionType::Hold,
            BucketDelta::hold(amount),
            seller_id,
            amount,
            dispute_id,
            reason,
        )
    }

    /// Returns held funds to the available bucket when a dispute closes in
    /// the seller's favour.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] if `amount <= 0`.
    /// - [`LedgerError::MissingReason`] if `reason` is blank.
    /// - [`LedgerError::InsufficientHeld`] if `held < amount`.
    pub fn release_funds(
        &self,
        seller_id: SellerId,
        amount: Decimal,
        dispute_id: DisputeId,
        reason: &str,
    ) -> Result<Transaction, LedgerError> {
        self.dispute_movement(
            "release_funds",
            TransactionType::Release,
            BucketDelta::release(amount),
            seller_id,
            amount,
            dispute_id,
            reason,
        )
    }

    /// Removes held funds when a dispute is lost.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] if `amount <= 0`.
    /// - [`LedgerError::MissingReason`] if `reason` is blank.
    /// - [`LedgerError::InsufficientHeld`] if `held < amount`.
    pub fn chargeback(
        &self,
        seller_id: SellerId,
        amount: Decimal,
        dispute_id: DisputeId,
        reason: &str,
    ) -> Result<Transaction, LedgerError> {
        self.dispute_movement(
            "chargeback",
            TransactionType::Chargeback,
            BucketDelta::chargeback(amount),
            seller_id,
            amount,
            dispute_id,
            reason,
        )
    }

    /// Admin credit (positive) or debit (negative) of the available bucket.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::ZeroAdjustment`] if `amount == 0`.
    /// - [`LedgerError::MissingReason`] if `reason` is blank.
    /// - [`LedgerError::InsufficientBalance`] if a debit would take the
    ///   available bucket below zero.
    pub fn manual_adjustment(
        &self,
        seller_id: SellerId,
        amount: Decimal,
        reason: &str,
        admin_id: AdminId,
    ) -> Result<Transaction, LedgerError> {
        if amount.is_zero() {
            return Err(LedgerError::ZeroAdjustment);
        }
        let reason = required_reason(reason)?;
        let now = self.clock.now();

        let transaction = self.commit("manual_adjustment", seller_id, amount, &|_| {
            Ok(JournalEntry::new(
                TransactionType::Adjustment,
                amount,
                BucketDelta::adjust(amount),
                Reference::Admin(admin_id),
                now,
            )
            .with_description(Some(reason.clone())))
        })?;

        info!(
            seller = %seller_id,
            admin = %admin_id,
            amount = %amount,
            "manual adjustment recorded"
        );
        Ok(transaction)
    }

    /// A page of the seller's journal, newest first.
    pub fn get_transactions(&self, seller_id: SellerId, limit: usize, offset: usize) -> Vec<Transaction> {
        self.store.transaction_page(seller_id, limit, offset)
    }

    /// The seller's whole journal, in creation order.
    pub fn journal(&self, seller_id: SellerId) -> Vec<Transaction> {
        self.store.transactions(seller_id)
    }

    pub fn transaction(&self, id: TransactionId) -> Option<Transaction> {
        self.store.transaction(id)
    }

    /// Every SALE still waiting for its holding period, oldest first.
    pub fn pending_sales(&self) -> Vec<Transaction> {
        self.store.pending_sales()
    }

    #[allow(clippy::too_many_arguments)]
    fn dispute_movement(
        &self,
        operation: &'static str,
        kind: TransactionType,
        delta: BucketDelta,
        seller_id: SellerId,
        amount: Decimal,
        dispute_id: DisputeId,
        reason: &str,
    ) -> Result<Transaction, LedgerError> {
        ensure_positive(amount)?;
        let reason = required_reason(reason)?;
        let now = self.clock.now();
        let reference = Reference::Dispute(dispute_id);
        // Negative when spendable funds shrink or money leaves the seller.
        let signed = if delta.available < Decimal::ZERO || delta.net() < Decimal::ZERO {
            -amount
        } else {
            amount
        };

        self.commit(operation, seller_id, amount, &|_| {
            Ok(JournalEntry::new(kind, signed, delta, reference.clone(), now)
                .with_description(Some(reason.clone())))
        })
    }

    fn commit(
        &self,
        operation: &'static str,
        seller_id: SellerId,
        amount: Decimal,
        plan: &dyn Fn(&SellerBalance) -> Result<JournalEntry, LedgerError>,
    ) -> Result<Transaction, LedgerError> {
        match self.store.commit(seller_id, plan) {
            Ok(transaction) => {
                info!(
                    seller = %seller_id,
                    transaction = %transaction.id,
                    amount = %amount,
                    "{operation} committed"
                );
                Ok(transaction)
            }
            Err(e) => {
                debug!(
                    seller = %seller_id,
                    amount = %amount,
                    reason = %e,
                    "{operation} rejected"
                );
                Err(e)
            }
        }
    }
}

fn ensure_positive(amount: Decimal) -> Result<(), LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount);
    }
    Ok(())
}

fn required_reason(reason: &str) -> Result<String, LedgerError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(LedgerError::MissingReason);
    }
    Ok(reason.to_owned())
}
