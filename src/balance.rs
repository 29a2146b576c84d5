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

//! Seller balance buckets.
//!
//! A seller's money lives in three buckets:
//!
//! ```text
//!   credit_sale ──► pending ──release──► available ──debit_withdrawal──► (paid out)
//!                                          │    ▲
//!                                     hold │    │ release_funds
//!                                          ▼    │
//!                                          held ──chargeback──► (returned to buyer)
//! ```
//!
//! Every movement is expressed as a [`BucketDelta`] and applied with
//! [`SellerBalance::apply`], which enforces the bucket invariants.
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use seller_ledger::{BucketDelta, Overdraft, SellerBalance, SellerId};
//!
//! let mut balance = SellerBalance::new(SellerId(1));
//! balance.apply(&BucketDelta::credit_pending(dec!(100.00)), Overdraft::Forbid).unwrap();
//! assert_eq!(balance.pending_balance, dec!(100.00));
//! assert_eq!(balance.available_balance, dec!(0));
//! ```

use crate::LedgerError;
use crate::base::SellerId;
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde::Deserialize;

/// Whether a movement may drive `available_balance` below zero.
///
/// Only refunds are allowed to: the platform absorbs the shortfall rather
/// than block the refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, serde::Serialize)]
pub enum Overdraft {
    Forbid,
    Allow,
}

/// Signed change to every bucket and lifetime counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, serde::Serialize)]
pub struct BucketDelta {
    pub available: Decimal,
    pub pending: Decimal,
    pub held: Decimal,
    pub total_earned: Decimal,
    pub total_withdrawn: Decimal,
}

impl BucketDelta {
    /// A sale enters the pending bucket and counts as earned.
    pub fn credit_pending(amount: Decimal) -> Self {
        Self {
            pending: amount,
            total_earned: amount,
            ..Self::default()
        }
    }

    /// A sale's holding period elapsed.
    pub fn pending_to_available(amount: Decimal) -> Self {
        Self {
            pending: negate(amount),
            available: amount,
            ..Self::default()
        }
    }

    pub fn withdraw(amount: Decimal) -> Self {
        Self {
            available: -amount,
            total_withdrawn: amount,
            ..Self::default()
        }
    }

    pub fn hold(amount: Decimal) -> Self {
        Self {
            available: -amount,
            held: amount,
            ..Self::default()
        }
    }

    pub fn release(amount: Decimal) -> Self {
        Self {
            held: -amount,
            available: amount,
            ..Self::default()
        }
    }

    /// Held funds leave the seller for good and are no longer earnings.
    pub fn chargeback(amount: Decimal) -> Self {
        Self {
            held: -amount,
            total_earned: -amount,
            ..Self::default()
        }
    }

    pub fn adjust(amount: Decimal) -> Self {
        Self {
            available: amount,
            ..Self::default()
        }
    }

    /// Removes `amount` from earnings, taking `from_pending` out of the
    /// pending bucket and the rest out of the available bucket.
    pub fn debit_earnings(amount: Decimal, from_pending: Decimal) -> Self {
        Self {
            pending: negate(from_pending),
            available: negate(amount - from_pending),
            total_earned: -amount,
            ..Self::default()
        }
    }

    /// Net effect on the seller's money across all three buckets.
    pub fn net(&self) -> Decimal {
        self.available + self.pending + self.held
    }
}

/// Negates without producing `-0`, which would leak into journal rows and
/// balance output.
fn negate(amount: Decimal) -> Decimal {
    if amount.is_zero() {
        Decimal::ZERO
    } else {
        -amount
    }
}

impl std::ops::AddAssign for BucketDelta {
    fn add_assign(&mut self, rhs: Self) {
        self.available += rhs.available;
        self.pending += rhs.pending;
        self.held += rhs.held;
        self.total_earned += rhs.total_earned;
        self.total_withdrawn += rhs.total_withdrawn;
    }
}

/// Bucket values recorded on every journal entry for reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, serde::Serialize)]
pub struct BalanceSnapshot {
    pub available: Decimal,
    pub pending: Decimal,
    pub held: Decimal,
}

/// One seller's running balance.
///
/// Created lazily on first use, never deleted, and only ever replaced
/// wholesale by the store inside a committed unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SellerBalance {
    pub seller_id: SellerId,
    pub available_balance: Decimal,
    pub pending_balance: Decimal,
    pub held_balance: Decimal,
    /// Lifetime counter for analytics; not spendable.
    pub total_earned: Decimal,
    /// Lifetime counter for analytics; not spendable.
    pub total_withdrawn: Decimal,
}

impl SellerBalance {
    pub const DECIMAL_PRECISION: u32 = 4;

    pub fn new(seller_id: SellerId) -> Self {
        Self {
            seller_id,
            available_balance: Decimal::ZERO,
            pending_balance: Decimal::ZERO,
            held_balance: Decimal::ZERO,
            total_earned: Decimal::ZERO,
            total_withdrawn: Decimal::ZERO,
        }
    }

    pub fn snapshot(&self) -> BalanceSnapshot {
        BalanceSnapshot {
            available: self.available_balance,
            pending: self.pending_balance,
            held: self.held_balance,
        }
    }

    /// Returns `available + pending + held`.
    pub fn total(&self) -> Decimal {
        self.available_balance + self.pending_balance + self.held_balance
    }

    /// Applies `delta` in place.
    ///
    /// On error `self` is left untouched.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InsufficientBalance`] if `available` would go negative
    ///   and `overdraft` is [`Overdraft::Forbid`].
    /// - [`LedgerError::InsufficientPending`] if `pending` would go negative.
    /// - [`LedgerError::InsufficientHeld`] if `held` would go negative.
    pub fn apply(&mut self, delta: &BucketDelta, overdraft: Overdraft) -> Result<(), LedgerError> {
        let available = self.available_balance + delta.available;
        let pending = self.pending_balance + delta.pending;
        let held = self.held_balance + delta.held;

        if pending < Decimal::ZERO {
            return Err(LedgerError::InsufficientPending {
                pending: self.pending_balance,
                requested: -delta.pending,
            });
        }
        if held < Decimal::ZERO {
            return Err(LedgerError::InsufficientHeld {
                held: self.held_balance,
                requested: -delta.held,
            });
        }
        if available < Decimal::ZERO
            && delta.available < Decimal::ZERO
            && overdraft == Overdraft::Forbid
        {
            return Err(LedgerError::InsufficientBalance {
                available: self.available_balance,
                requested: -delta.available,
            });
        }

        self.available_balance = available;
        self.pending_balance = pending;
        self.held_balance = held;
        self.total_earned += delta.total_earned;
        self.total_withdrawn += delta.total_withdrawn;
        self.assert_invariants();
        Ok(())
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.pending_balance >= Decimal::ZERO,
            "Invariant violated: pending balance went negative: {}",
            self.pending_balance
        );
        debug_assert!(
            self.held_balance >= Decimal::ZERO,
            "Invariant violated: held balance went negative: {}",
            self.held_balance
        );
    }
}

impl Serialize for SellerBalance {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let precision = Self::DECIMAL_PRECISION;
        let mut state = serializer.serialize_struct("SellerBalance", 6)?;
        state.serialize_field("seller", &self.seller_id)?;
        state.serialize_field("available", &self.available_balance.round_dp(precision))?;
        state.serialize_field("pending", &self.pending_balance.round_dp(precision))?;
        state.serialize_field("held", &self.held_balance.round_dp(precision))?;
        state.serialize_field("total_earned", &self.total_earned.round_dp(precision))?;
        state.serialize_field("total_withdrawn", &self.total_withdrawn.round_dp(precision))?;
        state.end()
    }
}
