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

//! Journal entries.
//!
//! Only sales start out [`Pending`](TransactionStatus::Pending):
//! - SALE [`Pending`] → [`Completed`] (holding period elapsed, funds released)
//!
//! Every other type is written [`Completed`] and never changes.

use crate::balance::{BalanceSnapshot, BucketDelta, Overdraft};
use crate::base::{Reference, SellerId, TransactionId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Sale,
    SaleAvailable,
    Withdrawal,
    Refund,
    PlatformFee,
    Hold,
    Release,
    Chargeback,
    Adjustment,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sale => "SALE",
            Self::SaleAvailable => "SALE_AVAILABLE",
            Self::Withdrawal => "WITHDRAWAL",
            Self::Refund => "REFUND",
            Self::PlatformFee => "PLATFORM_FEE",
            Self::Hold => "HOLD",
            Self::Release => "RELEASE",
            Self::Chargeback => "CHARGEBACK",
            Self::Adjustment => "ADJUSTMENT",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Reversed,
}

impl TransactionStatus {
    /// Whether the entry's delta is reflected in the live balance.
    pub fn is_effective(&self) -> bool {
        matches!(self, Self::Pending | Self::Completed)
    }
}

/// An immutable journal row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub seller_id: SellerId,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub status: TransactionStatus,
    /// Positive for credits, negative for debits.
    pub amount: Decimal,
    /// Exact change applied to each bucket.
    pub delta: BucketDelta,
    pub balance_after: BalanceSnapshot,
    pub reference: Reference,
    pub description: Option<String>,
    /// When a pending sale becomes withdrawable. `None` on rows written
    /// before the field existed.
    pub pending_release_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn is_pending_sale(&self) -> bool {
        self.kind == TransactionType::Sale && self.status == TransactionStatus::Pending
    }

    /// Instant at which a pending sale may be released, falling back to
    /// `created_at + fallback` for rows without a recorded release time.
    pub fn release_at(&self, fallback: chrono::Duration) -> DateTime<Utc> {
        self.pending_release_at
            .unwrap_or(self.created_at + fallback)
    }
}

/// A journal row as planned by the Ledger Engine, before the store assigns
/// its id and balance snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub kind: TransactionType,
    pub amount: Decimal,
    pub delta: BucketDelta,
    pub overdraft: Overdraft,
    pub reference: Reference,
    pub description: Option<String>,
    pub pending_release_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Pending SALE to flip to COMPLETED in the same unit of work.
    pub completes: Option<TransactionId>,
}

impl JournalEntry {
    pub fn new(
        kind: TransactionType,
        amount: Decimal,
        delta: BucketDelta,
        reference: Reference,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            amount,
            delta,
            overdraft: Overdraft::Forbid,
            reference,
            description: None,
            pending_release_at: None,
            created_at,
            completes: None,
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_overdraft(mut self, overdraft: Overdraft) -> Self {
        self.overdraft = overdraft;
        self
    }

    pub fn releasing_at(mut self, at: DateTime<Utc>) -> Self {
        self.pending_release_at = Some(at);
        self
    }

    pub fn completing(mut self, sale: TransactionId) -> Self {
        self.completes = Some(sale);
        self
    }

    /// Sales are the only entries written as pending.
    pub fn initial_status(&self) -> TransactionStatus {
        match self.kind {
            TransactionType::Sale => TransactionStatus::Pending,
            _ => TransactionStatus::Completed,
        }
    }

    pub(crate) fn into_transaction(
        self,
        id: TransactionId,
        seller_id: SellerId,
        balance_after: BalanceSnapshot,
    ) -> Transaction {
        let status = self.initial_status();
        Transaction {
            id,
            seller_id,
            kind: self.kind,
            status,
            amount: self.amount,
            delta: self.delta,
            balance_after,
            reference: self.reference,
            description: self.description,
            pending_release_at: self.pending_release_at,
            created_at: self.created_at,
            completed_at: (status == TransactionStatus::Completed).then_some(self.created_at),
        }
    }
}

/// Folds the deltas of every effective entry, in creation order.
///
/// For a complete journal of one seller the result equals that seller's
/// live buckets and lifetime counters.
pub fn replay<'a>(transactions: impl IntoIterator<Item = &'a Transaction>) -> BucketDelta {
    let mut ordered: Vec<&Transaction> = transactions
        .into_iter()
        .filter(|tx| tx.status.is_effective())
        .collect();
    ordered.sort_by_key(|tx| tx.id);

    let mut total = BucketDelta::default();
    for tx in ordered {
        total += tx.delta;
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::OrderId;
    use rust_decimal_macros::dec;

    fn sale(at: DateTime<Utc>) -> JournalEntry {
        JournalEntry::new(
            TransactionType::Sale,
            dec!(100),
            BucketDelta::credit_pending(dec!(100)),
            Reference::Order(OrderId::from("order-1")),
            at,
        )
    }

    #[test]
    fn only_sales_start_pending() {
        let now = Utc::now();
        assert_eq!(sale(now).initial_status(), TransactionStatus::Pending);

        let hold = JournalEntry::new(
            TransactionType::Hold,
            dec!(-5),
            BucketDelta::hold(dec!(5)),
            Reference::Order(OrderId::from("order-1")),
            now,
        );
        assert_eq!(hold.initial_status(), TransactionStatus::Completed);
        let tx = hold.into_transaction(TransactionId(1), SellerId(1), BalanceSnapshot::default());
        assert_eq!(tx.completed_at, Some(now));
    }

    #[test]
    fn release_at_prefers_recorded_instant() {
        let now = Utc::now();
        let recorded = now + chrono::Duration::hours(10);
        let tx = sale(now)
            .releasing_at(recorded)
            .into_transaction(TransactionId(1), SellerId(1), BalanceSnapshot::default());
        assert_eq!(tx.release_at(chrono::Duration::hours(72)), recorded);

        let legacy = sale(now).into_transaction(TransactionId(2), SellerId(1), BalanceSnapshot::default());
        assert_eq!(
            legacy.release_at(chrono::Duration::hours(72)),
            now + chrono::Duration::hours(72)
        );
    }

    #[test]
    fn replay_skips_ineffective_entries() {
        let now = Utc::now();
        let credited = sale(now).into_transaction(TransactionId(1), SellerId(1), BalanceSnapshot::default());
        let mut failed = credited.clone();
        failed.id = TransactionId(2);
        failed.status = TransactionStatus::Failed;

        let total = replay([&failed, &credited]);
        assert_eq!(total.pending, dec!(100));
        assert_eq!(total.total_earned, dec!(100));
    }

    #[test]
    fn type_names_match_wire_format() {
        let json = serde_json::to_string(&TransactionType::SaleAvailable).unwrap();
        assert_eq!(json, r#""SALE_AVAILABLE""#);
        assert_eq!(TransactionType::PlatformFee.to_string(), "PLATFORM_FEE");
    }
}
