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

//! Error types for ledger mutations and the withdrawal workflow.

use crate::base::{SellerId, TransactionId, WithdrawalId};
use crate::withdrawal::WithdrawalStatus;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

/// How a wrapping service should surface an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input or a business-rule rejection; safe to retry after correcting it.
    Validation,
    /// The target is not in a state that allows the operation.
    Conflict,
    NotFound,
    /// Storage or provider failure.
    Internal,
}

/// Failure of the backing store while committing a unit of work.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("balance write failed")]
    BalanceWrite,

    #[error("journal append failed")]
    JournalAppend,
}

/// Ledger Engine errors.
///
/// Any of these leaves the seller's balance and journal unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Amount is zero or negative
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Manual adjustment of zero
    #[error("adjustment amount must be non-zero")]
    ZeroAdjustment,

    /// Audited operation without a justification
    #[error("a reason is required")]
    MissingReason,

    #[error("Insufficient available balance")]
    InsufficientBalance { available: Decimal, requested: Decimal },

    #[error("Insufficient held balance")]
    InsufficientHeld { held: Decimal, requested: Decimal },

    #[error("insufficient pending balance")]
    InsufficientPending { pending: Decimal, requested: Decimal },

    /// Release of a sale that is not (or no longer) pending
    #[error("transaction {0} is not a pending sale")]
    SaleNotPending(TransactionId),

    #[error("transaction {0} not found")]
    TransactionNotFound(TransactionId),

    #[error("transaction {transaction} does not belong to seller {seller}")]
    SellerMismatch {
        transaction: TransactionId,
        seller: SellerId,
    },

    #[error("store failure: {0}")]
    Store(#[from] StoreError),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidAmount
            | Self::ZeroAdjustment
            | Self::MissingReason
            | Self::InsufficientBalance { .. }
            | Self::InsufficientHeld { .. }
            | Self::InsufficientPending { .. } => ErrorKind::Validation,
            Self::SaleNotPending(_) | Self::SellerMismatch { .. } => ErrorKind::Conflict,
            Self::TransactionNotFound(_) => ErrorKind::NotFound,
            Self::Store(_) => ErrorKind::Internal,
        }
    }
}

/// Payment provider failure as reported by the provider adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ProviderError {
    pub message: String,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Withdrawal Workflow errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WithdrawalError {
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    #[error("amount is below the minimum withdrawal of {minimum}")]
    BelowMinimum { minimum: Decimal },

    #[error("invalid bank info: {0}")]
    InvalidBankInfo(&'static str),

    #[error("Insufficient available balance")]
    InsufficientBalance { available: Decimal, requested: Decimal },

    #[error("reason must be at least {minimum} characters")]
    ReasonTooShort { minimum: usize },

    #[error("withdrawal {0} not found")]
    NotFound(WithdrawalId),

    #[error("withdrawal {0} belongs to another seller")]
    NotOwner(WithdrawalId),

    #[error("cannot {action} withdrawal {id} in status {status}")]
    InvalidTransition {
        id: WithdrawalId,
        status: WithdrawalStatus,
        action: &'static str,
    },

    #[error("withdrawal {id} cannot be processed before {can_process_at}")]
    NotYetDue {
        id: WithdrawalId,
        can_process_at: DateTime<Utc>,
    },

    /// The provider rejected or failed the transfer; the ledger debit stands.
    #[error("transfer for withdrawal {id} failed: {reason}")]
    TransferFailed { id: WithdrawalId, reason: String },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl WithdrawalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidAmount
            | Self::BelowMinimum { .. }
            | Self::InvalidBankInfo(_)
            | Self::InsufficientBalance { .. }
            | Self::ReasonTooShort { .. } => ErrorKind::Validation,
            Self::InvalidTransition { .. } | Self::NotYetDue { .. } => ErrorKind::Conflict,
            Self::NotFound(_) | Self::NotOwner(_) => ErrorKind::NotFound,
            Self::TransferFailed { .. } => ErrorKind::Internal,
            Self::Ledger(e) => e.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn insufficient_funds_messages_are_verbatim() {
        let error = LedgerError::InsufficientBalance {
            available: dec!(5),
            requested: dec!(10),
        };
        assert_eq!(error.to_string(), "Insufficient available balance");

        let error = LedgerError::InsufficientHeld {
            held: dec!(0),
            requested: dec!(1),
        };
        assert_eq!(error.to_string(), "Insufficient held balance");

        let error = WithdrawalError::InsufficientBalance {
            available: dec!(5),
            requested: dec!(10),
        };
        assert_eq!(error.to_string(), "Insufficient available balance");
    }

    #[test]
    fn error_display_messages() {
        assert_eq!(
            LedgerError::InvalidAmount.to_string(),
            "invalid amount (must be positive)"
        );
        assert_eq!(
            LedgerError::SaleNotPending(TransactionId(4)).to_string(),
            "transaction 4 is not a pending sale"
        );
        assert_eq!(
            LedgerError::from(StoreError::JournalAppend).to_string(),
            "store failure: journal append failed"
        );
        assert_eq!(
            WithdrawalError::InvalidTransition {
                id: WithdrawalId(2),
                status: WithdrawalStatus::Completed,
                action: "approve",
            }
            .to_string(),
            "cannot approve withdrawal 2 in status COMPLETED"
        );
        assert_eq!(
            WithdrawalError::ReasonTooShort { minimum: 10 }.to_string(),
            "reason must be at least 10 characters"
        );
    }

    #[test]
    fn wrapped_ledger_errors_keep_their_message_and_kind() {
        let error = WithdrawalError::from(LedgerError::InsufficientBalance {
            available: dec!(1),
            requested: dec!(2),
        });
        assert_eq!(error.to_string(), "Insufficient available balance");
        assert_eq!(error.kind(), ErrorKind::Validation);
    }

    #[test]
    fn error_kinds() {
        assert_eq!(LedgerError::MissingReason.kind(), ErrorKind::Validation);
        assert_eq!(
            LedgerError::Store(StoreError::BalanceWrite).kind(),
            ErrorKind::Internal
        );
        assert_eq!(
            WithdrawalError::NotFound(WithdrawalId(1)).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            WithdrawalError::NotYetDue {
                id: WithdrawalId(1),
                can_process_at: Utc::now(),
            }
            .kind(),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn errors_are_cloneable() {
        let error = LedgerError::InsufficientBalance {
            available: dec!(1),
            requested: dec!(2),
        };
        let cloned = error.clone();
        assert_eq!(error, cloned);
    }
}
