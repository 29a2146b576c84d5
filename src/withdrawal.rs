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

//! Payout requests.
//!
//! ```text
//!  Pending ──approve──► Approved ──► WaitingDelay ──(due or anticipated)──► Processing ──► Completed
//!     │                                                                        │
//!     └──cancel / reject──► Cancelled                                          └──► Failed
//! ```

use crate::WithdrawalError;
use crate::base::{AdminId, SellerId, TransactionId, WithdrawalId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    WaitingDelay,
    Processing,
    Completed,
    Cancelled,
    Failed,
}

impl WithdrawalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::WaitingDelay => "WAITING_DELAY",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PixKeyType {
    Email,
    Phone,
    /// CPF or CNPJ.
    TaxId,
    Random,
}

/// Payout destination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "account_type", rename_all = "snake_case")]
pub enum BankInfo {
    Pix {
        pix_key: String,
        pix_key_type: PixKeyType,
    },
    BankTransfer {
        bank_code: String,
        #[serde(default)]
        agency: Option<String>,
        account_number: String,
        #[serde(default)]
        account_holder: Option<String>,
    },
}

impl BankInfo {
    /// Checks that the descriptor carries what its account type needs.
    ///
    /// # Errors
    ///
    /// Returns [`WithdrawalError::InvalidBankInfo`] naming the missing or
    /// malformed field.
    pub fn validate(&self) -> Result<(), WithdrawalError> {
        match self {
            Self::Pix {
                pix_key,
                pix_key_type,
            } => {
                let key = pix_key.trim();
                if key.is_empty() {
                    return Err(WithdrawalError::InvalidBankInfo("PIX key is required"));
                }
                let well_formed = match pix_key_type {
                    PixKeyType::Email => key.contains('@'),
                    PixKeyType::Phone => {
                        let digits = key.strip_prefix('+').unwrap_or(key);
                        !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
                    }
                    PixKeyType::TaxId => {
                        let digits: String = key.chars().filter(char::is_ascii_digit).collect();
                        digits.len() == 11 || digits.len() == 14
                    }
                    PixKeyType::Random => true,
                };
                if !well_formed {
                    return Err(WithdrawalError::InvalidBankInfo(
                        "PIX key does not match its key type",
                    ));
                }
            }
            Self::BankTransfer {
                bank_code,
                account_number,
                ..
            } => {
                if bank_code.trim().is_empty() {
                    return Err(WithdrawalError::InvalidBankInfo("bank code is required"));
                }
                if account_number.trim().is_empty() {
                    return Err(WithdrawalError::InvalidBankInfo("account number is required"));
                }
            }
        }
        Ok(())
    }

    /// Short destination label for logs, with the key or account masked.
    pub fn masked(&self) -> String {
        fn tail(value: &str) -> String {
            let chars: Vec<char> = value.chars().collect();
            let keep = chars.len().min(4);
            chars[chars.len() - keep..].iter().collect()
        }
        match self {
            Self::Pix { pix_key, .. } => format!("pix:***{}", tail(pix_key)),
            Self::BankTransfer {
                bank_code,
                account_number,
                ..
            } => format!("bank:{bank_code}:***{}", tail(account_number)),
        }
    }
}

/// One payout request and its audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: WithdrawalId,
    pub seller_id: SellerId,
    pub amount: Decimal,
    pub bank_info: BankInfo,
    pub status: WithdrawalStatus,
    pub delay_hours: u32,
    pub can_process_at: Option<DateTime<Utc>>,

    pub requested_at: DateTime<Utc>,
    pub approved_by: Option<AdminId>,
    pub approved_at: Option<DateTime<Utc>>,
    /// `None` when the release scheduler dispatched the payout.
    pub processed_by: Option<AdminId>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Set when an admin rejects the request.
    pub rejection_reason: Option<String>,
    /// Set when the seller cancels the request.
    pub cancellation_reason: Option<String>,
    pub failure_reason: Option<String>,

    pub anticipated: bool,
    pub anticipated_by: Option<AdminId>,
    pub anticipation_reason: Option<String>,
    pub anticipated_at: Option<DateTime<Utc>>,
    pub admin_ip: Option<String>,

    /// Ledger debit taken when processing started.
    pub debit_transaction_id: Option<TransactionId>,
    /// Provider transfer id, set only after a successful transfer.
    pub provider_transfer_id: Option<String>,
}

impl Withdrawal {
    pub fn new(
        id: WithdrawalId,
        seller_id: SellerId,
        amount: Decimal,
        bank_info: BankInfo,
        delay_hours: u32,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            seller_id,
            amount,
            bank_info,
            status: WithdrawalStatus::Pending,
            delay_hours,
            can_process_at: None,
            requested_at,
            approved_by: None,
            approved_at: None,
            processed_by: None,
            processed_at: None,
            completed_at: None,
            cancelled_at: None,
            rejection_reason: None,
            cancellation_reason: None,
            failure_reason: None,
            anticipated: false,
            anticipated_by: None,
            anticipation_reason: None,
            anticipated_at: None,
            admin_ip: None,
            debit_transaction_id: None,
            provider_transfer_id: None,
        }
    }

    /// Errors unless the current status is one of `allowed`.
    pub fn expect_status(
        &self,
        allowed: &[WithdrawalStatus],
        action: &'static str,
    ) -> Result<(), WithdrawalError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(WithdrawalError::InvalidTransition {
                id: self.id,
                status: self.status,
                action,
            })
        }
    }

    /// Whether the payout may be dispatched at `now`.
    ///
    /// # Errors
    ///
    /// - [`WithdrawalError::InvalidTransition`] if not approved.
    /// - [`WithdrawalError::NotYetDue`] if the delay window is still open.
    pub fn ensure_due(&self, now: DateTime<Utc>) -> Result<(), WithdrawalError> {
        self.expect_status(
            &[WithdrawalStatus::Approved, WithdrawalStatus::WaitingDelay],
            "process",
        )?;
        match self.can_process_at {
            Some(at) if at <= now => Ok(()),
            Some(at) => Err(WithdrawalError::NotYetDue {
                id: self.id,
                can_process_at: at,
            }),
            // Approved rows always carry a deadline; treat a missing one as not due.
            None => Err(WithdrawalError::NotYetDue {
                id: self.id,
                can_process_at: self.requested_at + chrono::Duration::hours(i64::from(self.delay_hours)),
            }),
        }
    }
}
