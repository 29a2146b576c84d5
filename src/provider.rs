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

//! Payment provider seam.
//!
//! The ledger never moves money across bank rails itself; it asks a
//! [`PaymentProvider`] to and treats anything other than
//! [`TransferStatus::Succeeded`] as a failed payout.

use crate::base::{SellerId, WithdrawalId};
use crate::error::ProviderError;
use crate::withdrawal::BankInfo;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferRequest {
    pub amount: Decimal,
    pub bank_info: BankInfo,
    pub metadata: TransferMetadata,
}

/// Correlation data attached to every transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferMetadata {
    pub withdrawal_id: WithdrawalId,
    pub seller_id: SellerId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Succeeded,
    Pending,
    Failed,
}

/// Provider's answer to a transfer request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: String,
    pub status: TransferStatus,
    pub destination: String,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_transfer(&self, request: TransferRequest) -> Result<Transfer, ProviderError>;
}
