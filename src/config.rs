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

//! Ledger configuration.
//!
//! Every option can come from a command-line flag or an environment variable;
//! the binaries flatten [`LedgerConfig`] into their own argument parser.

use clap::{Args, Parser};
use rust_decimal::Decimal;
use std::time::Duration;

/// Recognized ledger options.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Hours a credited sale stays in the pending bucket before it becomes withdrawable.
    #[arg(long = "release-hours", env = "BALANCE_RELEASE_HOURS", default_value_t = 72)]
    pub balance_release_hours: u32,

    /// Smallest amount a seller may request to withdraw.
    #[arg(long = "min-withdrawal", env = "MIN_WITHDRAWAL_AMOUNT", default_value_t = Decimal::TEN)]
    pub min_withdrawal_amount: Decimal,

    /// Cooling-off period between approval and payout for new withdrawals.
    #[arg(long = "withdrawal-delay-hours", env = "WITHDRAWAL_DELAY_HOURS", default_value_t = 48)]
    pub withdrawal_delay_hours: u32,

    /// Upper bound on a single payment provider call.
    #[arg(long = "provider-timeout-secs", env = "PROVIDER_TIMEOUT_SECS", default_value_t = 30)]
    pub provider_timeout_secs: u64,
}

impl LedgerConfig {
    pub const DEFAULT_BALANCE_RELEASE_HOURS: u32 = 72;
    pub const DEFAULT_WITHDRAWAL_DELAY_HOURS: u32 = 48;
    pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 30;

    /// Reads the configuration from environment variables only.
    ///
    /// # Errors
    ///
    /// Returns a [`clap::Error`] if a variable is set but does not parse.
    pub fn from_env() -> Result<Self, clap::Error> {
        #[derive(Parser)]
        struct EnvOnly {
            #[command(flatten)]
            config: LedgerConfig,
        }

        EnvOnly::try_parse_from(["seller-ledger"]).map(|parsed| parsed.config)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn balance_release_period(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.balance_release_hours))
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            balance_release_hours: Self::DEFAULT_BALANCE_RELEASE_HOURS,
            min_withdrawal_amount: Decimal::TEN,
            withdrawal_delay_hours: Self::DEFAULT_WITHDRAWAL_DELAY_HOURS,
            provider_timeout_secs: Self::DEFAULT_PROVIDER_TIMEOUT_SECS,
        }
    }
}
