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

//! Persistence seams and their in-memory implementations.
//!
//! [`LedgerStore`] owns the seller balance table and the transaction journal
//! and is the only way to change either: [`LedgerStore::commit`] is the
//! atomic unit of work. [`WithdrawalStore`] owns the withdrawal table.
//!
//! # Thread Safety
//!
//! [`MemoryStore`] keeps one [`Mutex`] per seller row. The [`DashMap`] shard
//! guard is released before the row lock is taken, so different sellers
//! never wait on each other and the same seller is strictly serialized.

use crate::balance::SellerBalance;
use crate::base::{SellerId, TransactionId, WithdrawalId};
use crate::error::StoreError;
use crate::journal::Journal;
use crate::transaction::{JournalEntry, Transaction};
use crate::withdrawal::{Withdrawal, WithdrawalStatus};
use crate::{LedgerError, WithdrawalError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Plans a journal entry from the seller's current balance.
pub type Plan<'a> = &'a dyn Fn(&SellerBalance) -> Result<JournalEntry, LedgerError>;

/// Seller balances plus the transaction journal.
pub trait LedgerStore: Send + Sync {
    /// Current balance, without creating a row.
    fn balance(&self, seller_id: SellerId) -> Option<SellerBalance>;

    fn get_or_create_balance(&self, seller_id: SellerId) -> SellerBalance;

    /// Runs one atomic unit of work for `seller_id`.
    ///
    /// Under the seller's row lock: asks `plan` for an entry, applies its
    /// delta to a copy of the balance, writes the journal row (flipping the
    /// entry's `completes` sale if set) and replaces the balance. Either all
    /// of it becomes visible or none of it does.
    fn commit(&self, seller_id: SellerId, plan: Plan<'_>) -> Result<Transaction, LedgerError>;

    fn transaction(&self, id: TransactionId) -> Option<Transaction>;

    /// A seller's full journal in creation order.
    fn transactions(&self, seller_id: SellerId) -> Vec<Transaction>;

    /// A page of a seller's journal, newest first.
    fn transaction_page(&self, seller_id: SellerId, limit: usize, offset: usize) -> Vec<Transaction>;

    /// Every SALE still in PENDING status, oldest first.
    fn pending_sales(&self) -> Vec<Transaction>;
}

/// Store write to fail on the next commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    BalanceWrite,
    JournalAppend,
}

/// In-memory [`LedgerStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    balances: DashMap<SellerId, Arc<Mutex<SellerBalance>>>,
    journal: Journal,
    armed_faults: Mutex<Vec<Fault>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the given write fail once, on the next commit that reaches it.
    pub fn fail_next(&self, fault: Fault) {
        self.armed_faults.lock().push(fault);
    }

    fn trip(&self, fault: Fault) -> Result<(), StoreError> {
        let mut armed = self.armed_faults.lock();
        match armed.iter().position(|f| *f == fault) {
            Some(index) => {
                armed.remove(index);
                Err(match fault {
                    Fault::BalanceWrite => StoreError::BalanceWrite,
                    Fault::JournalAppend => StoreError::JournalAppend,
                })
            }
            None => Ok(()),
        }
    }

    fn row(&self, seller_id: SellerId) -> Arc<Mutex<SellerBalance>> {
        self.balances
            .entry(seller_id)
            .or_insert_with(|| Arc::new(Mutex::new(SellerBalance::new(seller_id))))
            .clone()
    }

    fn existing_row(&self, seller_id: SellerId) -> Option<Arc<Mutex<SellerBalance>>> {
        self.balances.get(&seller_id).map(|row| row.clone())
    }
}

impl LedgerStore for MemoryStore {
    fn balance(&self, seller_id: SellerId) -> Option<SellerBalance> {
        self.existing_row(seller_id).map(|row| row.lock().clone())
    }

    fn get_or_create_balance(&self, seller_id: SellerId) -> SellerBalance {
        self.row(seller_id).lock().clone()
    }

    fn commit(&self, seller_id: SellerId, plan: Plan<'_>) -> Result<Transaction, LedgerError> {
        let row = self.row(seller_id);
        let mut current = row.lock();

        let entry = plan(&current)?;
        let mut staged = current.clone();
        staged.apply(&entry.delta, entry.overdraft)?;
        if let Some(sale) = entry.completes {
            self.journal.ensure_pending_sale(sale, seller_id)?;
        }

        // Both writes are staged and checked before either is published.
        self.trip(Fault::BalanceWrite)?;
        self.trip(Fault::JournalAppend)?;

        let completes = entry.completes;
        let completed_at = entry.created_at;
        let transaction = entry.into_transaction(self.journal.next_id(), seller_id, staged.snapshot());
        self.journal.append(transaction.clone())?;
        if let Some(sale) = completes {
            self.journal.complete_sale(sale, completed_at);
        }
        *current = staged;

        Ok(transaction)
    }

    fn transaction(&self, id: TransactionId) -> Option<Transaction> {
        self.journal.get(id)
    }

    fn transactions(&self, seller_id: SellerId) -> Vec<Transaction> {
        // Reading under the row lock keeps the journal consistent with the balance.
        match self.existing_row(seller_id) {
            Some(row) => {
                let _guard = row.lock();
                self.journal.for_seller(seller_id)
            }
            None => Vec::new(),
        }
    }

    fn transaction_page(&self, seller_id: SellerId, limit: usize, offset: usize) -> Vec<Transaction> {
        self.journal.page(seller_id, limit, offset)
    }

    fn pending_sales(&self) -> Vec<Transaction> {
        self.journal.pending_sales()
    }
}

/// Payout request table.
pub trait WithdrawalStore: Send + Sync {
    fn next_id(&self) -> WithdrawalId;

    fn insert(&self, withdrawal: Withdrawal);

    fn get(&self, id: WithdrawalId) -> Option<Withdrawal>;

    /// Applies `change` to a copy of the row under the row's write lock and
    /// stores it only if `change` succeeds. This is the compare-and-set every
    /// status transition goes through.
    fn update(
        &self,
        id: WithdrawalId,
        change: &mut dyn FnMut(&mut Withdrawal) -> Result<(), WithdrawalError>,
    ) -> Result<Withdrawal, WithdrawalError>;

    fn for_seller(&self, seller_id: SellerId) -> Vec<Withdrawal>;

    /// All rows, or only those in `status`, oldest first.
    fn list(&self, status: Option<WithdrawalStatus>) -> Vec<Withdrawal>;

    /// WAITING_DELAY rows whose delay elapsed at `now`, oldest first.
    fn due(&self, now: DateTime<Utc>) -> Vec<Withdrawal>;
}

/// In-memory [`WithdrawalStore`].
#[derive(Debug)]
pub struct MemoryWithdrawalStore {
    rows: DashMap<WithdrawalId, Withdrawal>,
    next_id: AtomicU64,
}

impl MemoryWithdrawalStore {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    fn collect(&self, keep: impl Fn(&Withdrawal) -> bool) -> Vec<Withdrawal> {
        let mut rows: Vec<Withdrawal> = self
            .rows
            .iter()
            .filter(|row| keep(row.value()))
            .map(|row| row.value().clone())
            .collect();
        rows.sort_by_key(|row| row.id);
        rows
    }
}

impl Default for MemoryWithdrawalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl WithdrawalStore for MemoryWithdrawalStore {
    fn next_id(&self) -> WithdrawalId {
        WithdrawalId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn insert(&self, withdrawal: Withdrawal) {
        self.rows.insert(withdrawal.id, withdrawal);
    }

    fn get(&self, id: WithdrawalId) -> Option<Withdrawal> {
        self.rows.get(&id).map(|row| row.clone())
    }

    fn update(
        &self,
        id: WithdrawalId,
        change: &mut dyn FnMut(&mut Withdrawal) -> Result<(), WithdrawalError>,
    ) -> Result<Withdrawal, WithdrawalError> {
        let mut row = self.rows.get_mut(&id).ok_or(WithdrawalError::NotFound(id))?;
        let mut staged = row.clone();
        change(&mut staged)?;
        *row = staged.clone();
        Ok(staged)
    }

    fn for_seller(&self, seller_id: SellerId) -> Vec<Withdrawal> {
        self.collect(|row| row.seller_id == seller_id)
    }

    fn list(&self, status: Option<WithdrawalStatus>) -> Vec<Withdrawal> {
        self.collect(|row| status.is_none_or(|s| row.status == s))
    }

    fn due(&self, now: DateTime<Utc>) -> Vec<Withdrawal> {
        self.collect(|row| {
            row.status == WithdrawalStatus::WaitingDelay
                && row.can_process_at.is_some_and(|at| at <= now)
        })
    }
}
