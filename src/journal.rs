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

//! Thread-safe append-only transaction journal.
//!
//! Rows are never removed. The only in-place change is flipping a pending
//! sale to completed when its holding period is released.

use crate::LedgerError;
use crate::base::{SellerId, TransactionId};
use crate::error::StoreError;
use crate::transaction::{Transaction, TransactionStatus};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-memory journal with per-seller and pending-sale indexes.
///
/// Writers for one seller must be serialized by the caller (the store holds
/// the seller's row lock), which keeps each seller's index in creation order.
#[derive(Debug)]
pub struct Journal {
    /// All rows by id.
    transactions: DashMap<TransactionId, Transaction>,

    /// Row ids per seller, in creation order.
    by_seller: DashMap<SellerId, Vec<TransactionId>>,

    /// Sales still waiting for their holding period.
    pending_sales: DashMap<TransactionId, SellerId>,

    next_id: AtomicU64,
}

impl Journal {
    pub fn new() -> Self {
        Self {
            transactions: DashMap::new(),
            by_seller: DashMap::new(),
            pending_sales: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Reserves the next row id.
    pub fn next_id(&self) -> TransactionId {
        TransactionId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Appends a row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::JournalAppend`] if a row with the same id
    /// already exists.
    pub fn append(&self, transaction: Transaction) -> Result<(), StoreError> {
        let id = transaction.id;
        let seller_id = transaction.seller_id;
        let pending_sale = transaction.is_pending_sale();

        match self.transactions.entry(id) {
            Entry::Occupied(_) => return Err(StoreError::JournalAppend),
            Entry::Vacant(entry) => {
                entry.insert(transaction);
            }
        }
        self.by_seller.entry(seller_id).or_default().push(id);
        if pending_sale {
            self.pending_sales.insert(id, seller_id);
        }
        Ok(())
    }

    /// Checks that `id` is a pending sale owned by `seller_id`.
    pub fn ensure_pending_sale(
        &self,
        id: TransactionId,
        seller_id: SellerId,
    ) -> Result<(), LedgerError> {
        let row = self
            .transactions
            .get(&id)
            .ok_or(LedgerError::TransactionNotFound(id))?;
        if row.seller_id != seller_id {
            return Err(LedgerError::SellerMismatch {
                transaction: id,
                seller: seller_id,
            });
        }
        if !row.is_pending_sale() {
            return Err(LedgerError::SaleNotPending(id));
        }
        Ok(())
    }

    /// Flips a pending sale to completed. Call only after
    /// [`ensure_pending_sale`](Self::ensure_pending_sale) succeeded under the
    /// same seller lock.
    pub(crate) fn complete_sale(&self, id: TransactionId, at: DateTime<Utc>) {
        if let Some(mut row) = self.transactions.get_mut(&id) {
            row.status = TransactionStatus::Completed;
            row.completed_at = Some(at);
        }
        self.pending_sales.remove(&id);
    }

    pub fn get(&self, id: TransactionId) -> Option<Transaction> {
        self.transactions.get(&id).map(|row| row.clone())
    }

    /// All of a seller's rows in creation order.
    pub fn for_seller(&self, seller_id: SellerId) -> Vec<Transaction> {
        let ids = match self.by_seller.get(&seller_id) {
            Some(ids) => ids.clone(),
            None => return Vec::new(),
        };
        ids.iter().filter_map(|id| self.get(*id)).collect()
    }

    /// A page of a seller's rows, newest first.
    pub fn page(&self, seller_id: SellerId, limit: usize, offset: usize) -> Vec<Transaction> {
        let ids = match self.by_seller.get(&seller_id) {
            Some(ids) => ids.clone(),
            None => return Vec::new(),
        };
        ids.iter()
            .rev()
            .skip(offset)
            .take(limit)
            .filter_map(|id| self.get(*id))
            .collect()
    }

    /// Every pending sale, oldest first.
    pub fn pending_sales(&self) -> Vec<Transaction> {
        let mut ids: Vec<TransactionId> = self.pending_sales.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids.into_iter().filter_map(|id| self.get(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

impl Default for Journal {
    fn default() -> Self {
        Self::new()
    }
}
