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

//! Concurrency tests using parking_lot's built-in deadlock detector.
//!
//! These drive the real ledger and withdrawal workflow from many threads
//! and check that per-seller serialization holds: no lost updates, no
//! double debits, and a journal that still adds up to the balance.

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use parking_lot::deadlock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use seller_ledger::{
    AdminId, BankInfo, DisputeId, Ledger, LedgerConfig, ManualClock, MemoryStore,
    MemoryWithdrawalStore, OrderId, PaymentProvider, PixKeyType, ProviderError, SellerId,
    Transfer, TransferRequest, TransferStatus, WithdrawalId, WithdrawalStatus,
    WithdrawalWorkflow, replay,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

const ADMIN: AdminId = AdminId(1);

// === Deadlock Detection Infrastructure ===

/// Starts a background thread that checks for deadlocks.
/// Returns a handle to stop the detector.
fn start_deadlock_detector() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();

    thread::spawn(move || {
        while running_clone.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
            let deadlocks = deadlock::check_deadlock();
            if !deadlocks.is_empty() {
                eprintln!("\n=== DEADLOCK DETECTED ===");
                for (i, threads) in deadlocks.iter().enumerate() {
                    eprintln!("\nDeadlock #{}", i + 1);
                    for t in threads {
                        eprintln!("Thread ID: {:?}", t.thread_id());
                        eprintln!("Backtrace:\n{:#?}", t.backtrace());
                    }
                }
                panic!("Deadlock detected! See output above for details.");
            }
        }
    });

    running
}

/// Stops the deadlock detector.
fn stop_deadlock_detector(running: Arc<AtomicBool>) {
    running.store(false, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(150)); // Let detector thread exit
}

struct CountingProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl PaymentProvider for CountingProvider {
    async fn create_transfer(&self, request: TransferRequest) -> Result<Transfer, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(Transfer {
            id: format!("tr-{}", request.metadata.withdrawal_id),
            status: TransferStatus::Succeeded,
            destination: request.bank_info.masked(),
        })
    }
}

fn ledger() -> (Arc<ManualClock>, Arc<Ledger>) {
    let clock = Arc::new(ManualClock::default());
    let ledger = Arc::new(Ledger::new(
        Arc::new(MemoryStore::new()),
        clock.clone(),
        LedgerConfig::default(),
    ));
    (clock, ledger)
}

fn workflow(ledger: Arc<Ledger>) -> (Arc<CountingProvider>, Arc<WithdrawalWorkflow>) {
    let provider = Arc::new(CountingProvider {
        calls: AtomicUsize::new(0),
    });
    let workflow = Arc::new(WithdrawalWorkflow::new(
        ledger,
        Arc::new(MemoryWithdrawalStore::new()),
        provider.clone(),
    ));
    (provider, workflow)
}

fn pix() -> BankInfo {
    BankInfo::Pix {
        pix_key: "c0ffee".into(),
        pix_key_type: PixKeyType::Random,
    }
}

fn assert_journal_matches_balance(ledger: &Ledger, seller: SellerId) {
    let balance = ledger.balance(seller).expect("seller should exist");
    let replayed = replay(&ledger.journal(seller));
    assert_eq!(replayed.available, balance.available_balance);
    assert_eq!(replayed.pending, balance.pending_balance);
    assert_eq!(replayed.held, balance.held_balance);
    assert_eq!(replayed.total_earned, balance.total_earned);
    assert_eq!(replayed.total_withdrawn, balance.total_withdrawn);
}

// === Tests ===

/// Many threads hammer one seller; every accepted debit must be covered.
#[test]
fn no_lost_updates_high_contention_single_seller() {
    let detector = start_deadlock_detector();
    let (_, ledger) = ledger();
    let seller = SellerId(1);
    ledger
        .manual_adjustment(seller, dec!(500.00), "opening balance", ADMIN)
        .unwrap();

    const NUM_THREADS: usize = 32;
    const OPS_PER_THREAD: usize = 100;

    let debited = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::with_capacity(NUM_THREADS);

    for thread_id in 0..NUM_THREADS {
        let ledger = ledger.clone();
        let debited = debited.clone();

        handles.push(thread::spawn(move || {
            for i in 0..OPS_PER_THREAD {
                let op = (thread_id * OPS_PER_THREAD + i) as u64;
                match i % 4 {
                    0 => {
                        let _ = ledger.credit_sale(
                            seller,
                            dec!(1.00),
                            OrderId(format!("order-{op}")),
                            None,
                        );
                    }
                    1 => {
                        if ledger
                            .debit_withdrawal(seller, dec!(1.00), WithdrawalId(op))
                            .is_ok()
                        {
                            debited.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                    2 => {
                        let dispute = DisputeId(format!("dsp-{op}"));
                        if ledger
                            .hold_funds(seller, dec!(0.50), dispute.clone(), "opened")
                            .is_ok()
                        {
                            ledger
                                .release_funds(seller, dec!(0.50), dispute, "closed")
                                .unwrap();
                        }
                    }
                    _ => {
                        let balance = ledger.get_or_create_balance(seller);
                        assert!(balance.held_balance >= Decimal::ZERO);
                        let _ = ledger.get_transactions(seller, 10, 0);
                    }
                }
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    let balance = ledger.balance(seller).unwrap();
    let debits = Decimal::from(debited.load(Ordering::SeqCst));
    assert!(balance.available_balance >= Decimal::ZERO);
    assert_eq!(balance.available_balance, dec!(500.00) - debits);
    assert_eq!(balance.pending_balance, Decimal::from(NUM_THREADS * OPS_PER_THREAD / 4));
    assert_eq!(balance.held_balance, Decimal::ZERO);
    assert_eq!(balance.total_withdrawn, debits);
    assert_journal_matches_balance(&ledger, seller);
}

/// Debits racing for the last funds: exactly as many succeed as fit.
#[test]
fn racing_debits_never_overdraw() {
    let detector = start_deadlock_detector();
    let (_, ledger) = ledger();
    let seller = SellerId(2);
    ledger
        .manual_adjustment(seller, dec!(10.00), "opening balance", ADMIN)
        .unwrap();

    let handles: Vec<_> = (0..40u64)
        .map(|i| {
            let ledger = ledger.clone();
            thread::spawn(move || ledger.debit_withdrawal(seller, dec!(1.00), WithdrawalId(i)).is_ok())
        })
        .collect();
    let succeeded = handles
        .into_iter()
        .map(|h| h.join().expect("Thread panicked"))
        .filter(|ok| *ok)
        .count();

    stop_deadlock_detector(detector);

    assert_eq!(succeeded, 10);
    assert_eq!(ledger.balance(seller).unwrap().available_balance, Decimal::ZERO);
    assert_journal_matches_balance(&ledger, seller);
}

/// Threads cycle through sellers; different sellers never block each other.
#[test]
fn no_deadlock_cross_seller_operations() {
    let detector = start_deadlock_detector();
    let (_, ledger) = ledger();

    const NUM_THREADS: usize = 20;
    const NUM_SELLERS: u32 = 10;
    const OPS_PER_THREAD: usize = 50;

    let mut handles = Vec::with_capacity(NUM_THREADS);

    for thread_id in 0..NUM_THREADS {
        let ledger = ledger.clone();

        handles.push(thread::spawn(move || {
            for i in 0..OPS_PER_THREAD {
                let seller = SellerId(((thread_id + i) as u32 % NUM_SELLERS) + 1);
                let order = OrderId(format!("order-{thread_id}-{i}"));
                if i % 2 == 0 {
                    ledger.credit_sale(seller, dec!(5.00), order, None).unwrap();
                } else {
                    ledger
                        .process_refund(seller, dec!(1.00), order, None)
                        .unwrap();
                }

                // Also read a different seller
                let other = SellerId(((thread_id + i + 1) as u32 % NUM_SELLERS) + 1);
                let _ = ledger.balance(other).map(|b| b.total());
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    let mut total = Decimal::ZERO;
    for seller in 1..=NUM_SELLERS {
        let seller = SellerId(seller);
        total += ledger.balance(seller).unwrap().total();
        assert_journal_matches_balance(&ledger, seller);
    }
    let ops = Decimal::from(NUM_THREADS * OPS_PER_THREAD / 2);
    assert_eq!(total, ops * dec!(5.00) - ops * dec!(1.00));
}

/// Approvals read the ledger while holding the withdrawal row; ledger
/// writers never touch withdrawal rows, so the two cannot cycle.
#[test]
fn no_deadlock_approvals_against_ledger_writes() {
    let detector = start_deadlock_detector();
    let (_, ledger) = ledger();
    let (_, workflow) = workflow(ledger.clone());
    let seller = SellerId(3);
    ledger
        .manual_adjustment(seller, dec!(10000.00), "opening balance", ADMIN)
        .unwrap();

    let ids: Vec<WithdrawalId> = (0..50)
        .map(|_| workflow.request_withdrawal(seller, dec!(10.00), pix()).unwrap().id)
        .collect();
    let ids = Arc::new(ids);

    let mut handles = Vec::new();
    for t in 0..4 {
        let workflow = workflow.clone();
        let ids = ids.clone();
        handles.push(thread::spawn(move || {
            for id in ids.iter().skip(t).step_by(4) {
                workflow.approve_withdrawal(*id, ADMIN).unwrap();
            }
        }));
    }
    for t in 0..4 {
        let ledger = ledger.clone();
        handles.push(thread::spawn(move || {
            for i in 0..100 {
                ledger
                    .credit_sale(seller, dec!(1.00), OrderId(format!("order-{t}-{i}")), None)
                    .unwrap();
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    assert_eq!(
        workflow.list(Some(WithdrawalStatus::WaitingDelay)).len(),
        50
    );
    assert_eq!(ledger.balance(seller).unwrap().pending_balance, dec!(400.00));
}

/// Approve and cancel race on the same request; exactly one wins.
#[test]
fn approve_and_cancel_race_has_one_winner() {
    let detector = start_deadlock_detector();
    let (_, ledger) = ledger();
    let (_, workflow) = workflow(ledger.clone());
    let seller = SellerId(4);
    ledger
        .manual_adjustment(seller, dec!(1000.00), "opening balance", ADMIN)
        .unwrap();

    for _ in 0..50 {
        let id = workflow.request_withdrawal(seller, dec!(10.00), pix()).unwrap().id;
        let approver = {
            let workflow = workflow.clone();
            thread::spawn(move || workflow.approve_withdrawal(id, ADMIN).is_ok())
        };
        let canceller = {
            let workflow = workflow.clone();
            thread::spawn(move || workflow.cancel_withdrawal(id, None, seller).is_ok())
        };
        let approved = approver.join().expect("Thread panicked");
        let cancelled = canceller.join().expect("Thread panicked");

        assert!(approved ^ cancelled);
        let expected = if approved {
            WithdrawalStatus::WaitingDelay
        } else {
            WithdrawalStatus::Cancelled
        };
        assert_eq!(workflow.get(id).unwrap().status, expected);
    }

    stop_deadlock_detector(detector);
}

/// Admin and scheduler process the same due request at once: one debit,
/// one transfer.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_processing_debits_once() {
    let (clock, ledger) = ledger();
    let (provider, workflow) = workflow(ledger.clone());
    let seller = SellerId(5);
    ledger
        .manual_adjustment(seller, dec!(100.00), "opening balance", ADMIN)
        .unwrap();

    let id = workflow.request_withdrawal(seller, dec!(60.00), pix()).unwrap().id;
    workflow.approve_withdrawal(id, ADMIN).unwrap();
    clock.advance(ChronoDuration::hours(48));

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let workflow = workflow.clone();
            tokio::spawn(async move {
                if i % 2 == 0 {
                    workflow.process_due(id).await.is_ok()
                } else {
                    workflow.process_withdrawal(id, ADMIN).await.is_ok()
                }
            })
        })
        .collect();

    let mut succeeded = 0;
    for task in tasks {
        if task.await.expect("task panicked") {
            succeeded += 1;
        }
    }

    assert_eq!(succeeded, 1);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    assert_eq!(workflow.get(id).unwrap().status, WithdrawalStatus::Completed);
    let balance = ledger.balance(seller).unwrap();
    assert_eq!(balance.available_balance, dec!(40.00));
    assert_eq!(balance.total_withdrawn, dec!(60.00));
}
