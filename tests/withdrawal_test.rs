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

//! Withdrawal workflow integration tests.

use async_trait::async_trait;
use chrono::Duration;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use seller_ledger::{
    AdminId, BankInfo, Clock, ErrorKind, Ledger, LedgerConfig, LedgerError, ManualClock,
    MemoryStore, MemoryWithdrawalStore, PaymentProvider, PixKeyType, ProviderError, SellerId,
    Transfer, TransferRequest, TransferStatus, WithdrawalError, WithdrawalStatus,
    WithdrawalWorkflow,
};
use std::collections::VecDeque;
use std::sync::Arc;

const SELLER: SellerId = SellerId(7);
const ADMIN: AdminId = AdminId(1);

/// Answers transfers from a script and remembers every request.
#[derive(Default)]
struct ScriptedProvider {
    answers: Mutex<VecDeque<Result<TransferStatus, ProviderError>>>,
    requests: Mutex<Vec<TransferRequest>>,
    delay: Option<std::time::Duration>,
}

impl ScriptedProvider {
    fn answering(answers: Vec<Result<TransferStatus, ProviderError>>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl PaymentProvider for ScriptedProvider {
    async fn create_transfer(&self, request: TransferRequest) -> Result<Transfer, ProviderError> {
        let id = format!("tr-{}", request.metadata.withdrawal_id);
        let destination = request.bank_info.masked();
        self.requests.lock().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let answer = self
            .answers
            .lock()
            .pop_front()
            .unwrap_or(Ok(TransferStatus::Succeeded));
        answer.map(|status| Transfer {
            id,
            status,
            destination,
        })
    }
}

struct Harness {
    clock: Arc<ManualClock>,
    ledger: Arc<Ledger>,
    provider: Arc<ScriptedProvider>,
    workflow: WithdrawalWorkflow,
}

fn harness_with(provider: ScriptedProvider) -> Harness {
    let clock = Arc::new(ManualClock::default());
    let ledger = Arc::new(Ledger::new(
        Arc::new(MemoryStore::new()),
        clock.clone(),
        LedgerConfig::default(),
    ));
    let provider = Arc::new(provider);
    let workflow = WithdrawalWorkflow::new(
        ledger.clone(),
        Arc::new(MemoryWithdrawalStore::new()),
        provider.clone(),
    );
    Harness {
        clock,
        ledger,
        provider,
        workflow,
    }
}

fn harness() -> Harness {
    harness_with(ScriptedProvider::default())
}

fn pix() -> BankInfo {
    BankInfo::Pix {
        pix_key: "seller@example.com".into(),
        pix_key_type: PixKeyType::Email,
    }
}

fn fund(h: &Harness, amount: Decimal) {
    h.ledger
        .manual_adjustment(SELLER, amount, "opening balance", ADMIN)
        .unwrap();
}

fn available(h: &Harness) -> Decimal {
    h.ledger.balance(SELLER).unwrap().available_balance
}

#[tokio::test]
async fn request_approve_wait_and_process() {
    let h = harness();
    fund(&h, dec!(50.00));

    let requested = h.workflow.request_withdrawal(SELLER, dec!(50.00), pix()).unwrap();
    assert_eq!(requested.status, WithdrawalStatus::Pending);
    assert_eq!(requested.delay_hours, 48);
    assert_eq!(available(&h), dec!(50.00));

    let approved_at = h.clock.now();
    let approved = h.workflow.approve_withdrawal(requested.id, ADMIN).unwrap();
    assert_eq!(approved.status, WithdrawalStatus::WaitingDelay);
    assert_eq!(approved.approved_by, Some(ADMIN));
    assert_eq!(approved.can_process_at, Some(approved_at + Duration::hours(48)));
    assert_eq!(available(&h), dec!(50.00));

    let err = h
        .workflow
        .process_withdrawal(requested.id, ADMIN)
        .await
        .unwrap_err();
    assert!(matches!(err, WithdrawalError::NotYetDue { .. }));
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(h.provider.calls(), 0);
    assert_eq!(available(&h), dec!(50.00));

    h.clock.advance(Duration::hours(48));
    let completed = h
        .workflow
        .process_withdrawal(requested.id, ADMIN)
        .await
        .unwrap();
    assert_eq!(completed.status, WithdrawalStatus::Completed);
    assert_eq!(completed.processed_by, Some(ADMIN));
    assert_eq!(completed.provider_transfer_id.as_deref(), Some("tr-1"));
    assert!(completed.debit_transaction_id.is_some());
    assert!(completed.completed_at.is_some());

    let balance = h.ledger.balance(SELLER).unwrap();
    assert_eq!(balance.available_balance, dec!(0));
    assert_eq!(balance.total_withdrawn, dec!(50.00));
    assert_eq!(h.provider.calls(), 1);
}

#[tokio::test]
async fn anticipation_skips_the_delay() {
    let h = harness();
    fund(&h, dec!(80.00));
    let id = h.workflow.request_withdrawal(SELLER, dec!(30.00), pix()).unwrap().id;
    h.workflow.approve_withdrawal(id, ADMIN).unwrap();

    let anticipated = h
        .workflow
        .anticipate_withdrawal(id, ADMIN, "seller has urgent payroll", Some("10.0.0.8"))
        .unwrap();
    assert!(anticipated.anticipated);
    assert_eq!(anticipated.can_process_at, Some(h.clock.now()));
    assert_eq!(anticipated.admin_ip.as_deref(), Some("10.0.0.8"));
    assert_eq!(h.workflow.due().len(), 1);

    let completed = h.workflow.process_withdrawal(id, ADMIN).await.unwrap();
    assert_eq!(completed.status, WithdrawalStatus::Completed);
    assert_eq!(available(&h), dec!(50.00));
}

#[tokio::test]
async fn short_anticipation_reason_changes_nothing() {
    let h = harness();
    fund(&h, dec!(80.00));
    let id = h.workflow.request_withdrawal(SELLER, dec!(30.00), pix()).unwrap().id;
    let approved = h.workflow.approve_withdrawal(id, ADMIN).unwrap();

    let err = h
        .workflow
        .anticipate_withdrawal(id, ADMIN, "  urgent   ", None)
        .unwrap_err();
    assert_eq!(err, WithdrawalError::ReasonTooShort { minimum: 10 });
    assert_eq!(err.kind(), ErrorKind::Validation);

    let unchanged = h.workflow.get(id).unwrap();
    assert_eq!(unchanged, approved);
    assert!(!unchanged.anticipated);
    assert!(h.workflow.due().is_empty());
}

#[tokio::test]
async fn anticipation_requires_an_approved_request() {
    let h = harness();
    fund(&h, dec!(80.00));
    let id = h.workflow.request_withdrawal(SELLER, dec!(30.00), pix()).unwrap().id;

    assert!(matches!(
        h.workflow
            .anticipate_withdrawal(id, ADMIN, "seller has urgent payroll", None),
        Err(WithdrawalError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn request_validation() {
    let h = harness();
    fund(&h, dec!(100.00));

    assert_eq!(
        h.workflow.request_withdrawal(SELLER, dec!(0), pix()),
        Err(WithdrawalError::InvalidAmount)
    );
    assert_eq!(
        h.workflow.request_withdrawal(SELLER, dec!(9.99), pix()),
        Err(WithdrawalError::BelowMinimum { minimum: dec!(10) })
    );
    let bad_key = BankInfo::Pix {
        pix_key: "12".into(),
        pix_key_type: PixKeyType::TaxId,
    };
    assert!(matches!(
        h.workflow.request_withdrawal(SELLER, dec!(20), bad_key),
        Err(WithdrawalError::InvalidBankInfo(_))
    ));

    let err = h
        .workflow
        .request_withdrawal(SELLER, dec!(100.01), pix())
        .unwrap_err();
    assert_eq!(err.to_string(), "Insufficient available balance");
    assert!(h.workflow.list_for_seller(SELLER).is_empty());
}

#[tokio::test]
async fn approval_rechecks_balance() {
    let h = harness();
    fund(&h, dec!(60.00));
    let id = h.workflow.request_withdrawal(SELLER, dec!(50.00), pix()).unwrap().id;

    // The seller spends the money before an admin gets to the request.
    h.ledger
        .manual_adjustment(SELLER, dec!(-20.00), "fee correction", ADMIN)
        .unwrap();

    let err = h.workflow.approve_withdrawal(id, ADMIN).unwrap_err();
    assert!(matches!(err, WithdrawalError::InsufficientBalance { .. }));
    assert_eq!(h.workflow.get(id).unwrap().status, WithdrawalStatus::Pending);
    assert_eq!(available(&h), dec!(40.00));
}

#[tokio::test]
async fn provider_failure_keeps_the_debit() {
    let h = harness_with(ScriptedProvider::answering(vec![Err(ProviderError::new(
        "destination account closed",
    ))]));
    fund(&h, dec!(70.00));
    let id = h.workflow.request_withdrawal(SELLER, dec!(70.00), pix()).unwrap().id;
    h.workflow.approve_withdrawal(id, ADMIN).unwrap();
    h.clock.advance(Duration::hours(48));

    let err = h.workflow.process_withdrawal(id, ADMIN).await.unwrap_err();
    assert_eq!(
        err,
        WithdrawalError::TransferFailed {
            id,
            reason: "destination account closed".into()
        }
    );

    let failed = h.workflow.get(id).unwrap();
    assert_eq!(failed.status, WithdrawalStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("destination account closed"));
    assert!(failed.debit_transaction_id.is_some());
    assert!(failed.provider_transfer_id.is_none());

    // No automatic reversal.
    assert_eq!(available(&h), dec!(0));
    assert_eq!(h.ledger.balance(SELLER).unwrap().total_withdrawn, dec!(70.00));
}

#[tokio::test]
async fn non_succeeded_transfer_status_is_a_failure() {
    let h = harness_with(ScriptedProvider::answering(vec![Ok(TransferStatus::Pending)]));
    fund(&h, dec!(20.00));
    let id = h.workflow.request_withdrawal(SELLER, dec!(20.00), pix()).unwrap().id;
    h.workflow.approve_withdrawal(id, ADMIN).unwrap();
    h.clock.advance(Duration::hours(48));

    assert!(matches!(
        h.workflow.process_withdrawal(id, ADMIN).await,
        Err(WithdrawalError::TransferFailed { .. })
    ));
    assert_eq!(h.workflow.get(id).unwrap().status, WithdrawalStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn provider_timeout_fails_the_withdrawal() {
    let h = harness_with(ScriptedProvider {
        delay: Some(std::time::Duration::from_secs(31)),
        ..ScriptedProvider::default()
    });
    fund(&h, dec!(20.00));
    let id = h.workflow.request_withdrawal(SELLER, dec!(20.00), pix()).unwrap().id;
    h.workflow.approve_withdrawal(id, ADMIN).unwrap();
    h.clock.advance(Duration::hours(48));

    let err = h.workflow.process_withdrawal(id, ADMIN).await.unwrap_err();
    assert!(matches!(err, WithdrawalError::TransferFailed { .. }));
    assert!(err.to_string().contains("did not answer within 30s"));
    assert_eq!(h.workflow.get(id).unwrap().status, WithdrawalStatus::Failed);
}

#[tokio::test]
async fn debit_failure_marks_failed_without_calling_provider() {
    let h = harness();
    fund(&h, dec!(40.00));
    let id = h.workflow.request_withdrawal(SELLER, dec!(40.00), pix()).unwrap().id;
    h.workflow.approve_withdrawal(id, ADMIN).unwrap();
    h.ledger
        .manual_adjustment(SELLER, dec!(-10.00), "correction", ADMIN)
        .unwrap();
    h.clock.advance(Duration::hours(48));

    let err = h.workflow.process_withdrawal(id, ADMIN).await.unwrap_err();
    assert!(matches!(
        err,
        WithdrawalError::Ledger(LedgerError::InsufficientBalance { .. })
    ));
    assert_eq!(h.provider.calls(), 0);

    let failed = h.workflow.get(id).unwrap();
    assert_eq!(failed.status, WithdrawalStatus::Failed);
    assert!(failed.debit_transaction_id.is_none());
    assert_eq!(available(&h), dec!(30.00));
}

#[tokio::test]
async fn completed_withdrawal_cannot_be_processed_twice() {
    let h = harness();
    fund(&h, dec!(40.00));
    let id = h.workflow.request_withdrawal(SELLER, dec!(20.00), pix()).unwrap().id;
    h.workflow.approve_withdrawal(id, ADMIN).unwrap();
    h.clock.advance(Duration::hours(48));
    h.workflow.process_withdrawal(id, ADMIN).await.unwrap();

    assert!(matches!(
        h.workflow.process_withdrawal(id, ADMIN).await,
        Err(WithdrawalError::InvalidTransition {
            status: WithdrawalStatus::Completed,
            ..
        })
    ));
    assert_eq!(available(&h), dec!(20.00));
    assert_eq!(h.provider.calls(), 1);
}

#[tokio::test]
async fn seller_cancels_own_pending_request() {
    let h = harness();
    fund(&h, dec!(40.00));
    let id = h.workflow.request_withdrawal(SELLER, dec!(20.00), pix()).unwrap().id;

    assert_eq!(
        h.workflow.cancel_withdrawal(id, None, SellerId(8)),
        Err(WithdrawalError::NotOwner(id))
    );

    let cancelled = h
        .workflow
        .cancel_withdrawal(id, Some("changed my mind"), SELLER)
        .unwrap();
    assert_eq!(cancelled.status, WithdrawalStatus::Cancelled);
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("changed my mind"));
    assert!(cancelled.cancelled_at.is_some());

    assert!(matches!(
        h.workflow.approve_withdrawal(id, ADMIN),
        Err(WithdrawalError::InvalidTransition { .. })
    ));
    assert_eq!(available(&h), dec!(40.00));
}

#[tokio::test]
async fn admin_rejects_pending_request() {
    let h = harness();
    fund(&h, dec!(40.00));
    let id = h.workflow.request_withdrawal(SELLER, dec!(20.00), pix()).unwrap().id;

    assert_eq!(
        h.workflow.reject_withdrawal(id, ADMIN, " "),
        Err(WithdrawalError::ReasonTooShort { minimum: 1 })
    );
    let rejected = h
        .workflow
        .reject_withdrawal(id, ADMIN, "bank account under review")
        .unwrap();
    assert_eq!(rejected.status, WithdrawalStatus::Cancelled);
    assert_eq!(
        rejected.rejection_reason.as_deref(),
        Some("bank account under review")
    );
    assert_eq!(
        h.workflow.list(Some(WithdrawalStatus::Cancelled)).len(),
        1
    );
    assert_eq!(available(&h), dec!(40.00));
}

#[tokio::test]
async fn unknown_withdrawal_is_not_found() {
    let h = harness();
    let err = h
        .workflow
        .approve_withdrawal(seller_ledger::WithdrawalId(404), ADMIN)
        .unwrap_err();
    assert_eq!(err, WithdrawalError::NotFound(seller_ledger::WithdrawalId(404)));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
