use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::Context;
use chrono::{Duration, Utc};
use sled::open;
use tempfile::{TempDir, tempdir}; // Use for test db cleanup.

use coop_approvals::error::{EligibilityError, LedgerError, TransitionError, WorkflowError};
use coop_approvals::ledger::{LoanStatus, TransactionKind};
use coop_approvals::notify::{Notifier, TransitionEvent};
use coop_approvals::request::{LoanTerms, LoanType, StepStatus, WithdrawalDetails};
use coop_approvals::types::EntityRef;
use coop_approvals::view::{DateRange, RequestQuery};
use coop_approvals::{
    Amount, ApprovalService, CurrentActor, RequestContent, RequestStatus, RequestType, Settings,
    SubjectRef,
};

// Sled locks the database file, so every test gets its own db under a temp
// dir. The TempDir must outlive the service.
fn service(name: &str) -> anyhow::Result<(TempDir, ApprovalService)> {
    // only the first test to get here installs the subscriber
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let temp_dir = tempdir()?;
    let db = open(temp_dir.path().join(name))?;
    let service = ApprovalService::new(Arc::new(db), Settings::default())?;
    Ok((temp_dir, service))
}

fn finance_officer() -> CurrentActor {
    CurrentActor::new("officer_1", "FINANCE_OFFICER", 1)
}

fn finance_manager() -> CurrentActor {
    CurrentActor::new("manager_1", "FINANCE_MANAGER", 2)
}

fn treasurer() -> CurrentActor {
    CurrentActor::new("treasurer_1", "TREASURER", 3)
}

fn withdrawal(reason: &str) -> RequestContent {
    RequestContent::SavingsWithdrawal(WithdrawalDetails {
        reason: reason.to_string(),
    })
}

fn personal_withdrawal(reason: &str) -> RequestContent {
    RequestContent::PersonalSavingsWithdrawal(WithdrawalDetails {
        reason: reason.to_string(),
    })
}

fn regular_loan() -> RequestContent {
    RequestContent::Loan(LoanTerms {
        loan_type: LoanType::Regular,
        tenure_months: 12,
        purpose: "farm equipment".to_string(),
    })
}

/// Opens a savings account funded with a single contribution.
fn funded_savings(service: &ApprovalService, member: &str, amount: i64) -> anyhow::Result<SubjectRef> {
    let record = service.open_savings_account(member)?;
    let subject = SubjectRef::Savings(record.id);
    service.record_contribution(&subject, Amount::from(amount), "clerk_1")?;
    Ok(subject)
}

/// Drives a withdrawal request through all three levels.
fn approve_withdrawal_fully(service: &ApprovalService, request_id: &str) -> anyhow::Result<()> {
    service.apply_decision(request_id, RequestStatus::InReview, &finance_officer(), None)?;
    service.apply_decision(request_id, RequestStatus::Approved, &finance_manager(), None)?;
    service.apply_decision(request_id, RequestStatus::Completed, &treasurer(), None)?;
    Ok(())
}

#[test]
fn withdrawal_passes_three_levels_and_debits_savings() -> anyhow::Result<()> {
    let (_dir, service) = service("test_withdrawal_happy_path.db")?;
    let subject = funded_savings(&service, "member_1", 20_000)?;

    let request = service.create_request(
        withdrawal("school fees"),
        subject.clone(),
        Amount::from(10_000),
        "member_1",
    )?;
    assert_eq!(request.status, RequestStatus::Pending);
    assert_eq!(request.next_approval_level, 1);
    assert_eq!(request.steps.len(), 3);

    let after_l1 = service.apply_decision(
        &request.id,
        RequestStatus::InReview,
        &finance_officer(),
        Some("documents verified".to_string()),
    )?;
    assert_eq!(after_l1.status, RequestStatus::InReview);
    assert_eq!(after_l1.next_approval_level, 2);
    assert_eq!(after_l1.steps[0].status, StepStatus::Approved);
    assert_eq!(after_l1.steps[0].approver.as_deref(), Some("officer_1"));

    let after_l2 =
        service.apply_decision(&request.id, RequestStatus::Approved, &finance_manager(), None)?;
    assert_eq!(after_l2.status, RequestStatus::Approved);
    assert_eq!(after_l2.next_approval_level, 3);

    let done = service.apply_decision(&request.id, RequestStatus::Completed, &treasurer(), None)?;
    assert_eq!(done.status, RequestStatus::Completed);
    assert!(done.completed_at.is_some());
    assert!(done.steps.iter().all(|s| s.status == StepStatus::Approved));

    let record = service
        .savings_record(subject.id())?
        .context("savings record should exist")?;
    assert_eq!(record.current_balance, Amount::from(10_000));

    let settled = service.transactions_for_request(&request.id)?;
    assert_eq!(settled.len(), 1);
    assert_eq!(settled[0].kind, TransactionKind::SavingsWithdrawal);
    assert_eq!(settled[0].amount, Amount::from(-10_000));
    assert_eq!(settled[0].balance_after, Amount::from(10_000));

    Ok(())
}

#[test]
fn withdrawal_above_ceiling_is_refused_and_not_stored() -> anyhow::Result<()> {
    let (_dir, service) = service("test_ceiling.db")?;
    let subject = funded_savings(&service, "member_1", 20_000)?;

    let result = service.create_request(
        withdrawal("car"),
        subject.clone(),
        Amount::from(17_000),
        "member_1",
    );

    match result {
        Err(WorkflowError::Eligibility(EligibilityError::AmountExceedsCeiling { requested, ceiling })) => {
            assert_eq!(requested, Amount::from(17_000));
            assert_eq!(ceiling, Amount::from(16_000));
        }
        other => panic!("expected ceiling breach, got {other:?}"),
    }
    assert_eq!(service.list_requests(&RequestQuery::new())?.total_items, 0);

    Ok(())
}

#[test]
fn non_positive_amount_is_refused() -> anyhow::Result<()> {
    let (_dir, service) = service("test_non_positive.db")?;
    let subject = funded_savings(&service, "member_1", 20_000)?;

    let result = service.create_request(withdrawal("nothing"), subject, Amount::ZERO, "member_1");

    assert!(matches!(
        result,
        Err(WorkflowError::Eligibility(EligibilityError::NonPositiveAmount))
    ));
    Ok(())
}

#[test]
fn withdrawal_against_unknown_or_wrong_subject_is_refused() -> anyhow::Result<()> {
    let (_dir, service) = service("test_subjects.db")?;
    let plan = service.open_personal_savings_plan("member_1", "holiday")?;

    let missing = service.create_request(
        withdrawal("rent"),
        SubjectRef::Savings("sav_missing".to_string()),
        Amount::from(100),
        "member_1",
    );
    assert!(matches!(
        missing,
        Err(WorkflowError::Eligibility(EligibilityError::SubjectNotFound(_)))
    ));

    let mismatched = service.create_request(
        withdrawal("rent"),
        SubjectRef::PersonalSavings(plan.id),
        Amount::from(100),
        "member_1",
    );
    assert!(matches!(
        mismatched,
        Err(WorkflowError::Eligibility(EligibilityError::SubjectKindMismatch { .. }))
    ));
    Ok(())
}

#[test]
fn completion_at_level_two_is_illegal_and_changes_nothing() -> anyhow::Result<()> {
    let (_dir, service) = service("test_skip_level.db")?;
    let subject = funded_savings(&service, "member_1", 20_000)?;
    let request = service.create_request(withdrawal("rent"), subject, Amount::from(5_000), "member_1")?;
    let in_review =
        service.apply_decision(&request.id, RequestStatus::InReview, &finance_officer(), None)?;

    let result = service.apply_decision(&request.id, RequestStatus::Completed, &finance_manager(), None);

    assert!(matches!(
        result,
        Err(WorkflowError::Transition(TransitionError::IllegalTransition {
            from: RequestStatus::InReview,
            level: 2,
            to: RequestStatus::Completed,
        }))
    ));
    let stored = service.get_request(&request.id)?;
    assert_eq!(stored.status, in_review.status);
    assert_eq!(stored.next_approval_level, in_review.next_approval_level);
    assert!(service.transactions_for_request(&request.id)?.is_empty());
    Ok(())
}

#[test]
fn approving_a_pending_request_is_illegal() -> anyhow::Result<()> {
    let (_dir, service) = service("test_pending_approved.db")?;
    let subject = funded_savings(&service, "member_1", 20_000)?;
    let request = service.create_request(withdrawal("rent"), subject, Amount::from(5_000), "member_1")?;

    let result = service.apply_decision(&request.id, RequestStatus::Approved, &finance_officer(), None);

    assert!(matches!(
        result,
        Err(WorkflowError::Transition(TransitionError::IllegalTransition { .. }))
    ));
    assert_eq!(service.get_request(&request.id)?.status, RequestStatus::Pending);
    Ok(())
}

#[test]
fn wrong_role_is_unauthorized() -> anyhow::Result<()> {
    let (_dir, service) = service("test_unauthorized.db")?;
    let subject = funded_savings(&service, "member_1", 20_000)?;
    let request = service.create_request(withdrawal("rent"), subject, Amount::from(5_000), "member_1")?;

    let result = service.apply_decision(&request.id, RequestStatus::InReview, &treasurer(), None);

    match result {
        Err(WorkflowError::Transition(TransitionError::Unauthorized { required_role, level })) => {
            assert_eq!(required_role, "FINANCE_OFFICER");
            assert_eq!(level, 1);
        }
        other => panic!("expected unauthorized, got {other:?}"),
    }
    assert_eq!(service.get_request(&request.id)?.status, RequestStatus::Pending);
    Ok(())
}

#[test]
fn unknown_request_is_not_found() -> anyhow::Result<()> {
    let (_dir, service) = service("test_not_found.db")?;

    let decision = service.apply_decision("req_missing", RequestStatus::InReview, &finance_officer(), None);
    let read = service.get_request("req_missing");

    assert!(matches!(
        decision,
        Err(WorkflowError::Transition(TransitionError::RequestNotFound(_)))
    ));
    assert!(matches!(
        read,
        Err(WorkflowError::Transition(TransitionError::RequestNotFound(_)))
    ));
    Ok(())
}

#[test]
fn rejected_request_restarts_from_level_one() -> anyhow::Result<()> {
    let (_dir, service) = service("test_reject_retry.db")?;
    let subject = funded_savings(&service, "member_1", 20_000)?;
    let request = service.create_request(withdrawal("rent"), subject, Amount::from(5_000), "member_1")?;

    service.apply_decision(&request.id, RequestStatus::InReview, &finance_officer(), None)?;
    let rejected = service.apply_decision(
        &request.id,
        RequestStatus::Rejected,
        &finance_manager(),
        Some("missing receipts".to_string()),
    )?;
    assert_eq!(rejected.status, RequestStatus::Rejected);
    assert_eq!(rejected.next_approval_level, 1);
    assert!(rejected.completed_at.is_some());
    assert_eq!(rejected.steps[1].status, StepStatus::Rejected);

    let retried =
        service.apply_decision(&request.id, RequestStatus::InReview, &finance_officer(), None)?;
    assert_eq!(retried.status, RequestStatus::InReview);
    assert_eq!(retried.next_approval_level, 2);
    assert_eq!(retried.reset_count, 1);
    assert!(retried.completed_at.is_none());
    assert_eq!(retried.steps[0].status, StepStatus::Approved);
    assert!(
        retried.steps[1..]
            .iter()
            .all(|s| s.status == StepStatus::Pending && s.approver.is_none())
    );

    service.apply_decision(&request.id, RequestStatus::Approved, &finance_manager(), None)?;
    let done = service.apply_decision(&request.id, RequestStatus::Completed, &treasurer(), None)?;
    assert_eq!(done.status, RequestStatus::Completed);
    assert_eq!(service.transactions_for_request(&request.id)?.len(), 1);
    Ok(())
}

#[test]
fn completed_request_cannot_settle_twice() -> anyhow::Result<()> {
    let (_dir, service) = service("test_single_completion.db")?;
    let subject = funded_savings(&service, "member_1", 20_000)?;
    let request = service.create_request(withdrawal("rent"), subject.clone(), Amount::from(5_000), "member_1")?;
    approve_withdrawal_fully(&service, &request.id)?;

    let again = service.apply_decision(&request.id, RequestStatus::Completed, &treasurer(), None);

    assert!(matches!(
        again,
        Err(WorkflowError::Transition(TransitionError::NoPendingStep))
    ));
    assert_eq!(service.transactions_for_request(&request.id)?.len(), 1);
    let record = service.savings_record(subject.id())?.context("record")?;
    assert_eq!(record.current_balance, Amount::from(15_000));
    Ok(())
}

#[test]
fn insufficient_balance_at_completion_rolls_back() -> anyhow::Result<()> {
    let (_dir, service) = service("test_completion_rollback.db")?;
    let plan = service.open_personal_savings_plan("member_1", "emergency")?;
    let subject = SubjectRef::PersonalSavings(plan.id.clone());
    service.record_contribution(&subject, Amount::from(5_000), "clerk_1")?;

    // both pass eligibility against the same 5,000 balance
    let first = service.create_request(personal_withdrawal("a"), subject.clone(), Amount::from(5_000), "member_1")?;
    let second = service.create_request(personal_withdrawal("b"), subject.clone(), Amount::from(5_000), "member_1")?;
    approve_withdrawal_fully(&service, &first.id)?;

    service.apply_decision(&second.id, RequestStatus::InReview, &finance_officer(), None)?;
    service.apply_decision(&second.id, RequestStatus::Approved, &finance_manager(), None)?;
    let result = service.apply_decision(&second.id, RequestStatus::Completed, &treasurer(), None);

    assert!(matches!(
        result,
        Err(WorkflowError::Transition(TransitionError::InsufficientBalance { .. }))
    ));
    let stored = service.get_request(&second.id)?;
    assert_eq!(stored.status, RequestStatus::Approved);
    assert_eq!(stored.next_approval_level, 3);
    assert!(stored.settlement.is_none());
    assert_eq!(stored.steps[2].status, StepStatus::Pending);

    let plan = service.personal_savings_plan(&plan.id)?.context("plan")?;
    assert_eq!(plan.current_balance, Amount::ZERO);
    assert!(service.transactions_for_request(&second.id)?.is_empty());
    Ok(())
}

#[test]
fn personal_savings_can_be_withdrawn_in_full() -> anyhow::Result<()> {
    let (_dir, service) = service("test_personal_full.db")?;
    let plan = service.open_personal_savings_plan("member_1", "wedding")?;
    let subject = SubjectRef::PersonalSavings(plan.id.clone());
    service.record_contribution(&subject, Amount::from(8_000), "clerk_1")?;

    let over = service.create_request(personal_withdrawal("x"), subject.clone(), Amount::from(8_001), "member_1");
    assert!(matches!(
        over,
        Err(WorkflowError::Eligibility(EligibilityError::InsufficientBalance { .. }))
    ));

    let request = service.create_request(personal_withdrawal("x"), subject.clone(), Amount::from(8_000), "member_1")?;
    approve_withdrawal_fully(&service, &request.id)?;

    let txns = service.transactions_for(&subject.entity_ref())?;
    assert_eq!(txns.len(), 2);
    assert_eq!(txns[0].kind, TransactionKind::Contribution);
    assert_eq!(txns[1].kind, TransactionKind::PersonalSavingsWithdrawal);
    assert_eq!(txns[1].balance_after, Amount::ZERO);
    Ok(())
}

#[test]
fn one_savings_withdrawal_per_year() -> anyhow::Result<()> {
    let (_dir, service) = service("test_period_limit.db")?;
    let subject = funded_savings(&service, "member_1", 20_000)?;
    let first = service.create_request(withdrawal("rent"), subject.clone(), Amount::from(1_000), "member_1")?;

    let second = service.create_request(withdrawal("rent"), subject.clone(), Amount::from(1_000), "member_1");
    assert!(matches!(
        second,
        Err(WorkflowError::Eligibility(EligibilityError::PeriodLimitExceeded { limit: 1, .. }))
    ));

    // a rejected request no longer counts against the limit
    service.apply_decision(&first.id, RequestStatus::Rejected, &finance_officer(), None)?;
    service.create_request(withdrawal("rent"), subject, Amount::from(1_000), "member_1")?;
    Ok(())
}

#[test]
fn disbursed_loan_blocks_withdrawals_until_repaid() -> anyhow::Result<()> {
    let (_dir, service) = service("test_loan_flow.db")?;
    let subject = funded_savings(&service, "member_1", 50_000)?;
    assert_eq!(service.contribution_count(subject.id())?, 1);

    let request = service.create_request(regular_loan(), subject.clone(), Amount::from(30_000), "member_1")?;
    service.apply_decision(
        &request.id,
        RequestStatus::InReview,
        &CurrentActor::new("lo_1", "LOAN_OFFICER", 1),
        None,
    )?;
    service.apply_decision(
        &request.id,
        RequestStatus::Approved,
        &CurrentActor::new("cc_1", "CREDIT_COMMITTEE", 2),
        None,
    )?;
    service.apply_decision(&request.id, RequestStatus::Completed, &treasurer(), None)?;

    let loan = service
        .find_active_loan("member_1")?
        .context("loan should be disbursed")?;
    assert_eq!(loan.principal, Amount::from(30_000));
    assert_eq!(loan.remaining_balance, Amount::from(30_000));
    assert_eq!(loan.request_ref, request.id);

    let view = service.get_request(&request.id)?;
    let settlement = view.settlement.context("loan should be settled")?;
    assert_eq!(settlement.kind, TransactionKind::LoanDisbursement);
    assert_eq!(settlement.related, loan.entity_ref());

    let blocked = service.create_request(withdrawal("rent"), subject.clone(), Amount::from(1_000), "member_1");
    assert!(matches!(
        blocked,
        Err(WorkflowError::Eligibility(EligibilityError::ActiveLoanBlocks { .. }))
    ));

    service.repay_loan(&loan.id, Amount::from(10_000), "clerk_1")?;
    service.repay_loan(&loan.id, Amount::from(20_000), "clerk_1")?;
    let settled = service.loan(&loan.id)?.context("loan")?;
    assert_eq!(settled.status, LoanStatus::Settled);
    assert!(service.find_active_loan("member_1")?.is_none());

    service.create_request(withdrawal("rent"), subject, Amount::from(1_000), "member_1")?;
    let repayments = service.transactions_for(&EntityRef::new(
        coop_approvals::types::EntityKind::Loan,
        &loan.id,
    ))?;
    assert_eq!(repayments.len(), 3);
    Ok(())
}

#[test]
fn loan_needs_contribution_history() -> anyhow::Result<()> {
    let (_dir, service) = service("test_loan_history.db")?;
    let record = service.open_savings_account("member_1")?;

    let result = service.create_request(
        regular_loan(),
        SubjectRef::Savings(record.id),
        Amount::from(10_000),
        "member_1",
    );

    assert!(matches!(
        result,
        Err(WorkflowError::Eligibility(EligibilityError::InsufficientContributions {
            required: 1,
            actual: 0,
        }))
    ));
    Ok(())
}

/// Two treasurers race to complete the same request. Exactly one wins and a
/// single transaction is written.
#[test]
fn racing_completions_settle_once() -> anyhow::Result<()> {
    let (_dir, service) = service("test_race.db")?;
    let subject = funded_savings(&service, "member_1", 20_000)?;
    let request = service.create_request(withdrawal("rent"), subject.clone(), Amount::from(4_000), "member_1")?;
    service.apply_decision(&request.id, RequestStatus::InReview, &finance_officer(), None)?;
    service.apply_decision(&request.id, RequestStatus::Approved, &finance_manager(), None)?;

    let service = Arc::new(service);
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let service = Arc::clone(&service);
            let id = request.id.clone();
            thread::spawn(move || service.apply_decision(&id, RequestStatus::Completed, &treasurer(), None))
        })
        .collect();

    let outcomes: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("thread panicked"))
        .collect();
    let successes = outcomes.iter().filter(|o| o.is_ok()).count();
    assert_eq!(successes, 1);
    assert!(outcomes.iter().filter_map(|o| o.as_ref().err()).all(|e| matches!(
        e,
        WorkflowError::Transition(TransitionError::NoPendingStep)
    )));

    assert_eq!(service.transactions_for_request(&request.id)?.len(), 1);
    let record = service.savings_record(subject.id())?.context("record")?;
    assert_eq!(record.current_balance, Amount::from(16_000));
    Ok(())
}

struct FailingNotifier;

impl Notifier for FailingNotifier {
    fn notify(&self, _event: &TransitionEvent) -> anyhow::Result<()> {
        anyhow::bail!("smtp unavailable")
    }
}

#[derive(Default)]
struct RecordingNotifier(Mutex<Vec<TransitionEvent>>);

impl Notifier for RecordingNotifier {
    fn notify(&self, event: &TransitionEvent) -> anyhow::Result<()> {
        self.0
            .lock()
            .map_err(|_| anyhow::anyhow!("poisoned"))?
            .push(event.clone());
        Ok(())
    }
}

#[test]
fn notifier_failure_does_not_undo_transition() -> anyhow::Result<()> {
    let (_dir, service) = service("test_notifier_failure.db")?;
    let service = service.with_notifier(Arc::new(FailingNotifier));
    let subject = funded_savings(&service, "member_1", 20_000)?;
    let request = service.create_request(withdrawal("rent"), subject, Amount::from(1_000), "member_1")?;

    let updated = service.apply_decision(&request.id, RequestStatus::InReview, &finance_officer(), None)?;

    assert_eq!(updated.status, RequestStatus::InReview);
    assert_eq!(service.get_request(&request.id)?.status, RequestStatus::InReview);
    Ok(())
}

#[test]
fn notifier_sees_each_committed_transition() -> anyhow::Result<()> {
    let (_dir, service) = service("test_notifier_events.db")?;
    let notifier = Arc::new(RecordingNotifier::default());
    let service = service.with_notifier(notifier.clone());
    let subject = funded_savings(&service, "member_1", 20_000)?;
    let request = service.create_request(withdrawal("rent"), subject, Amount::from(1_000), "member_1")?;

    service.apply_decision(&request.id, RequestStatus::Rejected, &finance_officer(), None)?;
    let _ = service.apply_decision(&request.id, RequestStatus::Approved, &finance_officer(), None);
    service.apply_decision(&request.id, RequestStatus::InReview, &finance_officer(), None)?;

    let events = notifier.0.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].to, RequestStatus::Rejected);
    assert!(!events[0].reset);
    assert_eq!(events[1].from, RequestStatus::Rejected);
    assert_eq!(events[1].to, RequestStatus::InReview);
    assert!(events[1].reset);
    assert_eq!(events[1].initiator, "member_1");
    Ok(())
}

#[test]
fn listing_filters_and_paginates() -> anyhow::Result<()> {
    let (_dir, service) = service("test_listing.db")?;
    let mut subjects = Vec::new();
    for i in 0..5 {
        let member = format!("member_{i}");
        let subject = funded_savings(&service, &member, 10_000)?;
        service.create_request(withdrawal("rent"), subject.clone(), Amount::from(1_000), &member)?;
        subjects.push(subject);
    }
    let plan = service.open_personal_savings_plan("member_0", "travel")?;
    let plan_subject = SubjectRef::PersonalSavings(plan.id);
    service.record_contribution(&plan_subject, Amount::from(3_000), "clerk_1")?;
    service.create_request(personal_withdrawal("trip"), plan_subject, Amount::from(3_000), "member_0")?;

    let first_page = service.list_requests(&RequestQuery::new().page(1, 4))?;
    assert_eq!(first_page.total_items, 6);
    assert_eq!(first_page.total_pages, 2);
    assert_eq!(first_page.items.len(), 4);
    let second_page = service.list_requests(&RequestQuery::new().page(2, 4))?;
    assert_eq!(second_page.items.len(), 2);

    let savings_only = service.list_requests(&RequestQuery::new().of_type(RequestType::SavingsWithdrawal))?;
    assert_eq!(savings_only.total_items, 5);

    let one_subject = service.list_requests(&RequestQuery::new().for_subject(subjects[2].id()))?;
    assert_eq!(one_subject.total_items, 1);
    assert_eq!(one_subject.items[0].initiator, "member_2");

    let clamped = service.list_requests(&RequestQuery::new().page(1, 10_000))?;
    assert_eq!(clamped.page_size, service.settings().limits.max_page_size);
    Ok(())
}

#[test]
fn statistics_tally_by_status() -> anyhow::Result<()> {
    let (_dir, service) = service("test_statistics.db")?;
    let mut ids = Vec::new();
    for i in 0..4 {
        let member = format!("member_{i}");
        let subject = funded_savings(&service, &member, 10_000)?;
        ids.push(service.create_request(withdrawal("rent"), subject, Amount::from(2_000), &member)?.id);
    }
    approve_withdrawal_fully(&service, &ids[0])?;
    service.apply_decision(&ids[1], RequestStatus::Rejected, &finance_officer(), None)?;
    service.apply_decision(&ids[2], RequestStatus::InReview, &finance_officer(), None)?;

    let range = DateRange::new(Utc::now() - Duration::hours(1), Utc::now() + Duration::hours(1));
    let stats = service.statistics(&range, None)?;

    assert_eq!(stats.total, 4);
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.approved, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.completed_amount_sum, Amount::from(2_000).value());

    let past = DateRange::new(Utc::now() - Duration::days(30), Utc::now() - Duration::days(29));
    assert_eq!(service.statistics(&past, None)?.total, 0);
    Ok(())
}

#[test]
fn request_view_serializes_for_clients() -> anyhow::Result<()> {
    let (_dir, service) = service("test_view_json.db")?;
    let subject = funded_savings(&service, "member_1", 20_000)?;
    let request = service.create_request(withdrawal("rent"), subject, Amount::from(16_000), "member_1")?;
    approve_withdrawal_fully(&service, &request.id)?;

    let view = service.get_request(&request.id)?;
    let json = serde_json::to_value(&view)?;

    assert_eq!(json["status"], "COMPLETED");
    assert_eq!(json["request_type"], "SAVINGS_WITHDRAWAL");
    assert_eq!(json["requested_amount_display"], "₦16,000.00");
    assert_eq!(json["content"]["type"], "SAVINGS_WITHDRAWAL");
    assert_eq!(json["steps"].as_array().map(Vec::len), Some(3));
    assert_eq!(json["settlement"]["amount_display"], "-₦16,000.00");
    assert!(json["awaiting_role"].is_null());
    Ok(())
}

#[test]
fn balances_at_the_decimal_limit_are_refused_not_panicked() -> anyhow::Result<()> {
    let (_dir, service) = service("test_decimal_limit.db")?;
    let record = service.open_savings_account("member_1")?;
    let subject = SubjectRef::Savings(record.id);
    let max = Amount::new(rust_decimal::Decimal::MAX);
    service.record_contribution(&subject, max, "clerk_1")?;

    // the ceiling share of the largest balance still computes
    service.create_request(withdrawal("rent"), subject.clone(), Amount::from(1), "member_1")?;

    let overflow = service.record_contribution(&subject, Amount::from(1), "clerk_1");
    assert!(matches!(
        overflow,
        Err(WorkflowError::Ledger(LedgerError::BalanceOverflow { .. }))
    ));

    let record = service.savings_record(subject.id())?.context("record")?;
    assert_eq!(record.current_balance, max);
    assert_eq!(record.contribution_count, 1);
    assert_eq!(service.transactions_for(&subject.entity_ref())?.len(), 1);
    Ok(())
}

#[test]
fn reviving_a_rejected_withdrawal_respects_the_yearly_limit() -> anyhow::Result<()> {
    let (_dir, service) = service("test_revival_limit.db")?;
    let subject = funded_savings(&service, "member_1", 20_000)?;
    let first = service.create_request(withdrawal("rent"), subject.clone(), Amount::from(1_000), "member_1")?;
    service.apply_decision(&first.id, RequestStatus::Rejected, &finance_officer(), None)?;
    let second = service.create_request(withdrawal("rent"), subject.clone(), Amount::from(1_000), "member_1")?;

    let revived = service.apply_decision(&first.id, RequestStatus::InReview, &finance_officer(), None);

    assert!(matches!(
        revived,
        Err(WorkflowError::Eligibility(EligibilityError::PeriodLimitExceeded { limit: 1, .. }))
    ));
    let stored = service.get_request(&first.id)?;
    assert_eq!(stored.status, RequestStatus::Rejected);
    assert_eq!(stored.reset_count, 0);

    // once the replacement is rejected too, the original may come back
    service.apply_decision(&second.id, RequestStatus::Rejected, &finance_officer(), None)?;
    let revived = service.apply_decision(&first.id, RequestStatus::InReview, &finance_officer(), None)?;
    assert_eq!(revived.status, RequestStatus::InReview);

    let live = service.list_requests(
        &RequestQuery::new()
            .of_type(RequestType::SavingsWithdrawal)
            .for_subject(subject.id()),
    )?;
    let live = live
        .items
        .iter()
        .filter(|r| r.status != RequestStatus::Rejected)
        .count();
    assert_eq!(live, 1);
    Ok(())
}

#[test]
fn statistics_can_be_scoped_to_one_subject() -> anyhow::Result<()> {
    let (_dir, service) = service("test_statistics_subject.db")?;
    let mine = funded_savings(&service, "member_1", 10_000)?;
    let theirs = funded_savings(&service, "member_2", 10_000)?;
    let plan = service.open_personal_savings_plan("member_1", "holiday")?;
    let plan_subject = SubjectRef::PersonalSavings(plan.id.clone());
    service.record_contribution(&plan_subject, Amount::from(4_000), "clerk_1")?;

    let mine_request = service.create_request(withdrawal("rent"), mine.clone(), Amount::from(3_000), "member_1")?;
    approve_withdrawal_fully(&service, &mine_request.id)?;
    service.create_request(withdrawal("rent"), theirs.clone(), Amount::from(2_000), "member_2")?;
    service.create_request(personal_withdrawal("trip"), plan_subject, Amount::from(1_000), "member_1")?;

    let range = DateRange::new(Utc::now() - Duration::hours(1), Utc::now() + Duration::hours(1));

    let stats = service.statistics(&range, Some(mine.id()))?;
    assert_eq!(stats.total, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.completed_amount_sum, Amount::from(3_000).value());

    let plan_stats = service.statistics(&range, Some(plan.id.as_str()))?;
    assert_eq!(plan_stats.total, 1);
    assert_eq!(plan_stats.pending, 1);

    let unknown = service.statistics(&range, Some("sav_unknown"))?;
    assert_eq!(unknown.total, 0);
    assert_eq!(service.statistics(&range, None)?.total, 3);
    Ok(())
}

#[test]
fn listing_combines_type_and_status_filters() -> anyhow::Result<()> {
    let (_dir, service) = service("test_listing_status.db")?;
    let mut ids = Vec::new();
    for i in 0..3 {
        let member = format!("member_{i}");
        let subject = funded_savings(&service, &member, 10_000)?;
        ids.push(service.create_request(withdrawal("rent"), subject, Amount::from(1_000), &member)?.id);
    }
    let plan = service.open_personal_savings_plan("member_0", "travel")?;
    let plan_subject = SubjectRef::PersonalSavings(plan.id);
    service.record_contribution(&plan_subject, Amount::from(3_000), "clerk_1")?;
    let personal = service.create_request(personal_withdrawal("trip"), plan_subject, Amount::from(500), "member_0")?;

    service.apply_decision(&ids[0], RequestStatus::InReview, &finance_officer(), None)?;
    service.apply_decision(&ids[1], RequestStatus::Rejected, &finance_officer(), None)?;
    service.apply_decision(&personal.id, RequestStatus::InReview, &finance_officer(), None)?;

    let in_review = service.list_requests(&RequestQuery::new().with_status(RequestStatus::InReview))?;
    assert_eq!(in_review.total_items, 2);

    let savings_in_review = service.list_requests(
        &RequestQuery::new()
            .of_type(RequestType::SavingsWithdrawal)
            .with_status(RequestStatus::InReview),
    )?;
    assert_eq!(savings_in_review.total_items, 1);
    assert_eq!(savings_in_review.items[0].id, ids[0]);
    assert_eq!(savings_in_review.items[0].awaiting_role.as_deref(), Some("FINANCE_MANAGER"));

    let pending = service.list_requests(&RequestQuery::new().with_status(RequestStatus::Pending))?;
    assert_eq!(pending.total_items, 1);
    assert_eq!(pending.items[0].id, ids[2]);

    let rejected_personal = service.list_requests(
        &RequestQuery::new()
            .of_type(RequestType::PersonalSavingsWithdrawal)
            .with_status(RequestStatus::Rejected),
    )?;
    assert_eq!(rejected_personal.total_items, 0);
    Ok(())
}
