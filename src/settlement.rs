//! Ledger writer. Applies the money movement of a completed request, or of a
//! direct ledger operation, inside the caller's atomic unit.
//!
//! Withdrawals debit the subject after a hard balance check. Loan
//! applications disburse instead: they open a loan and leave savings as is.
//!
//! Completion runs exactly once per request: COMPLETED is terminal and the
//! engine refuses a request with no pending step, so this module never sees
//! the same request twice.
use chrono::Utc;
use tracing::{error, info};

use super::error::{LedgerError, TransitionError};
use super::ledger::{BalanceLedger, Loan, LoanStatus, Transaction, TransactionKind};
use super::request::{ApprovalRequest, LoanTerms, RequestContent};
use super::store::{TxResult, TxTrees, abort};
use super::types::{Amount, SubjectRef, TimeStamp};
use super::utils::new_uuid_to_bech32;

fn reference(hrp: &str) -> TxResult<String> {
    new_uuid_to_bech32(hrp).or_else(|e| abort(e))
}

/// Settles `request`, links the resulting transaction to it and returns the
/// transaction. Any error aborts the enclosing transition.
pub(crate) fn complete(
    tx: &TxTrees<'_>,
    request: &mut ApprovalRequest,
    recorded_by: &str,
    at: &TimeStamp<Utc>,
) -> TxResult<Transaction> {
    let subject = match request.subject() {
        Ok(subject) => subject,
        Err(err) => {
            error!(
                request_id = %request.id,
                savings_ref = ?request.savings_ref,
                personal_savings_ref = ?request.personal_savings_ref,
                "request does not reference exactly one ledger entity"
            );
            return abort(err);
        }
    };
    let amount = request.requested_amount;

    let transaction = match (&request.content, &subject) {
        (RequestContent::SavingsWithdrawal(_), SubjectRef::Savings(id)) => {
            let Some(mut record) = tx.savings_record(id)? else {
                return abort(TransitionError::SubjectMissing(subject.clone()));
            };
            let txn = debit(&mut record, TransactionKind::SavingsWithdrawal, request, recorded_by, at)?;
            tx.save_savings_record(&record)?;
            txn
        }
        (RequestContent::PersonalSavingsWithdrawal(_), SubjectRef::PersonalSavings(id)) => {
            let Some(mut plan) = tx.personal_savings_plan(id)? else {
                return abort(TransitionError::SubjectMissing(subject.clone()));
            };
            let txn = debit(
                &mut plan,
                TransactionKind::PersonalSavingsWithdrawal,
                request,
                recorded_by,
                at,
            )?;
            tx.save_personal_savings_plan(&plan)?;
            txn
        }
        (RequestContent::Loan(terms), SubjectRef::Savings(id)) => {
            let Some(record) = tx.savings_record(id)? else {
                return abort(TransitionError::SubjectMissing(subject.clone()));
            };
            disburse(tx, terms, &record.member_id, id, request, recorded_by, at)?
        }
        _ => {
            error!(
                request_id = %request.id,
                request_type = %request.request_type(),
                subject = %subject,
                "request type does not match its ledger entity"
            );
            return abort(TransitionError::InvalidSubjectConfiguration);
        }
    };

    let digest = tx.insert_transaction(&transaction)?;
    request.settlement_ref = Some(digest);
    info!(
        request_id = %request.id,
        amount = %amount,
        balance_after = %transaction.balance_after,
        "request settled"
    );

    Ok(transaction)
}

/// Hard balance check, then debit. Insufficient funds abort the transition.
fn debit<L: BalanceLedger>(
    ledger: &mut L,
    kind: TransactionKind,
    request: &ApprovalRequest,
    recorded_by: &str,
    at: &TimeStamp<Utc>,
) -> TxResult<Transaction> {
    let amount = request.requested_amount;
    let balance_after = ledger.debit(amount, at.clone()).or_else(|e| abort(e))?;

    Ok(Transaction::new(
        reference("txn_")?,
        kind,
        -amount,
        balance_after,
        ledger.entity_ref(),
        Some(request.id.clone()),
        recorded_by.to_string(),
        at.clone(),
    ))
}

fn disburse(
    tx: &TxTrees<'_>,
    terms: &LoanTerms,
    member_id: &str,
    savings_id: &str,
    request: &ApprovalRequest,
    recorded_by: &str,
    at: &TimeStamp<Utc>,
) -> TxResult<Transaction> {
    let amount = request.requested_amount;
    let loan = Loan {
        id: reference("loan_")?,
        member_id: member_id.to_string(),
        savings_ref: savings_id.to_string(),
        loan_type: terms.loan_type,
        tenure_months: terms.tenure_months,
        principal: amount,
        remaining_balance: amount,
        status: LoanStatus::Active,
        request_ref: request.id.clone(),
        disbursed_at: at.clone(),
    };
    tx.save_loan(&loan)?;

    Ok(Transaction::new(
        reference("txn_")?,
        TransactionKind::LoanDisbursement,
        amount,
        loan.remaining_balance,
        loan.entity_ref(),
        Some(request.id.clone()),
        recorded_by.to_string(),
        at.clone(),
    ))
}

/// Credits a savings record or personal plan outside any approval flow.
pub(crate) fn contribute(
    tx: &TxTrees<'_>,
    subject: &SubjectRef,
    amount: Amount,
    recorded_by: &str,
    at: &TimeStamp<Utc>,
) -> TxResult<Transaction> {
    if !amount.is_positive() {
        return abort(LedgerError::NonPositiveAmount);
    }

    let (balance_after, related) = match subject {
        SubjectRef::Savings(id) => {
            let Some(mut record) = tx.savings_record(id)? else {
                return abort(LedgerError::EntityNotFound(subject.to_string()));
            };
            let after = record.credit(amount, at.clone()).or_else(|e| abort(e))?;
            tx.save_savings_record(&record)?;
            (after, record.entity_ref())
        }
        SubjectRef::PersonalSavings(id) => {
            let Some(mut plan) = tx.personal_savings_plan(id)? else {
                return abort(LedgerError::EntityNotFound(subject.to_string()));
            };
            let after = plan.credit(amount, at.clone()).or_else(|e| abort(e))?;
            tx.save_personal_savings_plan(&plan)?;
            (after, plan.entity_ref())
        }
    };

    let transaction = Transaction::new(
        reference("txn_")?,
        TransactionKind::Contribution,
        amount,
        balance_after,
        related,
        None,
        recorded_by.to_string(),
        at.clone(),
    );
    tx.insert_transaction(&transaction)?;
    Ok(transaction)
}

pub(crate) fn repay(
    tx: &TxTrees<'_>,
    loan_id: &str,
    amount: Amount,
    recorded_by: &str,
    at: &TimeStamp<Utc>,
) -> TxResult<Transaction> {
    let Some(mut loan) = tx.loan(loan_id)? else {
        return abort(LedgerError::EntityNotFound(format!("loan:{loan_id}")));
    };
    let remaining = loan.repay(amount).or_else(|e| abort(e))?;
    tx.save_loan(&loan)?;

    let transaction = Transaction::new(
        reference("txn_")?,
        TransactionKind::LoanRepayment,
        -amount,
        remaining,
        loan.entity_ref(),
        None,
        recorded_by.to_string(),
        at.clone(),
    );
    tx.insert_transaction(&transaction)?;
    Ok(transaction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkflowError;
    use crate::ledger::SavingsRecord;
    use crate::request::WithdrawalDetails;
    use crate::store::Store;

    fn store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("settlement.db")).unwrap();
        (dir, Store::open(&db).unwrap())
    }

    fn seeded(store: &Store, balance: i64) {
        let mut record = SavingsRecord::new("sav_1".into(), "member_1".into(), TimeStamp::new());
        record.current_balance = Amount::from(balance);
        record.cumulative_total = Amount::from(balance);
        store
            .atomically(|tx| tx.save_savings_record(&record))
            .unwrap();
    }

    fn withdrawal(amount: i64) -> ApprovalRequest {
        ApprovalRequest::new(
            "req_1".into(),
            RequestContent::SavingsWithdrawal(WithdrawalDetails {
                reason: "rent".into(),
            }),
            SubjectRef::Savings("sav_1".into()),
            Amount::from(amount),
            "member_1".into(),
            TimeStamp::new(),
        )
    }

    #[test]
    fn both_subject_refs_is_a_configuration_error() {
        let (_dir, store) = store();
        seeded(&store, 20_000);
        let mut request = withdrawal(1_000);
        request.personal_savings_ref = Some("psv_1".into());

        let result = store.atomically(|tx| {
            let mut request = request.clone();
            complete(tx, &mut request, "treasurer", &TimeStamp::new())
        });

        assert!(matches!(
            result,
            Err(WorkflowError::Transition(TransitionError::InvalidSubjectConfiguration))
        ));
        assert_eq!(
            store.savings_record("sav_1").unwrap().unwrap().current_balance,
            Amount::from(20_000)
        );
    }

    #[test]
    fn mismatched_content_and_subject_is_a_configuration_error() {
        let (_dir, store) = store();
        let mut request = withdrawal(1_000);
        request.savings_ref = None;
        request.personal_savings_ref = Some("psv_1".into());

        let result = store.atomically(|tx| {
            let mut request = request.clone();
            complete(tx, &mut request, "treasurer", &TimeStamp::new())
        });

        assert!(matches!(
            result,
            Err(WorkflowError::Transition(TransitionError::InvalidSubjectConfiguration))
        ));
    }

    #[test]
    fn settlement_links_transaction_to_request() {
        let (_dir, store) = store();
        seeded(&store, 20_000);

        let (request, txn) = store
            .atomically(|tx| {
                let mut request = withdrawal(5_000);
                let txn = complete(tx, &mut request, "treasurer", &TimeStamp::new())?;
                Ok((request, txn))
            })
            .unwrap();

        assert_eq!(txn.amount, Amount::from(-5_000));
        assert_eq!(txn.balance_after, Amount::from(15_000));
        let digest = request.settlement_ref.unwrap();
        assert_eq!(store.transaction(&digest).unwrap(), Some(txn));
    }
}
