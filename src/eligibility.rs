//! Creation time gates for new approval requests.
//!
//! Every check is a pure function over data the caller has already loaded, so
//! the service can evaluate them inside the same atomic unit that inserts the
//! request. None of them are re-run at completion; only the hard balance
//! check in [`crate::settlement`] guards against drift between levels.
use tracing::debug;

use super::config::LimitSettings;
use super::error::EligibilityError;
use super::ledger::Loan;
use super::request::{ApprovalRequest, RequestStatus, RequestType};
use super::types::Amount;

pub fn positive_amount(amount: Amount) -> Result<(), EligibilityError> {
    if amount.is_positive() {
        Ok(())
    } else {
        Err(EligibilityError::NonPositiveAmount)
    }
}

/// Fails when the member holds an outstanding regular loan.
pub fn has_no_blocking_active_loan(active_loan: Option<&Loan>) -> Result<(), EligibilityError> {
    match active_loan {
        Some(loan) if loan.blocks_withdrawals() => Err(EligibilityError::ActiveLoanBlocks {
            loan_id: loan.id.clone(),
            remaining: loan.remaining_balance,
        }),
        _ => Ok(()),
    }
}

/// Regular savings withdrawals are limited per calendar year; rejected
/// requests don't count. Other request types are exempt.
pub fn within_period_limit(
    request_type: RequestType,
    existing: &[ApprovalRequest],
    year: i32,
    limit: u32,
) -> Result<(), EligibilityError> {
    if request_type != RequestType::SavingsWithdrawal {
        return Ok(());
    }

    let used = existing
        .iter()
        .filter(|r| r.request_type() == request_type)
        .filter(|r| r.status != RequestStatus::Rejected)
        .filter(|r| r.created_at.year() == year)
        .count();
    debug!(used, limit, year, "withdrawal period usage");

    if used as u64 >= u64::from(limit) {
        return Err(EligibilityError::PeriodLimitExceeded { year, limit });
    }
    Ok(())
}

/// `basis` is the cumulative total for regular savings and the current
/// balance for personal savings. Asking for more than the basis is an
/// insufficient balance; asking for more than the ceiling share of it is a
/// ceiling breach.
pub fn within_amount_ceiling(
    amount: Amount,
    basis: Amount,
    is_personal_savings: bool,
    limits: &LimitSettings,
) -> Result<(), EligibilityError> {
    if amount > basis {
        return Err(EligibilityError::InsufficientBalance {
            requested: amount,
            available: basis,
        });
    }

    let pct = if is_personal_savings {
        limits.personal_withdrawal_ceiling_percent
    } else {
        limits.savings_withdrawal_ceiling_percent
    };
    let ceiling = basis
        .percent(pct)
        .ok_or(EligibilityError::AmountOutOfRange { basis })?;
    if amount > ceiling {
        return Err(EligibilityError::AmountExceedsCeiling {
            requested: amount,
            ceiling,
        });
    }
    Ok(())
}

pub fn has_contribution_history(count: u32, required: u32) -> Result<(), EligibilityError> {
    if count < required {
        return Err(EligibilityError::InsufficientContributions {
            required,
            actual: count,
        });
    }
    Ok(())
}
