use crate::request::{RequestStatus, RequestType};
use crate::types::{Amount, SubjectRef};

/// Reasons a request is refused at creation time. The request is never stored.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EligibilityError {
    #[error("Requested amount must be greater than zero")]
    NonPositiveAmount,
    #[error("{0} does not exist")]
    SubjectNotFound(SubjectRef),
    #[error("{request_type} requests cannot be raised against {subject}")]
    SubjectKindMismatch {
        request_type: RequestType,
        subject: SubjectRef,
    },
    #[error("Active regular loan {loan_id} with {remaining} outstanding blocks withdrawals")]
    ActiveLoanBlocks { loan_id: String, remaining: Amount },
    #[error("Only {limit} withdrawal request(s) allowed per calendar year ({year})")]
    PeriodLimitExceeded { year: i32, limit: u32 },
    #[error("Requested {requested} exceeds the withdrawal ceiling of {ceiling}")]
    AmountExceedsCeiling { requested: Amount, ceiling: Amount },
    #[error("Requested {requested} exceeds the available balance of {available}")]
    InsufficientBalance { requested: Amount, available: Amount },
    #[error("Loan applications need {required} contribution(s), found {actual}")]
    InsufficientContributions { required: u32, actual: u32 },
    #[error("Withdrawal ceiling of {basis} is out of range")]
    AmountOutOfRange { basis: Amount },
}

/// Reasons a decision is refused. The request keeps its last committed state.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Approval request {0} not found")]
    RequestNotFound(String),
    #[error("Request has no pending approval step")]
    NoPendingStep,
    #[error("Request expects level {expected} but the pending step is level {found}")]
    LevelInconsistency { expected: u32, found: u32 },
    #[error("Cannot move from {from} to {to} at level {level}")]
    IllegalTransition {
        from: RequestStatus,
        level: u32,
        to: RequestStatus,
    },
    #[error("Level {level} requires the {required_role} role")]
    Unauthorized { required_role: String, level: u32 },
    #[error("Request must reference exactly one of a savings record or a personal savings plan")]
    InvalidSubjectConfiguration,
    #[error("{0} no longer exists")]
    SubjectMissing(SubjectRef),
    #[error("Requested {requested} exceeds the current balance of {available}")]
    InsufficientBalance { requested: Amount, available: Amount },
}

impl TransitionError {
    /// Errors that only occur through a bug or external tampering with stored state.
    pub fn is_consistency_violation(&self) -> bool {
        matches!(
            self,
            TransitionError::LevelInconsistency { .. } | TransitionError::InvalidSubjectConfiguration
        )
    }
}

/// Refusals of direct ledger operations (contributions, repayments).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Amount must be greater than zero")]
    NonPositiveAmount,
    #[error("{0} not found")]
    EntityNotFound(String),
    #[error("Loan {0} is already settled")]
    LoanSettled(String),
    #[error("Repayment of {amount} exceeds the outstanding {remaining}")]
    OverRepayment { amount: Amount, remaining: Amount },
    #[error("Crediting {amount} to a balance of {balance} is out of range")]
    BalanceOverflow { amount: Amount, balance: Amount },
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Sled(#[from] sled::Error),
    #[error("Failed to encode record: {0}")]
    Encode(String),
    #[error(transparent)]
    Decode(#[from] minicbor::decode::Error),
    #[error("Record {0} already exists")]
    DuplicateRecord(String),
}

impl From<minicbor::encode::Error<std::convert::Infallible>> for StoreError {
    fn from(value: minicbor::encode::Error<std::convert::Infallible>) -> Self {
        StoreError::Encode(value.to_string())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
    #[error(transparent)]
    Eligibility(#[from] EligibilityError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sled::Error> for WorkflowError {
    fn from(value: sled::Error) -> Self {
        WorkflowError::Store(value.into())
    }
}

impl From<minicbor::decode::Error> for WorkflowError {
    fn from(value: minicbor::decode::Error) -> Self {
        WorkflowError::Store(value.into())
    }
}

impl From<minicbor::encode::Error<std::convert::Infallible>> for WorkflowError {
    fn from(value: minicbor::encode::Error<std::convert::Infallible>) -> Self {
        WorkflowError::Store(value.into())
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
