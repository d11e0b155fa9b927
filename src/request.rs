//! The approval request aggregate: one workflow instance and its ordered steps
use std::fmt;

use chrono::Utc;
use serde::Serialize;

use super::error::TransitionError;
use super::types::{Amount, SubjectRef, TimeStamp};

/// Role required at each level of a loan application, level 1 first.
pub const LOAN_APPROVAL_CHAIN: [&str; 3] = ["LOAN_OFFICER", "CREDIT_COMMITTEE", "TREASURER"];
/// Role required at each level of either withdrawal kind, level 1 first.
pub const WITHDRAWAL_APPROVAL_CHAIN: [&str; 3] = ["FINANCE_OFFICER", "FINANCE_MANAGER", "TREASURER"];

pub const RESET_NOTE: &str = "Reset after rejection";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, minicbor::Encode, minicbor::Decode)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestType {
    #[n(0)]
    LoanApplication,
    #[n(1)]
    SavingsWithdrawal,
    #[n(2)]
    PersonalSavingsWithdrawal,
}

impl RequestType {
    pub fn approval_chain(self) -> &'static [&'static str] {
        match self {
            RequestType::LoanApplication => &LOAN_APPROVAL_CHAIN,
            RequestType::SavingsWithdrawal | RequestType::PersonalSavingsWithdrawal => {
                &WITHDRAWAL_APPROVAL_CHAIN
            }
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestType::LoanApplication => "LOAN_APPLICATION",
            RequestType::SavingsWithdrawal => "SAVINGS_WITHDRAWAL",
            RequestType::PersonalSavingsWithdrawal => "PERSONAL_SAVINGS_WITHDRAWAL",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, minicbor::Encode, minicbor::Decode)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    InReview,
    #[n(2)]
    Approved,
    #[n(3)]
    Rejected,
    #[n(4)]
    Completed,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Rejected | RequestStatus::Completed)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::InReview => "IN_REVIEW",
            RequestStatus::Approved => "APPROVED",
            RequestStatus::Rejected => "REJECTED",
            RequestStatus::Completed => "COMPLETED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, minicbor::Encode, minicbor::Decode)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
}

/// Regular loans block savings withdrawals while outstanding, soft loans don't.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, minicbor::Encode, minicbor::Decode)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanType {
    #[n(0)]
    Regular,
    #[n(1)]
    Soft,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, minicbor::Encode, minicbor::Decode)]
pub struct LoanTerms {
    #[n(0)]
    pub loan_type: LoanType,
    #[n(1)]
    pub tenure_months: u32,
    #[n(2)]
    pub purpose: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, minicbor::Encode, minicbor::Decode)]
pub struct WithdrawalDetails {
    #[n(0)]
    pub reason: String,
}

/// Type specific payload of a request. The variant decides the request type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, minicbor::Encode, minicbor::Decode)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestContent {
    #[n(0)]
    Loan(#[n(0)] LoanTerms),
    #[n(1)]
    SavingsWithdrawal(#[n(0)] WithdrawalDetails),
    #[n(2)]
    PersonalSavingsWithdrawal(#[n(0)] WithdrawalDetails),
}

impl RequestContent {
    pub fn request_type(&self) -> RequestType {
        match self {
            RequestContent::Loan(_) => RequestType::LoanApplication,
            RequestContent::SavingsWithdrawal(_) => RequestType::SavingsWithdrawal,
            RequestContent::PersonalSavingsWithdrawal(_) => RequestType::PersonalSavingsWithdrawal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ApprovalStep {
    #[n(0)]
    pub level: u32,
    #[n(1)]
    pub approver_role: String,
    #[n(2)]
    pub status: StepStatus,
    #[n(3)]
    pub approver: Option<String>,
    #[n(4)]
    pub approved_at: Option<TimeStamp<Utc>>,
    #[n(5)]
    pub notes: Option<String>,
}

impl ApprovalStep {
    fn new(level: u32, approver_role: &str) -> Self {
        Self {
            level,
            approver_role: approver_role.to_string(),
            status: StepStatus::Pending,
            approver: None,
            approved_at: None,
            notes: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ApprovalRequest {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub content: RequestContent,
    #[n(2)]
    pub status: RequestStatus,
    #[n(3)]
    pub next_approval_level: u32,
    // exactly one of the two subject references is populated
    #[n(4)]
    pub savings_ref: Option<String>,
    #[n(5)]
    pub personal_savings_ref: Option<String>,
    #[n(6)]
    pub requested_amount: Amount,
    #[n(7)]
    pub initiator: String,
    #[n(8)]
    pub steps: Vec<ApprovalStep>,
    #[n(9)]
    pub created_at: TimeStamp<Utc>,
    #[n(10)]
    pub completed_at: Option<TimeStamp<Utc>>,
    #[n(11)]
    pub settlement_ref: Option<String>, // digest of the settling transaction
    #[n(12)]
    pub reset_count: u32,
}

impl ApprovalRequest {
    /// A fresh PENDING request at level 1 with its full chain of PENDING steps.
    pub fn new(
        id: String,
        content: RequestContent,
        subject: SubjectRef,
        requested_amount: Amount,
        initiator: String,
        created_at: TimeStamp<Utc>,
    ) -> Self {
        let steps = content
            .request_type()
            .approval_chain()
            .iter()
            .zip(1..)
            .map(|(role, level)| ApprovalStep::new(level, role))
            .collect();

        let (savings_ref, personal_savings_ref) = match subject {
            SubjectRef::Savings(id) => (Some(id), None),
            SubjectRef::PersonalSavings(id) => (None, Some(id)),
        };

        Self {
            id,
            content,
            status: RequestStatus::Pending,
            next_approval_level: 1,
            savings_ref,
            personal_savings_ref,
            requested_amount,
            initiator,
            steps,
            created_at,
            completed_at: None,
            settlement_ref: None,
            reset_count: 0,
        }
    }

    pub fn request_type(&self) -> RequestType {
        self.content.request_type()
    }

    pub fn subject(&self) -> Result<SubjectRef, TransitionError> {
        match (&self.savings_ref, &self.personal_savings_ref) {
            (Some(id), None) => Ok(SubjectRef::Savings(id.clone())),
            (None, Some(id)) => Ok(SubjectRef::PersonalSavings(id.clone())),
            _ => Err(TransitionError::InvalidSubjectConfiguration),
        }
    }

    /// The lowest level step still waiting for a decision.
    pub fn pending_step(&self) -> Option<&ApprovalStep> {
        self.pending_step_index().map(|i| &self.steps[i])
    }

    /// Position of [`Self::pending_step`] within `steps`.
    pub fn pending_step_index(&self) -> Option<usize> {
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, s)| s.status == StepStatus::Pending)
            .min_by_key(|(_, s)| s.level)
            .map(|(i, _)| i)
    }

    pub fn step(&self, level: u32) -> Option<&ApprovalStep> {
        self.steps.iter().find(|s| s.level == level)
    }

    /// Puts a rejected request back at the start of its chain.
    pub(crate) fn reset(&mut self) {
        for step in self.steps.iter_mut() {
            step.status = StepStatus::Pending;
            step.approver = None;
            step.approved_at = None;
            step.notes = Some(RESET_NOTE.to_string());
        }
        self.status = RequestStatus::Pending;
        self.next_approval_level = 1;
        self.completed_at = None;
        self.reset_count += 1;
    }
}
