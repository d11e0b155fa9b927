//! Read models handed to the HTTP layer, which serializes them to JSON.
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::ledger::{Transaction, TransactionKind, TransactionStatus};
use super::request::{
    ApprovalRequest, ApprovalStep, RequestContent, RequestStatus, RequestType, StepStatus,
};
use super::types::{EntityRef, SubjectRef};
use super::utils::format_currency;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApprovalStepView {
    pub level: u32,
    pub approver_role: String,
    pub status: StepStatus,
    pub approver: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl From<&ApprovalStep> for ApprovalStepView {
    fn from(step: &ApprovalStep) -> Self {
        Self {
            level: step.level,
            approver_role: step.approver_role.clone(),
            status: step.status,
            approver: step.approver.clone(),
            approved_at: step.approved_at.as_ref().map(|t| t.to_datetime_utc()),
            notes: step.notes.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionView {
    pub digest: String,
    pub reference: String,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub amount_display: String,
    pub balance_after: Decimal,
    pub related: EntityRef,
    pub request_ref: Option<String>,
    pub status: TransactionStatus,
    pub recorded_by: String,
    pub created_at: DateTime<Utc>,
}

impl TransactionView {
    pub fn new(digest: String, txn: &Transaction, currency_symbol: &str) -> Self {
        Self {
            digest,
            reference: txn.reference.clone(),
            kind: txn.kind,
            amount: txn.amount.value(),
            amount_display: format_currency(txn.amount.value(), currency_symbol),
            balance_after: txn.balance_after.value(),
            related: txn.related.clone(),
            request_ref: txn.request_ref.clone(),
            status: txn.status,
            recorded_by: txn.recorded_by.clone(),
            created_at: txn.created_at.to_datetime_utc(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApprovalRequestView {
    pub id: String,
    pub request_type: RequestType,
    pub status: RequestStatus,
    pub next_approval_level: u32,
    /// Role expected to act next, `None` once nothing is pending.
    pub awaiting_role: Option<String>,
    pub subject: Option<SubjectRef>,
    pub content: RequestContent,
    pub requested_amount: Decimal,
    pub requested_amount_display: String,
    pub initiator: String,
    pub steps: Vec<ApprovalStepView>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub reset_count: u32,
    pub settlement: Option<TransactionView>,
}

impl ApprovalRequestView {
    pub fn new(
        request: &ApprovalRequest,
        settlement: Option<TransactionView>,
        currency_symbol: &str,
    ) -> Self {
        let awaiting_role = match request.status {
            RequestStatus::Rejected | RequestStatus::Completed => None,
            _ => request.pending_step().map(|s| s.approver_role.clone()),
        };

        Self {
            id: request.id.clone(),
            request_type: request.request_type(),
            status: request.status,
            next_approval_level: request.next_approval_level,
            awaiting_role,
            subject: request.subject().ok(),
            content: request.content.clone(),
            requested_amount: request.requested_amount.value(),
            requested_amount_display: format_currency(
                request.requested_amount.value(),
                currency_symbol,
            ),
            initiator: request.initiator.clone(),
            steps: request.steps.iter().map(ApprovalStepView::from).collect(),
            created_at: request.created_at.to_datetime_utc(),
            completed_at: request.completed_at.as_ref().map(|t| t.to_datetime_utc()),
            reset_count: request.reset_count,
            settlement,
        }
    }
}

/// Filters for [`crate::service::ApprovalService::list_requests`]. Pages are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestQuery {
    pub request_type: Option<RequestType>,
    pub status: Option<RequestStatus>,
    pub subject_id: Option<String>,
    pub page: u32,
    pub page_size: u32,
}

impl Default for RequestQuery {
    fn default() -> Self {
        Self {
            request_type: None,
            status: None,
            subject_id: None,
            page: 1,
            page_size: 20,
        }
    }
}

impl RequestQuery {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn of_type(mut self, request_type: RequestType) -> Self {
        self.request_type = Some(request_type);
        self
    }
    pub fn with_status(mut self, status: RequestStatus) -> Self {
        self.status = Some(status);
        self
    }
    pub fn for_subject(mut self, subject_id: &str) -> Self {
        self.subject_id = Some(subject_id.to_string());
        self
    }
    pub fn page(mut self, page: u32, page_size: u32) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    pub fn matches(&self, request: &ApprovalRequest) -> bool {
        self.request_type.is_none_or(|t| request.request_type() == t)
            && self.status.is_none_or(|s| request.status == s)
            && self.subject_id.as_deref().is_none_or(|id| {
                request.savings_ref.as_deref() == Some(id)
                    || request.personal_savings_ref.as_deref() == Some(id)
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total_items: u64,
    pub total_pages: u32,
}

impl<T> Page<T> {
    /// Slices `items` to the requested page. Out of range pages are empty.
    pub fn paginate(items: Vec<T>, page: u32, page_size: u32) -> Self {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let total_items = items.len() as u64;
        let total_pages = total_items.div_ceil(u64::from(page_size)) as u32;

        let skip = (page as usize - 1).saturating_mul(page_size as usize);
        let items = items.into_iter().skip(skip).take(page_size as usize).collect();

        Self {
            items,
            page,
            page_size,
            total_items,
            total_pages,
        }
    }
}

/// Inclusive creation-date window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DateRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from <= at && at <= self.to
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub total: u64,
    /// PENDING and IN_REVIEW
    pub pending: u64,
    /// APPROVED and COMPLETED
    pub approved: u64,
    pub rejected: u64,
    pub completed: u64,
    pub completed_amount_sum: Decimal,
}

impl Statistics {
    pub fn tally<'a>(requests: impl IntoIterator<Item = &'a ApprovalRequest>) -> Self {
        requests.into_iter().fold(Self::default(), |mut stats, request| {
            stats.total += 1;
            match request.status {
                RequestStatus::Pending | RequestStatus::InReview => stats.pending += 1,
                RequestStatus::Approved => stats.approved += 1,
                RequestStatus::Completed => {
                    stats.approved += 1;
                    stats.completed += 1;
                    stats.completed_amount_sum = stats
                        .completed_amount_sum
                        .saturating_add(request.requested_amount.value());
                }
                RequestStatus::Rejected => stats.rejected += 1,
            }
            stats
        })
    }
}
