//! Service layer API for approval workflow operations
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::config::Settings;
use super::eligibility;
use super::engine::{self, Transition};
use super::error::{EligibilityError, TransitionError, WorkflowResult};
use super::ledger::{Loan, PersonalSavingsPlan, SavingsRecord, Transaction};
use super::notify::{Notifier, TracingNotifier, TransitionEvent};
use super::request::{ApprovalRequest, RequestContent, RequestStatus, RequestType};
use super::settlement;
use super::store::{Store, TxResult, TxTrees, abort};
use super::types::{Amount, CurrentActor, EntityRef, SubjectRef, TimeStamp};
use super::utils::new_uuid_to_bech32;
use super::view::{ApprovalRequestView, DateRange, Page, RequestQuery, Statistics, TransactionView};

pub struct ApprovalService {
    instance: Arc<sled::Db>,
    store: Store,
    settings: Settings,
    notifier: Arc<dyn Notifier>,
}

impl ApprovalService {
    pub fn new(instance: Arc<sled::Db>, settings: Settings) -> WorkflowResult<Self> {
        let store = Store::open(&instance)?;
        Ok(Self {
            instance,
            store,
            settings,
            notifier: Arc::new(TracingNotifier),
        })
    }

    /// Opens the database named in `settings.store.path`.
    pub fn open(settings: Settings) -> WorkflowResult<Self> {
        let db = sled::open(&settings.store.path)?;
        Self::new(Arc::new(db), settings)
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Flushes dirty pages to disk.
    pub fn flush(&self) -> WorkflowResult<()> {
        self.instance.flush()?;
        Ok(())
    }

    // ledger collaborator surface

    pub fn open_savings_account(&self, member_id: &str) -> WorkflowResult<SavingsRecord> {
        let record = SavingsRecord::new(
            new_uuid_to_bech32("sav_")?,
            member_id.to_string(),
            TimeStamp::new(),
        );
        self.store.atomically(|tx| tx.save_savings_record(&record))?;
        info!(savings_id = %record.id, member_id, "savings account opened");

        Ok(record)
    }

    pub fn open_personal_savings_plan(
        &self,
        member_id: &str,
        name: &str,
    ) -> WorkflowResult<PersonalSavingsPlan> {
        let plan = PersonalSavingsPlan::new(
            new_uuid_to_bech32("psv_")?,
            member_id.to_string(),
            name.to_string(),
            TimeStamp::new(),
        );
        self.store.atomically(|tx| tx.save_personal_savings_plan(&plan))?;
        info!(plan_id = %plan.id, member_id, "personal savings plan opened");

        Ok(plan)
    }

    pub fn record_contribution(
        &self,
        subject: &SubjectRef,
        amount: Amount,
        recorded_by: &str,
    ) -> WorkflowResult<Transaction> {
        let now = TimeStamp::new();
        let txn = self
            .store
            .atomically(|tx| settlement::contribute(tx, subject, amount, recorded_by, &now))?;
        info!(subject = %subject, amount = %amount, balance_after = %txn.balance_after, "contribution recorded");

        Ok(txn)
    }

    pub fn repay_loan(
        &self,
        loan_id: &str,
        amount: Amount,
        recorded_by: &str,
    ) -> WorkflowResult<Transaction> {
        let now = TimeStamp::new();
        let txn = self
            .store
            .atomically(|tx| settlement::repay(tx, loan_id, amount, recorded_by, &now))?;
        info!(loan_id, amount = %amount, remaining = %txn.balance_after, "loan repayment recorded");

        Ok(txn)
    }

    pub fn savings_record(&self, id: &str) -> WorkflowResult<Option<SavingsRecord>> {
        Ok(self.store.savings_record(id)?)
    }

    pub fn personal_savings_plan(&self, id: &str) -> WorkflowResult<Option<PersonalSavingsPlan>> {
        Ok(self.store.personal_savings_plan(id)?)
    }

    pub fn loan(&self, id: &str) -> WorkflowResult<Option<Loan>> {
        Ok(self.store.loan(id)?)
    }

    /// The member's loan that currently blocks withdrawals, if any; otherwise
    /// any other active loan.
    pub fn find_active_loan(&self, member_id: &str) -> WorkflowResult<Option<Loan>> {
        let loans: Vec<Loan> = self
            .store
            .loans()?
            .into_iter()
            .filter(|loan| loan.member_id == member_id)
            .collect();
        Ok(pick_active_loan(loans))
    }

    pub fn contribution_count(&self, savings_id: &str) -> WorkflowResult<u32> {
        Ok(self
            .store
            .savings_record(savings_id)?
            .map(|record| record.contribution_count)
            .unwrap_or_default())
    }

    /// Every transaction touching `entity`, oldest first.
    pub fn transactions_for(&self, entity: &EntityRef) -> WorkflowResult<Vec<Transaction>> {
        let mut txns: Vec<Transaction> = self
            .store
            .transactions()?
            .into_iter()
            .filter(|txn| &txn.related == entity)
            .collect();
        txns.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(txns)
    }

    /// Transactions settled on behalf of a request. At most one by construction.
    pub fn transactions_for_request(&self, request_id: &str) -> WorkflowResult<Vec<Transaction>> {
        Ok(self
            .store
            .transactions()?
            .into_iter()
            .filter(|txn| txn.request_ref.as_deref() == Some(request_id))
            .collect())
    }

    // workflow

    /// Creates a PENDING request at level 1 once every eligibility check passes.
    pub fn create_request(
        &self,
        content: RequestContent,
        subject: SubjectRef,
        amount: Amount,
        initiator: &str,
    ) -> WorkflowResult<ApprovalRequest> {
        eligibility::positive_amount(amount)?;

        let id = new_uuid_to_bech32("req_")?;
        let now = TimeStamp::new();

        let request = self.store.atomically(|tx| {
            self.check_eligibility(tx, &content, &subject, amount, &now)?;

            let request = ApprovalRequest::new(
                id.clone(),
                content.clone(),
                subject.clone(),
                amount,
                initiator.to_string(),
                now.clone(),
            );
            tx.save_request(&request)?;
            Ok(request)
        })?;

        info!(
            request_id = %request.id,
            request_type = %request.request_type(),
            subject = %subject,
            amount = %amount,
            initiator,
            "approval request created"
        );
        Ok(request)
    }

    fn check_eligibility(
        &self,
        tx: &TxTrees<'_>,
        content: &RequestContent,
        subject: &SubjectRef,
        amount: Amount,
        now: &TimeStamp<Utc>,
    ) -> TxResult<()> {
        let limits = &self.settings.limits;
        let request_type = content.request_type();

        let check = match (request_type, subject) {
            (RequestType::LoanApplication, SubjectRef::Savings(id)) => {
                let Some(record) = tx.savings_record(id)? else {
                    return abort(EligibilityError::SubjectNotFound(subject.clone()));
                };
                eligibility::has_contribution_history(
                    record.contribution_count,
                    limits.loan_min_contributions,
                )
            }
            (RequestType::SavingsWithdrawal, SubjectRef::Savings(id)) => {
                let Some(record) = tx.savings_record(id)? else {
                    return abort(EligibilityError::SubjectNotFound(subject.clone()));
                };
                let active_loan = pick_active_loan(tx.loans_for_member(&record.member_id)?);
                let existing = tx.requests_for_subject(id)?;

                eligibility::has_no_blocking_active_loan(active_loan.as_ref())
                    .and_then(|_| {
                        eligibility::within_period_limit(
                            request_type,
                            &existing,
                            now.year(),
                            limits.savings_withdrawals_per_year,
                        )
                    })
                    .and_then(|_| {
                        eligibility::within_amount_ceiling(
                            amount,
                            record.cumulative_total,
                            false,
                            limits,
                        )
                    })
            }
            (RequestType::PersonalSavingsWithdrawal, SubjectRef::PersonalSavings(id)) => {
                let Some(plan) = tx.personal_savings_plan(id)? else {
                    return abort(EligibilityError::SubjectNotFound(subject.clone()));
                };
                eligibility::within_amount_ceiling(amount, plan.current_balance, true, limits)
            }
            _ => Err(EligibilityError::SubjectKindMismatch {
                request_type,
                subject: subject.clone(),
            }),
        };

        debug!(request_type = %request_type, subject = %subject, eligible = check.is_ok(), "eligibility evaluated");
        check.or_else(|e| abort(e))
    }

    /// Applies one approval decision. Reset, transition and any ledger
    /// effect commit together or not at all.
    pub fn apply_decision(
        &self,
        request_id: &str,
        decision: RequestStatus,
        actor: &CurrentActor,
        notes: Option<String>,
    ) -> WorkflowResult<ApprovalRequest> {
        let now = TimeStamp::new();

        let result = self.store.atomically(|tx| {
            let Some(request) = tx.request(request_id)? else {
                return abort(TransitionError::RequestNotFound(request_id.to_string()));
            };

            let prepared = engine::prepare(&request, decision).or_else(|e| abort(e))?;
            let step = prepared.step();
            if !actor.holds(&step.approver_role, step.level) {
                return abort(TransitionError::Unauthorized {
                    required_role: step.approver_role.clone(),
                    level: step.level,
                });
            }
            if prepared.transition().reset {
                self.check_revival(tx, &request)?;
            }

            let (mut updated, transition) = prepared.commit(&actor.id, notes.clone(), now.clone());
            if transition.to == RequestStatus::Completed {
                settlement::complete(tx, &mut updated, &actor.id, &now)?;
            }
            tx.save_request(&updated)?;

            Ok((updated, transition))
        });

        let (request, transition) = result.inspect_err(|err| {
            debug!(request_id, decision = %decision, error = %err, "decision refused")
        })?;

        info!(
            request_id,
            level = transition.level,
            from = %transition.from,
            to = %transition.to,
            reset = transition.reset,
            actor = %actor.id,
            "decision applied"
        );
        self.publish(&request, &transition, actor, &now);

        Ok(request)
    }

    /// A rejected request doesn't count against the yearly withdrawal limit,
    /// so reviving one is held to the same limit as creating a new one.
    fn check_revival(&self, tx: &TxTrees<'_>, request: &ApprovalRequest) -> TxResult<()> {
        let request_type = request.request_type();
        let Some(subject_id) = request.savings_ref.as_deref() else {
            return Ok(());
        };

        let others: Vec<ApprovalRequest> = tx
            .requests_for_subject(subject_id)?
            .into_iter()
            .filter(|other| other.id != request.id)
            .collect();
        eligibility::within_period_limit(
            request_type,
            &others,
            request.created_at.year(),
            self.settings.limits.savings_withdrawals_per_year,
        )
        .or_else(|e| abort(e))
    }

    fn publish(
        &self,
        request: &ApprovalRequest,
        transition: &Transition,
        actor: &CurrentActor,
        at: &TimeStamp<Utc>,
    ) {
        let event = TransitionEvent {
            request_id: request.id.clone(),
            request_type: request.request_type(),
            initiator: request.initiator.clone(),
            actor: actor.id.clone(),
            level: transition.level,
            from: transition.from,
            to: transition.to,
            reset: transition.reset,
            at: at.to_datetime_utc(),
        };
        if let Err(err) = self.notifier.notify(&event) {
            warn!(request_id = %request.id, error = %err, "notification failed");
        }
    }

    // read models

    pub fn get_request(&self, request_id: &str) -> WorkflowResult<ApprovalRequestView> {
        let request = self
            .store
            .request(request_id)?
            .ok_or_else(|| TransitionError::RequestNotFound(request_id.to_string()))?;
        self.view(&request)
    }

    fn view(&self, request: &ApprovalRequest) -> WorkflowResult<ApprovalRequestView> {
        let symbol = &self.settings.display.currency_symbol;
        let settlement = match &request.settlement_ref {
            Some(digest) => self
                .store
                .transaction(digest)?
                .map(|txn| TransactionView::new(digest.clone(), &txn, symbol)),
            None => None,
        };

        Ok(ApprovalRequestView::new(request, settlement, symbol))
    }

    /// Newest first.
    pub fn list_requests(&self, query: &RequestQuery) -> WorkflowResult<Page<ApprovalRequestView>> {
        let mut requests: Vec<ApprovalRequest> = self
            .store
            .requests()?
            .into_iter()
            .filter(|request| query.matches(request))
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

        let page_size = query.page_size.clamp(1, self.settings.limits.max_page_size.max(1));
        let page = Page::paginate(requests, query.page, page_size);
        let items = page
            .items
            .iter()
            .map(|request| self.view(request))
            .collect::<WorkflowResult<Vec<_>>>()?;

        Ok(Page {
            items,
            page: page.page,
            page_size: page.page_size,
            total_items: page.total_items,
            total_pages: page.total_pages,
        })
    }

    pub fn statistics(
        &self,
        range: &DateRange,
        subject_id: Option<&str>,
    ) -> WorkflowResult<Statistics> {
        let requests: Vec<ApprovalRequest> = self
            .store
            .requests()?
            .into_iter()
            .filter(|request| range.contains(request.created_at.to_datetime_utc()))
            .filter(|request| {
                subject_id.is_none_or(|id| {
                    request.savings_ref.as_deref() == Some(id)
                        || request.personal_savings_ref.as_deref() == Some(id)
                })
            })
            .collect();

        Ok(Statistics::tally(&requests))
    }
}

// blocking loans take precedence so the eligibility check sees them
fn pick_active_loan(loans: Vec<Loan>) -> Option<Loan> {
    let mut active: Vec<Loan> = loans.into_iter().filter(Loan::is_active).collect();
    active.sort_by_key(|loan| !loan.blocks_withdrawals());
    active.into_iter().next()
}
