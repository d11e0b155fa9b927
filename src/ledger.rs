//! Balance ledger entities and the immutable transaction record
use chrono::Utc;
use serde::Serialize;

use super::error::{LedgerError, StoreError, TransitionError};
use super::request::LoanType;
use super::types::{Amount, EntityKind, EntityRef, TimeStamp};

/// Atomic read/adjust surface shared by every balance holding entity.
///
/// Implementors never go negative: `debit` refuses instead.
pub trait BalanceLedger {
    fn entity_ref(&self) -> EntityRef;
    fn current_balance(&self) -> Amount;
    /// Removes `amount` and returns the balance afterwards.
    fn debit(&mut self, amount: Amount, at: TimeStamp<Utc>) -> Result<Amount, TransitionError>;
    /// Adds `amount` and returns the balance afterwards. Refuses a credit that
    /// would leave the representable range, leaving the entity untouched.
    fn credit(&mut self, amount: Amount, at: TimeStamp<Utc>) -> Result<Amount, LedgerError>;
}

/// A member's regular savings record.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct SavingsRecord {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub member_id: String,
    #[n(2)]
    pub current_balance: Amount,
    // lifetime contributions, the basis for the withdrawal ceiling
    #[n(3)]
    pub cumulative_total: Amount,
    #[n(4)]
    pub contribution_count: u32,
    #[n(5)]
    pub updated_at: TimeStamp<Utc>,
}

impl SavingsRecord {
    pub fn new(id: String, member_id: String, at: TimeStamp<Utc>) -> Self {
        Self {
            id,
            member_id,
            current_balance: Amount::ZERO,
            cumulative_total: Amount::ZERO,
            contribution_count: 0,
            updated_at: at,
        }
    }
}

impl BalanceLedger for SavingsRecord {
    fn entity_ref(&self) -> EntityRef {
        EntityRef::new(EntityKind::Savings, &self.id)
    }
    fn current_balance(&self) -> Amount {
        self.current_balance
    }
    fn debit(&mut self, amount: Amount, at: TimeStamp<Utc>) -> Result<Amount, TransitionError> {
        if self.current_balance < amount {
            return Err(TransitionError::InsufficientBalance {
                requested: amount,
                available: self.current_balance,
            });
        }
        let balance = self.current_balance.checked_sub(amount).ok_or(
            TransitionError::InsufficientBalance {
                requested: amount,
                available: self.current_balance,
            },
        )?;
        self.current_balance = balance;
        // the ceiling basis shrinks with every withdrawal, floored at zero
        self.cumulative_total = self
            .cumulative_total
            .checked_sub(amount)
            .unwrap_or(Amount::ZERO)
            .max(Amount::ZERO);
        self.updated_at = at;

        Ok(self.current_balance)
    }
    fn credit(&mut self, amount: Amount, at: TimeStamp<Utc>) -> Result<Amount, LedgerError> {
        let overflow = LedgerError::BalanceOverflow {
            amount,
            balance: self.current_balance,
        };
        let balance = self.current_balance.checked_add(amount).ok_or(overflow.clone())?;
        let total = self.cumulative_total.checked_add(amount).ok_or(overflow)?;

        self.current_balance = balance;
        self.cumulative_total = total;
        self.contribution_count = self.contribution_count.saturating_add(1);
        self.updated_at = at;

        Ok(self.current_balance)
    }
}

/// A voluntary savings plan, withdrawable up to its full balance.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct PersonalSavingsPlan {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub member_id: String,
    #[n(2)]
    pub name: String,
    #[n(3)]
    pub current_balance: Amount,
    #[n(4)]
    pub updated_at: TimeStamp<Utc>,
}

impl PersonalSavingsPlan {
    pub fn new(id: String, member_id: String, name: String, at: TimeStamp<Utc>) -> Self {
        Self {
            id,
            member_id,
            name,
            current_balance: Amount::ZERO,
            updated_at: at,
        }
    }
}

impl BalanceLedger for PersonalSavingsPlan {
    fn entity_ref(&self) -> EntityRef {
        EntityRef::new(EntityKind::PersonalSavings, &self.id)
    }
    fn current_balance(&self) -> Amount {
        self.current_balance
    }
    fn debit(&mut self, amount: Amount, at: TimeStamp<Utc>) -> Result<Amount, TransitionError> {
        if self.current_balance < amount {
            return Err(TransitionError::InsufficientBalance {
                requested: amount,
                available: self.current_balance,
            });
        }
        self.current_balance = self.current_balance.checked_sub(amount).ok_or(
            TransitionError::InsufficientBalance {
                requested: amount,
                available: self.current_balance,
            },
        )?;
        self.updated_at = at;

        Ok(self.current_balance)
    }
    fn credit(&mut self, amount: Amount, at: TimeStamp<Utc>) -> Result<Amount, LedgerError> {
        self.current_balance = self.current_balance.checked_add(amount).ok_or(
            LedgerError::BalanceOverflow {
                amount,
                balance: self.current_balance,
            },
        )?;
        self.updated_at = at;

        Ok(self.current_balance)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, minicbor::Encode, minicbor::Decode)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanStatus {
    #[n(0)]
    Active,
    #[n(1)]
    Settled,
}

/// A disbursed loan, created when a loan application completes.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Loan {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub member_id: String,
    #[n(2)]
    pub savings_ref: String,
    #[n(3)]
    pub loan_type: LoanType,
    #[n(4)]
    pub tenure_months: u32,
    #[n(5)]
    pub principal: Amount,
    #[n(6)]
    pub remaining_balance: Amount,
    #[n(7)]
    pub status: LoanStatus,
    #[n(8)]
    pub request_ref: String,
    #[n(9)]
    pub disbursed_at: TimeStamp<Utc>,
}

impl Loan {
    pub fn is_active(&self) -> bool {
        self.status == LoanStatus::Active
    }

    /// Whether this loan stops its holder from raising savings withdrawals.
    pub fn blocks_withdrawals(&self) -> bool {
        self.is_active() && self.loan_type == LoanType::Regular && self.remaining_balance.is_positive()
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(EntityKind::Loan, &self.id)
    }

    /// Applies a repayment and returns the outstanding balance afterwards.
    pub fn repay(&mut self, amount: Amount) -> Result<Amount, LedgerError> {
        if !amount.is_positive() {
            return Err(LedgerError::NonPositiveAmount);
        }
        if !self.is_active() {
            return Err(LedgerError::LoanSettled(self.id.clone()));
        }
        if amount > self.remaining_balance {
            return Err(LedgerError::OverRepayment {
                amount,
                remaining: self.remaining_balance,
            });
        }
        self.remaining_balance = self.remaining_balance.checked_sub(amount).ok_or(
            LedgerError::OverRepayment {
                amount,
                remaining: self.remaining_balance,
            },
        )?;
        if !self.remaining_balance.is_positive() {
            self.status = LoanStatus::Settled;
        }

        Ok(self.remaining_balance)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, minicbor::Encode, minicbor::Decode)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    #[n(0)]
    Contribution,
    #[n(1)]
    SavingsWithdrawal,
    #[n(2)]
    PersonalSavingsWithdrawal,
    #[n(3)]
    LoanDisbursement,
    #[n(4)]
    LoanRepayment,
}

// no partial or asynchronous settlement, every record is written completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, minicbor::Encode, minicbor::Decode)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    #[n(0)]
    Completed,
}

/// Write-once ledger record. Stored under the digest of its own encoding.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Transaction {
    #[n(0)]
    pub reference: String,
    #[n(1)]
    pub kind: TransactionKind,
    #[n(2)]
    pub amount: Amount, // negative for debits
    #[n(3)]
    pub balance_after: Amount,
    #[n(4)]
    pub related: EntityRef,
    #[n(5)]
    pub request_ref: Option<String>,
    #[n(6)]
    pub status: TransactionStatus,
    #[n(7)]
    pub recorded_by: String,
    #[n(8)]
    pub created_at: TimeStamp<Utc>,
}

impl Transaction {
    pub fn new(
        reference: String,
        kind: TransactionKind,
        amount: Amount,
        balance_after: Amount,
        related: EntityRef,
        request_ref: Option<String>,
        recorded_by: String,
        created_at: TimeStamp<Utc>,
    ) -> Self {
        Self {
            reference,
            kind,
            amount,
            balance_after,
            related,
            request_ref,
            status: TransactionStatus::Completed,
            recorded_by,
            created_at,
        }
    }

    /// Returns the record's digest and its CBOR encoding.
    pub fn seal(&self) -> Result<(String, Vec<u8>), StoreError> {
        let cbor = minicbor::to_vec(self)?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }
}
