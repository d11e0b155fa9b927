//! sled persistence: one tree per record family, CBOR values, and a single
//! multi-tree transaction as the atomic unit for every mutation.
use sled::Transactional;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};

use super::error::{StoreError, WorkflowError};
use super::ledger::{Loan, PersonalSavingsPlan, SavingsRecord, Transaction};
use super::request::ApprovalRequest;

pub(crate) type TxResult<T> = Result<T, ConflictableTransactionError<WorkflowError>>;

/// Aborts the enclosing transaction with `err`.
pub(crate) fn abort<T>(err: impl Into<WorkflowError>) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(err.into()))
}

fn encode<T: minicbor::Encode<()>>(value: &T) -> TxResult<Vec<u8>> {
    minicbor::to_vec(value).or_else(|e| abort(StoreError::from(e)))
}

fn decode<T>(bytes: &[u8]) -> TxResult<T>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    minicbor::decode(bytes).or_else(|e| abort(StoreError::from(e)))
}

fn request_index_key(subject_id: &str) -> String {
    format!("requests/{subject_id}")
}

fn loan_index_key(member_id: &str) -> String {
    format!("loans/{member_id}")
}

#[derive(Clone)]
pub struct Store {
    requests: sled::Tree,
    indexes: sled::Tree,
    savings: sled::Tree,
    personal_savings: sled::Tree,
    loans: sled::Tree,
    transactions: sled::Tree,
}

/// Transactional view over every tree, handed to closures run by [`Store::atomically`].
pub(crate) struct TxTrees<'a> {
    requests: &'a TransactionalTree,
    indexes: &'a TransactionalTree,
    savings: &'a TransactionalTree,
    personal_savings: &'a TransactionalTree,
    loans: &'a TransactionalTree,
    transactions: &'a TransactionalTree,
}

impl Store {
    pub fn open(db: &sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            requests: db.open_tree("requests")?,
            indexes: db.open_tree("indexes")?,
            savings: db.open_tree("savings")?,
            personal_savings: db.open_tree("personal_savings")?,
            loans: db.open_tree("loans")?,
            transactions: db.open_tree("transactions")?,
        })
    }

    /// Runs `f` as one all-or-nothing unit. sled re-runs `f` when another
    /// writer conflicts, so `f` must not have side effects outside the trees.
    pub(crate) fn atomically<A, F>(&self, f: F) -> Result<A, WorkflowError>
    where
        F: Fn(&TxTrees<'_>) -> TxResult<A>,
    {
        let result = (
            &self.requests,
            &self.indexes,
            &self.savings,
            &self.personal_savings,
            &self.loans,
            &self.transactions,
        )
            .transaction(
                |(requests, indexes, savings, personal_savings, loans, transactions)| {
                    f(&TxTrees {
                        requests,
                        indexes,
                        savings,
                        personal_savings,
                        loans,
                        transactions,
                    })
                },
            );

        match result {
            Ok(value) => Ok(value),
            Err(TransactionError::Abort(err)) => Err(err),
            Err(TransactionError::Storage(err)) => Err(StoreError::from(err).into()),
        }
    }

    pub fn request(&self, id: &str) -> Result<Option<ApprovalRequest>, StoreError> {
        get(&self.requests, id)
    }

    pub fn requests(&self) -> Result<Vec<ApprovalRequest>, StoreError> {
        all(&self.requests)
    }

    pub fn savings_record(&self, id: &str) -> Result<Option<SavingsRecord>, StoreError> {
        get(&self.savings, id)
    }

    pub fn personal_savings_plan(&self, id: &str) -> Result<Option<PersonalSavingsPlan>, StoreError> {
        get(&self.personal_savings, id)
    }

    pub fn loan(&self, id: &str) -> Result<Option<Loan>, StoreError> {
        get(&self.loans, id)
    }

    pub fn loans(&self) -> Result<Vec<Loan>, StoreError> {
        all(&self.loans)
    }

    /// Looks a transaction up by its digest.
    pub fn transaction(&self, digest: &str) -> Result<Option<Transaction>, StoreError> {
        get(&self.transactions, digest)
    }

    pub fn transactions(&self) -> Result<Vec<Transaction>, StoreError> {
        all(&self.transactions)
    }
}

fn get<T>(tree: &sled::Tree, key: &str) -> Result<Option<T>, StoreError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tree.get(key.as_bytes())? {
        Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
        None => Ok(None),
    }
}

fn all<T>(tree: &sled::Tree) -> Result<Vec<T>, StoreError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    tree.iter()
        .values()
        .map(|value| Ok(minicbor::decode(&value?)?))
        .collect()
}

impl TxTrees<'_> {
    fn get<T>(tree: &TransactionalTree, key: &str) -> TxResult<Option<T>>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        match tree.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put<T: minicbor::Encode<()>>(tree: &TransactionalTree, key: &str, value: &T) -> TxResult<()> {
        tree.insert(key.as_bytes(), encode(value)?)?;
        Ok(())
    }

    fn index(&self, key: &str) -> TxResult<Vec<String>> {
        Ok(Self::get(self.indexes, key)?.unwrap_or_default())
    }

    fn push_index(&self, key: &str, id: &str) -> TxResult<()> {
        let mut ids = self.index(key)?;
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
        }
        Self::put(self.indexes, key, &ids)
    }

    pub fn request(&self, id: &str) -> TxResult<Option<ApprovalRequest>> {
        Self::get(self.requests, id)
    }

    /// Inserts or replaces a request and keeps the per-subject index current.
    pub fn save_request(&self, request: &ApprovalRequest) -> TxResult<()> {
        if let Some(subject_id) = request
            .savings_ref
            .as_deref()
            .or(request.personal_savings_ref.as_deref())
        {
            self.push_index(&request_index_key(subject_id), &request.id)?;
        }
        Self::put(self.requests, &request.id, request)
    }

    pub fn requests_for_subject(&self, subject_id: &str) -> TxResult<Vec<ApprovalRequest>> {
        let mut requests = Vec::new();
        for id in self.index(&request_index_key(subject_id))? {
            if let Some(request) = self.request(&id)? {
                requests.push(request);
            }
        }
        Ok(requests)
    }

    pub fn savings_record(&self, id: &str) -> TxResult<Option<SavingsRecord>> {
        Self::get(self.savings, id)
    }

    pub fn save_savings_record(&self, record: &SavingsRecord) -> TxResult<()> {
        Self::put(self.savings, &record.id, record)
    }

    pub fn personal_savings_plan(&self, id: &str) -> TxResult<Option<PersonalSavingsPlan>> {
        Self::get(self.personal_savings, id)
    }

    pub fn save_personal_savings_plan(&self, plan: &PersonalSavingsPlan) -> TxResult<()> {
        Self::put(self.personal_savings, &plan.id, plan)
    }

    pub fn loan(&self, id: &str) -> TxResult<Option<Loan>> {
        Self::get(self.loans, id)
    }

    pub fn save_loan(&self, loan: &Loan) -> TxResult<()> {
        self.push_index(&loan_index_key(&loan.member_id), &loan.id)?;
        Self::put(self.loans, &loan.id, loan)
    }

    pub fn loans_for_member(&self, member_id: &str) -> TxResult<Vec<Loan>> {
        let mut loans = Vec::new();
        for id in self.index(&loan_index_key(member_id))? {
            if let Some(loan) = self.loan(&id)? {
                loans.push(loan);
            }
        }
        Ok(loans)
    }

    /// Writes a transaction under its digest. Records are write-once.
    pub fn insert_transaction(&self, transaction: &Transaction) -> TxResult<String> {
        let (digest, cbor) = transaction.seal().or_else(|e| abort(e))?;
        if self.transactions.get(digest.as_bytes())?.is_some() {
            return abort(StoreError::DuplicateRecord(digest));
        }
        self.transactions.insert(digest.as_bytes(), cbor)?;
        Ok(digest)
    }
}
