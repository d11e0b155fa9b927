//! Shared value types: timestamps, amounts and weak references
use std::fmt;
use std::cmp::Ordering;
use std::ops::Neg;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn from_ymd_hms(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    pub fn year(&self) -> i32 {
        self.0.year()
    }
}

// Utc itself has no ordering, so the derive would not apply
impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// A monetary amount. Signed, so ledger debits can be recorded as negatives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(Decimal);

impl Amount {
    pub const ZERO: Amount = Amount(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Self(value)
    }
    pub fn value(self) -> Decimal {
        self.0
    }
    pub fn is_positive(self) -> bool {
        self.0 > Decimal::ZERO
    }
    /// `pct` percent of this amount, e.g. `percent(80)` is the 80% ceiling.
    /// `None` only when the share itself is out of range.
    pub fn percent(self, pct: u32) -> Option<Amount> {
        let pct = Decimal::from(pct);
        self.0
            .checked_mul(pct)
            .and_then(|v| v.checked_div(Decimal::ONE_HUNDRED))
            .or_else(|| self.0.checked_div(Decimal::ONE_HUNDRED)?.checked_mul(pct))
            .map(Amount)
    }
    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }
    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_sub(rhs.0).map(Amount)
    }
}

impl From<i64> for Amount {
    fn from(value: i64) -> Self {
        Self(Decimal::from(value))
    }
}

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

impl Neg for Amount {
    type Output = Amount;
    fn neg(self) -> Amount {
        Amount(-self.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// decimals are stored as their 16 byte binary form so no precision is lost
impl<C> minicbor::Encode<C> for Amount {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.bytes(&self.0.serialize())?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Amount {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let raw: [u8; 16] = d
            .bytes()?
            .try_into()
            .map_err(|_| minicbor::decode::Error::message("amount must be 16 bytes"))?;

        Ok(Amount(Decimal::deserialize(raw)))
    }
}

/// Weak reference to the ledger entity a request will mutate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, minicbor::Encode, minicbor::Decode)]
#[serde(tag = "kind", content = "id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubjectRef {
    #[n(0)]
    Savings(#[n(0)] String),
    #[n(1)]
    PersonalSavings(#[n(0)] String),
}

impl SubjectRef {
    pub fn id(&self) -> &str {
        match self {
            SubjectRef::Savings(id) | SubjectRef::PersonalSavings(id) => id,
        }
    }
    pub fn entity_ref(&self) -> EntityRef {
        match self {
            SubjectRef::Savings(id) => EntityRef::new(EntityKind::Savings, id),
            SubjectRef::PersonalSavings(id) => EntityRef::new(EntityKind::PersonalSavings, id),
        }
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectRef::Savings(id) => write!(f, "savings:{id}"),
            SubjectRef::PersonalSavings(id) => write!(f, "personal_savings:{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, minicbor::Encode, minicbor::Decode)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    #[n(0)]
    Savings,
    #[n(1)]
    PersonalSavings,
    #[n(2)]
    Loan,
}

/// (kind, id) pair pointing at a ledger entity. Resolved on read, never owned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, minicbor::Encode, minicbor::Decode)]
pub struct EntityRef {
    #[n(0)]
    pub kind: EntityKind,
    #[n(1)]
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: &str) -> Self {
        Self {
            kind,
            id: id.to_string(),
        }
    }
}

/// The acting user as resolved by the surrounding auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentActor {
    pub id: String,
    pub role_name: String,
    pub approval_level: u32,
}

impl CurrentActor {
    pub fn new(id: &str, role_name: &str, approval_level: u32) -> Self {
        Self {
            id: id.to_string(),
            role_name: role_name.to_string(),
            approval_level,
        }
    }
    pub fn holds(&self, role: &str, level: u32) -> bool {
        self.role_name == role && self.approval_level == level
    }
}
