//! Identifier generation, clocks and calendar dates
use crate::error::EntityKind;
use bech32::Bech32m;
use chrono::{Datelike, Local, NaiveDate, TimeDelta};
use std::cell::Cell;
use std::fmt;
use uuid7::uuid7;

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Mints identifiers for new books, members and transactions.
pub trait IdGenerator {
    fn next_id(&self, kind: EntityKind) -> String;
}

/// Default generator: a uuid7 encoded as bech32m, prefixed by entity kind.
#[derive(Debug, Default, Clone, Copy)]
pub struct Bech32Ids;

impl IdGenerator for Bech32Ids {
    fn next_id(&self, kind: EntityKind) -> String {
        match new_uuid_to_bech32(kind.prefix()) {
            Ok(id) => id,
            Err(err) => {
                tracing::warn!(%kind, error = %err, "bech32 encoding failed, using raw uuid7");
                format!("{}{}", kind.prefix(), uuid7())
            }
        }
    }
}

/// Deterministic generator producing `book_1`, `member_2`, `txn_3`, ...
///
/// The counter is shared across kinds so every id is unique within a run.
#[derive(Debug, Default)]
pub struct SequentialIds {
    next: Cell<u64>,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self, kind: EntityKind) -> String {
        let n = self.next.get() + 1;
        self.next.set(n);
        format!("{}{}", kind.prefix(), n)
    }
}

/// A calendar day. Loans are tracked at day granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Date(NaiveDate);

impl Date {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }
    pub fn to_naive_date(&self) -> NaiveDate {
        self.0
    }
    /// Shifts the date by a signed number of days, `None` if out of range.
    pub fn plus_days(&self, days: i64) -> Option<Self> {
        TimeDelta::try_days(days)
            .and_then(|delta| self.0.checked_add_signed(delta))
            .map(Self)
    }
    /// Whole days from `earlier` to `self`; negative when `self` comes first.
    pub fn days_since(&self, earlier: &Date) -> i64 {
        (self.0 - earlier.0).num_days()
    }
}

impl From<NaiveDate> for Date {
    fn from(value: NaiveDate) -> Self {
        Date(value)
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl<C> minicbor::Encode<C> for Date {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.i32(self.0.num_days_from_ce())?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Date {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let days = d.i32()?;

        NaiveDate::from_num_days_from_ce_opt(days)
            .map(Date)
            .ok_or(minicbor::decode::Error::message(
                "failed to convert day count to a calendar date",
            ))
    }
}

/// Supplies "today" for due dates, fines and the overdue sweep.
pub trait Clock {
    fn today(&self) -> Date;
}

/// Reads the local wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> Date {
        Date(Local::now().date_naive())
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    today: Cell<Date>,
}

impl ManualClock {
    pub fn new(today: Date) -> Self {
        Self {
            today: Cell::new(today),
        }
    }
    pub fn set(&self, today: Date) {
        self.today.set(today);
    }
    /// Moves the clock forward (or back, for negative `days`).
    pub fn advance(&self, days: i64) {
        if let Some(next) = self.today.get().plus_days(days) {
            self.today.set(next);
        }
    }
}

impl Clock for ManualClock {
    fn today(&self) -> Date {
        self.today.get()
    }
}
