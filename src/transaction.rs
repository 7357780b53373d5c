//! Loan records kept by the ledger
use crate::utils::Date;
use std::fmt;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    #[n(0)]
    Borrowed,
    #[n(1)]
    Returned,
    /// Past due. Also the final status of a loan that came back late.
    #[n(2)]
    Overdue,
    /// Reserved; nothing moves a loan here yet.
    #[n(3)]
    Lost,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransactionStatus::Borrowed => "borrowed",
            TransactionStatus::Returned => "returned",
            TransactionStatus::Overdue => "overdue",
            TransactionStatus::Lost => "lost",
        };
        f.write_str(label)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub book_id: String,
    #[n(2)]
    pub member_id: String,
    #[n(3)]
    pub borrowed_on: Date,
    #[n(4)]
    pub due_on: Date,
    #[n(5)]
    pub returned_on: Option<Date>,
    #[n(6)]
    pub fine: u64, // minor currency units
    #[n(7)]
    pub status: TransactionStatus,
}

impl Transaction {
    pub fn new(
        id: String,
        book_id: String,
        member_id: String,
        borrowed_on: Date,
        due_on: Date,
    ) -> Self {
        Self {
            id,
            book_id,
            member_id,
            borrowed_on,
            due_on,
            returned_on: None,
            fine: 0,
            status: TransactionStatus::Borrowed,
        }
    }

    /// The book is still out: borrowed or overdue, and not yet handed back.
    pub fn is_open(&self) -> bool {
        self.returned_on.is_none()
            && matches!(
                self.status,
                TransactionStatus::Borrowed | TransactionStatus::Overdue
            )
    }

    /// The book has been handed back, on time or late.
    pub fn is_closed(&self) -> bool {
        self.returned_on.is_some() || self.status == TransactionStatus::Returned
    }

    pub fn is_past_due(&self, today: &Date) -> bool {
        self.due_on < *today
    }
}
