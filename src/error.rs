use std::fmt;

/// The kinds of entity the library keeps, used to say what was missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Book,
    Member,
    Transaction,
}

impl EntityKind {
    /// Human readable prefix used when minting identifiers for this kind.
    pub fn prefix(&self) -> &'static str {
        match self {
            EntityKind::Book => "book_",
            EntityKind::Member => "member_",
            EntityKind::Transaction => "txn_",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Book => write!(f, "Book"),
            EntityKind::Member => write!(f, "Member"),
            EntityKind::Transaction => write!(f, "Transaction"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Storage backend failed: {0}")]
    Backend(#[from] sled::Error),
    #[error("Failed to encode collection '{collection}': {message}")]
    Encode { collection: String, message: String },
    #[error("Failed to decode collection '{collection}': {source}")]
    Decode {
        collection: String,
        #[source]
        source: minicbor::decode::Error,
    },
    #[error("Collection '{0}' does not match its stored digest")]
    Corrupt(String),
}

#[derive(thiserror::Error, Debug)]
pub enum LendingError {
    #[error("{kind} with ID {id} not found")]
    NotFound { kind: EntityKind, id: String },
    #[error("Book {0} is not available for borrowing")]
    BookUnavailable(String),
    #[error("Member {0} is not active")]
    MemberInactive(String),
    #[error("Member {member_id} has reached their borrowing limit of {limit}")]
    BorrowLimitExceeded { member_id: String, limit: u32 },
    #[error("Transaction {0} has already been returned")]
    AlreadyReturned(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Book {0} is on loan and cannot be changed")]
    BookOnLoan(String),
    #[error("Member {member_id} still has {count} open loans")]
    MemberHasOpenLoans { member_id: String, count: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LendingError {
    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        LendingError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        LendingError::InvalidInput(message.into())
    }
}

pub type LendingResult<T> = Result<T, LendingError>;
