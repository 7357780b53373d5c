//! The lending engine.
//!
//! The ledger owns every [`Transaction`] and decides whether a borrow, return
//! or renewal may happen. It only holds identifiers into the catalog and the
//! membership roster; availability changes go through [`BookCatalog::set_status`].
//!
//! Loan lifecycle:
//!
//! ```text
//! borrow ──> Borrowed ──return on/before due──> Returned
//!               │  ^
//!   sweep/late  │  │ renew
//!               v  │
//!             Overdue ──return──> Overdue (closed, fined)
//! ```
use crate::catalog::{BookCatalog, BookStatus};
use crate::error::{EntityKind, LendingError, LendingResult};
use crate::membership::MemberDirectory;
use crate::store::{Repository, Store};
use crate::transaction::{Transaction, TransactionStatus};
use crate::utils::{Clock, IdGenerator};
use std::rc::Rc;

pub const DEFAULT_LOAN_DAYS: i64 = 14;
/// One currency unit, in minor units.
pub const DEFAULT_FINE_PER_DAY: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoanPolicy {
    pub loan_days: i64,
    pub fine_per_day: u64,
}

impl Default for LoanPolicy {
    fn default() -> Self {
        Self {
            loan_days: DEFAULT_LOAN_DAYS,
            fine_per_day: DEFAULT_FINE_PER_DAY,
        }
    }
}

impl LoanPolicy {
    /// Fine owed for `days_late` days past due. No cap.
    pub fn fine_for(&self, days_late: i64) -> u64 {
        u64::try_from(days_late)
            .unwrap_or(0)
            .saturating_mul(self.fine_per_day)
    }
}

/// Selects whose history to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryKey<'a> {
    Member(&'a str),
    Book(&'a str),
}

pub struct Ledger<S> {
    transactions: Repository<Transaction, S>,
    policy: LoanPolicy,
    clock: Rc<dyn Clock>,
    ids: Rc<dyn IdGenerator>,
}

impl<S: Store> Ledger<S> {
    pub const COLLECTION: &'static str = "transactions";

    pub fn open(
        store: S,
        policy: LoanPolicy,
        clock: Rc<dyn Clock>,
        ids: Rc<dyn IdGenerator>,
    ) -> LendingResult<Self> {
        let transactions = Repository::open(store, Self::COLLECTION)?;
        Ok(Self {
            transactions,
            policy,
            clock,
            ids,
        })
    }

    pub fn policy(&self) -> &LoanPolicy {
        &self.policy
    }

    /// Lend a book to a member.
    ///
    /// The book must be available, the member active and below their tier's
    /// limit of open loans. On success the book is marked borrowed and a new
    /// transaction due `loan_days` from today is recorded.
    pub fn borrow<C, M>(
        &mut self,
        catalog: &mut C,
        members: &M,
        book_id: &str,
        member_id: &str,
    ) -> LendingResult<Transaction>
    where
        C: BookCatalog,
        M: MemberDirectory,
    {
        // Verify the book is on the shelf
        let book = catalog.get(book_id)?;
        if book.status != BookStatus::Available || self.open_for_book(book_id).is_some() {
            return Err(LendingError::BookUnavailable(book_id.to_string()));
        }

        // Verify the member may borrow
        let member = members.get(member_id)?;
        if !member.active {
            return Err(LendingError::MemberInactive(member_id.to_string()));
        }

        let limit = members.borrow_limit(member.tier);
        let open = self.count_open_for_member(member_id);
        if open >= limit as usize {
            return Err(LendingError::BorrowLimitExceeded {
                member_id: member_id.to_string(),
                limit,
            });
        }

        // Create the loan
        let today = self.clock.today();
        let due_on = today
            .plus_days(self.policy.loan_days)
            .ok_or_else(|| LendingError::invalid("due date is out of range"))?;
        let txn = Transaction::new(
            self.ids.next_id(EntityKind::Transaction),
            book_id.to_string(),
            member_id.to_string(),
            today,
            due_on,
        );

        // Mark the book out, then save the loan
        catalog.set_status(book_id, BookStatus::Borrowed)?;
        if let Err(err) = self.transactions.put(txn.id.clone(), txn.clone()) {
            restore_status(catalog, book_id, BookStatus::Available);
            return Err(err.into());
        }

        tracing::info!(
            txn_id = %txn.id,
            book_id,
            member_id,
            due_on = %txn.due_on,
            "book borrowed"
        );
        Ok(txn)
    }

    /// Take a book back.
    ///
    /// A return after the due date is fined per day late and the loan keeps
    /// the `Overdue` status; an on-time return ends `Returned`. Either way the
    /// book becomes available again.
    pub fn return_book<C>(&mut self, catalog: &mut C, txn_id: &str) -> LendingResult<Transaction>
    where
        C: BookCatalog,
    {
        // Load the loan
        let mut txn = self.get(txn_id)?.clone();
        if txn.is_closed() {
            return Err(LendingError::AlreadyReturned(txn_id.to_string()));
        }
        let prior_status = catalog.get(&txn.book_id)?.status;

        // Close it, fining a late return
        let today = self.clock.today();
        txn.returned_on = Some(today);
        if today > txn.due_on {
            let days_late = today.days_since(&txn.due_on);
            txn.fine = self.policy.fine_for(days_late);
            txn.status = TransactionStatus::Overdue;
        } else {
            txn.status = TransactionStatus::Returned;
        }

        // Shelve the book, then save the loan
        catalog.set_status(&txn.book_id, BookStatus::Available)?;
        if let Err(err) = self.transactions.put(txn.id.clone(), txn.clone()) {
            restore_status(catalog, &txn.book_id, prior_status);
            return Err(err.into());
        }

        tracing::info!(
            txn_id,
            book_id = %txn.book_id,
            status = %txn.status,
            fine = txn.fine,
            "book returned"
        );
        Ok(txn)
    }

    /// Push the due date back by `extra_days`.
    ///
    /// An overdue loan goes back to `Borrowed` even if the new due date has
    /// already passed.
    pub fn renew(&mut self, txn_id: &str, extra_days: i64) -> LendingResult<Transaction> {
        if extra_days <= 0 {
            return Err(LendingError::invalid(format!(
                "renewal must add at least one day, got {extra_days}"
            )));
        }

        // Load the loan
        let mut txn = self.get(txn_id)?.clone();
        if txn.is_closed() {
            return Err(LendingError::AlreadyReturned(txn_id.to_string()));
        }

        txn.due_on = txn
            .due_on
            .plus_days(extra_days)
            .ok_or_else(|| LendingError::invalid("due date is out of range"))?;
        if txn.status == TransactionStatus::Overdue {
            txn.status = TransactionStatus::Borrowed;
        }

        // Save back to the store
        self.transactions.put(txn.id.clone(), txn.clone())?;
        tracing::info!(txn_id, extra_days, due_on = %txn.due_on, "loan renewed");
        Ok(txn)
    }

    /// Mark every borrowed loan whose due date has passed as overdue.
    /// Returns how many loans changed; nothing is written when none did.
    pub fn sweep_overdue(&mut self) -> LendingResult<usize> {
        let today = self.clock.today();
        let changed = self.transactions.update_each(|txn| {
            if txn.status == TransactionStatus::Borrowed && txn.is_past_due(&today) {
                txn.status = TransactionStatus::Overdue;
                true
            } else {
                false
            }
        })?;

        if changed > 0 {
            tracing::info!(changed, %today, "overdue sweep updated loans");
        }
        Ok(changed)
    }

    pub fn get(&self, txn_id: &str) -> LendingResult<&Transaction> {
        self.transactions
            .get(txn_id)
            .ok_or_else(|| LendingError::not_found(EntityKind::Transaction, txn_id))
    }

    pub fn all(&self) -> Vec<Transaction> {
        self.filtered(|_| true)
    }

    /// Open loans held by a member.
    pub fn active_for_member(&self, member_id: &str) -> Vec<Transaction> {
        self.filtered(|t| t.member_id == member_id && t.is_open())
    }

    /// Open loans past their due date as of today, whether or not the
    /// sweep has run.
    pub fn overdue(&self) -> Vec<Transaction> {
        let today = self.clock.today();
        self.filtered(|t| t.is_open() && t.is_past_due(&today))
    }

    /// Every loan for the member or book, in any status.
    pub fn history_for(&self, key: HistoryKey<'_>) -> Vec<Transaction> {
        match key {
            HistoryKey::Member(id) => self.filtered(|t| t.member_id == id),
            HistoryKey::Book(id) => self.filtered(|t| t.book_id == id),
        }
    }

    pub fn open_for_book(&self, book_id: &str) -> Option<&Transaction> {
        self.transactions
            .values()
            .find(|t| t.book_id == book_id && t.is_open())
    }

    fn count_open_for_member(&self, member_id: &str) -> usize {
        self.transactions
            .values()
            .filter(|t| t.member_id == member_id && t.is_open())
            .count()
    }

    fn filtered<P>(&self, predicate: P) -> Vec<Transaction>
    where
        P: Fn(&Transaction) -> bool,
    {
        let mut txns: Vec<Transaction> = self
            .transactions
            .values()
            .filter(|t| predicate(*t))
            .cloned()
            .collect();
        txns.sort_by(|a, b| (a.borrowed_on, &a.id).cmp(&(b.borrowed_on, &b.id)));
        txns
    }
}

// Undo a catalog status change after the ledger failed to record the loan.
fn restore_status<C: BookCatalog>(catalog: &mut C, book_id: &str, status: BookStatus) {
    if let Err(err) = catalog.set_status(book_id, status) {
        tracing::warn!(book_id, %status, error = %err, "could not restore book status");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{BookDetails, Catalog, Category};
    use crate::error::StoreError;
    use crate::membership::{MemberDetails, Membership, MembershipTier, TierLimits};
    use crate::store::MemoryStore;
    use crate::utils::{Date, ManualClock, SequentialIds};
    use std::cell::Cell;

    struct Fixture {
        clock: Rc<ManualClock>,
        catalog: Catalog<MemoryStore>,
        members: Membership<MemoryStore>,
        ledger: Ledger<MemoryStore>,
    }

    fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let clock = Rc::new(ManualClock::new(Date::from_ymd(2024, 1, 1).unwrap()));
        let ids: Rc<dyn IdGenerator> = Rc::new(SequentialIds::new());
        Fixture {
            catalog: Catalog::open(store.clone(), ids.clone()).unwrap(),
            members: Membership::open(
                store.clone(),
                TierLimits::default(),
                clock.clone(),
                ids.clone(),
            )
            .unwrap(),
            ledger: Ledger::open(store, LoanPolicy::default(), clock.clone(), ids).unwrap(),
            clock,
        }
    }

    impl Fixture {
        fn book(&mut self, title: &str) -> String {
            self.catalog
                .add(
                    BookDetails::new()
                        .set_title(title)
                        .set_author("Author")
                        .set_isbn(title)
                        .set_year(2000)
                        .set_category(Category::Fiction),
                )
                .unwrap()
                .id
        }

        fn member(&mut self, tier: MembershipTier) -> String {
            self.members
                .register(
                    MemberDetails::new()
                        .set_name("Reader")
                        .set_email("reader@example.com")
                        .set_tier(tier),
                )
                .unwrap()
                .id
        }

        fn borrow(&mut self, book: &str, member: &str) -> LendingResult<Transaction> {
            self.ledger
                .borrow(&mut self.catalog, &self.members, book, member)
        }

        fn give_back(&mut self, txn: &str) -> LendingResult<Transaction> {
            self.ledger.return_book(&mut self.catalog, txn)
        }
    }

    #[test]
    fn borrow_sets_due_date_and_book_status() {
        let mut fx = fixture();
        let book = fx.book("Dune");
        let member = fx.member(MembershipTier::Standard);

        let txn = fx.borrow(&book, &member).unwrap();

        assert_eq!(txn.borrowed_on, Date::from_ymd(2024, 1, 1).unwrap());
        assert_eq!(txn.due_on, Date::from_ymd(2024, 1, 15).unwrap());
        assert_eq!(txn.status, TransactionStatus::Borrowed);
        assert_eq!(txn.fine, 0);
        assert_eq!(fx.catalog.get(&book).unwrap().status, BookStatus::Borrowed);
    }

    #[test]
    fn borrow_unavailable_book_creates_nothing() {
        let mut fx = fixture();
        let book = fx.book("Dune");
        let member = fx.member(MembershipTier::Premium);
        fx.catalog.set_status(&book, BookStatus::Reserved).unwrap();

        let err = fx.borrow(&book, &member).unwrap_err();

        assert!(matches!(err, LendingError::BookUnavailable(_)));
        assert!(fx.ledger.all().is_empty());
    }

    #[test]
    fn borrow_by_inactive_member_fails() {
        let mut fx = fixture();
        let book = fx.book("Dune");
        let member = fx.member(MembershipTier::Standard);
        fx.members.set_active(&member, false).unwrap();

        let err = fx.borrow(&book, &member).unwrap_err();

        assert!(matches!(err, LendingError::MemberInactive(_)));
        assert_eq!(fx.catalog.get(&book).unwrap().status, BookStatus::Available);
    }

    #[test]
    fn borrow_reports_missing_entities() {
        let mut fx = fixture();
        let book = fx.book("Dune");
        let member = fx.member(MembershipTier::Standard);

        assert!(matches!(
            fx.borrow("book_404", &member),
            Err(LendingError::NotFound {
                kind: EntityKind::Book,
                ..
            })
        ));
        assert!(matches!(
            fx.borrow(&book, "member_404"),
            Err(LendingError::NotFound {
                kind: EntityKind::Member,
                ..
            })
        ));
    }

    #[test]
    fn borrow_limit_follows_tier() {
        let mut fx = fixture();
        let member = fx.member(MembershipTier::Standard);
        let books: Vec<String> = ["A", "B", "C"].iter().map(|t| fx.book(t)).collect();

        fx.borrow(&books[0], &member).unwrap();
        assert_eq!(fx.ledger.active_for_member(&member).len(), 1);
        fx.borrow(&books[1], &member).unwrap();
        assert_eq!(fx.ledger.active_for_member(&member).len(), 2);

        let err = fx.borrow(&books[2], &member).unwrap_err();
        assert!(matches!(
            err,
            LendingError::BorrowLimitExceeded { limit: 2, .. }
        ));
        assert_eq!(
            fx.catalog.get(&books[2]).unwrap().status,
            BookStatus::Available
        );
    }

    #[test]
    fn returned_loans_free_up_the_limit() {
        let mut fx = fixture();
        let member = fx.member(MembershipTier::Senior);
        let books: Vec<String> = ["A", "B", "C"].iter().map(|t| fx.book(t)).collect();

        let first = fx.borrow(&books[0], &member).unwrap();
        fx.borrow(&books[1], &member).unwrap();
        fx.clock.advance(30);
        fx.give_back(&first.id).unwrap();

        assert!(fx.borrow(&books[2], &member).is_ok());
    }

    #[test]
    fn return_on_due_date_is_on_time() {
        let mut fx = fixture();
        let book = fx.book("Dune");
        let member = fx.member(MembershipTier::Standard);
        let txn = fx.borrow(&book, &member).unwrap();

        fx.clock.set(txn.due_on);
        let returned = fx.give_back(&txn.id).unwrap();

        assert_eq!(returned.status, TransactionStatus::Returned);
        assert_eq!(returned.fine, 0);
        assert_eq!(returned.returned_on, Some(txn.due_on));
        assert_eq!(fx.catalog.get(&book).unwrap().status, BookStatus::Available);
    }

    #[test]
    fn return_one_day_late_is_fined_one_day() {
        let mut fx = fixture();
        let book = fx.book("Dune");
        let member = fx.member(MembershipTier::Standard);
        let txn = fx.borrow(&book, &member).unwrap();

        fx.clock.set(txn.due_on.plus_days(1).unwrap());
        let returned = fx.give_back(&txn.id).unwrap();

        assert_eq!(returned.status, TransactionStatus::Overdue);
        assert_eq!(returned.fine, DEFAULT_FINE_PER_DAY);
    }

    #[test]
    fn late_return_after_twenty_days() {
        let mut fx = fixture();
        let book = fx.book("Dune");
        let member = fx.member(MembershipTier::Standard);
        let txn = fx.borrow(&book, &member).unwrap();

        fx.clock.advance(20);
        let returned = fx.give_back(&txn.id).unwrap();

        assert_eq!(returned.fine, 6 * DEFAULT_FINE_PER_DAY);
        assert_eq!(returned.status, TransactionStatus::Overdue);
        assert_eq!(fx.catalog.get(&book).unwrap().status, BookStatus::Available);
        assert!(fx.ledger.active_for_member(&member).is_empty());
    }

    #[test]
    fn second_return_fails() {
        let mut fx = fixture();
        let book = fx.book("Dune");
        let member = fx.member(MembershipTier::Standard);
        let on_time = fx.borrow(&book, &member).unwrap();
        fx.give_back(&on_time.id).unwrap();

        let late = fx.borrow(&book, &member).unwrap();
        fx.clock.advance(40);
        fx.give_back(&late.id).unwrap();

        for id in [&on_time.id, &late.id] {
            assert!(matches!(
                fx.give_back(id),
                Err(LendingError::AlreadyReturned(_))
            ));
        }
        assert!(matches!(
            fx.give_back("txn_404"),
            Err(LendingError::NotFound {
                kind: EntityKind::Transaction,
                ..
            })
        ));
    }

    #[test]
    fn renew_extends_and_clears_overdue() {
        let mut fx = fixture();
        let book = fx.book("Dune");
        let member = fx.member(MembershipTier::Standard);
        let txn = fx.borrow(&book, &member).unwrap();

        fx.clock.advance(30);
        assert_eq!(fx.ledger.sweep_overdue().unwrap(), 1);

        // still in the past after renewal, yet back to borrowed
        let renewed = fx.ledger.renew(&txn.id, 3).unwrap();
        assert_eq!(renewed.due_on, txn.due_on.plus_days(3).unwrap());
        assert_eq!(renewed.status, TransactionStatus::Borrowed);
    }

    #[test]
    fn renew_rejects_closed_loans_and_non_positive_days() {
        let mut fx = fixture();
        let book = fx.book("Dune");
        let member = fx.member(MembershipTier::Standard);
        let txn = fx.borrow(&book, &member).unwrap();

        for days in [0, -5] {
            assert!(matches!(
                fx.ledger.renew(&txn.id, days),
                Err(LendingError::InvalidInput(_))
            ));
        }
        assert_eq!(fx.ledger.get(&txn.id).unwrap().due_on, txn.due_on);

        fx.give_back(&txn.id).unwrap();
        assert!(matches!(
            fx.ledger.renew(&txn.id, 7),
            Err(LendingError::AlreadyReturned(_))
        ));
    }

    #[test]
    fn sweep_is_idempotent_and_strict() {
        let mut fx = fixture();
        let member = fx.member(MembershipTier::Premium);
        let a = fx.book("A");
        let b = fx.book("B");
        let first = fx.borrow(&a, &member).unwrap();
        fx.clock.advance(5);
        fx.borrow(&b, &member).unwrap();

        // first loan is due today: not yet overdue
        fx.clock.set(first.due_on);
        assert_eq!(fx.ledger.sweep_overdue().unwrap(), 0);

        fx.clock.advance(1);
        assert_eq!(fx.ledger.sweep_overdue().unwrap(), 1);
        assert_eq!(fx.ledger.sweep_overdue().unwrap(), 0);
        assert_eq!(
            fx.ledger.get(&first.id).unwrap().status,
            TransactionStatus::Overdue
        );
    }

    #[test]
    fn overdue_query_does_not_need_sweep() {
        let mut fx = fixture();
        let book = fx.book("Dune");
        let member = fx.member(MembershipTier::Standard);
        let txn = fx.borrow(&book, &member).unwrap();

        assert!(fx.ledger.overdue().is_empty());
        fx.clock.advance(15);

        let overdue = fx.ledger.overdue();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].status, TransactionStatus::Borrowed);

        fx.give_back(&txn.id).unwrap();
        assert!(fx.ledger.overdue().is_empty());
    }

    #[test]
    fn history_keeps_every_loan() {
        let mut fx = fixture();
        let book = fx.book("Dune");
        let reader = fx.member(MembershipTier::Standard);
        let other = fx.member(MembershipTier::Standard);

        let first = fx.borrow(&book, &reader).unwrap();
        fx.give_back(&first.id).unwrap();
        fx.clock.advance(1);
        let second = fx.borrow(&book, &other).unwrap();

        let by_book: Vec<_> = fx
            .ledger
            .history_for(HistoryKey::Book(&book))
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(by_book, vec![first.id.clone(), second.id.clone()]);
        assert_eq!(fx.ledger.history_for(HistoryKey::Member(&reader)).len(), 1);
        assert_eq!(
            fx.ledger.open_for_book(&book).map(|t| &t.id),
            Some(&second.id)
        );
    }

    #[test]
    fn book_with_open_loan_stays_unavailable_even_if_status_drifts() {
        let mut fx = fixture();
        let book = fx.book("Dune");
        let member = fx.member(MembershipTier::Premium);
        fx.borrow(&book, &member).unwrap();

        fx.catalog.set_status(&book, BookStatus::Available).unwrap();
        assert!(matches!(
            fx.borrow(&book, &member),
            Err(LendingError::BookUnavailable(_))
        ));
    }

    /// Refuses to write the transactions collection while `refuse` is set.
    #[derive(Clone, Default)]
    struct RefusingStore {
        inner: MemoryStore,
        refuse: Rc<Cell<bool>>,
    }

    impl Store for RefusingStore {
        fn load(&self, collection: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.inner.load(collection)
        }
        fn save(&self, collection: &str, blob: &[u8]) -> Result<(), StoreError> {
            if self.refuse.get() && collection == Ledger::<MemoryStore>::COLLECTION {
                return Err(StoreError::Encode {
                    collection: collection.into(),
                    message: "disk full".into(),
                });
            }
            self.inner.save(collection, blob)
        }
    }

    #[test]
    fn failed_ledger_write_rolls_back_book_status() {
        let store = RefusingStore::default();
        let clock = Rc::new(ManualClock::new(Date::from_ymd(2024, 1, 1).unwrap()));
        let ids: Rc<dyn IdGenerator> = Rc::new(SequentialIds::new());
        let mut catalog = Catalog::open(store.clone(), ids.clone()).unwrap();
        let mut members = Membership::open(
            store.clone(),
            TierLimits::default(),
            clock.clone(),
            ids.clone(),
        )
        .unwrap();
        let mut ledger =
            Ledger::open(store.clone(), LoanPolicy::default(), clock.clone(), ids).unwrap();

        let book = catalog
            .add(
                BookDetails::new()
                    .set_title("Dune")
                    .set_author("Herbert")
                    .set_isbn("1")
                    .set_year(1965),
            )
            .unwrap();
        let member = members
            .register(MemberDetails::new().set_name("R").set_email("r@x.org"))
            .unwrap();

        store.refuse.set(true);
        let err = ledger
            .borrow(&mut catalog, &members, &book.id, &member.id)
            .unwrap_err();
        assert!(matches!(err, LendingError::Store(_)));
        assert_eq!(catalog.get(&book.id).unwrap().status, BookStatus::Available);
        assert!(ledger.all().is_empty());

        store.refuse.set(false);
        let txn = ledger
            .borrow(&mut catalog, &members, &book.id, &member.id)
            .unwrap();

        store.refuse.set(true);
        assert!(ledger.return_book(&mut catalog, &txn.id).is_err());
        assert_eq!(catalog.get(&book.id).unwrap().status, BookStatus::Borrowed);
        assert!(ledger.get(&txn.id).unwrap().is_open());
    }

    #[test]
    fn fine_for_ignores_negative_days() {
        let policy = LoanPolicy {
            loan_days: 7,
            fine_per_day: 25,
        };
        assert_eq!(policy.fine_for(-3), 0);
        assert_eq!(policy.fine_for(4), 100);
    }
}
