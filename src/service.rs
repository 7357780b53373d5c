//! Service layer API for library operations
use crate::catalog::{Book, BookCatalog, BookDetails, BookStatus, Catalog, Category};
use crate::error::{LendingError, LendingResult};
use crate::ledger::{HistoryKey, Ledger, LoanPolicy};
use crate::membership::{
    Member, MemberDetails, MemberDirectory, Membership, MembershipTier, TierLimits,
};
use crate::store::Store;
use crate::transaction::Transaction;
use crate::utils::{Bech32Ids, Clock, IdGenerator, SystemClock};
use std::rc::Rc;

/// One catalog, one membership roster and one ledger over a shared store.
pub struct LibraryService<S> {
    catalog: Catalog<S>,
    membership: Membership<S>,
    ledger: Ledger<S>,
}

impl<S: Store + Clone> LibraryService<S> {
    pub fn new(
        store: S,
        policy: LoanPolicy,
        limits: TierLimits,
        clock: Rc<dyn Clock>,
        ids: Rc<dyn IdGenerator>,
    ) -> LendingResult<Self> {
        let catalog = Catalog::open(store.clone(), ids.clone())?;
        let membership = Membership::open(store.clone(), limits, clock.clone(), ids.clone())?;
        let ledger = Ledger::open(store, policy, clock, ids)?;

        tracing::debug!(
            books = catalog.len(),
            members = membership.len(),
            transactions = ledger.all().len(),
            "library opened"
        );
        Ok(Self {
            catalog,
            membership,
            ledger,
        })
    }

    /// Wall clock, bech32 ids, default loan policy and tier limits.
    pub fn with_defaults(store: S) -> LendingResult<Self> {
        Self::new(
            store,
            LoanPolicy::default(),
            TierLimits::default(),
            Rc::new(SystemClock),
            Rc::new(Bech32Ids),
        )
    }

    pub fn catalog(&self) -> &Catalog<S> {
        &self.catalog
    }

    pub fn membership(&self) -> &Membership<S> {
        &self.membership
    }

    pub fn ledger(&self) -> &Ledger<S> {
        &self.ledger
    }

    // Books

    pub fn add_book(&mut self, details: BookDetails) -> LendingResult<Book> {
        self.catalog.add(details)
    }

    pub fn update_book(&mut self, book: Book) -> LendingResult<Book> {
        self.catalog.update(book)
    }

    pub fn book(&self, id: &str) -> LendingResult<Book> {
        self.catalog.get(id).cloned()
    }

    /// Remove a book that is not out on loan.
    pub fn remove_book(&mut self, id: &str) -> LendingResult<Book> {
        // Verify the book exists and is not out
        self.catalog.get(id)?;
        if self.ledger.open_for_book(id).is_some() {
            return Err(LendingError::BookOnLoan(id.to_string()));
        }
        self.catalog.remove(id)
    }

    /// Mark a book reserved, lost or available by hand. Books on loan only
    /// change status through borrow and return.
    pub fn set_book_status(&mut self, id: &str, status: BookStatus) -> LendingResult<Book> {
        self.catalog.get(id)?;
        if self.ledger.open_for_book(id).is_some() || status == BookStatus::Borrowed {
            return Err(LendingError::BookOnLoan(id.to_string()));
        }
        self.catalog.set_status(id, status)?;
        self.book(id)
    }

    // Members

    pub fn register_member(&mut self, details: MemberDetails) -> LendingResult<Member> {
        self.membership.register(details)
    }

    pub fn update_member(&mut self, member: Member) -> LendingResult<Member> {
        self.membership.update(member)
    }

    pub fn member(&self, id: &str) -> LendingResult<Member> {
        self.membership.get(id).cloned()
    }

    pub fn set_member_active(&mut self, id: &str, active: bool) -> LendingResult<Member> {
        self.membership.set_active(id, active)
    }

    /// Remove a member with no open loans.
    pub fn remove_member(&mut self, id: &str) -> LendingResult<Member> {
        // Verify the member exists and holds nothing
        self.membership.get(id)?;
        let count = self.ledger.active_for_member(id).len();
        if count > 0 {
            return Err(LendingError::MemberHasOpenLoans {
                member_id: id.to_string(),
                count,
            });
        }
        self.membership.remove(id)
    }

    // Loans

    pub fn borrow(&mut self, book_id: &str, member_id: &str) -> LendingResult<Transaction> {
        self.ledger
            .borrow(&mut self.catalog, &self.membership, book_id, member_id)
    }

    pub fn return_book(&mut self, txn_id: &str) -> LendingResult<Transaction> {
        self.ledger.return_book(&mut self.catalog, txn_id)
    }

    pub fn renew(&mut self, txn_id: &str, extra_days: i64) -> LendingResult<Transaction> {
        self.ledger.renew(txn_id, extra_days)
    }

    pub fn sweep_overdue(&mut self) -> LendingResult<usize> {
        self.ledger.sweep_overdue()
    }

    pub fn active_loans(&self, member_id: &str) -> LendingResult<Vec<Transaction>> {
        self.membership.get(member_id)?;
        Ok(self.ledger.active_for_member(member_id))
    }

    pub fn overdue_loans(&self) -> Vec<Transaction> {
        self.ledger.overdue()
    }

    // Reports

    /// Sweep first so statuses reflect today, then list overdue loans.
    pub fn overdue_report(&mut self) -> LendingResult<Vec<Transaction>> {
        self.ledger.sweep_overdue()?;
        Ok(self.ledger.overdue())
    }

    pub fn book_history(&self, book_id: &str) -> LendingResult<Vec<Transaction>> {
        self.catalog.get(book_id)?;
        Ok(self.ledger.history_for(HistoryKey::Book(book_id)))
    }

    pub fn member_history(&self, member_id: &str) -> LendingResult<Vec<Transaction>> {
        self.membership.get(member_id)?;
        Ok(self.ledger.history_for(HistoryKey::Member(member_id)))
    }

    pub fn books_by_category(&self, category: Category) -> Vec<Book> {
        self.catalog.by_category(category)
    }

    pub fn available_books(&self) -> Vec<Book> {
        self.catalog.available()
    }

    pub fn members_by_tier(&self, tier: MembershipTier) -> Vec<Member> {
        self.membership.by_tier(tier)
    }

    /// Fill an empty library with a few books, members and loans.
    /// Returns `false` without touching anything if data already exists.
    pub fn seed_sample_data(&mut self) -> LendingResult<bool> {
        if !self.catalog.is_empty() || !self.membership.is_empty() {
            return Ok(false);
        }

        let samples = [
            (
                "Java Programming",
                "John Smith",
                "978-0-13-376131-3",
                "Pearson",
                2020,
                Category::Textbook,
            ),
            (
                "Introduction to Algorithms",
                "Thomas Cormen",
                "978-0-262-03384-8",
                "MIT Press",
                2009,
                Category::Textbook,
            ),
            (
                "To Kill a Mockingbird",
                "Harper Lee",
                "978-0-446-31078-9",
                "Grand Central",
                1960,
                Category::Fiction,
            ),
            (
                "1984",
                "George Orwell",
                "978-0-451-52493-5",
                "Signet Classics",
                1949,
                Category::Fiction,
            ),
            (
                "The Elements of Style",
                "William Strunk",
                "978-0-205-30902-3",
                "Longman",
                1999,
                Category::Reference,
            ),
        ];
        let mut books = Vec::with_capacity(samples.len());
        for (title, author, isbn, publisher, year, category) in samples {
            let book = self.catalog.add(
                BookDetails::new()
                    .set_title(title)
                    .set_author(author)
                    .set_isbn(isbn)
                    .set_publisher(publisher)
                    .set_year(year)
                    .set_category(category),
            )?;
            books.push(book.id);
        }

        let people = [
            (
                "Alice Johnson",
                "alice@example.com",
                "555-1234",
                "123 Main St",
                MembershipTier::Premium,
            ),
            (
                "Bob Smith",
                "bob@example.com",
                "555-5678",
                "456 Oak Ave",
                MembershipTier::Standard,
            ),
            (
                "Charlie Brown",
                "charlie@example.com",
                "555-9012",
                "789 Pine Rd",
                MembershipTier::Student,
            ),
        ];
        let mut members = Vec::with_capacity(people.len());
        for (name, email, phone, address, tier) in people {
            let member = self.membership.register(
                MemberDetails::new()
                    .set_name(name)
                    .set_email(email)
                    .set_phone(phone)
                    .set_address(address)
                    .set_tier(tier),
            )?;
            members.push(member.id);
        }

        self.borrow(&books[0], &members[0])?;
        self.borrow(&books[2], &members[1])?;

        tracing::info!(
            books = books.len(),
            members = members.len(),
            "sample data seeded"
        );
        Ok(true)
    }
}
