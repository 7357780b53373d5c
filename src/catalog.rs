//! Books and their availability
use crate::error::{EntityKind, LendingError, LendingResult};
use crate::store::{Repository, Store};
use crate::utils::IdGenerator;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BookStatus {
    #[n(0)]
    Available,
    #[n(1)]
    Borrowed,
    #[n(2)]
    Reserved,
    #[n(3)]
    Lost,
}

#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub enum Category {
    #[n(0)]
    Fiction,
    #[n(1)]
    NonFiction,
    #[n(2)]
    Reference,
    #[n(3)]
    Textbook,
    #[n(4)]
    Children,
    #[n(5)]
    Science,
    #[n(6)]
    History,
    #[n(7)]
    Biography,
    #[n(8)]
    SelfHelp,
    #[n(9)]
    Other,
}

impl Category {
    pub const ALL: [Category; 10] = [
        Category::Fiction,
        Category::NonFiction,
        Category::Reference,
        Category::Textbook,
        Category::Children,
        Category::Science,
        Category::History,
        Category::Biography,
        Category::SelfHelp,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Fiction => "fiction",
            Category::NonFiction => "non-fiction",
            Category::Reference => "reference",
            Category::Textbook => "textbook",
            Category::Children => "children",
            Category::Science => "science",
            Category::History => "history",
            Category::Biography => "biography",
            Category::SelfHelp => "self-help",
            Category::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = LendingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| LendingError::invalid(format!("unknown category '{s}'")))
    }
}

impl fmt::Display for BookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BookStatus::Available => "available",
            BookStatus::Borrowed => "borrowed",
            BookStatus::Reserved => "reserved",
            BookStatus::Lost => "lost",
        };
        f.write_str(label)
    }
}

impl FromStr for BookStatus {
    type Err = LendingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "available" => Ok(BookStatus::Available),
            "borrowed" => Ok(BookStatus::Borrowed),
            "reserved" => Ok(BookStatus::Reserved),
            "lost" => Ok(BookStatus::Lost),
            _ => Err(LendingError::invalid(format!("unknown book status '{s}'"))),
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Book {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub title: String,
    #[n(2)]
    pub author: String,
    #[n(3)]
    pub isbn: String,
    #[n(4)]
    pub publisher: String,
    #[n(5)]
    pub year: i32,
    #[n(6)]
    pub category: Category,
    #[n(7)]
    pub status: BookStatus,
}

/// Draft of a book before it is catalogued. Built up with the `set_*` calls.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BookDetails {
    title: Option<String>,
    author: Option<String>,
    isbn: Option<String>,
    publisher: Option<String>,
    year: Option<i32>,
    category: Option<Category>,
}

impl BookDetails {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }
    pub fn set_author(mut self, author: &str) -> Self {
        self.author = Some(author.to_string());
        self
    }
    pub fn set_isbn(mut self, isbn: &str) -> Self {
        self.isbn = Some(isbn.to_string());
        self
    }
    pub fn set_publisher(mut self, publisher: &str) -> Self {
        self.publisher = Some(publisher.to_string());
        self
    }
    pub fn set_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }
    pub fn set_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    // Checks required fields and produces an available book under `id`.
    fn finalise(self, id: String) -> LendingResult<Book> {
        let title = required("title", self.title)?;
        let author = required("author", self.author)?;
        let isbn = required("ISBN", self.isbn)?;
        let year = self
            .year
            .ok_or_else(|| LendingError::invalid("publication year is not set"))?;

        Ok(Book {
            id,
            title,
            author,
            isbn,
            publisher: self.publisher.unwrap_or_default(),
            year,
            category: self.category.unwrap_or(Category::Other),
            status: BookStatus::Available,
        })
    }
}

fn required(field: &str, value: Option<String>) -> LendingResult<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(LendingError::invalid(format!("{field} must not be empty"))),
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// What the lending engine needs from the catalog.
pub trait BookCatalog {
    fn get(&self, id: &str) -> LendingResult<&Book>;
    /// Sets availability. The caller decides the target status.
    fn set_status(&mut self, id: &str, status: BookStatus) -> LendingResult<()>;
}

pub struct Catalog<S> {
    books: Repository<Book, S>,
    ids: Rc<dyn IdGenerator>,
}

impl<S: Store> Catalog<S> {
    pub const COLLECTION: &'static str = "books";

    pub fn open(store: S, ids: Rc<dyn IdGenerator>) -> LendingResult<Self> {
        let books = Repository::open(store, Self::COLLECTION)?;
        Ok(Self { books, ids })
    }

    /// Catalogue a new book. It starts out available.
    pub fn add(&mut self, details: BookDetails) -> LendingResult<Book> {
        let book = details.finalise(self.ids.next_id(EntityKind::Book))?;
        self.books.put(book.id.clone(), book.clone())?;
        tracing::info!(book_id = %book.id, title = %book.title, "book added");
        Ok(book)
    }

    /// Replace a book's descriptive fields. Its status is kept as stored.
    pub fn update(&mut self, book: Book) -> LendingResult<Book> {
        // status is owned by the lending engine, keep what is stored
        let status = self
            .books
            .get(&book.id)
            .ok_or_else(|| LendingError::not_found(EntityKind::Book, &book.id))?
            .status;

        // same checks as a new book
        let updated = Book {
            title: required("title", Some(book.title))?,
            author: required("author", Some(book.author))?,
            isbn: required("ISBN", Some(book.isbn))?,
            status,
            ..book
        };
        self.books.put(updated.id.clone(), updated.clone())?;
        tracing::info!(book_id = %updated.id, "book updated");
        Ok(updated)
    }

    pub fn remove(&mut self, id: &str) -> LendingResult<Book> {
        let removed = self
            .books
            .remove(id)?
            .ok_or_else(|| LendingError::not_found(EntityKind::Book, id))?;
        tracing::info!(book_id = %id, "book removed");
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    /// Every book, ordered by title.
    pub fn all(&self) -> Vec<Book> {
        self.filtered(|_| true)
    }

    pub fn search_title(&self, query: &str) -> Vec<Book> {
        self.filtered(|b| contains_ignore_case(&b.title, query))
    }

    pub fn search_author(&self, query: &str) -> Vec<Book> {
        self.filtered(|b| contains_ignore_case(&b.author, query))
    }

    pub fn search_isbn(&self, isbn: &str) -> Vec<Book> {
        self.filtered(|b| b.isbn == isbn)
    }

    pub fn available(&self) -> Vec<Book> {
        self.filtered(|b| b.status == BookStatus::Available)
    }

    pub fn by_category(&self, category: Category) -> Vec<Book> {
        self.filtered(|b| b.category == category)
    }

    fn filtered<P>(&self, predicate: P) -> Vec<Book>
    where
        P: Fn(&Book) -> bool,
    {
        let mut books: Vec<Book> = self
            .books
            .values()
            .filter(|b| predicate(*b))
            .cloned()
            .collect();
        books.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.id.cmp(&b.id)));
        books
    }
}

impl<S: Store> BookCatalog for Catalog<S> {
    fn get(&self, id: &str) -> LendingResult<&Book> {
        self.books
            .get(id)
            .ok_or_else(|| LendingError::not_found(EntityKind::Book, id))
    }

    fn set_status(&mut self, id: &str, status: BookStatus) -> LendingResult<()> {
        let mut book = self.get(id)?.clone();
        let previous = book.status;
        book.status = status;
        self.books.put(book.id.clone(), book)?;
        tracing::debug!(book_id = %id, from = %previous, to = %status, "book status changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::utils::SequentialIds;

    fn catalog() -> Catalog<MemoryStore> {
        Catalog::open(MemoryStore::new(), Rc::new(SequentialIds::new())).unwrap()
    }

    fn details(title: &str, author: &str, isbn: &str) -> BookDetails {
        BookDetails::new()
            .set_title(title)
            .set_author(author)
            .set_isbn(isbn)
            .set_publisher("Pearson")
            .set_year(2020)
            .set_category(Category::Textbook)
    }

    #[test]
    fn add_assigns_id_and_available_status() {
        let mut catalog = catalog();
        let book = catalog
            .add(details("Rust in Action", "McNamara", "111"))
            .unwrap();

        assert_eq!(book.id, "book_1");
        assert_eq!(book.status, BookStatus::Available);
        assert_eq!(catalog.get("book_1").unwrap(), &book);
    }

    #[test]
    fn add_rejects_missing_fields() {
        let mut catalog = catalog();
        let missing_title = BookDetails::new().set_author("A").set_isbn("1").set_year(1);
        let blank_isbn = details("T", "A", "   ");
        let no_year = BookDetails::new()
            .set_title("T")
            .set_author("A")
            .set_isbn("1");

        for draft in [missing_title, blank_isbn, no_year] {
            let err = catalog.add(draft).unwrap_err();
            assert!(matches!(err, LendingError::InvalidInput(_)));
        }
        assert!(catalog.is_empty());
    }

    #[test]
    fn update_rejects_blank_fields() {
        let mut catalog = catalog();
        let book = catalog
            .add(details("Dune", "Frank Herbert", "isbn-1"))
            .unwrap();

        let blank_title = Book {
            title: "   ".into(),
            ..book.clone()
        };
        let blank_isbn = Book {
            isbn: String::new(),
            ..book.clone()
        };
        for edit in [blank_title, blank_isbn] {
            let err = catalog.update(edit).unwrap_err();
            assert!(matches!(err, LendingError::InvalidInput(_)));
        }
        assert_eq!(BookCatalog::get(&catalog, &book.id).unwrap(), &book);
    }

    #[test]
    fn update_keeps_stored_status() {
        let mut catalog = catalog();
        let book = catalog.add(details("Old", "A", "1")).unwrap();
        catalog.set_status(&book.id, BookStatus::Borrowed).unwrap();

        let edited = Book {
            title: "New".into(),
            status: BookStatus::Available,
            ..book
        };
        let updated = catalog.update(edited).unwrap();

        assert_eq!(updated.title, "New");
        assert_eq!(updated.status, BookStatus::Borrowed);
    }

    #[test]
    fn missing_book_is_not_found() {
        let mut catalog = catalog();
        assert!(matches!(
            catalog.get("book_9"),
            Err(LendingError::NotFound {
                kind: EntityKind::Book,
                ..
            })
        ));
        assert!(catalog.set_status("book_9", BookStatus::Lost).is_err());
        assert!(catalog.remove("book_9").is_err());
    }

    #[test]
    fn searches_are_case_insensitive_except_isbn() {
        let mut catalog = catalog();
        catalog
            .add(details("Introduction to Algorithms", "Thomas Cormen", "978-0-262"))
            .unwrap();
        catalog
            .add(details("Java Programming", "John Smith", "978-0-13"))
            .unwrap();

        assert_eq!(catalog.search_title("ALGO").len(), 1);
        assert_eq!(catalog.search_author("smith").len(), 1);
        assert_eq!(catalog.search_isbn("978-0-13").len(), 1);
        assert!(catalog.search_isbn("978-0").is_empty());
    }

    #[test]
    fn available_and_category_filters() {
        let mut catalog = catalog();
        let a = catalog.add(details("A", "X", "1")).unwrap();
        catalog
            .add(details("B", "Y", "2").set_category(Category::Fiction))
            .unwrap();
        catalog.set_status(&a.id, BookStatus::Borrowed).unwrap();

        let available: Vec<_> = catalog.available().into_iter().map(|b| b.title).collect();
        assert_eq!(available, vec!["B".to_string()]);
        assert_eq!(catalog.by_category(Category::Fiction).len(), 1);
        assert_eq!(catalog.by_category(Category::Textbook).len(), 1);
        assert!(catalog.by_category(Category::History).is_empty());
    }

    #[test]
    fn category_parses_from_cli_spellings() {
        assert_eq!("SELF_HELP".parse::<Category>().unwrap(), Category::SelfHelp);
        assert_eq!(
            "non-fiction".parse::<Category>().unwrap(),
            Category::NonFiction
        );
        assert!("poetry".parse::<Category>().is_err());
    }

    #[test]
    fn book_status_parses_case_insensitively() {
        assert_eq!("Lost".parse::<BookStatus>().unwrap(), BookStatus::Lost);
        assert!("missing".parse::<BookStatus>().is_err());
    }
}
