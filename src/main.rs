use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use library_lending::catalog::{Book, BookDetails, BookStatus, Category};
use library_lending::config::LibraryConfig;
use library_lending::membership::{Member, MemberDetails, MembershipTier};
use library_lending::service::LibraryService;
use library_lending::store::SledStore;
use library_lending::transaction::Transaction;
use library_lending::utils::{Bech32Ids, SystemClock};
use std::path::PathBuf;
use std::rc::Rc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Library catalog, membership roster and lending ledger.
#[derive(Debug, Parser)]
#[command(name = "library", version, about)]
struct Cli {
    /// Directory holding the sled database. Overrides `data_dir` from config.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Configuration file. Defaults to `library.toml` if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manage the book catalog
    #[command(subcommand)]
    Book(BookCommand),
    /// Manage members
    #[command(subcommand)]
    Member(MemberCommand),
    /// Borrow, return and renew
    #[command(subcommand)]
    Loan(LoanCommand),
    /// Load sample books, members and loans into an empty library
    Seed,
}

#[derive(Debug, Subcommand)]
enum BookCommand {
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        author: String,
        #[arg(long)]
        isbn: String,
        #[arg(long, default_value = "")]
        publisher: String,
        #[arg(long)]
        year: i32,
        #[arg(long, default_value = "other")]
        category: Category,
    },
    List {
        /// Only books that can be borrowed now
        #[arg(long)]
        available: bool,
        #[arg(long, conflicts_with = "available")]
        category: Option<Category>,
    },
    Search(BookQuery),
    /// Change the fields given, keep the rest
    Update {
        id: String,
        #[command(flatten)]
        changes: BookChanges,
    },
    /// Set a book's status by hand (available, reserved, lost)
    Status {
        id: String,
        status: BookStatus,
    },
    Remove { id: String },
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
struct BookQuery {
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    author: Option<String>,
    #[arg(long)]
    isbn: Option<String>,
}

#[derive(Debug, Args)]
struct BookChanges {
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    author: Option<String>,
    #[arg(long)]
    isbn: Option<String>,
    #[arg(long)]
    publisher: Option<String>,
    #[arg(long)]
    year: Option<i32>,
    #[arg(long)]
    category: Option<Category>,
}

#[derive(Debug, Subcommand)]
enum MemberCommand {
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "")]
        phone: String,
        #[arg(long, default_value = "")]
        address: String,
        #[arg(long, default_value = "standard")]
        tier: MembershipTier,
    },
    List {
        #[arg(long)]
        tier: Option<MembershipTier>,
    },
    Search(MemberQuery),
    /// Change the fields given, keep the rest
    Update {
        id: String,
        #[command(flatten)]
        changes: MemberChanges,
    },
    Activate { id: String },
    Deactivate { id: String },
    Remove { id: String },
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
struct MemberQuery {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    email: Option<String>,
}

#[derive(Debug, Args)]
struct MemberChanges {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    phone: Option<String>,
    #[arg(long)]
    address: Option<String>,
    #[arg(long)]
    tier: Option<MembershipTier>,
}

#[derive(Debug, Subcommand)]
enum LoanCommand {
    Borrow {
        book_id: String,
        member_id: String,
    },
    Return { txn_id: String },
    Renew { txn_id: String, days: i64 },
    /// Open loans of one member
    Active { member_id: String },
    /// Mark late loans overdue, then list them
    Overdue,
    History(HistoryQuery),
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
struct HistoryQuery {
    #[arg(long)]
    member: Option<String>,
    #[arg(long)]
    book: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config =
        LibraryConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    let level = &config.logging.level;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("library_lending={level},library={level}").into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let data_dir = cli.data_dir.unwrap_or_else(|| config.data_dir.clone());
    tracing::debug!(data_dir = %data_dir.display(), "opening library");

    let store = SledStore::open(&data_dir)
        .with_context(|| format!("failed to open data directory {}", data_dir.display()))?;
    let mut library = LibraryService::new(
        store,
        config.loan_policy(),
        config.tier_limits(),
        Rc::new(SystemClock),
        Rc::new(Bech32Ids),
    )
    .context("failed to load library data")?;

    match cli.command {
        Command::Book(command) => run_book(&mut library, command),
        Command::Member(command) => run_member(&mut library, command),
        Command::Loan(command) => run_loan(&mut library, command),
        Command::Seed => {
            if library.seed_sample_data()? {
                println!("sample data loaded");
            } else {
                println!("library already has data, nothing seeded");
            }
            Ok(())
        }
    }
}

fn run_book(library: &mut LibraryService<SledStore>, command: BookCommand) -> anyhow::Result<()> {
    match command {
        BookCommand::Add {
            title,
            author,
            isbn,
            publisher,
            year,
            category,
        } => {
            let book = library.add_book(
                BookDetails::new()
                    .set_title(&title)
                    .set_author(&author)
                    .set_isbn(&isbn)
                    .set_publisher(&publisher)
                    .set_year(year)
                    .set_category(category),
            )?;
            print_book(&book);
        }
        BookCommand::List {
            available,
            category,
        } => {
            let books = match category {
                Some(category) => library.books_by_category(category),
                None if available => library.available_books(),
                None => library.catalog().all(),
            };
            books.iter().for_each(print_book);
        }
        BookCommand::Search(query) => {
            let catalog = library.catalog();
            let books = if let Some(title) = query.title {
                catalog.search_title(&title)
            } else if let Some(author) = query.author {
                catalog.search_author(&author)
            } else {
                catalog.search_isbn(query.isbn.as_deref().unwrap_or_default())
            };
            books.iter().for_each(print_book);
        }
        BookCommand::Update { id, changes } => {
            let mut book = library.book(&id)?;
            if let Some(title) = changes.title {
                book.title = title;
            }
            if let Some(author) = changes.author {
                book.author = author;
            }
            if let Some(isbn) = changes.isbn {
                book.isbn = isbn;
            }
            if let Some(publisher) = changes.publisher {
                book.publisher = publisher;
            }
            if let Some(year) = changes.year {
                book.year = year;
            }
            if let Some(category) = changes.category {
                book.category = category;
            }
            print_book(&library.update_book(book)?);
        }
        BookCommand::Status { id, status } => {
            let book = library.set_book_status(&id, status)?;
            print_book(&book);
        }
        BookCommand::Remove { id } => {
            let book = library.remove_book(&id)?;
            println!("removed {}", book.id);
        }
    }
    Ok(())
}

fn run_member(
    library: &mut LibraryService<SledStore>,
    command: MemberCommand,
) -> anyhow::Result<()> {
    match command {
        MemberCommand::Add {
            name,
            email,
            phone,
            address,
            tier,
        } => {
            let member = library.register_member(
                MemberDetails::new()
                    .set_name(&name)
                    .set_email(&email)
                    .set_phone(&phone)
                    .set_address(&address)
                    .set_tier(tier),
            )?;
            print_member(&member);
        }
        MemberCommand::List { tier } => {
            let members = match tier {
                Some(tier) => library.members_by_tier(tier),
                None => library.membership().all(),
            };
            members.iter().for_each(print_member);
        }
        MemberCommand::Search(query) => {
            let membership = library.membership();
            let members = match query.name {
                Some(name) => membership.search_name(&name),
                None => membership.search_email(query.email.as_deref().unwrap_or_default()),
            };
            members.iter().for_each(print_member);
        }
        MemberCommand::Update { id, changes } => {
            let mut member = library.member(&id)?;
            if let Some(name) = changes.name {
                member.name = name;
            }
            if let Some(email) = changes.email {
                member.email = email;
            }
            if let Some(phone) = changes.phone {
                member.phone = phone;
            }
            if let Some(address) = changes.address {
                member.address = address;
            }
            if let Some(tier) = changes.tier {
                member.tier = tier;
            }
            print_member(&library.update_member(member)?);
        }
        MemberCommand::Activate { id } => print_member(&library.set_member_active(&id, true)?),
        MemberCommand::Deactivate { id } => print_member(&library.set_member_active(&id, false)?),
        MemberCommand::Remove { id } => {
            let member = library.remove_member(&id)?;
            println!("removed {}", member.id);
        }
    }
    Ok(())
}

fn run_loan(library: &mut LibraryService<SledStore>, command: LoanCommand) -> anyhow::Result<()> {
    match command {
        LoanCommand::Borrow { book_id, member_id } => {
            print_transaction(&library.borrow(&book_id, &member_id)?)
        }
        LoanCommand::Return { txn_id } => {
            let txn = library.return_book(&txn_id)?;
            print_transaction(&txn);
            if txn.fine > 0 {
                println!("fine due: {}", format_money(txn.fine));
            }
        }
        LoanCommand::Renew { txn_id, days } => print_transaction(&library.renew(&txn_id, days)?),
        LoanCommand::Active { member_id } => {
            library.active_loans(&member_id)?.iter().for_each(print_transaction)
        }
        LoanCommand::Overdue => library.overdue_report()?.iter().for_each(print_transaction),
        LoanCommand::History(query) => {
            let history = match query.member {
                Some(member_id) => library.member_history(&member_id)?,
                None => library.book_history(query.book.as_deref().unwrap_or_default())?,
            };
            history.iter().for_each(print_transaction);
        }
    }
    Ok(())
}

fn print_book(book: &Book) {
    println!(
        "{}  {} by {} ({}, {}) isbn {} [{}] {}",
        book.id,
        book.title,
        book.author,
        book.publisher,
        book.year,
        book.isbn,
        book.category,
        book.status
    );
}

fn print_member(member: &Member) {
    let state = if member.active { "active" } else { "inactive" };
    println!(
        "{}  {} <{}> {} joined {} {}",
        member.id, member.name, member.email, member.tier, member.joined, state
    );
}

fn print_transaction(txn: &Transaction) {
    let returned = txn
        .returned_on
        .map(|d| d.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{}  book {} member {} borrowed {} due {} returned {} fine {} {}",
        txn.id,
        txn.book_id,
        txn.member_id,
        txn.borrowed_on,
        txn.due_on,
        returned,
        format_money(txn.fine),
        txn.status
    );
}

fn format_money(minor: u64) -> String {
    format!("{}.{:02}", minor / 100, minor % 100)
}
