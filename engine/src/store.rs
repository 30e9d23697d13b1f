use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::book::{Book, NewBook};
use crate::text::PLACEHOLDER_MARKERS;

/// Read side of the catalog as the engine sees it during a refresh. A trait
/// seam so tests can inject an in-memory corpus.
pub trait CorpusSource: Send + Sync {
    /// Every record, in stable corpus order.
    fn fetch_all(&self) -> Result<Vec<Book>>;
}

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS books (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    isbn TEXT UNIQUE,
    title TEXT,
    description TEXT,
    author TEXT,
    cover_image TEXT,
    publish_year INTEGER
);
";

/// SQLite-backed catalog store.
///
/// Holds only the database path; every operation opens its own WAL-mode
/// connection with a bounded busy timeout, so a refresh hitting a locked
/// store fails fast instead of hanging request threads.
#[derive(Debug, Clone)]
pub struct BookStore {
    path: PathBuf,
}

impl BookStore {
    pub fn new<P: AsRef<Path>>(path: P) -> BookStore {
        BookStore {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)
            .with_context(|| format!("open catalog db at {}", self.path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(conn)
    }

    /// Create the `books` table if it does not exist yet. Idempotent.
    pub fn init_schema(&self) -> Result<()> {
        self.connect()?.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    pub fn fetch_all_books(&self) -> Result<Vec<Book>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, isbn, title, description, author, cover_image, publish_year
             FROM books ORDER BY id",
        )?;
        let rows = stmt.query_map([], decode_book)?;
        let mut books = Vec::new();
        for row in rows {
            books.push(row?);
        }
        Ok(books)
    }

    pub fn fetch_book_by_isbn(&self, isbn: &str) -> Result<Option<Book>> {
        let conn = self.connect()?;
        let book = conn
            .query_row(
                "SELECT id, isbn, title, description, author, cover_image, publish_year
                 FROM books WHERE isbn = ?1",
                params![isbn],
                decode_book,
            )
            .optional()?;
        Ok(book)
    }

    /// Paged listing. Records whose description is missing or still a
    /// placeholder marker are skipped.
    pub fn list_books(&self, skip: u32, limit: u32) -> Result<Vec<Book>> {
        let conn = self.connect()?;
        let markers = PLACEHOLDER_MARKERS
            .iter()
            .map(|_| "?")
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT id, isbn, title, description, author, cover_image, publish_year
             FROM books
             WHERE description IS NOT NULL AND description NOT IN ({markers})
             ORDER BY id LIMIT ? OFFSET ?"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut bind: Vec<&dyn rusqlite::ToSql> = PLACEHOLDER_MARKERS
            .iter()
            .map(|m| m as &dyn rusqlite::ToSql)
            .collect();
        bind.push(&limit);
        bind.push(&skip);
        let rows = stmt.query_map(bind.as_slice(), decode_book)?;
        let mut books = Vec::new();
        for row in rows {
            books.push(row?);
        }
        Ok(books)
    }

    /// Insert a record, keeping the first row seen for an isbn. Returns
    /// whether a new row was added.
    pub fn insert_book(&self, book: &NewBook) -> Result<bool> {
        let conn = self.connect()?;
        let added = conn.execute(
            "INSERT INTO books (isbn, title, description, author, cover_image, publish_year)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(isbn) DO NOTHING",
            params![
                book.isbn,
                book.title,
                book.description,
                book.author,
                book.cover_image,
                book.publish_year
            ],
        )?;
        Ok(added > 0)
    }

    /// Insert a batch of records inside one transaction. Duplicate isbns are
    /// skipped; returns how many rows were added.
    pub fn insert_books(&self, books: &[NewBook]) -> Result<usize> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let mut added = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO books (isbn, title, description, author, cover_image, publish_year)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(isbn) DO NOTHING",
            )?;
            for book in books {
                added += stmt.execute(params![
                    book.isbn,
                    book.title,
                    book.description,
                    book.author,
                    book.cover_image,
                    book.publish_year
                ])?;
            }
        }
        tx.commit()?;
        Ok(added)
    }

    /// Records whose description is still missing or a placeholder marker,
    /// oldest first, for the re-enrichment pass.
    pub fn fetch_undescribed(&self, limit: usize) -> Result<Vec<Book>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, isbn, title, description, author, cover_image, publish_year
             FROM books
             WHERE description IS NULL
                OR description = ''
                OR description LIKE 'Description%'
             ORDER BY id LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], decode_book)?;
        let mut books = Vec::new();
        for row in rows {
            books.push(row?);
        }
        Ok(books)
    }

    /// Overwrite one record's description, and its cover when a new one was
    /// found. Returns whether the row existed.
    pub fn update_enrichment(
        &self,
        id: i64,
        description: &str,
        cover: Option<&str>,
    ) -> Result<bool> {
        let conn = self.connect()?;
        let changed = match cover {
            Some(cover) => conn.execute(
                "UPDATE books SET description = ?1, cover_image = ?2 WHERE id = ?3",
                params![description, cover, id],
            )?,
            None => conn.execute(
                "UPDATE books SET description = ?1 WHERE id = ?2",
                params![description, id],
            )?,
        };
        Ok(changed > 0)
    }

    /// All isbns currently present, for ingest-time deduplication.
    pub fn existing_isbns(&self) -> Result<HashSet<String>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT isbn FROM books")?;
        let rows = stmt.query_map([], |row| row.get::<_, Option<String>>(0))?;
        let mut isbns = HashSet::new();
        for row in rows {
            if let Some(isbn) = row? {
                isbns.insert(isbn.trim().to_string());
            }
        }
        Ok(isbns)
    }

    pub fn count_books(&self) -> Result<u64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM books", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Records carrying a usable description, i.e. non-empty and not one of
    /// the placeholder markers.
    pub fn count_described(&self) -> Result<u64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM books
             WHERE description IS NOT NULL
               AND description != ''
               AND description NOT LIKE 'Description%'",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

impl CorpusSource for BookStore {
    fn fetch_all(&self) -> Result<Vec<Book>> {
        self.fetch_all_books()
    }
}

fn decode_book(row: &rusqlite::Row<'_>) -> rusqlite::Result<Book> {
    Ok(Book {
        id: row.get(0)?,
        isbn: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        title: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        description: row.get(3)?,
        author: row.get(4)?,
        cover_image: row.get(5)?,
        publish_year: row.get(6)?,
    })
}
