use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Result};
use engine::{Book, BookStore, CorpusSource, EngineError, NewBook, Recommender};

fn book(id: i64, isbn: &str, title: &str, description: &str) -> Book {
    Book {
        id,
        isbn: isbn.to_string(),
        title: title.to_string(),
        description: if description.is_empty() {
            None
        } else {
            Some(description.to_string())
        },
        author: None,
        cover_image: None,
        publish_year: None,
    }
}

fn authored(id: i64, isbn: &str, title: &str, author: Option<&str>) -> Book {
    Book {
        author: author.map(str::to_string),
        ..book(id, isbn, title, "")
    }
}

struct SeedSource(Vec<Book>);

impl CorpusSource for SeedSource {
    fn fetch_all(&self) -> Result<Vec<Book>> {
        Ok(self.0.clone())
    }
}

struct FlakySource {
    books: Vec<Book>,
    broken: AtomicBool,
}

impl FlakySource {
    fn new(books: Vec<Book>) -> FlakySource {
        FlakySource {
            books,
            broken: AtomicBool::new(false),
        }
    }
}

impl CorpusSource for FlakySource {
    fn fetch_all(&self) -> Result<Vec<Book>> {
        if self.broken.load(Ordering::SeqCst) {
            bail!("catalog offline");
        }
        Ok(self.books.clone())
    }
}

fn two_book_corpus() -> Vec<Book> {
    vec![
        book(1, "A", "Clean Code", "software craftsmanship"),
        book(2, "B", "Dirty Code", "software chaos"),
    ]
}

fn built(books: Vec<Book>) -> Recommender {
    let rec = Recommender::new(Arc::new(SeedSource(books)));
    rec.rebuild().unwrap();
    rec
}

#[test]
fn mood_query_ranks_shared_vocabulary() {
    let rec = built(two_book_corpus());

    let hits = rec.recommend("software", 10);
    let isbns: Vec<&str> = hits.iter().map(|(b, _)| b.isbn.as_str()).collect();
    assert_eq!(isbns, vec!["A", "B"]);
    assert!(hits[0].1 > 0.0);
    assert!((hits[0].1 - hits[1].1).abs() < 1e-6);

    assert!(rec.recommend("nonexistent_term", 10).is_empty());
}

#[test]
fn similar_results_never_include_the_subject() {
    let rec = built(two_book_corpus());

    let hits = rec.similar_to("A", 1);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0.isbn, "B");

    let wide = rec.similar_to("A", 10);
    assert!(wide.iter().all(|(b, _)| b.isbn != "A"));
}

#[test]
fn unknown_isbn_is_an_empty_result() {
    let rec = built(two_book_corpus());
    assert!(rec.similar_to("not-indexed", 5).is_empty());
}

#[test]
fn scores_stay_within_unit_range() {
    let rec = built(vec![
        book(1, "A", "Storm at Sea", "ocean waves crash against the hull"),
        book(2, "B", "Harbor Nights", "ocean calm under harbor lights"),
        book(3, "C", "Desert Walk", "sand dunes stretch forever"),
    ]);

    let hits = rec.recommend("ocean waves harbor", 10);
    assert!(!hits.is_empty());
    for (hit, score) in &hits {
        assert!(*score > 0.0, "{} scored {}", hit.isbn, score);
        assert!(*score <= 1.0, "{} scored {}", hit.isbn, score);
    }
    // the desert book shares no query terms, so it must not appear at all
    assert!(hits.iter().all(|(b, _)| b.isbn != "C"));
}

#[test]
fn equal_scores_keep_corpus_order() {
    // first two records carry identical combined text, so their vectors match
    let rec = built(vec![
        book(1, "first", "Alpha", "ocean waves crash"),
        book(2, "second", "Alpha", "ocean waves crash"),
        book(3, "third", "Alpha", "ocean calm"),
    ]);

    let hits = rec.recommend("ocean waves", 10);
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].0.isbn, "first");
    assert_eq!(hits[1].0.isbn, "second");
    assert!((hits[0].1 - hits[1].1).abs() < 1e-6);
    // descending overall: the partial match ranks last
    assert_eq!(hits[2].0.isbn, "third");
    assert!(hits[2].1 < hits[0].1);
}

#[test]
fn blank_or_stopword_queries_return_nothing() {
    let rec = built(two_book_corpus());
    assert!(rec.recommend("", 10).is_empty());
    assert!(rec.recommend("   ", 10).is_empty());
    assert!(rec.recommend("the and of", 10).is_empty());
}

#[test]
fn empty_store_serves_empty_results() {
    let rec = Recommender::new(Arc::new(SeedSource(Vec::new())));
    let summary = rec.rebuild().unwrap();
    assert_eq!(summary.books, 0);

    assert!(rec.recommend("anything", 5).is_empty());
    assert!(rec.similar_to("A", 5).is_empty());
    assert!(rec.books_by_author("anyone", None, 5).is_empty());
}

#[test]
fn author_filter_is_case_insensitive_and_skips() {
    let rec = built(vec![
        authored(1, "h1", "The Hobbit", Some("J. R. R. Tolkien")),
        authored(2, "h2", "Letters", Some("TOLKIEN ESTATE")),
        authored(3, "h3", "Anthology", Some("tolkien and friends")),
        authored(4, "h4", "Orphan", None),
        authored(5, "h5", "Unrelated", Some("Ursula K. Le Guin")),
    ]);

    let hits = rec.books_by_author("tolkien", Some("h2"), 5);
    let isbns: Vec<&str> = hits.iter().map(|b| b.isbn.as_str()).collect();
    assert_eq!(isbns, vec!["h1", "h3"]);

    let capped = rec.books_by_author("Tolkien", None, 2);
    assert_eq!(capped.len(), 2);
    assert_eq!(capped[0].isbn, "h1");
}

#[test]
fn first_recommend_builds_lazily() {
    let rec = Recommender::new(Arc::new(SeedSource(two_book_corpus())));
    // no explicit rebuild: the first mood query loads the corpus itself
    let hits = rec.recommend("software", 10);
    assert_eq!(hits.len(), 2);
}

#[test]
fn failed_rebuild_keeps_the_stale_snapshot() {
    let source = Arc::new(FlakySource::new(two_book_corpus()));
    let rec = Recommender::new(source.clone());
    rec.rebuild().unwrap();

    source.broken.store(true, Ordering::SeqCst);
    let err = rec.rebuild().unwrap_err();
    assert!(matches!(err, EngineError::DataUnavailable(_)));

    // queries keep answering from the last good snapshot
    assert_eq!(rec.recommend("software", 10).len(), 2);
    assert_eq!(rec.similar_to("A", 5).len(), 1);
}

#[test]
fn concurrent_rebuilds_install_one_snapshot() {
    let corpus: Vec<Book> = (0..40)
        .map(|i| book(i, &format!("isbn-{i}"), &format!("Volume {i}"), "shared corpus text"))
        .collect();
    let rec = Arc::new(Recommender::new(Arc::new(SeedSource(corpus))));
    rec.rebuild().unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let rec = rec.clone();
        handles.push(thread::spawn(move || rec.rebuild().map(|s| s.books)));
    }
    for _ in 0..4 {
        let rec = rec.clone();
        handles.push(thread::spawn(move || {
            // readers racing the swap must always see a complete snapshot
            for _ in 0..50 {
                assert_eq!(rec.recommend("shared corpus", 10).len(), 10);
            }
            Ok(0)
        }));
    }
    for handle in handles {
        let outcome = handle.join().unwrap().unwrap();
        assert!(outcome == 0 || outcome == 40);
    }

    let snapshot = rec.current().unwrap();
    assert_eq!(snapshot.len(), 40);
}

#[test]
fn sqlite_store_feeds_the_engine() {
    let dir = tempfile::tempdir().unwrap();
    let store = BookStore::new(dir.path().join("books.db"));
    store.init_schema().unwrap();
    store
        .insert_book(&NewBook {
            isbn: "111".to_string(),
            title: "Tides".to_string(),
            description: Some("ocean currents and tides".to_string()),
            author: Some("M. Shore".to_string()),
            cover_image: None,
            publish_year: Some(1999),
        })
        .unwrap();

    let rec = Recommender::new(Arc::new(store.clone()));
    assert_eq!(rec.rebuild().unwrap().books, 1);
    assert_eq!(rec.recommend("ocean", 5).len(), 1);

    // rows added after a build only appear once the next rebuild lands
    store
        .insert_book(&NewBook {
            isbn: "222".to_string(),
            title: "Undertow".to_string(),
            description: Some("ocean depths".to_string()),
            author: None,
            cover_image: None,
            publish_year: None,
        })
        .unwrap();
    assert_eq!(rec.recommend("ocean", 5).len(), 1);
    rec.rebuild().unwrap();
    assert_eq!(rec.recommend("ocean", 5).len(), 2);
}
