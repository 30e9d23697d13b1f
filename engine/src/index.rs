use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::book::Book;
use crate::text::{strip_placeholders, tokenize};

pub type TermId = u32;

/// Feature cap applied when fitting over the catalog. The most frequent
/// terms across the corpus are kept; ties break lexicographically so a
/// rebuild over the same corpus is deterministic.
pub const MAX_FEATURES: usize = 5000;

/// Term space fitted over one corpus: term -> column index plus the inverse
/// document frequency of each retained term.
pub struct Vocabulary {
    terms: HashMap<String, TermId>,
    idf: Vec<f32>,
}

impl Vocabulary {
    /// Fit over tokenized documents, keeping at most `max_features` terms
    /// ranked by overall corpus frequency (highest first).
    pub fn fit(docs: &[Vec<String>], max_features: usize) -> Vocabulary {
        let n = docs.len();
        let mut corpus_tf: HashMap<&str, u64> = HashMap::new();
        let mut df: HashMap<&str, u32> = HashMap::new();
        for tokens in docs {
            let mut seen: HashSet<&str> = HashSet::new();
            for t in tokens {
                *corpus_tf.entry(t.as_str()).or_insert(0) += 1;
                if seen.insert(t.as_str()) {
                    *df.entry(t.as_str()).or_insert(0) += 1;
                }
            }
        }

        let mut ranked: Vec<(&str, u64)> = corpus_tf.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked.truncate(max_features);

        let mut terms = HashMap::with_capacity(ranked.len());
        let mut idf = Vec::with_capacity(ranked.len());
        for (i, (term, _)) in ranked.into_iter().enumerate() {
            let df_t = df.get(term).copied().unwrap_or(0);
            // Smoothed idf: every term behaves as if seen in one extra document.
            idf.push((((1 + n) as f32) / ((1 + df_t) as f32)).ln() + 1.0);
            terms.insert(term.to_string(), i as TermId);
        }
        Vocabulary { terms, idf }
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn term_id(&self, term: &str) -> Option<TermId> {
        self.terms.get(term).copied()
    }

    /// Sparse L2-normalized tf-idf vector for one document, sorted by term
    /// id. Terms outside the vocabulary contribute nothing.
    pub fn vectorize(&self, tokens: &[String]) -> Vec<(TermId, f32)> {
        let mut tf: HashMap<TermId, u32> = HashMap::new();
        for t in tokens {
            if let Some(tid) = self.term_id(t) {
                *tf.entry(tid).or_insert(0) += 1;
            }
        }
        let mut vec: Vec<(TermId, f32)> = tf
            .into_iter()
            .map(|(tid, count)| (tid, count as f32 * self.idf[tid as usize]))
            .collect();
        // Sort before normalizing: the norm then accumulates in term order,
        // and identical documents get bit-identical vectors.
        vec.sort_by_key(|&(tid, _)| tid);
        let norm = vec.iter().map(|(_, w)| w * w).sum::<f32>().sqrt();
        if norm > 0.0 {
            for (_, w) in vec.iter_mut() {
                *w /= norm;
            }
        }
        vec
    }
}

/// One record's weight for a term. Posting lists hold entries in corpus
/// order.
#[derive(Debug, Clone, Copy)]
pub struct Posting {
    pub pos: u32,
    pub weight: f32,
}

/// Immutable pairing of catalog records with their fitted vectors.
///
/// Built wholesale from a corpus and installed by swapping an `Arc`; the
/// vector at position i always corresponds to the record at position i, and
/// queries against one snapshot see a consistent corpus for their lifetime.
pub struct Snapshot {
    books: Vec<Book>,
    by_isbn: HashMap<String, usize>,
    vocab: Vocabulary,
    vectors: Vec<Vec<(TermId, f32)>>,
    postings: Vec<Vec<Posting>>,
}

impl Snapshot {
    /// Fit a vocabulary over the combined title+description text of `books`
    /// and vectorize every record. Placeholder markers are stripped first so
    /// boilerplate carries no weight. An empty corpus yields a valid, empty
    /// snapshot.
    pub fn build(books: Vec<Book>) -> Snapshot {
        let docs: Vec<Vec<String>> = books
            .iter()
            .map(|b| tokenize(&strip_placeholders(&b.combined_text())))
            .collect();
        let vocab = Vocabulary::fit(&docs, MAX_FEATURES);

        let mut vectors = Vec::with_capacity(books.len());
        let mut postings: Vec<Vec<Posting>> = vec![Vec::new(); vocab.len()];
        for (pos, tokens) in docs.iter().enumerate() {
            let vec = vocab.vectorize(tokens);
            for &(tid, weight) in &vec {
                postings[tid as usize].push(Posting {
                    pos: pos as u32,
                    weight,
                });
            }
            vectors.push(vec);
        }

        let by_isbn = books
            .iter()
            .enumerate()
            .map(|(i, b)| (b.isbn.clone(), i))
            .collect();

        Snapshot {
            books,
            by_isbn,
            vocab,
            vectors,
            postings,
        }
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    pub fn num_terms(&self) -> usize {
        self.vocab.len()
    }

    pub fn books(&self) -> &[Book] {
        &self.books
    }

    /// Corpus position of a record, by isbn.
    pub fn position(&self, isbn: &str) -> Option<usize> {
        self.by_isbn.get(isbn).copied()
    }

    /// Free-text query against the vector space. Blank queries and queries
    /// containing no in-vocabulary terms yield an empty result.
    pub fn recommend(&self, query_text: &str, top_n: usize) -> Vec<(Book, f32)> {
        let query = self.vocab.vectorize(&tokenize(query_text));
        if query.is_empty() {
            return Vec::new();
        }
        self.collect_hits(self.scores_for(&query), None, top_n)
    }

    /// Nearest neighbors of the record with the given isbn. Computed by
    /// walking that one vector through the posting lists, so the cost is
    /// bounded by corpus size x vocabulary size and no pairwise matrix is
    /// ever materialized. The queried record itself is excluded; an unknown
    /// isbn yields an empty result.
    pub fn similar_to(&self, isbn: &str, top_n: usize) -> Vec<(Book, f32)> {
        let Some(pos) = self.position(isbn) else {
            return Vec::new();
        };
        let target = &self.vectors[pos];
        self.collect_hits(self.scores_for(target), Some(pos), top_n)
    }

    /// Case-insensitive substring filter on the author field, in corpus
    /// order. Records without an author never match.
    pub fn books_by_author(
        &self,
        author_name: &str,
        skip_isbn: Option<&str>,
        top_n: usize,
    ) -> Vec<Book> {
        let needle = author_name.to_lowercase();
        self.books
            .iter()
            .filter(|b| {
                b.author
                    .as_deref()
                    .is_some_and(|a| a.to_lowercase().contains(&needle))
            })
            .filter(|b| skip_isbn != Some(b.isbn.as_str()))
            .take(top_n)
            .cloned()
            .collect()
    }

    /// Cosine scores of one sparse vector against every record, accumulated
    /// through the posting lists. Both sides are L2-normalized, so the dot
    /// product is the cosine.
    fn scores_for(&self, query: &[(TermId, f32)]) -> Vec<f32> {
        let mut scores = vec![0.0f32; self.books.len()];
        for &(tid, qw) in query {
            for p in &self.postings[tid as usize] {
                scores[p.pos as usize] += p.weight * qw;
            }
        }
        scores
    }

    /// Rank scored positions: zero scores dropped, descending score with
    /// corpus order preserved among equals, truncated to `top_n`. Scores are
    /// clamped so every match lies in (0, 1].
    fn collect_hits(
        &self,
        scores: Vec<f32>,
        skip_pos: Option<usize>,
        top_n: usize,
    ) -> Vec<(Book, f32)> {
        let mut hits: Vec<(usize, f32)> = scores
            .into_iter()
            .enumerate()
            .filter(|&(pos, score)| score > 0.0 && Some(pos) != skip_pos)
            .collect();
        // Stable sort on score only: equal scores keep corpus order.
        hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        hits.truncate(top_n);
        hits.into_iter()
            .map(|(pos, score)| (self.books[pos].clone(), score.min(1.0)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(id: i64, isbn: &str, title: &str, description: &str) -> Book {
        Book {
            id,
            isbn: isbn.to_string(),
            title: title.to_string(),
            description: Some(description.to_string()),
            author: None,
            cover_image: None,
            publish_year: None,
        }
    }

    #[test]
    fn vocabulary_caps_by_corpus_frequency() {
        let docs = vec![
            vec!["alpha".to_string(), "alpha".to_string(), "beta".to_string()],
            vec!["alpha".to_string(), "gamma".to_string()],
        ];
        let vocab = Vocabulary::fit(&docs, 2);
        assert_eq!(vocab.len(), 2);
        assert!(vocab.term_id("alpha").is_some());
        // beta and gamma tie at one occurrence; beta wins lexicographically.
        assert!(vocab.term_id("beta").is_some());
        assert!(vocab.term_id("gamma").is_none());
    }

    #[test]
    fn vectors_are_unit_length() {
        let docs = vec![
            vec!["ship".to_string(), "whale".to_string()],
            vec!["whale".to_string(), "captain".to_string()],
        ];
        let vocab = Vocabulary::fit(&docs, MAX_FEATURES);
        let v = vocab.vectorize(&docs[0]);
        let norm: f32 = v.iter().map(|(_, w)| w * w).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn unknown_terms_vectorize_to_empty() {
        let docs = vec![vec!["ship".to_string()]];
        let vocab = Vocabulary::fit(&docs, MAX_FEATURES);
        assert!(vocab.vectorize(&["zeppelin".to_string()]).is_empty());
    }

    #[test]
    fn placeholder_text_carries_no_weight() {
        let snapshot = Snapshot::build(vec![
            book(1, "A", "Mystery", "Description unavailable."),
            book(2, "B", "Thriller", "A gripping mystery story"),
        ]);
        // "unavailable" was stripped before fitting, so it matches nothing.
        assert!(snapshot.recommend("unavailable", 10).is_empty());
        assert_eq!(snapshot.recommend("mystery", 10).len(), 2);
    }

    #[test]
    fn build_keeps_the_source_ordering() {
        let snapshot = Snapshot::build(vec![
            book(9, "Z", "Zebras", "plains wildlife"),
            book(2, "A", "Aardvarks", "burrowing wildlife"),
        ]);
        let isbns: Vec<&str> = snapshot.books().iter().map(|b| b.isbn.as_str()).collect();
        assert_eq!(isbns, vec!["Z", "A"]);
        // positions index into books(), not into id order
        assert_eq!(snapshot.position("A"), Some(1));
        assert_eq!(snapshot.books()[1].title, "Aardvarks");
    }

    #[test]
    fn empty_corpus_builds_empty_snapshot() {
        let snapshot = Snapshot::build(Vec::new());
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.num_terms(), 0);
        assert!(snapshot.recommend("anything", 5).is_empty());
        assert!(snapshot.similar_to("X", 5).is_empty());
        assert!(snapshot.books_by_author("anyone", None, 5).is_empty());
    }
}
