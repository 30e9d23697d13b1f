use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

/// Boilerplate markers the enrichment pipeline leaves in place of a real
/// description. Stripped from combined text before vectorizing so they
/// contribute no weight.
pub const PLACEHOLDER_MARKERS: &[&str] = &[
    "Description unavailable.",
    "Description loading...",
    "Description not available.",
];

lazy_static! {
    // Word tokens of two or more characters; single letters carry no signal.
    static ref TERM_RE: Regex = Regex::new(r"\b\w\w+\b").expect("valid regex");
    static ref STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "a","about","above","after","again","against","all","am","an","and","any","are","as","at",
            "be","because","been","before","being","below","between","both","but","by",
            "can","cannot","could",
            "did","do","does","doing","down","during",
            "each","few","for","from","further",
            "had","has","have","having","he","her","here","hers","herself","him","himself","his","how",
            "i","if","in","into","is","it","its","itself",
            "me","more","most","my","myself",
            "no","nor","not","of","off","on","once","only","or","other","ought","our","ours","ourselves","out","over","own",
            "same","she","should","so","some","such",
            "than","that","the","their","theirs","them","themselves","then","there","these","they","this","those","through","to","too",
            "under","until","up","very",
            "was","we","were","what","when","where","which","while","who","whom","why","with","would",
            "you","your","yours","yourself","yourselves"
        ];
        words.iter().copied().collect()
    };
}

/// Remove every known placeholder marker from `text`.
pub fn strip_placeholders(text: &str) -> String {
    let mut out = text.to_string();
    for marker in PLACEHOLDER_MARKERS {
        out = out.replace(marker, "");
    }
    out
}

/// Tokenize text into lowercased terms using NFKC normalization and
/// stop-word removal. Term order and repetitions are preserved.
pub fn tokenize(text: &str) -> Vec<String> {
    let normalized = text.nfkc().collect::<String>().to_lowercase();
    TERM_RE
        .find_iter(&normalized)
        .map(|m| m.as_str())
        .filter(|t| !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}
