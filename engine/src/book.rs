use serde::{Deserialize, Serialize};

/// A catalog record as stored in the `books` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: i64,
    pub isbn: String,
    pub title: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub cover_image: Option<String>,
    pub publish_year: Option<i64>,
}

impl Book {
    /// Title and description joined into the text the indexer vectorizes.
    /// A missing description contributes nothing.
    pub fn combined_text(&self) -> String {
        match self.description.as_deref() {
            Some(desc) => format!("{} {}", self.title, desc),
            None => self.title.clone(),
        }
    }
}

/// A record about to be inserted; the store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBook {
    pub isbn: String,
    pub title: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub cover_image: Option<String>,
    pub publish_year: Option<i64>,
}
