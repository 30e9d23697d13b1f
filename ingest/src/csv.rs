use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// One row of the cleaned export, keyed by the columns the raw catalog dump
/// uses (`ISBN`, `Title`, `Author/Editor`, `Year`).
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub isbn: String,
    pub title: String,
    pub author: Option<String>,
    pub year: Option<i64>,
}

/// Counts reported by a cleaning pass.
#[derive(Debug, Clone, Copy)]
pub struct CleanReport {
    pub raw_rows: usize,
    pub valid_isbn: usize,
    pub written: usize,
}

/// Normalize an ISBN: uppercase, strip everything but digits and `X`, and
/// keep only the 10- and 13-character forms.
pub fn clean_isbn(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == 'X')
        .collect();
    if cleaned.len() == 10 || cleaned.len() == 13 {
        Some(cleaned)
    } else {
        None
    }
}

/// Split one CSV line on unquoted commas. Doubled quotes inside a quoted
/// field unescape to a literal quote.
pub fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

fn join_csv_line(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| {
            if f.contains(',') || f.contains('"') {
                format!("\"{}\"", f.replace('"', "\"\""))
            } else {
                f.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn column(columns: &[String], name: &str) -> Option<usize> {
    columns.iter().position(|c| c.trim() == name)
}

fn parse_year(s: &str) -> Option<i64> {
    if s.is_empty() {
        return None;
    }
    // exports sometimes carry years as floats ("1999.0")
    s.parse::<i64>()
        .ok()
        .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
}

/// Parse cleaned-export content into rows. Columns are located by header
/// name; rows without an isbn or title are dropped.
pub fn parse_rows(content: &str) -> Result<Vec<RawRow>> {
    let mut lines = content.lines();
    let header = lines.next().context("empty csv: missing header")?;
    let columns = split_csv_line(header);
    let isbn_col = column(&columns, "ISBN").context("missing ISBN column")?;
    let title_col = column(&columns, "Title").context("missing Title column")?;
    let author_col = column(&columns, "Author/Editor");
    let year_col = column(&columns, "Year");

    let mut rows = Vec::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_csv_line(line);
        let isbn = fields.get(isbn_col).map(|s| s.trim()).unwrap_or("");
        let title = fields.get(title_col).map(|s| s.trim()).unwrap_or("");
        if isbn.is_empty() || title.is_empty() {
            continue;
        }
        let author = author_col
            .and_then(|i| fields.get(i))
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let year = year_col
            .and_then(|i| fields.get(i))
            .and_then(|s| parse_year(s.trim()));
        rows.push(RawRow {
            isbn: isbn.to_string(),
            title: title.to_string(),
            author,
            year,
        });
    }
    Ok(rows)
}

/// Read the cleaned export from disk. Old catalog dumps are not valid
/// UTF-8, so the decode is lossy.
pub fn read_rows(path: &Path) -> Result<Vec<RawRow>> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    parse_rows(&String::from_utf8_lossy(&bytes))
}

/// Clean a raw export: normalize ISBNs, drop rows without a valid one, and
/// deduplicate by cleaned ISBN keeping the first occurrence.
pub fn clean_file(input: &Path, output: &Path) -> Result<CleanReport> {
    let bytes = fs::read(input).with_context(|| format!("read {}", input.display()))?;
    let content = String::from_utf8_lossy(&bytes);
    let mut lines = content.lines();
    let header = lines.next().context("empty csv: missing header")?;
    let columns = split_csv_line(header);
    let isbn_col = column(&columns, "ISBN").context("missing ISBN column")?;

    let mut out = String::new();
    out.push_str(header);
    out.push('\n');

    let mut seen: HashSet<String> = HashSet::new();
    let mut report = CleanReport {
        raw_rows: 0,
        valid_isbn: 0,
        written: 0,
    };
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        report.raw_rows += 1;
        let mut fields = split_csv_line(line);
        let Some(isbn) = fields.get(isbn_col).and_then(|f| clean_isbn(f)) else {
            continue;
        };
        report.valid_isbn += 1;
        if !seen.insert(isbn.clone()) {
            continue;
        }
        fields[isbn_col] = isbn;
        out.push_str(&join_csv_line(&fields));
        out.push('\n');
        report.written += 1;
    }

    fs::write(output, out).with_context(|| format!("write {}", output.display()))?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isbn_cleaning_keeps_valid_lengths() {
        assert_eq!(clean_isbn("978-0-306-40615-7").as_deref(), Some("9780306406157"));
        assert_eq!(clean_isbn("043942089x").as_deref(), Some("043942089X"));
        assert_eq!(clean_isbn(" 0439420891 ").as_deref(), Some("0439420891"));
        assert_eq!(clean_isbn("12345"), None);
        assert_eq!(clean_isbn(""), None);
        assert_eq!(clean_isbn("N/A"), None);
    }

    #[test]
    fn splits_quoted_fields() {
        let fields = split_csv_line(r#"0439420891,"Code, The","Smith, J.",1999"#);
        assert_eq!(fields, vec!["0439420891", "Code, The", "Smith, J.", "1999"]);
    }

    #[test]
    fn unescapes_doubled_quotes() {
        let fields = split_csv_line(r#"1,"He said ""hi""",x"#);
        assert_eq!(fields[1], r#"He said "hi""#);
    }

    #[test]
    fn rows_are_located_by_header_name() {
        let content = "Title,ISBN,Author/Editor,Year\nDune,0441013597,Herbert,1965\nNo Author,0441013598,,\n";
        let rows = parse_rows(content).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].isbn, "0441013597");
        assert_eq!(rows[0].title, "Dune");
        assert_eq!(rows[0].author.as_deref(), Some("Herbert"));
        assert_eq!(rows[0].year, Some(1965));
        assert_eq!(rows[1].author, None);
        assert_eq!(rows[1].year, None);
    }

    #[test]
    fn year_accepts_float_exports() {
        assert_eq!(parse_year("1999"), Some(1999));
        assert_eq!(parse_year("1999.0"), Some(1999));
        assert_eq!(parse_year(""), None);
        assert_eq!(parse_year("unknown"), None);
    }

    #[test]
    fn cleaning_deduplicates_and_normalizes() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("raw.csv");
        let output = dir.path().join("clean.csv");
        std::fs::write(
            &input,
            "ISBN,Title,Author/Editor,Year\n\
             978-0-306-40615-7,First,A,2001\n\
             9780306406157,Duplicate,B,2002\n\
             bogus,Invalid,C,2003\n\
             043942089x,\"Title, quoted\",D,2004\n",
        )
        .unwrap();

        let report = clean_file(&input, &output).unwrap();
        assert_eq!(report.raw_rows, 4);
        assert_eq!(report.valid_isbn, 3);
        assert_eq!(report.written, 2);

        let rows = read_rows(&output).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].isbn, "9780306406157");
        assert_eq!(rows[1].isbn, "043942089X");
        assert_eq!(rows[1].title, "Title, quoted");
    }
}
