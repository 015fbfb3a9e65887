//! SQL extraction from model output
//!
//! Takes the first ```sql fenced block; falls back to the first bare
//! SELECT/WITH statement. Trailing semicolons are normalized away.
//! Extraction is stable: running it over its own output returns the same
//! SQL.

use once_cell::sync::Lazy;
use regex::Regex;

static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)```sql\s+(.*?)```").expect("static regex"));

static BARE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*(SELECT|WITH)\b").expect("static regex"));

/// Pull the SQL out of an answer, if any.
pub fn extract_sql(text: &str) -> Option<String> {
    if let Some(captures) = FENCE_RE.captures(text) {
        let sql = captures.get(1)?.as_str();
        return clean(sql);
    }

    let start = BARE_RE.find(text)?.start();
    let rest = &text[start..];
    // A stray closing fence after bare SQL ends the statement.
    let end = rest.find("```").unwrap_or(rest.len());
    clean(&rest[..end])
}

fn clean(sql: &str) -> Option<String> {
    let cleaned = sql.trim().trim_end_matches(';').trim_end().to_string();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_block_wins() {
        let text = "Here is the query:\n```sql\nSELECT id FROM ds.users;\n```\nIt lists users.";
        assert_eq!(extract_sql(text).unwrap(), "SELECT id FROM ds.users");
    }

    #[test]
    fn test_first_fence_of_many() {
        let text = "```sql\nSELECT 1\n```\nor\n```sql\nSELECT 2\n```";
        assert_eq!(extract_sql(text).unwrap(), "SELECT 1");
    }

    #[test]
    fn test_bare_select_fallback() {
        let text = "You could run\nSELECT email FROM ds.users WHERE id = 1;";
        assert_eq!(
            extract_sql(text).unwrap(),
            "SELECT email FROM ds.users WHERE id = 1"
        );
    }

    #[test]
    fn test_with_statement() {
        let text = "WITH recent AS (SELECT 1) SELECT * FROM recent";
        assert_eq!(extract_sql(text).unwrap(), text);
    }

    #[test]
    fn test_no_sql() {
        assert!(extract_sql("There is no query to run here.").is_none());
        assert!(extract_sql("```sql\n  \n```").is_none());
    }

    #[test]
    fn test_extraction_is_stable() {
        let text = "Intro\n```sql\nSELECT id\nFROM ds.users\n```";
        let first = extract_sql(text).unwrap();
        let second = extract_sql(&first).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_case_insensitive_fence_and_keyword() {
        let text = "```SQL\nselect 1\n```";
        assert_eq!(extract_sql(text).unwrap(), "select 1");
    }
}
