use std::borrow::Cow;

use comfy_table::{Table, presets::ASCII_BORDERS_ONLY_CONDENSED};

use super::QueryResult;

/// Maximum rendered width for any single cell
const MAX_CELL_WIDTH: usize = 80;

/// Truncate a string to max_len chars, adding "..." if truncated
fn truncate_value(s: &str, max_len: usize) -> Cow<'_, str> {
    if s.chars().count() <= max_len {
        Cow::Borrowed(s)
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        Cow::Owned(format!("{}...", truncated))
    }
}

pub struct TableFormatter;

impl TableFormatter {
    pub fn format(result: &QueryResult, no_headers: bool) -> String {
        if result.rows.is_empty() {
            return "(0 rows)".to_string();
        }

        let mut table = Table::new();
        // ASCII_BORDERS_ONLY_CONDENSED is close to psql style
        table.load_preset(ASCII_BORDERS_ONLY_CONDENSED);

        if !no_headers {
            table.set_header(&result.columns);
        }

        for row in &result.rows {
            let cells: Vec<Cow<'_, str>> = row
                .iter()
                .map(|val| truncate_value(val, MAX_CELL_WIDTH))
                .collect();
            table.add_row(cells);
        }

        let output = table.to_string();
        format!("{}\n({} rows)", output, result.rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_value_short() {
        let result = truncate_value("hello", 10);
        assert_eq!(result, "hello");
        assert!(matches!(result, Cow::Borrowed(_)));
    }

    #[test]
    fn test_truncate_value_too_long() {
        let long = "a".repeat(100);
        let result = truncate_value(&long, 20);
        assert!(result.ends_with("..."));
        assert!(result.chars().count() <= 20);
        assert!(matches!(result, Cow::Owned(_)));
    }

    #[test]
    fn test_truncate_value_unicode() {
        // Unicode characters should be counted as single chars, not bytes
        let unicode = "日本語テストです長い文字列";
        let result = truncate_value(unicode, 8);
        assert!(result.chars().count() <= 8);
        assert!(result.ends_with("..."));
    }

    #[test]
    fn test_empty_result() {
        let result = QueryResult::new(&["name"]);
        assert_eq!(TableFormatter::format(&result, false), "(0 rows)");
    }

    #[test]
    fn test_row_count_suffix() {
        let mut result = QueryResult::new(&["name"]);
        result.push_row(vec!["web".to_string()]);
        let output = TableFormatter::format(&result, false);
        assert!(output.contains("web"));
        assert!(output.ends_with("(1 rows)"));
    }

    #[test]
    fn test_no_headers_omits_column_names() {
        let mut result = QueryResult::new(&["some_column_header"]);
        result.push_row(vec!["value".to_string()]);
        let output = TableFormatter::format(&result, true);
        assert!(!output.contains("some_column_header"));
        assert!(output.contains("value"));
    }
}
