mod json;
mod table;

pub use json::JsonFormatter;
pub use table::TableFormatter;

use crate::cli::OutputFormat;

/// Columnar result ready for formatting
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl QueryResult {
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn format(&self, format: &OutputFormat, no_headers: bool) -> String {
        match format {
            OutputFormat::Table => TableFormatter::format(self, no_headers),
            OutputFormat::Json => JsonFormatter::format(self),
        }
    }

    /// Rows as JSON objects keyed by column name
    pub fn to_json_rows(&self) -> Vec<serde_json::Value> {
        self.rows
            .iter()
            .map(|row| {
                let map: serde_json::Map<String, serde_json::Value> = self
                    .columns
                    .iter()
                    .zip(row)
                    .map(|(col, val)| (col.clone(), serde_json::Value::String(val.clone())))
                    .collect();
                serde_json::Value::Object(map)
            })
            .collect()
    }

    #[allow(dead_code)]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_json_rows_pairs_columns() {
        let mut result = QueryResult::new(&["name", "status"]);
        result.push_row(vec!["web".to_string(), "Healthy".to_string()]);

        let rows = result.to_json_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "web");
        assert_eq!(rows[0]["status"], "Healthy");
    }

    #[test]
    fn test_row_count() {
        let mut result = QueryResult::new(&["name"]);
        assert_eq!(result.row_count(), 0);
        result.push_row(vec!["a".to_string()]);
        result.push_row(vec!["b".to_string()]);
        assert_eq!(result.row_count(), 2);
    }
}
