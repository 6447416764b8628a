use super::QueryResult;

pub struct JsonFormatter;

impl JsonFormatter {
    pub fn format(result: &QueryResult) -> String {
        let rows = result.to_json_rows();
        serde_json::to_string_pretty(&rows).unwrap_or_else(|_| "[]".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_as_object_array() {
        let mut result = QueryResult::new(&["name", "status"]);
        result.push_row(vec!["web".to_string(), "Healthy".to_string()]);

        let json = JsonFormatter::format(&result);
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["name"], "web");
        assert_eq!(parsed[0]["status"], "Healthy");
    }

    #[test]
    fn test_empty_result_is_empty_array() {
        let result = QueryResult::new(&["name"]);
        assert_eq!(JsonFormatter::format(&result).trim(), "[]");
    }
}
