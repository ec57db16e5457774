use serde::{Deserialize, Serialize};

/// An equality predicate on a single column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

impl Filter {
    pub fn eq(column: &str, value: &str) -> Self {
        Self {
            column: column.to_string(),
            value: value.to_string(),
        }
    }

    /// Renders the predicate in the `column=eq.value` form used by the
    /// record store's query string and the change feed's filter.
    pub fn to_expression(&self) -> String {
        format!("{}=eq.{}", self.column, self.value)
    }

    /// Renders the predicate as a `(column, "eq.value")` query-string pair.
    pub fn to_query_pair(&self) -> (String, String) {
        (self.column.clone(), format!("eq.{}", self.value))
    }
}

/// Result ordering for a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

impl Order {
    pub fn desc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            ascending: false,
        }
    }

    pub fn to_expression(&self) -> String {
        let dir = if self.ascending { "asc" } else { "desc" };
        format!("{}.{}", self.column, dir)
    }
}
