//! Builders for common read query shapes
//!
//! Paged listings, prefix searches and aggregates are assembled here
//! instead of being string-formatted at call sites. Identifiers are
//! validated before they reach the SQL text; everything user-supplied
//! travels as a bound parameter, and LIKE prefixes are escaped so `%`
//! and `_` match literally.

use crate::connector::Value;
use crate::error::{Error, Result};

/// Escape character used in generated LIKE patterns
pub const LIKE_ESCAPE: char = '!';

fn ensure_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let ok = match chars.next() {
        None => false,
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
    };
    if ok {
        Ok(())
    } else {
        Err(Error::Identifier(name.to_string()))
    }
}

fn column_list(columns: &[String]) -> Result<String> {
    if columns.is_empty() {
        return Err(Error::Config("column list is empty".to_string()));
    }
    for column in columns {
        ensure_identifier(column)?;
    }
    Ok(columns.join(", "))
}

/// Escape `%`, `_` and the escape character itself so a user-supplied
/// prefix matches literally inside a LIKE pattern
pub fn escape_like_prefix(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if c == '%' || c == '_' || c == LIKE_ESCAPE {
            out.push(LIKE_ESCAPE);
        }
        out.push(c);
    }
    out
}

/// One page of an ordered table scan.
///
/// Builds `SELECT .. ORDER BY .. LIMIT $1 OFFSET $2` with the page
/// geometry as parameters. Page numbers start at 1; zero clamps to the
/// first page.
#[derive(Debug, Clone)]
pub struct PagedListing {
    table: String,
    columns: Vec<String>,
    order_by: String,
    descending: bool,
    page: u32,
    per_page: u32,
}

impl PagedListing {
    /// Listing over `table` returning `columns`, ordered by `order_by`
    /// ascending, first page of 50
    pub fn new(table: &str, columns: &[&str], order_by: &str) -> Self {
        PagedListing {
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            order_by: order_by.to_string(),
            descending: false,
            page: 1,
            per_page: 50,
        }
    }

    /// Flip the sort order to descending
    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    /// Select the 1-based page to return
    pub fn page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    /// Rows per page
    pub fn per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page;
        self
    }

    /// Render the statement and its parameters
    pub fn build(&self) -> Result<(String, Vec<Value>)> {
        ensure_identifier(&self.table)?;
        ensure_identifier(&self.order_by)?;
        let columns = column_list(&self.columns)?;

        let direction = if self.descending { "DESC" } else { "ASC" };
        let page = self.page.max(1);
        let per_page = self.per_page.max(1);
        let offset = i64::from(page - 1) * i64::from(per_page);

        let sql = format!(
            "SELECT {} FROM {} ORDER BY {} {} LIMIT $1 OFFSET $2",
            columns, self.table, self.order_by, direction
        );
        Ok((sql, vec![Value::Int(i64::from(per_page)), Value::Int(offset)]))
    }
}

/// Prefix match over one column.
///
/// Builds `SELECT .. WHERE col LIKE $1 ESCAPE '!' ORDER BY col LIMIT $2`
/// with the escaped prefix pattern as a parameter.
#[derive(Debug, Clone)]
pub struct PrefixSearch {
    table: String,
    columns: Vec<String>,
    search_column: String,
    prefix: String,
    limit: u32,
}

impl PrefixSearch {
    /// Search `table` for rows whose `search_column` starts with
    /// `prefix`, returning `columns`, at most 20 rows
    pub fn new(table: &str, columns: &[&str], search_column: &str, prefix: &str) -> Self {
        PrefixSearch {
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            search_column: search_column.to_string(),
            prefix: prefix.to_string(),
            limit: 20,
        }
    }

    /// Cap the number of returned rows
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Render the statement and its parameters
    pub fn build(&self) -> Result<(String, Vec<Value>)> {
        ensure_identifier(&self.table)?;
        ensure_identifier(&self.search_column)?;
        let columns = column_list(&self.columns)?;

        let pattern = format!("{}%", escape_like_prefix(&self.prefix));
        let sql = format!(
            "SELECT {} FROM {} WHERE {} LIKE $1 ESCAPE '{}' ORDER BY {} LIMIT $2",
            columns, self.table, self.search_column, LIKE_ESCAPE, self.search_column
        );
        Ok((
            sql,
            vec![
                Value::Text(pattern),
                Value::Int(i64::from(self.limit.max(1))),
            ],
        ))
    }
}

/// Aggregate function applied by [`Aggregate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    /// Row count
    Count,
    /// Sum of a column
    Sum,
    /// Mean of a column
    Avg,
    /// Smallest value of a column
    Min,
    /// Largest value of a column
    Max,
}

impl AggregateFn {
    fn sql_name(self) -> &'static str {
        match self {
            AggregateFn::Count => "COUNT",
            AggregateFn::Sum => "SUM",
            AggregateFn::Avg => "AVG",
            AggregateFn::Min => "MIN",
            AggregateFn::Max => "MAX",
        }
    }
}

/// Single aggregate over a table, optionally grouped.
///
/// `COUNT` works without a column (`COUNT(*)`); every other function
/// requires one.
#[derive(Debug, Clone)]
pub struct Aggregate {
    table: String,
    function: AggregateFn,
    column: Option<String>,
    group_by: Option<String>,
}

impl Aggregate {
    /// Aggregate over `table`
    pub fn new(table: &str, function: AggregateFn) -> Self {
        Aggregate {
            table: table.to_string(),
            function,
            column: None,
            group_by: None,
        }
    }

    /// Column the function is applied to
    pub fn column(mut self, column: &str) -> Self {
        self.column = Some(column.to_string());
        self
    }

    /// Group results by a column, one output row per group
    pub fn group_by(mut self, column: &str) -> Self {
        self.group_by = Some(column.to_string());
        self
    }

    /// Render the statement and its parameters
    pub fn build(&self) -> Result<(String, Vec<Value>)> {
        ensure_identifier(&self.table)?;
        let target = match (&self.column, self.function) {
            (Some(column), _) => {
                ensure_identifier(column)?;
                column.as_str()
            }
            (None, AggregateFn::Count) => "*",
            (None, function) => {
                return Err(Error::Config(format!(
                    "{} requires a column",
                    function.sql_name()
                )))
            }
        };
        let call = format!("{}({})", self.function.sql_name(), target);

        let sql = match &self.group_by {
            Some(group) => {
                ensure_identifier(group)?;
                format!(
                    "SELECT {}, {} FROM {} GROUP BY {} ORDER BY {}",
                    group, call, self.table, group, group
                )
            }
            None => format!("SELECT {} FROM {}", call, self.table),
        };
        Ok((sql, Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_builds_expected_sql() {
        let (sql, params) = PagedListing::new("employees", &["id", "name"], "id")
            .page(3)
            .per_page(25)
            .build()
            .unwrap();

        assert_eq!(
            sql,
            "SELECT id, name FROM employees ORDER BY id ASC LIMIT $1 OFFSET $2"
        );
        assert_eq!(params, vec![Value::Int(25), Value::Int(50)]);
    }

    #[test]
    fn test_listing_descending() {
        let (sql, _) = PagedListing::new("payslips", &["id"], "issued_at")
            .descending()
            .build()
            .unwrap();

        assert!(sql.contains("ORDER BY issued_at DESC"));
    }

    #[test]
    fn test_listing_clamps_page_and_size() {
        let (_, params) = PagedListing::new("employees", &["id"], "id")
            .page(0)
            .per_page(0)
            .build()
            .unwrap();

        assert_eq!(params, vec![Value::Int(1), Value::Int(0)]);
    }

    #[test]
    fn test_listing_rejects_empty_columns() {
        let columns: [&str; 0] = [];
        let err = PagedListing::new("employees", &columns, "id")
            .build()
            .unwrap_err();

        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_identifier_rules() {
        assert!(ensure_identifier("employees").is_ok());
        assert!(ensure_identifier("pay_run_2024").is_ok());
        assert!(ensure_identifier("_hidden").is_ok());
        assert!(ensure_identifier("").is_err());
        assert!(ensure_identifier("2fast").is_err());
        assert!(ensure_identifier("users; DROP TABLE x").is_err());
        assert!(ensure_identifier("name\"").is_err());
    }

    #[test]
    fn test_injection_attempt_rejected() {
        let err = PagedListing::new("employees", &["id"], "id; DELETE FROM employees")
            .build()
            .unwrap_err();

        assert!(matches!(err, Error::Identifier(_)));
    }

    #[test]
    fn test_escape_like_prefix() {
        assert_eq!(escape_like_prefix("plain"), "plain");
        assert_eq!(escape_like_prefix("50%_off!x"), "50!%!_off!!x");
    }

    #[test]
    fn test_search_sql_shape() {
        let (sql, params) = PrefixSearch::new("employees", &["id", "name"], "name", "Mi")
            .limit(5)
            .build()
            .unwrap();

        assert_eq!(
            sql,
            "SELECT id, name FROM employees WHERE name LIKE $1 ESCAPE '!' ORDER BY name LIMIT $2"
        );
        assert_eq!(
            params,
            vec![Value::Text("Mi%".to_string()), Value::Int(5)]
        );
    }

    #[test]
    fn test_search_escapes_user_prefix() {
        let (_, params) = PrefixSearch::new("employees", &["id"], "name", "100%")
            .build()
            .unwrap();

        assert_eq!(params[0], Value::Text("100!%%".to_string()));
    }

    #[test]
    fn test_aggregate_count_star() {
        let (sql, params) = Aggregate::new("employees", AggregateFn::Count)
            .build()
            .unwrap();

        assert_eq!(sql, "SELECT COUNT(*) FROM employees");
        assert!(params.is_empty());
    }

    #[test]
    fn test_aggregate_grouped() {
        let (sql, _) = Aggregate::new("payslips", AggregateFn::Sum)
            .column("gross")
            .group_by("department")
            .build()
            .unwrap();

        assert_eq!(
            sql,
            "SELECT department, SUM(gross) FROM payslips GROUP BY department ORDER BY department"
        );
    }

    #[test]
    fn test_aggregate_needs_column() {
        let err = Aggregate::new("payslips", AggregateFn::Sum)
            .build()
            .unwrap_err();

        assert!(matches!(err, Error::Config(_)));
    }
}
