//! Cache category namespaces
//!
//! Every entry lives under exactly one category. Categories map to fixed
//! subdirectories of the cache root so operational tooling can inspect or
//! clear one class of entries without touching the rest.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Namespace a cache entry is stored under
///
/// The set is closed on purpose: callers pick one of the known categories
/// instead of passing free-form directory names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Cached result sets from database queries
    Queries,

    /// Cached API responses keyed by endpoint and user
    Api,

    /// Per-user profile and session data
    Users,

    /// Rendered dashboard widget payloads
    Dashboard,

    /// Payloads prepared for mobile clients
    Mobile,

    /// Everything that does not fit the other categories
    General,
}

impl Category {
    /// All categories, in directory order
    pub const ALL: [Category; 6] = [
        Category::Queries,
        Category::Api,
        Category::Users,
        Category::Dashboard,
        Category::Mobile,
        Category::General,
    ];

    /// Subdirectory name under the cache root
    pub fn dir_name(self) -> &'static str {
        match self {
            Category::Queries => "queries",
            Category::Api => "api",
            Category::Users => "users",
            Category::Dashboard => "dashboard",
            Category::Mobile => "mobile",
            Category::General => "general",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queries" => Ok(Category::Queries),
            "api" => Ok(Category::Api),
            "users" => Ok(Category::Users),
            "dashboard" => Ok(Category::Dashboard),
            "mobile" => Ok(Category::Mobile),
            "general" => Ok(Category::General),
            other => Err(UnknownCategory(other.to_string())),
        }
    }
}

/// Error returned when a category name is not recognized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCategory(pub String);

impl fmt::Display for UnknownCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown cache category: {}", self.0)
    }
}

impl std::error::Error for UnknownCategory {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_round_trip_all_categories() {
        for cat in Category::ALL {
            let parsed: Category = cat.dir_name().parse().unwrap();
            assert_eq!(parsed, cat);
        }
    }

    #[test]
    fn test_unknown_category_rejected() {
        let err = "sessions".parse::<Category>().unwrap_err();
        assert_eq!(err, UnknownCategory("sessions".to_string()));
    }

    #[test]
    fn test_dir_names_are_unique() {
        let names: HashSet<&str> = Category::ALL.iter().map(|c| c.dir_name()).collect();
        assert_eq!(names.len(), Category::ALL.len());
    }

    #[test]
    fn test_serde_uses_dir_names() {
        let json = serde_json::to_string(&Category::Dashboard).unwrap();
        assert_eq!(json, "\"dashboard\"");
    }
}
