//! Error types for the partfinder crate.

use thiserror::Error;

/// A required identifier could not be matched.
///
/// Always surfaced to the caller. Distinct from a search that succeeded
/// and found zero products.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolutionFailure {
    /// No category in the tree matches the requested name.
    #[error("no category id found for {category}{}", subcategory_suffix(.subcategory))]
    CategoryNotFound {
        category: String,
        subcategory: Option<String>,
    },

    /// No cross-reference category matches the requested path.
    #[error("no cross-reference category id found for {}", .path.join(" > "))]
    CrossReferenceCategoryNotFound { path: Vec<String> },

    /// Criteria were supplied but none of them resolved to a filter.
    #[error("criteria provided but no valid filters could be determined for category {category_id}")]
    NoFiltersResolved { category_id: String },
}

fn subcategory_suffix(subcategory: &Option<String>) -> String {
    match subcategory {
        Some(sub) => format!(" / {sub}"),
        None => String::new(),
    }
}

/// Errors returned by the resolution pipeline and vendor adapters.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Category, filter or value resolution failed.
    #[error(transparent)]
    Resolution(#[from] ResolutionFailure),

    /// Network error or non-success status from a remote endpoint.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A remote payload did not have the expected shape.
    #[error("Parse error: {0}")]
    Parse(String),
}

impl SearchError {
    /// Whether this error must be reported to the caller rather than
    /// degraded to an empty result list.
    pub fn is_resolution_failure(&self) -> bool {
        matches!(self, Self::Resolution(_))
    }
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}
