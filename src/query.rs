//! Vendor query assembly.

use std::collections::HashSet;

use tracing::info;

use crate::error::{ResolutionFailure, SearchError};
use crate::filters::{Criteria, FilterValue, ResolvedFilter};

impl ResolvedFilter {
    /// Native query term: `id;value` or `id;min|max` with absent bounds empty.
    pub fn to_term(&self) -> String {
        match &self.value {
            FilterValue::Single(value) | FilterValue::Enumerated(value) => {
                format!("{};{}", self.filter_id, value)
            }
            FilterValue::Range { min, max } => format!(
                "{};{}|{}",
                self.filter_id,
                min.as_deref().unwrap_or_default(),
                max.as_deref().unwrap_or_default()
            ),
        }
    }
}

/// A category plus the query terms to send with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorQuery {
    pub category_id: String,
    pub terms: Vec<String>,
}

/// Turns resolved filters into a [`VendorQuery`].
pub struct QueryAssembler;

impl QueryAssembler {
    /// Assemble the query for `category_id`.
    ///
    /// Fails with [`ResolutionFailure::NoFiltersResolved`] when non-empty
    /// criteria produced no filters. Repeated terms keep the first occurrence.
    pub fn assemble(
        category_id: &str,
        criteria: Option<&Criteria>,
        filters: &[ResolvedFilter],
    ) -> Result<VendorQuery, SearchError> {
        let has_criteria = criteria.is_some_and(|c| !c.is_empty());
        if has_criteria && filters.is_empty() {
            return Err(ResolutionFailure::NoFiltersResolved {
                category_id: category_id.to_string(),
            }
            .into());
        }

        let mut seen = HashSet::new();
        let terms: Vec<String> = filters
            .iter()
            .map(ResolvedFilter::to_term)
            .filter(|term| seen.insert(term.clone()))
            .collect();

        info!(category_id, ?terms, "Assembled vendor query");
        Ok(VendorQuery {
            category_id: category_id.to_string(),
            terms,
        })
    }
}
