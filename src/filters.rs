//! Filter schemas and criterion resolution.
//!
//! Turns vendor-agnostic criteria into [`ResolvedFilter`]s for one category:
//!
//! - **Structured** criteria (`{"Capacitance": {"min": 1, "max": 1.1}}`) map
//!   all labels onto filter ids in one reasoning question, then resolve each
//!   value against the filter's selectable list.
//! - **Free-text** criteria (`"no more than 10pF"`) are decomposed into
//!   filter assertions by the reasoning service.
//!
//! Filters that cannot be resolved are skipped. Deciding whether an empty
//! result is acceptable is left to the
//! [`QueryAssembler`](crate::query::QueryAssembler).

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, CallSignature};
use crate::error::SearchError;
use crate::reasoning::{FilterAssertion, LabelMapping, Pick, ReasoningResolver, match_key};
use crate::vendor::VendorAdapter;

// ============================================================================
// Data Model
// ============================================================================

/// One filterable attribute of a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub filter_id: String,
    pub label: String,
    /// Selectable values. Empty for free-text and numeric filters.
    #[serde(default)]
    pub values: Vec<String>,
}

/// Value supplied for one labelled criterion.
#[derive(Debug, Clone, PartialEq)]
pub enum CriterionValue {
    Range {
        min: Option<Value>,
        max: Option<Value>,
    },
    List(Vec<Value>),
    Scalar(Value),
}

impl CriterionValue {
    /// Classify a raw JSON value: objects with `min` or `max` are ranges,
    /// arrays are lists, anything else is a scalar.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(mut map) if map.contains_key("min") || map.contains_key("max") => {
                Self::Range {
                    min: map.remove("min"),
                    max: map.remove("max"),
                }
            }
            Value::Array(items) => Self::List(items),
            other => Self::Scalar(other),
        }
    }
}

/// Search criteria for one parametric search. Exactly one shape per call.
#[derive(Debug, Clone, PartialEq)]
pub enum Criteria {
    /// Human filter label → value.
    Structured(IndexMap<String, CriterionValue>),
    /// Free-text description.
    FreeText(String),
}

impl Criteria {
    /// Parse criteria JSON.
    ///
    /// An object whose only key is `"details"` holding a string is free
    /// text; any other object is structured.
    pub fn from_json(value: Value) -> Result<Self, SearchError> {
        let Value::Object(map) = value else {
            return Err(SearchError::Parse(
                "criteria must be a JSON object".to_string(),
            ));
        };

        if map.len() == 1 {
            if let Some(Value::String(details)) = map.get("details") {
                return Ok(Self::FreeText(details.clone()));
            }
        }

        Ok(Self::Structured(
            map.into_iter()
                .map(|(label, value)| (label, CriterionValue::from_json(value)))
                .collect(),
        ))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Structured(map) => map.is_empty(),
            Self::FreeText(text) => text.trim().is_empty(),
        }
    }
}

/// A typed filter value, resolved once and carried to query assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    /// Verbatim value for a filter without a selectable list.
    Single(String),
    /// Bounds, either of which may be absent.
    Range {
        min: Option<String>,
        max: Option<String>,
    },
    /// An entry chosen from the filter's selectable list.
    Enumerated(String),
}

/// A filter id with its resolved value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFilter {
    pub filter_id: String,
    pub value: FilterValue,
}

impl ResolvedFilter {
    pub fn single(filter_id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            filter_id: filter_id.into(),
            value: FilterValue::Single(value.into()),
        }
    }

    pub fn range(filter_id: impl Into<String>, min: Option<String>, max: Option<String>) -> Self {
        Self {
            filter_id: filter_id.into(),
            value: FilterValue::Range { min, max },
        }
    }

    pub fn enumerated(filter_id: impl Into<String>, choice: impl Into<String>) -> Self {
        Self {
            filter_id: filter_id.into(),
            value: FilterValue::Enumerated(choice.into()),
        }
    }
}

/// Render a JSON scalar the way vendors expect it in query terms.
pub fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn bound(value: Option<&Value>) -> Option<String> {
    value.map(scalar_to_string).filter(|s| !s.is_empty())
}

// ============================================================================
// Filter Schema Resolver
// ============================================================================

/// Fetches filter schemas and resolves criteria against them.
pub struct FilterSchemaResolver {
    adapter: Arc<dyn VendorAdapter>,
    reasoner: Arc<ReasoningResolver>,
    cache: CacheStore,
}

impl FilterSchemaResolver {
    pub fn new(
        adapter: Arc<dyn VendorAdapter>,
        reasoner: Arc<ReasoningResolver>,
        cache: CacheStore,
    ) -> Self {
        Self {
            adapter,
            reasoner,
            cache,
        }
    }

    /// The filter schema for `category_id`, memoized per category.
    pub async fn schema(&self, category_id: &str) -> Result<Vec<FilterSpec>, SearchError> {
        let signature =
            CallSignature::new(format!("{}_filter_schema", self.adapter.name())).arg(category_id);
        if let Some(specs) = self.cache.read::<Vec<FilterSpec>>(&signature) {
            return Ok(specs);
        }

        info!(category_id, "Fetching filter schema");
        let specs = self.adapter.filter_schema(category_id).await?;
        if !specs.is_empty() {
            self.cache.write(&signature, &specs);
        }
        Ok(specs)
    }

    /// Resolve `criteria` against `specs`. Unresolvable criteria are skipped.
    pub async fn resolve(&self, specs: &[FilterSpec], criteria: &Criteria) -> Vec<ResolvedFilter> {
        let filters = match criteria {
            Criteria::Structured(map) => self.resolve_structured(specs, map).await,
            Criteria::FreeText(text) => self.resolve_free_text(specs, text).await,
        };
        info!(count = filters.len(), "Resolved filters");
        filters
    }

    async fn resolve_structured(
        &self,
        specs: &[FilterSpec],
        criteria: &IndexMap<String, CriterionValue>,
    ) -> Vec<ResolvedFilter> {
        let labels: Vec<String> = criteria.keys().cloned().collect();
        let mappings = match self.reasoner.map_filter_labels(specs, &labels).await {
            Some(mappings) => mappings,
            None => match_labels(specs, &labels),
        };

        let mut filters = Vec::new();
        let mut handled = HashSet::new();
        for mapping in mappings {
            let Some(spec) = find_spec(specs, &mapping.filter_id) else {
                warn!(filter_id = %mapping.filter_id, "Mapped filter id is not in the schema");
                continue;
            };
            let Some((label, value)) = lookup_criterion(criteria, &mapping.filter_label) else {
                debug!(label = %mapping.filter_label, "Mapped label is not among the criteria");
                continue;
            };
            if !handled.insert(label.clone()) {
                continue;
            }

            match value {
                CriterionValue::Range { min, max } => {
                    let (min, max) = (bound(min.as_ref()), bound(max.as_ref()));
                    if min.is_none() && max.is_none() {
                        info!(%label, "Range criterion has no bounds");
                        continue;
                    }
                    filters.push(ResolvedFilter::range(&spec.filter_id, min, max));
                }
                CriterionValue::List(items) => {
                    for item in items {
                        filters.extend(self.resolve_scalar(spec, item).await);
                    }
                }
                CriterionValue::Scalar(item) => {
                    filters.extend(self.resolve_scalar(spec, item).await);
                }
            }
        }
        filters
    }

    async fn resolve_free_text(&self, specs: &[FilterSpec], description: &str) -> Vec<ResolvedFilter> {
        let Some(assertions) = self.reasoner.decompose_description(specs, description).await
        else {
            warn!("Free-text criteria could not be decomposed");
            return Vec::new();
        };

        let mut filters = Vec::new();
        for assertion in assertions {
            let Some(spec) = find_spec(specs, &assertion.filter_id) else {
                warn!(filter_id = %assertion.filter_id, "Decomposed filter id is not in the schema");
                continue;
            };
            filters.extend(self.resolve_assertion(spec, &assertion).await);
        }
        filters
    }

    async fn resolve_assertion(
        &self,
        spec: &FilterSpec,
        assertion: &FilterAssertion,
    ) -> Option<ResolvedFilter> {
        if assertion.is_range() {
            let min = bound(assertion.min.as_ref());
            let max = bound(assertion.max.as_ref());
            if min.is_some() || max.is_some() {
                return Some(ResolvedFilter::range(&spec.filter_id, min, max));
            }
        }

        // Bounds empty or absent: the single value, if any, applies.
        let value = assertion.value.as_ref()?;
        self.resolve_scalar(spec, value).await
    }

    /// Resolve one scalar against a filter's selectable list.
    async fn resolve_scalar(&self, spec: &FilterSpec, value: &Value) -> Option<ResolvedFilter> {
        let wanted = scalar_to_string(value);
        if wanted.is_empty() {
            return None;
        }
        if spec.values.is_empty() {
            return Some(ResolvedFilter::single(&spec.filter_id, wanted));
        }

        let choice = match self.reasoner.pick_value(&spec.values, &wanted).await {
            Pick::Match(choice) => {
                let canonical = canonical_value(&spec.values, &choice);
                if canonical.is_none() {
                    warn!(filter_id = %spec.filter_id, %choice, "Chosen value is not selectable");
                }
                canonical
            }
            Pick::NoMatch => None,
            Pick::Unavailable => canonical_value(&spec.values, &wanted),
        };

        match choice {
            Some(choice) => Some(ResolvedFilter::enumerated(&spec.filter_id, choice)),
            None => {
                info!(filter_id = %spec.filter_id, %wanted, "No most likely value found");
                None
            }
        }
    }
}

fn find_spec<'a>(specs: &'a [FilterSpec], filter_id: &str) -> Option<&'a FilterSpec> {
    specs.iter().find(|s| s.filter_id == filter_id)
}

/// Exact label first, then the loose [`match_key`] comparison.
fn lookup_criterion<'a>(
    criteria: &'a IndexMap<String, CriterionValue>,
    label: &str,
) -> Option<(&'a String, &'a CriterionValue)> {
    criteria.get_key_value(label).or_else(|| {
        let wanted = match_key(label);
        criteria.iter().find(|(k, _)| match_key(k) == wanted)
    })
}

/// The list entry equal to `wanted` under [`match_key`].
fn canonical_value(values: &[String], wanted: &str) -> Option<String> {
    if let Some(exact) = values.iter().find(|v| v.as_str() == wanted) {
        return Some(exact.clone());
    }
    let key = match_key(wanted);
    values.iter().find(|v| match_key(v) == key).cloned()
}

/// Deterministic label → filter id mapping used without a reasoning service.
fn match_labels(specs: &[FilterSpec], labels: &[String]) -> Vec<LabelMapping> {
    labels
        .iter()
        .filter_map(|label| {
            let key = match_key(label);
            specs
                .iter()
                .find(|s| match_key(&s.label) == key)
                .map(|s| LabelMapping {
                    filter_id: s.filter_id.clone(),
                    filter_label: label.clone(),
                })
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
