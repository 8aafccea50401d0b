//! Vendor catalog boundary.
//!
//! A [`VendorAdapter`] is the only component that talks to a vendor and the
//! only one that understands its payloads. The resolution engine hands it
//! identifiers and query terms and gets raw JSON back, which the same adapter
//! later turns into [`ProductRecord`]s.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SearchError;
use crate::filters::FilterSpec;

/// Canonical product shape returned by every search mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub mpn: String,
    pub url: String,
    /// Vendor column name → raw value, in vendor column order.
    pub details: IndexMap<String, Value>,
}

#[async_trait]
pub trait VendorAdapter: Send + Sync {
    /// Short vendor name, used in logs and cache identities.
    fn name(&self) -> &str;

    /// Raw category hierarchy payload.
    async fn category_tree(&self) -> Result<Value, SearchError>;

    /// Filters available in a category, with their selectable values.
    async fn filter_schema(&self, category_id: &str) -> Result<Vec<FilterSpec>, SearchError>;

    /// Vendor-native lookup of the category a part number belongs to.
    /// `Ok(None)` when the vendor does not know the part.
    async fn locate_part(&self, mpn: &str) -> Result<Option<String>, SearchError>;

    /// Run a parametric query.
    async fn fetch(&self, category_id: &str, terms: &[String]) -> Result<Value, SearchError>;

    /// Look up one part number inside a category.
    async fn fetch_part(&self, category_id: &str, mpn: &str) -> Result<Value, SearchError>;

    /// Find this vendor's equivalents of a competitor part.
    async fn fetch_cross_reference(
        &self,
        xref_category_id: &str,
        competitor_mpn: &str,
    ) -> Result<Value, SearchError>;

    /// Normalize a raw payload, keeping at most `max_results` records.
    fn format(
        &self,
        raw: &Value,
        max_results: Option<usize>,
    ) -> Result<Vec<ProductRecord>, SearchError>;
}

// ============================================================================
// Mock Implementation (Test Only)
// ============================================================================

/// One call made against [`MockVendor`].
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VendorCall {
    Fetch {
        category_id: String,
        terms: Vec<String>,
    },
    FetchPart {
        category_id: String,
        mpn: String,
    },
    FetchCrossReference {
        xref_category_id: String,
        competitor_mpn: String,
    },
}

/// In-memory vendor. Every fetch returns the configured products as
/// `{"products": [...]}` and is recorded for inspection.
#[cfg(test)]
pub struct MockVendor {
    tree: Value,
    schemas: std::collections::HashMap<String, Vec<FilterSpec>>,
    parts: std::collections::HashMap<String, String>,
    products: Vec<ProductRecord>,
    fetch_error: Option<String>,
    tree_fetches: std::sync::atomic::AtomicUsize,
    schema_fetches: std::sync::atomic::AtomicUsize,
    calls: std::sync::Mutex<Vec<VendorCall>>,
}

#[cfg(test)]
impl MockVendor {
    pub fn new(tree: Value) -> Self {
        Self {
            tree,
            schemas: Default::default(),
            parts: Default::default(),
            products: Vec::new(),
            fetch_error: None,
            tree_fetches: Default::default(),
            schema_fetches: Default::default(),
            calls: Default::default(),
        }
    }

    pub fn with_schema(mut self, category_id: &str, specs: Vec<FilterSpec>) -> Self {
        self.schemas.insert(category_id.to_string(), specs);
        self
    }

    /// Make [`locate_part`](VendorAdapter::locate_part) know `mpn`.
    pub fn with_part(mut self, mpn: &str, category_id: &str) -> Self {
        self.parts.insert(mpn.to_string(), category_id.to_string());
        self
    }

    pub fn with_products(mut self, mpns: &[&str]) -> Self {
        self.products = mpns
            .iter()
            .map(|mpn| ProductRecord {
                mpn: mpn.to_string(),
                url: format!("https://vendor.test/{mpn}"),
                details: IndexMap::from([("partnumber".to_string(), Value::from(*mpn))]),
            })
            .collect();
        self
    }

    /// Fail every fetch with a transport error.
    pub fn with_fetch_error(mut self, message: &str) -> Self {
        self.fetch_error = Some(message.to_string());
        self
    }

    pub fn tree_fetches(&self) -> usize {
        self.tree_fetches.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn schema_fetches(&self) -> usize {
        self.schema_fetches.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<VendorCall> {
        self.calls.lock().unwrap().clone()
    }

    fn respond(&self, call: VendorCall) -> Result<Value, SearchError> {
        self.calls.lock().unwrap().push(call);
        if let Some(message) = &self.fetch_error {
            return Err(SearchError::Transport(message.clone()));
        }
        Ok(serde_json::json!({ "products": self.products }))
    }
}

#[cfg(test)]
#[async_trait]
impl VendorAdapter for MockVendor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn category_tree(&self) -> Result<Value, SearchError> {
        self.tree_fetches
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(self.tree.clone())
    }

    async fn filter_schema(&self, category_id: &str) -> Result<Vec<FilterSpec>, SearchError> {
        self.schema_fetches
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(self.schemas.get(category_id).cloned().unwrap_or_default())
    }

    async fn locate_part(&self, mpn: &str) -> Result<Option<String>, SearchError> {
        Ok(self.parts.get(mpn).cloned())
    }

    async fn fetch(&self, category_id: &str, terms: &[String]) -> Result<Value, SearchError> {
        self.respond(VendorCall::Fetch {
            category_id: category_id.to_string(),
            terms: terms.to_vec(),
        })
    }

    async fn fetch_part(&self, category_id: &str, mpn: &str) -> Result<Value, SearchError> {
        self.respond(VendorCall::FetchPart {
            category_id: category_id.to_string(),
            mpn: mpn.to_string(),
        })
    }

    async fn fetch_cross_reference(
        &self,
        xref_category_id: &str,
        competitor_mpn: &str,
    ) -> Result<Value, SearchError> {
        self.respond(VendorCall::FetchCrossReference {
            xref_category_id: xref_category_id.to_string(),
            competitor_mpn: competitor_mpn.to_string(),
        })
    }

    fn format(
        &self,
        raw: &Value,
        max_results: Option<usize>,
    ) -> Result<Vec<ProductRecord>, SearchError> {
        let products = raw
            .get("products")
            .cloned()
            .ok_or_else(|| SearchError::Parse("missing products".into()))?;
        let mut records: Vec<ProductRecord> =
            serde_json::from_value(products).map_err(|e| SearchError::Parse(e.to_string()))?;
        if let Some(max) = max_results {
            records.truncate(max);
        }
        Ok(records)
    }
}
