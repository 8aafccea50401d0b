//! The parameter resolution engine.
//!
//! Holds one vendor adapter and the resolvers built around it, and exposes
//! the resolution stages the search modes compose: category lookup, part
//! number classification, and query building. Every stage awaits the
//! previous one; nothing runs concurrently.

use std::sync::Arc;

use tracing::{info, warn};

use crate::category::{
    CategoryTree, CategoryTreeProvider, resolve_category_id, resolve_xref_category_id,
};
use crate::error::{ResolutionFailure, SearchError};
use crate::filters::{Criteria, FilterSchemaResolver};
use crate::query::{QueryAssembler, VendorQuery};
use crate::reasoning::ReasoningResolver;
use crate::vendor::VendorAdapter;

pub struct ResolutionEngine {
    adapter: Arc<dyn VendorAdapter>,
    reasoner: Arc<ReasoningResolver>,
    categories: CategoryTreeProvider,
    filters: FilterSchemaResolver,
}

impl ResolutionEngine {
    /// Build an engine. Vendor data is memoized in the reasoner's cache
    /// directory alongside the reasoning answers.
    pub fn new(adapter: Arc<dyn VendorAdapter>, reasoner: ReasoningResolver) -> Self {
        let cache = reasoner.cache().clone();
        let reasoner = Arc::new(reasoner);
        Self {
            categories: CategoryTreeProvider::new(adapter.clone(), cache.clone()),
            filters: FilterSchemaResolver::new(adapter.clone(), reasoner.clone(), cache),
            adapter,
            reasoner,
        }
    }

    pub fn adapter(&self) -> &dyn VendorAdapter {
        self.adapter.as_ref()
    }

    pub fn reasoner(&self) -> &ReasoningResolver {
        &self.reasoner
    }

    pub async fn category_tree(&self) -> Result<Arc<CategoryTree>, SearchError> {
        self.categories.tree().await
    }

    /// Forget the memoized category tree.
    pub async fn invalidate_category_tree(&self) {
        self.categories.invalidate().await;
    }

    pub async fn resolve_category(
        &self,
        category: &str,
        subcategory: Option<&str>,
    ) -> Result<String, SearchError> {
        let tree = self.category_tree().await?;
        resolve_category_id(&self.reasoner, &tree, category, subcategory).await
    }

    /// Resolve a classified path: the first name is the category, the
    /// second (if any) the subcategory.
    pub async fn resolve_category_path(&self, path: &[String]) -> Result<String, SearchError> {
        let Some((category, rest)) = path.split_first() else {
            return Err(ResolutionFailure::CategoryNotFound {
                category: String::new(),
                subcategory: None,
            }
            .into());
        };
        self.resolve_category(category, rest.first().map(String::as_str))
            .await
    }

    pub async fn resolve_xref_category(&self, path: &[String]) -> Result<String, SearchError> {
        let tree = self.category_tree().await?;
        resolve_xref_category_id(&self.reasoner, &tree, path).await
    }

    /// Classify a part number into a category path.
    ///
    /// The tree is only fetched when a reasoning service can use its
    /// top-level names.
    pub async fn classify_part_number(&self, mpn: &str) -> Result<Vec<String>, SearchError> {
        let available = if self.reasoner.is_configured() {
            self.category_tree().await?.top_level_names()
        } else {
            Vec::new()
        };
        let path = self.reasoner.classify_part_number(mpn, &available).await;
        info!(mpn, ?path, "Classified part number");
        Ok(path)
    }

    /// Locate a part's category: the vendor's own lookup first, then
    /// classification and category resolution.
    pub async fn locate_part(&self, mpn: &str) -> Result<String, SearchError> {
        match self.adapter.locate_part(mpn).await {
            Ok(Some(category_id)) => {
                info!(mpn, %category_id, "Vendor located part");
                return Ok(category_id);
            }
            Ok(None) => info!(mpn, "Vendor does not know part, classifying"),
            Err(e) => warn!(mpn, "Vendor part lookup failed, classifying: {e}"),
        }

        let path = self.classify_part_number(mpn).await?;
        self.resolve_category_path(&path).await
    }

    /// Resolve `criteria` for `category_id` and assemble the vendor query.
    ///
    /// Missing or empty criteria give an unfiltered query without fetching
    /// the filter schema.
    pub async fn build_query(
        &self,
        category_id: &str,
        criteria: Option<&Criteria>,
    ) -> Result<VendorQuery, SearchError> {
        let filters = match criteria {
            Some(criteria) if !criteria.is_empty() => {
                let specs = self.filters.schema(category_id).await?;
                self.filters.resolve(&specs, criteria).await
            }
            _ => Vec::new(),
        };
        QueryAssembler::assemble(category_id, criteria, &filters)
    }
}

// ============================================================================
// Tests
// ============================================================================
