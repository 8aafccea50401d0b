//! Vendor category tree and category resolution.
//!
//! Vendors publish their category hierarchy in assorted shapes. The tree is
//! simplified once per session down to [`CategoryNode`]s holding only a
//! name, an id, an optional cross-reference id and children, then memoized
//! on disk until invalidated by hand.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::cache::{CacheStore, CallSignature};
use crate::error::{ResolutionFailure, SearchError};
use crate::reasoning::{Pick, ReasoningResolver, match_key};
use crate::vendor::VendorAdapter;

// ============================================================================
// Data Model
// ============================================================================

/// A single vendor category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryNode {
    pub name: String,
    pub category_id: String,
    #[serde(
        rename = "xrefcategory_id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub xref_category_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<CategoryNode>,
}

/// The simplified vendor hierarchy. Category ids are unique across the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryTree {
    roots: Vec<CategoryNode>,
}

const NAME_FIELDS: &[&str] = &["name", "title", "label", "cate_name", "catename"];
const ID_FIELDS: &[&str] = &["category_id", "categoryId", "cateid", "cate", "id"];
const XREF_FIELDS: &[&str] = &[
    "xrefcategory_id",
    "xref_category_id",
    "xrefCategoryId",
    "xrefcateid",
];
const CHILD_FIELDS: &[&str] = &["children", "subcategories", "categories", "child", "items"];
const WRAPPER_FIELDS: &[&str] = &["categories", "children", "Result", "data", "items"];

impl CategoryTree {
    pub fn new(roots: Vec<CategoryNode>) -> Self {
        Self { roots }
    }

    /// Simplify a raw vendor payload into a tree.
    ///
    /// Accepts a list of nodes or an object wrapping one. Field names are
    /// matched against the common spellings vendors use. Nodes without an id
    /// are dropped but their children are kept; repeated ids keep the first
    /// occurrence.
    pub fn from_payload(raw: &Value) -> Result<Self, SearchError> {
        let nodes = top_level_nodes(raw).ok_or_else(|| {
            SearchError::Parse("category tree payload has no category list".into())
        })?;

        let mut seen = HashSet::new();
        let roots = simplify_nodes(nodes, &mut seen);
        if roots.is_empty() {
            return Err(SearchError::Parse(
                "category tree payload contained no categories".into(),
            ));
        }
        Ok(Self { roots })
    }

    pub fn roots(&self) -> &[CategoryNode] {
        &self.roots
    }

    /// All nodes in depth-first pre-order.
    pub fn nodes(&self) -> Vec<&CategoryNode> {
        let mut out = Vec::new();
        let mut stack: Vec<&CategoryNode> = self.roots.iter().rev().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children.iter().rev());
        }
        out
    }

    pub fn len(&self) -> usize {
        self.nodes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn find(&self, category_id: &str) -> Option<&CategoryNode> {
        self.nodes().into_iter().find(|n| n.category_id == category_id)
    }

    pub fn find_by_xref(&self, xref_category_id: &str) -> Option<&CategoryNode> {
        self.nodes()
            .into_iter()
            .find(|n| n.xref_category_id.as_deref() == Some(xref_category_id))
    }

    /// Walk the tree by name, ignoring case and punctuation.
    ///
    /// The first name may match a node at any depth; each following name
    /// must match a descendant of the previous match.
    pub fn find_by_path(&self, path: &[&str]) -> Option<&CategoryNode> {
        let (first, rest) = path.split_first()?;
        let mut current = find_named(self.nodes(), first)?;
        for name in rest {
            let descendants = CategoryTree::new(current.children.clone());
            let next = find_named(descendants.nodes(), name)?;
            current = self.find(&next.category_id)?;
        }
        Some(current)
    }

    pub fn top_level_names(&self) -> Vec<String> {
        self.roots.iter().map(|n| n.name.clone()).collect()
    }

    /// Pretty JSON embedded in reasoning prompts.
    pub fn to_prompt_json(&self) -> String {
        serde_json::to_string_pretty(&self.roots).unwrap_or_else(|_| "[]".into())
    }
}

fn find_named<'a>(nodes: Vec<&'a CategoryNode>, name: &str) -> Option<&'a CategoryNode> {
    let wanted = match_key(name);
    nodes.into_iter().find(|n| match_key(&n.name) == wanted)
}

fn top_level_nodes(raw: &Value) -> Option<&Vec<Value>> {
    match raw {
        Value::Array(items) => Some(items),
        Value::Object(map) => WRAPPER_FIELDS
            .iter()
            .filter_map(|field| map.get(*field))
            .find_map(top_level_nodes),
        _ => None,
    }
}

fn simplify_nodes(items: &[Value], seen: &mut HashSet<String>) -> Vec<CategoryNode> {
    let mut out = Vec::new();
    for item in items {
        let Some(map) = item.as_object() else {
            continue;
        };

        let children = CHILD_FIELDS
            .iter()
            .find_map(|field| map.get(*field).and_then(Value::as_array))
            .map(|items| simplify_nodes(items, seen))
            .unwrap_or_default();

        let name = first_string(map, NAME_FIELDS);
        let id = first_string(map, ID_FIELDS);

        match (name, id) {
            (Some(name), Some(id)) => {
                if !seen.insert(id.clone()) {
                    warn!(category_id = %id, "Duplicate category id in tree payload, keeping first");
                    out.extend(children);
                    continue;
                }
                out.push(CategoryNode {
                    name,
                    category_id: id,
                    xref_category_id: first_string(map, XREF_FIELDS),
                    children,
                });
            }
            _ => out.extend(children),
        }
    }
    out
}

fn first_string(map: &serde_json::Map<String, Value>, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|field| match map.get(*field)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

// ============================================================================
// Tree Provider
// ============================================================================

/// Fetches the vendor tree once per session and memoizes it on disk.
pub struct CategoryTreeProvider {
    adapter: Arc<dyn VendorAdapter>,
    cache: CacheStore,
    session: RwLock<Option<Arc<CategoryTree>>>,
}

impl CategoryTreeProvider {
    pub fn new(adapter: Arc<dyn VendorAdapter>, cache: CacheStore) -> Self {
        Self {
            adapter,
            cache,
            session: RwLock::new(None),
        }
    }

    fn signature(&self) -> CallSignature {
        CallSignature::new(format!("{}_category_tree", self.adapter.name()))
    }

    /// The current tree, from memory, disk, or the vendor in that order.
    pub async fn tree(&self) -> Result<Arc<CategoryTree>, SearchError> {
        {
            let session = self.session.read().await;
            if let Some(tree) = session.as_ref() {
                return Ok(tree.clone());
            }
        }

        let signature = self.signature();
        let tree = match self.cache.read::<CategoryTree>(&signature) {
            Some(tree) if !tree.is_empty() => tree,
            _ => {
                info!(vendor = self.adapter.name(), "Fetching category tree");
                let raw = self.adapter.category_tree().await?;
                let tree = CategoryTree::from_payload(&raw)?;
                self.cache.write(&signature, &tree);
                tree
            }
        };

        let tree = Arc::new(tree);
        *self.session.write().await = Some(tree.clone());
        Ok(tree)
    }

    /// Drop the memoized tree so the next lookup refetches it.
    pub async fn invalidate(&self) {
        *self.session.write().await = None;
        self.cache.invalidate(&self.signature());
    }
}

// ============================================================================
// Category Resolution
// ============================================================================

/// Resolve a human category (and optional subcategory) to a category id.
///
/// A `"None"` answer, or an answer naming an id absent from the tree, is a
/// [`ResolutionFailure::CategoryNotFound`]. When the reasoning service is
/// unavailable the names are matched against the tree directly.
pub async fn resolve_category_id(
    reasoner: &ReasoningResolver,
    tree: &CategoryTree,
    category: &str,
    subcategory: Option<&str>,
) -> Result<String, SearchError> {
    let not_found = || ResolutionFailure::CategoryNotFound {
        category: category.to_string(),
        subcategory: subcategory.map(str::to_string),
    };

    match reasoner.pick_category_id(tree, category, subcategory).await {
        Pick::Match(id) => {
            if tree.find(&id).is_some() {
                info!(category_id = %id, "Category resolved");
                Ok(id)
            } else {
                warn!(category_id = %id, "Answered category id is not in the tree");
                Err(not_found().into())
            }
        }
        Pick::NoMatch => Err(not_found().into()),
        Pick::Unavailable => {
            let mut path = vec![category];
            path.extend(subcategory);
            tree.find_by_path(&path)
                .map(|node| node.category_id.clone())
                .ok_or_else(|| not_found().into())
        }
    }
}

/// Resolve a category path to a cross-reference category id.
pub async fn resolve_xref_category_id(
    reasoner: &ReasoningResolver,
    tree: &CategoryTree,
    path: &[String],
) -> Result<String, SearchError> {
    let not_found = || ResolutionFailure::CrossReferenceCategoryNotFound {
        path: path.to_vec(),
    };

    match reasoner.pick_xref_category_id(tree, path).await {
        Pick::Match(id) => {
            if tree.find_by_xref(&id).is_some() {
                info!(xref_category_id = %id, "Cross-reference category resolved");
                Ok(id)
            } else {
                warn!(xref_category_id = %id, "Answered cross-reference id is not in the tree");
                Err(not_found().into())
            }
        }
        Pick::NoMatch => Err(not_found().into()),
        Pick::Unavailable => {
            let names: Vec<&str> = path.iter().map(String::as_str).collect();
            tree.find_by_path(&names)
                .and_then(|node| node.xref_category_id.clone())
                .ok_or_else(|| not_found().into())
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::llm::{LlmClient, MockLlmClient};
    use crate::vendor::MockVendor;

    fn payload() -> Value {
        json!({
            "categories": [
                {
                    "name": "Capacitors",
                    "category_id": "cap",
                    "url": "/capacitors",
                    "children": [
                        {"name": "Ceramic Capacitors", "category_id": "cap-cer", "xrefcategory_id": "x-cer", "image": "a.png"},
                        {"name": "Polymer Aluminium Electrolytic Capacitors", "id": 77, "xrefcategory_id": "x-poly"}
                    ]
                },
                {
                    "title": "Resistors",
                    "cateid": "res",
                    "subcategories": [{"name": "Chip Resistors", "category_id": "res-chip"}]
                },
                {"description": "no id, children lifted", "children": [{"name": "Inductors", "category_id": "ind"}]}
            ]
        })
    }

    fn tree() -> CategoryTree {
        CategoryTree::from_payload(&payload()).unwrap()
    }

    fn resolver(responses: Option<Vec<&str>>) -> (ReasoningResolver, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let llm = responses.map(|r| {
            Arc::new(MockLlmClient::new(r.into_iter().map(String::from).collect()))
                as Arc<dyn LlmClient>
        });
        (ReasoningResolver::new(llm, CacheStore::new(dir.path())), dir)
    }

    // --- from_payload ---

    #[test]
    fn test_simplify_keeps_only_tree_fields() {
        let tree = tree();
        assert_eq!(tree.top_level_names(), vec!["Capacitors", "Resistors", "Inductors"]);
        assert_eq!(tree.len(), 6);

        let ceramic = tree.find("cap-cer").unwrap();
        assert_eq!(ceramic.xref_category_id.as_deref(), Some("x-cer"));

        let serialized = tree.to_prompt_json();
        assert!(!serialized.contains("image"));
        assert!(!serialized.contains("/capacitors"));
    }

    #[test]
    fn test_simplify_numeric_ids_and_alternate_fields() {
        let tree = tree();
        assert_eq!(tree.find("77").unwrap().name, "Polymer Aluminium Electrolytic Capacitors");
        assert_eq!(tree.find("res").unwrap().children[0].category_id, "res-chip");
    }

    #[test]
    fn test_simplify_drops_duplicate_ids() {
        let raw = json!([
            {"name": "A", "category_id": "1"},
            {"name": "B", "category_id": "1"},
        ]);
        let tree = CategoryTree::from_payload(&raw).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.roots()[0].name, "A");
    }

    #[test]
    fn test_simplify_rejects_empty() {
        assert!(CategoryTree::from_payload(&json!([])).is_err());
        assert!(CategoryTree::from_payload(&json!({"unrelated": 1})).is_err());
        assert!(CategoryTree::from_payload(&json!("text")).is_err());
    }

    #[test]
    fn test_round_trips_through_cache_shape() {
        let tree = tree();
        let text = serde_json::to_string(&tree).unwrap();
        let back: CategoryTree = serde_json::from_str(&text).unwrap();
        assert_eq!(tree, back);
    }

    // --- find_by_path ---

    #[test]
    fn test_find_by_path() {
        let tree = tree();
        assert_eq!(
            tree.find_by_path(&["capacitors", "ceramic capacitors"]).unwrap().category_id,
            "cap-cer"
        );
        assert_eq!(tree.find_by_path(&["Resistors"]).unwrap().category_id, "res");
        assert_eq!(tree.find_by_path(&["Chip Resistors"]).unwrap().category_id, "res-chip");
        assert!(tree.find_by_path(&["Resistors", "Ceramic Capacitors"]).is_none());
        assert!(tree.find_by_path(&[]).is_none());
    }

    // --- resolve_category_id ---

    #[tokio::test]
    async fn test_resolve_category_match() {
        let (reasoner, _dir) = resolver(Some(vec![r#"{"category_id": "cap-cer"}"#]));
        let id = resolve_category_id(&reasoner, &tree(), "Capacitors", Some("MLCC"))
            .await
            .unwrap();
        assert_eq!(id, "cap-cer");
    }

    #[tokio::test]
    async fn test_resolve_category_sentinel_is_not_found() {
        let (reasoner, _dir) = resolver(Some(vec![r#"{"category_id": "None"}"#]));
        let err = resolve_category_id(&reasoner, &tree(), "Relays", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SearchError::Resolution(ResolutionFailure::CategoryNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolve_category_unknown_id_is_not_found() {
        let (reasoner, _dir) = resolver(Some(vec![r#"{"category_id": "made-up"}"#]));
        let err = resolve_category_id(&reasoner, &tree(), "Capacitors", None)
            .await
            .unwrap_err();
        assert!(err.is_resolution_failure());
    }

    #[tokio::test]
    async fn test_resolve_category_without_credential_matches_names() {
        let (reasoner, _dir) = resolver(None);
        let id = resolve_category_id(&reasoner, &tree(), "Capacitors", Some("Ceramic Capacitors"))
            .await
            .unwrap();
        assert_eq!(id, "cap-cer");

        let err = resolve_category_id(&reasoner, &tree(), "Relays", None)
            .await
            .unwrap_err();
        assert!(err.is_resolution_failure());
    }

    #[tokio::test]
    async fn test_resolve_xref() {
        let (reasoner, _dir) = resolver(Some(vec![r#"{"xrefcategory_id": "x-poly"}"#]));
        let path = vec!["Capacitors".to_string(), "Polymer".to_string()];
        let id = resolve_xref_category_id(&reasoner, &tree(), &path).await.unwrap();
        assert_eq!(id, "x-poly");
    }

    #[tokio::test]
    async fn test_resolve_xref_fallback_and_missing() {
        let (reasoner, _dir) = resolver(None);
        let path = vec!["Capacitors".to_string(), "Ceramic Capacitors".to_string()];
        assert_eq!(
            resolve_xref_category_id(&reasoner, &tree(), &path).await.unwrap(),
            "x-cer"
        );

        // Node exists but carries no cross-reference id.
        let path = vec!["Resistors".to_string()];
        let err = resolve_xref_category_id(&reasoner, &tree(), &path)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SearchError::Resolution(ResolutionFailure::CrossReferenceCategoryNotFound { .. })
        ));
    }

    // --- CategoryTreeProvider ---

    #[tokio::test]
    async fn test_provider_fetches_once_and_invalidates() {
        let dir = tempfile::tempdir().unwrap();
        let vendor = Arc::new(MockVendor::new(payload()));
        let provider = CategoryTreeProvider::new(vendor.clone(), CacheStore::new(dir.path()));

        let first = provider.tree().await.unwrap();
        let second = provider.tree().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(vendor.tree_fetches(), 1);

        // A fresh provider on the same directory reads the disk copy.
        let other = CategoryTreeProvider::new(vendor.clone(), CacheStore::new(dir.path()));
        other.tree().await.unwrap();
        assert_eq!(vendor.tree_fetches(), 1);

        provider.invalidate().await;
        provider.tree().await.unwrap();
        assert_eq!(vendor.tree_fetches(), 2);
    }
}
