//! Search modes built on the [`ResolutionEngine`].
//!
//! Each mode resolves its identifiers, runs one vendor fetch and formats the
//! answer. A resolution failure is returned as an error; transport and parse
//! failures are logged and reported as an empty result list.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::engine::ResolutionEngine;
use crate::error::SearchError;
use crate::filters::Criteria;
use crate::vendor::ProductRecord;

#[async_trait]
pub trait Search: Send + Sync {
    type Request: Send + Sync;

    /// Mode name used in logs.
    fn mode(&self) -> &'static str;

    /// Run one search.
    ///
    /// # Errors
    ///
    /// Only [`SearchError::Resolution`]. Every other failure yields `Ok(vec![])`.
    async fn search(&self, request: &Self::Request) -> Result<Vec<ProductRecord>, SearchError>;
}

/// Apply the propagation policy to a stage result.
fn settle(
    mode: &str,
    result: Result<Vec<ProductRecord>, SearchError>,
) -> Result<Vec<ProductRecord>, SearchError> {
    match result {
        Ok(records) => {
            info!(mode, count = records.len(), "Search finished");
            Ok(records)
        }
        Err(e) if e.is_resolution_failure() => {
            warn!(mode, "Resolution failed: {e}");
            Err(e)
        }
        Err(e) => {
            error!(mode, "Search failed: {e}");
            Ok(Vec::new())
        }
    }
}

/// A cap of zero means no cap.
fn result_cap(max_results: Option<usize>) -> Option<usize> {
    max_results.filter(|&max| max > 0)
}

// ============================================================================
// Part Number Search
// ============================================================================

#[derive(Debug, Clone)]
pub struct MpnRequest {
    pub mpn: String,
}

pub struct MpnSearch {
    engine: Arc<ResolutionEngine>,
}

impl MpnSearch {
    pub fn new(engine: Arc<ResolutionEngine>) -> Self {
        Self { engine }
    }

    async fn run(&self, request: &MpnRequest) -> Result<Vec<ProductRecord>, SearchError> {
        let category_id = self.engine.locate_part(&request.mpn).await?;
        let raw = self
            .engine
            .adapter()
            .fetch_part(&category_id, &request.mpn)
            .await?;
        self.engine.adapter().format(&raw, None)
    }
}

#[async_trait]
impl Search for MpnSearch {
    type Request = MpnRequest;

    fn mode(&self) -> &'static str {
        "mpn"
    }

    async fn search(&self, request: &MpnRequest) -> Result<Vec<ProductRecord>, SearchError> {
        info!(mpn = %request.mpn, "Searching by part number");
        settle(self.mode(), self.run(request).await)
    }
}

// ============================================================================
// Parametric Search
// ============================================================================

#[derive(Debug, Clone)]
pub struct ParametricRequest {
    pub category: String,
    pub subcategory: Option<String>,
    pub criteria: Option<Criteria>,
    pub max_results: Option<usize>,
}

pub struct ParametricSearch {
    engine: Arc<ResolutionEngine>,
}

impl ParametricSearch {
    pub fn new(engine: Arc<ResolutionEngine>) -> Self {
        Self { engine }
    }

    async fn run(&self, request: &ParametricRequest) -> Result<Vec<ProductRecord>, SearchError> {
        let category_id = self
            .engine
            .resolve_category(&request.category, request.subcategory.as_deref())
            .await?;
        let query = self
            .engine
            .build_query(&category_id, request.criteria.as_ref())
            .await?;
        let raw = self
            .engine
            .adapter()
            .fetch(&query.category_id, &query.terms)
            .await?;
        self.engine
            .adapter()
            .format(&raw, result_cap(request.max_results))
    }
}

#[async_trait]
impl Search for ParametricSearch {
    type Request = ParametricRequest;

    fn mode(&self) -> &'static str {
        "parametric"
    }

    async fn search(
        &self,
        request: &ParametricRequest,
    ) -> Result<Vec<ProductRecord>, SearchError> {
        info!(
            category = %request.category,
            subcategory = ?request.subcategory,
            criteria = ?request.criteria,
            "Searching by parameters"
        );
        settle(self.mode(), self.run(request).await)
    }
}

// ============================================================================
// Cross-Reference Search
// ============================================================================

#[derive(Debug, Clone)]
pub struct CrossReferenceRequest {
    pub competitor_mpn: String,
    /// Category names from the top level down. Classified from the
    /// competitor part number when absent.
    pub category_path: Option<Vec<String>>,
    pub max_results: Option<usize>,
}

pub struct CrossReferenceSearch {
    engine: Arc<ResolutionEngine>,
}

impl CrossReferenceSearch {
    pub fn new(engine: Arc<ResolutionEngine>) -> Self {
        Self { engine }
    }

    async fn run(
        &self,
        request: &CrossReferenceRequest,
    ) -> Result<Vec<ProductRecord>, SearchError> {
        let path = match &request.category_path {
            Some(path) if !path.is_empty() => path.clone(),
            _ => {
                self.engine
                    .classify_part_number(&request.competitor_mpn)
                    .await?
            }
        };
        let xref_category_id = self.engine.resolve_xref_category(&path).await?;
        let raw = self
            .engine
            .adapter()
            .fetch_cross_reference(&xref_category_id, &request.competitor_mpn)
            .await?;
        self.engine
            .adapter()
            .format(&raw, result_cap(request.max_results))
    }
}

#[async_trait]
impl Search for CrossReferenceSearch {
    type Request = CrossReferenceRequest;

    fn mode(&self) -> &'static str {
        "xref"
    }

    async fn search(
        &self,
        request: &CrossReferenceRequest,
    ) -> Result<Vec<ProductRecord>, SearchError> {
        info!(
            competitor_mpn = %request.competitor_mpn,
            category_path = ?request.category_path,
            "Searching by cross-reference"
        );
        settle(self.mode(), self.run(request).await)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::cache::CacheStore;
    use crate::error::ResolutionFailure;
    use crate::filters::FilterSpec;
    use crate::llm::{LlmClient, MockLlmClient};
    use crate::reasoning::ReasoningResolver;
    use crate::vendor::{MockVendor, VendorCall};

    fn tree_payload() -> Value {
        json!({"categories": [
            {"name": "Capacitors", "category_id": "cap", "children": [
                {"name": "Ceramic Capacitors", "category_id": "cap-cer", "xrefcategory_id": "x-cer"},
                {"name": "Polymer Aluminium Electrolytic Capacitors", "category_id": "cap-poly", "xrefcategory_id": "x-poly"}
            ]}
        ]})
    }

    fn vendor() -> MockVendor {
        MockVendor::new(tree_payload())
            .with_schema(
                "cap-cer",
                vec![FilterSpec {
                    filter_id: "201".into(),
                    label: "Capacitance".into(),
                    values: vec![],
                }],
            )
            .with_products(&["GRM155R71H104KE14", "GRM188R61A106KE69", "GRM033R61A104KE15"])
    }

    fn engine(
        vendor: MockVendor,
        responses: Option<Vec<&str>>,
    ) -> (Arc<ResolutionEngine>, Arc<MockVendor>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let llm = responses.map(|r| {
            Arc::new(MockLlmClient::new(r.into_iter().map(String::from).collect()))
                as Arc<dyn LlmClient>
        });
        let vendor = Arc::new(vendor);
        let engine = ResolutionEngine::new(
            vendor.clone(),
            ReasoningResolver::new(llm, CacheStore::new(dir.path())),
        );
        (Arc::new(engine), vendor, dir)
    }

    fn parametric(criteria: Value, max_results: Option<usize>) -> ParametricRequest {
        ParametricRequest {
            category: "Capacitors".into(),
            subcategory: Some("Ceramic Capacitors".into()),
            criteria: Some(Criteria::from_json(criteria).unwrap()),
            max_results,
        }
    }

    // --- parametric ---

    #[tokio::test]
    async fn test_parametric_end_to_end() {
        let (engine, vendor, _dir) = engine(
            vendor(),
            Some(vec![
                r#"{"category_id": "cap-cer"}"#,
                r#"{"filters": [{"filter_id": "201", "filter_label": "Capacitance"}]}"#,
            ]),
        );
        let search = ParametricSearch::new(engine);

        let records = search
            .search(&parametric(json!({"Capacitance": {"min": 1, "max": 1.1}}), Some(2)))
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].mpn, "GRM155R71H104KE14");
        assert_eq!(
            vendor.calls(),
            vec![VendorCall::Fetch {
                category_id: "cap-cer".into(),
                terms: vec!["201;1|1.1".into()],
            }]
        );
    }

    #[tokio::test]
    async fn test_category_sentinel_is_error_not_empty() {
        let (engine, vendor, _dir) = engine(vendor(), Some(vec![r#"{"category_id": "None"}"#]));
        let search = ParametricSearch::new(engine);

        let result = search
            .search(&ParametricRequest {
                category: "Relays".into(),
                subcategory: None,
                criteria: None,
                max_results: None,
            })
            .await;

        assert!(matches!(
            result,
            Err(SearchError::Resolution(ResolutionFailure::CategoryNotFound { .. }))
        ));
        assert!(vendor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unresolved_criteria_is_error() {
        let (engine, vendor, _dir) = engine(vendor(), None);
        let search = ParametricSearch::new(engine);

        let err = search
            .search(&parametric(json!({"Impedance": "50 ohm"}), None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SearchError::Resolution(ResolutionFailure::NoFiltersResolved { .. })
        ));
        assert!(vendor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_is_empty_result() {
        let (engine, vendor, _dir) = engine(vendor().with_fetch_error("connection reset"), None);
        let search = ParametricSearch::new(engine);

        let records = search
            .search(&parametric(json!({"Capacitance": {"max": 10}}), None))
            .await
            .unwrap();
        assert!(records.is_empty());
        assert_eq!(vendor.calls().len(), 1);
    }

    #[test]
    fn test_settle_policy() {
        assert!(settle("t", Err(SearchError::Parse("bad".into())))
            .unwrap()
            .is_empty());
        assert!(settle("t", Err(SearchError::Transport("down".into())))
            .unwrap()
            .is_empty());
        let failure = ResolutionFailure::NoFiltersResolved {
            category_id: "c".into(),
        };
        assert!(settle("t", Err(failure.into())).is_err());
    }

    #[tokio::test]
    async fn test_zero_max_results_is_uncapped() {
        let (engine, _vendor, _dir) = engine(vendor(), None);
        let search = ParametricSearch::new(engine);

        let records = search
            .search(&parametric(json!({"Capacitance": {"max": 10}}), Some(0)))
            .await
            .unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(result_cap(Some(2)), Some(2));
        assert_eq!(result_cap(None), None);
    }

    // --- part number ---

    #[tokio::test]
    async fn test_mpn_without_credential_uses_heuristic() {
        let (engine, vendor, _dir) = engine(vendor(), None);
        let search = MpnSearch::new(engine);

        let records = search
            .search(&MpnRequest {
                mpn: "GRM1234".into(),
            })
            .await
            .unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(
            vendor.calls(),
            vec![VendorCall::FetchPart {
                category_id: "cap-cer".into(),
                mpn: "GRM1234".into(),
            }]
        );
    }

    #[tokio::test]
    async fn test_mpn_vendor_lookup() {
        let (engine, vendor, _dir) = engine(vendor().with_part("GRM155", "luCeramic"), None);
        let search = MpnSearch::new(engine);

        search
            .search(&MpnRequest {
                mpn: "GRM155".into(),
            })
            .await
            .unwrap();
        assert_eq!(
            vendor.calls(),
            vec![VendorCall::FetchPart {
                category_id: "luCeramic".into(),
                mpn: "GRM155".into(),
            }]
        );
        assert_eq!(vendor.tree_fetches(), 0);
    }

    // --- cross-reference ---

    #[tokio::test]
    async fn test_xref_with_path() {
        let (engine, vendor, _dir) = engine(vendor(), Some(vec![r#"{"xrefcategory_id": "x-poly"}"#]));
        let search = CrossReferenceSearch::new(engine);

        let records = search
            .search(&CrossReferenceRequest {
                competitor_mpn: "337XMPL002MG28A".into(),
                category_path: Some(vec![
                    "Capacitors".into(),
                    "Polymer Aluminium Electrolytic Capacitors".into(),
                ]),
                max_results: Some(1),
            })
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(
            vendor.calls(),
            vec![VendorCall::FetchCrossReference {
                xref_category_id: "x-poly".into(),
                competitor_mpn: "337XMPL002MG28A".into(),
            }]
        );
    }

    #[tokio::test]
    async fn test_xref_without_path_classifies() {
        let (engine, vendor, _dir) = engine(vendor(), None);
        let search = CrossReferenceSearch::new(engine);

        search
            .search(&CrossReferenceRequest {
                competitor_mpn: "CL05A104KA5NNNC".into(),
                category_path: None,
                max_results: None,
            })
            .await
            .unwrap();
        assert_eq!(
            vendor.calls(),
            vec![VendorCall::FetchCrossReference {
                xref_category_id: "x-cer".into(),
                competitor_mpn: "CL05A104KA5NNNC".into(),
            }]
        );
    }

    #[tokio::test]
    async fn test_xref_sentinel_is_error() {
        let (engine, _vendor, _dir) = engine(vendor(), Some(vec![r#"{"xrefcategory_id": "None"}"#]));
        let search = CrossReferenceSearch::new(engine);

        let err = search
            .search(&CrossReferenceRequest {
                competitor_mpn: "XYZ".into(),
                category_path: Some(vec!["Relays".into()]),
                max_results: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SearchError::Resolution(ResolutionFailure::CrossReferenceCategoryNotFound { .. })
        ));
    }
}
