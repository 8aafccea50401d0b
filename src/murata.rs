//! Murata web API adapter.
//!
//! All endpoints live under one base URL and answer JSON. Filter schemas and
//! product tables share one layout:
//!
//! ```json
//! {"Result": {
//!     "header":   ["partnumber:Part Number", "201:Capacitance", ...],
//!     "listdata": {"410": ["1:C0G", "2:X7R"]},
//!     "data":     {"products": [{"Value": ["GRM155R71H104KE14", "0.1", ...]}]}
//! }}
//! ```
//!
//! Header entries are `id:label`, list entries are `code:value`. Cross-reference
//! answers wrap the same layout in `murataPsDispRest`.

use async_trait::async_trait;
use indexmap::IndexMap;
use reqwest::Url;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::SearchError;
use crate::filters::{FilterSpec, scalar_to_string};
use crate::vendor::{ProductRecord, VendorAdapter};

pub const BASE_URL: &str = "https://www.murata.com/webapi/";

/// Endpoint serving the category hierarchy. Overridable with
/// [`MurataAdapter::with_category_tree_endpoint`].
pub const DEFAULT_CATEGORY_TREE_ENDPOINT: &str = "GetCategoryTree";

const PRODUCT_DETAIL_URL: &str = "https://www.murata.com/en-us/products/productdetail";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/112.0.0.0 Safari/537.36";

const LANG: &str = "en-us";

/// Search type parameter expected by the product endpoints.
const STYPE: &str = "2";

const PART_NUMBER_COLUMN: &str = "partnumber";

pub struct MurataAdapter {
    client: reqwest::Client,
    base_url: String,
    category_tree_endpoint: String,
}

impl MurataAdapter {
    pub fn new(config: &Config) -> Result<Self, SearchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: BASE_URL.to_string(),
            category_tree_endpoint: DEFAULT_CATEGORY_TREE_ENDPOINT.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_category_tree_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.category_tree_endpoint = endpoint.into();
        self
    }

    async fn get(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value, SearchError> {
        let url = format!("{}{}", self.base_url, endpoint);
        info!(%url, "Fetching");

        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<Value>().await?)
    }
}

#[async_trait]
impl VendorAdapter for MurataAdapter {
    fn name(&self) -> &str {
        "murata"
    }

    async fn category_tree(&self) -> Result<Value, SearchError> {
        self.get(&self.category_tree_endpoint, &[("lang", LANG.to_string())])
            .await
    }

    async fn filter_schema(&self, category_id: &str) -> Result<Vec<FilterSpec>, SearchError> {
        let raw = self
            .get(
                "GetSearchCondition",
                &[
                    ("cate", category_id.to_string()),
                    ("lang", LANG.to_string()),
                    ("stype", STYPE.to_string()),
                ],
            )
            .await?;
        parse_filter_schema(&raw)
    }

    async fn locate_part(&self, mpn: &str) -> Result<Option<String>, SearchError> {
        let raw = self
            .get(
                "SelectCategory",
                &[
                    ("partno", mpn.to_string()),
                    ("stype", STYPE.to_string()),
                    ("lang", LANG.to_string()),
                ],
            )
            .await?;
        let located = parse_located_category(&raw);
        debug!(mpn, ?located, "Vendor category lookup");
        Ok(located)
    }

    async fn fetch(&self, category_id: &str, terms: &[String]) -> Result<Value, SearchError> {
        let mut params = vec![
            ("cate", category_id.to_string()),
            ("stype", STYPE.to_string()),
            ("lang", LANG.to_string()),
        ];
        params.extend(terms.iter().map(|term| ("scon", term.clone())));
        self.get("PsdispRest", &params).await
    }

    async fn fetch_part(&self, category_id: &str, mpn: &str) -> Result<Value, SearchError> {
        self.get(
            "PsdispRest",
            &[
                ("cate", category_id.to_string()),
                ("partno", mpn.to_string()),
                ("lang", LANG.to_string()),
                ("stype", STYPE.to_string()),
            ],
        )
        .await
    }

    async fn fetch_cross_reference(
        &self,
        xref_category_id: &str,
        competitor_mpn: &str,
    ) -> Result<Value, SearchError> {
        self.get(
            "SearchCrossReference",
            &[
                ("cate", xref_category_id.to_string()),
                ("partno", competitor_mpn.to_string()),
                ("lang", LANG.to_string()),
            ],
        )
        .await
    }

    fn format(
        &self,
        raw: &Value,
        max_results: Option<usize>,
    ) -> Result<Vec<ProductRecord>, SearchError> {
        format_products(raw, max_results)
    }
}

// ============================================================================
// Payload Parsing
// ============================================================================

/// Split an `id:label` entry. Entries without a colon are their own label.
fn split_entry(entry: &str) -> (&str, &str) {
    entry.split_once(':').unwrap_or((entry, entry))
}

fn result_section(raw: &Value) -> Result<&Value, SearchError> {
    raw.get("Result")
        .ok_or_else(|| SearchError::Parse("response has no Result section".into()))
}

fn header_entries(result: &Value) -> Result<Vec<&str>, SearchError> {
    let header = result
        .get("header")
        .and_then(Value::as_array)
        .ok_or_else(|| SearchError::Parse("Result has no header list".into()))?;
    Ok(header.iter().filter_map(Value::as_str).collect())
}

/// Filter schema from a `GetSearchCondition` answer.
pub fn parse_filter_schema(raw: &Value) -> Result<Vec<FilterSpec>, SearchError> {
    let result = result_section(raw)?;
    let listdata = result.get("listdata").and_then(Value::as_object);

    let specs = header_entries(result)?
        .into_iter()
        .map(|entry| {
            let (filter_id, label) = split_entry(entry);
            let values = listdata
                .and_then(|lists| lists.get(filter_id))
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(|item| split_entry(item).1.to_string())
                        .collect()
                })
                .unwrap_or_default();
            FilterSpec {
                filter_id: filter_id.to_string(),
                label: label.to_string(),
                values,
            }
        })
        .collect();
    Ok(specs)
}

/// First category id from a `SelectCategory` answer.
fn parse_located_category(raw: &Value) -> Option<String> {
    raw.get("cateid")
        .and_then(Value::as_array)
        .and_then(|ids| ids.first())
        .map(scalar_to_string)
        .filter(|id| !id.is_empty())
}

/// Product rows zipped against the header ids.
pub fn format_products(
    raw: &Value,
    max_results: Option<usize>,
) -> Result<Vec<ProductRecord>, SearchError> {
    let raw = raw.get("murataPsDispRest").unwrap_or(raw);
    let result = result_section(raw)?;
    let columns: Vec<&str> = header_entries(result)?
        .into_iter()
        .map(|entry| split_entry(entry).0)
        .collect();
    let products = result
        .get("data")
        .and_then(|data| data.get("products"))
        .and_then(Value::as_array)
        .ok_or_else(|| SearchError::Parse("Result has no product data".into()))?;

    let limit = max_results.filter(|&max| max > 0).unwrap_or(usize::MAX);
    let mut records = Vec::new();
    for product in products.iter().take(limit) {
        let Some(values) = product.get("Value").and_then(Value::as_array) else {
            debug!("Skipping product row without values");
            continue;
        };

        let details: IndexMap<String, Value> = columns
            .iter()
            .zip(values)
            .map(|(column, value)| (column.to_string(), value.clone()))
            .collect();
        let mpn = details
            .get(PART_NUMBER_COLUMN)
            .map(scalar_to_string)
            .unwrap_or_default();
        let url = Url::parse_with_params(PRODUCT_DETAIL_URL, &[("partno", mpn.as_str())])
            .map_err(|e| SearchError::Parse(e.to_string()))?;

        records.push(ProductRecord {
            mpn,
            url: url.to_string(),
            details,
        });
    }
    Ok(records)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn schema_payload() -> Value {
        json!({
            "Result": {
                "header": ["partnumber:Part Number", "201:Capacitance", "410:Temperature Characteristics", "520"],
                "listdata": {"410": ["1:C0G", "2:X7R", "3:X5R"]}
            }
        })
    }

    fn product_payload() -> Value {
        json!({
            "Result": {
                "header": ["partnumber:Part Number", "201:Capacitance", "410:Temperature Characteristics"],
                "data": {"products": [
                    {"Value": ["GRM155R71H104KE14", "0.1", "X7R"]},
                    {"Value": ["GRM 033#1", 1.0, "C0G"]},
                    {"Value": ["GRM188R61A106KE69", "10", "X5R"]}
                ]}
            }
        })
    }

    #[test]
    fn test_parse_filter_schema() {
        let specs = parse_filter_schema(&schema_payload()).unwrap();
        assert_eq!(specs.len(), 4);
        assert_eq!(specs[1].filter_id, "201");
        assert_eq!(specs[1].label, "Capacitance");
        assert!(specs[1].values.is_empty());
        assert_eq!(specs[2].values, vec!["C0G", "X7R", "X5R"]);
        assert_eq!(specs[3].filter_id, "520");
        assert_eq!(specs[3].label, "520");
    }

    #[test]
    fn test_parse_filter_schema_requires_result() {
        let err = parse_filter_schema(&json!({"status": "ok"})).unwrap_err();
        assert!(matches!(err, SearchError::Parse(_)));
    }

    #[test]
    fn test_format_products_zips_headers() {
        let records = format_products(&product_payload(), None).unwrap();
        assert_eq!(records.len(), 3);

        let first = &records[0];
        assert_eq!(first.mpn, "GRM155R71H104KE14");
        assert_eq!(
            first.url,
            "https://www.murata.com/en-us/products/productdetail?partno=GRM155R71H104KE14"
        );
        let columns: Vec<&str> = first.details.keys().map(String::as_str).collect();
        assert_eq!(columns, vec!["partnumber", "201", "410"]);
        assert_eq!(first.details["410"], json!("X7R"));

        // Part numbers are query-encoded in the product URL.
        assert!(records[1].url.ends_with("partno=GRM+033%231"));
        assert_eq!(records[1].details["201"], json!(1.0));
    }

    #[test]
    fn test_format_products_max_results() {
        let records = format_products(&product_payload(), Some(2)).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].mpn, "GRM 033#1");

        // Zero means no cap.
        assert_eq!(format_products(&product_payload(), Some(0)).unwrap().len(), 3);
    }

    #[test]
    fn test_format_cross_reference_wrapper() {
        let raw = json!({"murataPsDispRest": product_payload()});
        let records = format_products(&raw, Some(1)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].mpn, "GRM155R71H104KE14");
    }

    #[test]
    fn test_format_missing_sections_is_parse_error() {
        assert!(format_products(&json!({}), None).is_err());
        let no_data = json!({"Result": {"header": ["partnumber:Part Number"]}});
        assert!(matches!(
            format_products(&no_data, None),
            Err(SearchError::Parse(_))
        ));

        let empty = json!({"Result": {"header": [], "data": {"products": []}}});
        assert!(format_products(&empty, None).unwrap().is_empty());
    }

    #[test]
    fn test_parse_located_category() {
        assert_eq!(
            parse_located_category(&json!({"cateid": ["luCeramicCapacitorsSMD", "other"]})),
            Some("luCeramicCapacitorsSMD".to_string())
        );
        assert_eq!(parse_located_category(&json!({"cateid": []})), None);
        assert_eq!(parse_located_category(&json!({"cateid": [""]})), None);
        assert_eq!(parse_located_category(&json!({})), None);
    }

    #[test]
    fn test_adapter_builders() {
        let adapter = MurataAdapter::new(&Config::default())
            .unwrap()
            .with_base_url("http://localhost:9/webapi/")
            .with_category_tree_endpoint("Tree");
        assert_eq!(adapter.name(), "murata");
        assert_eq!(adapter.base_url, "http://localhost:9/webapi/");
        assert_eq!(adapter.category_tree_endpoint, "Tree");
    }
}
