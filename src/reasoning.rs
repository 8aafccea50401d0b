//! Reasoning service wrapper.
//!
//! [`ReasoningResolver::ask`] is the only place that talks to the LLM. It
//! never fails: transport errors, error statuses and answers that do not
//! parse as the expected shape all come back as `None`, logged at `warn`.
//!
//! The higher-level questions built on `ask` are memoized through the
//! [`CacheStore`], keyed by the serialized context they embed (tree snapshot,
//! label set, value list), so an identical question is answered once.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::cache::{CacheStore, CallSignature};
use crate::category::CategoryTree;
use crate::config::Config;
use crate::filters::{FilterSpec, scalar_to_string};
use crate::llm::{AnthropicClient, LlmClient};
use crate::prompts::{self, render};

/// Literal answer meaning "no acceptable match".
pub const NO_MATCH: &str = "None";

// ============================================================================
// Heuristic Fallback
// ============================================================================

/// Part-number substrings and the category path they imply, first match wins.
const HEURISTIC_RULES: &[(&[&str], &[&str])] = &[
    (
        &["CAP", "GRM", "CL", "C0G", "X7R"],
        &["Capacitors", "Ceramic Capacitors"],
    ),
    (&["RES", "RC", "RL"], &["Resistors", "Chip Resistors"]),
    (&["IND", "LQG", "LQW"], &["Inductors", "Chip Inductors"]),
];

const HEURISTIC_DEFAULT: &[&str] = &["Capacitors"];

/// Classify a part number without the reasoning service.
///
/// Case-insensitive substring rules evaluated in order; the default rule
/// makes this total.
pub fn heuristic_category_path(mpn: &str) -> Vec<String> {
    let upper = mpn.to_uppercase();
    let path = HEURISTIC_RULES
        .iter()
        .find(|(needles, _)| needles.iter().any(|needle| upper.contains(needle)))
        .map(|(_, path)| *path)
        .unwrap_or(HEURISTIC_DEFAULT);

    path.iter().map(|s| s.to_string()).collect()
}

/// Key used by the deterministic fallbacks to compare labels and values:
/// lowercase alphanumerics only.
pub fn match_key(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

// ============================================================================
// Answer Shapes
// ============================================================================

/// Outcome of a "pick one identifier" question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pick {
    /// The service chose this identifier.
    Match(String),
    /// The service answered with the `"None"` sentinel.
    NoMatch,
    /// No credential, or the call failed. Callers apply their own fallback.
    Unavailable,
}

impl Pick {
    fn from_answer(answer: Option<String>) -> Self {
        match answer {
            None => Self::Unavailable,
            Some(id) => {
                let id = id.trim();
                if id.is_empty() || id.eq_ignore_ascii_case(NO_MATCH) {
                    Self::NoMatch
                } else {
                    Self::Match(id.to_string())
                }
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum CategoryPathAnswer {
    Path(Vec<String>),
    Wrapped { categories: Vec<String> },
}

impl CategoryPathAnswer {
    fn into_path(self) -> Vec<String> {
        match self {
            Self::Path(path) | Self::Wrapped { categories: path } => path,
        }
    }
}

/// Identifiers may come back as `"201"` or `201`.
fn scalar_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        value @ (Value::String(_) | Value::Number(_)) => Ok(scalar_to_string(&value)),
        other => Err(de::Error::custom(format!(
            "expected a string or number identifier, got {other}"
        ))),
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CategoryIdAnswer {
    #[serde(deserialize_with = "scalar_id")]
    category_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct XrefCategoryIdAnswer {
    #[serde(deserialize_with = "scalar_id")]
    xrefcategory_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct FilterValueAnswer {
    #[serde(deserialize_with = "scalar_id")]
    filter_value: String,
}

/// One label → filter id pairing chosen by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMapping {
    #[serde(deserialize_with = "scalar_id")]
    pub filter_id: String,
    pub filter_label: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct LabelMappingAnswer {
    filters: Vec<LabelMapping>,
}

/// One assertion from a decomposed free-text description.
///
/// Bounds and values are kept as raw JSON scalars since the service answers
/// with numbers or strings interchangeably.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterAssertion {
    #[serde(deserialize_with = "scalar_id")]
    pub filter_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl FilterAssertion {
    pub fn is_range(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct DecompositionAnswer {
    filters: Vec<FilterAssertion>,
}

// ============================================================================
// Reasoning Resolver
// ============================================================================

/// Cached, failure-tolerant front end to the reasoning service.
#[derive(Clone)]
pub struct ReasoningResolver {
    llm: Option<Arc<dyn LlmClient>>,
    cache: CacheStore,
}

impl ReasoningResolver {
    /// Create a resolver. `llm = None` selects the deterministic fallbacks.
    pub fn new(llm: Option<Arc<dyn LlmClient>>, cache: CacheStore) -> Self {
        Self { llm, cache }
    }

    /// Build the live client from the config credential, if there is one.
    pub fn from_config(config: &Config) -> Self {
        let cache = CacheStore::new(config.cache_dir.clone());
        let llm = match AnthropicClient::from_config(config) {
            Ok(client) => Some(Arc::new(client) as Arc<dyn LlmClient>),
            Err(e) => {
                warn!("{e}; using heuristic resolution");
                None
            }
        };
        Self::new(llm, cache)
    }

    /// Whether a reasoning service is available.
    pub fn is_configured(&self) -> bool {
        self.llm.is_some()
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    fn signature(method: &str) -> CallSignature {
        CallSignature::method::<Self>(method)
    }

    /// Send `prompt` and parse the answer as `T`.
    ///
    /// Returns `None` when no service is configured, when the call fails,
    /// or when the answer does not have the expected shape.
    pub async fn ask<T: DeserializeOwned>(&self, prompt: &str) -> Option<T> {
        let llm = self.llm.as_ref()?;

        let completion = match llm.complete(prompts::SYSTEM_PROMPT, prompt).await {
            Ok(completion) => completion,
            Err(e) => {
                warn!("Reasoning service call failed: {e}");
                return None;
            }
        };

        match parse_answer::<T>(&completion.text) {
            Ok(answer) => Some(answer),
            Err(e) => {
                warn!("Failed to parse reasoning answer: {e}\nAnswer: {}", completion.text);
                None
            }
        }
    }

    /// Classify a part number into a category path such as
    /// `["Capacitors", "Ceramic Capacitors"]`.
    ///
    /// Falls back to [`heuristic_category_path`] when no service is
    /// configured or the answer is unusable.
    pub async fn classify_part_number(&self, mpn: &str, available: &[String]) -> Vec<String> {
        if !self.is_configured() {
            return heuristic_category_path(mpn);
        }

        let signature = Self::signature("classify_part_number")
            .arg(mpn)
            .arg(available);
        let answer: Option<CategoryPathAnswer> = self
            .cache
            .get_or_compute_option(&signature, || async {
                let categories =
                    serde_json::to_string_pretty(available).unwrap_or_else(|_| "[]".into());
                let prompt = render(
                    prompts::CLASSIFY_PART_PROMPT,
                    &[("mpn", mpn), ("categories", &categories)],
                );
                self.ask(&prompt).await
            })
            .await;

        match answer.map(CategoryPathAnswer::into_path) {
            Some(path) if !path.is_empty() => path,
            _ => {
                warn!(mpn, "Unusable classification answer, using heuristic");
                heuristic_category_path(mpn)
            }
        }
    }

    /// Pick the category id best matching `category` / `subcategory`.
    pub async fn pick_category_id(
        &self,
        tree: &CategoryTree,
        category: &str,
        subcategory: Option<&str>,
    ) -> Pick {
        if !self.is_configured() {
            return Pick::Unavailable;
        }

        let signature = Self::signature("pick_category_id")
            .arg(tree)
            .arg(category)
            .kwarg("subcategory", &subcategory);
        let answer: Option<CategoryIdAnswer> = self
            .cache
            .get_or_compute_option(&signature, || async {
                let target = match subcategory {
                    Some(sub) => format!("{category}\nand subcategory: {sub}"),
                    None => category.to_string(),
                };
                let prompt = render(
                    prompts::CATEGORY_ID_PROMPT,
                    &[("target", &target), ("tree", &tree.to_prompt_json())],
                );
                self.ask(&prompt).await
            })
            .await;

        let pick = Pick::from_answer(answer.map(|a| a.category_id));
        info!(category, ?subcategory, ?pick, "Category id answer");
        pick
    }

    /// Pick the cross-reference category id for a category path.
    pub async fn pick_xref_category_id(&self, tree: &CategoryTree, path: &[String]) -> Pick {
        if !self.is_configured() {
            return Pick::Unavailable;
        }

        let signature = Self::signature("pick_xref_category_id")
            .arg(tree)
            .arg(path);
        let answer: Option<XrefCategoryIdAnswer> = self
            .cache
            .get_or_compute_option(&signature, || async {
                let path_json = serde_json::to_string(path).unwrap_or_default();
                let prompt = render(
                    prompts::XREF_CATEGORY_ID_PROMPT,
                    &[("path", &path_json), ("tree", &tree.to_prompt_json())],
                );
                self.ask(&prompt).await
            })
            .await;

        let pick = Pick::from_answer(answer.map(|a| a.xrefcategory_id));
        info!(?path, ?pick, "Cross-reference category id answer");
        pick
    }

    /// Map every label onto a filter id in one question.
    ///
    /// `None` means the service was unavailable; an empty list means it
    /// found no matches.
    pub async fn map_filter_labels(
        &self,
        specs: &[FilterSpec],
        labels: &[String],
    ) -> Option<Vec<LabelMapping>> {
        if !self.is_configured() {
            return None;
        }

        let catalog: Vec<_> = specs
            .iter()
            .map(|s| json!({"filter_id": s.filter_id, "filter_label": s.label}))
            .collect();
        let signature = Self::signature("map_filter_labels")
            .arg(&catalog)
            .arg(labels);
        let answer: Option<LabelMappingAnswer> = self
            .cache
            .get_or_compute_option(&signature, || async {
                let labels_json = serde_json::to_string_pretty(labels).unwrap_or_default();
                let filters_json = serde_json::to_string_pretty(&catalog).unwrap_or_default();
                let prompt = render(
                    prompts::FILTER_IDS_PROMPT,
                    &[("labels", &labels_json), ("filters", &filters_json)],
                );
                self.ask(&prompt).await
            })
            .await;

        answer.map(|a| a.filters)
    }

    /// Choose the entry of `values` most likely meant by `wanted`.
    pub async fn pick_value(&self, values: &[String], wanted: &str) -> Pick {
        if !self.is_configured() {
            return Pick::Unavailable;
        }

        let signature = Self::signature("pick_value").arg(values).arg(wanted);
        let answer: Option<FilterValueAnswer> = self
            .cache
            .get_or_compute_option(&signature, || async {
                let values_json = serde_json::to_string_pretty(values).unwrap_or_default();
                let prompt = render(
                    prompts::FILTER_VALUE_PROMPT,
                    &[("wanted", wanted), ("values", &values_json)],
                );
                self.ask(&prompt).await
            })
            .await;

        Pick::from_answer(answer.map(|a| a.filter_value))
    }

    /// Break a free-text description into filter assertions.
    pub async fn decompose_description(
        &self,
        specs: &[FilterSpec],
        description: &str,
    ) -> Option<Vec<FilterAssertion>> {
        if !self.is_configured() {
            return None;
        }

        let signature = Self::signature("decompose_description")
            .arg(specs)
            .arg(description);
        let answer: Option<DecompositionAnswer> = self
            .cache
            .get_or_compute_option(&signature, || async {
                let filters_json = serde_json::to_string_pretty(specs).unwrap_or_default();
                let prompt = render(
                    prompts::DECOMPOSE_PROMPT,
                    &[("filters", &filters_json), ("description", description)],
                );
                self.ask(&prompt).await
            })
            .await;

        answer.map(|a| a.filters)
    }
}

// ============================================================================
// Helpers
// ============================================================================

static JSON_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)[\[{].*[\]}]").expect("JSON block pattern is valid"));

/// Parse an answer as `T`, tolerating code fences and surrounding prose.
fn parse_answer<T: DeserializeOwned>(text: &str) -> Result<T, String> {
    let cleaned = strip_markdown_fences(text);
    match serde_json::from_str(&cleaned) {
        Ok(value) => Ok(value),
        Err(first) => {
            let block = JSON_BLOCK
                .find(&cleaned)
                .ok_or_else(|| format!("JSON parse error: {first}"))?;
            serde_json::from_str(block.as_str()).map_err(|e| format!("JSON parse error: {e}"))
        }
    }
}

/// Strip markdown code fences from LLM output.
fn strip_markdown_fences(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        let after_first_fence = trimmed
            .find('\n')
            .map(|i| &trimmed[i + 1..])
            .unwrap_or(trimmed);
        if let Some(end) = after_first_fence.rfind("```") {
            return after_first_fence[..end].trim().to_string();
        }
    }
    trimmed.to_string()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::CategoryNode;
    use crate::llm::{LlmError, MockLlmClient};

    fn resolver(mock: Option<Arc<MockLlmClient>>) -> (ReasoningResolver, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let llm = mock.map(|m| m as Arc<dyn LlmClient>);
        (ReasoningResolver::new(llm, CacheStore::new(dir.path())), dir)
    }

    fn tree() -> CategoryTree {
        CategoryTree::new(vec![CategoryNode {
            name: "Capacitors".into(),
            category_id: "cap".into(),
            xref_category_id: Some("xcap".into()),
            children: vec![],
        }])
    }

    // --- heuristic_category_path ---

    #[test]
    fn test_heuristic_rules_in_order() {
        assert_eq!(
            heuristic_category_path("GRM1234"),
            vec!["Capacitors", "Ceramic Capacitors"]
        );
        assert_eq!(
            heuristic_category_path("rc0402fr-0710kl"),
            vec!["Resistors", "Chip Resistors"]
        );
        assert_eq!(
            heuristic_category_path("LQW18AN"),
            vec!["Inductors", "Chip Inductors"]
        );
        assert_eq!(heuristic_category_path("ZZZ"), vec!["Capacitors"]);
        assert_eq!(heuristic_category_path(""), vec!["Capacitors"]);
    }

    #[test]
    fn test_heuristic_first_match_wins() {
        // Contains both "CL" (rule 1) and "RES" (rule 2).
        assert_eq!(
            heuristic_category_path("CLRES"),
            vec!["Capacitors", "Ceramic Capacitors"]
        );
    }

    #[test]
    fn test_heuristic_deterministic() {
        for mpn in ["GRM188R71H104KA93D", "ind-1", "µ", "RL1220"] {
            assert_eq!(heuristic_category_path(mpn), heuristic_category_path(mpn));
        }
    }

    #[tokio::test]
    async fn test_classify_without_credential_uses_heuristic() {
        let (resolver, _dir) = resolver(None);
        let path = resolver.classify_part_number("GRM1234", &[]).await;
        assert_eq!(path, vec!["Capacitors", "Ceramic Capacitors"]);
    }

    // --- parse_answer ---

    #[test]
    fn test_parse_answer_with_fences_and_prose() {
        let fenced: CategoryIdAnswer =
            parse_answer("```json\n{\"category_id\": \"c1\"}\n```").unwrap();
        assert_eq!(fenced.category_id, "c1");

        let chatty: CategoryIdAnswer =
            parse_answer("Sure! Here it is: {\"category_id\": \"c2\"} Hope that helps.").unwrap();
        assert_eq!(chatty.category_id, "c2");

        assert!(parse_answer::<CategoryIdAnswer>("no json here").is_err());
    }

    #[test]
    fn test_strip_markdown_fences() {
        assert_eq!(strip_markdown_fences("hello"), "hello");
        assert_eq!(strip_markdown_fences("```json\n{}\n```"), "{}");
        assert_eq!(strip_markdown_fences("```\nfoo\n```"), "foo");
    }

    #[test]
    fn test_match_key() {
        assert_eq!(match_key("Rated Voltage (DC)"), "ratedvoltagedc");
        assert_eq!(match_key("  X7R "), "x7r");
    }

    // --- ask ---

    #[tokio::test]
    async fn test_ask_failure_is_none() {
        let mock = Arc::new(MockLlmClient::with_results(vec![
            Err(LlmError::Http("connection refused".into())),
            Ok("not json".into()),
            Ok(r#"{"wrong": 1}"#.into()),
        ]));
        let (resolver, _dir) = resolver(Some(mock));

        assert!(resolver.ask::<CategoryIdAnswer>("q").await.is_none());
        assert!(resolver.ask::<CategoryIdAnswer>("q").await.is_none());
        assert!(resolver.ask::<CategoryIdAnswer>("q").await.is_none());
    }

    #[tokio::test]
    async fn test_ask_without_credential_is_none() {
        let (resolver, _dir) = resolver(None);
        assert!(!resolver.is_configured());
        assert!(resolver.ask::<Value>("q").await.is_none());
    }

    // --- memoized questions ---

    #[tokio::test]
    async fn test_pick_category_id_memoized() {
        let mock = Arc::new(MockLlmClient::new(vec![r#"{"category_id": "cap"}"#.into()]));
        let (resolver, _dir) = resolver(Some(mock.clone()));
        let tree = tree();

        let first = resolver.pick_category_id(&tree, "Capacitors", None).await;
        let second = resolver.pick_category_id(&tree, "Capacitors", None).await;

        assert_eq!(first, Pick::Match("cap".into()));
        assert_eq!(first, second);
        assert_eq!(mock.calls(), 1);
        assert!(mock.prompts.lock().unwrap()[0].contains("Capacitors"));
    }

    #[tokio::test]
    async fn test_pick_category_id_sentinel() {
        let mock = Arc::new(MockLlmClient::new(vec![r#"{"category_id": "None"}"#.into()]));
        let (resolver, _dir) = resolver(Some(mock));

        let pick = resolver.pick_category_id(&tree(), "Relays", None).await;
        assert_eq!(pick, Pick::NoMatch);
    }

    #[tokio::test]
    async fn test_numeric_ids_accepted() {
        let mock = Arc::new(MockLlmClient::new(vec![
            r#"{"category_id": 77}"#.into(),
            r#"{"filter_value": 10}"#.into(),
        ]));
        let (resolver, _dir) = resolver(Some(mock));

        let pick = resolver.pick_category_id(&tree(), "Polymer", None).await;
        assert_eq!(pick, Pick::Match("77".into()));

        let values = vec!["4.7".to_string(), "10".to_string()];
        assert_eq!(resolver.pick_value(&values, "10V").await, Pick::Match("10".into()));

        let mapping: LabelMappingAnswer =
            parse_answer(r#"{"filters": [{"filter_id": 201, "filter_label": "Capacitance"}]}"#)
                .unwrap();
        assert_eq!(mapping.filters[0].filter_id, "201");
        assert!(parse_answer::<CategoryIdAnswer>(r#"{"category_id": null}"#).is_err());
        assert!(parse_answer::<CategoryIdAnswer>(r#"{"category_id": ["a"]}"#).is_err());
    }

    #[tokio::test]
    async fn test_failed_answer_not_cached() {
        let mock = Arc::new(MockLlmClient::new(vec![
            "garbage".into(),
            r#"{"filter_value": "X7R"}"#.into(),
        ]));
        let (resolver, _dir) = resolver(Some(mock.clone()));
        let values = vec!["X5R".to_string(), "X7R".to_string()];

        assert_eq!(resolver.pick_value(&values, "x7r").await, Pick::Unavailable);
        assert_eq!(
            resolver.pick_value(&values, "x7r").await,
            Pick::Match("X7R".into())
        );
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_shared_cache_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let first_mock = Arc::new(MockLlmClient::new(vec![r#"["Resistors"]"#.into()]));
        let second_mock = Arc::new(MockLlmClient::new(vec![]));

        let first = ReasoningResolver::new(
            Some(first_mock.clone() as Arc<dyn LlmClient>),
            CacheStore::new(dir.path()),
        );
        let second = ReasoningResolver::new(
            Some(second_mock.clone() as Arc<dyn LlmClient>),
            CacheStore::new(dir.path()),
        );

        let available = vec!["Resistors".to_string()];
        assert_eq!(
            first.classify_part_number("RC0402", &available).await,
            vec!["Resistors"]
        );
        assert_eq!(
            second.classify_part_number("RC0402", &available).await,
            vec!["Resistors"]
        );
        assert_eq!(second_mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_classify_accepts_wrapped_answer() {
        let mock = Arc::new(MockLlmClient::new(vec![
            r#"{"categories": ["Inductors", "Chip Inductors"]}"#.into(),
        ]));
        let (resolver, _dir) = resolver(Some(mock));

        let path = resolver.classify_part_number("XYZ", &[]).await;
        assert_eq!(path, vec!["Inductors", "Chip Inductors"]);
    }

    #[tokio::test]
    async fn test_classify_bad_answer_falls_back() {
        let mock = Arc::new(MockLlmClient::new(vec![r#"{"category": 3}"#.into()]));
        let (resolver, _dir) = resolver(Some(mock));

        let path = resolver.classify_part_number("LQG15", &[]).await;
        assert_eq!(path, vec!["Inductors", "Chip Inductors"]);
    }

    #[tokio::test]
    async fn test_decompose_description() {
        let mock = Arc::new(MockLlmClient::new(vec![
            r#"{"filters": [{"filter_id": "305", "min": "", "max": "10"}, {"filter_id": "12", "value": "0.6x0.3"}]}"#.into(),
        ]));
        let (resolver, _dir) = resolver(Some(mock));

        let assertions = resolver
            .decompose_description(&[], "no more than 10pF, size 0.6x0.3")
            .await
            .unwrap();
        assert_eq!(assertions.len(), 2);
        assert!(assertions[0].is_range());
        assert!(!assertions[1].is_range());
        assert_eq!(assertions[1].value, Some(json!("0.6x0.3")));
    }
}
