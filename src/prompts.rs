//! Prompts sent to the reasoning service.
//!
//! Each resolver question has a fixed system prompt describing the expected
//! answer shape and a user message carrying the serialized context. Answers
//! must be bare JSON; fenced or chatty answers are unwrapped by the caller.

/// Shared preamble for every resolver question.
pub const SYSTEM_PROMPT: &str = r#"You are a parameter resolution assistant for an electronic component catalog search.
You match loosely written search criteria against the vendor's own identifiers.

Respond with ONLY the JSON value requested (no markdown, no explanation).
When nothing matches, use the literal string "None" where an identifier is requested."#;

/// Classify a part number into a category path.
pub const CLASSIFY_PART_PROMPT: &str = r#"Determine the most likely product category path for an electronic component with part number "{mpn}".

Available top-level categories:
{categories}

Based on the part number, determine:
1. Which top-level category is most appropriate
2. Which subcategory is relevant (e.g. for capacitors: ceramic, aluminum, polymer)

Return a JSON array of category names, starting with the top-level category.
For example: ["Capacitors", "Polymer Aluminium Electrolytic Capacitors"]"#;

/// Pick a category id from the serialized tree.
pub const CATEGORY_ID_PROMPT: &str = r#"Determine the most likely product category id (field "category_id") for the following category: {target}

The category information has this format:
{
  "category_id": "123",
  "name": "Category Name",
  "xrefcategory_id": "123",
  "children": [
    {"category_id": "456", "name": "Subcategory Name", "children": [...]}
  ]
}

Here are the categories:
{tree}

Return a JSON object: {"category_id": "<id>"}
If no match is found, return {"category_id": "None"}"#;

/// Pick a cross-reference category id from the serialized tree.
pub const XREF_CATEGORY_ID_PROMPT: &str = r#"Determine the most likely cross-reference category id (field "xrefcategory_id") for the following category path: {path}

The category information has this format:
{
  "category_id": "123",
  "name": "Category Name",
  "xrefcategory_id": "123",
  "children": [
    {"category_id": "456", "name": "Subcategory Name", "xrefcategory_id": "789", "children": [...]}
  ]
}

Here are the categories:
{tree}

Return a JSON object: {"xrefcategory_id": "<id>"}
If no match is found, return {"xrefcategory_id": "None"}"#;

/// Map human filter labels onto filter ids, all labels in one question.
pub const FILTER_IDS_PROMPT: &str = r#"Get the most likely filter_id for each of the following filter labels:
{labels}

Choose from the following filters:
{filters}

Return a JSON object listing one entry per label that has a match:
{
  "filters": [
    {"filter_id": "filter_id", "filter_label": "Filter Label exactly as given above"}
  ]
}
Leave out labels with no matching filter."#;

/// Choose one selectable value for a filter.
pub const FILTER_VALUE_PROMPT: &str = r#"Get the most likely filter value for "{wanted}" from the following list:
{values}

Return a JSON object with the list entry copied exactly: {"filter_value": "<entry>"}
If no match is found, return {"filter_value": "None"}"#;

/// Decompose a free-text description into filter assertions.
pub const DECOMPOSE_PROMPT: &str = r#"Here are the possible filters. Each filter_id has a label and, when it is a selection filter, its selectable values:
{filters}

Generate as many filters as the following description asks for: '{description}'
Each filter may appear only once in the result.

Rules:
- Phrases such as "no more than X", "less than X", "maximum X", "at least X" or "minimum X" describe a range filter. When only one bound is given, leave the other bound as an empty string.
  "no more than 10pF" becomes {"filter_id": "<id>", "min": "", "max": "10"}
- A range with both bounds uses {"filter_id": "<id>", "min": "<min>", "max": "<max>"}.
- Compound dimension values such as a size written Length x Width (e.g. "0.1x0.25" or "0.6×0.3mm") are single values, not ranges, even though they contain several numbers.
- Any other value is a single value: {"filter_id": "<id>", "value": "<value>"}
- Give numeric bounds without units, in the unit the filter label uses.

Return a JSON object:
{
  "filters": [
    ... all the filters here
  ]
}"#;

/// Fill `{name}` placeholders in a prompt template.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}
