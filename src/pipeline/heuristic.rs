// Heuristic extraction: CSS selectors over a captured HTML string.
// Fast, deterministic, no AI cost — used when a site's structure is known
// and stable. Operates on a static HTML snapshot rather than a live page,
// since the Browser Layer exposes no handle to the page itself.

use std::collections::HashMap;

use scraper::{Html, Selector};

use super::extraction::{ExtractionMode, ExtractionRecord, FieldValue, RecordMetadata};

fn extract_text(document: &Html, selector_str: &str) -> Option<String> {
    let selector = Selector::parse(selector_str).ok()?;
    let element = document.select(&selector).next()?;
    let text: String = element.text().collect::<Vec<_>>().join("").trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Extracts one record from `html` using a flat `field_name -> CSS selector`
/// map. A field whose selector matches nothing, or matches empty text,
/// is still recorded — with a null value and zero confidence — so the
/// caller can see exactly what was and wasn't found.
pub fn heuristic_extract(
    html: &str,
    selectors: &HashMap<String, String>,
    source_url: &str,
    dom_hash: &str,
) -> Vec<ExtractionRecord> {
    if selectors.is_empty() {
        return Vec::new();
    }

    let document = Html::parse_document(html);
    let mut fields = HashMap::new();
    let total_fields = selectors.len();
    let mut extracted_count = 0;

    for (field_name, selector) in selectors {
        match extract_text(&document, selector) {
            Some(text) => {
                fields.insert(
                    field_name.clone(),
                    FieldValue::new(serde_json::Value::String(text), 1.0, Some(selector.clone())),
                );
                extracted_count += 1;
            }
            None => {
                fields.insert(
                    field_name.clone(),
                    FieldValue::new(serde_json::Value::Null, 0.0, Some(selector.clone())),
                );
            }
        }
    }

    let completeness = extracted_count as f64 / total_fields as f64;
    let metadata = RecordMetadata::new(source_url, dom_hash, ExtractionMode::Heuristic);
    vec![ExtractionRecord::new(fields, metadata, completeness)]
}

/// Extracts one record per match of `container_selector`, with each field
/// resolved relative to its container via `item_selectors`. Containers that
/// yield no extracted field at all are dropped rather than recorded empty.
pub fn heuristic_extract_list(
    html: &str,
    container_selector: &str,
    item_selectors: &HashMap<String, String>,
    source_url: &str,
    dom_hash: &str,
) -> Vec<ExtractionRecord> {
    let document = Html::parse_document(html);
    let container = match Selector::parse(container_selector) {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    let mut records = Vec::new();
    let total = item_selectors.len();

    for element in document.select(&container) {
        let container_html = element.html();
        let fragment = Html::parse_fragment(&container_html);

        let mut fields = HashMap::new();
        let mut extracted = 0;

        for (field_name, selector) in item_selectors {
            let full_selector = format!("{container_selector} {selector}");
            match extract_text(&fragment, selector) {
                Some(text) => {
                    fields.insert(
                        field_name.clone(),
                        FieldValue::new(serde_json::Value::String(text), 1.0, Some(full_selector)),
                    );
                    extracted += 1;
                }
                None => {
                    fields.insert(
                        field_name.clone(),
                        FieldValue::new(serde_json::Value::Null, 0.0, Some(selector.clone())),
                    );
                }
            }
        }

        if extracted > 0 {
            let completeness = if total > 0 { extracted as f64 / total as f64 } else { 0.0 };
            let metadata = RecordMetadata::new(source_url, dom_hash, ExtractionMode::Heuristic);
            records.push(ExtractionRecord::new(fields, metadata, completeness));
        }
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_with_no_selectors_returns_nothing() {
        let records = heuristic_extract("<html></html>", &HashMap::new(), "https://x.test", "hash1");
        assert!(records.is_empty());
    }

    #[test]
    fn extract_finds_matching_field_with_full_confidence() {
        let html = r#"<html><body><h1 class="title">Acme Corp</h1></body></html>"#;
        let mut selectors = HashMap::new();
        selectors.insert("title".to_string(), ".title".to_string());

        let records = heuristic_extract(html, &selectors, "https://x.test", "hash1");
        assert_eq!(records.len(), 1);
        let field = &records[0].fields["title"];
        assert_eq!(field.value, serde_json::json!("Acme Corp"));
        assert_eq!(field.confidence(), 1.0);
        assert_eq!(records[0].completeness_score(), 1.0);
        assert!(!records[0].is_partial);
    }

    #[test]
    fn extract_missing_selector_yields_null_field_and_partial_completeness() {
        let html = r#"<html><body><h1 class="title">Acme Corp</h1></body></html>"#;
        let mut selectors = HashMap::new();
        selectors.insert("title".to_string(), ".title".to_string());
        selectors.insert("price".to_string(), ".price".to_string());

        let records = heuristic_extract(html, &selectors, "https://x.test", "hash1");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fields["price"].value, serde_json::Value::Null);
        assert_eq!(records[0].fields["price"].confidence(), 0.0);
        assert_eq!(records[0].completeness_score(), 0.5);
        assert!(records[0].is_partial);
    }

    #[test]
    fn extract_list_yields_one_record_per_container() {
        let html = r#"
            <html><body>
                <div class="item"><span class="name">A</span><span class="price">1</span></div>
                <div class="item"><span class="name">B</span><span class="price">2</span></div>
            </body></html>
        "#;
        let mut item_selectors = HashMap::new();
        item_selectors.insert("name".to_string(), ".name".to_string());
        item_selectors.insert("price".to_string(), ".price".to_string());

        let records = heuristic_extract_list(html, ".item", &item_selectors, "https://x.test", "hash1");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].fields["name"].value, serde_json::json!("A"));
        assert_eq!(records[1].fields["name"].value, serde_json::json!("B"));
    }

    #[test]
    fn extract_list_drops_containers_with_zero_extracted_fields() {
        let html = r#"
            <html><body>
                <div class="item"><span class="name">A</span></div>
                <div class="item"></div>
            </body></html>
        "#;
        let mut item_selectors = HashMap::new();
        item_selectors.insert("name".to_string(), ".name".to_string());

        let records = heuristic_extract_list(html, ".item", &item_selectors, "https://x.test", "hash1");
        assert_eq!(records.len(), 1);
    }
}
