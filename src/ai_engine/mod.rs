// Module: AI Engine
// A stateless sidecar reasoning adapter. It provides intelligence without
// authority: the Conduit calls it, receives structured decisions back, and
// it never acts on its own. Hard constraint carried over from the original
// implementation: the AI Engine cannot mutate global config, execute
// arbitrary code, persist data without Conduit approval, or invoke browser
// actions directly — it only ever returns data for the Conduit to validate
// and act on.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::errors::{emit_structured_error, ErrorCode};

#[derive(Debug, Error)]
pub enum AiError {
    #[error("AI engine not configured: {0}")]
    Config(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("AI provider returned an error: {0}")]
    Api(String),
    #[error("failed to parse AI response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for AiError {
    fn from(err: reqwest::Error) -> Self {
        AiError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for AiError {
    fn from(err: serde_json::Error) -> Self {
        AiError::Parse(err.to_string())
    }
}

// ============================================================================
// Function call models
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionCall {
    pub function: String,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    #[serde(default)]
    pub expected_outcome: String,
    #[serde(default)]
    pub fallback: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NavigationPlan {
    #[serde(default)]
    pub actions: Vec<FunctionCall>,
    #[serde(default)]
    pub estimated_steps: u32,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageClassification {
    pub page_state: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub content_regions_detected: u32,
    #[serde(default)]
    pub obstruction_indicators: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionResult {
    #[serde(default)]
    pub records: Vec<HashMap<String, Value>>,
    #[serde(default)]
    pub completeness_score: f64,
    #[serde(default)]
    pub duplicates_detected: u32,
}

/// Records one failed navigation or extraction attempt for cross-retry AI
/// context — lets the model reason about what was tried and which
/// selectors failed, rather than reading an unstructured error string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub phase: String,
    pub action: String,
    pub detail: String,
    pub outcome: String,
    #[serde(default)]
    pub obstruction_type: String,
    #[serde(default)]
    pub dom_hash: String,
}

// ============================================================================
// Trust boundary: allowed function names
// ============================================================================

pub static ALLOWED_NAVIGATION_FUNCTIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["click", "scroll", "fill_form", "hover", "press_key", "wait_for", "navigate_url"]
        .into_iter()
        .collect()
});

pub static ALLOWED_ASSESSMENT_FUNCTIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["classify_page", "classify_obstruction", "identify_content_region", "assess_completeness"]
        .into_iter()
        .collect()
});

pub static ALLOWED_EXTRACTION_FUNCTIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["extract_structured", "repair_extraction", "deduplicate", "convert_prose_to_fields"]
        .into_iter()
        .collect()
});

pub static ALL_ALLOWED_FUNCTIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ALLOWED_NAVIGATION_FUNCTIONS
        .iter()
        .chain(ALLOWED_ASSESSMENT_FUNCTIONS.iter())
        .chain(ALLOWED_EXTRACTION_FUNCTIONS.iter())
        .copied()
        .collect()
});

pub const MAX_FUNCTION_CALLS_PER_INVOCATION: usize = 20;

/// Trust boundary between the AI Engine and the Browser Layer. Every
/// function call the model returns passes through here before dispatch;
/// `Some(reason)` means the call is dropped and logged via `AiRejected`.
pub fn validate_function_call(call: &FunctionCall, allow_cross_origin: bool, target_host: &str) -> Option<String> {
    if !ALL_ALLOWED_FUNCTIONS.contains(call.function.as_str()) {
        return Some(format!("Unknown function: {}", call.function));
    }

    match call.function.as_str() {
        "click" | "hover" => {
            if !call.parameters.contains_key("selector") {
                return Some(format!("{} requires 'selector' parameter", call.function));
            }
        }
        "scroll" => {
            let direction = call.parameters.get("direction").and_then(Value::as_str).unwrap_or("");
            if direction != "up" && direction != "down" {
                return Some(format!("scroll direction must be 'up' or 'down', got '{direction}'"));
            }
        }
        "fill_form" => {
            if !call.parameters.contains_key("selector") || !call.parameters.contains_key("value") {
                return Some("fill_form requires 'selector' and 'value' parameters".to_string());
            }
        }
        "navigate_url" => {
            let url = call.parameters.get("url").and_then(Value::as_str).unwrap_or("");
            if url.is_empty() {
                return Some("navigate_url requires a non-empty 'url' parameter".to_string());
            }
            if !allow_cross_origin {
                match url::Url::parse(url) {
                    Ok(parsed) => {
                        let host = parsed.host_str().unwrap_or("");
                        if !target_host.is_empty() && host != target_host {
                            return Some(format!("navigate_url host '{host}' does not match run target host '{target_host}'"));
                        }
                    }
                    Err(_) => return Some(format!("navigate_url could not parse url '{url}'")),
                }
            }
        }
        _ => {}
    }

    None
}

/// Truncates to a fixed HTML budget (50,000 chars) to cap token cost,
/// splitting on a char boundary rather than a byte index.
fn truncate_html(html: &str) -> &str {
    const BUDGET: usize = 50_000;
    match html.char_indices().nth(BUDGET) {
        Some((idx, _)) => &html[..idx],
        None => html,
    }
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub api_base_url: String,
    pub api_key: String,
    pub model: String,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_base_url: String::new(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    format_type: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat<'a>,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponseChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatResponseChoice>,
}

/// A stateless adapter to a remote, OpenAI-compatible chat-completions
/// endpoint. The Conduit owns all run state; this holds only its client
/// handle.
pub struct AiEngine {
    config: AiConfig,
    client: Option<reqwest::Client>,
}

impl AiEngine {
    pub fn new(config: AiConfig) -> Self {
        Self { config, client: None }
    }

    /// Attempts to build the HTTP client from configured credentials.
    /// Returning `false` is fine — the system degrades to heuristic-only.
    pub fn initialize(&mut self) -> bool {
        if self.config.api_key.is_empty() || self.config.api_base_url.is_empty() {
            return false;
        }

        match reqwest::Client::builder().timeout(Duration::from_secs(60)).build() {
            Ok(client) => {
                self.client = Some(client);
                true
            }
            Err(err) => {
                emit_structured_error(ErrorCode::AI_INITIALIZATION_FAILED, err.to_string(), None);
                false
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.client.is_some()
    }

    async fn complete_json(&self, prompt: &str) -> Result<Value, AiError> {
        let client = self.client.as_ref().ok_or_else(|| AiError::Config("AI engine not initialized".to_string()))?;

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            response_format: ResponseFormat { format_type: "json_object" },
        };

        let url = format!("{}/chat/completions", self.config.api_base_url.trim_end_matches('/'));
        let response = client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Api(format!("{status}: {body}")));
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AiError::Api("no choices in response".to_string()))?;

        Ok(serde_json::from_str(&content)?)
    }

    pub async fn classify_page(&self, dom_html: &str) -> PageClassification {
        if !self.is_available() {
            return PageClassification {
                page_state: "CONTENT_VISIBLE".to_string(),
                confidence: 0.3,
                content_regions_detected: 0,
                obstruction_indicators: Vec::new(),
            };
        }

        let prompt = format!(
            "You are an expert web intelligence analyst. Your task is to classify the state of the HTML page below.\n\n\
             Page state definitions:\n\
             \x20 CONTENT_VISIBLE - Main content is accessible with no obstruction\n\
             \x20 GATED - Content is behind a login wall, paywall, age gate, or subscription prompt\n\
             \x20 BLOCKED - Access is denied: bot detection, IP ban, geo-restriction, or CAPTCHA\n\
             \x20 ERROR - The server returned an error page (404, 500, 503, etc.)\n\
             \x20 LOADING - Page is still loading: spinner, skeleton screen, or 'please wait' message\n\
             \x20 REDIRECT - A redirect stub with no meaningful content\n\
             \x20 EMPTY - Page loaded successfully but contains no meaningful content\n\n\
             For obstruction_indicators, list specific observable signals you see in the HTML, e.g. \
             'cookie consent modal', 'login form overlay', 'CAPTCHA challenge', 'paywall blur', \
             'age verification gate'.\n\n\
             Return JSON: {{page_state, confidence, content_regions_detected, obstruction_indicators}}.\n\n\
             HTML:\n{}",
            truncate_html(dom_html)
        );

        match self.complete_json(&prompt).await {
            Ok(value) => match serde_json::from_value(value) {
                Ok(classification) => classification,
                Err(err) => {
                    emit_structured_error(ErrorCode::AI_CLASSIFICATION_FAILED, err.to_string(), None);
                    PageClassification {
                        page_state: "CONTENT_VISIBLE".to_string(),
                        confidence: 0.2,
                        content_regions_detected: 0,
                        obstruction_indicators: Vec::new(),
                    }
                }
            },
            Err(err) => {
                emit_structured_error(ErrorCode::AI_CLASSIFICATION_FAILED, err.to_string(), None);
                PageClassification {
                    page_state: "CONTENT_VISIBLE".to_string(),
                    confidence: 0.2,
                    content_regions_detected: 0,
                    obstruction_indicators: Vec::new(),
                }
            }
        }
    }

    pub async fn generate_navigation_plan(
        &self,
        dom_html: &str,
        obstruction_type: &str,
        target_schema: &Value,
        prior_attempts: &[AttemptRecord],
    ) -> NavigationPlan {
        if !self.is_available() {
            return NavigationPlan {
                actions: Vec::new(),
                estimated_steps: 0,
                confidence: 0.0,
            };
        }

        let mut attempts_context = String::new();
        let mut failed_selectors = Vec::new();
        if !prior_attempts.is_empty() {
            attempts_context.push_str("\nPrior failed attempts (do NOT repeat these same strategies):\n");
            for (i, rec) in prior_attempts.iter().enumerate() {
                attempts_context.push_str(&format!(
                    "  {}. phase={} action={} detail={:?} outcome={}",
                    i + 1,
                    rec.phase,
                    rec.action,
                    rec.detail,
                    rec.outcome
                ));
                if !rec.obstruction_type.is_empty() {
                    attempts_context.push_str(&format!(" obstruction={}", rec.obstruction_type));
                }
                attempts_context.push('\n');
                if matches!(rec.action.as_str(), "click" | "fill_form" | "hover" | "wait_for") && !rec.detail.is_empty() {
                    failed_selectors.push(rec.detail.clone());
                }
            }
            if !failed_selectors.is_empty() {
                attempts_context.push_str("\nDo NOT use these selectors — they already failed:\n");
                for selector in &failed_selectors {
                    attempts_context.push_str(&format!("  - {selector}\n"));
                }
            }
        }

        let prompt = format!(
            "You are an expert web automation agent. Your task is to generate a precise, minimal \
             browser action plan to resolve a page obstruction.\n\n\
             Obstruction type: {obstruction_type}\n\
             Target extraction schema: {}\n\
             {attempts_context}\n\
             Permitted browser functions — use ONLY these, never others:\n\
             \x20 click(selector, wait_after_ms?) - click element by CSS selector\n\
             \x20 scroll(direction, amount) - direction: 'up'/'down'; amount: pixels, 'page', or 'end'\n\
             \x20 fill_form(selector, value) - type text into a form field\n\
             \x20 hover(selector) - hover over an element\n\
             \x20 press_key(key) - send a key: Escape, Enter, Tab, Space, etc.\n\
             \x20 wait_for(selector, timeout_ms?) - wait for element to appear in DOM\n\
             \x20 navigate_url(url) - navigate to URL (same-origin only)\n\n\
             Selector guidance: prefer stable attributes — [data-*], [aria-label], [id], semantic tags \
             (<button>, <input>). Avoid short dynamically generated class names like .cls-abc123.\n\n\
             Return JSON: {{actions: [{{function, parameters, expected_outcome}}], estimated_steps: int, \
             confidence: float 0-1}}.\n\n\
             HTML:\n{}",
            target_schema,
            truncate_html(dom_html)
        );

        let data = match self.complete_json(&prompt).await {
            Ok(value) => value,
            Err(err) => {
                emit_structured_error(ErrorCode::AI_PLAN_GENERATION_FAILED, err.to_string(), None);
                return NavigationPlan {
                    actions: Vec::new(),
                    estimated_steps: 0,
                    confidence: 0.0,
                };
            }
        };

        let mut plan: NavigationPlan = match serde_json::from_value(data) {
            Ok(plan) => plan,
            Err(err) => {
                emit_structured_error(ErrorCode::AI_PLAN_GENERATION_FAILED, err.to_string(), None);
                return NavigationPlan {
                    actions: Vec::new(),
                    estimated_steps: 0,
                    confidence: 0.0,
                };
            }
        };

        if plan.actions.len() > MAX_FUNCTION_CALLS_PER_INVOCATION {
            plan.actions.truncate(MAX_FUNCTION_CALLS_PER_INVOCATION);
        }
        plan
    }

    pub async fn extract_structured(&self, dom_html: &str, schema: &Value, source_url: &str) -> ExtractionResult {
        if !self.is_available() {
            return ExtractionResult::default();
        }

        let prompt = format!(
            "You are an expert data extraction specialist. Extract structured records from the HTML \
             below, strictly following the provided schema.\n\n\
             Schema: {schema}\n\
             Source URL: {source_url}\n\n\
             Extraction rules:\n\
             \x20 1. Return one record per distinct entity found in the page.\n\
             \x20 2. Match schema field types exactly: numbers as JSON numbers (not strings), dates as \
             ISO-8601 strings (YYYY-MM-DD), booleans as true/false.\n\
             \x20 3. For optional schema fields absent from the page, use null — never an empty string.\n\
             \x20 4. If two records share identical values for all fields, count only one and increment \
             duplicates_detected.\n\
             \x20 5. Set completeness_score to the fraction of schema fields that are non-null across \
             all extracted records (0.0-1.0).\n\n\
             HTML:\n{}",
            truncate_html(dom_html)
        );

        match self.complete_json(&prompt).await {
            Ok(value) => serde_json::from_value(value).unwrap_or_default(),
            Err(err) => {
                emit_structured_error(ErrorCode::AI_EXTRACTION_FAILED, err.to_string(), None);
                ExtractionResult::default()
            }
        }
    }

    pub async fn repair_extraction(&self, partial_data: &Value, schema: &Value, dom_html: &str) -> ExtractionResult {
        if !self.is_available() {
            return ExtractionResult::default();
        }

        let issues_text = diagnose_partial(partial_data, schema);

        let prompt = format!(
            "You are an expert data extraction repair specialist. The previous extraction attempt was \
             incomplete or contained errors. Your task is to repair it.\n\n\
             What went wrong:\n{issues_text}\n\n\
             Partial extraction data:\n{partial_data}\n\n\
             Target schema:\n{schema}\n\n\
             Repair rules:\n\
             \x20 1. Output only records that improve upon the partial data.\n\
             \x20 2. For any field already present with confidence >= 0.5, preserve it.\n\
             \x20 3. Fill missing fields by locating them in the HTML below.\n\
             \x20 4. Match schema field types: numbers as JSON numbers, dates as ISO-8601 strings, \
             missing optional fields as null.\n\
             \x20 5. Set completeness_score to the fraction of schema fields now non-null.\n\n\
             HTML:\n{}",
            truncate_html(dom_html)
        );

        match self.complete_json(&prompt).await {
            Ok(value) => serde_json::from_value(value).unwrap_or_default(),
            Err(err) => {
                emit_structured_error(ErrorCode::AI_REPAIR_FAILED, err.to_string(), None);
                ExtractionResult::default()
            }
        }
    }
}

/// The surface the Conduit drives the AI Engine through. Pulled out as a
/// trait so integration tests can swap in a deterministic in-memory fake
/// instead of a real chat-completions endpoint.
#[async_trait::async_trait]
pub trait AiOps: Send + Sync {
    fn is_available(&self) -> bool;
    async fn classify_page(&self, dom_html: &str) -> PageClassification;
    async fn generate_navigation_plan(
        &self,
        dom_html: &str,
        obstruction_type: &str,
        target_schema: &Value,
        prior_attempts: &[AttemptRecord],
    ) -> NavigationPlan;
    async fn extract_structured(&self, dom_html: &str, schema: &Value, source_url: &str) -> ExtractionResult;
    async fn repair_extraction(&self, partial_data: &Value, schema: &Value, dom_html: &str) -> ExtractionResult;
}

#[async_trait::async_trait]
impl AiOps for AiEngine {
    fn is_available(&self) -> bool {
        AiEngine::is_available(self)
    }

    async fn classify_page(&self, dom_html: &str) -> PageClassification {
        AiEngine::classify_page(self, dom_html).await
    }

    async fn generate_navigation_plan(
        &self,
        dom_html: &str,
        obstruction_type: &str,
        target_schema: &Value,
        prior_attempts: &[AttemptRecord],
    ) -> NavigationPlan {
        AiEngine::generate_navigation_plan(self, dom_html, obstruction_type, target_schema, prior_attempts).await
    }

    async fn extract_structured(&self, dom_html: &str, schema: &Value, source_url: &str) -> ExtractionResult {
        AiEngine::extract_structured(self, dom_html, schema, source_url).await
    }

    async fn repair_extraction(&self, partial_data: &Value, schema: &Value, dom_html: &str) -> ExtractionResult {
        AiEngine::repair_extraction(self, partial_data, schema, dom_html).await
    }
}

/// Builds a human-readable diagnosis of what's wrong with a partial
/// extraction, included in the repair prompt so the model knows what to
/// focus on instead of re-deriving it from scratch.
fn diagnose_partial(partial_data: &Value, schema: &Value) -> String {
    let mut issues = Vec::new();
    let records = partial_data.get("records").and_then(Value::as_array).cloned().unwrap_or_default();

    if records.is_empty() {
        issues.push("no records were extracted at all".to_string());
    } else {
        let schema_fields: HashSet<String> = schema
            .as_object()
            .map(|obj| obj.keys().cloned().collect())
            .unwrap_or_default();

        for (idx, record) in records.iter().enumerate() {
            let record_fields: HashSet<String> = record
                .as_object()
                .map(|obj| obj.keys().cloned().collect())
                .unwrap_or_default();
            let missing: Vec<&String> = schema_fields.difference(&record_fields).collect();
            if !missing.is_empty() {
                let mut sorted = missing.clone();
                sorted.sort();
                issues.push(format!("record {idx}: missing fields {sorted:?}"));
            }

            if let Some(obj) = record.as_object() {
                let low_conf: Vec<&String> = obj
                    .iter()
                    .filter(|(_, v)| {
                        v.get("confidence").and_then(Value::as_f64).map(|c| c < 0.5).unwrap_or(false)
                    })
                    .map(|(k, _)| k)
                    .collect();
                if !low_conf.is_empty() {
                    issues.push(format!("record {idx}: low-confidence fields {low_conf:?}"));
                }
            }
        }
    }

    if issues.is_empty() {
        "  - completeness_score is below threshold".to_string()
    } else {
        issues.iter().map(|i| format!("  - {i}")).collect::<Vec<_>>().join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(function: &str, params: &[(&str, Value)]) -> FunctionCall {
        FunctionCall {
            function: function.to_string(),
            parameters: params.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            expected_outcome: String::new(),
            fallback: None,
        }
    }

    #[test]
    fn unknown_function_is_rejected() {
        let c = call("eval_arbitrary_code", &[]);
        assert!(validate_function_call(&c, false, "x.test").is_some());
    }

    #[test]
    fn click_requires_selector() {
        let c = call("click", &[]);
        assert!(validate_function_call(&c, false, "x.test").is_some());
        let c = call("click", &[("selector", Value::String(".btn".into()))]);
        assert!(validate_function_call(&c, false, "x.test").is_none());
    }

    #[test]
    fn scroll_requires_valid_direction() {
        let c = call("scroll", &[("direction", Value::String("sideways".into()))]);
        assert!(validate_function_call(&c, false, "x.test").is_some());
        let c = call("scroll", &[("direction", Value::String("down".into()))]);
        assert!(validate_function_call(&c, false, "x.test").is_none());
    }

    #[test]
    fn fill_form_requires_selector_and_value() {
        let c = call("fill_form", &[("selector", Value::String("#x".into()))]);
        assert!(validate_function_call(&c, false, "x.test").is_some());
        let c = call(
            "fill_form",
            &[("selector", Value::String("#x".into())), ("value", Value::String("y".into()))],
        );
        assert!(validate_function_call(&c, false, "x.test").is_none());
    }

    #[test]
    fn navigate_url_rejects_cross_origin_when_disallowed() {
        let c = call("navigate_url", &[("url", Value::String("https://evil.test/phish".into()))]);
        assert!(validate_function_call(&c, false, "x.test").is_some());
        let c = call("navigate_url", &[("url", Value::String("https://x.test/page2".into()))]);
        assert!(validate_function_call(&c, false, "x.test").is_none());
    }

    #[test]
    fn navigate_url_allows_cross_origin_when_permitted() {
        let c = call("navigate_url", &[("url", Value::String("https://evil.test/phish".into()))]);
        assert!(validate_function_call(&c, true, "x.test").is_none());
    }

    #[test]
    fn navigation_plan_truncates_to_max_actions() {
        let actions: Vec<FunctionCall> = (0..30).map(|_| call("click", &[("selector", Value::String(".x".into()))])).collect();
        let mut plan = NavigationPlan { actions, estimated_steps: 30, confidence: 0.9 };
        if plan.actions.len() > MAX_FUNCTION_CALLS_PER_INVOCATION {
            plan.actions.truncate(MAX_FUNCTION_CALLS_PER_INVOCATION);
        }
        assert_eq!(plan.actions.len(), MAX_FUNCTION_CALLS_PER_INVOCATION);
    }

    #[test]
    fn uninitialized_engine_is_unavailable() {
        let engine = AiEngine::new(AiConfig {
            api_base_url: String::new(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
        });
        assert!(!engine.is_available());
    }

    #[test]
    fn truncate_html_respects_budget() {
        let long = "x".repeat(60_000);
        assert_eq!(truncate_html(&long).len(), 50_000);
        assert_eq!(truncate_html("short"), "short");
    }

    #[test]
    fn diagnose_partial_reports_no_records() {
        let partial = serde_json::json!({"records": []});
        let schema = serde_json::json!({"title": "string"});
        assert!(diagnose_partial(&partial, &schema).contains("no records"));
    }
}
