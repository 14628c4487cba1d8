// Module: Conduit
// The deterministic phase-driven engine that owns a single scraping run. It
// coordinates the Browser Layer, the AI Engine, the Pipeline Manager, and
// the Signal Emitter, but holds the only decision-making authority itself:
// every transition flows through `transition()`, and every retry, backoff,
// and fallback decision is made here, not delegated to a sub-component.

pub mod config;
pub mod phases;
pub mod url_policy;

use std::collections::HashMap;
use std::time::Instant;

use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::ai_engine::{AiConfig, AiEngine, AiOps, AttemptRecord, FunctionCall};
use crate::browser::obstruction::{detect_obstruction, ObstructionType};
use crate::browser::{BrowserConfig, BrowserLayer, BrowserOps, DomSnapshot};
use crate::pipeline::extraction::{ExtractionMode, ExtractionRecord, FieldValue, RecordMetadata};
use crate::pipeline::heuristic::heuristic_extract;
use crate::pipeline::{PipelineManager, RunMetadata};
use crate::retry::conduit_backoff;
use crate::signals::{SignalEmitter, SignalType};

use config::HermesConfig;
use phases::Phase;

#[derive(Debug, Error)]
pub enum ConduitError {
    /// A phase handler attempted a transition absent from the FSM's
    /// transition table. The FSM's own table makes this branch unreachable
    /// in correct code, so reaching it is a bug, not a recoverable fault.
    #[error("invalid phase transition: {from:?} -> {to:?}")]
    InvariantViolation { from: Phase, to: Phase },
}

/// An AI plan may not queue more than this many actions for one
/// `ExecutePlan` pass; the rest are dropped before they ever reach the
/// pending plan.
const MAX_PLAN_ACTIONS: usize = 20;

/// DOM content beyond this many characters is not sent to the model.
const MAX_DOM_CHARS_FOR_AI: usize = 50_000;

fn truncate_for_ai(html: &str) -> &str {
    match html.char_indices().nth(MAX_DOM_CHARS_FOR_AI) {
        Some((byte_idx, _)) => &html[..byte_idx],
        None => html,
    }
}

/// Summary returned by `run()` once a Conduit reaches a terminal phase.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: String,
    pub phase: String,
    pub records_count: usize,
    pub duration_s: f64,
    pub ai_calls: u32,
    pub signals_count: usize,
}

/// Drives one scraping run through its finite state machine.
pub struct Conduit {
    run_id: String,
    phase: Phase,
    config: HermesConfig,
    browser: Box<dyn BrowserOps>,
    ai: Box<dyn AiOps>,
    pipeline: PipelineManager,
    signals: SignalEmitter,
    current_dom: Option<DomSnapshot>,
    attempts: u32,
    ai_calls: u32,
    interaction_trace: Vec<String>,
    prior_ai_attempts: Vec<AttemptRecord>,
    pending_plan: Vec<FunctionCall>,
    start_time: Instant,
    cancel_token: CancellationToken,
}

impl Conduit {
    /// Builds a Conduit from a complete run configuration. Constructs the
    /// Browser Layer, AI Engine, Pipeline Manager, and Signal Emitter; does
    /// not itself validate the target URL — that is the caller's
    /// precondition (§url_policy), checked before a Conduit is ever built.
    pub fn new(config: HermesConfig) -> anyhow::Result<Self> {
        let run_id = format!("run_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);

        let browser_config = BrowserConfig {
            headless: config.browser.headless,
            viewport_width: config.browser.viewport_width,
            viewport_height: config.browser.viewport_height,
            user_agent: config.browser.user_agent.clone(),
            locale: config.browser.locale.clone(),
            rendering_service_url: config.browser.rendering_service_url.clone(),
            rendering_service_token: config.browser.rendering_service_token.clone(),
        };
        let browser = BrowserLayer::new(browser_config)?;

        let ai_config = AiConfig {
            api_base_url: config.ai.api_base_url.clone(),
            api_key: config.ai.api_key.clone(),
            model: config.ai.model.clone(),
        };
        let mut ai = AiEngine::new(ai_config);
        if matches!(config.extraction_mode.as_str(), "ai" | "hybrid") {
            // Initialization failure just demotes the run to heuristic-only
            // extraction; it never fails the run by itself.
            ai.initialize();
        }

        let pipeline = PipelineManager::new(&run_id, std::path::Path::new(&config.pipeline.data_dir), config.pipeline.debug_mode)?;

        let ledger_path = std::path::Path::new(&config.pipeline.data_dir).join(&run_id).join("signals.jsonl");
        let signals = SignalEmitter::new(&run_id, Some(ledger_path))?;

        Ok(Self {
            run_id,
            phase: Phase::Init,
            config,
            browser: Box::new(browser),
            ai: Box::new(ai),
            pipeline,
            signals,
            current_dom: None,
            attempts: 0,
            ai_calls: 0,
            interaction_trace: Vec::new(),
            prior_ai_attempts: Vec::new(),
            pending_plan: Vec::new(),
            start_time: Instant::now(),
            cancel_token: CancellationToken::new(),
        })
    }

    /// Test/embedding seam: build a Conduit around caller-supplied
    /// Browser/AI implementations (typically in-memory fakes) instead of
    /// the real rendering-service and chat-completions adapters.
    pub fn with_components(
        config: HermesConfig,
        browser: Box<dyn BrowserOps>,
        ai: Box<dyn AiOps>,
    ) -> anyhow::Result<Self> {
        let run_id = format!("run_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);
        let pipeline = PipelineManager::new(&run_id, std::path::Path::new(&config.pipeline.data_dir), config.pipeline.debug_mode)?;
        let ledger_path = std::path::Path::new(&config.pipeline.data_dir).join(&run_id).join("signals.jsonl");
        let signals = SignalEmitter::new(&run_id, Some(ledger_path))?;

        Ok(Self {
            run_id,
            phase: Phase::Init,
            config,
            browser,
            ai,
            pipeline,
            signals,
            current_dom: None,
            attempts: 0,
            ai_calls: 0,
            interaction_trace: Vec::new(),
            prior_ai_attempts: Vec::new(),
            pending_plan: Vec::new(),
            start_time: Instant::now(),
            cancel_token: CancellationToken::new(),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn signals(&self) -> &SignalEmitter {
        &self.signals
    }

    /// A token an external caller (e.g. an API layer aborting the run) can
    /// cancel to stop the Conduit cooperatively at the top of its next loop
    /// iteration. The run then terminates via Fail, without `RunComplete`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    fn target_host(&self) -> String {
        url::Url::parse(&self.config.target_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default()
    }

    /// The single choke point for every phase change. A transition outside
    /// `VALID_TRANSITIONS[current]` is a fatal invariant violation: it is
    /// returned as a dedicated error, never silently coerced or retried.
    async fn transition(&mut self, to: Phase, context: Value) -> Result<(), ConduitError> {
        if !phases::is_valid_transition(self.phase, to) {
            return Err(ConduitError::InvariantViolation { from: self.phase, to });
        }
        let from = self.phase;
        self.phase = to;
        self.signals.emit_phase_transition(from.as_str(), to.as_str(), context).await;
        Ok(())
    }

    /// One-shot terminal transition: re-entry while already terminal is a
    /// no-op rather than a second `RunFailed` signal.
    async fn fail(&mut self, reason: impl Into<String>) {
        if phases::TERMINAL_PHASES.contains(&self.phase) {
            return;
        }
        let phase_at_failure = self.phase.as_str().to_string();
        self.phase = Phase::Fail;
        self.signals
            .emit_run_failed(&reason.into(), &phase_at_failure, self.attempts)
            .await;
    }

    async fn backoff(&self) {
        let delay = conduit_backoff(
            self.attempts,
            self.config.retry.backoff_base_ms,
            self.config.retry.backoff_max_ms,
            self.config.retry.jitter,
        );
        tokio::time::sleep(delay).await;
    }

    fn global_timeout_exceeded(&self) -> bool {
        self.start_time.elapsed().as_secs_f64() > self.config.timeouts.global_timeout_s as f64
    }

    /// Runs the Conduit to completion: `Init` through a terminal phase.
    #[instrument(skip(self), fields(run_id = %self.run_id))]
    pub async fn run(&mut self) -> RunSummary {
        loop {
            if self.global_timeout_exceeded() {
                self.fail("Global timeout exceeded").await;
            }

            if self.cancel_token.is_cancelled() && !phases::TERMINAL_PHASES.contains(&self.phase) {
                self.phase = Phase::Fail;
                break;
            }

            if phases::TERMINAL_PHASES.contains(&self.phase) {
                break;
            }

            let result = match self.phase {
                Phase::Init => self.phase_init().await,
                Phase::Navigate => self.phase_navigate().await,
                Phase::Assess => self.phase_assess().await,
                Phase::Obstruct => self.phase_obstruct().await,
                Phase::AiReason => self.phase_ai_reason().await,
                Phase::ExecutePlan => self.phase_execute_plan().await,
                Phase::Extract => self.phase_extract().await,
                Phase::Validate => self.phase_validate().await,
                Phase::Repair => self.phase_repair().await,
                Phase::Persist => self.phase_persist().await,
                Phase::Complete | Phase::Fail => Ok(()),
            };

            if let Err(ConduitError::InvariantViolation { from, to }) = result {
                crate::errors::emit_structured_error(
                    crate::errors::ErrorCode::INVALID_PHASE_TRANSITION,
                    format!("invalid transition {from:?} -> {to:?}"),
                    Some(&self.run_id),
                );
                self.fail(format!("Fatal invariant violation: invalid transition {from:?} -> {to:?}")).await;
                break;
            }
        }

        self.cleanup().await;

        let status = if self.phase == Phase::Complete { "complete" } else { "failed" };
        RunSummary {
            run_id: self.run_id.clone(),
            status: status.to_string(),
            phase: self.phase.as_str().to_string(),
            records_count: self.pipeline.processed_records().len(),
            duration_s: self.start_time.elapsed().as_secs_f64(),
            ai_calls: self.ai_calls,
            signals_count: self.signals.signals().await.len(),
        }
    }

    async fn cleanup(&mut self) {
        let _ = self.browser.stop().await;
    }

    // ------------------------------------------------------------------
    // Phase handlers
    // ------------------------------------------------------------------

    #[instrument(skip(self), fields(run_id = %self.run_id, phase = "INIT"))]
    async fn phase_init(&mut self) -> Result<(), ConduitError> {
        let result = self.browser.start().await;
        if !result.is_success() {
            self.fail(format!("Initialization failed: {}", result.detail)).await;
            return Ok(());
        }

        self.transition(Phase::Navigate, serde_json::json!({"target_url": self.config.target_url})).await
    }

    #[instrument(skip(self), fields(run_id = %self.run_id, phase = "NAVIGATE"))]
    async fn phase_navigate(&mut self) -> Result<(), ConduitError> {
        let timeout_ms = self.config.timeouts.page_load_timeout_s * 1000;
        let result = self.browser.navigate(&self.config.target_url, timeout_ms).await;

        if result.is_success() {
            self.interaction_trace.push(format!("navigate:{}", self.config.target_url));
            return self.transition(Phase::Assess, Value::Null).await;
        }

        if self.attempts < self.config.retry.max_retries {
            self.attempts += 1;
            self.signals
                .emit_raw(
                    SignalType::RetryAttempt,
                    serde_json::json!({
                        "attempt_number": self.attempts,
                        "max_attempts": self.config.retry.max_retries,
                        "reason": result.detail,
                    }),
                )
                .await;
            self.backoff().await;
            Ok(())
        } else {
            self.fail(format!("Navigation failed: {}", result.detail)).await;
            Ok(())
        }
    }

    #[instrument(skip(self), fields(run_id = %self.run_id, phase = "ASSESS"))]
    async fn phase_assess(&mut self) -> Result<(), ConduitError> {
        let dom = match self.browser.capture_dom().await {
            Some(dom) => dom,
            None => {
                self.fail("Could not capture DOM snapshot").await;
                return Ok(());
            }
        };
        self.current_dom = Some(dom.clone());

        let obstruction = detect_obstruction(&dom.html);
        match obstruction.obstruction_type {
            ObstructionType::None => self.transition(Phase::Extract, Value::Null).await,
            ObstructionType::HardBlock => {
                self.signals
                    .emit_raw(
                        SignalType::ObstructionDetected,
                        serde_json::json!({
                            "obstruction_type": obstruction.obstruction_type,
                            "dom_hash": dom.dom_hash,
                            "confidence": obstruction.confidence,
                        }),
                    )
                    .await;
                self.fail("Hard block detected: cannot proceed").await;
                Ok(())
            }
            other => {
                self.signals
                    .emit_raw(
                        SignalType::ObstructionDetected,
                        serde_json::json!({
                            "obstruction_type": other,
                            "dom_hash": dom.dom_hash,
                            "confidence": obstruction.confidence,
                            "selector": obstruction.selector,
                        }),
                    )
                    .await;
                self.transition(
                    Phase::Obstruct,
                    serde_json::json!({"obstruction_type": other, "requires_ai": obstruction.requires_ai}),
                )
                .await
            }
        }
    }

    #[instrument(skip(self), fields(run_id = %self.run_id, phase = "OBSTRUCT"))]
    async fn phase_obstruct(&mut self) -> Result<(), ConduitError> {
        let html = self.current_dom.as_ref().map(|d| d.html.clone()).unwrap_or_default();
        let obstruction = detect_obstruction(&html);

        if !obstruction.requires_ai {
            if let Some(selector) = &obstruction.selector {
                let result = self.browser.click(selector, 500).await;
                self.signals
                    .emit_raw(
                        SignalType::ActionExecuted,
                        serde_json::json!({"action_type": "click", "selector": selector, "result": result.status}),
                    )
                    .await;
                if result.is_success() {
                    self.interaction_trace.push(format!("click:{selector}"));
                    self.attempts = 0;
                    return self.transition(Phase::Navigate, Value::Null).await;
                }
            }
        }

        if self.ai.is_available() {
            return self
                .transition(Phase::AiReason, serde_json::json!({"obstruction_type": obstruction.obstruction_type}))
                .await;
        }

        if self.attempts < self.config.retry.max_retries {
            self.attempts += 1;
            self.signals
                .emit_raw(
                    SignalType::RetryAttempt,
                    serde_json::json!({
                        "attempt_number": self.attempts,
                        "max_attempts": self.config.retry.max_retries,
                        "reason": "Obstruction unresolvable without AI",
                    }),
                )
                .await;
            self.backoff().await;
            self.transition(Phase::Navigate, Value::Null).await
        } else {
            self.fail("Obstruction unresolvable: AI not available and retries exhausted").await;
            Ok(())
        }
    }

    #[instrument(skip(self), fields(run_id = %self.run_id, phase = "AI_REASON"))]
    async fn phase_ai_reason(&mut self) -> Result<(), ConduitError> {
        let html = self.current_dom.as_ref().map(|d| d.html.clone()).unwrap_or_default();
        let obstruction_type = self.current_obstruction_type_string();

        self.signals
            .emit_raw(
                SignalType::AiInvoked,
                serde_json::json!({
                    "request_type": "navigation_plan",
                    "dom_size": html.len(),
                    "phase_context": obstruction_type,
                }),
            )
            .await;

        let started = Instant::now();
        let plan = self
            .ai
            .generate_navigation_plan(truncate_for_ai(&html), &obstruction_type, &self.config.extraction_schema, &self.prior_ai_attempts)
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;
        self.ai_calls += 1;

        self.signals
            .emit_raw(
                SignalType::AiResponded,
                serde_json::json!({
                    "response_type": "navigation_plan",
                    "function_calls_count": plan.actions.len(),
                    "latency_ms": latency_ms,
                    "confidence": plan.confidence,
                }),
            )
            .await;

        if plan.actions.is_empty() {
            self.prior_ai_attempts.push(AttemptRecord {
                phase: "AI_REASON".to_string(),
                action: "generate_navigation_plan".to_string(),
                detail: String::new(),
                outcome: "AI returned empty plan".to_string(),
                obstruction_type: obstruction_type.clone(),
                dom_hash: self.current_dom.as_ref().map(|d| d.dom_hash.clone()).unwrap_or_default(),
            });
            if self.attempts < self.config.retry.max_retries {
                self.attempts += 1;
                self.signals
                    .emit_raw(
                        SignalType::RetryAttempt,
                        serde_json::json!({
                            "attempt_number": self.attempts,
                            "max_attempts": self.config.retry.max_retries,
                            "reason": "AI returned empty plan",
                        }),
                    )
                    .await;
                self.backoff().await;
                return self.transition(Phase::Navigate, Value::Null).await;
            }
            self.fail("AI returned empty plan and retries exhausted").await;
            return Ok(());
        }

        let target_host = self.target_host();
        let mut validated = Vec::new();
        for action in plan.actions {
            match crate::ai_engine::validate_function_call(&action, self.config.allow_cross_origin, &target_host) {
                Some(reason) => {
                    self.signals
                        .emit_raw(
                            SignalType::AiRejected,
                            serde_json::json!({"reason": reason, "rejected_action": action.function, "phase_context": "AI_REASON"}),
                        )
                        .await;
                }
                None => validated.push(action),
            }
        }

        if validated.is_empty() {
            self.prior_ai_attempts.push(AttemptRecord {
                phase: "AI_REASON".to_string(),
                action: "generate_navigation_plan".to_string(),
                detail: String::new(),
                outcome: "All AI actions were rejected by validation".to_string(),
                obstruction_type: obstruction_type.clone(),
                dom_hash: self.current_dom.as_ref().map(|d| d.dom_hash.clone()).unwrap_or_default(),
            });
            self.fail("All AI-generated actions rejected by allowlist validation").await;
            return Ok(());
        }

        validated.truncate(MAX_PLAN_ACTIONS);
        self.pending_plan = validated;
        self.transition(Phase::ExecutePlan, Value::Null).await
    }

    fn current_obstruction_type_string(&self) -> String {
        let html = self.current_dom.as_ref().map(|d| d.html.as_str()).unwrap_or("");
        format!("{:?}", detect_obstruction(html).obstruction_type)
    }

    #[instrument(skip(self), fields(run_id = %self.run_id, phase = "EXECUTE_PLAN"))]
    async fn phase_execute_plan(&mut self) -> Result<(), ConduitError> {
        if self.pending_plan.is_empty() {
            return self.transition(Phase::Assess, Value::Null).await;
        }

        let plan = std::mem::take(&mut self.pending_plan);
        for action in plan {
            let selector = action.parameters.get("selector").and_then(Value::as_str).unwrap_or("").to_string();
            let result = self.execute_action(&action).await;
            self.signals
                .emit_raw(
                    SignalType::ActionExecuted,
                    serde_json::json!({"action_type": action.function, "selector": selector, "result": result}),
                )
                .await;
            if result != "success" {
                self.prior_ai_attempts.push(AttemptRecord {
                    phase: "EXECUTE_PLAN".to_string(),
                    action: action.function.clone(),
                    detail: selector,
                    outcome: result,
                    obstruction_type: String::new(),
                    dom_hash: self.current_dom.as_ref().map(|d| d.dom_hash.clone()).unwrap_or_default(),
                });
                break;
            }
        }

        self.pending_plan.clear();
        self.attempts = 0;
        self.transition(Phase::Assess, Value::Null).await
    }

    async fn execute_action(&self, action: &FunctionCall) -> String {
        let params = &action.parameters;
        let get = |key: &str| params.get(key).and_then(Value::as_str).unwrap_or("").to_string();
        let interaction_timeout_ms = self.config.timeouts.interaction_timeout_s * 1000;

        let result = match action.function.as_str() {
            "click" => self.browser.click(&get("selector"), 500).await,
            "scroll" => self.browser.scroll(&get("direction"), &get("amount")).await,
            "fill_form" => self.browser.fill_form(&get("selector"), &get("value")).await,
            "hover" => self.browser.hover(&get("selector")).await,
            "press_key" => self.browser.press_key(&get("key")).await,
            "wait_for" => self.browser.wait_for(&get("selector"), interaction_timeout_ms).await,
            "navigate_url" => {
                let url = get("url");
                if !self.config.allow_cross_origin {
                    let target_host = self.target_host();
                    let action_host = url::Url::parse(&url).ok().and_then(|u| u.host_str().map(str::to_string)).unwrap_or_default();
                    if !target_host.is_empty() && action_host != target_host {
                        return "failure".to_string();
                    }
                }
                self.browser.navigate(&url, interaction_timeout_ms).await
            }
            _ => return "failure".to_string(),
        };

        match result.status {
            crate::browser::ActionStatus::Success => "success".to_string(),
            crate::browser::ActionStatus::Failure => "failure".to_string(),
            crate::browser::ActionStatus::Timeout => "timeout".to_string(),
        }
    }

    #[instrument(skip(self), fields(run_id = %self.run_id, phase = "EXTRACT"))]
    async fn phase_extract(&mut self) -> Result<(), ConduitError> {
        if self.current_dom.is_none() {
            self.current_dom = self.browser.capture_dom().await;
        }
        let Some(dom) = self.current_dom.clone() else {
            self.fail("Could not capture DOM snapshot for extraction").await;
            return Ok(());
        };

        self.pipeline.capture_raw(&dom.html, &dom.url, &dom.dom_hash, None);

        let has_selectors = !self.config.heuristic_selectors.is_empty();
        let ai_available = self.ai.is_available();

        match self.config.extraction_mode.as_str() {
            "heuristic" if has_selectors => self.extract_heuristic(&dom).await,
            "ai" if ai_available => self.extract_ai(&dom).await,
            "hybrid" => self.extract_hybrid(&dom).await,
            _ if has_selectors => self.extract_heuristic(&dom).await,
            _ if ai_available => self.extract_ai(&dom).await,
            _ => {
                self.fail("No extraction configuration: no selectors and AI unavailable").await;
                return Ok(());
            }
        }

        self.transition(Phase::Validate, Value::Null).await
    }

    async fn extract_heuristic(&mut self, dom: &DomSnapshot) {
        let records = heuristic_extract(&dom.html, &self.config.heuristic_selectors, &dom.url, &dom.dom_hash);
        for record in records {
            self.pipeline.add_processed_record(record);
        }
    }

    async fn extract_ai(&mut self, dom: &DomSnapshot) {
        self.signals
            .emit_raw(
                SignalType::AiInvoked,
                serde_json::json!({"request_type": "extraction", "dom_size": dom.html.len(), "phase_context": "EXTRACT"}),
            )
            .await;

        let started = Instant::now();
        let result = self.ai.extract_structured(truncate_for_ai(&dom.html), &self.config.extraction_schema, &dom.url).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        self.ai_calls += 1;

        self.signals
            .emit_raw(
                SignalType::AiResponded,
                serde_json::json!({"response_type": "extraction", "function_calls_count": 0, "latency_ms": latency_ms}),
            )
            .await;

        for raw_record in result.records {
            let record = self.wrap_ai_record(raw_record, &dom.url, &dom.dom_hash, result.completeness_score, 0.7);
            self.pipeline.add_processed_record(record);
        }
    }

    async fn extract_hybrid(&mut self, dom: &DomSnapshot) {
        if !self.config.heuristic_selectors.is_empty() {
            self.extract_heuristic(dom).await;
        }

        let any_partial = self.pipeline.processed_records().iter().any(|r| r.is_partial);
        if any_partial && self.ai.is_available() {
            self.extract_ai(dom).await;
        }
    }

    fn wrap_ai_record(
        &self,
        raw_record: HashMap<String, Value>,
        source_url: &str,
        dom_hash: &str,
        completeness_score: f64,
        default_confidence: f64,
    ) -> ExtractionRecord {
        let fields = raw_record
            .into_iter()
            .map(|(k, v)| (k, FieldValue::normalize(v, default_confidence)))
            .collect();
        let metadata = RecordMetadata::new(source_url, dom_hash, ExtractionMode::Ai).with_ai_model(self.config.ai.model.clone());
        ExtractionRecord::new(fields, metadata, completeness_score)
    }

    #[instrument(skip(self), fields(run_id = %self.run_id, phase = "VALIDATE"))]
    async fn phase_validate(&mut self) -> Result<(), ConduitError> {
        let records = self.pipeline.processed_records();

        if records.is_empty() {
            if self.attempts < self.config.retry.max_retries && self.ai.is_available() {
                self.attempts += 1;
                self.signals
                    .emit_raw(SignalType::RetryAttempt, serde_json::json!({"reason": "No records extracted"}))
                    .await;
                return self.transition(Phase::Repair, Value::Null).await;
            }
            self.fail("No records extracted after maximum attempts").await;
            return Ok(());
        }

        let min_threshold = self.config.pipeline.min_confidence_threshold;
        let flagged: usize = records.iter().map(|r| r.flagged_field_count(min_threshold)).sum();
        let total_fields: usize = records.iter().map(|r| r.fields.len()).sum();

        if flagged > 0 && (flagged as f64 / total_fields.max(1) as f64) > 0.5 && self.ai.is_available() {
            if self.attempts < self.config.retry.max_retries {
                self.attempts += 1;
                return self.transition(Phase::Repair, Value::Null).await;
            }
        }

        let record_count = records.len();
        let confidence_avg = if record_count > 0 {
            records.iter().map(|r| r.average_confidence()).sum::<f64>() / record_count as f64
        } else {
            0.0
        };

        self.signals
            .emit_raw(
                SignalType::ExtractionComplete,
                serde_json::json!({
                    "record_count": record_count,
                    "confidence_avg": confidence_avg,
                    "schema_valid": true,
                    "flagged_fields": flagged,
                }),
            )
            .await;
        self.transition(Phase::Persist, Value::Null).await
    }

    #[instrument(skip(self), fields(run_id = %self.run_id, phase = "REPAIR"))]
    async fn phase_repair(&mut self) -> Result<(), ConduitError> {
        if !self.ai.is_available() || self.current_dom.is_none() {
            self.fail("Cannot repair: AI unavailable or no DOM").await;
            return Ok(());
        }
        let dom = self.current_dom.clone().expect("checked above");

        let partial_records: Vec<Value> = self
            .pipeline
            .processed_records()
            .iter()
            .map(|r| serde_json::to_value(r).expect("ExtractionRecord always serializes"))
            .collect();
        let partial_data = serde_json::json!({"records": partial_records});

        self.signals
            .emit_raw(SignalType::AiInvoked, serde_json::json!({"request_type": "repair", "dom_size": dom.html.len()}))
            .await;

        let started = Instant::now();
        let result = self.ai.repair_extraction(&partial_data, &self.config.extraction_schema, truncate_for_ai(&dom.html)).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        self.ai_calls += 1;

        self.signals
            .emit_raw(SignalType::AiResponded, serde_json::json!({"response_type": "repair", "latency_ms": latency_ms}))
            .await;

        for raw_record in result.records {
            let record = self.wrap_ai_record(raw_record, &dom.url, &dom.dom_hash, result.completeness_score, 0.6);
            self.pipeline.add_processed_record(record);
        }

        self.transition(Phase::Validate, Value::Null).await
    }

    #[instrument(skip(self), fields(run_id = %self.run_id, phase = "PERSIST"))]
    async fn phase_persist(&mut self) -> Result<(), ConduitError> {
        let signals_count = self.signals.signals().await.len();
        let mut metadata = RunMetadata::new(&self.run_id, &self.config.target_url, self.config.extraction_mode.clone());
        metadata.total_signals = signals_count;
        metadata.status = "complete".to_string();

        match self.pipeline.persist(metadata).await {
            Ok(count) => {
                self.signals.emit_run_complete(count, self.start_time.elapsed().as_secs_f64(), self.ai_calls).await;
                self.transition(Phase::Complete, Value::Null).await
            }
            Err(err) => {
                self.fail(format!("Persist failed: {err}")).await;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_engine::{NavigationPlan, PageClassification};
    use crate::browser::{ActionResult, ActionStatus};
    use std::sync::Mutex;

    /// Holds the HTML shown before any interaction and the HTML shown once
    /// a consent-gate click has landed, so tests can exercise the
    /// Obstruct -> Navigate -> Assess loop without it running forever.
    struct FakeBrowser {
        started: bool,
        current_html: Mutex<String>,
        after_click_html: Option<String>,
        clicked: Mutex<Vec<String>>,
    }

    impl FakeBrowser {
        fn new(html: &str) -> Self {
            Self {
                started: false,
                current_html: Mutex::new(html.to_string()),
                after_click_html: None,
                clicked: Mutex::new(Vec::new()),
            }
        }

        fn with_click_outcome(html: &str, after_click_html: &str) -> Self {
            Self {
                started: false,
                current_html: Mutex::new(html.to_string()),
                after_click_html: Some(after_click_html.to_string()),
                clicked: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl BrowserOps for FakeBrowser {
        async fn start(&mut self) -> ActionResult {
            self.started = true;
            ActionResult { status: ActionStatus::Success, detail: "started".to_string() }
        }
        async fn stop(&mut self) -> ActionResult {
            ActionResult { status: ActionStatus::Success, detail: "stopped".to_string() }
        }
        async fn navigate(&self, _url: &str, _timeout_ms: u64) -> ActionResult {
            ActionResult { status: ActionStatus::Success, detail: "navigated".to_string() }
        }
        async fn click(&self, selector: &str, _wait_after_ms: u64) -> ActionResult {
            self.clicked.lock().unwrap().push(selector.to_string());
            if let Some(after) = &self.after_click_html {
                *self.current_html.lock().unwrap() = after.clone();
            }
            ActionResult { status: ActionStatus::Success, detail: "clicked".to_string() }
        }
        async fn scroll(&self, _direction: &str, _amount: &str) -> ActionResult {
            ActionResult { status: ActionStatus::Success, detail: String::new() }
        }
        async fn fill_form(&self, _selector: &str, _value: &str) -> ActionResult {
            ActionResult { status: ActionStatus::Success, detail: String::new() }
        }
        async fn hover(&self, _selector: &str) -> ActionResult {
            ActionResult { status: ActionStatus::Success, detail: String::new() }
        }
        async fn press_key(&self, _key: &str) -> ActionResult {
            ActionResult { status: ActionStatus::Success, detail: String::new() }
        }
        async fn wait_for(&self, _selector: &str, _timeout_ms: u64) -> ActionResult {
            ActionResult { status: ActionStatus::Success, detail: String::new() }
        }
        async fn capture_dom(&self) -> Option<DomSnapshot> {
            let html = self.current_html.lock().unwrap().clone();
            Some(DomSnapshot {
                dom_hash: DomSnapshot::compute_hash(&html),
                url: "https://x.test".to_string(),
                title: "Test".to_string(),
                html,
            })
        }
        async fn screenshot(&self) -> Option<Vec<u8>> {
            None
        }
    }

    struct FakeAi {
        available: bool,
        planned_actions: Vec<FunctionCall>,
    }

    impl FakeAi {
        fn unavailable() -> Self {
            Self { available: false, planned_actions: Vec::new() }
        }
    }

    #[async_trait::async_trait]
    impl AiOps for FakeAi {
        fn is_available(&self) -> bool {
            self.available
        }
        async fn classify_page(&self, _dom_html: &str) -> PageClassification {
            PageClassification { page_state: "CONTENT_VISIBLE".to_string(), confidence: 0.9, content_regions_detected: 1, obstruction_indicators: vec![] }
        }
        async fn generate_navigation_plan(
            &self,
            _dom_html: &str,
            _obstruction_type: &str,
            _target_schema: &Value,
            _prior_attempts: &[AttemptRecord],
        ) -> NavigationPlan {
            NavigationPlan { actions: self.planned_actions.clone(), estimated_steps: self.planned_actions.len() as u32, confidence: 0.9 }
        }
        async fn extract_structured(&self, _dom_html: &str, _schema: &Value, _source_url: &str) -> ExtractionResultAlias {
            ExtractionResultAlias::default()
        }
        async fn repair_extraction(&self, _partial_data: &Value, _schema: &Value, _dom_html: &str) -> ExtractionResultAlias {
            ExtractionResultAlias::default()
        }
    }

    use crate::ai_engine::ExtractionResult as ExtractionResultAlias;

    fn test_config(data_dir: &std::path::Path, selectors: HashMap<String, String>) -> HermesConfig {
        let mut config = HermesConfig::new(
            "https://x.test".to_string(),
            serde_json::json!({"title": "string"}),
            "heuristic".to_string(),
            selectors,
        );
        config.pipeline.data_dir = data_dir.to_string_lossy().to_string();
        config
    }

    fn test_dir() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("conduit_fsm_test_{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn clean_page_reaches_complete_via_heuristic_extraction() {
        let dir = test_dir();
        let mut selectors = HashMap::new();
        selectors.insert("title".to_string(), ".title".to_string());
        let config = test_config(&dir, selectors);

        let browser = Box::new(FakeBrowser::new(r#"<html><body><h1 class="title">Acme</h1></body></html>"#));
        let ai = Box::new(FakeAi::unavailable());
        let mut conduit = Conduit::with_components(config, browser, ai).unwrap();

        let summary = conduit.run().await;
        assert_eq!(summary.status, "complete");
        assert_eq!(summary.phase, "COMPLETE");
        assert_eq!(summary.records_count, 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn consent_gate_is_clicked_then_run_completes() {
        let dir = test_dir();
        let mut selectors = HashMap::new();
        selectors.insert("title".to_string(), ".title".to_string());
        let config = test_config(&dir, selectors);

        let html = r#"<div id="cookie-consent"><button class="accept">Accept</button></div><h1 class="title">Acme</h1>"#;
        let after_click = r#"<h1 class="title">Acme</h1>"#;
        let browser = Box::new(FakeBrowser::with_click_outcome(html, after_click));
        let ai = Box::new(FakeAi::unavailable());
        let mut conduit = Conduit::with_components(config, browser, ai).unwrap();

        let summary = conduit.run().await;
        assert_eq!(summary.status, "complete");
        assert_eq!(summary.records_count, 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn hard_block_fails_the_run() {
        let dir = test_dir();
        let config = test_config(&dir, HashMap::new());
        let browser = Box::new(FakeBrowser::new(r#"<div class="captcha"></div>"#));
        let ai = Box::new(FakeAi::unavailable());
        let mut conduit = Conduit::with_components(config, browser, ai).unwrap();

        let summary = conduit.run().await;
        assert_eq!(summary.status, "failed");
        assert_eq!(summary.phase, "FAIL");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn missing_extraction_configuration_fails_the_run() {
        let dir = test_dir();
        let config = test_config(&dir, HashMap::new());
        let browser = Box::new(FakeBrowser::new("<html><body>content</body></html>"));
        let ai = Box::new(FakeAi::unavailable());
        let mut conduit = Conduit::with_components(config, browser, ai).unwrap();

        let summary = conduit.run().await;
        assert_eq!(summary.status, "failed");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn signal_sequence_is_strictly_increasing() {
        let dir = test_dir();
        let mut selectors = HashMap::new();
        selectors.insert("title".to_string(), ".title".to_string());
        let config = test_config(&dir, selectors);
        let browser = Box::new(FakeBrowser::new(r#"<html><body><h1 class="title">Acme</h1></body></html>"#));
        let ai = Box::new(FakeAi::unavailable());
        let mut conduit = Conduit::with_components(config, browser, ai).unwrap();
        conduit.run().await;

        let signals = conduit.signals().signals().await;
        let mut prev = 0u64;
        for signal in &signals {
            assert!(signal.sequence > prev);
            prev = signal.sequence;
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn ai_plan_is_capped_at_twenty_actions() {
        let dir = test_dir();
        let config = test_config(&dir, HashMap::new());
        let browser = Box::new(FakeBrowser::new("<html></html>"));

        let planned_actions = (0..25)
            .map(|_| {
                let mut parameters = HashMap::new();
                parameters.insert("selector".to_string(), Value::String("body".to_string()));
                FunctionCall { function: "click".to_string(), parameters, expected_outcome: String::new() }
            })
            .collect();
        let ai = Box::new(FakeAi { available: true, planned_actions });
        let mut conduit = Conduit::with_components(config, browser, ai).unwrap();
        conduit.current_dom = Some(DomSnapshot {
            dom_hash: "deadbeef".to_string(),
            url: "https://x.test".to_string(),
            title: "Test".to_string(),
            html: "<html></html>".to_string(),
        });
        conduit.phase = Phase::AiReason;

        conduit.phase_ai_reason().await.unwrap();

        assert_eq!(conduit.pending_plan.len(), MAX_PLAN_ACTIONS);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn invalid_transition_is_rejected_without_mutating_phase_or_emitting_a_signal() {
        let dir = test_dir();
        let config = test_config(&dir, HashMap::new());
        let browser = Box::new(FakeBrowser::new("<html></html>"));
        let ai = Box::new(FakeAi::unavailable());
        let mut conduit = Conduit::with_components(config, browser, ai).unwrap();

        let before = conduit.signals().signals().await.len();
        let result = conduit.transition(Phase::Validate, Value::Null).await;

        assert!(matches!(result, Err(ConduitError::InvariantViolation { from: Phase::Init, to: Phase::Validate })));
        assert_eq!(conduit.phase(), Phase::Init);
        assert_eq!(conduit.signals().signals().await.len(), before);
        std::fs::remove_dir_all(&dir).ok();
    }
}
