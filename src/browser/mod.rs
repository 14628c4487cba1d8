// Module: Browser Layer
// A typed HTTP facade over a remote rendering service. The layer has no
// decision-making authority: it executes the command it is given and
// reports a typed result. It never initiates navigation or interaction
// on its own, and it never propagates a normal operational failure as an
// `Err` — transport errors become `Failure`/`Timeout` statuses instead, so
// the Conduit can retry or back off without matching on exception types.

pub mod obstruction;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("failed to construct rendering service client: {0}")]
    ClientConstruction(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Success,
    Failure,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub status: ActionStatus,
    #[serde(default)]
    pub detail: String,
}

impl ActionResult {
    fn success(detail: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Success,
            detail: detail.into(),
        }
    }

    fn failure(detail: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Failure,
            detail: detail.into(),
        }
    }

    fn timeout(detail: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Timeout,
            detail: detail.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ActionStatus::Success
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomSnapshot {
    pub html: String,
    pub url: String,
    pub title: String,
    pub dom_hash: String,
}

impl DomSnapshot {
    /// First 16 hex chars of the SHA-256 of the cleaned HTML. Short enough
    /// to log and compare cheaply while still collision-resistant in
    /// practice for a single run's handful of captures.
    pub fn compute_hash(html: &str) -> String {
        let digest = Sha256::digest(html.as_bytes());
        let full = format!("{digest:x}");
        full[..16].to_string()
    }
}

#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub user_agent: Option<String>,
    pub locale: String,
    pub rendering_service_url: String,
    pub rendering_service_token: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            user_agent: None,
            locale: "en-US".to_string(),
            rendering_service_url: String::new(),
            rendering_service_token: None,
        }
    }
}

#[derive(Serialize)]
struct SessionRequest<'a> {
    headless: bool,
    viewport_width: u32,
    viewport_height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_agent: Option<&'a str>,
    locale: &'a str,
}

#[derive(Serialize)]
struct NavigateRequest<'a> {
    session_id: &'a str,
    url: &'a str,
    timeout_ms: u64,
}

#[derive(Serialize)]
struct SelectorRequest<'a> {
    session_id: &'a str,
    selector: &'a str,
}

#[derive(Serialize)]
struct ClickRequest<'a> {
    session_id: &'a str,
    selector: &'a str,
    wait_after_ms: u64,
}

#[derive(Serialize)]
struct ScrollRequest<'a> {
    session_id: &'a str,
    direction: &'a str,
    amount: &'a str,
}

#[derive(Serialize)]
struct FillRequest<'a> {
    session_id: &'a str,
    selector: &'a str,
    value: &'a str,
}

#[derive(Serialize)]
struct KeyRequest<'a> {
    session_id: &'a str,
    key: &'a str,
}

#[derive(Serialize)]
struct WaitRequest<'a> {
    session_id: &'a str,
    selector: &'a str,
    timeout_ms: u64,
}

#[derive(Deserialize)]
struct SessionResponse {
    session_id: String,
}

#[derive(Deserialize)]
struct DomResponse {
    html: String,
    url: String,
    title: String,
}

#[derive(Deserialize)]
struct ScreenshotResponse {
    png_base64: String,
}

/// The Browser Layer. Accepts only typed commands from the Conduit, returns
/// only typed results. Never propagates a normal operational failure as an
/// `Err` — only genuine client construction failures are.
pub struct BrowserLayer {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    config: BrowserConfig,
    session_id: Option<String>,
}

impl BrowserLayer {
    pub fn new(config: BrowserConfig) -> Result<Self, BrowserError> {
        if config.rendering_service_url.trim().is_empty() {
            return Err(BrowserError::ClientConstruction(
                "rendering_service_url must not be empty".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| BrowserError::ClientConstruction(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.rendering_service_url.trim_end_matches('/').to_string(),
            token: config.rendering_service_token.clone(),
            config,
            session_id: None,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        let mut url = format!("{}{}", self.base_url, path);
        if let Some(token) = &self.token {
            url.push_str(&format!("?token={token}"));
        }
        url
    }

    fn session(&self) -> &str {
        self.session_id.as_deref().unwrap_or("")
    }

    pub async fn start(&mut self) -> ActionResult {
        let body = SessionRequest {
            headless: self.config.headless,
            viewport_width: self.config.viewport_width,
            viewport_height: self.config.viewport_height,
            user_agent: self.config.user_agent.as_deref(),
            locale: &self.config.locale,
        };

        match self.client.post(self.endpoint("/session")).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<SessionResponse>().await {
                Ok(parsed) => {
                    self.session_id = Some(parsed.session_id);
                    ActionResult::success("session started")
                }
                Err(e) => ActionResult::failure(e.to_string()),
            },
            Ok(resp) => ActionResult::failure(format!("rendering service returned {}", resp.status())),
            Err(e) => ActionResult::failure(e.to_string()),
        }
    }

    pub async fn stop(&mut self) -> ActionResult {
        if self.session_id.is_none() {
            return ActionResult::success("no session to stop");
        }
        let body = serde_json::json!({ "session_id": self.session() });
        let result = match self.client.post(self.endpoint("/session/close")).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => ActionResult::success("session closed"),
            Ok(resp) => ActionResult::failure(format!("rendering service returned {}", resp.status())),
            Err(e) => ActionResult::failure(e.to_string()),
        };
        self.session_id = None;
        result
    }

    pub async fn navigate(&self, url: &str, timeout_ms: u64) -> ActionResult {
        if self.session_id.is_none() {
            return ActionResult::failure("Browser not started");
        }
        let body = NavigateRequest {
            session_id: self.session(),
            url,
            timeout_ms,
        };
        match self.client.post(self.endpoint("/navigate")).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => ActionResult::success(format!("Navigated to {url}")),
            Ok(resp) if resp.status().as_u16() == 408 => ActionResult::timeout("navigation timed out"),
            Ok(resp) => ActionResult::failure(format!("rendering service returned {}", resp.status())),
            Err(e) if e.is_timeout() => ActionResult::timeout(e.to_string()),
            Err(e) => ActionResult::failure(e.to_string()),
        }
    }

    pub async fn click(&self, selector: &str, wait_after_ms: u64) -> ActionResult {
        if self.session_id.is_none() {
            return ActionResult::failure("Browser not started");
        }
        let body = ClickRequest {
            session_id: self.session(),
            selector,
            wait_after_ms,
        };
        match self.client.post(self.endpoint("/click")).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => ActionResult::success(format!("Clicked {selector}")),
            Ok(resp) => ActionResult::failure(format!("rendering service returned {}", resp.status())),
            Err(e) => ActionResult::failure(e.to_string()),
        }
    }

    /// `"end"` scrolls to document bottom, `"page"` advances +-720px, and a
    /// numeric string means that many pixels. Fails on an invalid direction
    /// rather than silently treating it as `down`.
    pub async fn scroll(&self, direction: &str, amount: &str) -> ActionResult {
        if self.session_id.is_none() {
            return ActionResult::failure("Browser not started");
        }
        if direction != "up" && direction != "down" {
            return ActionResult::failure(format!("invalid scroll direction: {direction}"));
        }
        if amount != "end" && amount != "page" && amount.parse::<i64>().is_err() {
            return ActionResult::failure(format!("invalid scroll amount: {amount}"));
        }

        let body = ScrollRequest {
            session_id: self.session(),
            direction,
            amount,
        };
        match self.client.post(self.endpoint("/scroll")).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => ActionResult::success(format!("Scrolled {direction} {amount}")),
            Ok(resp) => ActionResult::failure(format!("rendering service returned {}", resp.status())),
            Err(e) => ActionResult::failure(e.to_string()),
        }
    }

    pub async fn fill_form(&self, selector: &str, value: &str) -> ActionResult {
        if self.session_id.is_none() {
            return ActionResult::failure("Browser not started");
        }
        let body = FillRequest {
            session_id: self.session(),
            selector,
            value,
        };
        match self.client.post(self.endpoint("/fill")).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => ActionResult::success(format!("Filled {selector}")),
            Ok(resp) => ActionResult::failure(format!("rendering service returned {}", resp.status())),
            Err(e) => ActionResult::failure(e.to_string()),
        }
    }

    pub async fn hover(&self, selector: &str) -> ActionResult {
        if self.session_id.is_none() {
            return ActionResult::failure("Browser not started");
        }
        let body = SelectorRequest {
            session_id: self.session(),
            selector,
        };
        match self.client.post(self.endpoint("/hover")).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => ActionResult::success(format!("Hovered {selector}")),
            Ok(resp) => ActionResult::failure(format!("rendering service returned {}", resp.status())),
            Err(e) => ActionResult::failure(e.to_string()),
        }
    }

    pub async fn press_key(&self, key: &str) -> ActionResult {
        if self.session_id.is_none() {
            return ActionResult::failure("Browser not started");
        }
        let body = KeyRequest {
            session_id: self.session(),
            key,
        };
        match self.client.post(self.endpoint("/key")).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => ActionResult::success(format!("Pressed {key}")),
            Ok(resp) => ActionResult::failure(format!("rendering service returned {}", resp.status())),
            Err(e) => ActionResult::failure(e.to_string()),
        }
    }

    pub async fn wait_for(&self, selector: &str, timeout_ms: u64) -> ActionResult {
        if self.session_id.is_none() {
            return ActionResult::failure("Browser not started");
        }
        let body = WaitRequest {
            session_id: self.session(),
            selector,
            timeout_ms,
        };
        match self.client.post(self.endpoint("/wait")).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => ActionResult::success(format!("Element {selector} appeared")),
            Ok(resp) if resp.status().as_u16() == 408 => ActionResult::timeout(format!("timed out waiting for {selector}")),
            Ok(resp) => ActionResult::failure(format!("rendering service returned {}", resp.status())),
            Err(e) if e.is_timeout() => ActionResult::timeout(e.to_string()),
            Err(e) => ActionResult::failure(e.to_string()),
        }
    }

    /// Asks the rendering service for a deep-cloned, cleaned `outerHTML`
    /// (scripts/styles/noscript/stylesheet-links/hidden elements stripped
    /// server-side), then hashes it locally to form `dom_hash`.
    pub async fn capture_dom(&self) -> Option<DomSnapshot> {
        let session_id = self.session_id.as_deref()?;
        let body = serde_json::json!({ "session_id": session_id });
        let resp = self.client.post(self.endpoint("/dom")).json(&body).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let parsed: DomResponse = resp.json().await.ok()?;
        let dom_hash = DomSnapshot::compute_hash(&parsed.html);
        Some(DomSnapshot {
            html: parsed.html,
            url: parsed.url,
            title: parsed.title,
            dom_hash,
        })
    }

    pub async fn screenshot(&self) -> Option<Vec<u8>> {
        let session_id = self.session_id.as_deref()?;
        let body = serde_json::json!({ "session_id": session_id });
        let resp = self.client.post(self.endpoint("/screenshot")).json(&body).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let parsed: ScreenshotResponse = resp.json().await.ok()?;
        base64::Engine::decode(&base64::engine::general_purpose::STANDARD, parsed.png_base64).ok()
    }

    /// Crash recovery: close the current session and open a fresh one.
    pub async fn restart_context(&mut self) -> ActionResult {
        if self.session_id.is_some() {
            let _ = self.stop().await;
        }
        let result = self.start().await;
        if result.is_success() {
            ActionResult::success("Context restarted")
        } else {
            result
        }
    }
}

/// The surface the Conduit drives the Browser Layer through. Pulled out as
/// a trait so integration tests can swap in a deterministic in-memory fake
/// instead of a real rendering service.
#[async_trait::async_trait]
pub trait BrowserOps: Send + Sync {
    async fn start(&mut self) -> ActionResult;
    async fn stop(&mut self) -> ActionResult;
    async fn navigate(&self, url: &str, timeout_ms: u64) -> ActionResult;
    async fn click(&self, selector: &str, wait_after_ms: u64) -> ActionResult;
    async fn scroll(&self, direction: &str, amount: &str) -> ActionResult;
    async fn fill_form(&self, selector: &str, value: &str) -> ActionResult;
    async fn hover(&self, selector: &str) -> ActionResult;
    async fn press_key(&self, key: &str) -> ActionResult;
    async fn wait_for(&self, selector: &str, timeout_ms: u64) -> ActionResult;
    async fn capture_dom(&self) -> Option<DomSnapshot>;
    async fn screenshot(&self) -> Option<Vec<u8>>;
}

#[async_trait::async_trait]
impl BrowserOps for BrowserLayer {
    async fn start(&mut self) -> ActionResult {
        BrowserLayer::start(self).await
    }

    async fn stop(&mut self) -> ActionResult {
        BrowserLayer::stop(self).await
    }

    async fn navigate(&self, url: &str, timeout_ms: u64) -> ActionResult {
        BrowserLayer::navigate(self, url, timeout_ms).await
    }

    async fn click(&self, selector: &str, wait_after_ms: u64) -> ActionResult {
        BrowserLayer::click(self, selector, wait_after_ms).await
    }

    async fn scroll(&self, direction: &str, amount: &str) -> ActionResult {
        BrowserLayer::scroll(self, direction, amount).await
    }

    async fn fill_form(&self, selector: &str, value: &str) -> ActionResult {
        BrowserLayer::fill_form(self, selector, value).await
    }

    async fn hover(&self, selector: &str) -> ActionResult {
        BrowserLayer::hover(self, selector).await
    }

    async fn press_key(&self, key: &str) -> ActionResult {
        BrowserLayer::press_key(self, key).await
    }

    async fn wait_for(&self, selector: &str, timeout_ms: u64) -> ActionResult {
        BrowserLayer::wait_for(self, selector, timeout_ms).await
    }

    async fn capture_dom(&self) -> Option<DomSnapshot> {
        BrowserLayer::capture_dom(self).await
    }

    async fn screenshot(&self) -> Option<Vec<u8>> {
        BrowserLayer::screenshot(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dom_hash_is_sixteen_hex_chars_and_deterministic() {
        let h1 = DomSnapshot::compute_hash("<html></html>");
        let h2 = DomSnapshot::compute_hash("<html></html>");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 16);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn dom_hash_differs_for_different_content() {
        let h1 = DomSnapshot::compute_hash("<html>a</html>");
        let h2 = DomSnapshot::compute_hash("<html>b</html>");
        assert_ne!(h1, h2);
    }

    #[test]
    fn client_construction_fails_on_empty_url() {
        let config = BrowserConfig {
            rendering_service_url: String::new(),
            ..Default::default()
        };
        assert!(BrowserLayer::new(config).is_err());
    }

    #[tokio::test]
    async fn operations_before_start_report_failure_not_panic() {
        let config = BrowserConfig {
            rendering_service_url: "http://localhost:1".to_string(),
            ..Default::default()
        };
        let browser = BrowserLayer::new(config).unwrap();
        let result = browser.navigate("https://x.test", 1000).await;
        assert_eq!(result.status, ActionStatus::Failure);
        assert!(browser.capture_dom().await.is_none());
    }

    #[tokio::test]
    async fn scroll_rejects_invalid_direction() {
        let config = BrowserConfig {
            rendering_service_url: "http://localhost:1".to_string(),
            ..Default::default()
        };
        let mut browser = BrowserLayer::new(config).unwrap();
        browser.session_id = Some("fake-session".to_string());
        let result = browser.scroll("sideways", "page").await;
        assert_eq!(result.status, ActionStatus::Failure);
    }
}
