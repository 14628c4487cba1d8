// Heuristic obstruction detection: pure string matching over cleaned HTML.
// No browser call, no AI call — just a classification of what the page
// currently looks like, biasing the Conduit's next move.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObstructionType {
    ConsentGate,
    ContentReveal,
    MultiClickFlow,
    DynamicLoad,
    JsRouting,
    BehavioralPuzzle,
    HardBlock,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObstructionResult {
    pub obstruction_type: ObstructionType,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default)]
    pub requires_ai: bool,
}

impl ObstructionResult {
    fn none() -> Self {
        Self {
            obstruction_type: ObstructionType::None,
            confidence: 1.0,
            selector: None,
            requires_ai: false,
        }
    }
}

/// Checked first: anything here means extraction cannot proceed at all
/// without an AI-guided intervention, and the Conduit should consider
/// the run unrecoverable rather than keep retrying blindly.
const HARD_BLOCK_INDICATORS: &[&str] = &[
    "[class*=\"captcha\"]",
    "[id*=\"captcha\"]",
    "iframe[src*=\"recaptcha\"]",
    "iframe[src*=\"hcaptcha\"]",
    "[class*=\"login-wall\"]",
    "[class*=\"paywall\"]",
    "[id*=\"login-gate\"]",
];

/// Checked second: a consent banner almost always has a single, reliably
/// clickable accept button, so these get a selector and no AI detour.
const CONSENT_SELECTORS: &[&str] = &[
    "#onetrust-accept-btn-handler",
    ".onetrust-accept-btn-handler",
    "#CybotCookiebotDialogBodyLevelButtonLevelOptinAllowAll",
    "[id*=\"cookie\"] [class*=\"accept\"]",
    "[id*=\"cookie\"] [class*=\"agree\"]",
    "[id*=\"consent\"] [class*=\"accept\"]",
    "[id*=\"consent\"] [class*=\"agree\"]",
    "[class*=\"cookie-banner\"] button",
    "[class*=\"cookie-consent\"] button",
    "[class*=\"gdpr\"] [class*=\"accept\"]",
    "button[class*=\"accept-cookie\"]",
    "button[class*=\"cookie-accept\"]",
    "a[class*=\"accept-cookie\"]",
    "[aria-label*=\"accept\" i][aria-label*=\"cookie\" i]",
    "[aria-label*=\"consent\" i]",
];

/// Checked last: a reveal control (read more, accordion, …) points at a
/// plausible location but the model should pick the exact target.
const CONTENT_REVEAL_SELECTORS: &[&str] = &[
    "[class*=\"read-more\"]",
    "[class*=\"show-more\"]",
    "[class*=\"expand\"]",
    "button[class*=\"accordion\"]",
    "[data-toggle=\"collapse\"]",
    "details > summary",
];

/// Normalizes a CSS selector into a substring that would plausibly appear
/// in the serialized HTML it targets: `#x` -> `id="x"`, `.x` -> `x`,
/// `[attr*="val"]` -> `val`.
fn selector_to_html_pattern(selector: &str) -> String {
    let selector = selector.trim().to_lowercase();
    if let Some(id) = selector.strip_prefix('#') {
        return format!("id=\"{id}\"");
    }
    if let Some(class) = selector.strip_prefix('.') {
        return class.to_string();
    }
    let trimmed = selector.trim_start_matches('[').trim_end_matches(']');
    let value = match trimmed.rsplit_once("*=") {
        Some((_, v)) => v,
        None => trimmed,
    };
    value.trim_matches(|c| c == '"' || c == '\'').to_string()
}

fn find_match<'a>(html: &str, selectors: &'a [&'a str]) -> Option<&'a str> {
    selectors
        .iter()
        .find(|selector| html.contains(&selector_to_html_pattern(selector)))
        .copied()
}

/// Pure function: same cleaned HTML in, same `ObstructionResult` out.
pub fn detect_obstruction(html: &str) -> ObstructionResult {
    let html = html.to_lowercase();

    if find_match(&html, HARD_BLOCK_INDICATORS).is_some() {
        return ObstructionResult {
            obstruction_type: ObstructionType::HardBlock,
            confidence: 0.8,
            selector: None,
            requires_ai: false,
        };
    }

    if let Some(selector) = find_match(&html, CONSENT_SELECTORS) {
        return ObstructionResult {
            obstruction_type: ObstructionType::ConsentGate,
            confidence: 0.7,
            selector: Some(selector.to_string()),
            requires_ai: false,
        };
    }

    if let Some(selector) = find_match(&html, CONTENT_REVEAL_SELECTORS) {
        return ObstructionResult {
            obstruction_type: ObstructionType::ContentReveal,
            confidence: 0.6,
            selector: Some(selector.to_string()),
            requires_ai: true,
        };
    }

    ObstructionResult::none()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_page_has_no_obstruction() {
        let result = detect_obstruction("<html><body><h1>Hello World</h1></body></html>");
        assert_eq!(result.obstruction_type, ObstructionType::None);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn hard_block_preempts_everything_else() {
        let html = r#"<div class="captcha"></div><div id="cookie-consent"><button class="accept">Accept</button></div>"#;
        let result = detect_obstruction(html);
        assert_eq!(result.obstruction_type, ObstructionType::HardBlock);
        assert_eq!(result.confidence, 0.8);
        assert!(result.selector.is_none());
        assert!(!result.requires_ai);
    }

    #[test]
    fn consent_gate_is_resolvable_without_ai() {
        let html = r#"<div id="cookie-consent"><button class="accept">Accept</button></div><p>content</p>"#;
        let result = detect_obstruction(html);
        assert_eq!(result.obstruction_type, ObstructionType::ConsentGate);
        assert!(result.selector.is_some());
        assert!(!result.requires_ai);
    }

    #[test]
    fn content_reveal_requires_ai() {
        let html = r#"<button class="show-more-btn">Show more</button>"#;
        let result = detect_obstruction(html);
        assert_eq!(result.obstruction_type, ObstructionType::ContentReveal);
        assert!(result.requires_ai);
    }

    #[test]
    fn selector_to_html_pattern_handles_id_class_and_attr() {
        assert_eq!(selector_to_html_pattern("#foo"), "id=\"foo\"");
        assert_eq!(selector_to_html_pattern(".bar"), "bar");
        assert_eq!(selector_to_html_pattern("[class*=\"accept\"]"), "accept");
    }
}
