//! Structured error codes for the Conduit and its components.
//!
//! Every error kind the crate can produce gets a stable numeric code so it
//! can be searched, dashboarded, and diffed across runs without parsing
//! free-text messages. Codes are grouped by category:
//!
//! | Range | Category              |
//! |-------|-----------------------|
//! | E1xxx | Config / validation   |
//! | E2xxx | Browser / transport   |
//! | E3xxx | AI engine             |
//! | E4xxx | Pipeline / persist    |
//! | E5xxx | Internal / invariant  |

use std::fmt;

// ============================================================================
// ERROR CODE
// ============================================================================

/// A four-digit structured error code: first digit is the category, the
/// rest identifies the specific error within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(u16);

impl ErrorCode {
    // ------------------------------------------------------------------
    // E1xxx: Config / validation
    // ------------------------------------------------------------------

    /// Target URL missing from run configuration.
    pub const MISSING_TARGET_URL: Self = Self(1001);

    /// `extraction_mode` is not one of `heuristic`, `ai`, `hybrid`.
    pub const INVALID_EXTRACTION_MODE: Self = Self(1002);

    /// The target URL policy (SSRF guard) rejected the run's target URL.
    pub const TARGET_URL_REJECTED_BY_POLICY: Self = Self(1003);

    /// An environment variable holding a config value failed to parse.
    pub const INVALID_ENV_VALUE: Self = Self(1004);

    /// No extraction configuration: no heuristic selectors and AI unavailable.
    pub const NO_EXTRACTION_CONFIGURATION: Self = Self(1005);

    // ------------------------------------------------------------------
    // E2xxx: Browser / transport
    // ------------------------------------------------------------------

    /// The Browser Layer failed to start a rendering session.
    pub const BROWSER_START_FAILED: Self = Self(2001);

    /// Navigation exceeded the page-load timeout.
    pub const BROWSER_NAVIGATE_TIMEOUT: Self = Self(2002);

    /// The rendering service could not be reached at all.
    pub const RENDERING_SERVICE_UNREACHABLE: Self = Self(2003);

    /// DOM capture returned no snapshot.
    pub const DOM_CAPTURE_FAILED: Self = Self(2004);

    // ------------------------------------------------------------------
    // E3xxx: AI Engine
    // ------------------------------------------------------------------

    /// AI Engine client construction failed; degrading to heuristic-only.
    pub const AI_INITIALIZATION_FAILED: Self = Self(3001);

    /// Page classification call failed.
    pub const AI_CLASSIFICATION_FAILED: Self = Self(3002);

    /// Navigation-plan generation call failed.
    pub const AI_PLAN_GENERATION_FAILED: Self = Self(3003);

    /// Structured extraction call failed.
    pub const AI_EXTRACTION_FAILED: Self = Self(3004);

    /// Repair-extraction call failed.
    pub const AI_REPAIR_FAILED: Self = Self(3005);

    // ------------------------------------------------------------------
    // E4xxx: Pipeline / persist
    // ------------------------------------------------------------------

    /// Writing the records `.tmp` file failed.
    pub const PERSIST_WRITE_FAILED: Self = Self(4001);

    /// The atomic rename from `.tmp` to `records.jsonl` failed.
    pub const PERSIST_RENAME_FAILED: Self = Self(4002);

    /// A record with no populated fields was rejected at the processed gate.
    pub const EMPTY_RECORD_REJECTED: Self = Self(4003);

    // ------------------------------------------------------------------
    // E5xxx: Internal / invariant
    // ------------------------------------------------------------------

    /// A phase transition outside `VALID_TRANSITIONS` was attempted.
    pub const INVALID_PHASE_TRANSITION: Self = Self(5001);

    /// A gap was detected in the signal sequence (should be unreachable).
    pub const SIGNAL_SEQUENCE_GAP: Self = Self(5002);

    /// Generic internal/unexpected error.
    pub const INTERNAL_ERROR: Self = Self(5003);

    pub fn code(&self) -> u16 {
        self.0
    }

    pub fn formatted(&self) -> String {
        format!("E{:04}", self.0)
    }

    pub fn category(&self) -> ErrorCategory {
        match self.0 / 1000 {
            1 => ErrorCategory::Config,
            2 => ErrorCategory::Browser,
            3 => ErrorCategory::AiEngine,
            4 => ErrorCategory::Pipeline,
            5 => ErrorCategory::Internal,
            _ => ErrorCategory::Unknown,
        }
    }

    pub fn description(&self) -> &'static str {
        match self.0 {
            1001 => "Missing target URL",
            1002 => "Invalid extraction mode",
            1003 => "Target URL rejected by policy",
            1004 => "Invalid environment value",
            1005 => "No extraction configuration",
            2001 => "Browser start failed",
            2002 => "Browser navigate timeout",
            2003 => "Rendering service unreachable",
            2004 => "DOM capture failed",
            3001 => "AI initialization failed",
            3002 => "AI classification failed",
            3003 => "AI plan generation failed",
            3004 => "AI extraction failed",
            3005 => "AI repair failed",
            4001 => "Persist write failed",
            4002 => "Persist rename failed",
            4003 => "Empty record rejected",
            5001 => "Invalid phase transition",
            5002 => "Signal sequence gap",
            5003 => "Internal error",
            _ => "Unknown error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.formatted())
    }
}

// ============================================================================
// ERROR CATEGORY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Config,
    Browser,
    AiEngine,
    Pipeline,
    Internal,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config => write!(f, "Config"),
            Self::Browser => write!(f, "Browser"),
            Self::AiEngine => write!(f, "AI Engine"),
            Self::Pipeline => write!(f, "Pipeline"),
            Self::Internal => write!(f, "Internal"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A structured error: a code, a message, and optional run context.
#[derive(Debug)]
pub struct StructuredError {
    pub code: ErrorCode,
    pub message: String,
    pub context: Option<ErrorContext>,
}

/// Context attached to a `StructuredError`: which run, which phase.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub run_id: Option<String>,
    pub phase: Option<String>,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

impl StructuredError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        let ctx = self.context.get_or_insert_with(ErrorContext::default);
        ctx.run_id = Some(run_id.into());
        self
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        let ctx = self.context.get_or_insert_with(ErrorContext::default);
        ctx.phase = Some(phase.into());
        self
    }

    pub fn user_message(&self) -> String {
        let mut msg = format!("[{}] {}", self.code, self.message);

        if let Some(ctx) = &self.context {
            if let Some(run_id) = &ctx.run_id {
                msg.push_str(&format!(" (run: {})", run_id));
            }
            if let Some(phase) = &ctx.phase {
                msg.push_str(&format!(" (phase: {})", phase));
            }
            if let (Some(expected), Some(actual)) = (&ctx.expected, &ctx.actual) {
                msg.push_str(&format!(" [expected: {}, actual: {}]", expected, actual));
            }
        }

        msg
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for StructuredError {}

/// Logs a suppressed/observational failure at `error!` level with the
/// canonical fields the telemetry stack expects, and discards it — used at
/// every boundary where an error must never propagate (AI transport
/// failures, subscriber exceptions, DOM-cleanup anomalies).
pub fn emit_structured_error(code: ErrorCode, message: impl AsRef<str>, run_id: Option<&str>) {
    tracing::error!(
        error_code = %code,
        error_category = %code.category(),
        message = message.as_ref(),
        run_id = run_id.unwrap_or(""),
        suppressed = true,
        "suppressed error"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_formatting() {
        assert_eq!(ErrorCode::MISSING_TARGET_URL.formatted(), "E1001");
        assert_eq!(ErrorCode::BROWSER_START_FAILED.formatted(), "E2001");
        assert_eq!(ErrorCode::AI_INITIALIZATION_FAILED.formatted(), "E3001");
    }

    #[test]
    fn error_code_category() {
        assert_eq!(ErrorCode::MISSING_TARGET_URL.category(), ErrorCategory::Config);
        assert_eq!(ErrorCode::BROWSER_NAVIGATE_TIMEOUT.category(), ErrorCategory::Browser);
        assert_eq!(ErrorCode::AI_REPAIR_FAILED.category(), ErrorCategory::AiEngine);
        assert_eq!(ErrorCode::PERSIST_WRITE_FAILED.category(), ErrorCategory::Pipeline);
        assert_eq!(ErrorCode::INVALID_PHASE_TRANSITION.category(), ErrorCategory::Internal);
    }

    #[test]
    fn structured_error_display_includes_run_and_phase() {
        let err = StructuredError::new(ErrorCode::INVALID_PHASE_TRANSITION, "bad transition")
            .with_run_id("run_abc123")
            .with_phase("INIT");

        let msg = err.user_message();
        assert!(msg.contains("E5001"));
        assert!(msg.contains("run_abc123"));
        assert!(msg.contains("INIT"));
    }
}
