// Module: Signals
// The append-only, immutable event stream a run produces.
//
// A Signal is never mutated after construction. The emitter assigns a
// monotonic sequence number under a lock, appends to an in-memory list,
// flushes one JSON line to a per-run ledger file, then fans out to any
// subscribers. Subscriber failures are caught and logged; they must never
// interrupt the emission pipeline or reduce the number of signals recorded.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// The ten kinds of event a Conduit run can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    PhaseTransition,
    ObstructionDetected,
    AiInvoked,
    AiResponded,
    AiRejected,
    ActionExecuted,
    ExtractionComplete,
    RetryAttempt,
    RunComplete,
    RunFailed,
}

/// One immutable event. Once constructed, nothing exposes a mutable
/// accessor onto a `Signal` — Rust's ownership model enforces the
/// "frozen" invariant the wire format implies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub sequence: u64,
    pub signal_type: SignalType,
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    #[serde(default)]
    pub payload: Value,
}

type Subscriber = Arc<dyn Fn(&Signal) + Send + Sync>;

struct EmitterState {
    sequence: u64,
    signals: Vec<Signal>,
}

/// Emits, persists, and broadcasts the signal stream for one run.
pub struct SignalEmitter {
    run_id: String,
    ledger_path: Option<PathBuf>,
    state: Mutex<EmitterState>,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl SignalEmitter {
    pub fn new(run_id: impl Into<String>, ledger_path: Option<PathBuf>) -> std::io::Result<Self> {
        if let Some(path) = &ledger_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            run_id: run_id.into(),
            ledger_path,
            state: Mutex::new(EmitterState {
                sequence: 0,
                signals: Vec::new(),
            }),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Returns a snapshot copy of every signal emitted so far.
    pub async fn signals(&self) -> Vec<Signal> {
        self.state.lock().await.signals.clone()
    }

    pub async fn subscribe(&self, callback: Subscriber) {
        self.subscribers.lock().await.push(callback);
    }

    async fn emit(&self, signal_type: SignalType, payload: Value) -> Signal {
        let signal = {
            let mut state = self.state.lock().await;
            state.sequence += 1;
            let signal = Signal {
                sequence: state.sequence,
                signal_type,
                timestamp: Utc::now(),
                run_id: self.run_id.clone(),
                payload,
            };
            state.signals.push(signal.clone());
            signal
        };

        if let Some(path) = &self.ledger_path {
            if let Err(err) = Self::persist(path, &signal).await {
                tracing::error!(
                    error_code = "SIGNAL_LEDGER_WRITE_FAILED",
                    run_id = %self.run_id,
                    error = %err,
                    suppressed = true,
                    "failed to append signal to ledger"
                );
            }
        }

        self.broadcast(&signal).await;
        signal
    }

    async fn persist(path: &Path, signal: &Signal) -> std::io::Result<()> {
        let mut line = serde_json::to_string(signal).expect("Signal always serializes");
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await
    }

    async fn broadcast(&self, signal: &Signal) {
        let subscribers = self.subscribers.lock().await;
        for subscriber in subscribers.iter() {
            let subscriber = subscriber.clone();
            let signal = signal.clone();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                subscriber(&signal);
            }));
            if result.is_err() {
                tracing::error!(
                    error_code = "SIGNAL_SUBSCRIBER_FAILURE",
                    run_id = %self.run_id,
                    suppressed = true,
                    "signal subscriber panicked; emission continues"
                );
            }
        }
    }

    pub async fn emit_phase_transition(&self, from_phase: &str, to_phase: &str, context: Value) -> Signal {
        let mut payload = serde_json::json!({
            "from_phase": from_phase,
            "to_phase": to_phase,
        });
        if let (Some(obj), Value::Object(ctx)) = (payload.as_object_mut(), context) {
            obj.extend(ctx);
        }
        self.emit(SignalType::PhaseTransition, payload).await
    }

    pub async fn emit_run_complete(&self, total_records: usize, total_duration_s: f64, ai_calls_count: u32) -> Signal {
        self.emit(
            SignalType::RunComplete,
            serde_json::json!({
                "total_records": total_records,
                "total_duration_s": total_duration_s,
                "ai_calls_count": ai_calls_count,
            }),
        )
        .await
    }

    pub async fn emit_run_failed(&self, failure_reason: &str, phase_at_failure: &str, attempts_made: u32) -> Signal {
        self.emit(
            SignalType::RunFailed,
            serde_json::json!({
                "failure_reason": failure_reason,
                "phase_at_failure": phase_at_failure,
                "attempts_made": attempts_made,
            }),
        )
        .await
    }

    /// Generic emitter for the remaining six signal types, whose payload
    /// shapes vary per call site (obstruction details, AI latency, action
    /// results, …) and don't warrant individual wrapper methods.
    pub async fn emit_raw(&self, signal_type: SignalType, payload: Value) -> Signal {
        self.emit(signal_type, payload).await
    }

    /// Rehydrates every signal recorded in a ledger file, in emission order.
    pub fn load_ledger(path: &Path) -> std::io::Result<Vec<Signal>> {
        let content = std::fs::read_to_string(path)?;
        let mut signals = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Signal>(line) {
                Ok(signal) => signals.push(signal),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping malformed ledger line");
                }
            }
        }
        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn sequence_numbers_are_monotonic_and_gapless() {
        let emitter = SignalEmitter::new("run_test", None).unwrap();
        for _ in 0..5 {
            emitter.emit_raw(SignalType::ActionExecuted, Value::Null).await;
        }
        let signals = emitter.signals().await;
        let sequences: Vec<u64> = signals.iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn subscriber_panic_does_not_drop_signals() {
        let emitter = SignalEmitter::new("run_test", None).unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        emitter
            .subscribe(Arc::new(move |_s: &Signal| {
                seen_clone.fetch_add(1, Ordering::SeqCst);
                panic!("boom");
            }))
            .await;

        emitter.emit_raw(SignalType::RetryAttempt, Value::Null).await;
        emitter.emit_raw(SignalType::RetryAttempt, Value::Null).await;

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(emitter.signals().await.len(), 2);
    }

    #[tokio::test]
    async fn ledger_round_trips_through_disk() {
        let dir = std::env::temp_dir().join(format!("conduit_test_{}", uuid::Uuid::new_v4()));
        let ledger_path = dir.join("signals.jsonl");
        let emitter = SignalEmitter::new("run_ledger", Some(ledger_path.clone())).unwrap();

        emitter.emit_phase_transition("INIT", "NAVIGATE", Value::Null).await;
        emitter.emit_run_complete(3, 1.5, 2).await;

        // give the async file write a moment to land
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let loaded = SignalEmitter::load_ledger(&ledger_path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].sequence, 1);
        assert_eq!(loaded[1].signal_type, SignalType::RunComplete);

        std::fs::remove_dir_all(dir).ok();
    }
}
