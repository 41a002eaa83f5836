//! Inbound WebSocket message types and classifier.
//!
//! The execution backend pushes flat JSON frames shaped like
//! `{"type": "<kind>", ...}`. [`classify`] turns one raw frame into a
//! typed [`InboundMessage`]; it is a total function — malformed JSON
//! becomes [`InboundMessage::Text`] and unrecognized or missing `type`
//! tags become [`InboundMessage::Unknown`], never an error.

use serde::Deserialize;
use serde_json::Value;

use crate::types::Timestamp;

/// All known execution frame types, tagged by the `"type"` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionMessage {
    /// A test run has started executing.
    Start(StartData),

    /// Coarse progress update without step boundaries.
    Progress(ProgressData),

    /// A test step is about to run.
    StepStart(StepStartData),

    /// A test step finished, with its verdict.
    StepEnd(StepEndData),

    /// The run reached a terminal status.
    Complete(CompleteData),

    /// The run aborted with an error.
    Error(FailureData),

    /// Alternate spelling of [`Error`](Self::Error) used by older
    /// backend versions.
    Failed(FailureData),
}

/// Payload for `start` frames.
#[derive(Debug, Clone, Deserialize)]
pub struct StartData {
    pub total_steps: Option<u32>,
    pub case_name: Option<String>,
    pub message: Option<String>,
}

/// Payload for `progress` frames.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    /// Completion percentage; clamped to 0..=100 by the reducer.
    pub progress: Option<f64>,
    /// 1-based index of the step currently running.
    pub current_step: Option<u32>,
    pub total_steps: Option<u32>,
    pub step_name: Option<String>,
}

/// Payload for `step_start` frames.
#[derive(Debug, Clone, Deserialize)]
pub struct StepStartData {
    pub current_step: Option<u32>,
    pub total_steps: Option<u32>,
    pub progress: Option<f64>,
    pub step_name: Option<String>,
    /// Keyword driving this step, when the backend reports one.
    pub keyword: Option<String>,
    pub message: Option<String>,
}

/// Payload for `step_end` frames.
#[derive(Debug, Clone, Deserialize)]
pub struct StepEndData {
    pub current_step: Option<u32>,
    pub total_steps: Option<u32>,
    pub progress: Option<f64>,
    pub step_name: Option<String>,
    /// Step verdict as reported by the backend (`"passed"`/`"failed"`).
    pub status: Option<String>,
    pub message: Option<String>,
    /// Raw per-step result object (assertions, response bodies, ...).
    pub result: Option<Value>,
}

/// Payload for `complete` frames.
#[derive(Debug, Clone, Deserialize)]
pub struct CompleteData {
    /// Final verdict; anything other than `"failed"` counts as success.
    pub status: Option<String>,
    pub progress: Option<f64>,
    pub passed_steps: Option<u32>,
    pub failed_steps: Option<u32>,
    pub message: Option<String>,
}

/// Payload for `error` and `failed` frames.
#[derive(Debug, Clone, Deserialize)]
pub struct FailureData {
    pub message: Option<String>,
    pub error: Option<String>,
}

/// One classified inbound frame.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    /// A well-formed execution frame.
    Execution(ExecutionMessage),

    /// A frame that was not valid JSON (heartbeat replies, plain text).
    Text { content: String },

    /// Valid JSON whose `type` tag is missing or not an execution kind
    /// (e.g. `script_start`/`script_end` frames from pre/post scripts).
    Unknown { kind: String, payload: Value },
}

/// An [`InboundMessage`] stamped with its receipt time.
#[derive(Debug, Clone)]
pub struct Classified {
    pub message: InboundMessage,
    pub received_at: Timestamp,
}

impl Classified {
    /// Classify a raw frame and stamp it with the current time.
    pub fn receive(raw: &str) -> Self {
        Self {
            message: classify(raw),
            received_at: chrono::Utc::now(),
        }
    }
}

/// Classify one raw inbound frame.
///
/// Never fails: undecodable input becomes [`InboundMessage::Text`], and
/// decodable JSON with an unrecognized or absent `type` becomes
/// [`InboundMessage::Unknown`] with the tag defaulted to `"unknown"`.
pub fn classify(raw: &str) -> InboundMessage {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(_) => {
            return InboundMessage::Text {
                content: raw.to_string(),
            }
        }
    };

    match serde_json::from_value::<ExecutionMessage>(value.clone()) {
        Ok(message) => InboundMessage::Execution(message),
        Err(_) => {
            let kind = value
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            InboundMessage::Unknown {
                kind,
                payload: value,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn classify_start_frame() {
        let msg = classify(r#"{"type":"start","total_steps":5,"case_name":"login"}"#);
        match msg {
            InboundMessage::Execution(ExecutionMessage::Start(data)) => {
                assert_eq!(data.total_steps, Some(5));
                assert_eq!(data.case_name.as_deref(), Some("login"));
            }
            other => panic!("Expected Start, got {other:?}"),
        }
    }

    #[test]
    fn classify_step_end_frame() {
        let json = r#"{"type":"step_end","current_step":2,"total_steps":5,"progress":40,"step_name":"assert body","status":"failed","message":"expected 200"}"#;
        match classify(json) {
            InboundMessage::Execution(ExecutionMessage::StepEnd(data)) => {
                assert_eq!(data.current_step, Some(2));
                assert_eq!(data.status.as_deref(), Some("failed"));
                assert_eq!(data.progress, Some(40.0));
            }
            other => panic!("Expected StepEnd, got {other:?}"),
        }
    }

    #[test]
    fn classify_complete_frame() {
        let msg = classify(r#"{"type":"complete","status":"failed","progress":100}"#);
        assert_matches!(
            msg,
            InboundMessage::Execution(ExecutionMessage::Complete(CompleteData {
                status: Some(ref s),
                ..
            })) if s == "failed"
        );
    }

    #[test]
    fn non_json_frame_classifies_as_text() {
        match classify("pong") {
            InboundMessage::Text { content } => assert_eq!(content, "pong"),
            other => panic!("Expected Text, got {other:?}"),
        }
    }

    #[test]
    fn missing_type_defaults_to_unknown() {
        match classify(r#"{"progress":50}"#) {
            InboundMessage::Unknown { kind, payload } => {
                assert_eq!(kind, "unknown");
                assert_eq!(payload["progress"], 50);
            }
            other => panic!("Expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn script_frames_classify_as_unknown() {
        match classify(r#"{"type":"script_start","script":"pre"}"#) {
            InboundMessage::Unknown { kind, .. } => assert_eq!(kind, "script_start"),
            other => panic!("Expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn extra_fields_are_tolerated() {
        let json = r#"{"type":"start","total_steps":3,"execution_id":"abc","timestamp":"2026-01-01T00:00:00"}"#;
        assert_matches!(
            classify(json),
            InboundMessage::Execution(ExecutionMessage::Start(_))
        );
    }

    #[test]
    fn failed_frame_maps_to_failure_data() {
        match classify(r#"{"type":"failed","error":"boom"}"#) {
            InboundMessage::Execution(ExecutionMessage::Failed(data)) => {
                assert_eq!(data.error.as_deref(), Some("boom"));
            }
            other => panic!("Expected Failed, got {other:?}"),
        }
    }
}
