//! REST wrapper for the test-execution backend.
//!
//! Wraps the two endpoints the monitoring core consumes: status-by-id
//! (feeding the poll watcher) and case submission (feeding the batch
//! orchestrator). Every response arrives in the backend's
//! `{code, data, msg}` envelope; `code == 200` is success.

use async_trait::async_trait;
use serde::Deserialize;

use testwatch_core::types::{CaseId, ExecutionId};

use crate::error::WatchError;
use crate::poll::{StatusSnapshot, StatusSource};

/// Envelope code signalling success.
const CODE_OK: i64 = 200;

/// HTTP client for one backend instance.
pub struct ExecutionApi {
    client: reqwest::Client,
    base_url: String,
}

/// The backend's uniform response envelope.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    data: Option<T>,
    msg: Option<String>,
}

/// Payload of a successful submission. Older controllers name the id
/// `test_id` instead of `execution_id`.
#[derive(Debug, Deserialize)]
struct SubmitData {
    execution_id: Option<ExecutionId>,
    test_id: Option<ExecutionId>,
}

impl ExecutionApi {
    /// Create an API client for a backend instance.
    ///
    /// * `base_url` - base REST URL, e.g. `http://host:8000/api`.
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (connection pooling across monitors).
    pub fn with_client(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    /// Fetch the current status of one execution.
    ///
    /// Sends `GET /status/{execution_id}`. Send-level failures map to
    /// [`WatchError::Network`]; a non-success envelope surfaces its
    /// `msg` as [`WatchError::Application`].
    pub async fn get_status(&self, execution_id: &str) -> Result<StatusSnapshot, WatchError> {
        let url = format!("{}/status/{}", self.base_url, execution_id);
        let response = self.client.get(&url).send().await?;
        let envelope: Envelope<StatusSnapshot> = Self::decode(response).await?;
        Self::unwrap_envelope(envelope)
    }

    /// Submit one test case for execution.
    ///
    /// Sends `POST /execute` with `{"case_ids": [case_id]}` and returns
    /// the server-assigned execution id.
    pub async fn submit_case(&self, case_id: CaseId) -> Result<ExecutionId, WatchError> {
        let body = serde_json::json!({
            "case_ids": [case_id],
        });

        let url = format!("{}/execute", self.base_url);
        let response = self.client.post(&url).json(&body).send().await?;
        let envelope: Envelope<SubmitData> = Self::decode(response).await?;
        let data = Self::unwrap_envelope(envelope)?;

        let execution_id = data
            .execution_id
            .or(data.test_id)
            .ok_or_else(|| WatchError::Application {
                code: CODE_OK,
                message: "submission response carried no execution id".into(),
            })?;

        tracing::info!(case_id, execution_id = %execution_id, "Case submitted");
        Ok(execution_id)
    }

    // ---- private helpers ----

    /// Decode the response body, mapping HTTP-level failures to
    /// [`WatchError::Application`] with the status code and raw body.
    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<Envelope<T>, WatchError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(WatchError::Application {
                code: status.as_u16() as i64,
                message: body,
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| WatchError::Application {
            code: status.as_u16() as i64,
            message: format!("undecodable response body: {e}"),
        })
    }

    /// Unwrap the `{code, data, msg}` envelope.
    fn unwrap_envelope<T>(envelope: Envelope<T>) -> Result<T, WatchError> {
        if envelope.code != CODE_OK {
            return Err(WatchError::Application {
                code: envelope.code,
                message: envelope.msg.unwrap_or_else(|| "backend error".into()),
            });
        }
        envelope.data.ok_or_else(|| WatchError::Application {
            code: envelope.code,
            message: envelope
                .msg
                .unwrap_or_else(|| "response envelope carried no data".into()),
        })
    }
}

#[async_trait]
impl StatusSource for ExecutionApi {
    async fn fetch_status(&self, execution_id: &str) -> Result<StatusSnapshot, WatchError> {
        self.get_status(execution_id).await
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn envelope<T: serde::de::DeserializeOwned>(json: &str) -> Envelope<T> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn unwrap_success_envelope() {
        let envelope: Envelope<StatusSnapshot> = envelope(
            r#"{"code":200,"data":{"status":"running","progress":40,"total_cases":10},"msg":null}"#,
        );
        let snapshot = ExecutionApi::unwrap_envelope(envelope).unwrap();
        assert_eq!(snapshot.status, "running");
        assert_eq!(snapshot.progress, Some(40.0));
        assert_eq!(snapshot.total_cases, Some(10));
    }

    #[test]
    fn non_success_code_surfaces_msg() {
        let envelope: Envelope<StatusSnapshot> =
            envelope(r#"{"code":404,"data":null,"msg":"execution not found"}"#);
        let err = ExecutionApi::unwrap_envelope(envelope).unwrap_err();
        assert_matches!(
            err,
            WatchError::Application { code: 404, ref message } if message == "execution not found"
        );
    }

    #[test]
    fn success_without_data_is_an_application_error() {
        let envelope: Envelope<StatusSnapshot> = envelope(r#"{"code":200,"data":null}"#);
        assert_matches!(
            ExecutionApi::unwrap_envelope(envelope),
            Err(WatchError::Application { code: 200, .. })
        );
    }

    #[test]
    fn submit_data_tolerates_either_id_key() {
        let with_execution_id: Envelope<SubmitData> =
            envelope(r#"{"code":200,"data":{"execution_id":"e1"}}"#);
        let data = ExecutionApi::unwrap_envelope(with_execution_id).unwrap();
        assert_eq!(data.execution_id.as_deref(), Some("e1"));

        let with_test_id: Envelope<SubmitData> =
            envelope(r#"{"code":200,"data":{"test_id":"t9"}}"#);
        let data = ExecutionApi::unwrap_envelope(with_test_id).unwrap();
        assert_eq!(data.test_id.as_deref(), Some("t9"));
    }
}
