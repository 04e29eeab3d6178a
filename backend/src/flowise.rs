use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::FlowiseConfig;

/// Client for the external Flowise workflow engine.
pub struct FlowiseClient {
    http_client: Client,
    base_url: String,
    api_key: Option<String>,
}

/// Chatflow descriptor from the Flowise catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatflowDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
struct PredictionRequest<'a> {
    question: &'a str,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
}

/// Flowise prediction response.
#[derive(Debug, Deserialize)]
pub struct PredictionResponse {
    pub text: String,
    #[serde(rename = "chatMessageId", default)]
    pub chat_message_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum FlowiseError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Flowise error ({status}): {message}")]
    Upstream { status: u16, message: String },
}

impl FlowiseClient {
    pub fn new(config: &FlowiseConfig) -> Self {
        Self {
            http_client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    /// Fetch the full chatflow catalog. Callers filter this down to what the
    /// requesting user is allowed to see.
    pub async fn list_chatflows(&self) -> Result<Vec<ChatflowDescriptor>, FlowiseError> {
        let url = format!("{}/api/v1/chatflows", self.base_url);
        let mut request = self.http_client.get(&url);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FlowiseError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(FlowiseError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| FlowiseError::InvalidResponse(e.to_string()))
    }

    /// Send a question to a chatflow and return the answer.
    pub async fn predict(
        &self,
        chatflow_id: &str,
        question: &str,
        session_id: Option<&str>,
    ) -> Result<PredictionResponse, FlowiseError> {
        let url = format!("{}/api/v1/prediction/{}", self.base_url, chatflow_id);
        let mut request = self.http_client.post(&url).json(&PredictionRequest {
            question,
            session_id,
        });
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FlowiseError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(FlowiseError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| FlowiseError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base_url: &str, api_key: Option<&str>) -> FlowiseClient {
        FlowiseClient::new(&FlowiseConfig {
            base_url: base_url.to_string(),
            api_key: api_key.map(String::from),
        })
    }

    #[tokio::test]
    async fn test_list_chatflows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/chatflows"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "wf-9", "name": "Course Tutor", "description": "Helper bot"},
                {"id": "wf-10", "name": "Grader"}
            ])))
            .mount(&server)
            .await;

        let chatflows = client(&server.uri(), None).list_chatflows().await.unwrap();
        assert_eq!(chatflows.len(), 2);
        assert_eq!(chatflows[0].id, "wf-9");
        assert_eq!(chatflows[0].description, Some("Helper bot".to_string()));
        assert_eq!(chatflows[1].description, None);
    }

    #[tokio::test]
    async fn test_api_key_sent_as_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/chatflows"))
            .and(header("authorization", "Bearer secret-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let chatflows = client(&server.uri(), Some("secret-key"))
            .list_chatflows()
            .await
            .unwrap();
        assert!(chatflows.is_empty());
    }

    #[tokio::test]
    async fn test_predict_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/prediction/wf-9"))
            .and(body_partial_json(json!({"question": "What is a loop?"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "text": "A loop repeats statements.",
                "chatMessageId": "msg-1"
            })))
            .mount(&server)
            .await;

        let prediction = client(&server.uri(), None)
            .predict("wf-9", "What is a loop?", Some("sess-1"))
            .await
            .unwrap();
        assert_eq!(prediction.text, "A loop repeats statements.");
        assert_eq!(prediction.chat_message_id, Some("msg-1".to_string()));
    }

    #[tokio::test]
    async fn test_upstream_error_carries_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/chatflows"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        match client(&server.uri(), None).list_chatflows().await {
            Err(FlowiseError::Upstream { status, message }) => {
                assert_eq!(status, 502);
                assert_eq!(message, "bad gateway");
            }
            other => panic!("expected upstream error, got {:?}", other.map(|_| ())),
        }
    }
}
