use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use shared::{
    domain::{SessionId, VotingSession},
    error::server_error_message,
    protocol::{
        CreateSessionRequest, PasswordLoginRequest, RawResultMap, RequestCodeRequest,
        SubmitVoteRequest, TokenResponse, VerifyCodeRequest,
    },
};
use tracing::debug;
use url::Url;

use crate::{
    config::{parse_server_url, DEFAULT_REQUEST_TIMEOUT},
    error::{ClientError, ClientResult},
};

/// The voting server as seen by the client. Every call is a single request; nothing here
/// retries or caches.
#[async_trait]
pub trait VotingApi: Send + Sync {
    async fn request_auth_code(&self, email: &str) -> ClientResult<()>;
    async fn verify_auth_code(&self, email: &str, code: &str) -> ClientResult<TokenResponse>;
    async fn login(&self, email: &str, password: &str) -> ClientResult<TokenResponse>;
    async fn active_session(&self) -> ClientResult<Option<VotingSession>>;
    async fn submit_vote(&self, token: &str, vote: &SubmitVoteRequest) -> ClientResult<()>;
    async fn live_results(&self) -> ClientResult<Option<RawResultMap>>;
    async fn latest_final_results(&self) -> ClientResult<Option<RawResultMap>>;
    async fn final_results(&self, session_id: SessionId) -> ClientResult<Option<RawResultMap>>;
    async fn create_session(
        &self,
        token: &str,
        request: &CreateSessionRequest,
    ) -> ClientResult<VotingSession>;
    async fn activate_session(&self, token: &str, session_id: SessionId)
        -> ClientResult<Option<String>>;
    async fn close_session(&self, token: &str, session_id: SessionId)
        -> ClientResult<Option<String>>;
    async fn delete_session(&self, token: &str, session_id: SessionId)
        -> ClientResult<Option<String>>;
    async fn list_sessions(&self, token: &str) -> ClientResult<Vec<VotingSession>>;
    async fn session_details(
        &self,
        token: &str,
        session_id: SessionId,
    ) -> ClientResult<Option<VotingSession>>;
}

pub struct HttpVotingApi {
    http: Client,
    base_url: Url,
}

impl HttpVotingApi {
    pub fn new(server_url: &str) -> ClientResult<Self> {
        Self::with_timeout(server_url, DEFAULT_REQUEST_TIMEOUT)
    }

    /// A request that has not completed within `timeout` fails as [`ClientError::Network`].
    pub fn with_timeout(server_url: &str, timeout: Duration) -> ClientResult<Self> {
        let base_url = parse_server_url(server_url)?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| {
                ClientError::validation(format!("failed to build http client: {err}"))
            })?;
        Ok(Self::with_client(http, base_url))
    }

    pub fn with_client(http: Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
    ) -> ClientResult<RequestBuilder> {
        let url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| {
                ClientError::validation(format!("invalid request path '{path}': {err}"))
            })?;
        let mut builder = self.http.request(method, url);
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        Ok(builder)
    }

    /// Sends the request and returns the body text of a 2xx response, or `None` for 204 and
    /// empty bodies.
    async fn execute(&self, request: RequestBuilder) -> ClientResult<Option<String>> {
        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let text = response.text().await?;
        if !status.is_success() {
            let message =
                server_error_message(&text, status.canonical_reason().unwrap_or_default());
            debug!(status = status.as_u16(), %message, "transport: server rejected request");
            return Err(ClientError::Server {
                status: status.as_u16(),
                message,
            });
        }

        if text.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(text))
        }
    }

    async fn fetch_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> ClientResult<Option<T>> {
        match self.execute(request).await? {
            None => Ok(None),
            Some(text) => serde_json::from_str::<Option<T>>(&text)
                .map_err(|err| ClientError::Decode(err.to_string())),
        }
    }

    async fn fetch_message(&self, request: RequestBuilder) -> ClientResult<Option<String>> {
        Ok(self.execute(request).await?.map(|text| message_from_body(&text)))
    }
}

/// Admin mutations answer with a bare JSON string, an object carrying `message`, or plain
/// text.
fn message_from_body(text: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::String(message)) => message,
        Ok(serde_json::Value::Object(fields)) => match fields.get("message") {
            Some(serde_json::Value::String(message)) => message.clone(),
            _ => text.to_string(),
        },
        _ => text.to_string(),
    }
}

#[async_trait]
impl VotingApi for HttpVotingApi {
    async fn request_auth_code(&self, email: &str) -> ClientResult<()> {
        let request = self
            .request(Method::POST, "/auth/request-code", None)?
            .json(&RequestCodeRequest {
                email: email.to_string(),
            });
        self.execute(request).await?;
        Ok(())
    }

    async fn verify_auth_code(&self, email: &str, code: &str) -> ClientResult<TokenResponse> {
        let request = self
            .request(Method::POST, "/auth/verify-code", None)?
            .json(&VerifyCodeRequest {
                email: email.to_string(),
                code: code.to_string(),
            });
        Ok(self.fetch_json(request).await?.unwrap_or_default())
    }

    async fn login(&self, email: &str, password: &str) -> ClientResult<TokenResponse> {
        let request = self
            .request(Method::POST, "/auth/login", None)?
            .json(&PasswordLoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            });
        Ok(self.fetch_json(request).await?.unwrap_or_default())
    }

    async fn active_session(&self) -> ClientResult<Option<VotingSession>> {
        self.fetch_json(self.request(Method::GET, "/session/active", None)?)
            .await
    }

    async fn submit_vote(&self, token: &str, vote: &SubmitVoteRequest) -> ClientResult<()> {
        let request = self.request(Method::POST, "/vote", Some(token))?.json(vote);
        self.execute(request).await?;
        Ok(())
    }

    async fn live_results(&self) -> ClientResult<Option<RawResultMap>> {
        self.fetch_json(self.request(Method::GET, "/results/live", None)?)
            .await
    }

    async fn latest_final_results(&self) -> ClientResult<Option<RawResultMap>> {
        self.fetch_json(self.request(Method::GET, "/results/final", None)?)
            .await
    }

    async fn final_results(&self, session_id: SessionId) -> ClientResult<Option<RawResultMap>> {
        let path = format!("/results/final/{session_id}");
        self.fetch_json(self.request(Method::GET, &path, None)?).await
    }

    async fn create_session(
        &self,
        token: &str,
        request: &CreateSessionRequest,
    ) -> ClientResult<VotingSession> {
        let request = self
            .request(Method::POST, "/admin/session", Some(token))?
            .json(request);
        self.fetch_json(request)
            .await?
            .ok_or_else(|| ClientError::Decode("create session returned no session".into()))
    }

    async fn activate_session(
        &self,
        token: &str,
        session_id: SessionId,
    ) -> ClientResult<Option<String>> {
        let path = format!("/admin/session/activate/{session_id}");
        self.fetch_message(self.request(Method::POST, &path, Some(token))?)
            .await
    }

    async fn close_session(
        &self,
        token: &str,
        session_id: SessionId,
    ) -> ClientResult<Option<String>> {
        let path = format!("/admin/session/close/{session_id}");
        self.fetch_message(self.request(Method::POST, &path, Some(token))?)
            .await
    }

    async fn delete_session(
        &self,
        token: &str,
        session_id: SessionId,
    ) -> ClientResult<Option<String>> {
        let path = format!("/admin/session/{session_id}");
        self.fetch_message(self.request(Method::DELETE, &path, Some(token))?)
            .await
    }

    async fn list_sessions(&self, token: &str) -> ClientResult<Vec<VotingSession>> {
        Ok(self
            .fetch_json(self.request(Method::GET, "/admin/session", Some(token))?)
            .await?
            .unwrap_or_default())
    }

    async fn session_details(
        &self,
        token: &str,
        session_id: SessionId,
    ) -> ClientResult<Option<VotingSession>> {
        let path = format!("/admin/session/{session_id}");
        self.fetch_json(self.request(Method::GET, &path, Some(token))?)
            .await
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
