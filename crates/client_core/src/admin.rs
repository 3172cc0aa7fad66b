use std::sync::Arc;

use shared::{
    domain::{SessionId, VotingSession},
    protocol::CreateSessionRequest,
};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::{
    aggregate::{aggregate, VoteResult},
    auth::AuthStore,
    error::{ClientError, ClientResult, ADMIN_LOGIN_REQUIRED},
    poller::ResultsPoller,
    transport::VotingApi,
};

#[derive(Debug, Clone, Default)]
pub struct AdminState {
    pub sessions: Vec<VotingSession>,
    pub last_created_session: Option<VotingSession>,
    pub is_loading: bool,
    pub status_message: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Activate,
    Close,
}

impl Transition {
    fn verb(self) -> &'static str {
        match self {
            Self::Activate => "activate",
            Self::Close => "close",
        }
    }

    fn default_message(self) -> &'static str {
        match self {
            Self::Activate => "Session activated",
            Self::Close => "Session closed",
        }
    }
}

/// Session lifecycle commands for administrators.
///
/// Activating or closing a session changes which session the server calls active, so both
/// also reset the results poller: stop, forget its session, refresh against the new one,
/// start again.
pub struct AdminSessionController {
    api: Arc<dyn VotingApi>,
    auth: Arc<AuthStore>,
    poller: Arc<ResultsPoller>,
    state: RwLock<AdminState>,
}

impl AdminSessionController {
    pub fn new(api: Arc<dyn VotingApi>, auth: Arc<AuthStore>, poller: Arc<ResultsPoller>) -> Self {
        Self {
            api,
            auth,
            poller,
            state: RwLock::new(AdminState::default()),
        }
    }

    pub async fn state(&self) -> AdminState {
        self.state.read().await.clone()
    }

    pub async fn clear_status(&self) {
        let mut state = self.state.write().await;
        state.status_message = None;
        state.error_message = None;
    }

    pub async fn list_sessions(&self) -> ClientResult<Vec<VotingSession>> {
        self.begin(false).await;
        let result = async {
            let token = self.auth.require_token(ADMIN_LOGIN_REQUIRED).await?;
            self.api.list_sessions(&token).await
        }
        .await;

        let mut state = self.state.write().await;
        state.is_loading = false;
        match result {
            Ok(sessions) => {
                state.sessions = sessions.clone();
                Ok(sessions)
            }
            Err(err) => {
                state.error_message = Some(err.to_string());
                Err(err)
            }
        }
    }

    pub async fn get_session_details(
        &self,
        session_id: SessionId,
    ) -> ClientResult<Option<VotingSession>> {
        let token = self.auth.require_token(ADMIN_LOGIN_REQUIRED).await?;
        let result = self.api.session_details(&token, session_id).await;
        if let Err(err) = &result {
            self.state.write().await.error_message = Some(err.to_string());
        }
        result
    }

    pub async fn create_session(
        &self,
        title: &str,
        options: &[String],
    ) -> ClientResult<VotingSession> {
        self.begin(true).await;
        let result = async {
            let token = self.auth.require_token(ADMIN_LOGIN_REQUIRED).await?;
            let request = validate_new_session(title, options)?;
            let session = self.api.create_session(&token, &request).await?;
            info!(session_id = session.id.0, title = %session.title, "admin: session created");
            self.reload_sessions(&token).await;
            Ok::<_, ClientError>(session)
        }
        .await;

        self.finish(result, |state, session| {
            state.last_created_session = Some(session.clone());
            state.status_message = Some(format!("Session {} created", session.id));
        })
        .await
    }

    pub async fn activate_session(&self, session_id: SessionId) -> ClientResult<String> {
        self.transition(session_id, Transition::Activate).await
    }

    pub async fn close_session(&self, session_id: SessionId) -> ClientResult<String> {
        self.transition(session_id, Transition::Close).await
    }

    pub async fn delete_session(&self, session_id: SessionId) -> ClientResult<String> {
        self.begin(true).await;
        let result = async {
            let token = self.auth.require_token(ADMIN_LOGIN_REQUIRED).await?;
            let message = self
                .api
                .delete_session(&token, session_id)
                .await?
                .unwrap_or_else(|| "Session deleted".to_string());
            info!(session_id = session_id.0, "admin: session deleted");
            self.reload_sessions(&token).await;
            Ok::<_, ClientError>(message)
        }
        .await;

        self.finish(result, |state, message| {
            state.status_message = Some(message.clone());
        })
        .await
    }

    /// Final counts of one session, in the order the server lists them.
    pub async fn final_results(&self, session_id: SessionId) -> ClientResult<Vec<VoteResult>> {
        let raw = self.api.final_results(session_id).await?;
        Ok(aggregate(None, raw.as_ref()))
    }

    async fn transition(
        &self,
        session_id: SessionId,
        transition: Transition,
    ) -> ClientResult<String> {
        self.begin(true).await;
        let result = async {
            let token = self.auth.require_token(ADMIN_LOGIN_REQUIRED).await?;
            let message = match transition {
                Transition::Activate => self.api.activate_session(&token, session_id).await?,
                Transition::Close => self.api.close_session(&token, session_id).await?,
            }
            .unwrap_or_else(|| transition.default_message().to_string());
            info!(
                session_id = session_id.0,
                action = transition.verb(),
                "admin: session transitioned"
            );

            self.reload_sessions(&token).await;
            self.poller.stop();
            self.poller.invalidate_session().await;
            if let Err(err) = self.poller.refresh_forced().await {
                warn!(
                    session_id = session_id.0,
                    "admin: results refresh after {} failed: {err}",
                    transition.verb()
                );
            }
            self.poller.restart();
            Ok::<_, ClientError>(message)
        }
        .await;

        self.finish(result, |state, message| {
            state.status_message = Some(message.clone());
        })
        .await
    }

    /// Refreshes the session list after a mutation. A failure here is recorded but does not
    /// undo or fail the mutation.
    async fn reload_sessions(&self, token: &str) {
        match self.api.list_sessions(token).await {
            Ok(sessions) => self.state.write().await.sessions = sessions,
            Err(err) => {
                warn!("admin: failed to reload sessions: {err}");
                self.state.write().await.error_message = Some(err.to_string());
            }
        }
    }

    async fn begin(&self, clear_status: bool) {
        let mut state = self.state.write().await;
        state.is_loading = true;
        state.error_message = None;
        if clear_status {
            state.status_message = None;
        }
    }

    async fn finish<T>(
        &self,
        result: ClientResult<T>,
        on_success: impl FnOnce(&mut AdminState, &T),
    ) -> ClientResult<T> {
        let mut state = self.state.write().await;
        state.is_loading = false;
        match &result {
            Ok(value) => on_success(&mut *state, value),
            Err(err) => state.error_message = Some(err.to_string()),
        }
        result
    }
}

fn validate_new_session(title: &str, options: &[String]) -> ClientResult<CreateSessionRequest> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ClientError::validation("Session title is required."));
    }
    let options: Vec<String> = options
        .iter()
        .map(|option| option.trim())
        .filter(|option| !option.is_empty())
        .map(str::to_string)
        .collect();
    if options.len() < 2 {
        return Err(ClientError::validation("Provide at least two options."));
    }
    Ok(CreateSessionRequest {
        title: title.to_string(),
        options,
    })
}

#[cfg(test)]
#[path = "tests/admin_tests.rs"]
mod tests;
