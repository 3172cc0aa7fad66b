use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use shared::{
    domain::{OptionId, SessionId, SessionStatus, VotingOption, VotingSession},
    protocol::{CreateSessionRequest, RawResultMap, SubmitVoteRequest, TokenResponse},
};
use tokio::sync::{oneshot, Mutex};

use crate::{
    error::{ClientError, ClientResult},
    transport::VotingApi,
};

/// Holds the next live-results fetch until released. `entered` fires once the fetch has
/// captured its (soon stale) data.
pub struct LiveGate {
    pub entered: oneshot::Sender<()>,
    pub release: oneshot::Receiver<()>,
}

/// In-memory voting server. `/session/active` returns `active`, live results come from the
/// per-session tallies, activate/close move `active` the way the real server does.
#[derive(Default)]
pub struct FakeVotingApi {
    pub active: Mutex<Option<VotingSession>>,
    pub sessions: Mutex<Vec<VotingSession>>,
    pub tallies: Mutex<HashMap<SessionId, RawResultMap>>,
    pub latest_final: Mutex<Option<RawResultMap>>,
    pub token_response: Mutex<TokenResponse>,
    pub submitted: Mutex<Vec<(String, SubmitVoteRequest)>>,
    pub admin_calls: Mutex<Vec<String>>,
    session_error: Mutex<Option<ClientError>>,
    vote_error: Mutex<Option<ClientError>>,
    live_gate: Mutex<Option<LiveGate>>,
    pub session_fetches: AtomicUsize,
    pub live_fetches: AtomicUsize,
    pub final_fetches: AtomicUsize,
    pub vote_calls: AtomicUsize,
    pub code_requests: AtomicUsize,
}

impl FakeVotingApi {
    pub fn session(id: i64, status: SessionStatus, labels: &[&str]) -> VotingSession {
        VotingSession {
            id: SessionId(id),
            title: format!("Session {id}"),
            status: Some(status),
            options: labels
                .iter()
                .enumerate()
                .map(|(index, label)| {
                    VotingOption::new(OptionId(id * 10 + index as i64 + 1), *label)
                })
                .collect(),
        }
    }

    pub fn with_session(session: VotingSession) -> Self {
        let api = Self::default();
        *api.active.try_lock().expect("fresh fake") = Some(session.clone());
        api.sessions.try_lock().expect("fresh fake").push(session);
        api
    }

    pub async fn set_session(&self, session: Option<VotingSession>) {
        *self.active.lock().await = session;
    }

    pub async fn add_session(&self, session: VotingSession) {
        self.sessions.lock().await.push(session);
    }

    pub async fn set_tally(&self, session_id: i64, entries: &[(&str, u64)]) {
        self.tallies.lock().await.insert(
            SessionId(session_id),
            entries.iter().map(|(label, votes)| (*label, *votes)).collect(),
        );
    }

    pub async fn set_latest_final(&self, entries: &[(&str, u64)]) {
        *self.latest_final.lock().await =
            Some(entries.iter().map(|(label, votes)| (*label, *votes)).collect());
    }

    pub async fn fail_session_fetch(&self, error: Option<ClientError>) {
        *self.session_error.lock().await = error;
    }

    pub async fn fail_votes(&self, error: Option<ClientError>) {
        *self.vote_error.lock().await = error;
    }

    pub async fn gate_next_live_fetch(&self) -> (oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        *self.live_gate.lock().await = Some(LiveGate {
            entered: entered_tx,
            release: release_rx,
        });
        (entered_rx, release_tx)
    }

    async fn set_status(&self, session_id: SessionId, status: SessionStatus) -> ClientResult<()> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .iter_mut()
            .find(|session| session.id == session_id)
            .ok_or_else(|| ClientError::Server {
                status: 404,
                message: format!("Session {session_id} not found"),
            })?;
        session.status = Some(status);
        let updated = session.clone();
        if status == SessionStatus::Active {
            for other in sessions.iter_mut().filter(|s| s.id != session_id) {
                if other.status == Some(SessionStatus::Active) {
                    other.status = Some(SessionStatus::Closed);
                }
            }
        }
        drop(sessions);

        let mut active = self.active.lock().await;
        match status {
            SessionStatus::Active => *active = Some(updated),
            _ => {
                if active.as_ref().map(|s| s.id) == Some(session_id) {
                    *active = None;
                    let tally = self.tallies.lock().await.get(&session_id).cloned();
                    *self.latest_final.lock().await = tally;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl VotingApi for FakeVotingApi {
    async fn request_auth_code(&self, _email: &str) -> ClientResult<()> {
        self.code_requests.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn verify_auth_code(&self, _email: &str, code: &str) -> ClientResult<TokenResponse> {
        if code != "123456" {
            return Err(ClientError::Server {
                status: 401,
                message: "Invalid code".into(),
            });
        }
        Ok(self.token_response.lock().await.clone())
    }

    async fn login(&self, _email: &str, _password: &str) -> ClientResult<TokenResponse> {
        Ok(self.token_response.lock().await.clone())
    }

    async fn active_session(&self) -> ClientResult<Option<VotingSession>> {
        self.session_fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.session_error.lock().await.clone() {
            return Err(err);
        }
        Ok(self.active.lock().await.clone())
    }

    async fn submit_vote(&self, token: &str, vote: &SubmitVoteRequest) -> ClientResult<()> {
        self.vote_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.vote_error.lock().await.clone() {
            return Err(err);
        }
        self.submitted
            .lock()
            .await
            .push((token.to_string(), vote.clone()));
        Ok(())
    }

    async fn live_results(&self) -> ClientResult<Option<RawResultMap>> {
        self.live_fetches.fetch_add(1, Ordering::SeqCst);
        let active_id = self.active.lock().await.as_ref().map(|s| s.id);
        let snapshot = match active_id {
            Some(id) => self.tallies.lock().await.get(&id).cloned(),
            None => None,
        };
        let gate = self.live_gate.lock().await.take();
        if let Some(gate) = gate {
            let _ = gate.entered.send(());
            let _ = gate.release.await;
        }
        Ok(snapshot)
    }

    async fn latest_final_results(&self) -> ClientResult<Option<RawResultMap>> {
        self.final_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.latest_final.lock().await.clone())
    }

    async fn final_results(&self, session_id: SessionId) -> ClientResult<Option<RawResultMap>> {
        self.final_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.tallies.lock().await.get(&session_id).cloned())
    }

    async fn create_session(
        &self,
        token: &str,
        request: &CreateSessionRequest,
    ) -> ClientResult<VotingSession> {
        self.admin_calls
            .lock()
            .await
            .push(format!("create:{token}:{}", request.title));
        let mut sessions = self.sessions.lock().await;
        let id = sessions.iter().map(|s| s.id.0).max().unwrap_or(0) + 1;
        let session = VotingSession {
            id: SessionId(id),
            title: request.title.clone(),
            status: Some(SessionStatus::Draft),
            options: request
                .options
                .iter()
                .enumerate()
                .map(|(index, label)| VotingOption::new(OptionId(index as i64 + 1), label.clone()))
                .collect(),
        };
        sessions.push(session.clone());
        Ok(session)
    }

    async fn activate_session(
        &self,
        token: &str,
        session_id: SessionId,
    ) -> ClientResult<Option<String>> {
        self.admin_calls
            .lock()
            .await
            .push(format!("activate:{token}:{session_id}"));
        self.set_status(session_id, SessionStatus::Active).await?;
        Ok(Some(format!("Session {session_id} activated")))
    }

    async fn close_session(
        &self,
        token: &str,
        session_id: SessionId,
    ) -> ClientResult<Option<String>> {
        self.admin_calls
            .lock()
            .await
            .push(format!("close:{token}:{session_id}"));
        self.set_status(session_id, SessionStatus::Closed).await?;
        Ok(None)
    }

    async fn delete_session(
        &self,
        token: &str,
        session_id: SessionId,
    ) -> ClientResult<Option<String>> {
        self.admin_calls
            .lock()
            .await
            .push(format!("delete:{token}:{session_id}"));
        self.sessions.lock().await.retain(|s| s.id != session_id);
        Ok(Some("Deleted".into()))
    }

    async fn list_sessions(&self, token: &str) -> ClientResult<Vec<VotingSession>> {
        self.admin_calls.lock().await.push(format!("list:{token}"));
        Ok(self.sessions.lock().await.clone())
    }

    async fn session_details(
        &self,
        token: &str,
        session_id: SessionId,
    ) -> ClientResult<Option<VotingSession>> {
        self.admin_calls
            .lock()
            .await
            .push(format!("details:{token}:{session_id}"));
        Ok(self
            .sessions
            .lock()
            .await
            .iter()
            .find(|s| s.id == session_id)
            .cloned())
    }
}
