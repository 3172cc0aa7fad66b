use std::sync::Arc;

use shared::{
    domain::{OptionId, SessionClass, VotingOption, VotingSession},
    protocol::SubmitVoteRequest,
};
use tracing::{debug, info, warn};

use crate::{
    auth::AuthStore,
    error::{ClientError, ClientResult, VOTER_LOGIN_REQUIRED},
    session_resolver::SessionResolver,
    transport::VotingApi,
};

pub const DEFAULT_SESSION_TITLE: &str = "Live Voting Session";
pub const NO_ACTIVE_SESSION: &str = "No active session right now.";
pub const VOTING_NOT_ACTIVE: &str = "Voting is not active.";
pub const SELECT_OPTION_FIRST: &str = "Select an option before submitting.";
pub const VOTE_SUBMITTED: &str = "Vote submitted";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    NoSession,
    SessionClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VotingPhase {
    /// Nothing selected yet. Selection needs a loaded, active session.
    Idle,
    Selected(OptionId),
    Submitting(OptionId),
    /// Terminal for this state object.
    Voted(OptionId),
    Blocked(BlockReason),
}

#[derive(Debug, Clone)]
pub struct VotingState {
    pub session: Option<VotingSession>,
    pub phase: VotingPhase,
    pub status_message: Option<String>,
    pub error_message: Option<String>,
}

impl Default for VotingState {
    fn default() -> Self {
        Self {
            session: None,
            phase: VotingPhase::Idle,
            status_message: None,
            error_message: None,
        }
    }
}

impl VotingState {
    pub fn selected_option_id(&self) -> Option<OptionId> {
        match self.phase {
            VotingPhase::Selected(id) | VotingPhase::Submitting(id) | VotingPhase::Voted(id) => {
                Some(id)
            }
            VotingPhase::Idle | VotingPhase::Blocked(_) => None,
        }
    }

    pub fn has_voted(&self) -> bool {
        matches!(self.phase, VotingPhase::Voted(_))
    }

    pub fn is_submitting(&self) -> bool {
        matches!(self.phase, VotingPhase::Submitting(_))
    }

    pub fn is_active(&self) -> bool {
        self.session.as_ref().is_some_and(VotingSession::is_active)
    }
}

/// One viewer's selection and submission lifecycle against the active session.
pub struct VotingMachine {
    api: Arc<dyn VotingApi>,
    auth: Arc<AuthStore>,
    resolver: SessionResolver,
    state: VotingState,
}

impl VotingMachine {
    pub fn new(api: Arc<dyn VotingApi>, auth: Arc<AuthStore>) -> Self {
        Self {
            resolver: SessionResolver::new(Arc::clone(&api)),
            api,
            auth,
            state: VotingState::default(),
        }
    }

    pub fn state(&self) -> &VotingState {
        &self.state
    }

    pub fn session(&self) -> Option<&VotingSession> {
        self.state.session.as_ref()
    }

    pub fn phase(&self) -> VotingPhase {
        self.state.phase
    }

    pub fn selected_option_id(&self) -> Option<OptionId> {
        self.state.selected_option_id()
    }

    pub fn has_voted(&self) -> bool {
        self.state.has_voted()
    }

    pub fn is_submitting(&self) -> bool {
        self.state.is_submitting()
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn options(&self) -> &[VotingOption] {
        self.state
            .session
            .as_ref()
            .map(|session| session.options.as_slice())
            .unwrap_or_default()
    }

    pub fn session_title(&self) -> &str {
        self.state
            .session
            .as_ref()
            .map(|session| session.title.as_str())
            .filter(|title| !title.is_empty())
            .unwrap_or(DEFAULT_SESSION_TITLE)
    }

    pub fn status_message(&self) -> Option<&str> {
        self.state.status_message.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.state.error_message.as_deref()
    }

    /// Resolves the active session. A different session than the one held replaces the
    /// whole state; the same session keeps the current phase, including `Voted`.
    pub async fn load_session(&mut self, force: bool) -> ClientResult<()> {
        if self.state.session.is_some() && !force {
            return Ok(());
        }
        self.state.error_message = None;

        let session = match self.resolver.resolve_active_session(force).await {
            Ok(session) => session,
            Err(err) => {
                warn!("voting: failed to load session: {err}");
                self.state.error_message = Some(err.to_string());
                return Err(err);
            }
        };

        let held = self.state.session.as_ref().map(|s| s.id);
        let fetched = session.as_ref().map(|s| s.id);
        if held.is_some() && held != fetched {
            info!(
                previous = ?held.map(|id| id.0),
                current = ?fetched.map(|id| id.0),
                "voting: session superseded, starting over"
            );
            self.state = VotingState::default();
        }

        let class = SessionClass::of(session.as_ref());
        self.state.session = session;
        if self.state.has_voted() {
            return Ok(());
        }

        match class {
            SessionClass::Active => {
                let still_valid = match self.state.phase {
                    VotingPhase::Selected(id) => self.state.is_active()
                        && self
                            .state
                            .session
                            .as_ref()
                            .is_some_and(|s| s.contains_option(id)),
                    _ => false,
                };
                if !still_valid {
                    self.state.phase = VotingPhase::Idle;
                }
            }
            SessionClass::Closed => {
                self.state.phase = VotingPhase::Blocked(BlockReason::SessionClosed);
                self.state.error_message = Some(NO_ACTIVE_SESSION.into());
            }
            SessionClass::Absent => {
                self.state.phase = VotingPhase::Blocked(BlockReason::NoSession);
                self.state.error_message = Some(NO_ACTIVE_SESSION.into());
            }
        }
        Ok(())
    }

    /// Returns whether the selection was taken. Ignored after voting, while submitting,
    /// without an active session, or for an id the session does not offer.
    pub fn select_option(&mut self, option_id: OptionId) -> bool {
        if !matches!(self.state.phase, VotingPhase::Idle | VotingPhase::Selected(_)) {
            return false;
        }
        let Some(session) = self.state.session.as_ref().filter(|s| s.is_active()) else {
            return false;
        };
        if !session.contains_option(option_id) {
            debug!(
                session_id = session.id.0,
                option_id = option_id.0,
                "voting: ignoring selection of unknown option"
            );
            return false;
        }
        self.state.phase = VotingPhase::Selected(option_id);
        true
    }

    /// Submits the selected option. Once a vote has gone through, further calls return
    /// `Ok(())` without contacting the server.
    pub async fn submit(&mut self) -> ClientResult<()> {
        let option_id = match self.state.phase {
            VotingPhase::Voted(_) | VotingPhase::Submitting(_) => return Ok(()),
            VotingPhase::Selected(id) => id,
            VotingPhase::Idle => {
                return Err(self.reject(ClientError::validation(SELECT_OPTION_FIRST)))
            }
            VotingPhase::Blocked(_) => {
                return Err(self.reject(ClientError::validation(VOTING_NOT_ACTIVE)))
            }
        };
        let Some(session_id) = self
            .state
            .session
            .as_ref()
            .filter(|s| s.is_active())
            .map(|s| s.id)
        else {
            return Err(self.reject(ClientError::validation(VOTING_NOT_ACTIVE)));
        };

        // Checked here rather than at selection: the role can change in between.
        if self.auth.is_admin().await {
            return Err(self.reject(ClientError::AdminCannotVote));
        }
        let token = match self.auth.require_token(VOTER_LOGIN_REQUIRED).await {
            Ok(token) => token,
            Err(err) => return Err(self.reject(err)),
        };

        self.state.phase = VotingPhase::Submitting(option_id);
        self.state.status_message = None;
        self.state.error_message = None;

        let vote = SubmitVoteRequest {
            session_id,
            option_id,
        };
        match self.api.submit_vote(&token, &vote).await {
            Ok(()) => {
                self.state.phase = VotingPhase::Voted(option_id);
                self.state.status_message = Some(VOTE_SUBMITTED.into());
                info!(session_id = session_id.0, option_id = option_id.0, "voting: vote submitted");
                Ok(())
            }
            Err(err) => {
                self.state.phase = VotingPhase::Selected(option_id);
                warn!(session_id = session_id.0, "voting: submission failed: {err}");
                Err(self.reject(err))
            }
        }
    }

    /// Drops the session and every selection, as when the viewer leaves the voting view.
    pub async fn reset(&mut self) {
        self.state = VotingState::default();
        self.resolver.invalidate().await;
    }

    fn reject(&mut self, err: ClientError) -> ClientError {
        self.state.error_message = Some(err.to_string());
        err
    }
}

#[cfg(test)]
#[path = "tests/voting_tests.rs"]
mod tests;
