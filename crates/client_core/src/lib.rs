use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::info;

pub mod admin;
pub mod aggregate;
pub mod auth;
pub mod config;
pub mod error;
pub mod poller;
pub mod session_resolver;
pub mod transport;
pub mod voting;

#[cfg(test)]
mod test_support;

pub use admin::{AdminSessionController, AdminState};
pub use aggregate::{aggregate, VoteResult};
pub use auth::{
    AdminGrant, AuthStore, Credential, CredentialStorage, FileCredentialStorage,
    MemoryCredentialStorage,
};
pub use config::{load_settings, ClientSettings};
pub use error::{ClientError, ClientResult};
pub use poller::{ResultsBoard, ResultsMode, ResultsPoller, ResultsSnapshot};
pub use transport::{HttpVotingApi, VotingApi};
pub use voting::{VotingMachine, VotingPhase, VotingState};

/// Everything a voting front end needs, wired against one server and one credential store.
///
/// The voter page, the results board and the admin console each keep their own session
/// cache; only the credential is shared.
pub struct VotingClient {
    settings: ClientSettings,
    api: Arc<dyn VotingApi>,
    auth: Arc<AuthStore>,
    voting: Mutex<VotingMachine>,
    poller: Arc<ResultsPoller>,
    admin: AdminSessionController,
}

impl VotingClient {
    pub fn from_settings(settings: ClientSettings) -> ClientResult<Self> {
        let api = Arc::new(HttpVotingApi::with_timeout(
            &settings.server_url,
            settings.request_timeout,
        )?);
        let storage = Arc::new(FileCredentialStorage::new(settings.credentials_path.clone()));
        info!(
            server_url = %api.base_url(),
            credentials = %settings.credentials_path.display(),
            "client: configured"
        );
        Ok(Self::with_dependencies(settings, api, storage))
    }

    pub fn with_dependencies(
        settings: ClientSettings,
        api: Arc<dyn VotingApi>,
        storage: Arc<dyn CredentialStorage>,
    ) -> Self {
        let auth = AuthStore::initialize(Arc::clone(&api), storage, settings.admin_emails.clone());
        let poller = Arc::new(ResultsPoller::with_interval(
            Arc::clone(&api),
            settings.poll_interval,
        ));
        let voting = VotingMachine::new(Arc::clone(&api), Arc::clone(&auth));
        let admin =
            AdminSessionController::new(Arc::clone(&api), Arc::clone(&auth), Arc::clone(&poller));
        Self {
            settings,
            api,
            auth,
            voting: Mutex::new(voting),
            poller,
            admin,
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn api(&self) -> &Arc<dyn VotingApi> {
        &self.api
    }

    pub fn auth(&self) -> &Arc<AuthStore> {
        &self.auth
    }

    pub async fn voting(&self) -> MutexGuard<'_, VotingMachine> {
        self.voting.lock().await
    }

    pub fn poller(&self) -> &Arc<ResultsPoller> {
        &self.poller
    }

    pub fn admin(&self) -> &AdminSessionController {
        &self.admin
    }

    /// Starts the results board with the configured interval.
    pub fn start_results(&self) -> bool {
        self.poller.start(self.settings.poll_interval)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
