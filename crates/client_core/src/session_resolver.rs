use std::sync::Arc;

use shared::domain::{SessionClass, VotingSession};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{error::ClientResult, transport::VotingApi};

/// Memoized view of the server's active session.
///
/// Each component owns its own resolver; invalidating one does not touch another. The lock
/// is held across the fetch, so concurrent resolves share one round trip and an
/// invalidation cannot be overwritten by a fetch that started before it.
pub struct SessionResolver {
    api: Arc<dyn VotingApi>,
    cached: Mutex<Option<VotingSession>>,
}

impl SessionResolver {
    pub fn new(api: Arc<dyn VotingApi>) -> Self {
        Self {
            api,
            cached: Mutex::new(None),
        }
    }

    /// Returns the cached session unless `force` is set or nothing is cached yet. A forced
    /// call replaces the cache even when the server reports no session. On failure the cache
    /// is left as it was.
    pub async fn resolve_active_session(&self, force: bool) -> ClientResult<Option<VotingSession>> {
        let mut cached = self.cached.lock().await;
        if !force {
            if let Some(session) = cached.as_ref() {
                debug!(session_id = session.id.0, "session: served from cache");
                return Ok(Some(session.clone()));
            }
        }

        let fetched = self.api.active_session().await?;
        if cached.as_ref().map(|s| s.id) != fetched.as_ref().map(|s| s.id) {
            info!(
                previous = ?cached.as_ref().map(|s| s.id.0),
                current = ?fetched.as_ref().map(|s| s.id.0),
                class = ?SessionClass::of(fetched.as_ref()),
                "session: active session changed"
            );
        }
        *cached = fetched.clone();
        Ok(fetched)
    }

    pub async fn cached(&self) -> Option<VotingSession> {
        self.cached.lock().await.clone()
    }

    pub async fn invalidate(&self) {
        if self.cached.lock().await.take().is_some() {
            debug!("session: cache invalidated");
        }
    }
}
