use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use shared::{domain::Role, protocol::TokenResponse};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::{
    error::{ClientError, ClientResult},
    transport::VotingApi,
};

pub const TOKEN_KEY: &str = "tv_voting_token";
pub const EMAIL_KEY: &str = "tv_voting_email";
pub const ROLE_KEY: &str = "tv_voting_role";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub email: Option<String>,
    /// Role claim issued by the server at login, if any.
    pub role: Option<Role>,
}

/// Where the credential survives restarts.
pub trait CredentialStorage: Send + Sync {
    fn load(&self) -> ClientResult<Option<Credential>>;
    fn save(&self, credential: &Credential) -> ClientResult<()>;
    fn clear(&self) -> ClientResult<()>;
}

/// Flat JSON key/value file. Keys other than ours are preserved.
pub struct FileCredentialStorage {
    path: PathBuf,
}

impl FileCredentialStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> ClientResult<BTreeMap<String, String>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(storage_error(&self.path, err)),
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).map_err(|err| storage_error(&self.path, err))
    }

    fn write_entries(&self, entries: &BTreeMap<String, String>) -> ClientResult<()> {
        if entries.is_empty() {
            return match fs::remove_file(&self.path) {
                Err(err) if err.kind() != std::io::ErrorKind::NotFound => {
                    Err(storage_error(&self.path, err))
                }
                _ => Ok(()),
            };
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| storage_error(parent, err))?;
        }
        let raw =
            serde_json::to_string_pretty(entries).map_err(|err| storage_error(&self.path, err))?;
        fs::write(&self.path, raw).map_err(|err| storage_error(&self.path, err))
    }
}

fn storage_error(path: &Path, err: impl std::fmt::Display) -> ClientError {
    ClientError::Storage(format!("{}: {err}", path.display()))
}

fn role_to_key(role: Role) -> &'static str {
    match role {
        Role::Admin => "ADMIN",
        Role::Voter => "VOTER",
        Role::Other => "OTHER",
    }
}

fn role_from_key(raw: &str) -> Option<Role> {
    serde_json::from_value(serde_json::Value::String(raw.to_string())).ok()
}

impl CredentialStorage for FileCredentialStorage {
    fn load(&self) -> ClientResult<Option<Credential>> {
        let entries = self.read_entries()?;
        let Some(token) = entries.get(TOKEN_KEY).filter(|t| !t.is_empty()) else {
            return Ok(None);
        };
        Ok(Some(Credential {
            token: token.clone(),
            email: entries.get(EMAIL_KEY).cloned(),
            role: entries.get(ROLE_KEY).and_then(|raw| role_from_key(raw)),
        }))
    }

    fn save(&self, credential: &Credential) -> ClientResult<()> {
        let mut entries = self.read_entries()?;
        entries.insert(TOKEN_KEY.into(), credential.token.clone());
        match &credential.email {
            Some(email) => entries.insert(EMAIL_KEY.into(), email.clone()),
            None => entries.remove(EMAIL_KEY),
        };
        match credential.role {
            Some(role) => entries.insert(ROLE_KEY.into(), role_to_key(role).into()),
            None => entries.remove(ROLE_KEY),
        };
        self.write_entries(&entries)
    }

    fn clear(&self) -> ClientResult<()> {
        let mut entries = self.read_entries()?;
        for key in [TOKEN_KEY, EMAIL_KEY, ROLE_KEY] {
            entries.remove(key);
        }
        self.write_entries(&entries)
    }
}

#[derive(Default)]
pub struct MemoryCredentialStorage {
    credential: Mutex<Option<Credential>>,
}

impl MemoryCredentialStorage {
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            credential: Mutex::new(Some(credential)),
        }
    }
}

impl CredentialStorage for MemoryCredentialStorage {
    fn load(&self) -> ClientResult<Option<Credential>> {
        Ok(self
            .credential
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, credential: &Credential) -> ClientResult<()> {
        *self.credential.lock().unwrap_or_else(PoisonError::into_inner) = Some(credential.clone());
        Ok(())
    }

    fn clear(&self) -> ClientResult<()> {
        *self.credential.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminGrant {
    /// The server issued an `ADMIN` role at login.
    RoleClaim,
    /// No role was issued and the email is on the configured allowlist.
    LegacyAllowlist,
}

/// Process-wide authentication state. Loaded from storage once, then changed only by
/// verify/login/logout.
pub struct AuthStore {
    api: Arc<dyn VotingApi>,
    storage: Arc<dyn CredentialStorage>,
    admin_emails: Vec<String>,
    credential: RwLock<Option<Credential>>,
}

impl AuthStore {
    pub fn initialize(
        api: Arc<dyn VotingApi>,
        storage: Arc<dyn CredentialStorage>,
        admin_emails: Vec<String>,
    ) -> Arc<Self> {
        let credential = match storage.load() {
            Ok(credential) => credential,
            Err(err) => {
                warn!("auth: starting signed out, stored credential unreadable: {err}");
                None
            }
        };
        Arc::new(Self {
            api,
            storage,
            admin_emails: admin_emails
                .into_iter()
                .map(|email| email.trim().to_ascii_lowercase())
                .collect(),
            credential: RwLock::new(credential),
        })
    }

    pub async fn credential(&self) -> Option<Credential> {
        self.credential.read().await.clone()
    }

    pub async fn token(&self) -> Option<String> {
        self.credential
            .read()
            .await
            .as_ref()
            .map(|credential| credential.token.clone())
    }

    pub async fn email(&self) -> Option<String> {
        self.credential
            .read()
            .await
            .as_ref()
            .and_then(|credential| credential.email.clone())
    }

    pub async fn is_authenticated(&self) -> bool {
        self.credential.read().await.is_some()
    }

    /// Advisory only; the server decides what a token may do.
    pub async fn is_admin(&self) -> bool {
        self.admin_grant().await.is_some()
    }

    /// Why the signed-in identity counts as an administrator, if it does. The allowlist is
    /// consulted only for credentials issued without a role claim, and is logged each time
    /// it grants admin.
    pub async fn admin_grant(&self) -> Option<AdminGrant> {
        let guard = self.credential.read().await;
        let credential = guard.as_ref()?;
        match credential.role {
            Some(Role::Admin) => Some(AdminGrant::RoleClaim),
            Some(_) => None,
            None => {
                let email = credential.email.as_deref()?.trim().to_ascii_lowercase();
                if !self.admin_emails.contains(&email) {
                    return None;
                }
                warn!(%email, "auth: admin granted by legacy email allowlist, no role claim");
                Some(AdminGrant::LegacyAllowlist)
            }
        }
    }

    pub async fn require_token(&self, missing: &'static str) -> ClientResult<String> {
        self.token()
            .await
            .ok_or(ClientError::MissingCredential(missing))
    }

    pub async fn request_code(&self, email: &str) -> ClientResult<()> {
        let email = normalize_email(email)?;
        self.api.request_auth_code(&email).await?;
        info!(%email, "auth: login code requested");
        Ok(())
    }

    pub async fn verify_code(&self, email: &str, code: &str) -> ClientResult<Credential> {
        let email = normalize_email(email)?;
        let code = code.trim();
        if code.is_empty() {
            return Err(ClientError::validation("Enter the code from your email."));
        }
        let response = self.api.verify_auth_code(&email, code).await?;
        self.sign_in(email, response).await
    }

    pub async fn login(&self, email: &str, password: &str) -> ClientResult<Credential> {
        let email = normalize_email(email)?;
        let response = self.api.login(&email, password).await?;
        self.sign_in(email, response).await
    }

    pub async fn logout(&self) -> ClientResult<()> {
        *self.credential.write().await = None;
        self.storage.clear()?;
        info!("auth: signed out");
        Ok(())
    }

    async fn sign_in(&self, email: String, response: TokenResponse) -> ClientResult<Credential> {
        let token = response
            .token
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| ClientError::Decode("Invalid login response.".into()))?;
        let credential = Credential {
            token,
            email: Some(email),
            role: response.role,
        };
        self.storage.save(&credential)?;
        *self.credential.write().await = Some(credential.clone());
        info!(email = ?credential.email, role = ?credential.role, "auth: signed in");
        Ok(credential)
    }
}

fn normalize_email(email: &str) -> ClientResult<String> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(ClientError::validation("Enter a valid email address."));
    }
    Ok(email.to_string())
}

#[cfg(test)]
#[path = "tests/auth_tests.rs"]
mod tests;
