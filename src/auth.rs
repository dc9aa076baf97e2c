//! Authentication: OAuth2 hub construction, the local user directory, sessions

use async_trait::async_trait;
use google_gmail1::yup_oauth2::authorized_user::AuthorizedUserSecret;
use google_gmail1::{hyper_rustls, hyper_util, yup_oauth2, Gmail};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::client::{GmailClient, ProductionGmailClient};
use crate::error::{BatchError, Result};

/// Gmail API scopes the batch runner needs
///
/// - gmail.modify: read messages and change their labels
/// - gmail.labels: list and create labels
pub const REQUIRED_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/gmail.labels",
];

/// Environment variable naming an alternate users file
pub const USERS_PATH_ENV: &str = "LOCAL_USERS_PATH";

/// Users file location when nothing else is configured
pub const DEFAULT_USERS_FILE: &str = "secrets/users.json";

/// Type alias for Gmail Hub to simplify type signatures
pub type GmailHub = Gmail<HttpsConnector>;

type HttpsConnector = hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>;

/// TLS connector for the HTTP/1 client every hub is built on
fn https_connector() -> Result<HttpsConnector> {
    Ok(hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()
        .map_err(|e| BatchError::AuthError(format!("Failed to load TLS roots: {}", e)))?
        .https_or_http()
        .enable_http1()
        .build())
}

/// Initialize a Gmail hub through the installed-app (desktop) OAuth2 flow
///
/// Opens a browser for consent on first use; tokens are persisted to
/// `token_cache_path` and refreshed automatically afterwards.
pub async fn initialize_gmail_hub(
    credentials_path: &Path,
    token_cache_path: &Path,
) -> Result<GmailHub> {
    let secret = yup_oauth2::read_application_secret(credentials_path)
        .await
        .map_err(|e| BatchError::AuthError(format!("Failed to read credentials: {}", e)))?;

    let auth = yup_oauth2::InstalledFlowAuthenticator::builder(
        secret,
        yup_oauth2::InstalledFlowReturnMethod::HTTPRedirect,
    )
    .persist_tokens_to_disk(token_cache_path)
    .build()
    .await
    .map_err(|e| BatchError::AuthError(format!("Failed to build authenticator: {}", e)))?;

    // Token is cached with every scope up front so concurrent calls agree on it
    auth.token(REQUIRED_SCOPES)
        .await
        .map_err(|e| BatchError::AuthError(format!("Failed to obtain token: {}", e)))?;

    let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
        .build(https_connector()?);

    Ok(Gmail::new(client, auth))
}

/// Initialize a Gmail hub from a stored authorized-user refresh token
pub async fn hub_from_authorized_user(secret: AuthorizedUserSecret) -> Result<GmailHub> {
    let auth = yup_oauth2::AuthorizedUserAuthenticator::builder(secret)
        .build()
        .await
        .map_err(|e| BatchError::AuthError(format!("Failed to build authenticator: {}", e)))?;

    let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
        .build(https_connector()?);

    Ok(Gmail::new(client, auth))
}

/// An authenticated principal and its message store
///
/// Read-only once built; shared by every operation of a run.
#[derive(Clone)]
pub struct Session {
    /// Email address (or other display identity) of the user
    pub principal: String,
    /// Table store the user's processing functions write to
    pub spreadsheet_id: Option<String>,
    pub client: Arc<dyn GmailClient>,
}

impl Session {
    pub fn new(principal: impl Into<String>, client: Arc<dyn GmailClient>) -> Self {
        Self {
            principal: principal.into(),
            spreadsheet_id: None,
            client,
        }
    }

    pub fn with_spreadsheet_id(mut self, spreadsheet_id: Option<String>) -> Self {
        self.spreadsheet_id = spreadsheet_id;
        self
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("principal", &self.principal)
            .field("spreadsheet_id", &self.spreadsheet_id)
            .finish_non_exhaustive()
    }
}

/// Turns a credential into a ready [`Session`]
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Session for the user registered under `api_key`
    async fn session_for_api_key(&self, api_key: &str) -> Result<Session>;

    /// Session for the user registered under a verified email address
    async fn session_for_email(&self, email: &str) -> Result<Session>;
}

/// One entry of the users file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(rename = "api-key")]
    pub api_key: String,
    pub email: String,
    #[serde(rename = "spreadsheetId", default, skip_serializing_if = "Option::is_none")]
    pub spreadsheet_id: Option<String>,
    #[serde(rename = "google-token")]
    pub google_token: AuthorizedUserSecret,
}

/// Users loaded from a local JSON file
#[derive(Debug, Clone)]
pub struct LocalUserDirectory {
    users: Vec<UserRecord>,
}

impl LocalUserDirectory {
    pub fn new(users: Vec<UserRecord>) -> Self {
        Self { users }
    }

    /// Where the users file lives: `configured`, else `$LOCAL_USERS_PATH`,
    /// else `secrets/users.json` under the working directory
    pub fn resolve_path(configured: Option<&Path>) -> PathBuf {
        if let Some(path) = configured {
            return path.to_path_buf();
        }
        match env::var(USERS_PATH_ENV) {
            Ok(path) if !path.is_empty() => PathBuf::from(path),
            _ => PathBuf::from(DEFAULT_USERS_FILE),
        }
    }

    /// Load the users file, a JSON array of user records
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BatchError::ConfigError(format!(
                "No users file found at {}. Place the file there or set {} to its path.",
                path.display(),
                USERS_PATH_ENV
            )));
        }

        let contents = std::fs::read_to_string(path)?;
        let users: Vec<UserRecord> = serde_json::from_str(&contents).map_err(|e| {
            BatchError::ConfigError(format!(
                "Failed to parse users file {}: {}",
                path.display(),
                e
            ))
        })?;

        debug!("Loaded {} users from {}", users.len(), path.display());
        Ok(Self { users })
    }

    pub fn find_by_api_key(&self, api_key: &str) -> Result<&UserRecord> {
        if api_key.is_empty() {
            return Err(BatchError::InvalidApiKey);
        }
        self.users
            .iter()
            .find(|user| user.api_key == api_key)
            .ok_or(BatchError::InvalidApiKey)
    }

    pub fn find_by_email(&self, email: &str) -> Result<&UserRecord> {
        if email.is_empty() {
            return Err(BatchError::AuthError("No email provided".to_string()));
        }
        self.users
            .iter()
            .find(|user| user.email.eq_ignore_ascii_case(email))
            .ok_or_else(|| BatchError::UserNotRegistered(email.to_string()))
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Builds production sessions for users of a [`LocalUserDirectory`]
pub struct LocalSessionProvider {
    directory: LocalUserDirectory,
    max_concurrent_requests: usize,
    request_timeout: Duration,
}

impl LocalSessionProvider {
    pub fn new(
        directory: LocalUserDirectory,
        max_concurrent_requests: usize,
        request_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            max_concurrent_requests,
            request_timeout,
        }
    }

    async fn session_for(&self, user: &UserRecord) -> Result<Session> {
        let hub = hub_from_authorized_user(user.google_token.clone()).await?;
        let client = ProductionGmailClient::new(
            hub,
            self.max_concurrent_requests,
            self.request_timeout,
        );
        info!("Authenticated as {}", user.email);

        Ok(Session::new(user.email.clone(), Arc::new(client))
            .with_spreadsheet_id(user.spreadsheet_id.clone()))
    }
}

#[async_trait]
impl SessionProvider for LocalSessionProvider {
    async fn session_for_api_key(&self, api_key: &str) -> Result<Session> {
        let user = self.directory.find_by_api_key(api_key)?;
        self.session_for(user).await
    }

    async fn session_for_email(&self, email: &str) -> Result<Session> {
        let user = self.directory.find_by_email(email)?;
        self.session_for(user).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const USERS_JSON: &str = r#"[
        {
            "api-key": "key-alice",
            "email": "alice@example.com",
            "spreadsheetId": "sheet-1",
            "google-token": {
                "type": "authorized_user",
                "client_id": "client.apps.googleusercontent.com",
                "client_secret": "secret",
                "refresh_token": "refresh-alice"
            }
        },
        {
            "api-key": "key-bob",
            "email": "bob@example.com",
            "google-token": {
                "type": "authorized_user",
                "client_id": "client.apps.googleusercontent.com",
                "client_secret": "secret",
                "refresh_token": "refresh-bob"
            }
        }
    ]"#;

    fn users_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(USERS_JSON.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_and_find_by_api_key() {
        let file = users_file();
        let directory = LocalUserDirectory::load(file.path()).unwrap();

        assert_eq!(directory.len(), 2);
        let alice = directory.find_by_api_key("key-alice").unwrap();
        assert_eq!(alice.email, "alice@example.com");
        assert_eq!(alice.spreadsheet_id.as_deref(), Some("sheet-1"));
        assert_eq!(alice.google_token.refresh_token, "refresh-alice");

        assert!(directory.find_by_api_key("key-bob").unwrap().spreadsheet_id.is_none());
    }

    #[test]
    fn test_unknown_api_key() {
        let directory = LocalUserDirectory::load(users_file().path()).unwrap();

        assert!(matches!(
            directory.find_by_api_key("nope"),
            Err(BatchError::InvalidApiKey)
        ));
        assert!(matches!(
            directory.find_by_api_key(""),
            Err(BatchError::InvalidApiKey)
        ));
    }

    #[test]
    fn test_find_by_email() {
        let directory = LocalUserDirectory::load(users_file().path()).unwrap();

        assert_eq!(
            directory.find_by_email("Bob@Example.com").unwrap().api_key,
            "key-bob"
        );
        assert!(matches!(
            directory.find_by_email("carol@example.com"),
            Err(BatchError::UserNotRegistered(ref email)) if email == "carol@example.com"
        ));
        assert!(directory.find_by_email("").is_err());
    }

    #[tokio::test]
    async fn test_session_provider_rejects_unknown_identities() {
        let directory = LocalUserDirectory::load(users_file().path()).unwrap();
        let provider = LocalSessionProvider::new(directory, 4, Duration::from_secs(5));

        let by_email = provider.session_for_email("carol@example.com").await;
        assert!(matches!(
            by_email,
            Err(BatchError::UserNotRegistered(ref email)) if email == "carol@example.com"
        ));

        let by_key = provider.session_for_api_key("key-carol").await;
        assert!(matches!(by_key, Err(BatchError::InvalidApiKey)));
    }

    #[test]
    fn test_missing_or_invalid_users_file() {
        let missing = LocalUserDirectory::load(Path::new("/nonexistent/users.json")).unwrap_err();
        assert!(missing.to_string().contains(USERS_PATH_ENV));

        let mut bad = NamedTempFile::new().unwrap();
        bad.write_all(b"{ not json").unwrap();
        assert!(matches!(
            LocalUserDirectory::load(bad.path()),
            Err(BatchError::ConfigError(_))
        ));
    }

    #[test]
    #[serial]
    fn test_resolve_path_precedence() {
        env::remove_var(USERS_PATH_ENV);
        assert_eq!(
            LocalUserDirectory::resolve_path(None),
            PathBuf::from(DEFAULT_USERS_FILE)
        );

        env::set_var(USERS_PATH_ENV, "/etc/batch/users.json");
        assert_eq!(
            LocalUserDirectory::resolve_path(None),
            PathBuf::from("/etc/batch/users.json")
        );
        assert_eq!(
            LocalUserDirectory::resolve_path(Some(Path::new("mine.json"))),
            PathBuf::from("mine.json")
        );

        env::remove_var(USERS_PATH_ENV);
    }

    #[test]
    fn test_scopes_constants() {
        assert_eq!(REQUIRED_SCOPES.len(), 2);
        assert!(REQUIRED_SCOPES.contains(&"https://www.googleapis.com/auth/gmail.modify"));
        assert!(REQUIRED_SCOPES.contains(&"https://www.googleapis.com/auth/gmail.labels"));
    }
}
