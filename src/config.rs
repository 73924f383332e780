use std::path::{Path, PathBuf};

/// Whether the provider should issue a refresh token.
///
/// Under [`AccessType::Online`] no refresh token is returned and user
/// interaction is required once the access token expires. Under
/// [`AccessType::Offline`] the first consent yields a refresh token so later
/// acquisitions can run without any interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessType {
    Online,
    #[default]
    Offline,
}

impl AccessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessType::Online => "online",
            AccessType::Offline => "offline",
        }
    }
}

const DEFAULT_APPLICATION_NAME: &str = "persistent-oauth-client";

/// Immutable-after-setup description of one OAuth application.
///
/// Nothing is validated here; [`PersistentClient`](crate::PersistentClient)
/// checks every field at acquisition time so a half-built configuration is
/// harmless until it is actually used.
#[derive(Debug, Clone)]
pub struct ClientConfiguration {
    application_name: String,
    access_type: AccessType,
    scopes: Vec<String>,
    auth_config_path: PathBuf,
    token_path: PathBuf,
}

impl Default for ClientConfiguration {
    fn default() -> Self {
        Self {
            application_name: DEFAULT_APPLICATION_NAME.to_string(),
            access_type: AccessType::default(),
            scopes: Vec::new(),
            auth_config_path: PathBuf::new(),
            token_path: PathBuf::new(),
        }
    }
}

impl ClientConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Application name forwarded to the provider client.
    pub fn with_application_name(mut self, application_name: impl Into<String>) -> Self {
        self.application_name = application_name.into();
        self
    }

    pub fn with_access_type(mut self, access_type: AccessType) -> Self {
        self.access_type = access_type;
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.push(scope.into());
        self
    }

    /// Path to the provider-issued OAuth client credentials (for Google this
    /// is the client-secrets JSON downloaded when creating the credentials).
    pub fn with_auth_config_path(mut self, auth_config_path: impl Into<PathBuf>) -> Self {
        self.auth_config_path = auth_config_path.into();
        self
    }

    /// Path where the user token is persisted after a successful connection.
    pub fn with_token_path(mut self, token_path: impl Into<PathBuf>) -> Self {
        self.token_path = token_path.into();
        self
    }

    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    pub fn access_type(&self) -> AccessType {
        self.access_type
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    pub fn auth_config_path(&self) -> &Path {
        &self.auth_config_path
    }

    pub fn token_path(&self) -> &Path {
        &self.token_path
    }
}
