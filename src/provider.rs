use std::path::Path;

use crate::{AccessType, AccessToken, Error, TokenResponse};

/// The underlying OAuth provider client.
///
/// [`PersistentClient`](crate::PersistentClient) drives one of these through
/// the full acquisition protocol: configure it, build the authorization URL,
/// exchange an authorization code or refresh token, install the resulting
/// token. Only the two exchange operations touch the network; everything else
/// is local state. Implementations are constructed fresh for every
/// acquisition attempt via the factory passed to `PersistentClient::new`, so
/// they need no reset path.
#[allow(async_fn_in_trait)]
pub trait ProviderClient {
    fn set_application_name(&mut self, application_name: &str);

    fn set_scopes(&mut self, scopes: &[String]);

    fn set_access_type(&mut self, access_type: AccessType);

    /// Loads the provider-issued client credentials from disk. The caller has
    /// already checked that the file exists; a parse failure surfaces as
    /// [`Error::CredentialFileInvalid`].
    fn load_credentials(&mut self, path: &Path) -> Result<(), Error>;

    /// Builds the URL the user must visit to grant consent. Takes `&mut self`
    /// because providers may mint per-attempt state here (PKCE verifier,
    /// anti-forgery state) that the later code exchange depends on.
    fn authorization_url(&mut self) -> Result<String, Error>;

    async fn exchange_code(&self, code: &str) -> Result<TokenResponse, Error>;

    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, Error>;

    /// Installs a resolved token on the client. Structurally invalid tokens
    /// are rejected with [`Error::TokenInstallRejected`].
    fn install_token(&mut self, token: AccessToken) -> Result<(), Error>;

    fn token(&self) -> Option<&AccessToken>;

    fn token_expired(&self) -> bool;

    fn refresh_token(&self) -> Option<String>;
}
