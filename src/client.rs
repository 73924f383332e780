use std::fs;
use std::io;
use std::path::Path;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::{AccessToken, ClientConfiguration, Error, ProviderClient};

/// Interactive-authorization callback: given the consent URL, returns the
/// authorization code the user obtained by visiting it. How the URL reaches
/// the user (stdout, clipboard, a UI) is entirely the callback's business.
pub type AuthorizationCallback = Box<dyn Fn(&str) -> Result<String, Error> + Send + Sync>;

/// Persistent wrapper around a [`ProviderClient`].
///
/// Owns the full token lifecycle: interactive authorization-code exchange on
/// first use, JSON persistence at the configured token path, expiry detection
/// and silent refresh on later uses. A fully prepared provider client is
/// cached in a single slot and handed back untouched until a forced refresh
/// invalidates it.
///
/// The provider factory is invoked once per acquisition attempt so every
/// attempt starts from a clean provider client, including the bounded
/// self-heal retry after a corrupt token file or a rejected install.
pub struct PersistentClient<P: ProviderClient> {
    config: ClientConfiguration,
    factory: Box<dyn Fn() -> P + Send + Sync>,
    authorize: Option<AuthorizationCallback>,
    handle: Option<P>,
}

impl<P: ProviderClient> PersistentClient<P> {
    pub fn new<F>(config: ClientConfiguration, factory: F) -> Self
    where
        F: Fn() -> P + Send + Sync + 'static,
    {
        Self {
            config,
            factory: Box::new(factory),
            authorize: None,
            handle: None,
        }
    }

    pub fn config(&self) -> &ClientConfiguration {
        &self.config
    }

    /// Registers the interactive-authorization callback. Until one is
    /// registered, [`authenticated_client`](Self::authenticated_client) fails
    /// validation with [`Error::CallbackMissing`].
    pub fn set_authorization_callback<F>(&mut self, callback: F)
    where
        F: Fn(&str) -> Result<String, Error> + Send + Sync + 'static,
    {
        self.authorize = Some(Box::new(callback));
    }

    /// Returns a provider client with a valid token installed, acquiring or
    /// refreshing one as needed.
    ///
    /// Without `force_refresh` a previously prepared handle is returned as-is
    /// and neither disk nor network is touched. With `force_refresh` the
    /// cached handle is discarded and any persisted token file is deleted
    /// before re-acquisition.
    ///
    /// A corrupt token file or a provider-rejected token is answered with
    /// exactly one retry under forced refresh; a second failure is fatal.
    /// All other errors abort immediately and no handle is cached.
    pub async fn authenticated_client(&mut self, force_refresh: bool) -> Result<&P, Error> {
        let client = match self.handle.take() {
            Some(client) if !force_refresh => client,
            _ => self.acquire_with_retry(force_refresh).await?,
        };
        Ok(&*self.handle.insert(client))
    }

    async fn acquire_with_retry(&self, force_refresh: bool) -> Result<P, Error> {
        let mut force = force_refresh;
        let mut healed = false;
        loop {
            match self.acquire(force).await {
                Ok(client) => return Ok(client),
                Err(err) if err.is_self_healing() && !healed => {
                    warn!(error = %err, "token state invalid, retrying once under forced refresh");
                    healed = true;
                    force = true;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn acquire(&self, force_refresh: bool) -> Result<P, Error> {
        self.validate()?;

        let config = &self.config;
        let mut client = (self.factory)();
        client.set_application_name(config.application_name());
        client.set_scopes(config.scopes());
        client.load_credentials(config.auth_config_path())?;
        client.set_access_type(config.access_type());

        let token_path = config.token_path();
        if force_refresh && token_path.exists() {
            debug!(path = %token_path.display(), "forced refresh, deleting persisted token");
            fs::remove_file(token_path)?;
        }

        let token = if token_path.exists() {
            let token = self.load_token()?;
            debug!(path = %token_path.display(), "loaded persisted token");
            token
        } else {
            let url = client.authorization_url()?;
            let callback = self.authorize.as_ref().ok_or(Error::CallbackMissing)?;
            info!("no persisted token, requesting interactive authorization");
            let code = callback(&url)?;
            let response = client.exchange_code(code.trim()).await?;
            let token = AccessToken::from_response(response, Utc::now());
            self.persist(&token)?;
            info!("authorization code exchanged, token persisted");
            token
        };

        client.install_token(token)?;

        if client.token_expired() {
            let refresh_token = client.refresh_token().ok_or(Error::RefreshTokenMissing)?;
            info!("access token expired, exchanging refresh token");
            let response = client.exchange_refresh_token(&refresh_token).await?;
            let mut renewed = AccessToken::from_response(response, Utc::now());
            // Providers may omit the refresh token on renewal; keep the one
            // we already hold so later refreshes still work.
            if renewed.refresh_token.is_none() {
                renewed.refresh_token = Some(refresh_token);
            }
            self.persist(&renewed)?;
            client.install_token(renewed)?;
        }

        Ok(client)
    }

    fn validate(&self) -> Result<(), Error> {
        let config = &self.config;
        if config.application_name().is_empty() {
            return Err(Error::Configuration {
                field: "application_name",
            });
        }
        if config.scopes().is_empty() {
            return Err(Error::Configuration { field: "scopes" });
        }
        let auth_config_path = config.auth_config_path();
        if auth_config_path.as_os_str().is_empty() {
            return Err(Error::Configuration {
                field: "auth_config_path",
            });
        }
        if !auth_config_path.exists() {
            return Err(Error::CredentialFileMissing {
                path: auth_config_path.to_path_buf(),
            });
        }
        if self.authorize.is_none() {
            return Err(Error::CallbackMissing);
        }
        if config.token_path().as_os_str().is_empty() {
            return Err(Error::Configuration { field: "token_path" });
        }
        Ok(())
    }

    fn load_token(&self) -> Result<AccessToken, Error> {
        let path = self.config.token_path();
        let raw = fs::read_to_string(path)?;
        let token: AccessToken =
            serde_json::from_str(&raw).map_err(|err| Error::TokenFileCorrupt {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        if token.access_token.is_empty() {
            return Err(Error::TokenFileCorrupt {
                path: path.to_path_buf(),
                message: "empty access_token".to_string(),
            });
        }
        Ok(token)
    }

    /// Writes `token` to the configured token path, fully replacing any prior
    /// contents. Missing parent directories are created first.
    fn persist(&self, token: &AccessToken) -> Result<(), Error> {
        let path = self.config.token_path();
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|err| not_writable_or_io(err, parent))?;
            }
        }

        let serialized = serde_json::to_string_pretty(token)?;
        fs::write(path, serialized).map_err(|err| match path.parent() {
            Some(parent) => not_writable_or_io(err, parent),
            None => Error::Io(err),
        })?;
        debug!(path = %path.display(), "token file written");
        Ok(())
    }
}

fn not_writable_or_io(err: io::Error, dir: &Path) -> Error {
    if err.kind() == io::ErrorKind::PermissionDenied {
        Error::NotWritable {
            path: dir.to_path_buf(),
        }
    } else {
        Error::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    use super::PersistentClient;
    use crate::{
        AccessToken, AccessType, ClientConfiguration, Error, ProviderClient, TokenResponse,
    };

    #[derive(Debug, Default)]
    struct FakeState {
        authorization_urls_built: usize,
        code_exchanges: Vec<String>,
        refresh_exchanges: Vec<String>,
        reject_installs: bool,
    }

    #[derive(Debug)]
    struct FakeProvider {
        state: Arc<Mutex<FakeState>>,
        token: Option<AccessToken>,
    }

    impl ProviderClient for FakeProvider {
        fn set_application_name(&mut self, _application_name: &str) {}

        fn set_scopes(&mut self, _scopes: &[String]) {}

        fn set_access_type(&mut self, _access_type: AccessType) {}

        fn load_credentials(&mut self, _path: &Path) -> Result<(), Error> {
            Ok(())
        }

        fn authorization_url(&mut self) -> Result<String, Error> {
            let mut state = self.state.lock().unwrap();
            state.authorization_urls_built += 1;
            Ok("https://provider.test/authorize?client_id=fake".to_string())
        }

        async fn exchange_code(&self, code: &str) -> Result<TokenResponse, Error> {
            let mut state = self.state.lock().unwrap();
            state.code_exchanges.push(code.to_string());
            Ok(TokenResponse {
                access_token: format!("tok-{}", state.code_exchanges.len()),
                refresh_token: Some("refresh-1".to_string()),
                token_type: Some("Bearer".to_string()),
                scope: None,
                expires_in: Some(3600),
                extra: Default::default(),
            })
        }

        async fn exchange_refresh_token(
            &self,
            refresh_token: &str,
        ) -> Result<TokenResponse, Error> {
            let mut state = self.state.lock().unwrap();
            state.refresh_exchanges.push(refresh_token.to_string());
            Ok(TokenResponse {
                access_token: "tok-renewed".to_string(),
                refresh_token: None,
                token_type: Some("Bearer".to_string()),
                scope: None,
                expires_in: Some(3600),
                extra: Default::default(),
            })
        }

        fn install_token(&mut self, token: AccessToken) -> Result<(), Error> {
            if self.state.lock().unwrap().reject_installs {
                return Err(Error::TokenInstallRejected {
                    message: "scripted rejection".to_string(),
                });
            }
            if token.access_token.is_empty() {
                return Err(Error::TokenInstallRejected {
                    message: "empty access_token".to_string(),
                });
            }
            self.token = Some(token);
            Ok(())
        }

        fn token(&self) -> Option<&AccessToken> {
            self.token.as_ref()
        }

        fn token_expired(&self) -> bool {
            self.token
                .as_ref()
                .is_none_or(|token| token.is_expired(Utc::now()))
        }

        fn refresh_token(&self) -> Option<String> {
            self.token
                .as_ref()
                .and_then(|token| token.refresh_token.clone())
        }
    }

    struct Fixture {
        _dir: TempDir,
        token_path: PathBuf,
        state: Arc<Mutex<FakeState>>,
        callback_invocations: Arc<AtomicUsize>,
        client: PersistentClient<FakeProvider>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let auth_config_path = dir.path().join("oauth.json");
        fs::write(&auth_config_path, r#"{"installed":{"client_id":"fake"}}"#).unwrap();
        let token_path = dir.path().join("token.json");

        let config = ClientConfiguration::new()
            .with_scope("https://www.googleapis.com/auth/gmail.readonly")
            .with_auth_config_path(&auth_config_path)
            .with_token_path(&token_path);

        fixture_with_config(dir, token_path, config)
    }

    fn fixture_with_config(
        dir: TempDir,
        token_path: PathBuf,
        config: ClientConfiguration,
    ) -> Fixture {
        let state = Arc::new(Mutex::new(FakeState::default()));
        let factory_state = Arc::clone(&state);
        let mut client = PersistentClient::new(config, move || FakeProvider {
            state: Arc::clone(&factory_state),
            token: None,
        });

        let callback_invocations = Arc::new(AtomicUsize::new(0));
        let callback_counter = Arc::clone(&callback_invocations);
        client.set_authorization_callback(move |url| {
            assert!(url.starts_with("https://provider.test/authorize"));
            callback_counter.fetch_add(1, Ordering::SeqCst);
            Ok("auth-code".to_string())
        });

        Fixture {
            _dir: dir,
            token_path,
            state,
            callback_invocations,
            client,
        }
    }

    fn persisted_token(path: &Path) -> AccessToken {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    fn write_token(path: &Path, token: &AccessToken) {
        fs::write(path, serde_json::to_string(token).unwrap()).unwrap();
    }

    fn live_token() -> AccessToken {
        AccessToken {
            access_token: "persisted-token".to_string(),
            refresh_token: Some("refresh-0".to_string()),
            token_type: Some("Bearer".to_string()),
            scope: None,
            expires_at: Some(Utc::now() + Duration::hours(1)),
            extra: Default::default(),
        }
    }

    fn expired_token() -> AccessToken {
        AccessToken {
            expires_at: Some(Utc::now() - Duration::hours(1)),
            ..live_token()
        }
    }

    #[tokio::test]
    async fn first_acquisition_runs_interactive_flow_once() {
        let mut fx = fixture();

        let client = fx.client.authenticated_client(false).await.unwrap();
        assert_eq!(client.token().unwrap().access_token, "tok-1");

        assert_eq!(fx.callback_invocations.load(Ordering::SeqCst), 1);
        let state = fx.state.lock().unwrap();
        assert_eq!(state.code_exchanges, vec!["auth-code"]);
        assert!(state.refresh_exchanges.is_empty());
        drop(state);

        let persisted = persisted_token(&fx.token_path);
        assert_eq!(persisted.access_token, "tok-1");
        assert_eq!(persisted.refresh_token.as_deref(), Some("refresh-1"));
        assert!(persisted.expires_at.is_some());
    }

    #[tokio::test]
    async fn valid_token_file_needs_no_interaction() {
        let mut fx = fixture();
        write_token(&fx.token_path, &live_token());

        let client = fx.client.authenticated_client(false).await.unwrap();
        assert_eq!(client.token().unwrap().access_token, "persisted-token");

        assert_eq!(fx.callback_invocations.load(Ordering::SeqCst), 0);
        let state = fx.state.lock().unwrap();
        assert!(state.code_exchanges.is_empty());
        assert!(state.refresh_exchanges.is_empty());
    }

    #[tokio::test]
    async fn second_call_reuses_cached_handle_without_touching_disk() {
        let mut fx = fixture();

        fx.client.authenticated_client(false).await.unwrap();
        // Sentinel: if the second call read or rewrote the file, it would
        // either fail or replace this content.
        fs::write(&fx.token_path, "sentinel, not json").unwrap();

        let client = fx.client.authenticated_client(false).await.unwrap();
        assert_eq!(client.token().unwrap().access_token, "tok-1");

        assert_eq!(fx.callback_invocations.load(Ordering::SeqCst), 1);
        assert_eq!(fx.state.lock().unwrap().code_exchanges.len(), 1);
        assert_eq!(
            fs::read_to_string(&fx.token_path).unwrap(),
            "sentinel, not json"
        );
    }

    #[tokio::test]
    async fn forced_refresh_discards_valid_file_and_cache() {
        let mut fx = fixture();
        write_token(&fx.token_path, &live_token());

        fx.client.authenticated_client(false).await.unwrap();
        assert_eq!(fx.callback_invocations.load(Ordering::SeqCst), 0);

        let client = fx.client.authenticated_client(true).await.unwrap();
        assert_eq!(client.token().unwrap().access_token, "tok-1");

        assert_eq!(fx.callback_invocations.load(Ordering::SeqCst), 1);
        assert_eq!(persisted_token(&fx.token_path).access_token, "tok-1");
    }

    #[tokio::test]
    async fn corrupt_token_file_self_heals_once() {
        let mut fx = fixture();
        fs::write(&fx.token_path, "{ truncated").unwrap();

        let client = fx.client.authenticated_client(false).await.unwrap();
        assert_eq!(client.token().unwrap().access_token, "tok-1");

        assert_eq!(fx.callback_invocations.load(Ordering::SeqCst), 1);
        assert_eq!(persisted_token(&fx.token_path).access_token, "tok-1");
    }

    #[tokio::test]
    async fn empty_access_token_in_file_counts_as_corrupt() {
        let mut fx = fixture();
        fs::write(&fx.token_path, r#"{"access_token": ""}"#).unwrap();

        let client = fx.client.authenticated_client(false).await.unwrap();
        assert_eq!(client.token().unwrap().access_token, "tok-1");
        assert_eq!(fx.callback_invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn persistent_install_rejection_is_fatal_after_one_retry() {
        let mut fx = fixture();
        fx.state.lock().unwrap().reject_installs = true;

        let err = fx.client.authenticated_client(false).await.unwrap_err();
        assert!(matches!(err, Error::TokenInstallRejected { .. }));

        // One original attempt plus exactly one forced-refresh retry.
        assert_eq!(fx.callback_invocations.load(Ordering::SeqCst), 2);
        assert_eq!(fx.state.lock().unwrap().code_exchanges.len(), 2);
    }

    #[tokio::test]
    async fn missing_credential_file_fails_before_any_exchange() {
        let dir = TempDir::new().unwrap();
        let token_path = dir.path().join("token.json");
        let config = ClientConfiguration::new()
            .with_scope("scope")
            .with_auth_config_path(dir.path().join("missing-oauth.json"))
            .with_token_path(&token_path);
        let mut fx = fixture_with_config(dir, token_path, config);

        let err = fx.client.authenticated_client(false).await.unwrap_err();
        assert!(matches!(err, Error::CredentialFileMissing { .. }));

        assert_eq!(fx.callback_invocations.load(Ordering::SeqCst), 0);
        let state = fx.state.lock().unwrap();
        assert_eq!(state.authorization_urls_built, 0);
        assert!(state.code_exchanges.is_empty());
    }

    #[tokio::test]
    async fn empty_scopes_fail_validation() {
        let dir = TempDir::new().unwrap();
        let auth_config_path = dir.path().join("oauth.json");
        fs::write(&auth_config_path, "{}").unwrap();
        let token_path = dir.path().join("token.json");
        let config = ClientConfiguration::new()
            .with_auth_config_path(&auth_config_path)
            .with_token_path(&token_path);
        let mut fx = fixture_with_config(dir, token_path, config);

        let err = fx.client.authenticated_client(false).await.unwrap_err();
        assert!(matches!(err, Error::Configuration { field: "scopes" }));
    }

    #[tokio::test]
    async fn unregistered_callback_fails_validation() {
        let dir = TempDir::new().unwrap();
        let auth_config_path = dir.path().join("oauth.json");
        fs::write(&auth_config_path, "{}").unwrap();

        let config = ClientConfiguration::new()
            .with_scope("scope")
            .with_auth_config_path(&auth_config_path)
            .with_token_path(dir.path().join("token.json"));
        let state = Arc::new(Mutex::new(FakeState::default()));
        let factory_state = Arc::clone(&state);
        let mut client = PersistentClient::new(config, move || FakeProvider {
            state: Arc::clone(&factory_state),
            token: None,
        });

        let err = client.authenticated_client(false).await.unwrap_err();
        assert!(matches!(err, Error::CallbackMissing));
    }

    #[tokio::test]
    async fn expired_token_refreshes_once_and_rewrites_file() {
        let mut fx = fixture();
        write_token(&fx.token_path, &expired_token());

        let client = fx.client.authenticated_client(false).await.unwrap();
        assert_eq!(client.token().unwrap().access_token, "tok-renewed");

        assert_eq!(fx.callback_invocations.load(Ordering::SeqCst), 0);
        let state = fx.state.lock().unwrap();
        assert!(state.code_exchanges.is_empty());
        assert_eq!(state.refresh_exchanges, vec!["refresh-0"]);
        drop(state);

        let persisted = persisted_token(&fx.token_path);
        assert_eq!(persisted.access_token, "tok-renewed");
        // The provider omitted a new refresh token; the stored one survives.
        assert_eq!(persisted.refresh_token.as_deref(), Some("refresh-0"));
    }

    #[tokio::test]
    async fn expired_token_without_refresh_token_is_fatal() {
        let mut fx = fixture();
        let mut token = expired_token();
        token.refresh_token = None;
        write_token(&fx.token_path, &token);

        let err = fx.client.authenticated_client(false).await.unwrap_err();
        assert!(matches!(err, Error::RefreshTokenMissing));
        assert!(fx.state.lock().unwrap().refresh_exchanges.is_empty());
    }

    #[tokio::test]
    async fn persist_creates_missing_parent_directories() {
        let dir = TempDir::new().unwrap();
        let auth_config_path = dir.path().join("oauth.json");
        fs::write(&auth_config_path, "{}").unwrap();
        let token_path = dir.path().join("deeply").join("nested").join("token.json");
        let config = ClientConfiguration::new()
            .with_scope("scope")
            .with_auth_config_path(&auth_config_path)
            .with_token_path(&token_path);
        let mut fx = fixture_with_config(dir, token_path.clone(), config);

        fx.client.authenticated_client(false).await.unwrap();
        assert!(token_path.is_file());
        assert_eq!(persisted_token(&token_path).access_token, "tok-1");
    }

    #[test]
    fn permission_denied_maps_to_not_writable() {
        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        let err = super::not_writable_or_io(denied, Path::new("/locked"));
        assert!(matches!(err, Error::NotWritable { .. }));

        let other = std::io::Error::from(std::io::ErrorKind::StorageFull);
        let err = super::not_writable_or_io(other, Path::new("/locked"));
        assert!(matches!(err, Error::Io(_)));
    }
}
