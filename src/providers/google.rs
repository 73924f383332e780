use std::collections::HashMap;
use std::fs;
use std::path::Path;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use rand::{TryRngCore, rngs::OsRng};
use reqwest::Client;
use reqwest::header::USER_AGENT;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;

use crate::{AccessType, AccessToken, Error, ProviderClient, TokenResponse};

/// Out-of-band redirect: Google shows the authorization code on a page for
/// the user to copy, which is exactly what the interactive callback expects.
const OOB_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";

const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const RANDOM_BYTES: usize = 32;

/// One application entry from a Google client-secrets file.
#[derive(Debug, Clone, Deserialize)]
struct GoogleCredentials {
    client_id: String,
    client_secret: Option<String>,
    #[serde(default = "default_auth_uri")]
    auth_uri: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
    #[serde(default)]
    redirect_uris: Vec<String>,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<GoogleCredentials>,
    web: Option<GoogleCredentials>,
}

/// Per-attempt material minted when the authorization URL is built; the code
/// exchange must present the same PKCE verifier.
#[derive(Debug)]
struct AuthSession {
    code_verifier: String,
    state: String,
}

/// [`ProviderClient`] for Google's installed-application flow.
///
/// Credentials come from the client-secrets JSON downloaded when the OAuth
/// client was created. The authorization URL carries an S256 PKCE challenge
/// and a random anti-forgery state; code and refresh exchanges are form posts
/// against the configured token endpoint.
#[derive(Debug)]
pub struct GoogleProvider {
    http: Client,
    application_name: String,
    scopes: Vec<String>,
    access_type: AccessType,
    credentials: Option<GoogleCredentials>,
    session: Option<AuthSession>,
    token: Option<AccessToken>,
}

impl Default for GoogleProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl GoogleProvider {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
            application_name: String::new(),
            scopes: Vec::new(),
            access_type: AccessType::default(),
            credentials: None,
            session: None,
            token: None,
        }
    }

    pub fn with_http_client(http: Client) -> Self {
        Self {
            http,
            ..Self::new()
        }
    }

    fn credentials(&self) -> Result<&GoogleCredentials, Error> {
        self.credentials.as_ref().ok_or(Error::Configuration {
            field: "auth_config_path",
        })
    }

    fn redirect_uri(credentials: &GoogleCredentials) -> &str {
        credentials
            .redirect_uris
            .first()
            .map(String::as_str)
            .unwrap_or(OOB_REDIRECT_URI)
    }

    async fn send_token_request(
        &self,
        token_uri: &str,
        payload: HashMap<String, String>,
    ) -> Result<TokenResponse, Error> {
        let mut builder = self.http.post(token_uri).form(&payload);
        if !self.application_name.is_empty() {
            builder = builder.header(USER_AGENT, &self.application_name);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|err| Error::InvalidResponse {
            message: err.to_string(),
            body,
        })
    }
}

impl ProviderClient for GoogleProvider {
    fn set_application_name(&mut self, application_name: &str) {
        self.application_name = application_name.to_string();
    }

    fn set_scopes(&mut self, scopes: &[String]) {
        self.scopes = scopes.to_vec();
    }

    fn set_access_type(&mut self, access_type: AccessType) {
        self.access_type = access_type;
    }

    fn load_credentials(&mut self, path: &Path) -> Result<(), Error> {
        let raw = fs::read_to_string(path)?;
        let secrets: ClientSecretsFile =
            serde_json::from_str(&raw).map_err(|err| Error::CredentialFileInvalid {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        let credentials =
            secrets
                .installed
                .or(secrets.web)
                .ok_or_else(|| Error::CredentialFileInvalid {
                    path: path.to_path_buf(),
                    message: "expected an `installed` or `web` application entry".to_string(),
                })?;
        debug!(client_id = %credentials.client_id, "loaded google client credentials");
        self.credentials = Some(credentials);
        Ok(())
    }

    fn authorization_url(&mut self) -> Result<String, Error> {
        let credentials = self.credentials()?;
        let code_verifier = random_urlsafe()?;
        let code_challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes()));
        let state = random_urlsafe()?;

        let mut url = Url::parse(&credentials.auth_uri)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("response_type", "code");
            pairs.append_pair("client_id", &credentials.client_id);
            pairs.append_pair("redirect_uri", Self::redirect_uri(credentials));
            pairs.append_pair("scope", &self.scopes.join(" "));
            pairs.append_pair("access_type", self.access_type.as_str());
            pairs.append_pair("code_challenge", &code_challenge);
            pairs.append_pair("code_challenge_method", "S256");
            pairs.append_pair("state", &state);
            if self.access_type == AccessType::Offline {
                // Without re-consent Google only returns a refresh token on
                // the very first authorization of the client.
                pairs.append_pair("prompt", "consent");
            }
        }

        self.session = Some(AuthSession {
            code_verifier,
            state,
        });
        Ok(url.to_string())
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenResponse, Error> {
        let credentials = self.credentials()?;

        let mut payload = HashMap::new();
        payload.insert("grant_type".to_string(), "authorization_code".to_string());
        payload.insert("code".to_string(), code.to_string());
        payload.insert("client_id".to_string(), credentials.client_id.clone());
        payload.insert(
            "redirect_uri".to_string(),
            Self::redirect_uri(credentials).to_string(),
        );
        if let Some(secret) = &credentials.client_secret {
            payload.insert("client_secret".to_string(), secret.clone());
        }
        if let Some(session) = &self.session {
            payload.insert("code_verifier".to_string(), session.code_verifier.clone());
            payload.insert("state".to_string(), session.state.clone());
        }

        self.send_token_request(&credentials.token_uri, payload).await
    }

    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, Error> {
        let credentials = self.credentials()?;

        let mut payload = HashMap::new();
        payload.insert("grant_type".to_string(), "refresh_token".to_string());
        payload.insert("refresh_token".to_string(), refresh_token.to_string());
        payload.insert("client_id".to_string(), credentials.client_id.clone());
        if let Some(secret) = &credentials.client_secret {
            payload.insert("client_secret".to_string(), secret.clone());
        }

        self.send_token_request(&credentials.token_uri, payload).await
    }

    fn install_token(&mut self, token: AccessToken) -> Result<(), Error> {
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

fn random_urlsafe() -> Result<String, Error> {
    let mut bytes = [0u8; RANDOM_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| Error::OsRng {
            message: err.to_string(),
        })?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}
