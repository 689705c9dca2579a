//! Federated identity providers.
//!
//! Providers are external collaborators that turn an authorization code into
//! a profile. Each one implements the same small trait and is selected by
//! name from a registry; there is no provider-specific callback wiring.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Profile supplied by an identity provider after a code exchange.
#[derive(Debug, Clone)]
pub struct FederatedProfile {
    /// Provider-scoped stable subject identifier
    pub subject: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

/// Errors from the provider exchange.
#[derive(Debug)]
pub enum ProviderError {
    /// The provider rejected the code or returned no usable token.
    ExchangeRejected,
    /// The provider's response was missing required fields.
    MalformedProfile,
    /// Transport-level failure talking to the provider.
    Http(reqwest::Error),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::ExchangeRejected => write!(f, "Provider rejected the authorization code"),
            ProviderError::MalformedProfile => write!(f, "Provider returned an incomplete profile"),
            ProviderError::Http(e) => write!(f, "Provider request failed: {}", e),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Http(e)
    }
}

/// A federated identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Registry key and callback path segment.
    fn name(&self) -> &'static str;

    /// URL to send the user agent to for authorization.
    fn authorize_url(&self, state: &str) -> String;

    /// Exchange an authorization code for the user's profile.
    async fn exchange_code(&self, code: &str) -> Result<FederatedProfile, ProviderError>;
}

/// Providers available to this deployment, keyed by name.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<&'static str, Arc<dyn IdentityProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn IdentityProvider>) {
        self.providers.insert(provider.name(), provider);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn IdentityProvider>> {
        self.providers.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// GitHub OAuth2.
pub struct GitHubProvider {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    http: reqwest::Client,
}

impl GitHubProvider {
    pub fn new(client_id: String, client_secret: String, redirect_uri: String) -> Self {
        Self {
            client_id,
            client_secret,
            redirect_uri,
            http: reqwest::Client::new(),
        }
    }
}

#[derive(Deserialize)]
struct GitHubTokenResponse {
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct GitHubUser {
    id: i64,
    email: Option<String>,
    name: Option<String>,
}

#[async_trait]
impl IdentityProvider for GitHubProvider {
    fn name(&self) -> &'static str {
        "github"
    }

    fn authorize_url(&self, state: &str) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("scope", "read:user user:email")
            .append_pair("state", state)
            .finish();
        format!("https://github.com/login/oauth/authorize?{}", query)
    }

    async fn exchange_code(&self, code: &str) -> Result<FederatedProfile, ProviderError> {
        let token: GitHubTokenResponse = self
            .http
            .post("https://github.com/login/oauth/access_token")
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
            ])
            .send()
            .await?
            .json()
            .await?;

        let access_token = token.access_token.ok_or(ProviderError::ExchangeRejected)?;

        let user: GitHubUser = self
            .http
            .get("https://api.github.com/user")
            .header("Accept", "application/json")
            .header("User-Agent", "latchkey")
            .bearer_auth(&access_token)
            .send()
            .await?
            .json()
            .await
            .map_err(|_| ProviderError::MalformedProfile)?;

        Ok(FederatedProfile {
            subject: user.id.to_string(),
            email: user.email,
            display_name: user.name,
        })
    }
}

/// Google OpenID Connect.
pub struct GoogleProvider {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    http: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(client_id: String, client_secret: String, redirect_uri: String) -> Self {
        Self {
            client_id,
            client_secret,
            redirect_uri,
            http: reqwest::Client::new(),
        }
    }
}

#[derive(Deserialize)]
struct GoogleTokenResponse {
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct GoogleUserInfo {
    sub: String,
    email: Option<String>,
    name: Option<String>,
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn name(&self) -> &'static str {
        "google"
    }

    fn authorize_url(&self, state: &str) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", "openid email profile")
            .append_pair("state", state)
            .finish();
        format!("https://accounts.google.com/o/oauth2/v2/auth?{}", query)
    }

    async fn exchange_code(&self, code: &str) -> Result<FederatedProfile, ProviderError> {
        let token: GoogleTokenResponse = self
            .http
            .post("https://oauth2.googleapis.com/token")
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?
            .json()
            .await?;

        let access_token = token.access_token.ok_or(ProviderError::ExchangeRejected)?;

        let user: GoogleUserInfo = self
            .http
            .get("https://openidconnect.googleapis.com/v1/userinfo")
            .bearer_auth(&access_token)
            .send()
            .await?
            .json()
            .await
            .map_err(|_| ProviderError::MalformedProfile)?;

        Ok(FederatedProfile {
            subject: user.sub,
            email: user.email,
            display_name: user.name,
        })
    }
}
