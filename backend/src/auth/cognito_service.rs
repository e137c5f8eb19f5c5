use reqwest::Client as HttpClient;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::config::IdentityConfig;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("URL parsing failed: {0}")]
    Url(#[from] url::ParseError),
    #[error("Identity provider error: {0}")]
    Provider(String),
    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CognitoTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_in: u64,
}

// Cognito sends some booleans as "true"/"false" strings.
fn deserialize_string_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::String(s) => s
            .parse::<bool>()
            .map_err(|_| serde::de::Error::custom(format!("Invalid boolean string: {}", s))),
        _ => Err(serde::de::Error::custom("Expected boolean or string")),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CognitoUserInfo {
    pub sub: String,
    pub email: String,
    #[serde(deserialize_with = "deserialize_string_bool", default)]
    pub email_verified: bool,
    pub name: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub picture: Option<String>,
}

impl CognitoUserInfo {
    /// `name`, else given + family name, else the local part of the email.
    pub fn display_name(&self) -> String {
        if let Some(name) = self.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        let joined = format!(
            "{} {}",
            self.given_name.as_deref().unwrap_or_default(),
            self.family_name.as_deref().unwrap_or_default()
        );
        let joined = joined.trim();
        if !joined.is_empty() {
            return joined.to_string();
        }
        self.email
            .split('@')
            .next()
            .unwrap_or_default()
            .to_string()
    }
}

#[derive(Clone)]
pub struct CognitoService {
    http_client: HttpClient,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    auth_base_url: String,
}

impl CognitoService {
    pub fn new(config: &IdentityConfig) -> Self {
        Self {
            http_client: HttpClient::new(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            auth_base_url: config.auth_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/oauth2/{}", self.auth_base_url, path)
    }

    pub fn get_authorization_url(&self, state: &str) -> Result<String, IdentityError> {
        let mut url = Url::parse(&self.endpoint("authorize"))?;

        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("scope", "email openid profile")
            .append_pair("state", state)
            .append_pair("identity_provider", "Google");

        Ok(url.to_string())
    }

    async fn post_form(
        &self,
        path: &str,
        params: &[(&str, &str)],
        action: &str,
    ) -> Result<reqwest::Response, IdentityError> {
        let response = self
            .http_client
            .post(self.endpoint(path))
            .form(params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(IdentityError::Provider(format!(
                "{} failed ({}): {}",
                action, status, error_text
            )));
        }
        Ok(response)
    }

    pub async fn exchange_code_for_tokens(
        &self,
        code: &str,
    ) -> Result<CognitoTokenResponse, IdentityError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];

        let response = self.post_form("token", &params, "Token exchange").await?;
        Ok(response.json().await?)
    }

    pub async fn get_user_info(&self, access_token: &str) -> Result<CognitoUserInfo, IdentityError> {
        let response = self
            .http_client
            .get(self.endpoint("userInfo"))
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(IdentityError::Provider(format!(
                "User info request failed: {}",
                error_text
            )));
        }

        Ok(response.json().await?)
    }

    pub async fn refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<CognitoTokenResponse, IdentityError> {
        if refresh_token.is_empty() {
            return Err(IdentityError::InvalidToken("Empty refresh token".to_string()));
        }

        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
        ];

        let response = self.post_form("token", &params, "Token refresh").await?;
        Ok(response.json().await?)
    }

    pub async fn revoke_token(&self, refresh_token: &str) -> Result<(), IdentityError> {
        let params = [
            ("token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        self.post_form("revoke", &params, "Token revocation").await?;
        Ok(())
    }
}
