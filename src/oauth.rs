use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;

use crate::auth::FederatedAssertion;

const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/userinfo";

#[derive(Debug, Error)]
pub enum OauthError {
    #[error("identity provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("identity provider did not return a verified email")]
    MissingEmail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct UserInfo {
    sub: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
}

/// Where to send the browser to start the authorization code flow.
pub fn authorize_url(config: &GoogleConfig) -> String {
    let url = Url::parse_with_params(
        AUTHORIZE_URL,
        &[
            ("client_id", config.client_id.as_str()),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", "openid email profile"),
        ],
    )
    .expect("static authorize url");
    url.into()
}

/// Redeems the callback `code` for an identity assertion: exchanges it
/// for an access token, then reads the provider's userinfo document.
/// Only an email the provider has verified becomes an assertion.
pub async fn exchange_code(
    config: &GoogleConfig,
    http: &reqwest::Client,
    code: &str,
) -> Result<FederatedAssertion, OauthError> {
    let token: TokenResponse = http
        .post(TOKEN_URL)
        .form(&[
            ("code", code),
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let info: UserInfo = http
        .get(USERINFO_URL)
        .bearer_auth(&token.access_token)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let email = info
        .email
        .filter(|_| info.email_verified)
        .ok_or(OauthError::MissingEmail)?;
    Ok(FederatedAssertion {
        email,
        subject: info.sub,
    })
}
