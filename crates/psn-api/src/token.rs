//! NPSSO token exchange
//!
//! An NPSSO cookie is a long-lived credential lifted from an authenticated
//! PSN browser session. Minting an access token is a two-step dance:
//! 1. GET the authorize endpoint with the NPSSO cookie → one-time code
//! 2. POST the code to the token endpoint → bearer access token
//!
//! The coordinator calls this proactively from its health loop (before the
//! access token expires) and at instance build time.

use serde::{Deserialize, Serialize};

use crate::constants::{AUTHORIZE_ENDPOINT, PSN_CLIENT_ID, REDIRECT_URI, TOKEN_ENDPOINT};
use crate::error::{Error, Result};

/// Response from the token endpoint.
///
/// `expires_in` is a delta in seconds from the response time. The caller
/// converts it to an absolute deadline when storing it on the instance.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Seconds until the access token expires (delta, not absolute)
    pub expires_in: u64,
}

/// Exchange an NPSSO cookie for an access token.
///
/// A 401/403 from either step means the NPSSO has been revoked or expired
/// (they last roughly two months) and is surfaced as `InvalidNpsso` so the
/// pool can mark the credential unhealthy rather than retrying.
pub async fn exchange_npsso(client: &reqwest::Client, npsso: &str) -> Result<TokenResponse> {
    let code = request_authorization_code(AUTHORIZE_ENDPOINT, npsso).await?;
    request_access_token(client, TOKEN_ENDPOINT, &code).await
}

async fn request_authorization_code(authorize_url: &str, npsso: &str) -> Result<String> {
    // The one-time code rides a 302 Location header with a custom scheme.
    // A redirect-following client chokes on that scheme before the response
    // ever surfaces, so this request gets its own non-following client.
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| Error::Http(format!("authorize client build failed: {e}")))?;

    let response = client
        .get(authorize_url)
        .query(&[
            ("access_type", "offline"),
            ("client_id", PSN_CLIENT_ID),
            ("redirect_uri", REDIRECT_URI),
            ("response_type", "code"),
            ("scope", "psn:mobile.v2.core psn:clientapp"),
        ])
        .header("Cookie", format!("npsso={npsso}"))
        .send()
        .await
        .map_err(|e| Error::Http(format!("authorize request failed: {e}")))?;

    let status = response.status().as_u16();
    if status == 401 || status == 403 {
        return Err(Error::InvalidNpsso(format!(
            "authorize endpoint returned {status}"
        )));
    }

    // The endpoint responds 302; the code is in the Location query string
    let location = response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            Error::TokenExchange(format!("authorize endpoint returned {status} with no redirect"))
        })?;

    location
        .split("code=")
        .nth(1)
        .map(|rest| rest.split('&').next().unwrap_or(rest).to_string())
        .ok_or_else(|| {
            Error::InvalidNpsso("authorize redirect carried no code parameter".into())
        })
}

async fn request_access_token(
    client: &reqwest::Client,
    token_url: &str,
    code: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(token_url)
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", REDIRECT_URI),
            ("token_format", "jwt"),
        ])
        .basic_auth(PSN_CLIENT_ID, Some("PocketUniverse"))
        .send()
        .await
        .map_err(|e| Error::Http(format!("token request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::InvalidNpsso(format!(
                "token endpoint rejected code ({status}): {body}"
            )));
        }

        return Err(Error::TokenExchange(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid token response: {e}")))
}
