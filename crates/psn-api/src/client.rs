//! Authenticated trophy API calls
//!
//! [`PsnClient`] wraps one access token and issues the fixed catalogue of
//! calls the sync system makes. The catalogue is the closed [`Endpoint`]
//! enum — there is no string-keyed dispatch anywhere; adding an operation
//! means adding a variant.
//!
//! Every call sleeps for the configured pacing delay first to stay under
//! the provider's burst limits, then maps the response status onto the
//! error taxonomy (429 → `RateLimited`, 404 → `NotFound`, other non-2xx →
//! `Upstream`).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{PROFILE_API_BASE, TROPHY_API_BASE};
use crate::error::{Error, Result};

/// The fixed catalogue of external calls, each with its typed arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endpoint {
    /// Resolve a player profile by online id.
    Profile { online_id: String },
    /// One page of the player's trophy title collection.
    TitleList {
        account_id: String,
        offset: u32,
        limit: u32,
    },
    /// Earned-trophy detail for one title.
    TitleTrophies {
        account_id: String,
        np_comm_id: String,
    },
}

impl Endpoint {
    /// Stable name for audit records, logs and metrics labels.
    pub fn name(&self) -> &'static str {
        match self {
            Endpoint::Profile { .. } => "profile",
            Endpoint::TitleList { .. } => "title_list",
            Endpoint::TitleTrophies { .. } => "title_trophies",
        }
    }

    fn url(&self, profile_base: &str, trophy_base: &str) -> String {
        match self {
            Endpoint::Profile { online_id } => {
                format!("{profile_base}/public/profiles/{online_id}")
            }
            Endpoint::TitleList {
                account_id,
                offset,
                limit,
            } => format!(
                "{trophy_base}/users/{account_id}/trophyTitles?offset={offset}&limit={limit}"
            ),
            Endpoint::TitleTrophies {
                account_id,
                np_comm_id,
            } => format!(
                "{trophy_base}/users/{account_id}/npCommunicationIds/{np_comm_id}/trophyGroups/all/trophies"
            ),
        }
    }
}

/// A player profile.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub account_id: String,
    pub online_id: String,
    #[serde(default)]
    pub about_me: Option<String>,
}

/// One page of a player's trophy title collection.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleListResponse {
    pub trophy_titles: Vec<TrophyTitle>,
    pub total_item_count: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrophyTitle {
    pub np_communication_id: String,
    pub trophy_title_name: String,
    #[serde(default)]
    pub progress: Option<u32>,
}

/// Earned-trophy detail for one title.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleTrophiesResponse {
    pub trophies: Vec<Trophy>,
    pub total_item_count: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trophy {
    pub trophy_id: u32,
    pub trophy_type: String,
    #[serde(default)]
    pub trophy_name: Option<String>,
    #[serde(default)]
    pub earned: Option<bool>,
}

/// One authenticated, paced client over a single access token.
///
/// A credential instance builds exactly one of these per token refresh;
/// the underlying `reqwest::Client` is shared and cheap to clone.
#[derive(Debug, Clone)]
pub struct PsnClient {
    http: reqwest::Client,
    access_token: String,
    pace: Duration,
    profile_base: String,
    trophy_base: String,
}

impl PsnClient {
    pub fn new(http: reqwest::Client, access_token: String, pace: Duration) -> Self {
        Self {
            http,
            access_token,
            pace,
            profile_base: PROFILE_API_BASE.to_string(),
            trophy_base: TROPHY_API_BASE.to_string(),
        }
    }

    /// Point both API bases at a different host. Test servers only.
    pub fn with_base_url(mut self, base: &str) -> Self {
        self.profile_base = base.to_string();
        self.trophy_base = base.to_string();
        self
    }

    /// Execute one catalogue call, returning the raw JSON body.
    ///
    /// Sleeps for the pacing delay first. The caller measures latency and
    /// writes the audit record; this method only performs the call.
    pub async fn execute(&self, endpoint: &Endpoint) -> Result<serde_json::Value> {
        if !self.pace.is_zero() {
            tokio::time::sleep(self.pace).await;
        }

        let url = endpoint.url(&self.profile_base, &self.trophy_base);
        debug!(endpoint = endpoint.name(), "psn api call");

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("{}: {e}", endpoint.name()))
                } else {
                    Error::Http(format!("{}: {e}", endpoint.name()))
                }
            })?;

        let status = response.status().as_u16();
        if status == 429 {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::RateLimited(body));
        }
        if status == 404 {
            return Err(Error::NotFound(format!("{} returned 404", endpoint.name())));
        }
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Upstream { status, body });
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| Error::Malformed(format!("{}: {e}", endpoint.name())))
    }

    /// Fetch and parse a player profile.
    pub async fn fetch_profile(&self, online_id: &str) -> Result<ProfileResponse> {
        let body = self
            .execute(&Endpoint::Profile {
                online_id: online_id.to_string(),
            })
            .await?;
        serde_json::from_value(body).map_err(|e| Error::Malformed(format!("profile: {e}")))
    }

    /// Fetch and parse one page of the trophy title collection.
    pub async fn fetch_title_list(
        &self,
        account_id: &str,
        offset: u32,
        limit: u32,
    ) -> Result<TitleListResponse> {
        let body = self
            .execute(&Endpoint::TitleList {
                account_id: account_id.to_string(),
                offset,
                limit,
            })
            .await?;
        serde_json::from_value(body).map_err(|e| Error::Malformed(format!("title list: {e}")))
    }

    /// Fetch and parse earned-trophy detail for one title.
    pub async fn fetch_title_trophies(
        &self,
        account_id: &str,
        np_comm_id: &str,
    ) -> Result<TitleTrophiesResponse> {
        let body = self
            .execute(&Endpoint::TitleTrophies {
                account_id: account_id.to_string(),
                np_comm_id: np_comm_id.to_string(),
            })
            .await?;
        serde_json::from_value(body).map_err(|e| Error::Malformed(format!("title trophies: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use tokio::net::TcpListener;

    /// Start a mock API server serving canned JSON under the real paths.
    async fn start_mock_api() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let app = axum::Router::new()
                .route(
                    "/public/profiles/{online_id}",
                    axum::routing::get(|headers: axum::http::HeaderMap| async move {
                        // The bearer token must be present
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("");
                        if !auth.starts_with("Bearer ") {
                            return (StatusCode::UNAUTHORIZED, String::new());
                        }
                        (
                            StatusCode::OK,
                            r#"{"accountId":"123456789","onlineId":"test-player","aboutMe":"hi"}"#
                                .to_string(),
                        )
                    }),
                )
                .route(
                    "/users/{account_id}/trophyTitles",
                    axum::routing::get(|| async {
                        r#"{"trophyTitles":[{"npCommunicationId":"NPWR00001_00","trophyTitleName":"Some Game","progress":42}],"totalItemCount":1}"#
                    }),
                )
                .route(
                    "/users/{account_id}/npCommunicationIds/{np_comm_id}/trophyGroups/all/trophies",
                    axum::routing::get(|| async {
                        r#"{"trophies":[{"trophyId":1,"trophyType":"platinum","trophyName":"All Done","earned":true}],"totalItemCount":1}"#
                    }),
                )
                .route(
                    "/rate-limited/public/profiles/{online_id}",
                    axum::routing::get(|| async {
                        (StatusCode::TOO_MANY_REQUESTS, "slow down")
                    }),
                );
            axum::serve(listener, app).await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        format!("http://{addr}")
    }

    fn test_client(base: &str) -> PsnClient {
        PsnClient::new(reqwest::Client::new(), "at_test".into(), Duration::ZERO)
            .with_base_url(base)
    }

    #[tokio::test]
    async fn fetch_profile_parses_response() {
        let base = start_mock_api().await;
        let client = test_client(&base);

        let profile = client.fetch_profile("test-player").await.unwrap();
        assert_eq!(profile.account_id, "123456789");
        assert_eq!(profile.online_id, "test-player");
        assert_eq!(profile.about_me.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn fetch_title_list_parses_response() {
        let base = start_mock_api().await;
        let client = test_client(&base);

        let list = client.fetch_title_list("123456789", 0, 100).await.unwrap();
        assert_eq!(list.total_item_count, 1);
        assert_eq!(list.trophy_titles[0].np_communication_id, "NPWR00001_00");
        assert_eq!(list.trophy_titles[0].progress, Some(42));
    }

    #[tokio::test]
    async fn fetch_title_trophies_parses_response() {
        let base = start_mock_api().await;
        let client = test_client(&base);

        let detail = client
            .fetch_title_trophies("123456789", "NPWR00001_00")
            .await
            .unwrap();
        assert_eq!(detail.trophies[0].trophy_type, "platinum");
        assert_eq!(detail.trophies[0].earned, Some(true));
    }

    #[tokio::test]
    async fn missing_profile_maps_to_not_found() {
        let base = start_mock_api().await;
        let client = test_client(&base);

        // No route registered for title list under a bogus account path shape;
        // the mock returns 404 for unknown paths.
        let err = client.fetch_profile("nobody/extra").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn status_429_maps_to_rate_limited() {
        let base = start_mock_api().await;
        let client = PsnClient::new(reqwest::Client::new(), "at_test".into(), Duration::ZERO)
            .with_base_url(&format!("{base}/rate-limited"));

        let err = client.fetch_profile("anyone").await.unwrap_err();
        assert!(matches!(err, Error::RateLimited(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn dead_upstream_maps_to_http_error() {
        let client = test_client("http://127.0.0.1:1");
        let err = client.fetch_profile("anyone").await.unwrap_err();
        assert!(matches!(err, Error::Http(_)), "got: {err:?}");
    }

    #[test]
    fn endpoint_names_are_stable() {
        assert_eq!(
            Endpoint::Profile {
                online_id: "x".into()
            }
            .name(),
            "profile"
        );
        assert_eq!(
            Endpoint::TitleList {
                account_id: "x".into(),
                offset: 0,
                limit: 10
            }
            .name(),
            "title_list"
        );
        assert_eq!(
            Endpoint::TitleTrophies {
                account_id: "x".into(),
                np_comm_id: "y".into()
            }
            .name(),
            "title_trophies"
        );
    }

    #[test]
    fn endpoint_urls_embed_arguments() {
        let url = Endpoint::TitleList {
            account_id: "123".into(),
            offset: 50,
            limit: 25,
        }
        .url("http://p", "http://t");
        assert_eq!(url, "http://t/users/123/trophyTitles?offset=50&limit=25");
    }
}
