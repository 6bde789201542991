//! HTTP client for the identity service.

use crate::traits::UserDirectory;
use async_trait::async_trait;
use feedline_config::UserServiceConfig;
use feedline_core::{CachedUser, FeedError, FeedResult, UserId};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const SERVICE: &str = "user-service";

/// Identity service client speaking HTTP/JSON.
#[derive(Clone)]
pub struct HttpUserDirectory {
    client: Client,
    base_url: String,
}

impl HttpUserDirectory {
    /// Creates a client from configuration.
    pub fn new(config: &UserServiceConfig) -> FeedResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .pool_max_idle_per_host(32)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| FeedError::Internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self::with_client(client, &config.base_url))
    }

    /// Creates a client around an existing `reqwest` client.
    #[must_use]
    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> FeedResult<T> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(transport_error)?;

        handle_response(response).await
    }
}

/// Identity snapshot as returned by the identity service.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserCacheDto {
    user_id: i64,
    username: String,
    active: bool,
    #[serde(default)]
    profile_picture: Option<ProfilePictureDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfilePictureDto {
    #[serde(default)]
    file_id: Option<String>,
    #[serde(default)]
    small_file_id: Option<String>,
}

impl From<UserCacheDto> for CachedUser {
    fn from(dto: UserCacheDto) -> Self {
        Self {
            user_id: UserId::new(dto.user_id),
            username: dto.username,
            active: dto.active,
            profile_picture: dto
                .profile_picture
                .and_then(|picture| picture.small_file_id.or(picture.file_id)),
        }
    }
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    async fn followee_ids(&self, user_id: UserId) -> FeedResult<Vec<UserId>> {
        debug!(user_id = %user_id, "HTTP GetFolloweesIds");
        let ids: Vec<i64> = self
            .get_json(&format!("/subscriptions/ids/{user_id}"))
            .await?;
        Ok(ids.into_iter().map(UserId::new).collect())
    }

    async fn follower_ids(&self, user_id: UserId) -> FeedResult<Vec<UserId>> {
        debug!(user_id = %user_id, "HTTP GetFollowersIds");
        let ids: Vec<i64> = self.get_json(&format!("/subscriptions/{user_id}")).await?;
        Ok(ids.into_iter().map(UserId::new).collect())
    }

    async fn is_active(&self, user_id: UserId) -> FeedResult<bool> {
        debug!(user_id = %user_id, "HTTP IsUserActive");
        self.get_json(&format!("/users/active/{user_id}")).await
    }

    async fn exists(&self, user_id: UserId) -> FeedResult<bool> {
        debug!(user_id = %user_id, "HTTP IsUserExists");
        self.get_json(&format!("/users/exists/{user_id}")).await
    }

    async fn identity_snapshots(&self, user_ids: &[UserId]) -> FeedResult<Vec<CachedUser>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        debug!(count = user_ids.len(), "HTTP GetUsersCachesByIds");

        let response = self
            .client
            .post(self.url("/users/caches/ids"))
            .json(user_ids)
            .send()
            .await
            .map_err(transport_error)?;

        let users: Vec<UserCacheDto> = handle_response(response).await?;
        Ok(users.into_iter().map(CachedUser::from).collect())
    }

    async fn refresh_identity_cache(&self) -> FeedResult<()> {
        debug!("HTTP HeatUsersCache");

        let response = self
            .client
            .post(self.url("/users/caches"))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_error(status, &body));
        }
        Ok(())
    }
}

fn transport_error(e: reqwest::Error) -> FeedError {
    FeedError::external(SERVICE, format!("HTTP error: {e}"))
}

async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> FeedResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(map_http_error(status, &body));
    }

    response
        .json()
        .await
        .map_err(|e| FeedError::external(SERVICE, format!("JSON parse error: {e}")))
}

fn map_http_error(status: StatusCode, body: &str) -> FeedError {
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            FeedError::Timeout(format!("{SERVICE} responded {status}"))
        }
        _ => FeedError::external(SERVICE, format!("HTTP error {status}: {body}")),
    }
}
