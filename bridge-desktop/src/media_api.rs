//! REST client for the media server, built on any [`HttpClient`].

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest, HttpResponse},
    media::{ItemDetail, ItemSummary, MediaServerApi, ServerSession, UserData},
};
use bytes::Bytes;
use serde::Deserialize;
use std::sync::{Arc, RwLock};
use tracing::debug;

const TOKEN_HEADER: &str = "X-Emby-Token";

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ItemsPage {
    #[serde(default)]
    items: Vec<ItemSummary>,
}

/// Media server API over HTTP.
///
/// Holds the active session; calls made without one fail with a 401 status so
/// they classify as authentication failures.
pub struct HttpMediaServerApi {
    http: Arc<dyn HttpClient>,
    session: RwLock<Option<ServerSession>>,
}

impl HttpMediaServerApi {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self {
            http,
            session: RwLock::new(None),
        }
    }

    fn credentials(&self) -> Result<(String, String)> {
        let guard = self.session.read().unwrap_or_else(|e| e.into_inner());
        guard
            .as_ref()
            .map(|s| (s.access_token.clone(), s.user_id.clone()))
            .ok_or_else(|| BridgeError::Status {
                status: 401,
                message: "no active session".to_string(),
            })
    }

    fn url(endpoint: &str, path: &str) -> Result<String> {
        url::Url::parse(endpoint)
            .map_err(|e| BridgeError::InvalidInput(format!("endpoint '{}': {}", endpoint, e)))?;
        Ok(format!("{}{}", endpoint.trim_end_matches('/'), path))
    }

    fn check_id(item_id: &str) -> Result<()> {
        if item_id.is_empty() || item_id.contains('/') {
            return Err(BridgeError::InvalidInput(format!(
                "invalid item id '{}'",
                item_id
            )));
        }
        Ok(())
    }

    async fn send(&self, method: HttpMethod, url: String) -> Result<HttpResponse> {
        let (token, _) = self.credentials()?;
        debug!(method = ?method, url = %url, "media server request");
        self.http
            .execute(HttpRequest::new(method, url).header(TOKEN_HEADER, token))
            .await?
            .error_for_status()
    }

    async fn toggle_user_flag(
        &self,
        endpoint: &str,
        collection: &str,
        item_id: &str,
        value: bool,
    ) -> Result<UserData> {
        Self::check_id(item_id)?;
        let (_, user_id) = self.credentials()?;
        let url = Self::url(
            endpoint,
            &format!("/Users/{}/{}/{}", user_id, collection, item_id),
        )?;
        let method = if value {
            HttpMethod::Post
        } else {
            HttpMethod::Delete
        };
        let response = self.send(method, url).await?;
        if response.body.is_empty() {
            return Ok(UserData::default());
        }
        response.json("user data")
    }
}

#[async_trait]
impl MediaServerApi for HttpMediaServerApi {
    fn set_session(&self, session: Option<ServerSession>) {
        *self.session.write().unwrap_or_else(|e| e.into_inner()) = session;
    }

    async fn get_item(&self, endpoint: &str, item_id: &str) -> Result<ItemDetail> {
        Self::check_id(item_id)?;
        let (_, user_id) = self.credentials()?;
        let url = Self::url(endpoint, &format!("/Users/{}/Items/{}", user_id, item_id))?;
        self.send(HttpMethod::Get, url).await?.json("item")
    }

    async fn get_primary_image(
        &self,
        endpoint: &str,
        item_id: &str,
        max_width: u32,
    ) -> Result<Bytes> {
        Self::check_id(item_id)?;
        let url = Self::url(
            endpoint,
            &format!("/Items/{}/Images/Primary?maxWidth={}", item_id, max_width),
        )?;
        Ok(self.send(HttpMethod::Get, url).await?.body)
    }

    async fn set_favorite(&self, endpoint: &str, item_id: &str, favorite: bool) -> Result<UserData> {
        self.toggle_user_flag(endpoint, "FavoriteItems", item_id, favorite)
            .await
    }

    async fn set_played(&self, endpoint: &str, item_id: &str, played: bool) -> Result<UserData> {
        self.toggle_user_flag(endpoint, "PlayedItems", item_id, played)
            .await
    }

    async fn continue_watching(&self, endpoint: &str, limit: u32) -> Result<Vec<ItemSummary>> {
        let (_, user_id) = self.credentials()?;
        let url = Self::url(
            endpoint,
            &format!("/Users/{}/Items/Resume?Limit={}", user_id, limit),
        )?;
        let page: ItemsPage = self.send(HttpMethod::Get, url).await?.json("resume list")?;
        Ok(page.items)
    }
}
