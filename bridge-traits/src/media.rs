//! Remote Media Server Contract
//!
//! The core interprets only identifiers, user-data flags and progress
//! descriptors from the server. Everything else in the wire schema is carried
//! opaquely or ignored.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::Result;

/// Credentials and identity of the signed-in session.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerSession {
    pub server_url: String,
    pub access_token: String,
    pub user_id: String,
    pub device_id: String,
}

impl fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSession")
            .field("server_url", &self.server_url)
            .field("access_token", &"***")
            .field("user_id", &self.user_id)
            .field("device_id", &self.device_id)
            .finish()
    }
}

/// Per-user flags the server tracks for an item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserData {
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub played: bool,
    #[serde(default)]
    pub playback_position_ticks: i64,
}

/// Lightweight item record returned by list endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemSummary {
    pub id: String,
    pub name: String,
    #[serde(rename = "Type", default)]
    pub item_type: Option<String>,
    #[serde(default)]
    pub run_time_ticks: Option<i64>,
    #[serde(default)]
    pub image_tags: HashMap<String, String>,
    #[serde(default)]
    pub user_data: Option<UserData>,
}

impl ItemSummary {
    pub fn primary_image_tag(&self) -> Option<&str> {
        self.image_tags.get("Primary").map(String::as_str)
    }
}

/// Full item record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemDetail {
    pub id: String,
    pub name: String,
    #[serde(rename = "Type", default)]
    pub item_type: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub production_year: Option<i32>,
    #[serde(default)]
    pub run_time_ticks: Option<i64>,
    #[serde(default)]
    pub image_tags: HashMap<String, String>,
    #[serde(default)]
    pub user_data: Option<UserData>,
}

impl ItemDetail {
    pub fn primary_image_tag(&self) -> Option<&str> {
        self.image_tags.get("Primary").map(String::as_str)
    }
}

impl From<&ItemSummary> for ItemDetail {
    /// Degraded detail built from a list entry when the full fetch fails.
    fn from(summary: &ItemSummary) -> Self {
        Self {
            id: summary.id.clone(),
            name: summary.name.clone(),
            item_type: summary.item_type.clone(),
            overview: None,
            production_year: None,
            run_time_ticks: summary.run_time_ticks,
            image_tags: summary.image_tags.clone(),
            user_data: summary.user_data.clone(),
        }
    }
}

/// Calls the core issues against the media server.
///
/// Every method performs a single request against `endpoint` (a base URL);
/// the request executor decides how often and when it is invoked.
#[async_trait]
pub trait MediaServerApi: Send + Sync {
    /// Install or clear the credentials used for subsequent calls.
    fn set_session(&self, _session: Option<ServerSession>) {}

    async fn get_item(&self, endpoint: &str, item_id: &str) -> Result<ItemDetail>;

    async fn get_primary_image(&self, endpoint: &str, item_id: &str, max_width: u32)
        -> Result<Bytes>;

    async fn set_favorite(&self, endpoint: &str, item_id: &str, favorite: bool)
        -> Result<UserData>;

    async fn set_played(&self, endpoint: &str, item_id: &str, played: bool) -> Result<UserData>;

    /// Items the user has started but not finished, most recent first.
    async fn continue_watching(&self, endpoint: &str, limit: u32) -> Result<Vec<ItemSummary>>;
}
