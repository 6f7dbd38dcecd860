use serde::{Deserialize, Serialize};

use crate::persisted::{PostListParams, PostOrder};

pub const API_PATH: &str = "/api/v1";
pub const TOKEN_LOCAL_STORAGE_KEY: &str = "token";
pub const USER_LOCAL_STORAGE_KEY: &str = "user";
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Client settings. The page may hand a partial JSON object to `bootstrap`;
/// anything it leaves out falls back to the defaults below.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// Absolute base url of the API. Empty means `{origin}/api/v1`.
    pub api_base_url: String,
    pub token_key: String,
    pub user_key: String,
    pub page_size: u32,
    pub order: PostOrder,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            api_base_url: String::new(),
            token_key: TOKEN_LOCAL_STORAGE_KEY.to_owned(),
            user_key: USER_LOCAL_STORAGE_KEY.to_owned(),
            page_size: DEFAULT_PAGE_SIZE,
            order: PostOrder::Time,
        }
    }
}

impl ClientConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Fills in `api_base_url` from the page origin when it was not given.
    pub fn with_origin(mut self, origin: &str) -> Self {
        if self.api_base_url.is_empty() {
            self.api_base_url = origin.trim_end_matches('/').to_owned() + API_PATH;
        }
        self
    }

    pub fn first_page(&self, community_id: Option<i64>) -> PostListParams {
        PostListParams {
            page: 1,
            size: self.page_size,
            order: self.order,
            community_id,
        }
    }
}
