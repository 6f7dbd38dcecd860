use serde::{Deserialize, Serialize};

use crate::vote::Direction;

#[derive(Hash, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginParams {
    pub username: String,
    pub password: String,
}

#[derive(Hash, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignUpParams {
    pub username: String,
    pub password: String,
    pub re_password: String,
}

#[derive(Hash, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreatePostParams {
    pub title: String,
    pub content: String,
    pub community_id: i64,
}

#[derive(Hash, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteParams {
    pub post_id: String,
    pub direction: Direction,
}

#[derive(Hash, Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PostOrder {
    #[default]
    Time,
    Score,
}

impl PostOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            PostOrder::Time => "time",
            PostOrder::Score => "score",
        }
    }
}

/// Cursor for `GET /posts2`. Pages start at 1.
#[derive(Hash, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostListParams {
    pub page: u32,
    pub size: u32,
    pub order: PostOrder,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub community_id: Option<i64>,
}

impl Default for PostListParams {
    fn default() -> Self {
        PostListParams {
            page: 1,
            size: 10,
            order: PostOrder::Time,
            community_id: None,
        }
    }
}

impl PostListParams {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("page", self.page.to_string()),
            ("size", self.size.to_string()),
            ("order", self.order.as_str().to_owned()),
        ];

        if let Some(community_id) = self.community_id {
            pairs.push(("community_id", community_id.to_string()));
        }

        pairs
    }
}
