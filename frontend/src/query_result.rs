use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::vote::Direction;

/// Status codes carried in the `code` field of every response body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResCode {
    Success,
    InvalidParam,
    UserExist,
    UserNotExist,
    InvalidPassword,
    VoteRepeated,
    ServerBusy,
    PostNotExist,
    NeedLogin,
    InvalidToken,
}

impl ResCode {
    pub fn from_code(code: i64) -> Option<ResCode> {
        let res_code = match code {
            1000 => ResCode::Success,
            1001 => ResCode::InvalidParam,
            1002 => ResCode::UserExist,
            1003 => ResCode::UserNotExist,
            1004 => ResCode::InvalidPassword,
            1005 => ResCode::VoteRepeated,
            1006 => ResCode::ServerBusy,
            1007 => ResCode::PostNotExist,
            1008 => ResCode::NeedLogin,
            1009 => ResCode::InvalidToken,
            _ => return None,
        };

        Some(res_code)
    }

    pub fn code(self) -> i64 {
        match self {
            ResCode::Success => 1000,
            ResCode::InvalidParam => 1001,
            ResCode::UserExist => 1002,
            ResCode::UserNotExist => 1003,
            ResCode::InvalidPassword => 1004,
            ResCode::VoteRepeated => 1005,
            ResCode::ServerBusy => 1006,
            ResCode::PostNotExist => 1007,
            ResCode::NeedLogin => 1008,
            ResCode::InvalidToken => 1009,
        }
    }
}

/// Envelope shared by every endpoint: `{"code", "msg", "data"}`.
///
/// `msg` is usually a string but validation failures carry an object keyed
/// by field name, so it stays untyped here.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ApiResponse<T> {
    pub code: i64,
    #[serde(default)]
    pub msg: Value,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn is_success(&self) -> bool {
        self.code == ResCode::Success.code()
    }

    pub fn msg_text(&self) -> String {
        match &self.msg {
            Value::String(msg) => msg.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

#[derive(Hash, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub user_id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Hash, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Community {
    pub id: i64,
    pub name: String,
}

#[derive(Hash, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommunityDetail {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub introduction: String,
    #[serde(default)]
    pub create_time: String,
}

#[derive(Hash, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Post {
    pub id: String,
    pub author_id: String,
    pub community_id: i64,
    #[serde(default)]
    pub status: i32,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub create_time: String,
}

/// A post as returned by both the list and the detail endpoints.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostDetail {
    #[serde(flatten)]
    pub post: Post,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub vote_num: i64,
    // absent for anonymous viewers
    #[serde(default)]
    pub vote_status: Direction,
    #[serde(default)]
    pub community: Option<Community>,
}
