//! Errors surfaced by the API gateway and the vote engine.

use thiserror::Error;

use crate::query_result::{ApiResponse, ResCode};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// No session is stored. Raised before any request is made.
    #[error("login required")]
    Unauthenticated,

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("credential invalid: {0}")]
    CredentialInvalid(String),

    #[error("credential expired: {0}")]
    CredentialExpired(String),

    /// The request never produced a response.
    #[error("network error: {0}")]
    Network(String),

    #[error("request failed ({code}): {msg}")]
    Unknown { code: i64, msg: String },
}

impl ApiError {
    /// Maps a non-success envelope onto the error taxonomy.
    pub fn from_response<T>(response: &ApiResponse<T>) -> ApiError {
        let msg = response.msg_text();

        match ResCode::from_code(response.code) {
            Some(ResCode::InvalidParam)
            | Some(ResCode::UserExist)
            | Some(ResCode::InvalidPassword) => ApiError::Validation(msg),
            Some(ResCode::UserNotExist) | Some(ResCode::PostNotExist) => ApiError::NotFound(msg),
            Some(ResCode::NeedLogin) => ApiError::CredentialInvalid(msg),
            Some(ResCode::InvalidToken) => ApiError::CredentialExpired(msg),
            _ => ApiError::Unknown {
                code: response.code,
                msg,
            },
        }
    }

    /// True for the kinds that force the stored session to be discarded.
    pub fn is_credential_revoked(&self) -> bool {
        matches!(
            self,
            ApiError::CredentialInvalid(_) | ApiError::CredentialExpired(_)
        )
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Unknown {
                code: 0,
                msg: err.to_string(),
            }
        } else {
            ApiError::Network(err.to_string())
        }
    }
}
