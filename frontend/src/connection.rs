use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::persisted::{CreatePostParams, LoginParams, PostListParams, SignUpParams, VoteParams};
use crate::query_result::{ApiResponse, Community, CommunityDetail, PostDetail, User};
use crate::session::SessionBroadcast;

/// Request/response contract of the forum API.
#[async_trait(?Send)]
pub trait ApiGateway {
    async fn login(&self, params: &LoginParams) -> Result<User, ApiError>;

    async fn sign_up(&self, params: &SignUpParams) -> Result<(), ApiError>;

    async fn posts(&self, params: &PostListParams) -> Result<Vec<PostDetail>, ApiError>;

    async fn post_detail(&self, post_id: &str) -> Result<PostDetail, ApiError>;

    async fn create_post(&self, params: &CreatePostParams) -> Result<(), ApiError>;

    async fn vote(&self, params: &VoteParams) -> Result<(), ApiError>;

    async fn communities(&self) -> Result<Vec<Community>, ApiError>;

    async fn community_detail(&self, community_id: i64) -> Result<CommunityDetail, ApiError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Auth {
    None,
    Optional,
    Required,
}

/// HTTP implementation of [`ApiGateway`]. Any response that reports a
/// revoked credential discards the stored session, whichever call it was.
pub struct ApiConnection {
    client: Client,
    base_url: String,
    session: SessionBroadcast,
}

impl ApiConnection {
    pub fn new(config: &ClientConfig, session: SessionBroadcast) -> Self {
        ApiConnection {
            client: Client::new(),
            base_url: config.api_base_url.trim_end_matches('/').to_owned(),
            session,
        }
    }

    fn url(&self, path: &str) -> String {
        self.base_url.clone() + path
    }

    fn authorize(&self, request: RequestBuilder, auth: Auth) -> Result<RequestBuilder, ApiError> {
        if auth == Auth::None {
            return Ok(request);
        }

        match self.session.current() {
            Some(record) => Ok(request.bearer_auth(record.token)),
            None if auth == Auth::Required => Err(ApiError::Unauthenticated),
            None => Ok(request),
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        auth: Auth,
    ) -> Result<Option<T>, ApiError> {
        let request = self.authorize(request, auth)?;
        let response = request.send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("request rejected with 401, dropping session");
            self.session.clear();
            return Err(ApiError::CredentialInvalid(
                response.status().to_string(),
            ));
        }

        let body: ApiResponse<T> = response.json().await?;
        check_response(&self.session, body)
    }
}

/// Unwraps a response envelope. Revoked credentials clear `session` before
/// the error is returned.
pub fn check_response<T>(
    session: &SessionBroadcast,
    body: ApiResponse<T>,
) -> Result<Option<T>, ApiError> {
    if body.is_success() {
        return Ok(body.data);
    }

    let err = ApiError::from_response(&body);
    debug!("api error response: {:?}", err);

    if err.is_credential_revoked() {
        warn!("credential revoked ({}), dropping session", body.code);
        session.clear();
    }

    Err(err)
}

fn required<T>(data: Option<T>) -> Result<T, ApiError> {
    data.ok_or(ApiError::Unknown {
        code: 1000,
        msg: "response is missing data".to_owned(),
    })
}

#[async_trait(?Send)]
impl ApiGateway for ApiConnection {
    async fn login(&self, params: &LoginParams) -> Result<User, ApiError> {
        let request = self.client.post(self.url("/login")).json(params);
        required(self.send(request, Auth::None).await?)
    }

    async fn sign_up(&self, params: &SignUpParams) -> Result<(), ApiError> {
        let request = self.client.post(self.url("/signup")).json(params);
        self.send::<serde_json::Value>(request, Auth::None).await?;
        Ok(())
    }

    async fn posts(&self, params: &PostListParams) -> Result<Vec<PostDetail>, ApiError> {
        let request = self
            .client
            .get(self.url("/posts2"))
            .query(&params.query_pairs());
        Ok(self.send(request, Auth::None).await?.unwrap_or_default())
    }

    async fn post_detail(&self, post_id: &str) -> Result<PostDetail, ApiError> {
        let request = self.client.get(self.url(&format!("/post/{}", post_id)));
        required(self.send(request, Auth::Optional).await?)
    }

    async fn create_post(&self, params: &CreatePostParams) -> Result<(), ApiError> {
        let request = self.client.post(self.url("/post")).json(params);
        self.send::<serde_json::Value>(request, Auth::Required).await?;
        Ok(())
    }

    async fn vote(&self, params: &VoteParams) -> Result<(), ApiError> {
        let request = self.client.post(self.url("/vote")).json(params);
        self.send::<serde_json::Value>(request, Auth::Required).await?;
        Ok(())
    }

    async fn communities(&self) -> Result<Vec<Community>, ApiError> {
        let request = self.client.get(self.url("/community"));
        Ok(self.send(request, Auth::None).await?.unwrap_or_default())
    }

    async fn community_detail(&self, community_id: i64) -> Result<CommunityDetail, ApiError> {
        let request = self
            .client
            .get(self.url(&format!("/community/{}", community_id)));
        required(self.send(request, Auth::None).await?)
    }
}

#[cfg(test)]
pub use self::tests::ScriptedGateway;
