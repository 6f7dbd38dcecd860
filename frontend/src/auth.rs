use log::info;

use crate::connection::ApiGateway;
use crate::error::ApiError;
use crate::persisted::{LoginParams, SignUpParams};
use crate::session::{SessionBroadcast, SessionRecord};

/// Authenticates and stores the returned session, which announces the login
/// to every observer.
pub async fn login(
    gateway: &dyn ApiGateway,
    session: &SessionBroadcast,
    params: &LoginParams,
) -> Result<SessionRecord, ApiError> {
    let user = gateway.login(params).await?;

    let record = SessionRecord::from_login(user).ok_or(ApiError::Unknown {
        code: 1000,
        msg: "login response carried no token".to_owned(),
    })?;

    session.establish(&record);
    info!("logged in as {}", record.user.username);

    Ok(record)
}

/// Registers an account. The server does not log the new user in, so the
/// session is left untouched.
pub async fn sign_up(gateway: &dyn ApiGateway, params: &SignUpParams) -> Result<(), ApiError> {
    gateway.sign_up(params).await?;
    info!("signed up {}", params.username);

    Ok(())
}

pub fn logout(session: &SessionBroadcast) {
    session.clear();
    info!("logged out");
}
