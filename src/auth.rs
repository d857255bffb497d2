use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Wire-protocol authentication: one shared deployment secret, checked in
/// cleartext. Every login name is accepted; only the password matters.
#[derive(Debug)]
pub struct ForecourtAuthSource {
    password: Vec<u8>,
}

impl ForecourtAuthSource {
    pub fn new(password: String) -> Self {
        Self {
            password: password.into_bytes(),
        }
    }
}

#[async_trait]
impl AuthSource for ForecourtAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.clone()))
    }
}
