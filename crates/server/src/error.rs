use async_trait::async_trait;
use palaver_core::ChatError;
use salvo::prelude::{Depot, Request, Response, Writer};
use salvo::writing::Scribe;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("public: `{0}`")]
    Public(#[from] ChatError),
    #[error("internal: `{0}`")]
    Internal(String),
    #[error("salvo internal error: `{0}`")]
    Salvo(#[from] salvo::Error),
    #[error("http: `{0}`")]
    HttpStatus(#[from] salvo::http::StatusError),
    #[error("http parse: `{0}`")]
    HttpParse(#[from] salvo::http::ParseError),
    #[error("io: `{0}`")]
    Io(#[from] std::io::Error),
    #[error("serde json: `{0}`")]
    SerdeJson(#[from] serde_json::error::Error),
    #[error("diesel: `{0}`")]
    Diesel(#[from] diesel::result::Error),
    #[error("data: `{0}`")]
    Data(#[from] palaver_data::DataError),
    #[error("pool: `{0}`")]
    Pool(#[from] palaver_data::PoolError),
    #[error("redis: `{0}`")]
    Redis(#[from] redis::RedisError),
    #[error("jwt: `{0}`")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("bcrypt: `{0}`")]
    Bcrypt(#[from] bcrypt::BcryptError),
}

impl AppError {
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Collapses the error onto the client-visible vocabulary. Everything
    /// that is not already a `ChatError` is a downstream failure and
    /// surfaces as a generic `SERVER_ERROR`; the details only go to the log.
    pub fn to_chat_error(&self) -> ChatError {
        match self {
            Self::Public(e) => e.clone(),
            Self::Diesel(diesel::result::Error::NotFound)
            | Self::Data(palaver_data::DataError::Diesel(diesel::result::Error::NotFound)) => {
                ChatError::not_found("Resource not found.")
            }
            _ => ChatError::server_error("Internal server error."),
        }
    }
}

#[async_trait]
impl Writer for AppError {
    async fn write(mut self, _req: &mut Request, _depot: &mut Depot, res: &mut Response) {
        if !matches!(self, Self::Public(_)) {
            tracing::error!(error = ?self, "request failed");
        }
        self.to_chat_error().render(res);
    }
}

#[cfg(test)]
mod tests {
    use palaver_core::ErrorKind;

    use super::AppError;

    #[test]
    fn downstream_errors_surface_generically() {
        let err = AppError::internal("redis connection refused at 10.0.0.3");
        let public = err.to_chat_error();
        assert_eq!(public.kind, ErrorKind::ServerError);
        assert_eq!(public.message, "Internal server error.");
    }

    #[test]
    fn public_errors_pass_through() {
        let err = AppError::from(palaver_core::ChatError::passcode_required("Passcode required."));
        assert_eq!(err.to_chat_error().kind, ErrorKind::PasscodeRequired);
    }

    #[test]
    fn db_not_found_maps_to_not_found() {
        let err = AppError::Diesel(diesel::result::Error::NotFound);
        assert_eq!(err.to_chat_error().kind, ErrorKind::NotFound);
    }
}
