use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use palaver_core::message::UserSummary;
use palaver_core::{ChatError, UnixMillis, UserId};
use salvo::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::state::AppState;
use crate::{AppError, AppResult};

/// The authenticated identity attached to a request or socket. Auth
/// middleware resolves the token and injects this; handlers never see the
/// token itself.
#[derive(Clone, Debug)]
pub struct AuthedUser {
    pub id: UserId,
    pub username: String,
}

impl AuthedUser {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            username: self.username.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: u64,
}

pub fn issue_token(config: &JwtConfig, user_id: UserId) -> AppResult<String> {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: UnixMillis::now().as_secs() as u64 + config.lifetime,
    };
    Ok(jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )?)
}

fn verify_token(config: &JwtConfig, token: &str) -> Result<UserId, ChatError> {
    let data = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ChatError::unauthorized("Invalid or expired token."))?;
    Uuid::parse_str(&data.claims.sub).map_err(|_| ChatError::unauthorized("Invalid token subject."))
}

/// Resolves `Authorization: Bearer` (REST) or the `token` query parameter
/// (websocket handshake, where clients cannot set headers) to a user and
/// injects it into the depot.
#[handler]
pub async fn auth_by_token(req: &mut Request, depot: &mut Depot) -> AppResult<()> {
    let state = depot
        .obtain::<AppState>()
        .map_err(|_| AppError::internal("app state missing from depot"))?
        .clone();

    let token = bearer_token(req)
        .or_else(|| req.query::<String>("token"))
        .ok_or_else(|| AppError::from(ChatError::unauthorized("Missing token.")))?;

    let user_id = verify_token(&state.config.jwt, &token)?;
    let user = palaver_data::user::user_by_id(user_id)?
        .ok_or_else(|| AppError::from(ChatError::unauthorized("Unknown user.")))?;

    depot.inject(AuthedUser {
        id: user.id,
        username: user.username,
    });
    Ok(())
}

fn bearer_token(req: &Request) -> Option<String> {
    let header = req
        .headers()
        .get(salvo::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?;
    header.strip_prefix("Bearer ").map(|t| t.trim().to_owned())
}

pub trait DepotExt {
    fn authed_user(&self) -> AppResult<&AuthedUser>;
}

impl DepotExt for Depot {
    fn authed_user(&self) -> AppResult<&AuthedUser> {
        self.obtain::<AuthedUser>()
            .map_err(|_| AppError::from(ChatError::unauthorized("Missing authentication.")))
    }
}

#[cfg(test)]
mod tests {
    use palaver_core::ErrorKind;
    use uuid::Uuid;

    use super::{issue_token, verify_token};
    use crate::config::JwtConfig;

    fn test_config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret".to_owned(),
            lifetime: 3_600,
        }
    }

    #[test]
    fn token_round_trip() {
        let config = test_config();
        let user_id = Uuid::new_v4();
        let token = issue_token(&config, user_id).unwrap();
        assert_eq!(verify_token(&config, &token).unwrap(), user_id);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue_token(&test_config(), Uuid::new_v4()).unwrap();
        let other = JwtConfig {
            secret: "different-secret".to_owned(),
            lifetime: 3_600,
        };
        let err = verify_token(&other, &token).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthorized);
    }

    #[test]
    fn garbage_token_is_rejected() {
        let err = verify_token(&test_config(), "not.a.token").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthorized);
    }
}
