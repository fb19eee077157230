use palaver_core::{ChatError, UnixMillis, UserId};
use palaver_data::user::NewDbUser;
use salvo::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::AppState;
use crate::{AppError, JsonResult, hoops, json_ok};

#[derive(Debug, Deserialize)]
pub struct RegisterReqBody {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginReqBody {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UserResBody {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub created_at: UnixMillis,
}

#[derive(Debug, Serialize)]
pub struct AuthResBody {
    pub user: UserResBody,
    pub token: String,
}

// #POST /auth/register
/// Creates the account and returns it with a fresh token, so registration
/// doubles as the first login.
#[handler]
pub async fn register(req: &mut Request, depot: &mut Depot) -> JsonResult<AuthResBody> {
    let state = obtain_state(depot)?;
    let body: RegisterReqBody = req
        .parse_json()
        .await
        .map_err(|_| ChatError::validation("Malformed JSON body."))?;

    let username = body.username.trim().to_owned();
    let email = body.email.trim().to_lowercase();
    validate_username(&username)?;
    validate_email(&email)?;
    validate_password(&body.password)?;

    if palaver_data::user::username_taken(&username)? {
        return Err(ChatError::validation("Username is already taken.").into());
    }
    if palaver_data::user::email_taken(&email)? {
        return Err(ChatError::validation("Email is already registered.").into());
    }

    let password_hash = bcrypt::hash(&body.password, bcrypt::DEFAULT_COST)?;
    let user = palaver_data::user::create_user(NewDbUser {
        id: Uuid::new_v4(),
        username,
        email,
        password_hash,
        created_at: UnixMillis::now(),
    })?;

    let token = hoops::issue_token(&state.config.jwt, user.id)?;
    info!(user_id = %user.id, username = %user.username, "user registered");
    json_ok(AuthResBody {
        user: UserResBody {
            id: user.id,
            username: user.username,
            email: user.email,
            created_at: user.created_at,
        },
        token,
    })
}

// #POST /auth/login
#[handler]
pub async fn login(req: &mut Request, depot: &mut Depot) -> JsonResult<AuthResBody> {
    let state = obtain_state(depot)?;
    let body: LoginReqBody = req
        .parse_json()
        .await
        .map_err(|_| ChatError::validation("Malformed JSON body."))?;

    // the same reply for a missing user and a wrong password, so login
    // failures do not enumerate accounts
    let user = palaver_data::user::user_by_username(body.username.trim())?
        .ok_or_else(|| ChatError::unauthorized("Invalid username or password."))?;
    if !bcrypt::verify(&body.password, &user.password_hash)? {
        return Err(ChatError::unauthorized("Invalid username or password.").into());
    }

    let token = hoops::issue_token(&state.config.jwt, user.id)?;
    json_ok(AuthResBody {
        user: UserResBody {
            id: user.id,
            username: user.username,
            email: user.email,
            created_at: user.created_at,
        },
        token,
    })
}

fn obtain_state(depot: &Depot) -> Result<AppState, AppError> {
    depot
        .obtain::<AppState>()
        .map(Clone::clone)
        .map_err(|_| AppError::internal("app state missing from depot"))
}

fn validate_username(username: &str) -> Result<(), ChatError> {
    if username.len() < 3 || username.len() > 32 {
        return Err(ChatError::validation(
            "Username must be between 3 and 32 characters.",
        ));
    }
    if !username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ChatError::validation(
            "Username may only contain letters, digits, and underscores.",
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), ChatError> {
    let well_formed = email.len() <= 254
        && email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.starts_with('.'))
        && !email.contains(char::is_whitespace);
    if well_formed {
        Ok(())
    } else {
        Err(ChatError::validation("Email address is invalid."))
    }
}

fn validate_password(password: &str) -> Result<(), ChatError> {
    if password.len() < 8 {
        return Err(ChatError::validation(
            "Password must be at least 8 characters.",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{validate_email, validate_password, validate_username};

    #[test]
    fn username_rules() {
        assert!(validate_username("alice_01").is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username(&"x".repeat(33)).is_err());
        assert!(validate_username("alice bob").is_err());
        assert!(validate_username("alice!").is_err());
    }

    #[test]
    fn email_rules() {
        assert!(validate_email("alice@example.com").is_ok());
        assert!(validate_email("aliceexample.com").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("alice@nodot").is_err());
        assert!(validate_email("alice@ example.com").is_err());
    }

    #[test]
    fn password_rules() {
        assert!(validate_password("longenough").is_ok());
        assert!(validate_password("short").is_err());
    }
}
