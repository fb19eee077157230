//! Errors that can be sent to chat clients.
//!
//! `ChatError` is the only error shape clients ever see: REST responses carry
//! it as `{"error": {"message", "code"}}`, the socket layer forwards it as an
//! `error` event. Everything internal is mapped onto one of these kinds
//! before it leaves the process.

use std::error::Error as StdError;
use std::fmt;

use salvo::http::{Response, StatusCode, header};
use salvo::writing::Scribe;
use serde::de::{self, Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};
use serde_json::json;

/// An enum for the client-visible error code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// `PASSCODE_REQUIRED`
    ///
    /// The room is private and no passcode was supplied.
    PasscodeRequired,

    /// `INVALID_PASSCODE`
    InvalidPasscode,

    /// `NOT_FOUND`
    NotFound,

    /// `UNAUTHORIZED`
    ///
    /// Missing or invalid token.
    Unauthorized,

    /// `FORBIDDEN`
    Forbidden,

    /// `VALIDATION_ERROR`
    Validation,

    /// `DUPLICATE_ROOM_NAME`
    DuplicateRoomName,

    /// `SERVER_ERROR`
    ///
    /// A downstream failure (DB, KV, bus) surfaced generically.
    ServerError,

    /// `GENERIC`
    Generic,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PasscodeRequired => "PASSCODE_REQUIRED",
            Self::InvalidPasscode => "INVALID_PASSCODE",
            Self::NotFound => "NOT_FOUND",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::Validation => "VALIDATION_ERROR",
            Self::DuplicateRoomName => "DUPLICATE_ROOM_NAME",
            Self::ServerError => "SERVER_ERROR",
            Self::Generic => "GENERIC",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Some(match code {
            "PASSCODE_REQUIRED" => Self::PasscodeRequired,
            "INVALID_PASSCODE" => Self::InvalidPasscode,
            "NOT_FOUND" => Self::NotFound,
            "UNAUTHORIZED" => Self::Unauthorized,
            "FORBIDDEN" => Self::Forbidden,
            "VALIDATION_ERROR" => Self::Validation,
            "DUPLICATE_ROOM_NAME" => Self::DuplicateRoomName,
            "SERVER_ERROR" => Self::ServerError,
            "GENERIC" => Self::Generic,
            _ => return None,
        })
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Self::from_code(&code).ok_or_else(|| de::Error::custom(format!("unknown error code `{code}`")))
    }
}

macro_rules! simple_kind_fns {
    ($($fname:ident, $kind:ident;)+) => {
        $(
            /// Create a new `ChatError`.
            pub fn $fname(message: impl Into<String>) -> Self {
                Self::new(ErrorKind::$kind, message)
            }
        )+
    }
}

/// A client-visible chat error.
#[derive(Debug, Clone)]
pub struct ChatError {
    /// The http status code, when the default mapping for the kind is wrong.
    pub status_code: Option<StatusCode>,
    pub kind: ErrorKind,
    pub message: String,
}

impl ChatError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status_code: None,
            kind,
            message: message.into(),
        }
    }

    simple_kind_fns! {
        passcode_required, PasscodeRequired;
        invalid_passcode, InvalidPasscode;
        not_found, NotFound;
        unauthorized, Unauthorized;
        forbidden, Forbidden;
        validation, Validation;
        duplicate_room_name, DuplicateRoomName;
        server_error, ServerError;
        generic, Generic;
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status_code = Some(status);
        self
    }

    /// The http status this error renders with, unless overridden.
    pub fn http_status(&self) -> StatusCode {
        self.status_code.unwrap_or(match self.kind {
            ErrorKind::PasscodeRequired | ErrorKind::InvalidPasscode | ErrorKind::Forbidden => {
                StatusCode::FORBIDDEN
            }
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Validation | ErrorKind::Generic => StatusCode::BAD_REQUEST,
            ErrorKind::DuplicateRoomName => StatusCode::CONFLICT,
            ErrorKind::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
        })
    }
}

impl Serialize for ChatError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        json!({
            "error": {
                "message": self.message,
                "code": self.kind.as_str(),
            }
        })
        .serialize(serializer)
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} / {}] {}", self.http_status().as_u16(), self.kind, self.message)
    }
}

impl StdError for ChatError {}

impl Scribe for ChatError {
    fn render(self, res: &mut Response) {
        res.add_header(header::CONTENT_TYPE, "application/json", true).ok();

        if res.status_code.map(|c| c.is_success()).unwrap_or(true) {
            res.status_code(self.http_status());
        }

        let bytes = serde_json::to_vec(&self).unwrap();
        res.write_body(bytes).ok();
    }
}

#[cfg(test)]
mod tests {
    use salvo::http::StatusCode;
    use serde_json::json;

    use super::{ChatError, ErrorKind};

    #[test]
    fn codes_round_trip() {
        for kind in [
            ErrorKind::PasscodeRequired,
            ErrorKind::InvalidPasscode,
            ErrorKind::NotFound,
            ErrorKind::Unauthorized,
            ErrorKind::Forbidden,
            ErrorKind::Validation,
            ErrorKind::DuplicateRoomName,
            ErrorKind::ServerError,
            ErrorKind::Generic,
        ] {
            assert_eq!(ErrorKind::from_code(kind.as_str()), Some(kind));
        }
        assert_eq!(ErrorKind::from_code("NO_SUCH_CODE"), None);
    }

    #[test]
    fn validation_error_uses_spec_code_string() {
        assert_eq!(ErrorKind::Validation.as_str(), "VALIDATION_ERROR");
    }

    #[test]
    fn error_body_shape() {
        let err = ChatError::passcode_required("This room requires a passcode.");
        let body = serde_json::to_value(&err).unwrap();
        assert_eq!(
            body,
            json!({
                "error": {
                    "message": "This room requires a passcode.",
                    "code": "PASSCODE_REQUIRED",
                }
            })
        );
    }

    #[test]
    fn status_mapping() {
        assert_eq!(ChatError::not_found("x").http_status(), StatusCode::NOT_FOUND);
        assert_eq!(ChatError::unauthorized("x").http_status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ChatError::duplicate_room_name("x").http_status(), StatusCode::CONFLICT);
        assert_eq!(ChatError::server_error("x").http_status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            ChatError::generic("x").with_status(StatusCode::IM_A_TEAPOT).http_status(),
            StatusCode::IM_A_TEAPOT
        );
    }
}
