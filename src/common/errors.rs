use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error codes carried in the `error_code` field of failure envelopes.
///
/// Values are part of the wire contract and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", from = "u8")]
#[repr(u8)]
pub enum ErrorCode {
    Unexpected = 0,
    TooMuchTimePaused = 1,
    VoiceConnectionClosed = 2,
    TrackSearchFailed = 3,
    TrackNotFoundInQueue = 4,
    NoActivePlayer = 5,
    TrackSearchInvalidUrl = 6,
    TrackSearchUnsupportedPlatform = 7,
    SpotifyPlaylistsNotSupported = 8,
}

impl From<ErrorCode> for u8 {
    fn from(code: ErrorCode) -> Self {
        code as u8
    }
}

impl From<u8> for ErrorCode {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::TooMuchTimePaused,
            2 => Self::VoiceConnectionClosed,
            3 => Self::TrackSearchFailed,
            4 => Self::TrackNotFoundInQueue,
            5 => Self::NoActivePlayer,
            6 => Self::TrackSearchInvalidUrl,
            7 => Self::TrackSearchUnsupportedPlatform,
            8 => Self::SpotifyPlaylistsNotSupported,
            _ => Self::Unexpected,
        }
    }
}

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("too much time paused")]
    TooMuchTimePaused,
    #[error("voice connection closed")]
    VoiceConnectionClosed,
    #[error("couldn't find track")]
    TrackSearchFailed,
    #[error("the track could not be found in the queue")]
    TrackNotFoundInQueue,
    #[error("there is not an active player")]
    NoActivePlayer,
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),
    #[error("spotify playlists and albums are not supported")]
    SpotifyPlaylistsNotSupported,

    #[error("invalid play query `{0}`")]
    InvalidPlayQuery(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("transcode session is not running")]
    NotRunning,
    #[error("failed to join voice channel: {0}")]
    VoiceJoin(String),
    #[error("transcoder failed: {0}")]
    Transcode(String),
    #[error("platform request failed: {0}")]
    Platform(String),
    #[error("request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Internal(String),
}

pub type PlayerResult<T> = Result<T, PlayerError>;

impl PlayerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::TooMuchTimePaused => ErrorCode::TooMuchTimePaused,
            Self::VoiceConnectionClosed => ErrorCode::VoiceConnectionClosed,
            Self::TrackSearchFailed => ErrorCode::TrackSearchFailed,
            Self::TrackNotFoundInQueue => ErrorCode::TrackNotFoundInQueue,
            Self::NoActivePlayer => ErrorCode::NoActivePlayer,
            Self::InvalidUrl(_) => ErrorCode::TrackSearchInvalidUrl,
            Self::UnsupportedPlatform(_) => ErrorCode::TrackSearchUnsupportedPlatform,
            Self::SpotifyPlaylistsNotSupported => ErrorCode::SpotifyPlaylistsNotSupported,
            _ => ErrorCode::Unexpected,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::TrackSearchFailed
            | Self::TrackNotFoundInQueue
            | Self::NoActivePlayer
            | Self::InvalidUrl(_)
            | Self::UnsupportedPlatform(_)
            | Self::SpotifyPlaylistsNotSupported => StatusCode::NOT_FOUND,
            Self::BadRequest(_) | Self::InvalidPlayQuery(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Rebuilds an error from a failure envelope received over the wire.
    pub fn from_wire(code: ErrorCode, message: String) -> Self {
        match code {
            ErrorCode::TooMuchTimePaused => Self::TooMuchTimePaused,
            ErrorCode::VoiceConnectionClosed => Self::VoiceConnectionClosed,
            ErrorCode::TrackSearchFailed => Self::TrackSearchFailed,
            ErrorCode::TrackNotFoundInQueue => Self::TrackNotFoundInQueue,
            ErrorCode::NoActivePlayer => Self::NoActivePlayer,
            ErrorCode::TrackSearchInvalidUrl => Self::InvalidUrl(message),
            ErrorCode::TrackSearchUnsupportedPlatform => Self::UnsupportedPlatform(message),
            ErrorCode::SpotifyPlaylistsNotSupported => Self::SpotifyPlaylistsNotSupported,
            ErrorCode::Unexpected => Self::Internal(message),
        }
    }

    /// Whether the playback job must end when this error surfaces inside it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::TooMuchTimePaused | Self::VoiceConnectionClosed | Self::VoiceJoin(_)
        )
    }
}

/// Failure envelope: `{ "error": "...", "error_code": n }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub error_code: ErrorCode,
}

impl From<&PlayerError> for ErrorBody {
    fn from(e: &PlayerError) -> Self {
        Self {
            error: e.to_string(),
            error_code: e.code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_serializes_as_integer() {
        let body = ErrorBody::from(&PlayerError::NoActivePlayer);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error_code"], 5);
        assert_eq!(json["error"], "there is not an active player");
    }

    #[test]
    fn test_unknown_code_decodes_as_unexpected() {
        let code: ErrorCode = serde_json::from_str("200").unwrap();
        assert_eq!(code, ErrorCode::Unexpected);
    }

    #[test]
    fn test_search_errors_are_not_found() {
        for e in [
            PlayerError::TrackSearchFailed,
            PlayerError::InvalidUrl("x".into()),
            PlayerError::UnsupportedPlatform("x".into()),
            PlayerError::SpotifyPlaylistsNotSupported,
        ] {
            assert_eq!(e.status(), StatusCode::NOT_FOUND, "{e}");
        }
        assert_eq!(
            PlayerError::InvalidPlayQuery("x".into()).code(),
            ErrorCode::Unexpected
        );
    }

    #[test]
    fn test_wire_round_trip_keeps_variant() {
        let e = PlayerError::from_wire(ErrorCode::TrackSearchInvalidUrl, "bad".into());
        assert!(matches!(e, PlayerError::InvalidUrl(m) if m == "bad"));
    }

    #[test]
    fn test_fatal_errors() {
        assert!(PlayerError::TooMuchTimePaused.is_fatal());
        assert!(PlayerError::VoiceConnectionClosed.is_fatal());
        assert!(!PlayerError::TrackSearchFailed.is_fatal());
    }
}
