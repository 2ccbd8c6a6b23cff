// error.rs
use thiserror::Error;

/// Rejections reported back to the client as `error` events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("unknown gender '{0}'")]
    InvalidGender(String),
    #[error("already searching for a partner")]
    AlreadySearching,
    #[error("already in a chat")]
    AlreadyInChat,
    #[error("not searching")]
    NotSearching,
    #[error("not in a chat")]
    NotInChat,
    #[error("message is empty")]
    EmptyMessage,
    #[error("message exceeds {0} characters")]
    MessageTooLong(usize),
    #[error("nobody to befriend yet")]
    NoPartner,
    #[error("that user is no longer online")]
    PartnerOffline,
    #[error("'{0}' is not in your friends list")]
    NotFriends(String),
    #[error("unparseable event: {0}")]
    BadRequest(String),
    #[error("internal error")]
    Internal,
}

impl ChatError {
    /// Stable machine-readable code sent alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::InvalidGender(_) => "invalid_gender",
            ChatError::AlreadySearching => "already_searching",
            ChatError::AlreadyInChat => "already_in_chat",
            ChatError::NotSearching => "not_searching",
            ChatError::NotInChat => "not_in_chat",
            ChatError::EmptyMessage => "empty_message",
            ChatError::MessageTooLong(_) => "message_too_long",
            ChatError::NoPartner => "no_partner",
            ChatError::PartnerOffline => "partner_offline",
            ChatError::NotFriends(_) => "not_friends",
            ChatError::BadRequest(_) => "bad_request",
            ChatError::Internal => "internal",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum BotError {
    #[error("request timed out")]
    Timeout,
    #[error("unable to reach text generator: {0}")]
    Connect(String),
    #[error("text generator returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed generator response: {0}")]
    Decode(String),
    #[error("generator returned no text")]
    Empty,
}

impl From<reqwest::Error> for BotError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BotError::Timeout
        } else if e.is_decode() {
            BotError::Decode(e.to_string())
        } else {
            BotError::Connect(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ChatError::AlreadySearching.code(), "already_searching");
        assert_eq!(ChatError::MessageTooLong(10).code(), "message_too_long");
        assert_eq!(
            ChatError::MessageTooLong(10).to_string(),
            "message exceeds 10 characters"
        );
    }
}
