// message.rs
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::profile::{Gender, Preference, UserId};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub from: String,
    pub text: String,
    pub timestamp: String,
}

impl ChatMessage {
    pub fn new(from: &str, text: &str) -> Self {
        Self {
            from: from.to_string(),
            text: text.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// What a user learns about whoever they were paired with.
/// Bot partners look exactly like human ones.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PartnerProfile {
    pub name: String,
    pub gender: Gender,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Timeout,
    Left,
    PartnerLeft,
    PartnerDisconnected,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FriendSummary {
    pub id: UserId,
    pub name: String,
    pub online: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    FindMatch {
        #[serde(default)]
        preference: Preference,
    },
    CancelSearch,
    SendMessage {
        text: String,
    },
    Typing,
    LeaveChat,
    AddFriend,
    FriendMessage {
        to: UserId,
        text: String,
    },
    FriendHistory {
        friend: UserId,
    },
    ListFriends,
}

impl ClientEvent {
    pub fn parse(text: &str) -> Result<Self, ChatError> {
        serde_json::from_str(text).map_err(|e| ChatError::BadRequest(e.to_string()))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected {
        user_id: UserId,
    },
    Searching,
    SearchCancelled,
    MatchFound {
        session_id: String,
        partner: PartnerProfile,
        duration_secs: u64,
    },
    /// A chat line. `from` is the speaker's display name for human and bot
    /// partners alike; `mine` marks the echo of the recipient's own line.
    Message {
        session_id: String,
        message: ChatMessage,
        mine: bool,
    },
    Typing {
        session_id: String,
    },
    TimeWarning {
        session_id: String,
        remaining_secs: u64,
    },
    SessionEnded {
        session_id: String,
        reason: EndReason,
    },
    FriendRequest {
        from: UserId,
        name: String,
    },
    FriendAdded {
        friend: FriendSummary,
    },
    FriendMessage {
        message: ChatMessage,
    },
    FriendHistory {
        friend: UserId,
        messages: Vec<ChatMessage>,
    },
    FriendList {
        friends: Vec<FriendSummary>,
    },
    FriendPresence {
        friend: UserId,
        online: bool,
    },
    Replaced,
    Error {
        code: String,
        message: String,
    },
}

impl From<ChatError> for ServerEvent {
    fn from(e: ChatError) -> Self {
        ServerEvent::Error {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

impl ServerEvent {
    pub fn to_json(&self) -> String {
        // Every variant is plain data; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{\"type\":\"error\"}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_are_tagged() {
        let ev = ClientEvent::parse(r#"{"type":"find_match","preference":"female"}"#).unwrap();
        assert_eq!(
            ev,
            ClientEvent::FindMatch {
                preference: Preference::Female
            }
        );

        let ev = ClientEvent::parse(r#"{"type":"find_match"}"#).unwrap();
        assert_eq!(
            ev,
            ClientEvent::FindMatch {
                preference: Preference::Any
            }
        );

        assert_eq!(ClientEvent::parse(r#"{"type":"typing"}"#).unwrap(), ClientEvent::Typing);
    }

    #[test]
    fn garbage_is_a_bad_request() {
        let err = ClientEvent::parse("hello").unwrap_err();
        assert_eq!(err.code(), "bad_request");
        let err = ClientEvent::parse(r#"{"type":"dance"}"#).unwrap_err();
        assert_eq!(err.code(), "bad_request");
    }

    #[test]
    fn server_event_shape() {
        let ev = ServerEvent::SessionEnded {
            session_id: "s1".into(),
            reason: EndReason::PartnerLeft,
        };
        let v: serde_json::Value = serde_json::from_str(&ev.to_json()).unwrap();
        assert_eq!(v["type"], "session_ended");
        assert_eq!(v["reason"], "partner_left");

        let ev: ServerEvent = ChatError::NotInChat.into();
        let v: serde_json::Value = serde_json::from_str(&ev.to_json()).unwrap();
        assert_eq!(v["type"], "error");
        assert_eq!(v["code"], "not_in_chat");
    }

    #[test]
    fn chat_line_carries_mine_flag() {
        let ev = ServerEvent::Message {
            session_id: "s1".into(),
            message: ChatMessage::new("Mia", "hey"),
            mine: false,
        };
        let v: serde_json::Value = serde_json::from_str(&ev.to_json()).unwrap();
        assert_eq!(v["type"], "message");
        assert_eq!(v["message"]["from"], "Mia");
        assert_eq!(v["mine"], false);
    }

    #[test]
    fn partner_profile_omits_unknown_fields() {
        let p = PartnerProfile {
            name: "Sam".into(),
            gender: Gender::Male,
            age: None,
            city: None,
            avatar: None,
        };
        let v: serde_json::Value = serde_json::to_value(&p).unwrap();
        assert!(v.get("age").is_none());
        assert_eq!(v["gender"], "male");
    }
}
