// websocket.rs
use std::collections::HashMap;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use crate::error::ChatError;
use crate::hub::SharedHub;
use crate::message::ServerEvent;
use crate::profile::{Gender, UserProfile};

/// Builds the connecting user's profile from the upgrade query string.
/// The auth layer in front of us has already vouched for `user`.
pub fn identity(qs: &HashMap<String, String>) -> Result<UserProfile, ChatError> {
    let id = qs
        .get("user")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ChatError::BadRequest("missing user".into()))?;
    let gender: Gender = qs
        .get("gender")
        .ok_or_else(|| ChatError::BadRequest("missing gender".into()))?
        .parse()?;
    let name = qs
        .get("name")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or(id);
    let age = qs.get("age").and_then(|a| a.parse::<u8>().ok());

    Ok(UserProfile {
        age,
        ..UserProfile::new(id, name, gender)
    })
}

pub async fn client_connected(ws: WebSocket, hub: SharedHub, profile: UserProfile) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    // server -> client
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if ws_tx.send(Message::text(event.to_json())).await.is_err() {
                break;
            }
        }
        ws_tx.close().await.ok();
    });

    let user = profile.id.clone();
    let conn_id = hub.connect(profile, tx);

    while let Some(result) = ws_rx.next().await {
        let msg = match result {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(user = %user, error = %e, "socket error");
                break;
            }
        };

        if msg.is_close() {
            break;
        }
        if let Ok(text) = msg.to_str() {
            hub.handle_text(&user, conn_id, text);
        } else if msg.is_binary() {
            hub.reject_frame(&user, conn_id, ChatError::BadRequest("binary frames are not supported".into()));
        }
    }

    hub.disconnect(&user, conn_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn identity_from_query() {
        let p = identity(&qs(&[("user", "u1"), ("name", "Ana"), ("gender", "female"), ("age", "24")])).unwrap();
        assert_eq!(p.id, "u1");
        assert_eq!(p.name, "Ana");
        assert_eq!(p.gender, Gender::Female);
        assert_eq!(p.age, Some(24));
    }

    #[test]
    fn name_defaults_to_id_and_bad_age_is_dropped() {
        let p = identity(&qs(&[("user", "u1"), ("gender", "m"), ("age", "old")])).unwrap();
        assert_eq!(p.name, "u1");
        assert_eq!(p.age, None);
    }

    #[test]
    fn identity_requires_user_and_gender() {
        assert!(identity(&qs(&[("gender", "male")])).is_err());
        assert!(identity(&qs(&[("user", " "), ("gender", "male")])).is_err());
        assert!(matches!(
            identity(&qs(&[("user", "u1")])),
            Err(ChatError::BadRequest(_))
        ));
        assert!(matches!(
            identity(&qs(&[("user", "u1"), ("gender", "x")])),
            Err(ChatError::InvalidGender(_))
        ));
    }
}
