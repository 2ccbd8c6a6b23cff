// presence.rs
use std::collections::HashMap;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::message::ServerEvent;
use crate::profile::{UserId, UserProfile};
use crate::session::{Party, SessionId};

pub type ClientTx = mpsc::UnboundedSender<ServerEvent>;

/// Identifies one socket. A user reconnecting gets a new one.
pub type ConnId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Idle,
    Searching,
    Matched(SessionId),
    InBotChat(SessionId),
}

impl Availability {
    pub fn session(&self) -> Option<&SessionId> {
        match self {
            Availability::Matched(id) | Availability::InBotChat(id) => Some(id),
            _ => None,
        }
    }
}

pub struct Connection {
    pub conn_id: ConnId,
    pub profile: UserProfile,
    pub sender: ClientTx,
    pub availability: Availability,
    /// Whoever this user was last paired with, bot or human.
    pub last_partner: Option<Party>,
}

#[derive(Default)]
pub struct PresenceRegistry {
    online: HashMap<UserId, Connection>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a socket for `profile.id`. Returns the new connection id and
    /// the connection it displaced, if any. A reconnect keeps the search or
    /// chat the user was in.
    pub fn register(&mut self, profile: UserProfile, sender: ClientTx) -> (ConnId, Option<Connection>) {
        let conn_id = Uuid::new_v4();
        let user = profile.id.clone();
        let (availability, last_partner) = match self.online.get(&user) {
            Some(prev) => (prev.availability.clone(), prev.last_partner.clone()),
            None => (Availability::Idle, None),
        };
        let previous = self.online.insert(
            user,
            Connection {
                conn_id,
                profile,
                sender,
                availability,
                last_partner,
            },
        );
        (conn_id, previous)
    }

    /// Removes the user only if `conn_id` is still the live connection.
    pub fn unregister(&mut self, user: &str, conn_id: ConnId) -> Option<Connection> {
        match self.online.get(user) {
            Some(conn) if conn.conn_id == conn_id => self.online.remove(user),
            _ => None,
        }
    }

    pub fn is_current(&self, user: &str, conn_id: ConnId) -> bool {
        self.online.get(user).is_some_and(|c| c.conn_id == conn_id)
    }

    pub fn is_online(&self, user: &str) -> bool {
        self.online.contains_key(user)
    }

    pub fn get(&self, user: &str) -> Option<&Connection> {
        self.online.get(user)
    }

    pub fn sender(&self, user: &str) -> Option<ClientTx> {
        self.online.get(user).map(|c| c.sender.clone())
    }

    pub fn availability(&self, user: &str) -> Option<&Availability> {
        self.online.get(user).map(|c| &c.availability)
    }

    pub fn set_availability(&mut self, user: &str, availability: Availability) {
        if let Some(conn) = self.online.get_mut(user) {
            conn.availability = availability;
        }
    }

    pub fn set_last_partner(&mut self, user: &str, partner: Party) {
        if let Some(conn) = self.online.get_mut(user) {
            conn.last_partner = Some(partner);
        }
    }

    pub fn len(&self) -> usize {
        self.online.len()
    }
}
