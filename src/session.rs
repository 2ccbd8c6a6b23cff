// session.rs
use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::SessionConfig;
use crate::message::ChatMessage;
use crate::persona::Persona;
use crate::profile::UserId;

pub type SessionId = String;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Partner {
    Human(UserId),
    Bot { bot: UserId, persona: Persona },
}

/// One side of a chat as seen from the other. Bots carry no id here, so a
/// human whose id looks like a bot's is still a human.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Party {
    Human(UserId),
    Bot,
}

/// A transcript entry, tagged with who said it when it was stored.
#[derive(Debug, Clone)]
pub struct Line {
    pub speaker: Party,
    pub message: ChatMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Active,
    /// Warning sent; the chat ends at the expiry timer.
    Closing,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub human: UserId,
    pub partner: Partner,
    pub started_at: DateTime<Utc>,
    pub phase: Phase,
    pub transcript: Vec<Line>,
}

impl Session {
    pub fn new(human: UserId, partner: Partner) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            human,
            partner,
            started_at: Utc::now(),
            phase: Phase::Active,
            transcript: Vec::new(),
        }
    }

    pub fn is_bot(&self) -> bool {
        matches!(self.partner, Partner::Bot { .. })
    }

    /// The other side of the chat, from `user`'s point of view.
    pub fn counterpart(&self, user: &str) -> Option<Party> {
        if self.human == user {
            return Some(match &self.partner {
                Partner::Human(other) => Party::Human(other.clone()),
                Partner::Bot { .. } => Party::Bot,
            });
        }
        match &self.partner {
            Partner::Human(other) if other == user => Some(Party::Human(self.human.clone())),
            _ => None,
        }
    }

    pub fn record(&mut self, speaker: Party, message: ChatMessage) {
        self.transcript.push(Line { speaker, message });
    }

    /// Human participants, the ones that receive events.
    pub fn humans(&self) -> Vec<&str> {
        match &self.partner {
            Partner::Human(other) => vec![self.human.as_str(), other.as_str()],
            Partner::Bot { .. } => vec![self.human.as_str()],
        }
    }

    pub fn persona(&self) -> Option<&Persona> {
        match &self.partner {
            Partner::Bot { persona, .. } => Some(persona),
            Partner::Human(_) => None,
        }
    }
}

/// How long a chat lasts and when the warning goes out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimings {
    pub duration: Duration,
    pub warn_after: Duration,
}

impl SessionTimings {
    pub fn from_config(cfg: &SessionConfig) -> Self {
        let (total, warn) = if cfg.test_mode {
            (cfg.test_duration_secs, cfg.test_warn_after_secs)
        } else {
            (cfg.duration_secs, cfg.warn_after_secs)
        };
        let duration = Duration::from_secs(total);
        Self {
            duration,
            warn_after: Duration::from_secs(warn).min(duration),
        }
    }

    pub fn remaining_at_warning(&self) -> Duration {
        self.duration.saturating_sub(self.warn_after)
    }
}

#[derive(Debug, Default)]
pub struct SessionBook {
    sessions: HashMap<SessionId, Session>,
}

impl SessionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, session: Session) -> SessionId {
        let id = session.id.clone();
        self.sessions.insert(id.clone(), session);
        id
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<Session> {
        self.sessions.remove(id)
    }
}
