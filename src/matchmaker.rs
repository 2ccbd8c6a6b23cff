// matchmaker.rs
use std::collections::HashSet;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::bot::{BotRoster, ReplyRequest, Turn};
use crate::config::Config;
use crate::error::ChatError;
use crate::message::{ChatMessage, EndReason, PartnerProfile, ServerEvent};
use crate::persona::{scripted_farewell, Persona};
use crate::pool::{SearchTicket, Searcher, WaitingPool};
use crate::presence::{Availability, ClientTx, ConnId, PresenceRegistry};
use crate::profile::{Preference, UserId, UserProfile};
use crate::session::{Partner, Party, Phase, Session, SessionBook, SessionId, SessionTimings};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timer {
    BotFallback { user: UserId, ticket: SearchTicket },
    SessionWarning(SessionId),
    SessionExpiry(SessionId),
}

#[derive(Debug, Clone)]
pub enum Effect {
    Send { to: UserId, event: ServerEvent },
    Schedule { after: Duration, timer: Timer },
    /// Ask the text generator for the bot's next line in this chat.
    BotReply { session_id: SessionId, request: ReplyRequest },
    /// Both users asked to be friends.
    Befriend { a: UserId, b: UserId },
}

fn send(to: &str, event: ServerEvent) -> Effect {
    Effect::Send {
        to: to.to_string(),
        event,
    }
}

fn human_profile(profile: &UserProfile) -> PartnerProfile {
    PartnerProfile {
        name: profile.name.clone(),
        gender: profile.gender,
        age: profile.age,
        city: None,
        avatar: None,
    }
}

/// Owns every piece of live state: who is online, who is searching, running
/// chats, the bot roster and pending friend requests. Operations return
/// [`Effect`]s for the hub to carry out. Timers carry a search ticket or
/// session id and do nothing once stale.
pub struct Matchmaker {
    presence: PresenceRegistry,
    pool: WaitingPool,
    sessions: SessionBook,
    bots: BotRoster,
    /// (from, to)
    friend_requests: HashSet<(UserId, UserId)>,
    timings: SessionTimings,
    bot_fallback: Duration,
    max_message_len: usize,
    avatar_base: String,
    next_ticket: SearchTicket,
    rng: StdRng,
}

impl Matchmaker {
    pub fn new(config: &Config) -> Self {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    pub fn with_rng(config: &Config, rng: StdRng) -> Self {
        Self {
            presence: PresenceRegistry::new(),
            pool: WaitingPool::new(),
            sessions: SessionBook::new(),
            bots: BotRoster::new(config.bot.pool_size),
            friend_requests: HashSet::new(),
            timings: SessionTimings::from_config(&config.session),
            bot_fallback: config.matching.bot_fallback(),
            max_message_len: config.matching.max_message_len,
            avatar_base: config.bot.avatar_base_url.clone(),
            next_ticket: 0,
            rng,
        }
    }

    pub fn is_current(&self, user: &str, conn_id: ConnId) -> bool {
        self.presence.is_current(user, conn_id)
    }

    pub fn is_online(&self, user: &str) -> bool {
        self.presence.is_online(user)
    }

    pub fn sender(&self, user: &str) -> Option<ClientTx> {
        self.presence.sender(user)
    }

    pub fn profile(&self, user: &str) -> Option<&UserProfile> {
        self.presence.get(user).map(|c| &c.profile)
    }

    #[cfg(test)]
    pub fn availability(&self, user: &str) -> Option<&Availability> {
        self.presence.availability(user)
    }

    #[cfg(test)]
    pub fn session(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    #[cfg(test)]
    pub fn waiting(&self) -> usize {
        self.pool.len()
    }

    #[cfg(test)]
    pub fn free_bots(&self) -> usize {
        self.bots.available()
    }

    /// Registers a socket. Returns the connection id and the sender of the
    /// socket it replaced, if the user was already online.
    pub fn connect(&mut self, profile: UserProfile, sender: ClientTx) -> (ConnId, Option<ClientTx>, Vec<Effect>) {
        let user = profile.id.clone();
        let (conn_id, previous) = self.presence.register(profile, sender);
        if previous.is_some() {
            tracing::info!(user = %user, "connection replaced");
        }
        let effects = vec![send(&user, ServerEvent::Connected { user_id: user.clone() })];
        (conn_id, previous.map(|c| c.sender), effects)
    }

    /// Tears down everything the user was part of. `None` when `conn_id`
    /// is not the live connection (the user already reconnected).
    pub fn disconnect(&mut self, user: &str, conn_id: ConnId) -> Option<Vec<Effect>> {
        let conn = self.presence.unregister(user, conn_id)?;
        let mut effects = Vec::new();

        self.pool.remove(user);
        if let Some(session_id) = conn.availability.session() {
            self.end_session(session_id, Some(user), EndReason::PartnerDisconnected, &mut effects);
        }
        self.friend_requests.retain(|(from, to)| from != user && to != user);

        tracing::info!(user = %user, online = self.presence.len(), "user disconnected");
        Some(effects)
    }

    pub fn find_match(&mut self, user: &str, preference: Preference) -> Result<Vec<Effect>, ChatError> {
        let conn = self.presence.get(user).ok_or(ChatError::Internal)?;
        match conn.availability {
            Availability::Idle => {}
            Availability::Searching => return Err(ChatError::AlreadySearching),
            Availability::Matched(_) | Availability::InBotChat(_) => return Err(ChatError::AlreadyInChat),
        }

        self.next_ticket += 1;
        let searcher = Searcher {
            user: user.to_string(),
            gender: conn.profile.gender,
            preference,
            ticket: self.next_ticket,
        };

        if let Some(other) = self.pool.take_compatible(&searcher) {
            return Ok(self.start_human_session(user, &other.user));
        }

        let ticket = searcher.ticket;
        self.pool.join(searcher);
        self.presence.set_availability(user, Availability::Searching);
        tracing::debug!(user = %user, ?preference, waiting = self.pool.len(), "joined waiting pool");

        Ok(vec![
            send(user, ServerEvent::Searching),
            Effect::Schedule {
                after: self.bot_fallback,
                timer: Timer::BotFallback {
                    user: user.to_string(),
                    ticket,
                },
            },
        ])
    }

    pub fn cancel_search(&mut self, user: &str) -> Result<Vec<Effect>, ChatError> {
        self.pool.remove(user).ok_or(ChatError::NotSearching)?;
        self.presence.set_availability(user, Availability::Idle);
        Ok(vec![send(user, ServerEvent::SearchCancelled)])
    }

    fn start_human_session(&mut self, a: &str, b: &str) -> Vec<Effect> {
        let (Some(a_profile), Some(b_profile)) = (self.profile(a).cloned(), self.profile(b).cloned()) else {
            return Vec::new();
        };
        let session = Session::new(a.to_string(), Partner::Human(b.to_string()));
        let session_id = self.sessions.insert(session);
        self.presence.set_availability(a, Availability::Matched(session_id.clone()));
        self.presence.set_availability(b, Availability::Matched(session_id.clone()));
        tracing::info!(session = %session_id, a = %a, b = %b, "matched");

        let duration_secs = self.timings.duration.as_secs();
        let mut effects = vec![
            send(
                a,
                ServerEvent::MatchFound {
                    session_id: session_id.clone(),
                    partner: human_profile(&b_profile),
                    duration_secs,
                },
            ),
            send(
                b,
                ServerEvent::MatchFound {
                    session_id: session_id.clone(),
                    partner: human_profile(&a_profile),
                    duration_secs,
                },
            ),
        ];
        self.arm_session_timers(&session_id, &mut effects);
        effects
    }

    fn arm_session_timers(&self, session_id: &str, effects: &mut Vec<Effect>) {
        effects.push(Effect::Schedule {
            after: self.timings.warn_after,
            timer: Timer::SessionWarning(session_id.to_string()),
        });
        effects.push(Effect::Schedule {
            after: self.timings.duration,
            timer: Timer::SessionExpiry(session_id.to_string()),
        });
    }

    /// Nobody compatible showed up in time: hand the searcher to a bot.
    pub fn bot_fallback_due(&mut self, user: &str, ticket: SearchTicket) -> Vec<Effect> {
        if self.pool.ticket_of(user) != Some(ticket) {
            tracing::debug!(user = %user, ticket, "stale bot fallback");
            return Vec::new();
        }
        let Some(bot) = self.bots.checkout() else {
            tracing::warn!(user = %user, "no free bot, keep waiting");
            return vec![Effect::Schedule {
                after: self.bot_fallback,
                timer: Timer::BotFallback {
                    user: user.to_string(),
                    ticket,
                },
            }];
        };
        let Some(searcher) = self.pool.remove(user) else {
            self.bots.release(&bot);
            return Vec::new();
        };

        let persona = Persona::generate(&mut self.rng, searcher.gender, searcher.preference, &self.avatar_base);
        let partner = persona.partner_profile();
        let session = Session::new(
            user.to_string(),
            Partner::Bot {
                bot: bot.clone(),
                persona: persona.clone(),
            },
        );
        let session_id = self.sessions.insert(session);
        self.presence.set_availability(user, Availability::InBotChat(session_id.clone()));
        tracing::info!(
            session = %session_id,
            user = %user,
            bot = %bot,
            persona = %persona.name,
            free_bots = self.bots.available(),
            "bot fallback"
        );

        let mut effects = vec![send(
            user,
            ServerEvent::MatchFound {
                session_id: session_id.clone(),
                partner,
                duration_secs: self.timings.duration.as_secs(),
            },
        )];
        self.arm_session_timers(&session_id, &mut effects);
        effects.push(Effect::BotReply {
            session_id,
            request: ReplyRequest {
                persona,
                history: Vec::new(),
            },
        });
        effects
    }

    fn current_session(&self, user: &str) -> Result<&Session, ChatError> {
        self.presence
            .availability(user)
            .and_then(|a| a.session())
            .and_then(|id| self.sessions.get(id))
            .ok_or(ChatError::NotInChat)
    }

    pub fn send_message(&mut self, user: &str, text: &str) -> Result<Vec<Effect>, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if text.chars().count() > self.max_message_len {
            return Err(ChatError::MessageTooLong(self.max_message_len));
        }

        let name = self.profile(user).map(|p| p.name.clone()).ok_or(ChatError::Internal)?;
        let session_id = self.current_session(user)?.id.clone();
        let session = self.sessions.get_mut(&session_id).ok_or(ChatError::NotInChat)?;
        let message = ChatMessage::new(&name, text);
        session.record(Party::Human(user.to_string()), message.clone());

        let mut effects: Vec<Effect> = session
            .humans()
            .into_iter()
            .map(|to| {
                send(
                    to,
                    ServerEvent::Message {
                        session_id: session_id.clone(),
                        message: message.clone(),
                        mine: to == user,
                    },
                )
            })
            .collect();

        if let Some(request) = reply_request(session) {
            effects.push(Effect::BotReply { session_id, request });
        }
        Ok(effects)
    }

    /// Typing outside a chat is dropped silently.
    pub fn typing(&self, user: &str) -> Vec<Effect> {
        let Ok(session) = self.current_session(user) else {
            return Vec::new();
        };
        match session.counterpart(user) {
            Some(Party::Human(to)) => vec![send(
                &to,
                ServerEvent::Typing {
                    session_id: session.id.clone(),
                },
            )],
            _ => Vec::new(),
        }
    }

    pub fn leave_chat(&mut self, user: &str) -> Result<Vec<Effect>, ChatError> {
        let session_id = self.current_session(user)?.id.clone();
        let mut effects = Vec::new();
        self.end_session(&session_id, Some(user), EndReason::PartnerLeft, &mut effects);
        Ok(effects)
    }

    /// Delivers a generated bot line, unless the chat is already over.
    pub fn bot_said(&mut self, session_id: &str, text: &str) -> Vec<Effect> {
        let Some(session) = self.sessions.get_mut(session_id) else {
            tracing::debug!(session = %session_id, "bot reply for finished chat dropped");
            return Vec::new();
        };
        let Some(name) = session.persona().map(|p| p.name.clone()) else {
            return Vec::new();
        };
        let message = ChatMessage::new(&name, text);
        session.record(Party::Bot, message.clone());
        vec![send(
            &session.human,
            ServerEvent::Message {
                session_id: session_id.to_string(),
                message,
                mine: false,
            },
        )]
    }

    /// Typing indicator shown while a bot line is being produced.
    pub fn bot_typing(&self, session_id: &str) -> Vec<Effect> {
        match self.sessions.get(session_id) {
            Some(session) if session.is_bot() => vec![send(
                &session.human,
                ServerEvent::Typing {
                    session_id: session_id.to_string(),
                },
            )],
            _ => Vec::new(),
        }
    }

    pub fn session_warning_due(&mut self, session_id: &str) -> Vec<Effect> {
        let remaining_secs = self.timings.remaining_at_warning().as_secs();
        let Some(session) = self.sessions.get_mut(session_id) else {
            return Vec::new();
        };
        if session.phase != Phase::Active {
            return Vec::new();
        }
        session.phase = Phase::Closing;
        session
            .humans()
            .into_iter()
            .map(|to| {
                send(
                    to,
                    ServerEvent::TimeWarning {
                        session_id: session_id.to_string(),
                        remaining_secs,
                    },
                )
            })
            .collect()
    }

    /// Time is up. A bot says goodbye before the chat closes.
    pub fn session_expired(&mut self, session_id: &str) -> Vec<Effect> {
        let is_bot = match self.sessions.get(session_id) {
            Some(session) => session.is_bot(),
            None => return Vec::new(),
        };
        let mut effects = if is_bot {
            let farewell = scripted_farewell(&mut self.rng);
            self.bot_said(session_id, &farewell)
        } else {
            Vec::new()
        };
        self.end_session(session_id, None, EndReason::Timeout, &mut effects);
        effects
    }

    /// `ended_by` gets `left`; everyone else gets `reason`.
    fn end_session(&mut self, session_id: &str, ended_by: Option<&str>, reason: EndReason, effects: &mut Vec<Effect>) {
        let Some(session) = self.sessions.remove(session_id) else {
            return;
        };
        for human in session.humans() {
            self.presence.set_availability(human, Availability::Idle);
            if let Some(other) = session.counterpart(human) {
                self.presence.set_last_partner(human, other);
            }
            let reason = if ended_by == Some(human) { EndReason::Left } else { reason };
            effects.push(send(
                human,
                ServerEvent::SessionEnded {
                    session_id: session_id.to_string(),
                    reason,
                },
            ));
        }
        if let Partner::Bot { bot, .. } = &session.partner {
            self.bots.release(bot);
        }
        tracing::info!(
            session = %session_id,
            ?reason,
            messages = session.transcript.len(),
            lasted_secs = (chrono::Utc::now() - session.started_at).num_seconds(),
            "chat ended"
        );
    }

    /// Friend request to the current partner, or the last one once the chat
    /// is over. A request meeting one in the other direction confirms.
    pub fn add_friend(&mut self, user: &str) -> Result<Vec<Effect>, ChatError> {
        let conn = self.presence.get(user).ok_or(ChatError::Internal)?;
        let partner = self
            .current_session(user)
            .ok()
            .and_then(|s| s.counterpart(user))
            .or_else(|| conn.last_partner.clone())
            .ok_or(ChatError::NoPartner)?;
        let name = conn.profile.name.clone();

        let target = match partner {
            Party::Human(id) => id,
            // bots never answer
            Party::Bot => return Ok(Vec::new()),
        };
        if !self.presence.is_online(&target) {
            return Err(ChatError::PartnerOffline);
        }

        if self.friend_requests.remove(&(target.clone(), user.to_string())) {
            tracing::info!(a = %user, b = %target, "friendship confirmed");
            return Ok(vec![Effect::Befriend {
                a: user.to_string(),
                b: target,
            }]);
        }

        self.friend_requests.insert((user.to_string(), target.clone()));
        Ok(vec![send(
            &target,
            ServerEvent::FriendRequest {
                from: user.to_string(),
                name,
            },
        )])
    }

    /// Splits effects into deliveries (resolved to live senders, offline
    /// recipients dropped) and the rest.
    pub fn route(&self, effects: Vec<Effect>) -> (Vec<(ClientTx, ServerEvent)>, Vec<Effect>) {
        let mut deliveries = Vec::new();
        let mut rest = Vec::new();
        for effect in effects {
            match effect {
                Effect::Send { to, event } => {
                    if let Some(tx) = self.presence.sender(&to) {
                        deliveries.push((tx, event));
                    }
                }
                other => rest.push(other),
            }
        }
        (deliveries, rest)
    }
}

fn reply_request(session: &Session) -> Option<ReplyRequest> {
    let persona = session.persona()?.clone();
    let history = session
        .transcript
        .iter()
        .map(|line| Turn {
            from_bot: line.speaker == Party::Bot,
            text: line.message.text.clone(),
        })
        .collect();
    Some(ReplyRequest { persona, history })
}
