// hub.rs
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::bot::Responder;
use crate::config::Config;
use crate::error::{ChatError, StoreError};
use crate::friends::FriendStore;
use crate::matchmaker::{Effect, Matchmaker, Timer};
use crate::message::{ClientEvent, FriendSummary, ServerEvent};
use crate::persona::{scripted_opener, scripted_reply};
use crate::presence::{ClientTx, ConnId};
use crate::profile::UserProfile;

const HISTORY_LIMIT: usize = 50;

pub type SharedHub = Arc<Hub>;

/// Runs the matchmaker: delivers its events, arms its timers, calls the
/// text generator and keeps the friends store in sync.
pub struct Hub {
    matchmaker: Mutex<Matchmaker>,
    store: Mutex<FriendStore>,
    responder: Box<dyn Responder>,
    reply_delay: Duration,
    max_message_len: usize,
}

fn send_all(deliveries: Vec<(ClientTx, ServerEvent)>) {
    for (tx, event) in deliveries {
        tx.send(event).ok();
    }
}

fn fallback_line(opener: bool) -> String {
    let mut rng = rand::rng();
    if opener {
        scripted_opener(&mut rng)
    } else {
        scripted_reply(&mut rng)
    }
}

fn store_failed(e: StoreError) -> ChatError {
    tracing::error!(error = %e, "friends store failure");
    ChatError::Internal
}

impl Hub {
    pub fn new(config: &Config, store: FriendStore, responder: Box<dyn Responder>) -> SharedHub {
        Self::with_matchmaker(config, Matchmaker::new(config), store, responder)
    }

    pub fn with_matchmaker(
        config: &Config,
        matchmaker: Matchmaker,
        store: FriendStore,
        responder: Box<dyn Responder>,
    ) -> SharedHub {
        Arc::new(Self {
            matchmaker: Mutex::new(matchmaker),
            store: Mutex::new(store),
            responder,
            reply_delay: Duration::from_millis(config.bot.reply_delay_ms),
            max_message_len: config.matching.max_message_len,
        })
    }

    // Poisoned locks are recovered.
    fn matchmaker(&self) -> MutexGuard<'_, Matchmaker> {
        self.matchmaker.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn store(&self) -> MutexGuard<'_, FriendStore> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn connect(self: &Arc<Self>, profile: UserProfile, tx: ClientTx) -> ConnId {
        let user = profile.id.clone();
        if let Err(e) = self.store().upsert_user(&profile) {
            tracing::error!(user = %user, error = %e, "failed to record user");
        }

        let (conn_id, replaced, effects) = self.matchmaker().connect(profile, tx);
        if let Some(old) = replaced {
            old.send(ServerEvent::Replaced).ok();
        }
        self.apply(effects);
        self.announce_presence(&user, true);
        tracing::info!(user = %user, "user connected");
        conn_id
    }

    pub fn disconnect(self: &Arc<Self>, user: &str, conn_id: ConnId) {
        let Some(effects) = self.matchmaker().disconnect(user, conn_id) else {
            tracing::debug!(user = %user, "stale connection closed");
            return;
        };
        self.apply(effects);
        self.announce_presence(user, false);
    }

    fn announce_presence(&self, user: &str, online: bool) {
        let friends = match self.store().list_friends(user) {
            Ok(friends) => friends,
            Err(e) => {
                tracing::error!(user = %user, error = %e, "failed to load friends");
                return;
            }
        };
        let mm = self.matchmaker();
        let deliveries: Vec<_> = friends
            .iter()
            .filter_map(|f| mm.sender(&f.id))
            .map(|tx| {
                (
                    tx,
                    ServerEvent::FriendPresence {
                        friend: user.to_string(),
                        online,
                    },
                )
            })
            .collect();
        drop(mm);
        send_all(deliveries);
    }

    /// Entry point for every parsed client frame.
    pub fn handle(self: &Arc<Self>, user: &str, conn_id: ConnId, event: ClientEvent) {
        if !self.matchmaker().is_current(user, conn_id) {
            tracing::debug!(user = %user, "event from replaced connection ignored");
            return;
        }

        let result = match event {
            ClientEvent::FindMatch { preference } => self.matchmaker().find_match(user, preference),
            ClientEvent::CancelSearch => self.matchmaker().cancel_search(user),
            ClientEvent::SendMessage { text } => self.matchmaker().send_message(user, &text),
            ClientEvent::Typing => Ok(self.matchmaker().typing(user)),
            ClientEvent::LeaveChat => self.matchmaker().leave_chat(user),
            ClientEvent::AddFriend => self.matchmaker().add_friend(user),
            ClientEvent::FriendMessage { to, text } => self.friend_message(user, &to, &text),
            ClientEvent::FriendHistory { friend } => self.friend_history(user, &friend),
            ClientEvent::ListFriends => self.list_friends(user),
        };

        match result {
            Ok(effects) => self.apply(effects),
            Err(e) => self.reject(user, e),
        }
    }

    /// Parses one text frame from `conn_id` and handles it.
    pub fn handle_text(self: &Arc<Self>, user: &str, conn_id: ConnId, text: &str) {
        match ClientEvent::parse(text) {
            Ok(event) => self.handle(user, conn_id, event),
            Err(e) => self.reject_frame(user, conn_id, e),
        }
    }

    /// Rejects a frame that could not be handled. Frames from a replaced
    /// connection are dropped, the error would reach the new socket.
    pub fn reject_frame(&self, user: &str, conn_id: ConnId, error: ChatError) {
        if self.matchmaker().is_current(user, conn_id) {
            self.reject(user, error);
        }
    }

    /// Reports a rejected operation to the user alone.
    fn reject(&self, user: &str, error: ChatError) {
        tracing::debug!(user = %user, code = error.code(), "rejected");
        if let Some(tx) = self.matchmaker().sender(user) {
            tx.send(error.into()).ok();
        }
    }

    fn friend_message(&self, user: &str, to: &str, text: &str) -> Result<Vec<Effect>, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if text.chars().count() > self.max_message_len {
            return Err(ChatError::MessageTooLong(self.max_message_len));
        }

        let store = self.store();
        if !store.are_friends(user, to).map_err(store_failed)? {
            return Err(ChatError::NotFriends(to.to_string()));
        }
        let message = store.append_message(user, to, text).map_err(store_failed)?;
        drop(store);

        Ok([user, to]
            .into_iter()
            .map(|recipient| Effect::Send {
                to: recipient.to_string(),
                event: ServerEvent::FriendMessage {
                    message: message.clone(),
                },
            })
            .collect())
    }

    fn friend_history(&self, user: &str, friend: &str) -> Result<Vec<Effect>, ChatError> {
        let store = self.store();
        if !store.are_friends(user, friend).map_err(store_failed)? {
            return Err(ChatError::NotFriends(friend.to_string()));
        }
        let messages = store.history(user, friend, HISTORY_LIMIT).map_err(store_failed)?;
        drop(store);
        Ok(vec![Effect::Send {
            to: user.to_string(),
            event: ServerEvent::FriendHistory {
                friend: friend.to_string(),
                messages,
            },
        }])
    }

    fn list_friends(&self, user: &str) -> Result<Vec<Effect>, ChatError> {
        let records = self.store().list_friends(user).map_err(store_failed)?;
        let mm = self.matchmaker();
        let friends = records
            .into_iter()
            .map(|f| FriendSummary {
                online: mm.is_online(&f.id),
                id: f.id,
                name: f.name,
            })
            .collect();
        drop(mm);
        Ok(vec![Effect::Send {
            to: user.to_string(),
            event: ServerEvent::FriendList { friends },
        }])
    }

    /// Carries out matchmaker effects. Senders are collected under the lock
    /// and used after it is released.
    pub fn apply(self: &Arc<Self>, effects: Vec<Effect>) {
        if effects.is_empty() {
            return;
        }
        let (deliveries, rest) = self.matchmaker().route(effects);
        send_all(deliveries);

        for effect in rest {
            match effect {
                Effect::Schedule { after, timer } => self.schedule(after, timer),
                Effect::BotReply { session_id, request } => {
                    let hub = Arc::clone(self);
                    tokio::spawn(async move {
                        let typing = hub.matchmaker().bot_typing(&session_id);
                        hub.apply(typing);
                        tokio::time::sleep(hub.reply_delay).await;
                        let opener = request.history.is_empty();
                        let text = match hub.responder.reply(&request).await {
                            Ok(text) => text,
                            Err(e) => {
                                tracing::warn!(session = %session_id, error = %e, "text generator failed, using scripted line");
                                fallback_line(opener)
                            }
                        };
                        let effects = hub.matchmaker().bot_said(&session_id, &text);
                        hub.apply(effects);
                    });
                }
                Effect::Befriend { a, b } => self.befriend(&a, &b),
                Effect::Send { .. } => {}
            }
        }
    }

    fn schedule(self: &Arc<Self>, after: Duration, timer: Timer) {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            hub.fire(timer);
        });
    }

    fn fire(self: &Arc<Self>, timer: Timer) {
        let mut mm = self.matchmaker();
        let effects = match &timer {
            Timer::BotFallback { user, ticket } => mm.bot_fallback_due(user, *ticket),
            Timer::SessionWarning(id) => mm.session_warning_due(id),
            Timer::SessionExpiry(id) => mm.session_expired(id),
        };
        drop(mm);
        self.apply(effects);
    }

    fn befriend(self: &Arc<Self>, a: &str, b: &str) {
        let store = self.store();
        if let Err(e) = store.add_friendship(a, b) {
            tracing::error!(a = %a, b = %b, error = %e, "failed to store friendship");
            drop(store);
            self.reject(a, ChatError::Internal);
            return;
        }
        let name_of = |id: &str| -> String {
            match store.user(id) {
                Ok(Some(profile)) => profile.name,
                _ => id.to_string(),
            }
        };
        let a_name = name_of(a);
        let b_name = name_of(b);
        drop(store);

        let mm = self.matchmaker();
        let deliveries: Vec<_> = [(a, b, b_name), (b, a, a_name)]
            .into_iter()
            .filter_map(|(to, friend, name)| {
                let tx = mm.sender(to)?;
                Some((
                    tx,
                    ServerEvent::FriendAdded {
                        friend: FriendSummary {
                            id: friend.to_string(),
                            name,
                            online: mm.is_online(friend),
                        },
                    },
                ))
            })
            .collect();
        drop(mm);
        send_all(deliveries);
    }
}
