// bot.rs
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::BotConfig;
use crate::error::BotError;
use crate::persona::{scripted_opener, scripted_reply, Persona};
use crate::profile::UserId;

const RETRY_DELAY_MS: u64 = 500;

/// Fixed set of bot identities. A bot serves one chat at a time.
#[derive(Debug)]
pub struct BotRoster {
    slots: Vec<(UserId, bool)>,
}

impl BotRoster {
    pub fn new(size: usize) -> Self {
        Self {
            slots: (1..=size).map(|n| (format!("bot-{n}"), false)).collect(),
        }
    }

    /// Marks the first free bot busy and returns its id.
    pub fn checkout(&mut self) -> Option<UserId> {
        let slot = self.slots.iter_mut().find(|(_, busy)| !busy)?;
        slot.1 = true;
        Some(slot.0.clone())
    }

    pub fn release(&mut self, bot: &str) {
        if let Some(slot) = self.slots.iter_mut().find(|(id, _)| id == bot) {
            slot.1 = false;
        }
    }

    pub fn available(&self) -> usize {
        self.slots.iter().filter(|(_, busy)| !busy).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub from_bot: bool,
    pub text: String,
}

/// Everything the generator needs to produce the bot's next line.
/// An empty history asks for an opener.
#[derive(Debug, Clone)]
pub struct ReplyRequest {
    pub persona: Persona,
    pub history: Vec<Turn>,
}

#[async_trait]
pub trait Responder: Send + Sync {
    async fn reply(&self, request: &ReplyRequest) -> Result<String, BotError>;
}

/// Canned lines. Used when no generator is configured.
#[derive(Debug, Default)]
pub struct ScriptedResponder;

#[async_trait]
impl Responder for ScriptedResponder {
    async fn reply(&self, request: &ReplyRequest) -> Result<String, BotError> {
        let mut rng = rand::rng();
        Ok(if request.history.is_empty() {
            scripted_opener(&mut rng)
        } else {
            scripted_reply(&mut rng)
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Serialize, Debug)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize, Debug)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: WireMessage,
}

/// Talks to an OpenAI-compatible chat completions endpoint.
pub struct HttpResponder {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
    /// Extra attempts after the first one fails.
    max_retries: u32,
}

impl HttpResponder {
    pub fn new(cfg: &BotConfig) -> Result<Self, BotError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_url: cfg.api_url.clone(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            max_retries: cfg.max_retries,
        })
    }

    async fn request_once(&self, body: &CompletionRequest<'_>) -> Result<String, BotError> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(BotError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| BotError::Decode(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(BotError::Empty);
        }
        Ok(content)
    }
}

#[async_trait]
impl Responder for HttpResponder {
    async fn reply(&self, request: &ReplyRequest) -> Result<String, BotError> {
        let body = CompletionRequest {
            model: &self.model,
            messages: build_messages(request),
            max_tokens: 80,
            temperature: 0.9,
        };

        let mut retry = 0;
        loop {
            match self.request_once(&body).await {
                Ok(text) => return Ok(text),
                Err(e) if retry >= self.max_retries => return Err(e),
                Err(e) => {
                    retry += 1;
                    tracing::warn!(retry, max_retries = self.max_retries, error = %e, "bot reply failed, retrying");
                    tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS * retry as u64)).await;
                }
            }
        }
    }
}

fn system_prompt(persona: &Persona) -> String {
    format!(
        "You are {}, a {}-year-old {} from {} chatting with a stranger on a random chat app. \
         Write like a real person texting: short, casual, lowercase is fine, one or two sentences. \
         Ask questions back now and then. Never say you are an AI or a bot.",
        persona.name, persona.age, persona.gender, persona.city
    )
}

fn build_messages(request: &ReplyRequest) -> Vec<WireMessage> {
    let mut messages = vec![WireMessage {
        role: "system".into(),
        content: system_prompt(&request.persona),
    }];
    if request.history.is_empty() {
        messages.push(WireMessage {
            role: "user".into(),
            content: "(you were just matched with someone, say hi first)".into(),
        });
    } else {
        messages.extend(request.history.iter().map(|turn| WireMessage {
            role: if turn.from_bot { "assistant" } else { "user" }.into(),
            content: turn.text.clone(),
        }));
    }
    messages
}

/// Generator backed by the API when a key is configured, canned lines otherwise.
pub fn responder_from_config(cfg: &BotConfig) -> Result<Box<dyn Responder>, BotError> {
    if cfg.api_key.is_empty() {
        tracing::info!("no bot api key configured, using scripted replies");
        Ok(Box::new(ScriptedResponder))
    } else {
        tracing::info!(url = %cfg.api_url, model = %cfg.model, "bot replies via text generator");
        Ok(Box::new(HttpResponder::new(cfg)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{Gender, Preference};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use warp::Filter;

    fn persona() -> Persona {
        Persona {
            name: "Leo".into(),
            age: 24,
            city: "Dublin".into(),
            gender: Gender::Male,
            preference: Preference::Any,
            avatar: "a.jpg".into(),
        }
    }

    #[test]
    fn roster_checkout_and_release() {
        let mut roster = BotRoster::new(2);
        assert_eq!(roster.checkout().as_deref(), Some("bot-1"));
        assert_eq!(roster.checkout().as_deref(), Some("bot-2"));
        assert!(roster.checkout().is_none());
        roster.release("bot-1");
        assert_eq!(roster.available(), 1);
        assert_eq!(roster.checkout().as_deref(), Some("bot-1"));
    }

    #[test]
    fn opener_prompt_has_no_history() {
        let msgs = build_messages(&ReplyRequest {
            persona: persona(),
            history: vec![],
        });
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, "system");
        assert!(msgs[0].content.contains("Leo"));
        assert!(msgs[0].content.contains("Dublin"));
        assert_eq!(msgs[1].role, "user");
    }

    #[test]
    fn history_maps_to_roles() {
        let msgs = build_messages(&ReplyRequest {
            persona: persona(),
            history: vec![
                Turn { from_bot: true, text: "hey".into() },
                Turn { from_bot: false, text: "hi!".into() },
            ],
        });
        let roles: Vec<&str> = msgs.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "assistant", "user"]);
    }

    #[tokio::test]
    async fn scripted_responder_always_answers() {
        let text = ScriptedResponder
            .reply(&ReplyRequest { persona: persona(), history: vec![] })
            .await
            .unwrap();
        assert!(!text.is_empty());
    }

    fn bot_config(url: String, max_retries: u32) -> BotConfig {
        BotConfig {
            api_url: url,
            api_key: "test-key".into(),
            max_retries,
            timeout_secs: 5,
            ..BotConfig::default()
        }
    }

    #[tokio::test]
    async fn http_responder_reads_first_choice() {
        let route = warp::post()
            .and(warp::header::<String>("authorization"))
            .and(warp::body::json())
            .map(|auth: String, body: serde_json::Value| {
                assert_eq!(auth, "Bearer test-key");
                assert_eq!(body["messages"][0]["role"], "system");
                warp::reply::json(&serde_json::json!({
                    "choices": [{ "message": { "role": "assistant", "content": "  hey you  " } }]
                }))
            });
        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        let responder = HttpResponder::new(&bot_config(format!("http://{addr}/"), 0)).unwrap();
        let text = responder
            .reply(&ReplyRequest { persona: persona(), history: vec![] })
            .await
            .unwrap();
        assert_eq!(text, "hey you");
    }

    #[tokio::test]
    async fn http_responder_retries_after_the_first_attempt() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let route = warp::post().map(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            warp::reply::with_status("overloaded", warp::http::StatusCode::SERVICE_UNAVAILABLE)
        });
        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        let responder = HttpResponder::new(&bot_config(format!("http://{addr}/"), 2)).unwrap();
        let err = responder
            .reply(&ReplyRequest { persona: persona(), history: vec![] })
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::Status { status: 503, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        hits.store(0, Ordering::SeqCst);
        let no_retry = HttpResponder::new(&bot_config(format!("http://{addr}/"), 0)).unwrap();
        no_retry
            .reply(&ReplyRequest { persona: persona(), history: vec![] })
            .await
            .unwrap_err();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_choices_is_an_error() {
        let route = warp::post().map(|| warp::reply::json(&serde_json::json!({ "choices": [] })));
        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        let responder = HttpResponder::new(&bot_config(format!("http://{addr}/"), 0)).unwrap();
        let err = responder
            .reply(&ReplyRequest { persona: persona(), history: vec![] })
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::Empty));
    }

    #[test]
    fn no_key_means_scripted() {
        assert!(responder_from_config(&BotConfig::default()).is_ok());
    }
}
