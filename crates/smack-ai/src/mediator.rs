use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info, warn};

use smack_db::Database;
use smack_gateway::Hub;
use smack_types::events::WsEvent;
use smack_types::models::{Bot, MessageWithUser};

use crate::client::{InputMessage, OpenAiClient};
use crate::prompts;
use crate::sse::StreamEvent;

/// A bot engages without a mention if it answered in the channel within
/// this window.
const FOLLOW_UP_WINDOW: Duration = Duration::from_secs(60);

/// Context sizes: a bound DM gets a deep window, a mention a shallow one.
const DM_CONTEXT_MESSAGES: i64 = 29;
const MENTION_CONTEXT_MESSAGES: i64 = 4;

const APOLOGY: &str =
    "Sorry, I'm having trouble connecting right now. Please try again later.";

/// Canned lines for the deterministic fallback bot, used when a channel's
/// provider has no configured client.
const FALLBACK_RESPONSES: &[&str] = &[
    "That's interesting! Tell me more.",
    "I totally agree with you on that!",
    "Hmm, I hadn't thought about it that way before.",
    "Great point! 👍",
    "Ha! That's funny 😄",
    "I'm just a bot, but I appreciate the conversation!",
    "Absolutely! You're making a lot of sense.",
    "That's a solid take.",
    "You know what? You're right.",
    "Interesting perspective!",
    "Keep going, I'm listening!",
];

#[derive(Clone, Copy, PartialEq)]
enum Engagement {
    BoundDm,
    Mention,
    FollowUp,
}

/// Decides whether a bot must answer an inbound message and runs the
/// streamed reply to completion.
pub struct Mediator {
    db: Arc<Database>,
    hub: Hub,
    clients: HashMap<String, OpenAiClient>,
    last_bot_response: RwLock<HashMap<String, (Bot, Instant)>>,
}

impl Mediator {
    pub fn new(db: Arc<Database>, hub: Hub) -> Self {
        Self {
            db,
            hub,
            clients: HashMap::new(),
            last_bot_response: RwLock::new(HashMap::new()),
        }
    }

    /// Registers the client for one provider. Called during startup, before
    /// the mediator is shared.
    pub fn register_client(&mut self, provider: &str, model: &str) {
        self.clients.insert(provider.to_string(), OpenAiClient::new(model));
    }

    pub fn client(&self, provider: &str) -> Option<&OpenAiClient> {
        self.clients.get(provider)
    }

    /// Any configured client, for provider-agnostic work (TTS).
    pub fn any_configured_client(&self) -> Option<&OpenAiClient> {
        self.clients.values().find(|c| c.is_configured())
    }

    /// Classifies an inbound user message and, when a bot must engage,
    /// runs the reply in a detached task. The caller's HTTP response never
    /// waits on the stream.
    pub fn notify_user_message(
        self: &Arc<Self>,
        channel_id: String,
        content: String,
        thread_id: Option<String>,
    ) {
        let mediator = self.clone();
        tokio::spawn(async move {
            if let Err(e) = mediator.classify_and_run(channel_id, content, thread_id).await {
                warn!("Bot reply failed: {}", e);
            }
        });
    }

    async fn classify_and_run(
        self: Arc<Self>,
        channel_id: String,
        content: String,
        thread_id: Option<String>,
    ) -> anyhow::Result<()> {
        if self.db.is_bot_channel(&channel_id)? {
            let Some(bot) = self.db.get_bot_for_channel(&channel_id)? else {
                return Ok(());
            };
            info!("Bound bot {} engaging in channel {}", bot.name, channel_id);
            self.stream_bot_reply(&channel_id, &content, thread_id.as_deref(), bot, Engagement::BoundDm)
                .await;
            return Ok(());
        }

        if let Some(bot) = self.find_mentioned_bot(&content)? {
            info!("Bot {} mentioned in channel {}", bot.name, channel_id);
            self.stream_bot_reply(&channel_id, &content, thread_id.as_deref(), bot, Engagement::Mention)
                .await;
            return Ok(());
        }

        if let Some(bot) = self.check_auto_follow_up(&channel_id) {
            info!("Auto-follow-up for bot {} in channel {}", bot.name, channel_id);
            self.stream_bot_reply(&channel_id, &content, thread_id.as_deref(), bot, Engagement::FollowUp)
                .await;
        }

        Ok(())
    }

    /// `@bot-<name>` or `@<displayName>`, case-insensitive.
    fn find_mentioned_bot(&self, content: &str) -> anyhow::Result<Option<Bot>> {
        let lower = content.to_lowercase();
        for bot in self.db.get_all_bots()? {
            let name_mention = format!("@bot-{}", bot.name.to_lowercase());
            let display_mention = format!("@{}", bot.display_name.to_lowercase());
            if lower.contains(&name_mention) || lower.contains(&display_mention) {
                return Ok(Some(bot));
            }
        }
        Ok(None)
    }

    fn check_auto_follow_up(&self, channel_id: &str) -> Option<Bot> {
        let map = self
            .last_bot_response
            .read()
            .expect("follow-up lock poisoned");
        map.get(channel_id).and_then(|(bot, at)| {
            (at.elapsed() <= FOLLOW_UP_WINDOW).then(|| bot.clone())
        })
    }

    fn record_bot_response(&self, channel_id: &str, bot: &Bot) {
        self.last_bot_response
            .write()
            .expect("follow-up lock poisoned")
            .insert(channel_id.to_string(), (bot.clone(), Instant::now()));
    }

    /// Newest-first window from the store, deduplicated against the inbound
    /// text, reversed to chronological order, inbound text appended last.
    /// Role is assistant exactly when the author is the bot itself.
    fn assemble_context(
        &self,
        channel_id: &str,
        user_message: &str,
        bot_id: &str,
        window: i64,
    ) -> Vec<InputMessage> {
        let recent = self
            .db
            .get_channel_messages(channel_id, window)
            .unwrap_or_else(|e| {
                warn!("Failed to load context for {}: {}", channel_id, e);
                Vec::new()
            });

        let mut context: Vec<InputMessage> = recent
            .iter()
            .filter(|m| m.message.content != user_message)
            .map(|m| {
                let role = if m.message.user_id == bot_id {
                    "assistant"
                } else {
                    "user"
                };
                InputMessage::new(role, &m.message.content)
            })
            .collect();

        context.push(InputMessage::new("user", user_message));
        context
    }

    /// The streamed reply state machine: placeholder row, stream-start,
    /// deltas, finalize (or pass cleanup), stream-end, new-message.
    async fn stream_bot_reply(
        &self,
        channel_id: &str,
        user_message: &str,
        thread_id: Option<&str>,
        bot: Bot,
        engagement: Engagement,
    ) {
        let Some(client) = self.clients.get(&bot.provider) else {
            debug!("No AI client for provider {}", bot.provider);
            if engagement == Engagement::BoundDm {
                self.fallback_reply(channel_id, user_message, thread_id, &bot).await;
            }
            return;
        };
        if !client.is_configured() {
            if engagement == Engagement::BoundDm {
                self.fallback_reply(channel_id, user_message, thread_id, &bot).await;
            }
            return;
        }

        let bot_user = match self.db.get_user_by_id(&bot.id) {
            Ok(Some(user)) => user,
            _ => {
                warn!("Bot {} has no user row", bot.id);
                return;
            }
        };

        let window = match engagement {
            Engagement::BoundDm => DM_CONTEXT_MESSAGES,
            _ => MENTION_CONTEXT_MESSAGES,
        };
        let context = self.assemble_context(channel_id, user_message, &bot.id, window);

        let mut system_prompt = match engagement {
            Engagement::BoundDm => prompts::dm_persona(&bot),
            _ => prompts::channel_persona(&bot),
        };
        if engagement == Engagement::FollowUp {
            system_prompt.push_str(prompts::FOLLOW_UP_SUFFIX);
        }

        // Placeholder row first: the stream rewrites it and finalization
        // always resolves it, so clients can anchor their stream state.
        let placeholder = match self.db.create_message(channel_id, &bot.id, "", thread_id) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Failed to create placeholder message: {}", e);
                return;
            }
        };

        self.hub
            .broadcast_to_channel(
                channel_id,
                &WsEvent::MessageStreamStart {
                    message_id: placeholder.id.clone(),
                    channel_id: channel_id.to_string(),
                    user: bot_user.to_response(),
                    thread_id: thread_id.map(str::to_string),
                },
            )
            .await;

        let mut full_text = String::new();
        let mut failed = false;

        match client.stream_response(&context, &system_prompt).await {
            Ok(mut stream) => loop {
                match stream.next_event().await {
                    Ok(Some(StreamEvent::OutputTextDelta(delta))) => {
                        full_text.push_str(&delta);
                        self.hub
                            .broadcast_to_channel(
                                channel_id,
                                &WsEvent::MessageStreamDelta {
                                    message_id: placeholder.id.clone(),
                                    channel_id: channel_id.to_string(),
                                    delta,
                                    full_text: full_text.clone(),
                                },
                            )
                            .await;
                    }
                    Ok(Some(StreamEvent::OutputTextDone(text))) => {
                        full_text = text;
                    }
                    Ok(Some(StreamEvent::StreamError(message))) => {
                        warn!("Upstream stream error: {}", message);
                        failed = true;
                        break;
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Stream read failed: {}", e);
                        failed = true;
                        break;
                    }
                }
            },
            Err(e) => {
                warn!("Failed to open stream: {}", e);
                failed = true;
            }
        }

        let final_content = if failed { APOLOGY.to_string() } else { full_text };

        // A follow-up may decline: the literal `pass` deletes the
        // placeholder and resolves the stream with empty content. No
        // new-message event, no follow-up bookkeeping.
        if engagement == Engagement::FollowUp
            && final_content.trim().eq_ignore_ascii_case("pass")
        {
            info!("Bot {} passed on follow-up in {}", bot.name, channel_id);
            if let Err(e) = self.db.delete_message(&placeholder.id) {
                warn!("Failed to delete passed placeholder: {}", e);
            }
            self.hub
                .broadcast_to_channel(
                    channel_id,
                    &WsEvent::MessageStreamEnd {
                        message_id: placeholder.id.clone(),
                        channel_id: channel_id.to_string(),
                        content: String::new(),
                    },
                )
                .await;
            return;
        }

        if let Err(e) = self
            .db
            .update_message_content(&placeholder.id, &final_content)
        {
            warn!("Failed to finalize bot message: {}", e);
        }

        self.hub
            .broadcast_to_channel(
                channel_id,
                &WsEvent::MessageStreamEnd {
                    message_id: placeholder.id.clone(),
                    channel_id: channel_id.to_string(),
                    content: final_content.clone(),
                },
            )
            .await;

        let mut message = placeholder;
        message.content = final_content;
        self.hub
            .broadcast_to_channel(
                channel_id,
                &WsEvent::NewMessage(MessageWithUser {
                    message,
                    user: bot_user.to_response(),
                    reply_count: 0,
                    latest_reply: None,
                }),
            )
            .await;

        if engagement != Engagement::BoundDm {
            self.record_bot_response(channel_id, &bot);
        }

        debug!("Finished streaming bot reply in {}", channel_id);
    }

    /// Deterministic keyword bot with a human-like delay; only serves bound
    /// channels whose provider has no live client.
    async fn fallback_reply(
        &self,
        channel_id: &str,
        user_message: &str,
        thread_id: Option<&str>,
        bot: &Bot,
    ) {
        let delay = Duration::from_millis(rand::thread_rng().gen_range(1000..3000));
        tokio::time::sleep(delay).await;

        let lower = user_message.to_lowercase();
        let response = if lower.contains("hello") || lower.contains("hi") {
            "Hey there! 👋 How's it going?".to_string()
        } else if lower.contains("how are you") {
            "I'm doing great, thanks for asking! Just bot things, you know.".to_string()
        } else if lower.contains("help") {
            "I'm here to keep you company and make this chat less lonely. Just say hi!".to_string()
        } else if lower.contains("bye") || lower.contains("goodbye") {
            "See you later! 👋".to_string()
        } else if lower.contains('?') {
            "Good question! Let me think... actually, I'm just a bot so I'll say: yes, probably!"
                .to_string()
        } else {
            let idx = rand::thread_rng().gen_range(0..FALLBACK_RESPONSES.len());
            FALLBACK_RESPONSES[idx].to_string()
        };

        let msg = match self.db.create_message(channel_id, &bot.id, &response, thread_id) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Failed to create fallback reply: {}", e);
                return;
            }
        };
        let Ok(Some(bot_user)) = self.db.get_user_by_id(&bot.id) else {
            return;
        };

        self.hub
            .broadcast_to_channel(
                channel_id,
                &WsEvent::NewMessage(MessageWithUser {
                    message: msg,
                    user: bot_user.to_response(),
                    reply_count: 0,
                    latest_reply: None,
                }),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn temp_db() -> Arc<Database> {
        let mut path = std::env::temp_dir();
        path.push(format!("smack-ai-test-{}.db", Uuid::new_v4()));
        Arc::new(Database::open(&path).expect("open db"))
    }

    fn bot(name: &str, display: &str) -> Bot {
        Bot {
            id: format!("{name}-id"),
            name: name.into(),
            display_name: display.into(),
            description: String::new(),
            provider: "openai".into(),
            model: "gpt-5.2".into(),
            avatar_url: String::new(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn mention_detection_is_case_insensitive() {
        let db = temp_db();
        db.create_bot("openai-gpt", "openai", "ChatGPT", "", "openai", "gpt-5.2", "")
            .unwrap();
        let mediator = Mediator::new(db.clone(), Hub::new(db));

        assert!(mediator
            .find_mentioned_bot("hey @bot-openai what's up")
            .unwrap()
            .is_some());
        assert!(mediator
            .find_mentioned_bot("hey @BOT-OPENAI what's up")
            .unwrap()
            .is_some());
        assert!(mediator
            .find_mentioned_bot("ask @chatgpt about it")
            .unwrap()
            .is_some());
        assert!(mediator
            .find_mentioned_bot("no mention here")
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn follow_up_window_expires() {
        let db = temp_db();
        let mediator = Mediator::new(db.clone(), Hub::new(db));
        let bot = bot("openai", "ChatGPT");

        assert!(mediator.check_auto_follow_up("ch-1").is_none());

        mediator.record_bot_response("ch-1", &bot);
        assert!(mediator.check_auto_follow_up("ch-1").is_some());
        assert!(mediator.check_auto_follow_up("ch-2").is_none());

        // Simulate an entry recorded beyond the window.
        mediator
            .last_bot_response
            .write()
            .unwrap()
            .insert(
                "ch-1".into(),
                (bot, Instant::now() - FOLLOW_UP_WINDOW - Duration::from_secs(1)),
            );
        assert!(mediator.check_auto_follow_up("ch-1").is_none());
    }

    #[tokio::test]
    async fn context_dedups_reverses_and_tags_roles() {
        let db = temp_db();
        let user = db.create_user("alice", "Alice", "h").unwrap();
        db.create_bot("openai-gpt", "openai", "ChatGPT", "", "openai", "gpt-5.2", "")
            .unwrap();
        let channel = db.create_channel("dev", "", &user.id, false).unwrap();

        db.create_message(&channel.id, &user.id, "first", None).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        db.create_message(&channel.id, "openai-gpt", "bot answer", None)
            .unwrap();
        std::thread::sleep(Duration::from_millis(2));
        // The inbound message is already persisted when the mediator runs;
        // the dedup filter keeps it out of the history window.
        db.create_message(&channel.id, &user.id, "what's 2+2?", None)
            .unwrap();

        let mediator = Mediator::new(db.clone(), Hub::new(db));
        let context =
            mediator.assemble_context(&channel.id, "what's 2+2?", "openai-gpt", 29);

        let turns: Vec<(&str, &str)> = context
            .iter()
            .map(|m| (m.role.as_str(), m.content.as_str()))
            .collect();
        assert_eq!(
            turns,
            vec![
                ("user", "first"),
                ("assistant", "bot answer"),
                ("user", "what's 2+2?"),
            ]
        );
    }
}
