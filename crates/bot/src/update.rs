use serde::Deserialize;

// ─── Telegram Types ─────────────────────────────────────────────────────────
//
// Only the fields the backend reads. Unknown fields are ignored so new Bot
// API additions never break deserialisation.

/// One inbound update as posted to the webhook.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub edited_message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
    pub pre_checkout_query: Option<PreCheckoutQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub date: i64,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub data: Option<String>,
}

/// Sent by Telegram before a Stars payment is confirmed.
#[derive(Debug, Clone, Deserialize)]
pub struct PreCheckoutQuery {
    pub id: String,
    pub from: User,
    pub currency: String,
    pub total_amount: i64,
    pub invoice_payload: String,
}

impl Update {
    /// The user who triggered this update, whatever its kind.
    pub fn sender(&self) -> Option<&User> {
        self.message
            .as_ref()
            .or(self.edited_message.as_ref())
            .and_then(|m| m.from.as_ref())
            .or_else(|| self.callback_query.as_ref().map(|q| &q.from))
            .or_else(|| self.pre_checkout_query.as_ref().map(|q| &q.from))
    }

    /// Text of a new (not edited) message.
    pub fn text(&self) -> Option<&str> {
        self.message.as_ref().and_then(|m| m.text.as_deref())
    }
}

/// Referrer id carried by a `/start` deep link, e.g. `/start ref_12345`.
///
/// Accepts both the bare id and the `ref_` prefixed form, and the
/// `/start@BotName` spelling used in group chats.
pub fn start_referrer(text: &str) -> Option<i64> {
    let mut parts = text.split_whitespace();
    let command = parts.next()?;
    if command != "/start" && !command.starts_with("/start@") {
        return None;
    }

    let payload = parts.next()?;
    let id = payload.strip_prefix("ref_").unwrap_or(payload);
    id.parse::<i64>().ok().filter(|id| *id > 0)
}
