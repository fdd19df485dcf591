//! teloxide-backed implementation of the relay's transport seam, plus the
//! conversion of inbound Telegram messages into transport-agnostic events.

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    BusinessConnectionId, ChatId, FileId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile,
    MessageKind, ParseMode, User,
};
use tracing::debug;

use crate::content::{ContentKind, Snapshot};
use crate::ledger::SenderRecord;
use crate::platform::{ConnectionInfo, RelayApi};
use crate::reconcile::InboundMessage;

pub struct TelegramApi {
    bot: Bot,
}

impl TelegramApi {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn file(payload: &str) -> InputFile {
    InputFile::file_id(FileId(payload.to_string()))
}

/// "Open chat" button pointing at the chat an event happened in.
fn chat_link_markup(chat_id: i64) -> Option<InlineKeyboardMarkup> {
    let url = reqwest::Url::parse(&format!("tg://user?id={chat_id}")).ok()?;
    Some(InlineKeyboardMarkup::new([[InlineKeyboardButton::url(
        "Open chat",
        url,
    )]]))
}

#[async_trait]
impl RelayApi for TelegramApi {
    async fn get_connection(&self, connection_id: &str) -> Result<ConnectionInfo> {
        let conn = self
            .bot
            .get_business_connection(BusinessConnectionId(connection_id.to_string()))
            .await
            .with_context(|| format!("getBusinessConnection failed for {connection_id}"))?;
        let raw = serde_json::to_value(&conn).unwrap_or(serde_json::Value::Null);
        Ok(ConnectionInfo {
            owner_id: conn.user.id.0,
            enabled: conn.is_enabled,
            raw,
        })
    }

    async fn send_content(
        &self,
        target: i64,
        kind: ContentKind,
        payload: &str,
        caption: Option<&str>,
        link_chat: Option<i64>,
    ) -> Result<()> {
        let chat = ChatId(target);
        let markup = link_chat.and_then(chat_link_markup);

        match kind {
            ContentKind::Text | ContentKind::Location | ContentKind::Contact => {
                let mut req = self.bot.send_message(chat, payload).parse_mode(ParseMode::Html);
                if let Some(markup) = markup {
                    req = req.reply_markup(markup);
                }
                req.await?;
            }
            ContentKind::Photo => {
                let mut req = self.bot.send_photo(chat, file(payload));
                if let Some(caption) = caption {
                    req = req.caption(caption).parse_mode(ParseMode::Html);
                }
                if let Some(markup) = markup {
                    req = req.reply_markup(markup);
                }
                req.await?;
            }
            ContentKind::Video => {
                let mut req = self.bot.send_video(chat, file(payload));
                if let Some(caption) = caption {
                    req = req.caption(caption).parse_mode(ParseMode::Html);
                }
                if let Some(markup) = markup {
                    req = req.reply_markup(markup);
                }
                req.await?;
            }
            ContentKind::Document => {
                let mut req = self.bot.send_document(chat, file(payload));
                if let Some(caption) = caption {
                    req = req.caption(caption).parse_mode(ParseMode::Html);
                }
                if let Some(markup) = markup {
                    req = req.reply_markup(markup);
                }
                req.await?;
            }
            ContentKind::Animation => {
                let mut req = self.bot.send_animation(chat, file(payload));
                if let Some(caption) = caption {
                    req = req.caption(caption).parse_mode(ParseMode::Html);
                }
                if let Some(markup) = markup {
                    req = req.reply_markup(markup);
                }
                req.await?;
            }
            ContentKind::Voice => {
                let mut req = self.bot.send_voice(chat, file(payload));
                if let Some(markup) = markup {
                    req = req.reply_markup(markup);
                }
                req.await?;
            }
            ContentKind::Audio => {
                let mut req = self.bot.send_audio(chat, file(payload));
                if let Some(markup) = markup {
                    req = req.reply_markup(markup);
                }
                req.await?;
            }
            ContentKind::Sticker => {
                let mut req = self.bot.send_sticker(chat, file(payload));
                if let Some(markup) = markup {
                    req = req.reply_markup(markup);
                }
                req.await?;
            }
        }

        Ok(())
    }
}

/// Pull a comparable snapshot out of a Telegram message. Returns None for
/// kinds outside the fixed registry (polls, video notes, ...), which the
/// caller drops.
pub fn extract_snapshot(msg: &Message) -> Option<Snapshot> {
    let caption = msg.caption().map(|c| c.to_string());

    if let Some(text) = msg.text() {
        return Some(Snapshot::new(ContentKind::Text, text));
    }
    if let Some(photos) = msg.photo() {
        // Largest size carries the most useful file id.
        let best = photos.last()?;
        return Some(Snapshot::new(ContentKind::Photo, best.file.id.0.clone()).with_caption(caption));
    }
    if let Some(video) = msg.video() {
        return Some(Snapshot::new(ContentKind::Video, video.file.id.0.clone()).with_caption(caption));
    }
    if let Some(document) = msg.document() {
        return Some(
            Snapshot::new(ContentKind::Document, document.file.id.0.clone()).with_caption(caption),
        );
    }
    if let Some(animation) = msg.animation() {
        return Some(
            Snapshot::new(ContentKind::Animation, animation.file.id.0.clone()).with_caption(caption),
        );
    }
    if let Some(voice) = msg.voice() {
        return Some(Snapshot::new(ContentKind::Voice, voice.file.id.0.clone()));
    }
    if let Some(audio) = msg.audio() {
        return Some(Snapshot::new(ContentKind::Audio, audio.file.id.0.clone()));
    }
    if let Some(sticker) = msg.sticker() {
        return Some(Snapshot::new(ContentKind::Sticker, sticker.file.id.0.clone()));
    }
    if let Some(location) = msg.location() {
        return Some(Snapshot::new(
            ContentKind::Location,
            format!(
                "[location] lat={}, lon={}",
                location.latitude, location.longitude
            ),
        ));
    }
    if let Some(contact) = msg.contact() {
        let name = match &contact.last_name {
            Some(last) => format!("{} {}", contact.first_name, last),
            None => contact.first_name.clone(),
        };
        return Some(Snapshot::new(
            ContentKind::Contact,
            format!("[contact] {}, tel={}", name, contact.phone_number),
        ));
    }

    None
}

/// Formatted name/username identity for notification texts.
pub fn sender_record(user: &User) -> SenderRecord {
    let mut display = user.first_name.clone();
    if let Some(last) = &user.last_name {
        display.push(' ');
        display.push_str(last);
    }
    if let Some(username) = &user.username {
        display.push_str(&format!(" (@{username})"));
    }
    let display = display.trim().to_string();
    let display = if display.is_empty() {
        format!("User_{}", user.id.0)
    } else {
        display
    };
    SenderRecord {
        display,
        user_id: Some(user.id.0),
    }
}

/// Convert an inbound (new or edited) business message into the relay's
/// transport-agnostic form. Returns None for unsupported content kinds.
pub fn to_inbound(msg: &Message) -> Option<InboundMessage> {
    let Some(snapshot) = extract_snapshot(msg) else {
        debug!("Unsupported content in message {} of chat {}", msg.id.0, msg.chat.id.0);
        return None;
    };
    Some(InboundMessage {
        connection_id: match &msg.kind {
            MessageKind::Common(common) => {
                common.business_connection_id.as_ref().map(|id| id.0.clone())
            }
            _ => None,
        },
        chat_id: msg.chat.id.0,
        message_id: msg.id.0,
        sender: msg.from.as_ref().map(sender_record),
        snapshot,
    })
}
