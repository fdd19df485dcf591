use std::sync::Arc;

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{
    BusinessConnection, BusinessMessagesDeleted, InlineKeyboardButton, InlineKeyboardMarkup,
    ParseMode,
};
use tracing::{info, warn};

use crate::broadcast::{self, BroadcastSessions, BROADCAST_KINDS};
use crate::config::Config;
use crate::delivery::Delivery;
use crate::platform::telegram::{self, TelegramApi};
use crate::reconcile::{ConnectionUpdate, DeletedBatch, Relay};

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub relay: Relay<TelegramApi>,
    pub sessions: BroadcastSessions,
}

/// Start the Telegram bot
pub async fn run(config: Config) -> Result<()> {
    let bot = Bot::new(&config.telegram.bot_token);

    let api = Arc::new(TelegramApi::new(bot.clone()));
    let delivery = Delivery::new(
        api.clone(),
        config.delivery.max_attempts,
        config.delivery.base_backoff(),
    );
    let state = Arc::new(AppState {
        config,
        relay: Relay::new(api, delivery),
        sessions: BroadcastSessions::new(),
    });

    info!("Starting Telegram bot...");

    let handler = dptree::entry()
        .branch(Update::filter_business_connection().endpoint(handle_business_connection))
        .branch(Update::filter_business_message().endpoint(handle_business_message))
        .branch(Update::filter_edited_business_message().endpoint(handle_edited_business_message))
        .branch(Update::filter_deleted_business_messages().endpoint(handle_deleted_business_messages))
        .branch(Update::filter_callback_query().endpoint(handle_callback))
        .branch(Update::filter_message().endpoint(handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("relay"))
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_business_connection(
    conn: BusinessConnection,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let raw = serde_json::to_value(&conn).unwrap_or(serde_json::Value::Null);
    state
        .relay
        .on_connection_update(ConnectionUpdate {
            connection_id: conn.id.0.clone(),
            owner_id: conn.user.id.0,
            enabled: conn.is_enabled,
            raw,
        })
        .await;
    Ok(())
}

async fn handle_business_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    if let Some(incoming) = telegram::to_inbound(&msg) {
        state.relay.on_message(incoming).await;
    }
    Ok(())
}

async fn handle_edited_business_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    if let Some(incoming) = telegram::to_inbound(&msg) {
        state.relay.on_edit(incoming).await;
    }
    Ok(())
}

async fn handle_deleted_business_messages(
    deleted: BusinessMessagesDeleted,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    state
        .relay
        .on_deleted(DeletedBatch {
            connection_id: Some(deleted.business_connection_id.0.clone()),
            chat_id: deleted.chat.id.0,
            message_ids: deleted.message_ids.iter().map(|id| id.0).collect(),
        })
        .await;
    Ok(())
}

async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let chat_id = msg.chat.id.0;
    let is_admin = state.config.telegram.admin_user_ids.contains(&user.id.0);

    if let Some(text) = msg.text() {
        if text == "/start" || text == "/help" {
            state.relay.register_chat(chat_id).await;
            send_welcome(&bot, &state, msg.chat.id).await?;
            return Ok(());
        }

        if text == "/broadcast" {
            if !is_admin {
                bot.send_message(msg.chat.id, "❌ You are not allowed to use this command.")
                    .await?;
                return Ok(());
            }
            state.sessions.begin(chat_id).await;
            send_broadcast_menu(&bot, &state, msg.chat.id).await?;
            return Ok(());
        }
    }

    // Content capture for a pending broadcast session.
    if is_admin {
        if let Some(kind) = state.sessions.awaiting_kind(chat_id).await {
            let Some(snapshot) = telegram::extract_snapshot(&msg) else {
                return Ok(());
            };
            if state.sessions.capture(chat_id, snapshot.clone()).await {
                send_broadcast_preview(&bot, &state, msg.chat.id, &snapshot).await?;
            } else {
                let desc = kind.descriptor();
                bot.send_message(
                    msg.chat.id,
                    format!("{} Please send a {} for the broadcast.", desc.emoji, desc.label),
                )
                .await?;
            }
        }
    }

    Ok(())
}

async fn handle_callback(bot: Bot, q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    let callback_id = q.id.clone();

    if let (Some(data), Some(message)) = (q.data.as_deref(), q.regular_message()) {
        let chat = message.chat.id;
        if state.config.telegram.admin_user_ids.contains(&q.from.id.0) {
            if let Some(tag) = data.strip_prefix("broadcast_") {
                if let Some(kind) = state.sessions.choose(chat.0, tag).await {
                    let desc = kind.descriptor();
                    bot.edit_message_text(
                        chat,
                        message.id,
                        format!("{} <b>Send the {} to broadcast:</b>", desc.emoji, desc.label),
                    )
                    .parse_mode(ParseMode::Html)
                    .reply_markup(cancel_keyboard())
                    .await?;
                } else {
                    warn!("Callback for unknown broadcast kind: {}", tag);
                }
            } else if data == "cancel_broadcast" {
                state.sessions.cancel(chat.0).await;
                bot.edit_message_text(chat, message.id, "❌ Broadcast cancelled.")
                    .await?;
            } else if data == "confirm_broadcast" {
                match state.sessions.take_confirmed(chat.0).await {
                    Some(snapshot) => {
                        bot.edit_message_text(
                            chat,
                            message.id,
                            "🔄 <b>Broadcast running...</b>\n\nPlease wait.",
                        )
                        .parse_mode(ParseMode::Html)
                        .await?;

                        let outcome = broadcast::run_broadcast(
                            &state.relay,
                            &snapshot,
                            state.config.broadcast.pause(),
                        )
                        .await;

                        let (chats, _) = state.relay.stats().await;
                        bot.edit_message_text(
                            chat,
                            message.id,
                            format!(
                                "📊 <b>Broadcast results:</b>\n\n✅ Sent: {}\n❌ Failed: {}\n📈 Total chats: {}",
                                outcome.sent, outcome.failed, chats
                            ),
                        )
                        .parse_mode(ParseMode::Html)
                        .await?;
                    }
                    None => {
                        bot.send_message(chat, "❌ No content to broadcast.").await?;
                    }
                }
            }
        }
    }

    bot.answer_callback_query(callback_id).await?;
    Ok(())
}

fn cancel_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new([[InlineKeyboardButton::callback(
        "❌ Cancel",
        "cancel_broadcast",
    )]])
}

async fn send_welcome(bot: &Bot, state: &AppState, chat: ChatId) -> ResponseResult<()> {
    let mut req = bot
        .send_message(
            chat,
            "<b>🤖 Welcome! This bot tracks deleted and edited messages in your connected \
             business chats.</b>\n\n\
             • Instant notifications about deleted messages (voice, photo and more)\n\
             • Instant notifications about edited messages\n\n\
             <i>💡 Connect the bot to your Telegram Business account to get started.</i>",
        )
        .parse_mode(ParseMode::Html);

    if let Some(url) = state
        .config
        .telegram
        .channel_url
        .as_deref()
        .and_then(|u| reqwest::Url::parse(u).ok())
    {
        req = req.reply_markup(InlineKeyboardMarkup::new([[InlineKeyboardButton::url(
            "Open channel",
            url,
        )]]));
    }

    req.await?;
    Ok(())
}

async fn send_broadcast_menu(bot: &Bot, state: &AppState, chat: ChatId) -> ResponseResult<()> {
    let buttons: Vec<InlineKeyboardButton> = BROADCAST_KINDS
        .iter()
        .map(|kind| {
            let desc = kind.descriptor();
            InlineKeyboardButton::callback(
                format!("{} {}", desc.emoji, desc.label),
                format!("broadcast_{}", kind.tag()),
            )
        })
        .collect();

    let mut rows: Vec<Vec<InlineKeyboardButton>> =
        buttons.chunks(2).map(|pair| pair.to_vec()).collect();
    rows.push(vec![InlineKeyboardButton::callback(
        "❌ Cancel",
        "cancel_broadcast",
    )]);

    let (chats, owners) = state.relay.stats().await;
    bot.send_message(
        chat,
        format!(
            "📋 <b>Broadcast menu</b>\n\nPick the content kind to broadcast:\n\n\
             Stats:\n• Known chats: {chats}\n• Business owners: {owners}"
        ),
    )
    .parse_mode(ParseMode::Html)
    .reply_markup(InlineKeyboardMarkup::new(rows))
    .await?;
    Ok(())
}

async fn send_broadcast_preview(
    bot: &Bot,
    state: &AppState,
    chat: ChatId,
    snapshot: &crate::content::Snapshot,
) -> ResponseResult<()> {
    let keyboard = InlineKeyboardMarkup::new([
        vec![InlineKeyboardButton::callback(
            "✅ Confirm broadcast",
            "confirm_broadcast",
        )],
        vec![InlineKeyboardButton::callback("❌ Cancel", "cancel_broadcast")],
    ]);

    let (chats, _) = state.relay.stats().await;
    bot.send_message(
        chat,
        format!(
            "📝 <b>Broadcast preview:</b>\n\nKind: {}\nContent:\n{}\n\n\
             <i>This will be sent to {} chats.</i>\nConfirm to send:",
            snapshot.kind.descriptor().label,
            crate::reconcile::escape_html(&snapshot.display()),
            chats
        ),
    )
    .parse_mode(ParseMode::Html)
    .reply_markup(keyboard)
    .await?;
    Ok(())
}
