//! Telegram update handlers.
//!
//! The teloxide endpoints only translate updates into the core
//! [`IncomingUpdate`] model. [`dispatch`] then applies, in order:
//! - the per-user rate limit (commands and text only)
//! - the per-actor lock
//! - the command / callback / free-text handler
//!
//! Handler errors are logged, audited and answered with a generic message.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use otbor_core::{
    domain::{ChatId, MessageId, MessageRef, UserId},
    messaging::{
        port::send_reply,
        types::{CallbackQuery, Command, IncomingUpdate, Reply, TextMessage},
    },
    utils::AuditEvent,
    Result,
};

use crate::router::AppState;

mod callback;
mod commands;
mod text;

pub(crate) const NOT_AVAILABLE: &str = "Not available.";

pub async fn handle_callback(
    q: teloxide::types::CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let user_id = UserId(q.from.id.0 as i64);
    let message = q.message.as_ref().map(|m| MessageRef {
        chat_id: ChatId(m.chat.id.0),
        message_id: MessageId(m.id.0),
    });
    let update = CallbackQuery {
        // Buttons only live in private chats, where the chat id is the user id.
        chat_id: message.map(|m| m.chat_id).unwrap_or(ChatId(user_id.0)),
        user_id,
        username: q.from.username.clone(),
        callback_id: q.id.clone(),
        data: q.data.clone().unwrap_or_default(),
        message,
    };
    dispatch(&state, IncomingUpdate::Callback(update)).await;
    Ok(())
}

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let chat_id = ChatId(msg.chat.id.0);
    let user_id = UserId(user.id.0 as i64);
    let username = user.username.clone();

    let update = if text.starts_with('/') {
        let (name, args) = commands::parse_command(text);
        IncomingUpdate::Command(Command {
            chat_id,
            user_id,
            username,
            name,
            args,
        })
    } else {
        IncomingUpdate::Text(TextMessage {
            chat_id,
            user_id,
            username,
            text: text.to_string(),
        })
    };
    dispatch(&state, update).await;
    Ok(())
}

/// Runs one update to completion. Never fails: errors end up in the log, the
/// audit trail and a short reply.
pub async fn dispatch(state: &AppState, update: IncomingUpdate) {
    let (chat_id, user_id, username) = match &update {
        IncomingUpdate::Command(c) => (c.chat_id, c.user_id, c.username.clone()),
        IncomingUpdate::Text(t) => (t.chat_id, t.user_id, t.username.clone()),
        IncomingUpdate::Callback(q) => (q.chat_id, q.user_id, q.username.clone()),
    };
    let name = display_name(username.as_deref());

    let limited = !matches!(update, IncomingUpdate::Callback(_));
    if limited && !check_rate_limit(state, chat_id, user_id, name).await {
        return;
    }

    let _guard = state.actor_locks.lock_actor(user_id).await;
    let (context, callback_id, result) = match update {
        IncomingUpdate::Command(cmd) => {
            let context = format!("/{}", cmd.name);
            (context, None, commands::handle_command(state, cmd).await)
        }
        IncomingUpdate::Text(msg) => {
            ("text".to_string(), None, text::handle_text(state, msg).await)
        }
        IncomingUpdate::Callback(q) => {
            let context = q.data.clone();
            let id = q.callback_id.clone();
            (context, Some(id), callback::handle_callback(state, q).await)
        }
    };

    let Err(e) = result else {
        return;
    };
    tracing::error!(user_id = %user_id, context = %context, error = %e, "handler failed");
    state
        .audit
        .record(AuditEvent::error(user_id.0, name, &e.to_string(), Some(&context)));

    if let Some(id) = callback_id {
        if let Err(e) = state.messenger.answer_callback_query(&id, None).await {
            tracing::warn!(user_id = %user_id, error = %e, "failed to answer callback after error");
        }
    }
    let reply = if e.is_transient() {
        "Service is temporarily unavailable, try again later."
    } else {
        "Something went wrong. Try again, or /cancel to start over."
    };
    if let Err(e) = state.messenger.send_html(chat_id, reply).await {
        tracing::warn!(user_id = %user_id, error = %e, "failed to report handler error");
    }
}

async fn check_rate_limit(state: &AppState, chat_id: ChatId, user_id: UserId, name: &str) -> bool {
    let (allowed, retry_after) = state.rate_limiter.lock().await.check(user_id);
    if allowed {
        return true;
    }
    let wait = retry_after.map(|d| d.as_secs_f64()).unwrap_or(1.0);
    tracing::info!(user_id = %user_id, retry_after = wait, "rate limited");
    state.audit.record(AuditEvent::rate_limit(user_id.0, name, wait));
    let notice = format!("⏳ Too many requests. Try again in {:.0}s.", wait.ceil());
    if let Err(e) = state.messenger.send_html(chat_id, &notice).await {
        tracing::warn!(user_id = %user_id, error = %e, "failed to send rate limit notice");
    }
    false
}

pub(crate) fn display_name(username: Option<&str>) -> &str {
    username.unwrap_or("unknown")
}

/// Records a refused admin action.
pub(crate) fn deny(state: &AppState, user_id: UserId, username: Option<&str>, context: &str) {
    tracing::info!(user_id = %user_id, context = %context, "admin action refused");
    state.audit.record(AuditEvent::auth(
        user_id.0,
        display_name(username),
        false,
        context,
    ));
}

pub(crate) async fn send(state: &AppState, chat_id: ChatId, reply: Reply) -> Result<()> {
    send_reply(state.messenger.as_ref(), chat_id, reply).await?;
    Ok(())
}

/// Sends line-oriented HTML in as many messages as the messenger needs.
pub(crate) async fn send_long(state: &AppState, chat_id: ChatId, html: &str) -> Result<()> {
    let limit = state.messenger.capabilities().max_message_len;
    for chunk in chunk_lines(html, limit) {
        state.messenger.send_html(chat_id, &chunk).await?;
    }
    Ok(())
}

/// Splits between lines so no tag is cut. A single line over `limit` is cut by chars.
fn chunk_lines(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut out = Vec::new();
    let mut chunk = String::new();
    let mut chunk_len = 0usize;

    for line in text.lines() {
        let line_len = line.chars().count();
        let sep = usize::from(!chunk.is_empty());
        if chunk_len + sep + line_len > limit && !chunk.is_empty() {
            out.push(std::mem::take(&mut chunk));
            chunk_len = 0;
        }
        if line_len > limit {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(limit) {
                out.push(piece.iter().collect());
            }
            continue;
        }
        if !chunk.is_empty() {
            chunk.push('\n');
            chunk_len += 1;
        }
        chunk.push_str(line);
        chunk_len += line_len;
    }
    if !chunk.is_empty() || out.is_empty() {
        out.push(chunk);
    }
    out
}
