//! Messenger abstractions. Handlers talk to [`port::MessagingPort`]; Telegram implements it.

pub mod port;
pub mod throttled;
pub mod types;
