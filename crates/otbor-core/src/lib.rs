//! Core domain + application logic for the interviewer invitation bot.
//!
//! This crate is framework-agnostic. Telegram, the relational store, Redis and
//! Google Sheets live behind ports (traits) implemented in adapter crates.

pub mod config;
pub mod dialogue;
pub mod directory;
pub mod discovery;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod registration;
pub mod security;
pub mod sheets;
pub mod slots;
pub mod token_store;
pub mod utils;
pub mod wizard;

pub use errors::{Error, Result};
