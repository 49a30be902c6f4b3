use std::sync::Arc;

use otbor_core::{
    config::Config,
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
    },
    sheets::{DisabledReader, SpreadsheetReader},
    token_store::{MemoryTokenStore, TokenStore},
};
use otbor_redis::RedisTokenStore;
use otbor_sheets::GoogleSheetsReader;
use otbor_store::{SqlDirectory, SqlSlotRepository};
use otbor_telegram::{router::AppState, TelegramMessenger};
use teloxide::Bot;
use tracing::warn;

#[tokio::main]
async fn main() -> Result<(), otbor_core::Error> {
    otbor_core::logging::init("otbor")?;

    let cfg = Arc::new(Config::load()?);

    let pool = otbor_store::connect(&cfg.database_url).await?;
    let slots = Arc::new(SqlSlotRepository::new(pool.clone()));
    let directory = Arc::new(SqlDirectory::new(pool));

    let tokens: Arc<dyn TokenStore> = match &cfg.redis_url {
        Some(url) => Arc::new(RedisTokenStore::connect(url).await?),
        None => {
            warn!("REDIS_URL not set; invitations and dialogues live in memory");
            Arc::new(MemoryTokenStore::new())
        }
    };

    let reader: Arc<dyn SpreadsheetReader> = match GoogleSheetsReader::from_config(&cfg)? {
        Some(reader) => Arc::new(reader),
        None => {
            warn!("no Google Sheets credentials; discovery and imports are disabled");
            Arc::new(DisabledReader)
        }
    };

    let bot = Bot::new(cfg.telegram_bot_token.clone());
    let telegram: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger = Arc::new(ThrottledMessenger::new(telegram, ThrottleConfig::default()));

    let state = Arc::new(AppState::new(
        cfg,
        messenger,
        tokens,
        slots,
        directory,
        reader,
    ));

    otbor_telegram::router::run_polling(bot, state)
        .await
        .map_err(|e| otbor_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
