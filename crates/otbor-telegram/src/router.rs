use std::{collections::HashMap, sync::Arc, time::Duration};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use tokio::sync::{Mutex, OwnedMutexGuard};

use otbor_core::{
    config::Config,
    dialogue::DialogueStore,
    directory::AdminDirectory,
    discovery::Discovery,
    domain::UserId,
    messaging::port::MessagingPort,
    registration::RegistrationEngine,
    security::{resolve_role, RateLimiter, Role},
    sheets::SpreadsheetReader,
    slots::{SlotRegistry, SlotRepository},
    token_store::{StoreKey, TokenStore},
    utils::AuditLogger,
    wizard::WizardEngine,
    Result,
};

use crate::handlers;

const BOT_USERNAME_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub messenger: Arc<dyn MessagingPort>,
    pub tokens: Arc<dyn TokenStore>,
    pub registry: Arc<SlotRegistry>,
    pub directory: Arc<dyn AdminDirectory>,
    pub discovery: Arc<Discovery>,
    pub registration: Arc<RegistrationEngine>,
    pub wizard: Arc<WizardEngine>,
    pub rate_limiter: Arc<Mutex<RateLimiter>>,
    pub actor_locks: Arc<ActorLocks>,
    pub audit: Arc<AuditLogger>,
}

impl AppState {
    /// Wires the engines on top of the storage adapters.
    pub fn new(
        cfg: Arc<Config>,
        messenger: Arc<dyn MessagingPort>,
        tokens: Arc<dyn TokenStore>,
        slots: Arc<dyn SlotRepository>,
        directory: Arc<dyn AdminDirectory>,
        reader: Arc<dyn SpreadsheetReader>,
    ) -> Self {
        let registry = Arc::new(SlotRegistry::new(
            slots,
            tokens.clone(),
            cfg.key_prefix.clone(),
            cfg.invite_ttl,
        ));
        let dialogues = DialogueStore::new(tokens.clone(), cfg.key_prefix.clone(), cfg.dialogue_ttl);
        let discovery = Arc::new(Discovery::new(
            registry.clone(),
            directory.clone(),
            reader.clone(),
        ));
        let registration = Arc::new(RegistrationEngine::new(
            registry.clone(),
            dialogues.clone(),
            directory.clone(),
        ));
        let wizard = Arc::new(WizardEngine::new(
            dialogues,
            directory.clone(),
            reader,
            registry.clone(),
            discovery.clone(),
            cfg.participants_tab.clone(),
        ));

        Self {
            rate_limiter: Arc::new(Mutex::new(RateLimiter::from_config(&cfg))),
            actor_locks: Arc::new(ActorLocks::default()),
            audit: Arc::new(AuditLogger::from_config(&cfg)),
            cfg,
            messenger,
            tokens,
            registry,
            directory,
            discovery,
            registration,
            wizard,
        }
    }

    pub async fn role(&self, user: UserId) -> Result<Role> {
        resolve_role(&self.cfg, self.directory.as_ref(), user).await
    }

    /// `BOT_USERNAME`, else the cached `getMe` answer, else a fresh `getMe`.
    pub async fn bot_username(&self) -> Result<String> {
        if let Some(name) = &self.cfg.bot_username {
            return Ok(name.clone());
        }
        let key = StoreKey::BotUsername.render(&self.cfg.key_prefix);
        match self.tokens.get(&key).await {
            Ok(Some(name)) => return Ok(name),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "bot username cache unavailable"),
        }

        let name = self.messenger.bot_username().await?;
        if let Err(e) = self.tokens.put(&key, &name, BOT_USERNAME_TTL).await {
            tracing::warn!(error = %e, "failed to cache bot username");
        }
        Ok(name)
    }
}

/// One async mutex per chat account. Updates from the same actor are handled in order.
#[derive(Default)]
pub struct ActorLocks {
    inner: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl ActorLocks {
    pub async fn lock_actor(&self, actor: UserId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            // Only the map holds an idle actor's mutex.
            map.retain(|_, l| Arc::strong_count(l) > 1);
            map.entry(actor.0)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub async fn run_polling(bot: Bot, state: Arc<AppState>) -> anyhow::Result<()> {
    match state.bot_username().await {
        Ok(name) => tracing::info!(bot = %name, "otbor started"),
        Err(e) => tracing::warn!(error = %e, "cannot resolve bot username yet"),
    }
    tracing::info!(
        superadmins = state.cfg.superadmin_ids.len(),
        invite_ttl_secs = state.cfg.invite_ttl.as_secs(),
        sheets = state.cfg.sheets_configured(),
        "configuration loaded"
    );

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
