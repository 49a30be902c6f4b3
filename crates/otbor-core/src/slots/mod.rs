//! Slot registry: the durable record of interviewer slots and who claimed them.
//!
//! The repository behind [`SlotRepository`] is the source of truth. The token
//! store only mirrors the current unconsumed invitation of each slot so that
//! expired links can be recognised before touching the database.

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{ExperienceKind, FacultyId, SlotId, UserId},
    errors::Error,
    token_store::{get_json, put_json, StoreKey, TokenStore, MAX_TTL},
};

pub mod memory;

pub use memory::MemorySlotRepository;

/// Random bytes per invitation token (256 bits).
const TOKEN_BYTES: usize = 32;

/// One named tab of an interviewer spreadsheet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterviewerSlot {
    pub slot_id: SlotId,
    pub faculty_id: FacultyId,
    pub source_sheet_id: String,
    pub tab_name: String,
    pub experience_kind: ExperienceKind,
    pub claimed_by: Option<UserId>,
    pub claimed_username: Option<String>,
    pub invite_token: Option<String>,
}

impl InterviewerSlot {
    pub fn is_claimed(&self) -> bool {
        self.claimed_by.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewSlot {
    pub faculty_id: FacultyId,
    pub source_sheet_id: String,
    pub tab_name: String,
    pub experience_kind: ExperienceKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InviteKind {
    InterviewerInvite,
}

/// Payload mirrored into the token store under `invite:<token>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationToken {
    pub token: String,
    pub slot_id: SlotId,
    pub faculty_id: FacultyId,
    pub issued_at: DateTime<Utc>,
    pub ttl_secs: u64,
    pub kind: InviteKind,
}

impl InvitationToken {
    pub fn expires_at(&self) -> DateTime<Utc> {
        let secs = self.ttl_secs.min(MAX_TTL.as_secs());
        self.issued_at + chrono::Duration::seconds(secs as i64)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Expired, consumed, superseded or never issued.
    #[error("invitation token not found")]
    TokenNotFound,

    /// Another actor claimed the slot first.
    #[error("slot was already claimed")]
    AlreadyClaimed,

    /// The actor already holds a different slot.
    #[error("actor already holds a slot")]
    ActorAlreadyBound,

    #[error("slot for tab {tab_name:?} of sheet {sheet_id} already exists")]
    DuplicateSlot { sheet_id: String, tab_name: String },

    #[error("slot {0} is already claimed")]
    SlotAlreadyClaimed(SlotId),

    #[error("slot {0} not found")]
    SlotNotFound(SlotId),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl RegistryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RegistryError::StoreUnavailable(_))
    }
}

impl From<Error> for RegistryError {
    fn from(e: Error) -> Self {
        match e {
            Error::Registry(inner) => inner,
            other => RegistryError::StoreUnavailable(other.to_string()),
        }
    }
}

/// Durable storage for slots. Implementations must make [`claim`](Self::claim)
/// a single conditional update, never a read followed by a separate write.
#[async_trait]
pub trait SlotRepository: Send + Sync {
    async fn insert_slot(&self, slot: &NewSlot) -> Result<InterviewerSlot, RegistryError>;

    async fn get_slot(&self, id: SlotId) -> Result<Option<InterviewerSlot>, RegistryError>;

    async fn find_by_actor(&self, actor: UserId) -> Result<Option<InterviewerSlot>, RegistryError>;

    async fn list_by_faculty(
        &self,
        faculty_id: FacultyId,
    ) -> Result<Vec<InterviewerSlot>, RegistryError>;

    /// Stores `token` on an unclaimed slot and returns the token it replaced.
    async fn replace_invite_token(
        &self,
        id: SlotId,
        token: &str,
    ) -> Result<Option<String>, RegistryError>;

    /// Binds `actor` to the slot currently holding `token` and clears the token,
    /// all or nothing.
    async fn claim(
        &self,
        token: &str,
        actor: UserId,
        username: Option<&str>,
    ) -> Result<InterviewerSlot, RegistryError>;
}

/// A freshly minted invitation.
#[derive(Clone, Debug)]
pub struct IssuedInvite {
    pub token: String,
    pub slot: InterviewerSlot,
    pub expires_at: DateTime<Utc>,
}

/// The registry contract used by handlers and the registration dialogue.
pub struct SlotRegistry {
    repo: Arc<dyn SlotRepository>,
    tokens: Arc<dyn TokenStore>,
    key_prefix: String,
    invite_ttl: Duration,
}

impl SlotRegistry {
    pub fn new(
        repo: Arc<dyn SlotRepository>,
        tokens: Arc<dyn TokenStore>,
        key_prefix: impl Into<String>,
        invite_ttl: Duration,
    ) -> Self {
        Self {
            repo,
            tokens,
            key_prefix: key_prefix.into(),
            invite_ttl: invite_ttl.min(MAX_TTL),
        }
    }


    fn invite_key(&self, token: &str) -> String {
        StoreKey::Invite(token).render(&self.key_prefix)
    }

    /// Registers a newly discovered tab. `DuplicateSlot` means "already known".
    pub async fn create_slot(
        &self,
        faculty_id: FacultyId,
        source_sheet_id: &str,
        tab_name: &str,
        experience_kind: ExperienceKind,
    ) -> Result<SlotId, RegistryError> {
        let new = NewSlot {
            faculty_id,
            source_sheet_id: source_sheet_id.to_string(),
            tab_name: tab_name.to_string(),
            experience_kind,
        };
        let slot = retry_once("create_slot", || self.repo.insert_slot(&new)).await?;
        tracing::info!(slot_id = %slot.slot_id, faculty_id = %faculty_id, tab = %tab_name, "slot created");
        Ok(slot.slot_id)
    }

    /// Mints a new token for an unclaimed slot. Any earlier token of the slot stops
    /// working, both in the registry and in the token store.
    pub async fn issue_token(&self, slot_id: SlotId) -> Result<IssuedInvite, RegistryError> {
        let slot = retry_once("get_slot", || self.repo.get_slot(slot_id))
            .await?
            .ok_or(RegistryError::SlotNotFound(slot_id))?;
        if slot.is_claimed() {
            return Err(RegistryError::SlotAlreadyClaimed(slot_id));
        }

        let token = generate_token();
        let previous =
            retry_once("replace_invite_token", || self.repo.replace_invite_token(slot_id, &token))
                .await?;

        if let Some(old) = previous.filter(|old| old != &token) {
            let key = self.invite_key(&old);
            if let Err(e) = self.tokens.delete(&key).await {
                // The registry already rejects the old token; the mirror just lingers until TTL.
                tracing::warn!(slot_id = %slot_id, error = %e, "failed to drop superseded invite");
            }
        }

        let payload = InvitationToken {
            token: token.clone(),
            slot_id,
            faculty_id: slot.faculty_id,
            issued_at: Utc::now(),
            ttl_secs: self.invite_ttl.as_secs(),
            kind: InviteKind::InterviewerInvite,
        };
        let key = self.invite_key(&token);
        retry_once("mirror_invite", || async {
            put_json(self.tokens.as_ref(), &key, &payload, self.invite_ttl)
                .await
                .map_err(RegistryError::from)
        })
        .await?;

        tracing::info!(slot_id = %slot_id, token = %short_token(&token), "invite issued");
        Ok(IssuedInvite {
            expires_at: payload.expires_at(),
            token,
            slot: InterviewerSlot {
                invite_token: Some(payload.token),
                ..slot
            },
        })
    }

    /// Fast-path lookup of the mirrored invitation. Absence means "invalid or expired"
    /// from the user's point of view; presence proves nothing, `claim` decides.
    pub async fn invitation(&self, token: &str) -> Result<Option<InvitationToken>, RegistryError> {
        let key = self.invite_key(token);
        let found: Option<InvitationToken> =
            get_json(self.tokens.as_ref(), &key).await.map_err(RegistryError::from)?;
        Ok(found.filter(|inv| inv.kind == InviteKind::InterviewerInvite && inv.token == token))
    }

    /// The authoritative claim.
    pub async fn claim(
        &self,
        token: &str,
        actor: UserId,
        username: Option<&str>,
    ) -> Result<InterviewerSlot, RegistryError> {
        let result = retry_once("claim", || self.repo.claim(token, actor, username)).await;
        match &result {
            Ok(slot) => {
                tracing::info!(slot_id = %slot.slot_id, actor = %actor, "slot claimed");
                if let Err(e) = self.tokens.delete(&self.invite_key(token)).await {
                    tracing::warn!(actor = %actor, error = %e, "failed to drop consumed invite");
                }
            }
            Err(e) => {
                tracing::info!(actor = %actor, token = %short_token(token), error = %e, "claim rejected");
            }
        }
        result
    }

    pub async fn lookup_by_actor(
        &self,
        actor: UserId,
    ) -> Result<Option<InterviewerSlot>, RegistryError> {
        retry_once("find_by_actor", || self.repo.find_by_actor(actor)).await
    }

    pub async fn get_slot(&self, id: SlotId) -> Result<Option<InterviewerSlot>, RegistryError> {
        retry_once("get_slot", || self.repo.get_slot(id)).await
    }

    pub async fn list_by_faculty(
        &self,
        faculty_id: FacultyId,
    ) -> Result<Vec<InterviewerSlot>, RegistryError> {
        retry_once("list_by_faculty", || self.repo.list_by_faculty(faculty_id)).await
    }

    pub async fn list_unclaimed(
        &self,
        faculty_id: FacultyId,
    ) -> Result<Vec<InterviewerSlot>, RegistryError> {
        let mut slots = self.list_by_faculty(faculty_id).await?;
        slots.retain(|s| !s.is_claimed());
        Ok(slots)
    }
}

/// Runs `op`, retrying exactly once when it fails with a transient store fault.
async fn retry_once<T, F, Fut>(op_name: &str, mut op: F) -> Result<T, RegistryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RegistryError>>,
{
    match op().await {
        Err(e) if e.is_transient() => {
            tracing::warn!(op = op_name, error = %e, "transient store fault, retrying once");
            op().await
        }
        other => other,
    }
}

/// Opaque URL-safe token: 256 random bits, 43 characters, fits a Telegram start payload.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// First characters of a token, for logs.
pub fn short_token(token: &str) -> String {
    format!("{}…", token.chars().take(6).collect::<String>())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::token_store::MemoryTokenStore;

    /// Memory repository whose `claim` fails with a store fault a set number of times.
    pub(crate) struct FlakyRepo {
        inner: MemorySlotRepository,
        claim_faults: AtomicUsize,
        pub(crate) claim_calls: AtomicUsize,
    }

    impl FlakyRepo {
        pub(crate) fn failing_claims(faults: usize) -> Self {
            Self {
                inner: MemorySlotRepository::new(),
                claim_faults: AtomicUsize::new(faults),
                claim_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SlotRepository for FlakyRepo {
        async fn insert_slot(&self, slot: &NewSlot) -> Result<InterviewerSlot, RegistryError> {
            self.inner.insert_slot(slot).await
        }

        async fn get_slot(&self, id: SlotId) -> Result<Option<InterviewerSlot>, RegistryError> {
            self.inner.get_slot(id).await
        }

        async fn find_by_actor(
            &self,
            actor: UserId,
        ) -> Result<Option<InterviewerSlot>, RegistryError> {
            self.inner.find_by_actor(actor).await
        }

        async fn list_by_faculty(
            &self,
            faculty_id: FacultyId,
        ) -> Result<Vec<InterviewerSlot>, RegistryError> {
            self.inner.list_by_faculty(faculty_id).await
        }

        async fn replace_invite_token(
            &self,
            id: SlotId,
            token: &str,
        ) -> Result<Option<String>, RegistryError> {
            self.inner.replace_invite_token(id, token).await
        }

        async fn claim(
            &self,
            token: &str,
            actor: UserId,
            username: Option<&str>,
        ) -> Result<InterviewerSlot, RegistryError> {
            self.claim_calls.fetch_add(1, Ordering::SeqCst);
            let left = self.claim_faults.load(Ordering::SeqCst);
            if left > 0 {
                self.claim_faults.store(left - 1, Ordering::SeqCst);
                return Err(RegistryError::StoreUnavailable("connection reset".to_string()));
            }
            self.inner.claim(token, actor, username).await
        }
    }

    fn registry() -> (SlotRegistry, Arc<MemoryTokenStore>) {
        let tokens = Arc::new(MemoryTokenStore::new());
        let reg = SlotRegistry::new(
            Arc::new(MemorySlotRepository::new()),
            tokens.clone(),
            "otbor:",
            Duration::from_secs(86_400),
        );
        (reg, tokens)
    }

    async fn slot(reg: &SlotRegistry, tab: &str) -> SlotId {
        reg.create_slot(FacultyId(1), "sheet-1", tab, ExperienceKind::Experienced)
            .await
            .unwrap()
    }

    #[test]
    fn tokens_are_long_and_url_safe() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[tokio::test]
    async fn never_issued_token_is_not_found() {
        let (reg, _) = registry();
        slot(&reg, "Ivanov").await;
        let err = reg.claim("nope", UserId(7), None).await.unwrap_err();
        assert_eq!(err, RegistryError::TokenNotFound);
    }

    #[tokio::test]
    async fn reissue_invalidates_previous_token() {
        let (reg, _) = registry();
        let id = slot(&reg, "Ivanov").await;
        let first = reg.issue_token(id).await.unwrap().token;
        let second = reg.issue_token(id).await.unwrap().token;

        assert!(reg.invitation(&first).await.unwrap().is_none());
        assert!(reg.invitation(&second).await.unwrap().is_some());
        assert_eq!(
            reg.claim(&first, UserId(7), None).await.unwrap_err(),
            RegistryError::TokenNotFound
        );
        assert!(reg.claim(&second, UserId(7), None).await.is_ok());
    }

    #[tokio::test]
    async fn claim_binds_clears_token_and_drops_mirror() {
        let (reg, tokens) = registry();
        let id = slot(&reg, "Ivanov").await;
        let invite = reg.issue_token(id).await.unwrap();
        assert_eq!(tokens.len().await, 1);

        let claimed = reg
            .claim(&invite.token, UserId(7), Some("ivan"))
            .await
            .unwrap();
        assert_eq!(claimed.claimed_by, Some(UserId(7)));
        assert_eq!(claimed.claimed_username.as_deref(), Some("ivan"));
        assert_eq!(claimed.invite_token, None);
        assert_eq!(tokens.len().await, 0);

        for _ in 0..3 {
            let found = reg.lookup_by_actor(UserId(7)).await.unwrap().unwrap();
            assert_eq!(found.slot_id, id);
        }
    }

    #[tokio::test]
    async fn issuing_for_claimed_slot_fails() {
        let (reg, _) = registry();
        let id = slot(&reg, "Ivanov").await;
        let invite = reg.issue_token(id).await.unwrap();
        reg.claim(&invite.token, UserId(7), None).await.unwrap();
        assert_eq!(
            reg.issue_token(id).await.unwrap_err(),
            RegistryError::SlotAlreadyClaimed(id)
        );
        assert_eq!(
            reg.issue_token(SlotId(999)).await.unwrap_err(),
            RegistryError::SlotNotFound(SlotId(999))
        );
    }

    #[tokio::test]
    async fn actor_holds_at_most_one_slot() {
        let (reg, _) = registry();
        let a = slot(&reg, "Ivanov").await;
        let b = slot(&reg, "Petrov").await;
        let ta = reg.issue_token(a).await.unwrap().token;
        let tb = reg.issue_token(b).await.unwrap().token;

        reg.claim(&ta, UserId(7), None).await.unwrap();
        assert_eq!(
            reg.claim(&tb, UserId(7), None).await.unwrap_err(),
            RegistryError::ActorAlreadyBound
        );
        // Slot b stays claimable by someone else.
        let other = reg.claim(&tb, UserId(8), None).await.unwrap();
        assert_eq!(other.slot_id, b);

        let held_by_7 = reg
            .list_by_faculty(FacultyId(1))
            .await
            .unwrap()
            .into_iter()
            .filter(|s| s.claimed_by == Some(UserId(7)))
            .count();
        assert_eq!(held_by_7, 1);
        assert_eq!(
            reg.lookup_by_actor(UserId(7)).await.unwrap().map(|s| s.slot_id),
            Some(a)
        );
    }

    #[tokio::test]
    async fn concurrent_claims_have_exactly_one_winner() {
        let (reg, _) = registry();
        let reg = Arc::new(reg);
        let id = slot(&reg, "Ivanov").await;
        let token = reg.issue_token(id).await.unwrap().token;

        let (r1, r2) = tokio::join!(
            {
                let reg = reg.clone();
                let token = token.clone();
                tokio::spawn(async move { reg.claim(&token, UserId(1), None).await })
            },
            {
                let reg = reg.clone();
                let token = token.clone();
                tokio::spawn(async move { reg.claim(&token, UserId(2), None).await })
            }
        );
        let results = [r1.unwrap(), r2.unwrap()];
        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        let losers: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
        assert_eq!(winners.len(), 1);
        assert_eq!(losers, vec![&RegistryError::AlreadyClaimed]);

        let stored = reg.get_slot(id).await.unwrap().unwrap();
        assert_eq!(stored.claimed_by, winners[0].claimed_by);
    }

    #[tokio::test]
    async fn duplicate_tab_is_reported_as_duplicate() {
        let (reg, _) = registry();
        slot(&reg, "Ivanov").await;
        let err = reg
            .create_slot(FacultyId(1), "sheet-1", "Ivanov", ExperienceKind::Experienced)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateSlot { .. }));
        // Same tab name in another sheet is a different slot.
        assert!(reg
            .create_slot(FacultyId(1), "sheet-2", "Ivanov", ExperienceKind::NoExperience)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn transient_faults_are_retried_once() {
        let calls = AtomicUsize::new(0);
        let out = retry_once("op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(RegistryError::StoreUnavailable("blip".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(out, Ok(1));

        let calls = AtomicUsize::new(0);
        let out: Result<(), _> = retry_once("op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RegistryError::StoreUnavailable("down".to_string())) }
        })
        .await;
        assert!(out.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let calls = AtomicUsize::new(0);
        let out: Result<(), _> = retry_once("op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RegistryError::AlreadyClaimed) }
        })
        .await;
        assert_eq!(out, Err(RegistryError::AlreadyClaimed));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn claim_survives_a_single_store_fault() {
        let repo = Arc::new(FlakyRepo::failing_claims(1));
        let reg = SlotRegistry::new(
            repo.clone(),
            Arc::new(MemoryTokenStore::new()),
            "otbor:",
            Duration::from_secs(60),
        );
        let id = slot(&reg, "Ivanov").await;
        let token = reg.issue_token(id).await.unwrap().token;

        let claimed = reg.claim(&token, UserId(7), None).await.unwrap();
        assert_eq!(claimed.slot_id, id);
        assert_eq!(repo.claim_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn claim_gives_up_after_two_store_faults() {
        let repo = Arc::new(FlakyRepo::failing_claims(2));
        let reg = SlotRegistry::new(
            repo.clone(),
            Arc::new(MemoryTokenStore::new()),
            "otbor:",
            Duration::from_secs(60),
        );
        let id = slot(&reg, "Ivanov").await;
        let token = reg.issue_token(id).await.unwrap().token;

        let err = reg.claim(&token, UserId(7), None).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(repo.claim_calls.load(Ordering::SeqCst), 2);
        assert!(reg.lookup_by_actor(UserId(7)).await.unwrap().is_none());
        assert!(reg.invitation(&token).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn oversized_ttl_is_clamped() {
        let reg = SlotRegistry::new(
            Arc::new(MemorySlotRepository::new()),
            Arc::new(MemoryTokenStore::new()),
            "otbor:",
            Duration::MAX,
        );
        let id = slot(&reg, "Ivanov").await;
        let invite = reg.issue_token(id).await.unwrap();
        let stored = reg.invitation(&invite.token).await.unwrap().unwrap();
        assert_eq!(stored.ttl_secs, MAX_TTL.as_secs());

        let forged = InvitationToken {
            ttl_secs: u64::MAX,
            ..stored.clone()
        };
        assert_eq!(forged.expires_at(), stored.expires_at());
    }
}
