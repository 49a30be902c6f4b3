//! Registration dialogue: deep-link token → confirmation → claim.
//!
//! `Start` only reads. The single write is [`SlotRegistry::claim`], reached from
//! `confirm`. Whatever `confirm` ends in, the actor's dialogue is gone afterwards.

use std::sync::Arc;

use crate::{
    dialogue::{DialogueStep, DialogueStore, PendingDialogue},
    directory::AdminDirectory,
    domain::{FacultyId, UserId},
    formatting::bold,
    messaging::types::{InlineButton, InlineKeyboard, Reply},
    slots::{short_token, InterviewerSlot, RegistryError, SlotRegistry},
    Result,
};

pub const START_PREFIX: &str = "inv_";
pub const CONFIRM_DATA: &str = "reg|confirm";
pub const CANCEL_DATA: &str = "reg|cancel";

const MIN_TOKEN_LEN: usize = 16;
const MAX_TOKEN_LEN: usize = 64;

/// Extracts the token from a `/start` payload. Anything malformed yields `None`,
/// which callers answer with the plain greeting.
pub fn parse_start_payload(payload: &str) -> Option<&str> {
    let token = payload.trim().strip_prefix(START_PREFIX)?;
    let well_formed = (MIN_TOKEN_LEN..=MAX_TOKEN_LEN).contains(&token.len())
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    well_formed.then_some(token)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    AwaitingConfirmation,
    Committed,
    Cancelled,
    /// Start with a token the store no longer knows.
    Invalid,
    /// The token died between showing the confirmation and the confirm press.
    Expired,
    /// Someone else's claim won.
    LostRace,
    AlreadyBound,
    Unavailable,
    NothingPending,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::AwaitingConfirmation => "awaiting_confirmation",
            Outcome::Committed => "committed",
            Outcome::Cancelled => "cancelled",
            Outcome::Invalid => "invalid",
            Outcome::Expired => "expired",
            Outcome::LostRace => "lost_race",
            Outcome::AlreadyBound => "already_bound",
            Outcome::Unavailable => "unavailable",
            Outcome::NothingPending => "nothing_pending",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Outcome::AwaitingConfirmation)
    }
}

#[derive(Clone, Debug)]
pub struct Step {
    pub outcome: Outcome,
    pub slot: Option<InterviewerSlot>,
    pub reply: Reply,
}

impl Step {
    fn new(outcome: Outcome, slot: Option<InterviewerSlot>, reply: Reply) -> Self {
        Self {
            outcome,
            slot,
            reply,
        }
    }
}

pub struct RegistrationEngine {
    registry: Arc<SlotRegistry>,
    dialogues: DialogueStore,
    directory: Arc<dyn AdminDirectory>,
}

impl RegistrationEngine {
    pub fn new(
        registry: Arc<SlotRegistry>,
        dialogues: DialogueStore,
        directory: Arc<dyn AdminDirectory>,
    ) -> Self {
        Self {
            registry,
            dialogues,
            directory,
        }
    }

    /// `Start`: validates the token on the fast path and asks for confirmation.
    pub async fn start(&self, actor: UserId, token: &str) -> Result<Step> {
        match self.registry.lookup_by_actor(actor).await {
            Ok(Some(slot)) => return self.already_bound(slot).await,
            Ok(None) => {}
            Err(e) => return Ok(unavailable(e)),
        }

        let invitation = match self.registry.invitation(token).await {
            Ok(Some(inv)) => inv,
            Ok(None) => {
                tracing::info!(actor = %actor, token = %short_token(token), "start with unknown token");
                return Ok(invalid());
            }
            Err(e) => return Ok(unavailable(e)),
        };

        let slot = match self.registry.get_slot(invitation.slot_id).await {
            Ok(Some(slot)) => slot,
            Ok(None) => return Ok(invalid()),
            Err(e) => return Ok(unavailable(e)),
        };
        // The mirror may outlive a reissue or a claim whose cleanup failed.
        if slot.is_claimed() || slot.invite_token.as_deref() != Some(token) {
            return Ok(invalid());
        }

        self.dialogues
            .save(&PendingDialogue::new(
                actor,
                DialogueStep::ConfirmRegistration {
                    token: token.to_string(),
                    slot_id: slot.slot_id,
                },
            ))
            .await?;

        let faculty = self.faculty_title(slot.faculty_id).await?;
        let html = format!(
            "You are invited to interview.\n\nFaculty: {}\nSheet tab: {}\nGroup: {}\n\nConfirm registration?",
            bold(&faculty),
            bold(&slot.tab_name),
            slot.experience_kind.label()
        );
        let keyboard = InlineKeyboard::new(vec![vec![
            InlineButton::new("✅ Confirm", CONFIRM_DATA),
            InlineButton::new("❌ Cancel", CANCEL_DATA),
        ]]);
        Ok(Step::new(
            Outcome::AwaitingConfirmation,
            Some(slot),
            Reply::with_keyboard(html, keyboard),
        ))
    }

    /// `AwaitingConfirmation → Committed | Expired | ...`.
    pub async fn confirm(&self, actor: UserId, username: Option<&str>) -> Result<Step> {
        let Some(token) = self.pending_registration(actor).await? else {
            return Ok(Step::new(
                Outcome::NothingPending,
                None,
                Reply::text("This invitation is no longer valid. Ask your faculty admin for a new link."),
            ));
        };

        let step = self.commit(actor, username, &token).await;
        if let Err(e) = self.dialogues.clear(actor).await {
            tracing::warn!(actor = %actor, error = %e, "failed to clear registration dialogue");
        }
        step
    }

    async fn commit(&self, actor: UserId, username: Option<&str>, token: &str) -> Result<Step> {
        // The registry has no notion of time; the mirror's TTL is the expiry.
        match self.registry.invitation(token).await {
            Ok(Some(_)) => {}
            Ok(None) => return Ok(expired()),
            Err(e) => return Ok(unavailable(e)),
        }

        match self.registry.claim(token, actor, username).await {
            Ok(slot) => {
                let faculty = self.faculty_title(slot.faculty_id).await?;
                let html = format!(
                    "✅ Registered.\n\nFaculty: {}\nSheet tab: {}\nGroup: {}",
                    bold(&faculty),
                    bold(&slot.tab_name),
                    slot.experience_kind.label()
                );
                Ok(Step::new(Outcome::Committed, Some(slot), Reply::text(html)))
            }
            Err(RegistryError::TokenNotFound) => Ok(expired()),
            Err(RegistryError::AlreadyClaimed) => Ok(Step::new(
                Outcome::LostRace,
                None,
                Reply::text(
                    "Someone has already registered for this slot. Ask your faculty admin for a new link.",
                ),
            )),
            Err(RegistryError::ActorAlreadyBound) => match self.registry.lookup_by_actor(actor).await {
                Ok(Some(slot)) => self.already_bound(slot).await,
                Ok(None) => Ok(expired()),
                Err(e) => Ok(unavailable(e)),
            },
            Err(e) => Ok(unavailable(e)),
        }
    }

    /// `AwaitingConfirmation → Cancelled`. No registry mutation.
    pub async fn cancel(&self, actor: UserId) -> Result<Step> {
        if self.pending_registration(actor).await?.is_none() {
            return Ok(Step::new(
                Outcome::NothingPending,
                None,
                Reply::text("Nothing to cancel."),
            ));
        }
        self.dialogues.clear(actor).await?;
        Ok(Step::new(
            Outcome::Cancelled,
            None,
            Reply::text("Registration cancelled. You can open the link again while it is valid."),
        ))
    }

    pub async fn binding(&self, actor: UserId) -> std::result::Result<Option<InterviewerSlot>, RegistryError> {
        self.registry.lookup_by_actor(actor).await
    }

    /// Token of the actor's open confirmation, if the pending dialogue is one.
    async fn pending_registration(&self, actor: UserId) -> Result<Option<String>> {
        Ok(match self.dialogues.load(actor).await? {
            Some(PendingDialogue {
                step: DialogueStep::ConfirmRegistration { token, .. },
                ..
            }) => Some(token),
            _ => None,
        })
    }

    async fn already_bound(&self, slot: InterviewerSlot) -> Result<Step> {
        let faculty = self.faculty_title(slot.faculty_id).await?;
        let html = format!(
            "You are already registered.\n\nFaculty: {}\nSheet tab: {}",
            bold(&faculty),
            bold(&slot.tab_name)
        );
        Ok(Step::new(Outcome::AlreadyBound, Some(slot), Reply::text(html)))
    }

    async fn faculty_title(&self, id: FacultyId) -> Result<String> {
        Ok(match self.directory.get_faculty(id).await? {
            Some(f) => f.title,
            None => format!("#{id}"),
        })
    }
}

fn invalid() -> Step {
    Step::new(
        Outcome::Invalid,
        None,
        Reply::text("This invitation link is invalid or expired. Ask your faculty admin for a new one."),
    )
}

fn expired() -> Step {
    Step::new(
        Outcome::Expired,
        None,
        Reply::text("This invitation has expired or was already used. Ask your faculty admin for a new link."),
    )
}

fn unavailable(e: RegistryError) -> Step {
    tracing::error!(error = %e, "registration store fault");
    Step::new(
        Outcome::Unavailable,
        None,
        Reply::text("Service is temporarily unavailable, try again later."),
    )
}
