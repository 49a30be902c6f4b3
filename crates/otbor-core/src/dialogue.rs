//! Per-actor pending dialogue, kept in the token store under `pending:<actor>`.
//!
//! One slot per actor: saving a dialogue replaces whatever was there.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{FacultyId, SlotId, UserId},
    token_store::{get_json, put_json, StoreKey, TokenStore, MAX_TTL},
    Result,
};

/// Which multi-step flow a dialogue belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    SetSheets,
    ListTabs,
    ImportParticipants,
    CreateFaculty,
    AddSheet,
    AssignAdmin,
    ConfirmRegistration,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::SetSheets => "set_sheets",
            StepKind::ListTabs => "list_tabs",
            StepKind::ImportParticipants => "import_participants",
            StepKind::CreateFaculty => "create_faculty",
            StepKind::AddSheet => "add_sheet",
            StepKind::AssignAdmin => "assign_admin",
            StepKind::ConfirmRegistration => "confirm_registration",
        }
    }

    /// Inverse of [`StepKind::as_str`] for the admin wizards. The registration step
    /// is never opened by name.
    pub fn parse_wizard(s: &str) -> Option<Self> {
        [
            StepKind::SetSheets,
            StepKind::ListTabs,
            StepKind::ImportParticipants,
            StepKind::CreateFaculty,
            StepKind::AddSheet,
            StepKind::AssignAdmin,
        ]
        .into_iter()
        .find(|k| k.as_str() == s)
    }

    /// Wizards only a superadmin may open.
    pub fn is_superadmin_only(self) -> bool {
        matches!(
            self,
            StepKind::CreateFaculty | StepKind::AddSheet | StepKind::AssignAdmin
        )
    }
}

/// The cursor of a dialogue together with the fields collected so far.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum DialogueStep {
    SetSheets,
    ListTabs,
    ImportParticipants,
    CreateFacultyTitle,
    CreateFacultyDescription {
        title: String,
    },
    AddSheetLink,
    AddSheetFaculty {
        spreadsheet_id: String,
    },
    AddSheetKind {
        spreadsheet_id: String,
        faculty_id: FacultyId,
        faculty_title: String,
    },
    AssignAdminUser,
    AssignAdminName {
        user_id: UserId,
    },
    AssignAdminFaculty {
        user_id: UserId,
        display_name: String,
    },
    ConfirmRegistration {
        token: String,
        slot_id: SlotId,
    },
}

impl DialogueStep {
    pub fn kind(&self) -> StepKind {
        match self {
            DialogueStep::SetSheets => StepKind::SetSheets,
            DialogueStep::ListTabs => StepKind::ListTabs,
            DialogueStep::ImportParticipants => StepKind::ImportParticipants,
            DialogueStep::CreateFacultyTitle | DialogueStep::CreateFacultyDescription { .. } => {
                StepKind::CreateFaculty
            }
            DialogueStep::AddSheetLink
            | DialogueStep::AddSheetFaculty { .. }
            | DialogueStep::AddSheetKind { .. } => StepKind::AddSheet,
            DialogueStep::AssignAdminUser
            | DialogueStep::AssignAdminName { .. }
            | DialogueStep::AssignAdminFaculty { .. } => StepKind::AssignAdmin,
            DialogueStep::ConfirmRegistration { .. } => StepKind::ConfirmRegistration,
        }
    }

    /// Entry step of an admin flow. Registration is entered with its token instead.
    pub fn first(kind: StepKind) -> Option<Self> {
        match kind {
            StepKind::SetSheets => Some(DialogueStep::SetSheets),
            StepKind::ListTabs => Some(DialogueStep::ListTabs),
            StepKind::ImportParticipants => Some(DialogueStep::ImportParticipants),
            StepKind::CreateFaculty => Some(DialogueStep::CreateFacultyTitle),
            StepKind::AddSheet => Some(DialogueStep::AddSheetLink),
            StepKind::AssignAdmin => Some(DialogueStep::AssignAdminUser),
            StepKind::ConfirmRegistration => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDialogue {
    pub actor_id: UserId,
    pub step: DialogueStep,
    pub started_at: DateTime<Utc>,
}

impl PendingDialogue {
    pub fn new(actor_id: UserId, step: DialogueStep) -> Self {
        Self {
            actor_id,
            step,
            started_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> StepKind {
        self.step.kind()
    }
}

#[derive(Clone)]
pub struct DialogueStore {
    store: Arc<dyn TokenStore>,
    key_prefix: String,
    ttl: Duration,
}

impl DialogueStore {
    pub fn new(store: Arc<dyn TokenStore>, key_prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
            ttl: ttl.min(MAX_TTL),
        }
    }

    fn key(&self, actor: UserId) -> String {
        StoreKey::Pending(actor).render(&self.key_prefix)
    }

    pub async fn load(&self, actor: UserId) -> Result<Option<PendingDialogue>> {
        let found: Option<PendingDialogue> = get_json(self.store.as_ref(), &self.key(actor)).await?;
        Ok(found.filter(|d| d.actor_id == actor))
    }

    /// Last writer wins.
    pub async fn save(&self, dialogue: &PendingDialogue) -> Result<()> {
        put_json(
            self.store.as_ref(),
            &self.key(dialogue.actor_id),
            dialogue,
            self.ttl,
        )
        .await
    }

    pub async fn clear(&self, actor: UserId) -> Result<()> {
        self.store.delete(&self.key(actor)).await
    }
}
