use async_trait::async_trait;
use chrono::Utc;
use otbor_core::{
    domain::{ExperienceKind, FacultyId, SlotId, UserId},
    slots::{InterviewerSlot, NewSlot, RegistryError, SlotRepository},
};
use sqlx::SqlitePool;
use tracing::debug;

use crate::{is_unique_violation, registry_err};

const SLOT_COLUMNS: &str = "id, faculty_id, source_sheet_id, tab_name, experience_kind, \
                            claimed_by, claimed_username, invite_token";

const REISSUE_ATTEMPTS: usize = 3;

#[derive(Debug, sqlx::FromRow)]
struct SlotRow {
    id: i64,
    faculty_id: i64,
    source_sheet_id: String,
    tab_name: String,
    experience_kind: String,
    claimed_by: Option<i64>,
    claimed_username: Option<String>,
    invite_token: Option<String>,
}

impl TryFrom<SlotRow> for InterviewerSlot {
    type Error = RegistryError;

    fn try_from(row: SlotRow) -> Result<Self, Self::Error> {
        let experience_kind = ExperienceKind::parse(&row.experience_kind).ok_or_else(|| {
            RegistryError::StoreUnavailable(format!(
                "slot {} has unknown experience kind {:?}",
                row.id, row.experience_kind
            ))
        })?;
        Ok(InterviewerSlot {
            slot_id: SlotId(row.id),
            faculty_id: FacultyId(row.faculty_id),
            source_sheet_id: row.source_sheet_id,
            tab_name: row.tab_name,
            experience_kind,
            claimed_by: row.claimed_by.map(UserId),
            claimed_username: row.claimed_username,
            invite_token: row.invite_token,
        })
    }
}

/// Slot repository over the `interviewer_slots` table.
#[derive(Clone, Debug)]
pub struct SqlSlotRepository {
    pool: SqlitePool,
}

impl SqlSlotRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn select_one(
        &self,
        filter: &str,
        bind: i64,
    ) -> Result<Option<InterviewerSlot>, RegistryError> {
        let row: Option<SlotRow> = sqlx::query_as(&format!(
            "SELECT {SLOT_COLUMNS} FROM interviewer_slots WHERE {filter} = ?"
        ))
        .bind(bind)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| registry_err("select slot", e))?;
        row.map(InterviewerSlot::try_from).transpose()
    }
}

#[async_trait]
impl SlotRepository for SqlSlotRepository {
    async fn insert_slot(&self, new: &NewSlot) -> Result<InterviewerSlot, RegistryError> {
        let row: SlotRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO interviewer_slots (faculty_id, source_sheet_id, tab_name, experience_kind)
            VALUES (?, ?, ?, ?)
            RETURNING {SLOT_COLUMNS}
            "#
        ))
        .bind(new.faculty_id.0)
        .bind(&new.source_sheet_id)
        .bind(&new.tab_name)
        .bind(new.experience_kind.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RegistryError::DuplicateSlot {
                    sheet_id: new.source_sheet_id.clone(),
                    tab_name: new.tab_name.clone(),
                }
            } else {
                registry_err("insert slot", e)
            }
        })?;
        row.try_into()
    }

    async fn get_slot(&self, id: SlotId) -> Result<Option<InterviewerSlot>, RegistryError> {
        self.select_one("id", id.0).await
    }

    async fn find_by_actor(&self, actor: UserId) -> Result<Option<InterviewerSlot>, RegistryError> {
        self.select_one("claimed_by", actor.0).await
    }

    async fn list_by_faculty(
        &self,
        faculty_id: FacultyId,
    ) -> Result<Vec<InterviewerSlot>, RegistryError> {
        let rows: Vec<SlotRow> = sqlx::query_as(&format!(
            "SELECT {SLOT_COLUMNS} FROM interviewer_slots WHERE faculty_id = ? ORDER BY id"
        ))
        .bind(faculty_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| registry_err("list slots", e))?;
        rows.into_iter().map(InterviewerSlot::try_from).collect()
    }

    async fn replace_invite_token(
        &self,
        id: SlotId,
        token: &str,
    ) -> Result<Option<String>, RegistryError> {
        for _ in 0..REISSUE_ATTEMPTS {
            let current = self
                .get_slot(id)
                .await?
                .ok_or(RegistryError::SlotNotFound(id))?;
            if current.is_claimed() {
                return Err(RegistryError::SlotAlreadyClaimed(id));
            }

            // Compare-and-swap on the token just read.
            let result = sqlx::query(
                r#"
                UPDATE interviewer_slots
                SET invite_token = ?
                WHERE id = ? AND claimed_by IS NULL AND invite_token IS ?
                "#,
            )
            .bind(token)
            .bind(id.0)
            .bind(current.invite_token.as_deref())
            .execute(&self.pool)
            .await
            .map_err(|e| registry_err("reissue token", e))?;

            if result.rows_affected() == 1 {
                return Ok(current.invite_token);
            }
            debug!(slot_id = id.0, "slot changed during reissue, retrying");
        }
        Err(RegistryError::StoreUnavailable(format!(
            "slot {id} kept changing during reissue"
        )))
    }

    async fn claim(
        &self,
        token: &str,
        actor: UserId,
        username: Option<&str>,
    ) -> Result<InterviewerSlot, RegistryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| registry_err("begin claim", e))?;

        let claimed: Option<SlotRow> = sqlx::query_as(&format!(
            r#"
            UPDATE interviewer_slots
            SET claimed_by = ?,
                claimed_username = ?,
                claimed_at = ?,
                claimed_token = invite_token,
                invite_token = NULL
            WHERE invite_token = ?
              AND claimed_by IS NULL
              AND NOT EXISTS (SELECT 1 FROM interviewer_slots WHERE claimed_by = ?)
            RETURNING {SLOT_COLUMNS}
            "#
        ))
        .bind(actor.0)
        .bind(username)
        .bind(Utc::now().to_rfc3339())
        .bind(token)
        .bind(actor.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RegistryError::ActorAlreadyBound
            } else {
                registry_err("claim slot", e)
            }
        })?;

        if let Some(row) = claimed {
            tx.commit()
                .await
                .map_err(|e| registry_err("commit claim", e))?;
            let slot = InterviewerSlot::try_from(row)?;
            debug!(slot_id = slot.slot_id.0, actor = actor.0, "slot claimed");
            return Ok(slot);
        }

        // Nothing matched: work out which precondition failed.
        let (live, consumed, bound): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM interviewer_slots WHERE invite_token = ?),
                (SELECT COUNT(*) FROM interviewer_slots WHERE claimed_token = ?),
                (SELECT COUNT(*) FROM interviewer_slots WHERE claimed_by = ?)
            "#,
        )
        .bind(token)
        .bind(token)
        .bind(actor.0)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| registry_err("classify claim", e))?;
        tx.rollback()
            .await
            .map_err(|e| registry_err("rollback claim", e))?;

        Err(if live == 0 {
            if consumed > 0 {
                RegistryError::AlreadyClaimed
            } else {
                RegistryError::TokenNotFound
            }
        } else if bound > 0 {
            RegistryError::ActorAlreadyBound
        } else {
            RegistryError::AlreadyClaimed
        })
    }
}
