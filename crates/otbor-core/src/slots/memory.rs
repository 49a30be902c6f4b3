use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{FacultyId, SlotId, UserId};

use super::{InterviewerSlot, NewSlot, RegistryError, SlotRepository};

#[derive(Debug)]
struct Record {
    slot: InterviewerSlot,
    /// Token consumed by the claim, kept so a late second claim reads as a lost race.
    claimed_token: Option<String>,
}

#[derive(Debug, Default)]
struct Slots {
    next_id: i64,
    records: BTreeMap<SlotId, Record>,
}

/// In-process slot repository. The mutex makes every operation one critical
/// section, which gives `claim` the same all-or-nothing shape as the SQL version.
#[derive(Debug, Default)]
pub struct MemorySlotRepository {
    inner: Mutex<Slots>,
}

impl MemorySlotRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SlotRepository for MemorySlotRepository {
    async fn insert_slot(&self, new: &NewSlot) -> Result<InterviewerSlot, RegistryError> {
        let mut st = self.inner.lock().await;
        let duplicate = st.records.values().any(|r| {
            r.slot.source_sheet_id == new.source_sheet_id && r.slot.tab_name == new.tab_name
        });
        if duplicate {
            return Err(RegistryError::DuplicateSlot {
                sheet_id: new.source_sheet_id.clone(),
                tab_name: new.tab_name.clone(),
            });
        }

        st.next_id += 1;
        let slot = InterviewerSlot {
            slot_id: SlotId(st.next_id),
            faculty_id: new.faculty_id,
            source_sheet_id: new.source_sheet_id.clone(),
            tab_name: new.tab_name.clone(),
            experience_kind: new.experience_kind,
            claimed_by: None,
            claimed_username: None,
            invite_token: None,
        };
        st.records.insert(
            slot.slot_id,
            Record {
                slot: slot.clone(),
                claimed_token: None,
            },
        );
        Ok(slot)
    }

    async fn get_slot(&self, id: SlotId) -> Result<Option<InterviewerSlot>, RegistryError> {
        Ok(self
            .inner
            .lock()
            .await
            .records
            .get(&id)
            .map(|r| r.slot.clone()))
    }

    async fn find_by_actor(&self, actor: UserId) -> Result<Option<InterviewerSlot>, RegistryError> {
        Ok(self
            .inner
            .lock()
            .await
            .records
            .values()
            .find(|r| r.slot.claimed_by == Some(actor))
            .map(|r| r.slot.clone()))
    }

    async fn list_by_faculty(
        &self,
        faculty_id: FacultyId,
    ) -> Result<Vec<InterviewerSlot>, RegistryError> {
        Ok(self
            .inner
            .lock()
            .await
            .records
            .values()
            .filter(|r| r.slot.faculty_id == faculty_id)
            .map(|r| r.slot.clone())
            .collect())
    }

    async fn replace_invite_token(
        &self,
        id: SlotId,
        token: &str,
    ) -> Result<Option<String>, RegistryError> {
        let mut st = self.inner.lock().await;
        let record = st
            .records
            .get_mut(&id)
            .ok_or(RegistryError::SlotNotFound(id))?;
        if record.slot.is_claimed() {
            return Err(RegistryError::SlotAlreadyClaimed(id));
        }
        Ok(record.slot.invite_token.replace(token.to_string()))
    }

    async fn claim(
        &self,
        token: &str,
        actor: UserId,
        username: Option<&str>,
    ) -> Result<InterviewerSlot, RegistryError> {
        let mut st = self.inner.lock().await;

        let target = st
            .records
            .values()
            .find(|r| r.slot.invite_token.as_deref() == Some(token))
            .map(|r| r.slot.slot_id);

        let Some(id) = target else {
            let consumed = st
                .records
                .values()
                .any(|r| r.claimed_token.as_deref() == Some(token));
            return Err(if consumed {
                RegistryError::AlreadyClaimed
            } else {
                RegistryError::TokenNotFound
            });
        };

        if st
            .records
            .values()
            .any(|r| r.slot.claimed_by == Some(actor))
        {
            return Err(RegistryError::ActorAlreadyBound);
        }

        let record = st
            .records
            .get_mut(&id)
            .ok_or(RegistryError::TokenNotFound)?;
        if record.slot.is_claimed() {
            return Err(RegistryError::AlreadyClaimed);
        }
        record.slot.claimed_by = Some(actor);
        record.slot.claimed_username = username.map(str::to_string);
        record.claimed_token = record.slot.invite_token.take();
        Ok(record.slot.clone())
    }
}
