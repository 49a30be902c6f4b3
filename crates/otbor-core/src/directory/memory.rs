use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    domain::{FacultyId, SheetKind, UserId},
    errors::Error,
    sheets::ParticipantRow,
    Result,
};

use super::{AdminDirectory, Faculty, FacultyAdmin, FacultySheet};

#[derive(Debug, Default)]
struct State {
    next_faculty: i64,
    faculties: Vec<Faculty>,
    sheets: Vec<FacultySheet>,
    admins: Vec<FacultyAdmin>,
    participants: HashMap<FacultyId, Vec<ParticipantRow>>,
}

/// In-process directory for tests and database-less runs.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    state: Mutex<State>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AdminDirectory for MemoryDirectory {
    async fn create_faculty(
        &self,
        slug: &str,
        title: &str,
        description: Option<&str>,
    ) -> Result<Faculty> {
        let mut st = self.state.lock().await;
        if st.faculties.iter().any(|f| f.slug == slug) {
            return Err(Error::Conflict(format!("faculty {slug} already exists")));
        }
        st.next_faculty += 1;
        let faculty = Faculty {
            id: FacultyId(st.next_faculty),
            slug: slug.to_string(),
            title: title.to_string(),
            description: description.map(str::to_string),
            is_active: true,
        };
        st.faculties.push(faculty.clone());
        Ok(faculty)
    }

    async fn list_faculties(&self) -> Result<Vec<Faculty>> {
        let mut out = self.state.lock().await.faculties.clone();
        out.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(out)
    }

    async fn get_faculty(&self, id: FacultyId) -> Result<Option<Faculty>> {
        let st = self.state.lock().await;
        Ok(st.faculties.iter().find(|f| f.id == id).cloned())
    }

    async fn find_faculty_by_slug(&self, slug: &str) -> Result<Option<Faculty>> {
        let st = self.state.lock().await;
        Ok(st.faculties.iter().find(|f| f.slug == slug).cloned())
    }

    async fn upsert_sheet(
        &self,
        faculty_id: FacultyId,
        kind: SheetKind,
        spreadsheet_id: &str,
    ) -> Result<FacultySheet> {
        let mut st = self.state.lock().await;
        if !st.faculties.iter().any(|f| f.id == faculty_id) {
            return Err(Error::NotFound(format!("faculty {faculty_id}")));
        }
        let sheet = FacultySheet {
            faculty_id,
            kind,
            spreadsheet_id: spreadsheet_id.to_string(),
        };
        st.sheets
            .retain(|s| !(s.faculty_id == faculty_id && s.kind == kind));
        st.sheets.push(sheet.clone());
        Ok(sheet)
    }

    async fn sheets_for_faculty(&self, faculty_id: FacultyId) -> Result<Vec<FacultySheet>> {
        let st = self.state.lock().await;
        Ok(st
            .sheets
            .iter()
            .filter(|s| s.faculty_id == faculty_id)
            .cloned()
            .collect())
    }

    async fn assign_admin(
        &self,
        faculty_id: FacultyId,
        user: UserId,
        display_name: &str,
    ) -> Result<FacultyAdmin> {
        let mut st = self.state.lock().await;
        if st.admins.iter().any(|a| a.telegram_user_id == user) {
            return Err(Error::Conflict(format!("user {user} is already an admin")));
        }
        if !st.faculties.iter().any(|f| f.id == faculty_id) {
            return Err(Error::NotFound(format!("faculty {faculty_id}")));
        }
        let admin = FacultyAdmin {
            faculty_id,
            telegram_user_id: user,
            display_name: display_name.to_string(),
        };
        st.admins.push(admin.clone());
        Ok(admin)
    }

    async fn find_admin(&self, user: UserId) -> Result<Option<FacultyAdmin>> {
        let st = self.state.lock().await;
        Ok(st
            .admins
            .iter()
            .find(|a| a.telegram_user_id == user)
            .cloned())
    }

    async fn list_admins(&self) -> Result<Vec<FacultyAdmin>> {
        Ok(self.state.lock().await.admins.clone())
    }

    async fn replace_participants(
        &self,
        faculty_id: FacultyId,
        rows: &[ParticipantRow],
    ) -> Result<usize> {
        let mut deduped: Vec<ParticipantRow> = Vec::with_capacity(rows.len());
        for row in rows {
            match deduped.iter_mut().find(|r| r.vk_id == row.vk_id) {
                Some(existing) => *existing = row.clone(),
                None => deduped.push(row.clone()),
            }
        }
        let count = deduped.len();
        self.state.lock().await.participants.insert(faculty_id, deduped);
        Ok(count)
    }

    async fn count_participants(&self, faculty_id: FacultyId) -> Result<usize> {
        let st = self.state.lock().await;
        Ok(st.participants.get(&faculty_id).map_or(0, Vec::len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn faculty_slug_and_admin_are_unique() {
        let dir = MemoryDirectory::new();
        let f = dir.create_faculty("faculty-math", "Math", None).await.unwrap();
        assert!(matches!(
            dir.create_faculty("faculty-math", "Math", None).await,
            Err(Error::Conflict(_))
        ));

        dir.assign_admin(f.id, UserId(5), "Anna").await.unwrap();
        assert!(matches!(
            dir.assign_admin(f.id, UserId(5), "Anna").await,
            Err(Error::Conflict(_))
        ));
        assert_eq!(dir.find_admin(UserId(5)).await.unwrap().unwrap().faculty_id, f.id);
    }

    #[tokio::test]
    async fn sheets_upsert_per_kind() {
        let dir = MemoryDirectory::new();
        let f = dir.create_faculty("faculty-math", "Math", None).await.unwrap();
        dir.upsert_sheet(f.id, SheetKind::Opyt, "a").await.unwrap();
        dir.upsert_sheet(f.id, SheetKind::Opyt, "b").await.unwrap();
        dir.upsert_sheet(f.id, SheetKind::Svod, "c").await.unwrap();

        let sheets = dir.sheets_for_faculty(f.id).await.unwrap();
        assert_eq!(sheets.len(), 2);
        assert_eq!(
            super::super::sheet_of(&sheets, SheetKind::Opyt).map(|s| s.spreadsheet_id.as_str()),
            Some("b")
        );
    }

    #[tokio::test]
    async fn participants_are_replaced_and_deduplicated() {
        let dir = MemoryDirectory::new();
        let row = |vk_id, name: &str| ParticipantRow {
            vk_id,
            first_name: name.to_string(),
            last_name: "X".to_string(),
        };
        let n = dir
            .replace_participants(FacultyId(1), &[row(1, "a"), row(2, "b"), row(1, "c")])
            .await
            .unwrap();
        assert_eq!(n, 2);
        dir.replace_participants(FacultyId(1), &[row(3, "d")])
            .await
            .unwrap();
        assert_eq!(dir.count_participants(FacultyId(1)).await.unwrap(), 1);
    }
}
