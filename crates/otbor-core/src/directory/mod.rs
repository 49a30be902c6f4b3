//! Admin directory: faculties, their spreadsheets, faculty admins and imported
//! participants. Plain CRUD; the wizard writes here on completion.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    domain::{FacultyId, SheetKind, UserId},
    sheets::ParticipantRow,
    Result,
};

pub mod memory;

pub use memory::MemoryDirectory;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Faculty {
    pub id: FacultyId,
    pub slug: String,
    pub title: String,
    pub description: Option<String>,
    pub is_active: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FacultySheet {
    pub faculty_id: FacultyId,
    pub kind: SheetKind,
    pub spreadsheet_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FacultyAdmin {
    pub faculty_id: FacultyId,
    pub telegram_user_id: UserId,
    pub display_name: String,
}

#[async_trait]
pub trait AdminDirectory: Send + Sync {
    /// Fails with `Error::Conflict` when the slug is taken.
    async fn create_faculty(
        &self,
        slug: &str,
        title: &str,
        description: Option<&str>,
    ) -> Result<Faculty>;

    /// Ordered by title.
    async fn list_faculties(&self) -> Result<Vec<Faculty>>;

    async fn get_faculty(&self, id: FacultyId) -> Result<Option<Faculty>>;

    async fn find_faculty_by_slug(&self, slug: &str) -> Result<Option<Faculty>>;

    /// One sheet per `(faculty, kind)`; setting it again overwrites.
    async fn upsert_sheet(
        &self,
        faculty_id: FacultyId,
        kind: SheetKind,
        spreadsheet_id: &str,
    ) -> Result<FacultySheet>;

    async fn sheets_for_faculty(&self, faculty_id: FacultyId) -> Result<Vec<FacultySheet>>;

    /// Fails with `Error::Conflict` when the user already administers a faculty.
    async fn assign_admin(
        &self,
        faculty_id: FacultyId,
        user: UserId,
        display_name: &str,
    ) -> Result<FacultyAdmin>;

    async fn find_admin(&self, user: UserId) -> Result<Option<FacultyAdmin>>;

    async fn list_admins(&self) -> Result<Vec<FacultyAdmin>>;

    /// Replaces the faculty's participant list, returning the stored count.
    async fn replace_participants(
        &self,
        faculty_id: FacultyId,
        rows: &[ParticipantRow],
    ) -> Result<usize>;

    async fn count_participants(&self, faculty_id: FacultyId) -> Result<usize>;
}

/// `faculty-<title lowercased, spaces to dashes>`.
pub fn faculty_slug(title: &str) -> String {
    let body = title
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-");
    format!("faculty-{body}")
}

pub fn sheet_of(sheets: &[FacultySheet], kind: SheetKind) -> Option<&FacultySheet> {
    sheets.iter().find(|s| s.kind == kind)
}
