use async_trait::async_trait;
use otbor_core::{
    directory::{AdminDirectory, Faculty, FacultyAdmin, FacultySheet},
    domain::{FacultyId, SheetKind, UserId},
    sheets::ParticipantRow,
    Error, Result,
};
use sqlx::SqlitePool;
use tracing::info;

use crate::{db_err, is_foreign_key_violation, is_unique_violation};

#[derive(Debug, sqlx::FromRow)]
struct FacultyRow {
    id: i64,
    slug: String,
    title: String,
    description: Option<String>,
    is_active: bool,
}

impl From<FacultyRow> for Faculty {
    fn from(row: FacultyRow) -> Self {
        Faculty {
            id: FacultyId(row.id),
            slug: row.slug,
            title: row.title,
            description: row.description,
            is_active: row.is_active,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SheetRow {
    faculty_id: i64,
    kind: String,
    spreadsheet_id: String,
}

impl TryFrom<SheetRow> for FacultySheet {
    type Error = Error;

    fn try_from(row: SheetRow) -> Result<Self> {
        let kind = SheetKind::parse(&row.kind)
            .ok_or_else(|| Error::StoreUnavailable(format!("unknown sheet kind {:?}", row.kind)))?;
        Ok(FacultySheet {
            faculty_id: FacultyId(row.faculty_id),
            kind,
            spreadsheet_id: row.spreadsheet_id,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AdminRow {
    faculty_id: i64,
    telegram_user_id: i64,
    display_name: String,
}

impl From<AdminRow> for FacultyAdmin {
    fn from(row: AdminRow) -> Self {
        FacultyAdmin {
            faculty_id: FacultyId(row.faculty_id),
            telegram_user_id: UserId(row.telegram_user_id),
            display_name: row.display_name,
        }
    }
}

/// Faculties, sheets, admins and participants.
#[derive(Clone, Debug)]
pub struct SqlDirectory {
    pool: SqlitePool,
}

impl SqlDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn missing_faculty(faculty_id: FacultyId) -> Error {
    Error::NotFound(format!("faculty {faculty_id}"))
}

#[async_trait]
impl AdminDirectory for SqlDirectory {
    async fn create_faculty(
        &self,
        slug: &str,
        title: &str,
        description: Option<&str>,
    ) -> Result<Faculty> {
        let row: FacultyRow = sqlx::query_as(
            r#"
            INSERT INTO faculties (slug, title, description)
            VALUES (?, ?, ?)
            RETURNING id, slug, title, description, is_active
            "#,
        )
        .bind(slug)
        .bind(title)
        .bind(description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::Conflict(format!("faculty {slug} already exists"))
            } else {
                db_err("create faculty", e)
            }
        })?;
        info!(faculty_id = row.id, slug, "faculty created");
        Ok(row.into())
    }

    async fn list_faculties(&self) -> Result<Vec<Faculty>> {
        let rows: Vec<FacultyRow> = sqlx::query_as(
            "SELECT id, slug, title, description, is_active FROM faculties ORDER BY title, id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("list faculties", e))?;
        Ok(rows.into_iter().map(Faculty::from).collect())
    }

    async fn get_faculty(&self, id: FacultyId) -> Result<Option<Faculty>> {
        let row: Option<FacultyRow> = sqlx::query_as(
            "SELECT id, slug, title, description, is_active FROM faculties WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("get faculty", e))?;
        Ok(row.map(Faculty::from))
    }

    async fn find_faculty_by_slug(&self, slug: &str) -> Result<Option<Faculty>> {
        let row: Option<FacultyRow> = sqlx::query_as(
            "SELECT id, slug, title, description, is_active FROM faculties WHERE slug = ?",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("find faculty", e))?;
        Ok(row.map(Faculty::from))
    }

    async fn upsert_sheet(
        &self,
        faculty_id: FacultyId,
        kind: SheetKind,
        spreadsheet_id: &str,
    ) -> Result<FacultySheet> {
        let row: SheetRow = sqlx::query_as(
            r#"
            INSERT INTO faculty_sheets (faculty_id, kind, spreadsheet_id)
            VALUES (?, ?, ?)
            ON CONFLICT (faculty_id, kind) DO UPDATE SET spreadsheet_id = excluded.spreadsheet_id
            RETURNING faculty_id, kind, spreadsheet_id
            "#,
        )
        .bind(faculty_id.0)
        .bind(kind.as_str())
        .bind(spreadsheet_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                missing_faculty(faculty_id)
            } else {
                db_err("upsert sheet", e)
            }
        })?;
        row.try_into()
    }

    async fn sheets_for_faculty(&self, faculty_id: FacultyId) -> Result<Vec<FacultySheet>> {
        let rows: Vec<SheetRow> = sqlx::query_as(
            "SELECT faculty_id, kind, spreadsheet_id FROM faculty_sheets WHERE faculty_id = ? ORDER BY kind",
        )
        .bind(faculty_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("list sheets", e))?;
        rows.into_iter().map(FacultySheet::try_from).collect()
    }

    async fn assign_admin(
        &self,
        faculty_id: FacultyId,
        user: UserId,
        display_name: &str,
    ) -> Result<FacultyAdmin> {
        let row: AdminRow = sqlx::query_as(
            r#"
            INSERT INTO faculty_admins (telegram_user_id, faculty_id, display_name)
            VALUES (?, ?, ?)
            RETURNING faculty_id, telegram_user_id, display_name
            "#,
        )
        .bind(user.0)
        .bind(faculty_id.0)
        .bind(display_name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::Conflict(format!("user {user} is already an admin"))
            } else if is_foreign_key_violation(&e) {
                missing_faculty(faculty_id)
            } else {
                db_err("assign admin", e)
            }
        })?;
        info!(faculty_id = faculty_id.0, user = user.0, "faculty admin assigned");
        Ok(row.into())
    }

    async fn find_admin(&self, user: UserId) -> Result<Option<FacultyAdmin>> {
        let row: Option<AdminRow> = sqlx::query_as(
            "SELECT faculty_id, telegram_user_id, display_name FROM faculty_admins WHERE telegram_user_id = ?",
        )
        .bind(user.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("find admin", e))?;
        Ok(row.map(FacultyAdmin::from))
    }

    async fn list_admins(&self) -> Result<Vec<FacultyAdmin>> {
        let rows: Vec<AdminRow> = sqlx::query_as(
            "SELECT faculty_id, telegram_user_id, display_name FROM faculty_admins ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("list admins", e))?;
        Ok(rows.into_iter().map(FacultyAdmin::from).collect())
    }

    async fn replace_participants(
        &self,
        faculty_id: FacultyId,
        rows: &[ParticipantRow],
    ) -> Result<usize> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_err("begin import", e))?;

        sqlx::query("DELETE FROM participants WHERE faculty_id = ?")
            .bind(faculty_id.0)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_err("clear participants", e))?;

        // Later rows for the same VK id win.
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO participants (faculty_id, vk_id, first_name, last_name)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (faculty_id, vk_id) DO UPDATE
                SET first_name = excluded.first_name, last_name = excluded.last_name
                "#,
            )
            .bind(faculty_id.0)
            .bind(row.vk_id)
            .bind(&row.first_name)
            .bind(&row.last_name)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    missing_faculty(faculty_id)
                } else {
                    db_err("insert participant", e)
                }
            })?;
        }

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM participants WHERE faculty_id = ?")
            .bind(faculty_id.0)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| db_err("count participants", e))?;

        tx.commit()
            .await
            .map_err(|e| db_err("commit import", e))?;
        info!(faculty_id = faculty_id.0, count, "participants replaced");
        Ok(count as usize)
    }

    async fn count_participants(&self, faculty_id: FacultyId) -> Result<usize> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM participants WHERE faculty_id = ?")
            .bind(faculty_id.0)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_err("count participants", e))?;
        Ok(count as usize)
    }
}
