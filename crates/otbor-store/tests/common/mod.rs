use otbor_core::{
    directory::{AdminDirectory, Faculty},
    domain::FacultyId,
};
use otbor_store::{SqlDirectory, SqlSlotRepository};
use tempfile::TempDir;

pub struct Db {
    // Keeps the database file alive for the test.
    _dir: TempDir,
    pub slots: SqlSlotRepository,
    pub directory: SqlDirectory,
}

pub async fn fresh_db() -> Db {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("test.db").display());
    let pool = otbor_store::connect(&url).await.unwrap();
    Db {
        _dir: dir,
        slots: SqlSlotRepository::new(pool.clone()),
        directory: SqlDirectory::new(pool),
    }
}

#[allow(dead_code)]
pub async fn faculty(db: &Db, title: &str) -> FacultyId {
    let slug = otbor_core::directory::faculty_slug(title);
    let f: Faculty = db.directory.create_faculty(&slug, title, None).await.unwrap();
    f.id
}
