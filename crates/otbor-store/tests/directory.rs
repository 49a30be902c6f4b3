mod common;

use otbor_core::{
    directory::{sheet_of, AdminDirectory},
    domain::{FacultyId, SheetKind, UserId},
    sheets::ParticipantRow,
    Error,
};

use common::{faculty, fresh_db};

fn participant(vk_id: i64, first: &str) -> ParticipantRow {
    ParticipantRow {
        vk_id,
        first_name: first.to_string(),
        last_name: "Test".to_string(),
    }
}

#[tokio::test]
async fn faculties_are_unique_by_slug_and_listed_by_title() {
    let db = fresh_db().await;
    let physics = db
        .directory
        .create_faculty("faculty-physics", "Physics", Some("second floor"))
        .await
        .unwrap();
    assert!(physics.is_active);
    assert_eq!(physics.description.as_deref(), Some("second floor"));
    db.directory
        .create_faculty("faculty-biology", "Biology", None)
        .await
        .unwrap();

    assert!(matches!(
        db.directory
            .create_faculty("faculty-physics", "Physics", None)
            .await,
        Err(Error::Conflict(_))
    ));

    let titles: Vec<_> = db
        .directory
        .list_faculties()
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.title)
        .collect();
    assert_eq!(titles, ["Biology", "Physics"]);

    let found = db
        .directory
        .find_faculty_by_slug("faculty-physics")
        .await
        .unwrap();
    assert_eq!(found, Some(physics.clone()));
    assert_eq!(db.directory.get_faculty(physics.id).await.unwrap(), Some(physics));
    assert_eq!(db.directory.get_faculty(FacultyId(404)).await.unwrap(), None);
}

#[tokio::test]
async fn sheets_upsert_per_kind() {
    let db = fresh_db().await;
    let f = faculty(&db, "Math").await;

    db.directory.upsert_sheet(f, SheetKind::Opyt, "a").await.unwrap();
    db.directory.upsert_sheet(f, SheetKind::Opyt, "b").await.unwrap();
    db.directory.upsert_sheet(f, SheetKind::Svod, "c").await.unwrap();

    let sheets = db.directory.sheets_for_faculty(f).await.unwrap();
    assert_eq!(sheets.len(), 2);
    assert_eq!(
        sheet_of(&sheets, SheetKind::Opyt).map(|s| s.spreadsheet_id.as_str()),
        Some("b")
    );

    assert!(matches!(
        db.directory
            .upsert_sheet(FacultyId(404), SheetKind::Opyt, "x")
            .await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn one_faculty_per_admin() {
    let db = fresh_db().await;
    let math = faculty(&db, "Math").await;
    let bio = faculty(&db, "Bio").await;

    let admin = db
        .directory
        .assign_admin(math, UserId(5), "Anna")
        .await
        .unwrap();
    assert_eq!(admin.display_name, "Anna");
    assert!(matches!(
        db.directory.assign_admin(bio, UserId(5), "Anna").await,
        Err(Error::Conflict(_))
    ));
    assert!(matches!(
        db.directory
            .assign_admin(FacultyId(404), UserId(6), "Boris")
            .await,
        Err(Error::NotFound(_))
    ));

    db.directory.assign_admin(bio, UserId(7), "Vera").await.unwrap();
    let admins = db.directory.list_admins().await.unwrap();
    let ids: Vec<_> = admins.iter().map(|a| a.telegram_user_id).collect();
    assert_eq!(ids, [UserId(5), UserId(7)]);
    assert_eq!(
        db.directory
            .find_admin(UserId(7))
            .await
            .unwrap()
            .map(|a| a.faculty_id),
        Some(bio)
    );
    assert_eq!(db.directory.find_admin(UserId(8)).await.unwrap(), None);
}

#[tokio::test]
async fn participant_import_replaces_and_dedups() {
    let db = fresh_db().await;
    let math = faculty(&db, "Math").await;
    let bio = faculty(&db, "Bio").await;

    let stored = db
        .directory
        .replace_participants(
            math,
            &[participant(1, "A"), participant(2, "B"), participant(1, "C")],
        )
        .await
        .unwrap();
    assert_eq!(stored, 2);
    db.directory
        .replace_participants(bio, &[participant(1, "Z")])
        .await
        .unwrap();

    // A second import replaces the first one entirely.
    let stored = db
        .directory
        .replace_participants(math, &[participant(9, "N")])
        .await
        .unwrap();
    assert_eq!(stored, 1);
    assert_eq!(db.directory.count_participants(math).await.unwrap(), 1);
    assert_eq!(db.directory.count_participants(bio).await.unwrap(), 1);
}
