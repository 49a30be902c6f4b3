//! Interviewer discovery: every tab of a faculty's interviewer sheets becomes a slot.

use std::sync::Arc;

use crate::{
    directory::{sheet_of, AdminDirectory},
    domain::{FacultyId, SheetKind},
    errors::Error,
    sheets::{dedup_tab_names, SpreadsheetReader},
    slots::{RegistryError, SlotRegistry},
    Result,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    /// Distinct tab names seen.
    pub found: usize,
    pub created: usize,
    /// Tabs that already had a slot.
    pub known: usize,
}

impl DiscoveryReport {
    fn absorb(&mut self, other: DiscoveryReport) {
        self.found += other.found;
        self.created += other.created;
        self.known += other.known;
    }
}

pub struct Discovery {
    registry: Arc<SlotRegistry>,
    directory: Arc<dyn AdminDirectory>,
    reader: Arc<dyn SpreadsheetReader>,
}

impl Discovery {
    pub fn new(
        registry: Arc<SlotRegistry>,
        directory: Arc<dyn AdminDirectory>,
        reader: Arc<dyn SpreadsheetReader>,
    ) -> Self {
        Self {
            registry,
            directory,
            reader,
        }
    }

    /// Scans both interviewer sheets of the faculty. Kinds without a configured
    /// sheet are skipped; having neither is an error.
    pub async fn discover(&self, faculty_id: FacultyId) -> Result<DiscoveryReport> {
        let sheets = self.directory.sheets_for_faculty(faculty_id).await?;
        let mut report = DiscoveryReport::default();
        let mut scanned = 0;
        for kind in [SheetKind::NeOpyt, SheetKind::Opyt] {
            let Some(sheet) = sheet_of(&sheets, kind) else {
                continue;
            };
            report.absorb(self.scan(faculty_id, kind, &sheet.spreadsheet_id).await?);
            scanned += 1;
        }
        if scanned == 0 {
            return Err(Error::NotFound(
                "no interviewer sheets configured for this faculty".to_string(),
            ));
        }
        tracing::info!(
            faculty_id = %faculty_id,
            found = report.found,
            created = report.created,
            known = report.known,
            "discovery finished"
        );
        Ok(report)
    }

    /// Scans one interviewer sheet. Returns the spreadsheet id that was read.
    pub async fn discover_kind(
        &self,
        faculty_id: FacultyId,
        kind: SheetKind,
    ) -> Result<(String, DiscoveryReport)> {
        if kind.experience().is_none() {
            return Err(Error::NotFound(format!("{kind} is not an interviewer sheet")));
        }
        let sheets = self.directory.sheets_for_faculty(faculty_id).await?;
        let sheet = sheet_of(&sheets, kind)
            .ok_or_else(|| Error::NotFound(format!("{kind} sheet is not configured")))?;
        let report = self.scan(faculty_id, kind, &sheet.spreadsheet_id).await?;
        Ok((sheet.spreadsheet_id.clone(), report))
    }

    async fn scan(
        &self,
        faculty_id: FacultyId,
        kind: SheetKind,
        spreadsheet_id: &str,
    ) -> Result<DiscoveryReport> {
        let Some(experience) = kind.experience() else {
            return Ok(DiscoveryReport::default());
        };
        let tabs = self
            .reader
            .list_tab_names(spreadsheet_id)
            .await
            .map_err(|e| Error::External(format!("cannot read {kind} sheet: {e}")))?;
        let tabs = dedup_tab_names(tabs);

        let mut report = DiscoveryReport {
            found: tabs.len(),
            ..DiscoveryReport::default()
        };
        for tab in &tabs {
            match self
                .registry
                .create_slot(faculty_id, spreadsheet_id, tab, experience)
                .await
            {
                Ok(_) => report.created += 1,
                Err(RegistryError::DuplicateSlot { .. }) => report.known += 1,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{collections::HashMap, time::Duration};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        directory::MemoryDirectory, domain::ExperienceKind, slots::MemorySlotRepository,
        token_store::MemoryTokenStore,
    };

    /// Spreadsheet reader serving canned tabs; unknown spreadsheets fail.
    #[derive(Default)]
    pub(crate) struct FakeReader {
        pub tabs: HashMap<String, Vec<String>>,
        pub rows: HashMap<(String, String), Vec<Vec<String>>>,
    }

    #[async_trait]
    impl SpreadsheetReader for FakeReader {
        async fn list_tab_names(&self, spreadsheet_id: &str) -> Result<Vec<String>> {
            self.tabs
                .get(spreadsheet_id)
                .cloned()
                .ok_or_else(|| Error::External(format!("404 for {spreadsheet_id}")))
        }

        async fn read_rows(&self, spreadsheet_id: &str, tab: &str) -> Result<Vec<Vec<String>>> {
            self.rows
                .get(&(spreadsheet_id.to_string(), tab.to_string()))
                .cloned()
                .ok_or_else(|| Error::External(format!("404 for {spreadsheet_id}/{tab}")))
        }
    }

    fn tabs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    async fn setup(reader: FakeReader) -> (Discovery, Arc<SlotRegistry>, Arc<MemoryDirectory>, FacultyId) {
        let directory = Arc::new(MemoryDirectory::new());
        let f = directory
            .create_faculty("faculty-math", "Math", None)
            .await
            .unwrap();
        let registry = Arc::new(SlotRegistry::new(
            Arc::new(MemorySlotRepository::new()),
            Arc::new(MemoryTokenStore::new()),
            "otbor:",
            Duration::from_secs(60),
        ));
        let discovery = Discovery::new(registry.clone(), directory.clone(), Arc::new(reader));
        (discovery, registry, directory, f.id)
    }

    #[tokio::test]
    async fn rescans_skip_known_tabs() {
        let mut reader = FakeReader::default();
        reader
            .tabs
            .insert("new-sheet".to_string(), tabs(&["Ivanov", "Petrov", "Ivanov"]));
        reader.tabs.insert("exp-sheet".to_string(), tabs(&["Sidorov"]));
        let (discovery, registry, directory, f) = setup(reader).await;
        directory
            .upsert_sheet(f, SheetKind::NeOpyt, "new-sheet")
            .await
            .unwrap();
        directory
            .upsert_sheet(f, SheetKind::Opyt, "exp-sheet")
            .await
            .unwrap();

        let first = discovery.discover(f).await.unwrap();
        assert_eq!(
            first,
            DiscoveryReport {
                found: 3,
                created: 3,
                known: 0
            }
        );
        let second = discovery.discover(f).await.unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.known, 3);

        let slots = registry.list_by_faculty(f).await.unwrap();
        assert_eq!(slots.len(), 3);
        let sidorov = slots.iter().find(|s| s.tab_name == "Sidorov").unwrap();
        assert_eq!(sidorov.experience_kind, ExperienceKind::Experienced);
    }

    #[tokio::test]
    async fn reader_failure_names_the_sheet_kind() {
        let (discovery, _, directory, f) = setup(FakeReader::default()).await;
        directory
            .upsert_sheet(f, SheetKind::Opyt, "missing")
            .await
            .unwrap();
        let err = discovery.discover(f).await.unwrap_err();
        assert!(err.to_string().contains("opyt sheet"), "{err}");
    }

    #[tokio::test]
    async fn discovery_needs_a_configured_sheet() {
        let (discovery, _, _, f) = setup(FakeReader::default()).await;
        assert!(matches!(
            discovery.discover(f).await.unwrap_err(),
            Error::NotFound(_)
        ));
        assert!(matches!(
            discovery.discover_kind(f, SheetKind::Svod).await.unwrap_err(),
            Error::NotFound(_)
        ));
    }
}
