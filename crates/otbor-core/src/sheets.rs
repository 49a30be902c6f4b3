//! Spreadsheet reader port plus the parsing the engine does on its output.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{errors::Error, Result};

#[async_trait]
pub trait SpreadsheetReader: Send + Sync {
    /// Titles of every tab. Order and duplicates carry no meaning.
    async fn list_tab_names(&self, spreadsheet_id: &str) -> Result<Vec<String>>;

    /// All cell values of one tab, row-major, first row being the header.
    async fn read_rows(&self, spreadsheet_id: &str, tab: &str) -> Result<Vec<Vec<String>>>;
}

/// Stand-in used when no Google credentials are configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledReader;

#[async_trait]
impl SpreadsheetReader for DisabledReader {
    async fn list_tab_names(&self, _spreadsheet_id: &str) -> Result<Vec<String>> {
        Err(disabled())
    }

    async fn read_rows(&self, _spreadsheet_id: &str, _tab: &str) -> Result<Vec<Vec<String>>> {
        Err(disabled())
    }
}

fn disabled() -> Error {
    Error::Config(
        "spreadsheet access is not configured (set GOOGLE_SHEETS_API_KEY or GOOGLE_SHEETS_ACCESS_TOKEN)"
            .to_string(),
    )
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRow {
    pub vk_id: i64,
    pub first_name: String,
    pub last_name: String,
}

const VK_HEADERS: &[&str] = &["vk_id", "vk", "vk id"];
const FIRST_NAME_HEADERS: &[&str] = &["first_name", "имя", "name"];
const LAST_NAME_HEADERS: &[&str] = &["last_name", "фамилия", "surname"];

/// Maps a participants tab onto rows. Headers are matched case-insensitively;
/// rows without a usable VK id are dropped.
pub fn participants_from_rows(rows: &[Vec<String>]) -> Vec<ParticipantRow> {
    let Some((header, body)) = rows.split_first() else {
        return Vec::new();
    };
    let col = |names: &[&str]| {
        header
            .iter()
            .position(|h| names.contains(&h.trim().to_lowercase().as_str()))
    };
    let Some(vk_col) = col(VK_HEADERS) else {
        return Vec::new();
    };
    let first_col = col(FIRST_NAME_HEADERS);
    let last_col = col(LAST_NAME_HEADERS);

    let cell = |row: &Vec<String>, idx: Option<usize>| {
        idx.and_then(|i| row.get(i))
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    };

    body.iter()
        .filter_map(|row| {
            let vk_id = parse_vk_id(&cell(row, Some(vk_col)))?;
            Some(ParticipantRow {
                vk_id,
                first_name: cell(row, first_col),
                last_name: cell(row, last_col),
            })
        })
        .collect()
}

/// Accepts `123`, `id123` and profile links like `https://vk.com/id123`.
pub fn parse_vk_id(raw: &str) -> Option<i64> {
    let s = raw.trim().trim_end_matches('/');
    let s = s.rsplit('/').next().unwrap_or(s);
    let s = s.strip_prefix("id").unwrap_or(s);
    s.parse::<i64>().ok().filter(|id| *id > 0)
}

fn link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"docs\.google\.com/spreadsheets/(?:u/\d+/)?d/([A-Za-z0-9_-]+)")
            .expect("valid regex")
    })
}

fn raw_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_-]{10,}$").expect("valid regex")
    })
}

/// Extracts the spreadsheet id from a full Google Sheets link.
pub fn spreadsheet_id_from_link(input: &str) -> Option<String> {
    link_re()
        .captures(input.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Accepts either a Google Sheets link or a bare spreadsheet id.
pub fn spreadsheet_id_from_input(input: &str) -> Option<String> {
    let input = input.trim();
    if let Some(id) = spreadsheet_id_from_link(input) {
        return Some(id);
    }
    raw_id_re()
        .is_match(input)
        .then(|| input.to_string())
}

/// Distinct, non-empty tab names in first-seen order.
pub fn dedup_tab_names(tabs: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tabs.len());
    for tab in tabs {
        let tab = tab.trim().to_string();
        if !tab.is_empty() && !out.contains(&tab) {
            out.push(tab);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn participants_headers_are_normalised() {
        let rows = vec![
            row(&["Фамилия", "Имя", "VK_ID"]),
            row(&["Ivanov", "Ivan", "101"]),
            row(&["Petrov", "Petr", ""]),
            row(&["Sidorov", "Sid", "https://vk.com/id303"]),
        ];
        let parsed = participants_from_rows(&rows);
        assert_eq!(
            parsed,
            vec![
                ParticipantRow {
                    vk_id: 101,
                    first_name: "Ivan".to_string(),
                    last_name: "Ivanov".to_string()
                },
                ParticipantRow {
                    vk_id: 303,
                    first_name: "Sid".to_string(),
                    last_name: "Sidorov".to_string()
                },
            ]
        );
    }

    #[test]
    fn participants_without_vk_column_yield_nothing() {
        let rows = vec![row(&["name", "surname"]), row(&["a", "b"])];
        assert!(participants_from_rows(&rows).is_empty());
        assert!(participants_from_rows(&[]).is_empty());
    }

    #[test]
    fn short_rows_read_missing_cells_as_empty() {
        let rows = vec![row(&["vk", "name", "surname"]), row(&["7"])];
        let parsed = participants_from_rows(&rows);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].first_name, "");
    }

    #[test]
    fn spreadsheet_ids_from_links_and_raw_ids() {
        let link = "https://docs.google.com/spreadsheets/d/1AbC-def_GHIjkl/edit#gid=0";
        assert_eq!(
            spreadsheet_id_from_link(link).as_deref(),
            Some("1AbC-def_GHIjkl")
        );
        assert_eq!(
            spreadsheet_id_from_input("1AbC-def_GHIjkl").as_deref(),
            Some("1AbC-def_GHIjkl")
        );
        assert_eq!(spreadsheet_id_from_link("1AbC-def_GHIjkl"), None);
        assert_eq!(spreadsheet_id_from_input("short"), None);
        assert_eq!(spreadsheet_id_from_input("https://example.com/x"), None);
    }

    #[test]
    fn tab_names_are_deduplicated() {
        let tabs = vec![
            "Ivanov".to_string(),
            " Petrov ".to_string(),
            "Ivanov".to_string(),
            "".to_string(),
        ];
        assert_eq!(dedup_tab_names(tabs), vec!["Ivanov", "Petrov"]);
    }
}
