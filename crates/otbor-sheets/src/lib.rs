//! Google Sheets adapter (read-only).
//!
//! Uses the Sheets v4 REST API: spreadsheet metadata for tab titles and the
//! `values` endpoint for cell contents.

use std::time::Duration;

use async_trait::async_trait;
use otbor_core::{config::Config, errors::Error, sheets::SpreadsheetReader, Result};
use serde::Deserialize;

const API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

#[derive(Clone, Debug)]
enum Credentials {
    ApiKey(String),
    AccessToken(String),
}

#[derive(Clone, Debug)]
pub struct GoogleSheetsReader {
    credentials: Credentials,
    base_url: String,
    http: reqwest::Client,
}

impl GoogleSheetsReader {
    /// `None` when neither an API key nor an access token is configured.
    pub fn from_config(cfg: &Config) -> Result<Option<Self>> {
        let credentials = match (&cfg.google_access_token, &cfg.google_api_key) {
            (Some(token), _) => Credentials::AccessToken(token.clone()),
            (None, Some(key)) => Credentials::ApiKey(key.clone()),
            (None, None) => return Ok(None),
        };
        Self::new(credentials, API_BASE).map(Some)
    }

    fn new(credentials: Credentials, base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| Error::External(format!("sheets client build error: {e}")))?;
        Ok(Self {
            credentials,
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| Error::Config(format!("invalid sheets base url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| Error::Config("sheets base url cannot be a base".to_string()))?
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: reqwest::Url,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let mut req = self.http.get(url).query(query);
        req = match &self.credentials {
            Credentials::ApiKey(key) => req.query(&[("key", key.as_str())]),
            Credentials::AccessToken(token) => req.bearer_auth(token),
        };

        let resp = req
            .send()
            .await
            .map_err(|e| Error::External(format!("sheets request error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(%status, "sheets request failed");
            return Err(Error::External(format!(
                "sheets request failed: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        resp.json()
            .await
            .map_err(|e| Error::External(format!("sheets json error: {e}")))
    }
}

#[async_trait]
impl SpreadsheetReader for GoogleSheetsReader {
    async fn list_tab_names(&self, spreadsheet_id: &str) -> Result<Vec<String>> {
        let url = self.url(&[spreadsheet_id])?;
        let meta: SpreadsheetMeta = self
            .get_json(url, &[("fields", "sheets.properties.title")])
            .await?;
        Ok(meta.tab_titles())
    }

    async fn read_rows(&self, spreadsheet_id: &str, tab: &str) -> Result<Vec<Vec<String>>> {
        let range = a1_range(tab);
        let url = self.url(&[spreadsheet_id, "values", &range])?;
        let values: ValueRange = self
            .get_json(url, &[("valueRenderOption", "FORMATTED_VALUE")])
            .await?;
        Ok(values.into_rows())
    }
}

/// Whole-tab A1 range. Quotes are doubled inside the quoted sheet name.
fn a1_range(tab: &str) -> String {
    format!("'{}'", tab.replace('\'', "''"))
}

#[derive(Debug, Default, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    #[serde(default)]
    title: String,
}

impl SpreadsheetMeta {
    fn tab_titles(self) -> Vec<String> {
        self.sheets
            .into_iter()
            .map(|s| s.properties.title)
            .filter(|t| !t.trim().is_empty())
            .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

impl ValueRange {
    fn into_rows(self) -> Vec<Vec<String>> {
        self.values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect()
    }
}

fn cell_text(v: serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tab_titles_from_metadata() {
        let body = r#"{"sheets":[{"properties":{"title":"Ivanov"}},{"properties":{"title":" "}},{"properties":{"title":"Petrov"}}]}"#;
        let meta: SpreadsheetMeta = serde_json::from_str(body).unwrap();
        assert_eq!(meta.tab_titles(), vec!["Ivanov", "Petrov"]);

        let empty: SpreadsheetMeta = serde_json::from_str("{}").unwrap();
        assert!(empty.tab_titles().is_empty());
    }

    #[test]
    fn value_ranges_become_strings() {
        let body = r#"{"range":"'участники'!A1:C3","values":[["vk_id","Имя"],[101,"Ivan",null]]}"#;
        let vr: ValueRange = serde_json::from_str(body).unwrap();
        assert_eq!(
            vr.into_rows(),
            vec![
                vec!["vk_id".to_string(), "Имя".to_string()],
                vec!["101".to_string(), "Ivan".to_string(), String::new()],
            ]
        );
    }

    #[test]
    fn ranges_quote_sheet_names() {
        assert_eq!(a1_range("участники"), "'участники'");
        assert_eq!(a1_range("O'Neil"), "'O''Neil'");
    }

    #[test]
    fn urls_escape_path_segments() {
        let reader =
            GoogleSheetsReader::new(Credentials::ApiKey("k".to_string()), API_BASE).unwrap();
        let url = reader.url(&["abc", "values", "'a b/c'"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/abc/values/'a%20b%2Fc'"
        );
    }
}
