//! Google Sheets v4 values API over reqwest

use super::transport::SheetTransport;
use super::sheet::column_letter;
use super::{SyncError, SyncResult};
use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

pub struct HttpSheetTransport {
    client: Client,
    base: Url,
    spreadsheet_id: String,
    access_token: String,
}

impl std::fmt::Debug for HttpSheetTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSheetTransport")
            .field("base", &self.base.as_str())
            .field("spreadsheet_id", &self.spreadsheet_id)
            .finish()
    }
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Deserialize)]
struct Spreadsheet {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Deserialize)]
struct SheetProperties {
    title: String,
}

fn cell_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl HttpSheetTransport {
    pub fn new(
        api_base: &str,
        spreadsheet_id: impl Into<String>,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> SyncResult<Self> {
        let base = Url::parse(api_base)
            .map_err(|e| SyncError::Unavailable(format!("invalid sheets API base {api_base}: {e}")))?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base,
            spreadsheet_id: spreadsheet_id.into(),
            access_token: access_token.into(),
        })
    }

    fn url(&self, segments: &[&str]) -> SyncResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::Unavailable("sheets API base cannot carry a path".into()))?
            .pop_if_empty()
            .push("spreadsheets")
            .push(&self.spreadsheet_id)
            .extend(segments);
        Ok(url)
    }

    async fn check(response: Response) -> SyncResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SyncError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl SheetTransport for HttpSheetTransport {
    async fn list_tabs(&self) -> SyncResult<Vec<String>> {
        let url = self.url(&[])?;
        let response = self
            .client
            .get(url)
            .query(&[("fields", "sheets.properties.title")])
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let spreadsheet: Spreadsheet = Self::check(response).await?.json().await?;
        Ok(spreadsheet
            .sheets
            .into_iter()
            .map(|s| s.properties.title)
            .collect())
    }

    async fn read_rows(&self, tab: &str) -> SyncResult<Vec<Vec<String>>> {
        let url = self.url(&["values", tab])?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let range: ValueRange = Self::check(response).await?.json().await?;
        Ok(range
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_to_string).collect())
            .collect())
    }

    async fn append_rows(&self, tab: &str, rows: Vec<Vec<String>>) -> SyncResult<()> {
        let url = self.url(&["values", &format!("{tab}!A1:append")])?;
        let response = self
            .client
            .post(url)
            .query(&[
                ("valueInputOption", "RAW"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({ "values": rows }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn update_cells(
        &self,
        tab: &str,
        row: usize,
        column: usize,
        values: Vec<String>,
    ) -> SyncResult<()> {
        let range = format!("{tab}!{}{row}", column_letter(column));
        let url = self.url(&["values", &range])?;
        let response = self
            .client
            .put(url)
            .query(&[("valueInputOption", "RAW")])
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({ "range": range, "values": [values] }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_encodes_tab_names() {
        let transport = HttpSheetTransport::new(
            "https://sheets.googleapis.com/v4",
            "sheet-id",
            "token",
            Duration::from_secs(5),
        )
        .unwrap();
        let url = transport.url(&["values", "orders FFM!A1:append"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/sheet-id/values/orders%20FFM!A1:append"
        );
    }

    #[test]
    fn test_cell_values_become_strings() {
        assert_eq!(cell_to_string(Value::from(5)), "5");
        assert_eq!(cell_to_string(Value::Null), "");
        assert_eq!(cell_to_string(Value::from("x")), "x");
    }

    #[test]
    fn test_invalid_base_is_rejected() {
        assert!(HttpSheetTransport::new("not a url", "id", "t", Duration::from_secs(1)).is_err());
    }
}
