use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use leavedesk_core::config::{GradeConfig, SheetsConfig};
use leavedesk_core::errors::GatewayError;
use leavedesk_core::gateway::{
    students_from_table, CellAddress, LedgerGateway, LedgerTable, RosterGateway,
};
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct SpreadsheetMetadata {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// Wraps a sheet title for A1 notation; embedded quotes are doubled.
pub fn quote_sheet_name(name: &str) -> String {
    format!("'{}'", name.replace('\'', "''"))
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Roster and ledger access backed by the Sheets v4 REST API.
pub struct SheetsGateway {
    http: reqwest::Client,
    base_url: Url,
    access_token: SecretString,
    read_range: String,
    name_header: String,
    spreadsheets: BTreeMap<String, String>,
}

impl SheetsGateway {
    pub fn new(
        config: &SheetsConfig,
        grades: &[GradeConfig],
        name_header: impl Into<String>,
    ) -> Result<Self, GatewayError> {
        let base_url = Url::parse(&config.api_base_url)
            .map_err(|error| GatewayError::Decode(format!("invalid sheets base url: {error}")))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| GatewayError::Transport(error.to_string()))?;
        let spreadsheets = grades
            .iter()
            .map(|grade| (grade.name.clone(), grade.spreadsheet_id.clone()))
            .collect();

        Ok(Self {
            http,
            base_url,
            access_token: config.access_token.clone(),
            read_range: config.read_range.clone(),
            name_header: name_header.into(),
            spreadsheets,
        })
    }

    fn spreadsheet_id(&self, grade: &str) -> Result<&str, GatewayError> {
        self.spreadsheets
            .get(grade)
            .map(String::as_str)
            .ok_or_else(|| GatewayError::UnknownGrade(grade.to_owned()))
    }

    fn url(&self, segments: &[&str]) -> Result<Url, GatewayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| GatewayError::Decode("sheets base url cannot take a path".to_owned()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets"])
            .extend(segments);
        Ok(url)
    }

    pub(crate) fn metadata_url(&self, grade: &str) -> Result<Url, GatewayError> {
        let mut url = self.url(&[self.spreadsheet_id(grade)?])?;
        url.query_pairs_mut().append_pair("fields", "sheets.properties.title");
        Ok(url)
    }

    pub(crate) fn values_url(&self, grade: &str, class_name: &str) -> Result<Url, GatewayError> {
        let range = format!("{}!{}", quote_sheet_name(class_name), self.read_range);
        self.url(&[self.spreadsheet_id(grade)?, "values", &range])
    }

    pub(crate) fn cell_url(
        &self,
        grade: &str,
        class_name: &str,
        address: CellAddress,
    ) -> Result<Url, GatewayError> {
        let range = format!("{}!{}", quote_sheet_name(class_name), address.a1());
        let mut url = self.url(&[self.spreadsheet_id(grade)?, "values", &range])?;
        url.query_pairs_mut().append_pair("valueInputOption", "USER_ENTERED");
        Ok(url)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        warn!(
            event_name = "ledger.sheets.request_failed",
            status = status.as_u16(),
            "sheets request returned an error status"
        );
        Err(GatewayError::Status { status: status.as_u16(), message })
    }

    async fn get_json<T>(&self, url: Url) -> Result<T, GatewayError>
    where
        T: for<'de> Deserialize<'de>,
    {
        debug!(url = %url, "sheets read");
        let response = self
            .http
            .get(url)
            .bearer_auth(self.access_token.expose_secret())
            .send()
            .await
            .map_err(|error| GatewayError::Transport(error.to_string()))?;
        Self::check(response)
            .await?
            .json::<T>()
            .await
            .map_err(|error| GatewayError::Decode(error.to_string()))
    }
}

#[async_trait]
impl RosterGateway for SheetsGateway {
    async fn list_classes(&self, grade: &str) -> Result<Vec<String>, GatewayError> {
        let metadata: SpreadsheetMetadata = self.get_json(self.metadata_url(grade)?).await?;
        Ok(metadata.sheets.into_iter().map(|sheet| sheet.properties.title).collect())
    }

    async fn list_students(
        &self,
        grade: &str,
        class_name: &str,
    ) -> Result<Vec<String>, GatewayError> {
        let table = self.read_table(grade, class_name).await?;
        Ok(students_from_table(&table, &self.name_header))
    }
}

#[async_trait]
impl LedgerGateway for SheetsGateway {
    async fn read_table(&self, grade: &str, class_name: &str) -> Result<LedgerTable, GatewayError> {
        let range: ValueRange = self.get_json(self.values_url(grade, class_name)?).await?;
        Ok(table_from_values(range.values))
    }

    async fn write_cell(
        &self,
        grade: &str,
        class_name: &str,
        address: CellAddress,
        value: &str,
    ) -> Result<(), GatewayError> {
        let url = self.cell_url(grade, class_name, address)?;
        debug!(url = %url, "sheets write");
        let response = self
            .http
            .put(url)
            .bearer_auth(self.access_token.expose_secret())
            .json(&json!({ "values": [[value]] }))
            .send()
            .await
            .map_err(|error| GatewayError::Transport(error.to_string()))?;
        Self::check(response).await.map(|_| ())
    }
}

fn table_from_values(values: Vec<Vec<Value>>) -> LedgerTable {
    LedgerTable::from_values(
        values.iter().map(|row| row.iter().map(cell_text).collect()).collect(),
    )
}
