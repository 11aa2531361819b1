//! Google Sheets API v4 クライアント
//!
//! ワークシートを「行番号×列番号」で参照できる表として扱う。
//! アクセストークンは解決済みのものを受け取る。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::SheetsConfig;
use crate::error::ScraperError;
use crate::traits::SheetStore;

/// 書き込むセル値
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Number(u32),
    Text(String),
}

/// 1セル分の更新（row はヘッダーを1行目とするシート上の行番号、column は0始まり）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellUpdate {
    pub row: usize,
    pub column: usize,
    pub value: CellValue,
}

impl CellUpdate {
    pub fn a1(&self) -> String {
        a1_notation(self.row, self.column)
    }
}

/// 0始まりの列番号を列記号へ（0 → A, 26 → AA）
pub fn column_letters(column: usize) -> String {
    let mut n = column + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

pub fn a1_notation(row: usize, column: usize) -> String {
    format!("{}{}", column_letters(column), row)
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchUpdateRequest<'a> {
    value_input_option: &'static str,
    data: Vec<RangeValues<'a>>,
}

#[derive(Debug, Serialize)]
struct RangeValues<'a> {
    range: String,
    values: [[&'a CellValue; 1]; 1],
}

pub struct SheetsClient {
    client: Client,
    config: SheetsConfig,
}

impl SheetsClient {
    pub fn new(config: SheetsConfig) -> Result<Self, ScraperError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, config })
    }

    /// `'シート名'` 形式（シングルクォートは二重化）
    fn quoted_worksheet(&self) -> String {
        format!("'{}'", self.config.worksheet.replace('\'', "''"))
    }

    fn url(&self, last_segments: &[&str]) -> Result<Url, ScraperError> {
        let mut url = Url::parse(&self.config.api_base)
            .map_err(|e| ScraperError::Config(format!("api_base {}: {}", self.config.api_base, e)))?;
        url.path_segments_mut()
            .map_err(|_| ScraperError::Config(format!("api_base {}", self.config.api_base)))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", self.config.spreadsheet_id.as_str()])
            .extend(last_segments);
        Ok(url)
    }

    async fn get_values(&self, range: &str) -> Result<Vec<Vec<String>>, ScraperError> {
        let url = self.url(&["values", range])?;
        debug!("GET {}", url);

        let response = self
            .client
            .get(url.clone())
            .bearer_auth(&self.config.access_token)
            .query(&[
                ("majorDimension", "ROWS"),
                ("valueRenderOption", "FORMATTED_VALUE"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScraperError::Sheets(format!(
                "HTTP {} from {}: {}",
                status.as_u16(),
                url,
                body
            )));
        }

        let range: ValueRange = response.json().await?;
        Ok(range
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_to_string).collect())
            .collect())
    }
}

fn cell_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl SheetStore for SheetsClient {
    async fn read_all(&self) -> Result<Vec<Vec<String>>, ScraperError> {
        let rows = self.get_values(&self.quoted_worksheet()).await?;
        info!("Read {} row(s) from {}", rows.len(), self.config.worksheet);
        Ok(rows)
    }

    async fn read_headers(&self) -> Result<Vec<String>, ScraperError> {
        let range = format!("{}!1:1", self.quoted_worksheet());
        Ok(self.get_values(&range).await?.into_iter().next().unwrap_or_default())
    }

    async fn batch_update(&self, updates: &[CellUpdate]) -> Result<(), ScraperError> {
        if updates.is_empty() {
            return Ok(());
        }

        let sheet = self.quoted_worksheet();
        let body = BatchUpdateRequest {
            value_input_option: "RAW",
            data: updates
                .iter()
                .map(|u| RangeValues {
                    range: format!("{}!{}", sheet, u.a1()),
                    values: [[&u.value]],
                })
                .collect(),
        };

        let url = self.url(&["values:batchUpdate"])?;
        debug!("POST {} ({} cells)", url, updates.len());

        let response = self
            .client
            .post(url.clone())
            .bearer_auth(&self.config.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ScraperError::BatchWrite(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScraperError::BatchWrite(format!(
                "HTTP {} from {}: {}",
                status.as_u16(),
                url,
                body
            )));
        }

        info!("Batch update applied: {} cell(s)", updates.len());
        Ok(())
    }
}
