//! 抽出結果とスプレッドシート行の突き合わせ
//!
//! 行は (הפקה, תאריך, ארגון) の複合キーで照合し、一致した行の
//! נמכרו / קיבלו / עודכן לאחרונה だけを更新する。行の追加・削除はしない。

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, warn};

use crate::error::ScraperError;
use crate::icmega::{DateRange, TicketRecord};
use crate::sheets::{CellUpdate, CellValue};
use crate::traits::SheetStore;

pub const PRODUCTION_HEADER: &str = "הפקה";
pub const DATE_HEADER: &str = "תאריך";
pub const ORGANIZATION_HEADER: &str = "ארגון";
pub const SOLD_HEADER: &str = "נמכרו";
pub const TOTAL_HEADER: &str = "קיבלו";
pub const UPDATED_HEADER: &str = "עודכן לאחרונה";

const SHEET_DATE_FORMAT: &str = "%d/%m/%Y";
const SHORT_YEAR_FORMAT: &str = "%d/%m/%y";
pub const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M";

/// 読み込んだ時点のシート全体
#[derive(Debug, Clone, Default)]
pub struct SheetSnapshot {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl SheetSnapshot {
    /// 先頭行をヘッダーとして扱う
    pub fn from_values(values: Vec<Vec<String>>) -> Self {
        let mut values = values.into_iter();
        let headers = values.next().unwrap_or_default();
        Self {
            headers,
            rows: values.collect(),
        }
    }

    pub async fn read(store: &dyn SheetStore) -> Result<Self, ScraperError> {
        Ok(Self::from_values(store.read_all().await?))
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// ヘッダー名から列番号（0始まり）
    pub fn column(&self, name: &str) -> Result<usize, ScraperError> {
        self.headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| ScraperError::MissingColumn(name.to_string()))
    }

    fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(|s| s.trim())
            .unwrap_or("")
    }

    /// データ行インデックス → シート上の行番号
    pub fn sheet_row_number(index: usize) -> usize {
        index + 2
    }
}

/// イベント日時を `dd/mm/yyyy` に正規化（時刻部分は捨てる、2桁年も可）
pub fn normalize_event_date(raw: &str) -> Result<String, ScraperError> {
    let date_part = raw.split_whitespace().next().unwrap_or("");
    let short_year = date_part
        .rsplit('/')
        .next()
        .map(|y| y.len() == 2)
        .unwrap_or(false);
    let format = if short_year {
        SHORT_YEAR_FORMAT
    } else {
        SHEET_DATE_FORMAT
    };

    NaiveDate::parse_from_str(date_part, format)
        .map(|d| d.format(SHEET_DATE_FORMAT).to_string())
        .map_err(|_| ScraperError::DateParse(raw.to_string()))
}

fn parse_sheet_date(cell: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(cell.trim(), SHEET_DATE_FORMAT).ok()
}

/// 今日以降の日付の最小・最大（該当行が無ければ None）
pub fn date_range(
    snapshot: &SheetSnapshot,
    today: NaiveDate,
) -> Result<Option<DateRange>, ScraperError> {
    let date_col = snapshot.column(DATE_HEADER)?;

    let dates: Vec<NaiveDate> = (0..snapshot.rows.len())
        .filter_map(|i| parse_sheet_date(snapshot.cell(i, date_col)))
        .filter(|d| *d >= today)
        .collect();

    let (Some(start), Some(end)) = (dates.iter().min(), dates.iter().max()) else {
        return Ok(None);
    };
    Ok(DateRange::new(*start, *end))
}

/// 更新対象になった1件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedRecord {
    /// シート上の行番号
    pub row: usize,
    pub canonical_date: String,
    pub record: TicketRecord,
}

/// 突き合わせ結果
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    pub updates: Vec<CellUpdate>,
    pub updated: Vec<MatchedRecord>,
    /// 一致する行が無かったもの
    pub unmatched: Vec<TicketRecord>,
    /// 日付が解析できず照合しなかったもの
    pub rejected: Vec<TicketRecord>,
}

impl Reconciliation {
    pub fn updated_count(&self) -> usize {
        self.updated.len()
    }

    pub fn updated_rows(&self) -> Vec<usize> {
        self.updated.iter().map(|m| m.row).collect()
    }

    /// 更新された (הפקה, תאריך) の種類数
    pub fn unique_events(&self) -> usize {
        self.updated
            .iter()
            .map(|m| (m.record.production_name.as_str(), m.canonical_date.as_str()))
            .collect::<HashSet<_>>()
            .len()
    }
}

struct Columns {
    production: usize,
    date: usize,
    organization: usize,
    sold: usize,
    total: usize,
    updated: usize,
}

impl Columns {
    fn resolve(snapshot: &SheetSnapshot) -> Result<Self, ScraperError> {
        Ok(Self {
            production: snapshot.column(PRODUCTION_HEADER)?,
            date: snapshot.column(DATE_HEADER)?,
            organization: snapshot.column(ORGANIZATION_HEADER)?,
            sold: snapshot.column(SOLD_HEADER)?,
            total: snapshot.column(TOTAL_HEADER)?,
            updated: snapshot.column(UPDATED_HEADER)?,
        })
    }
}

#[derive(PartialEq, Eq)]
struct RowKey<'a> {
    production: &'a str,
    date: String,
    organization: &'a str,
}

/// 抽出レコードを行に割り当て、セル更新を組み立てる（書き込みはしない）
///
/// 同じキーの行が複数ある場合は最初の行だけを更新し、警告を出す。
pub fn reconcile(
    snapshot: &SheetSnapshot,
    records: &[TicketRecord],
    timestamp: &str,
) -> Result<Reconciliation, ScraperError> {
    let cols = Columns::resolve(snapshot)?;

    let keys: Vec<RowKey<'_>> = (0..snapshot.rows.len())
        .map(|i| {
            let date = snapshot.cell(i, cols.date);
            RowKey {
                production: snapshot.cell(i, cols.production),
                date: normalize_event_date(date).unwrap_or_else(|_| date.to_string()),
                organization: snapshot.cell(i, cols.organization),
            }
        })
        .collect();

    let mut result = Reconciliation::default();

    for record in records {
        let canonical_date = match normalize_event_date(&record.raw_event_date) {
            Ok(date) => date,
            Err(e) => {
                warn!(
                    "Could not parse ticket date for {} / {}: {}",
                    record.production_name, record.organization, e
                );
                result.rejected.push(record.clone());
                continue;
            }
        };

        let wanted = RowKey {
            production: record.production_name.trim(),
            date: canonical_date.clone(),
            organization: record.organization.trim(),
        };
        let matches: Vec<usize> = keys
            .iter()
            .enumerate()
            .filter(|(_, key)| **key == wanted)
            .map(|(i, _)| SheetSnapshot::sheet_row_number(i))
            .collect();

        let Some(&row) = matches.first() else {
            debug!(
                "No row for {} / {} / {}",
                record.production_name, canonical_date, record.organization
            );
            result.unmatched.push(record.clone());
            continue;
        };
        if matches.len() > 1 {
            warn!(
                "Duplicate rows for {} / {} / {}: {:?}, updating row {}",
                record.production_name, canonical_date, record.organization, matches, row
            );
        }

        result.updates.extend([
            CellUpdate {
                row,
                column: cols.sold,
                value: CellValue::Number(record.sold),
            },
            CellUpdate {
                row,
                column: cols.total,
                value: CellValue::Number(record.total),
            },
            CellUpdate {
                row,
                column: cols.updated,
                value: CellValue::Text(timestamp.to_string()),
            },
        ]);
        result.updated.push(MatchedRecord {
            row,
            canonical_date,
            record: record.clone(),
        });
    }

    Ok(result)
}

/// 更新タイムスタンプ（シート側のタイムゾーン）
pub fn timestamp_now(timezone: Tz) -> String {
    timestamp_at(Utc::now(), timezone)
}

pub fn timestamp_at(now: DateTime<Utc>, timezone: Tz) -> String {
    now.with_timezone(&timezone).format(TIMESTAMP_FORMAT).to_string()
}

/// 組み立てたセル更新を1回のバッチで書き込む
pub async fn apply(
    store: &dyn SheetStore,
    reconciliation: &Reconciliation,
) -> Result<(), ScraperError> {
    if reconciliation.updates.is_empty() {
        info!("No cells to update");
        return Ok(());
    }

    store
        .batch_update(&reconciliation.updates)
        .await
        .map_err(|e| match e {
            ScraperError::BatchWrite(_) => e,
            other => ScraperError::BatchWrite(other.to_string()),
        })?;

    info!(
        "Updated {} row(s) covering {} unique event(s)",
        reconciliation.updated_count(),
        reconciliation.unique_events()
    );
    Ok(())
}
