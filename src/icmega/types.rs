//! icmega ポータル関連の型定義

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// 検索結果の1行から得た「הקצאה」リンク（セル値は加工しない）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationLink {
    pub url: String,
    pub production_name: String,
    pub location: String,
    pub raw_event_date: String,
}

/// 1イベント×1対象団体のチケット数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRecord {
    pub link: String,
    pub production_name: String,
    pub location: String,
    pub raw_event_date: String,
    pub organization: String,
    pub sold: u32,
    pub total: u32,
}

impl TicketRecord {
    pub fn from_link(link: &AllocationLink, organization: impl Into<String>, sold: u32, total: u32) -> Self {
        Self {
            link: link.url.clone(),
            production_name: link.production_name.clone(),
            location: link.location.clone(),
            raw_event_date: link.raw_event_date.clone(),
            organization: organization.into(),
            sold,
            total,
        }
    }
}

/// 検索期間（start <= end）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} .. {}", self.start, self.end)
    }
}

/// 検索結果テーブルの1行（スクリプトから取得した生データ）
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ResultRow {
    #[serde(default)]
    pub cells: Vec<String>,
    /// 割当セル内のアンカーの href
    #[serde(default)]
    pub links: Vec<String>,
}
