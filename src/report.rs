//! 実行結果の表示用テーブル

use std::fmt::Write;

use crate::icmega::TicketRecord;
use crate::service::SyncReport;

const HEADERS: [&str; 7] = ["link", "name", "location", "date", "organization", "sold", "total"];

fn record_cells(record: &TicketRecord) -> [String; 7] {
    [
        record.link.clone(),
        record.production_name.clone(),
        record.location.clone(),
        record.raw_event_date.clone(),
        record.organization.clone(),
        record.sold.to_string(),
        record.total.to_string(),
    ]
}

/// グリッド形式のテーブル（中央寄せ）
pub fn records_table<'a, I>(records: I) -> String
where
    I: IntoIterator<Item = &'a TicketRecord>,
{
    let rows: Vec<[String; 7]> = records.into_iter().map(record_cells).collect();

    let mut widths = HEADERS.map(|h| h.chars().count());
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row.iter()) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let border = |fill: char| {
        let mut line = String::from("+");
        for w in &widths {
            line.extend(std::iter::repeat(fill).take(w + 2));
            line.push('+');
        }
        line
    };
    let line = |cells: &[String]| {
        let mut out = String::from("|");
        for (cell, w) in cells.iter().zip(widths.iter()) {
            let _ = write!(out, " {:^width$} |", cell, width = *w);
        }
        out
    };

    let mut out = String::new();
    let _ = writeln!(out, "{}", border('-'));
    let _ = writeln!(out, "{}", line(HEADERS.map(String::from).as_slice()));
    let _ = writeln!(out, "{}", border('='));
    for row in &rows {
        let _ = writeln!(out, "{}", line(row.as_slice()));
        let _ = writeln!(out, "{}", border('-'));
    }
    out
}

/// 更新・未一致・total=0 を分けたサマリー
pub fn render(report: &SyncReport) -> String {
    let mut out = String::new();

    let Some(range) = &report.date_range else {
        let _ = writeln!(out, "No valid dates found in the sheet.");
        return out;
    };
    let _ = writeln!(out, "Date range from sheet: {}", range);

    for email in &report.failed_identities {
        let _ = writeln!(out, "Skipped user {} (login or search failed)", email);
    }

    let Some(reconciliation) = &report.reconciliation else {
        let _ = writeln!(out, "No data found.");
        return out;
    };

    let verb = if report.dry_run { "Would update" } else { "Updated" };
    let _ = writeln!(
        out,
        "{} {} rows in sheet, covering {} unique events.",
        verb,
        reconciliation.updated_count(),
        reconciliation.unique_events()
    );
    let _ = writeln!(out, "Row numbers updated: {:?}", reconciliation.updated_rows());

    if !reconciliation.updated.is_empty() {
        let _ = writeln!(out, "\nUpdated ticket data:");
        out.push_str(&records_table(reconciliation.updated.iter().map(|m| &m.record)));
    }

    if reconciliation.unmatched.is_empty() {
        let _ = writeln!(out, "All items matched and updated successfully.");
    } else {
        let _ = writeln!(
            out,
            "\n{} items were NOT matched in the sheet:",
            reconciliation.unmatched.len()
        );
        out.push_str(&records_table(&reconciliation.unmatched));
    }

    if !reconciliation.rejected.is_empty() {
        let _ = writeln!(
            out,
            "\n{} items had an unreadable event date:",
            reconciliation.rejected.len()
        );
        out.push_str(&records_table(&reconciliation.rejected));
    }

    let zero_total = report.zero_total();
    if zero_total.is_empty() {
        let _ = writeln!(out, "\nNo events with total = 0");
    } else {
        let _ = writeln!(out, "\nEvents with 0 total tickets:");
        out.push_str(&records_table(zero_total));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icmega::DateRange;
    use crate::reconcile::{MatchedRecord, Reconciliation};
    use chrono::NaiveDate;

    fn record(org: &str, total: u32) -> TicketRecord {
        TicketRecord {
            link: "https://x/p?id=1".into(),
            production_name: "המלט".into(),
            location: "אולם 1".into(),
            raw_event_date: "30/07/26 17:30".into(),
            organization: org.into(),
            sold: 1,
            total,
        }
    }

    fn range() -> DateRange {
        let d = NaiveDate::from_ymd_opt(2026, 7, 30).unwrap();
        DateRange::new(d, d).unwrap()
    }

    #[test]
    fn test_table_has_aligned_borders() {
        let table = records_table(&[record("חבר", 10)]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 5);
        let width = lines[0].chars().count();
        assert!(lines.iter().all(|l| l.chars().count() == width));
        assert!(lines[1].contains("organization"));
        assert!(lines[3].contains("חבר"));
        assert!(lines[2].starts_with("+="));
    }

    #[test]
    fn test_render_without_range() {
        let report = SyncReport::default();
        assert!(render(&report).contains("No valid dates"));
    }

    #[test]
    fn test_render_separates_sections() {
        let report = SyncReport {
            date_range: Some(range()),
            records: vec![record("חבר", 10), record("מגה לאן", 0), record("קרנות השוטרים", 5)],
            reconciliation: Some(Reconciliation {
                updates: Vec::new(),
                updated: vec![MatchedRecord {
                    row: 2,
                    canonical_date: "30/07/2026".into(),
                    record: record("חבר", 10),
                }],
                unmatched: vec![record("קרנות השוטרים", 5)],
                rejected: Vec::new(),
            }),
            failed_identities: vec!["b@x".into()],
            dry_run: false,
        };
        let text = render(&report);
        assert!(text.contains("Skipped user b@x"));
        assert!(text.contains("Updated 1 rows in sheet, covering 1 unique events."));
        assert!(text.contains("1 items were NOT matched"));
        assert!(text.contains("Events with 0 total tickets"));
        assert!(text.contains("מגה לאן"));
    }
}
