use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::{NaiveDate, Utc};
use tokio::time::sleep;
use tower::Service;
use tracing::{error, info, warn};

use crate::config::{Identity, ScraperConfig};
use crate::error::ScraperError;
use crate::icmega::{
    extract, list_allocation_links, open_search, DateRange, PortalSession, TicketRecord,
};
use crate::reconcile::{self, Reconciliation, SheetSnapshot};
use crate::traits::{BrowserLauncher, SheetStore};

/// 同期リクエスト
#[derive(Debug, Clone, Default)]
pub struct SyncRequest {
    /// 期間計算の基準日（未指定なら今日）
    pub today: Option<NaiveDate>,
    /// true ならシートに書き込まない
    pub dry_run: bool,
}

impl SyncRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// 1回の実行結果
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// シートから求めた期間（None ならスクレイピングしていない）
    pub date_range: Option<DateRange>,
    /// 全アイデンティティ分の抽出結果
    pub records: Vec<TicketRecord>,
    /// 抽出結果が無ければ None
    pub reconciliation: Option<Reconciliation>,
    /// ログインまたは検索に失敗したアカウント
    pub failed_identities: Vec<String>,
    pub dry_run: bool,
}

impl SyncReport {
    /// total = 0（まだ割当が無い）のレコード
    pub fn zero_total(&self) -> Vec<&TicketRecord> {
        self.records.iter().filter(|r| r.total == 0).collect()
    }
}

/// シート読込 → アカウントごとの抽出 → 突き合わせ → 一括書込
pub struct Orchestrator {
    config: ScraperConfig,
    launcher: Arc<dyn BrowserLauncher>,
    store: Arc<dyn SheetStore>,
}

impl Orchestrator {
    pub fn new(
        config: ScraperConfig,
        launcher: Arc<dyn BrowserLauncher>,
        store: Arc<dyn SheetStore>,
    ) -> Self {
        Self {
            config,
            launcher,
            store,
        }
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    pub async fn run(&self, today: NaiveDate, dry_run: bool) -> Result<SyncReport, ScraperError> {
        let mut report = SyncReport {
            dry_run,
            ..Default::default()
        };

        let snapshot = SheetSnapshot::read(self.store.as_ref()).await?;
        let Some(range) = reconcile::date_range(&snapshot, today)? else {
            warn!("No valid dates found in the sheet, skipping scrape");
            return Ok(report);
        };
        info!("Date range from sheet: {}", range);
        report.date_range = Some(range);

        // アカウントは順番に処理する
        for identity in &self.config.identities {
            match self.scrape_identity(identity, &range).await {
                Ok(records) => report.records.extend(records),
                Err(e) => {
                    error!("Skipping user {}: {}", identity.email, e);
                    report.failed_identities.push(identity.email.clone());
                }
            }
        }

        if report.records.is_empty() {
            info!("No data found");
            return Ok(report);
        }

        let snapshot = SheetSnapshot::read(self.store.as_ref()).await?;
        let timestamp = reconcile::timestamp_now(self.config.timezone);
        let reconciliation = reconcile::reconcile(&snapshot, &report.records, &timestamp)?;
        if !reconciliation.unmatched.is_empty() {
            warn!(
                "{} record(s) were not matched in the sheet",
                reconciliation.unmatched.len()
            );
        }

        if dry_run {
            info!(
                "Dry run: skipping batch update of {} cell(s)",
                reconciliation.updates.len()
            );
        } else {
            reconcile::apply(self.store.as_ref(), &reconciliation).await?;
        }

        report.reconciliation = Some(reconciliation);
        Ok(report)
    }

    /// 1アカウント分（セッションは結果に関わらず閉じる）
    pub async fn scrape_identity(
        &self,
        identity: &Identity,
        range: &DateRange,
    ) -> Result<Vec<TicketRecord>, ScraperError> {
        info!("Starting process for user: {}", identity.email);
        let session = PortalSession::open(self.launcher.as_ref(), identity, &self.config).await?;

        let result = self.scrape_session(&session, range).await;
        session.close().await;

        if let Ok(records) = &result {
            info!(
                "Completed process for user: {} ({} records)",
                identity.email,
                records.len()
            );
        }
        result
    }

    async fn scrape_session(
        &self,
        session: &PortalSession,
        range: &DateRange,
    ) -> Result<Vec<TicketRecord>, ScraperError> {
        open_search(session, range, &self.config).await?;

        let links = list_allocation_links(session, &self.config).await;
        let mut records = Vec::new();
        for (i, link) in links.iter().enumerate() {
            if i > 0 {
                sleep(self.config.link_delay).await;
            }
            records.extend(extract(session, link, &self.config).await);
        }
        Ok(records)
    }
}

/// tower::Serviceを実装した同期サービス
#[derive(Clone)]
pub struct SyncService {
    orchestrator: Arc<Orchestrator>,
}

impl SyncService {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }
}

impl Service<SyncRequest> for SyncService {
    type Response = SyncReport;
    type Error = ScraperError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: SyncRequest) -> Self::Future {
        let orchestrator = self.orchestrator.clone();
        info!(
            "同期リクエスト受信: identities={}, dry_run={}",
            orchestrator.config().identities.len(),
            req.dry_run
        );

        Box::pin(async move {
            let timezone = orchestrator.config().timezone;
            let today = req
                .today
                .unwrap_or_else(|| Utc::now().with_timezone(&timezone).date_naive());
            let report = orchestrator.run(today, req.dry_run).await?;

            info!(
                "同期完了: records={}, failed_identities={}",
                report.records.len(),
                report.failed_identities.len()
            );
            Ok(report)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icmega::extractor::ORG_LIST_SELECTOR;
    use crate::icmega::navigator::DATE_FROM_FIELD;
    use crate::testing::{FakeLauncher, FakePage, FakeStore};
    use serde_json::json;
    use std::time::Duration;

    const EVENT_URL: &str = "https://center.icmega.co.il/sapak_theatre_program.aspx?id=1";

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 7, 1).unwrap()
    }

    fn test_config(identities: Vec<Identity>) -> ScraperConfig {
        ScraperConfig::new(identities)
            .with_timeouts(Duration::from_millis(20))
            .with_polling(Duration::from_millis(1), 3)
            .with_delays(Duration::ZERO, Duration::ZERO)
            .with_artifacts_dir(std::env::temp_dir().join("icmega-service-tests"))
    }

    fn sheet() -> FakeStore {
        FakeStore::new(vec![
            vec!["הפקה", "תאריך", "ארגון", "נמכרו", "קיבלו", "עודכן לאחרונה"],
            vec!["המלט", "30/07/2026", "מגה לאן", "", "", ""],
            vec!["המלט", "30/07/2026", "חבר", "", "", ""],
            vec!["המלט", "30/07/2026", "קרנות השוטרים", "", "", ""],
            vec!["ישן", "01/01/2020", "חבר", "", "", ""],
        ])
    }

    fn portal_page() -> FakePage {
        let mut cells: Vec<String> = (0..14).map(|i| format!("c{}", i)).collect();
        cells[2] = "המלט".into();
        cells[5] = "30/07/26 20:30".into();
        FakePage::new()
            .with_login_form()
            .with_present(DATE_FROM_FIELD)
            .with_present("a[href*='sapak_theatre_program.aspx']")
            .with_present_on(EVENT_URL, ORG_LIST_SELECTOR)
            .with_checked(true)
            .with_eval("חפש", json!(true))
            .with_eval(
                "table.table-bordered",
                json!([{ "cells": cells, "links": [EVENT_URL] }]),
            )
            .with_texts_on(
                EVENT_URL,
                vec![vec!["מגה לאן (12/50)", "חבר (3/20)", "קרנות השוטרים (0/0)"]],
            )
    }

    #[tokio::test]
    async fn test_run_updates_matching_rows() {
        let page = portal_page();
        let store = Arc::new(sheet());
        let orchestrator = Orchestrator::new(
            test_config(vec![Identity::new("a@x", "pw")]),
            Arc::new(FakeLauncher::new(page.clone())),
            store.clone(),
        );

        let report = orchestrator.run(today(), false).await.unwrap();
        let reconciliation = report.reconciliation.as_ref().unwrap();
        assert_eq!(reconciliation.updated_count(), 3);
        assert_eq!(reconciliation.unique_events(), 1);
        assert_eq!(report.zero_total().len(), 1);
        assert_eq!(store.batches().len(), 1);
        assert_eq!(store.batches()[0].len(), 9);
        assert_eq!(page.close_count(), 1);
    }

    #[tokio::test]
    async fn test_run_without_future_dates_skips_scrape() {
        let store = Arc::new(FakeStore::new(vec![
            vec!["הפקה", "תאריך", "ארגון", "נמכרו", "קיבלו", "עודכן לאחרונה"],
            vec!["ישן", "01/01/2020", "חבר", "", "", ""],
        ]));
        let page = portal_page();
        let orchestrator = Orchestrator::new(
            test_config(vec![Identity::new("a@x", "pw")]),
            Arc::new(FakeLauncher::new(page.clone())),
            store.clone(),
        );

        let report = orchestrator.run(today(), false).await.unwrap();
        assert!(report.date_range.is_none());
        assert!(report.reconciliation.is_none());
        assert!(page.log().is_empty());
        assert!(store.batches().is_empty());
    }

    #[tokio::test]
    async fn test_search_failure_closes_session_and_continues() {
        let broken = FakePage::new().with_login_form();
        let good = portal_page();
        let store = Arc::new(sheet());
        let orchestrator = Orchestrator::new(
            test_config(vec![Identity::new("a@x", "pw"), Identity::new("b@x", "pw")]),
            Arc::new(FakeLauncher::sequence(vec![
                Some(broken.clone()),
                Some(good.clone()),
            ])),
            store.clone(),
        );

        let report = orchestrator.run(today(), false).await.unwrap();
        assert_eq!(report.failed_identities, vec!["a@x".to_string()]);
        assert_eq!(report.records.len(), 3);
        assert_eq!(broken.close_count(), 1);
        assert_eq!(good.close_count(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_does_not_write() {
        let store = Arc::new(sheet());
        let orchestrator = Orchestrator::new(
            test_config(vec![Identity::new("a@x", "pw")]),
            Arc::new(FakeLauncher::new(portal_page())),
            store.clone(),
        );

        let report = orchestrator.run(today(), true).await.unwrap();
        assert!(report.dry_run);
        assert_eq!(report.reconciliation.unwrap().updated_count(), 3);
        assert!(store.batches().is_empty());
    }

    #[tokio::test]
    async fn test_batch_failure_is_fatal() {
        let store = Arc::new(sheet().with_failing_batch());
        let orchestrator = Orchestrator::new(
            test_config(vec![Identity::new("a@x", "pw")]),
            Arc::new(FakeLauncher::new(portal_page())),
            store,
        );

        let result = orchestrator.run(today(), false).await;
        assert!(matches!(result, Err(ScraperError::BatchWrite(_))));
    }

    #[tokio::test]
    async fn test_service_call_uses_requested_day() {
        let store = Arc::new(sheet());
        let mut service = SyncService::new(Orchestrator::new(
            test_config(vec![Identity::new("a@x", "pw")]),
            Arc::new(FakeLauncher::failing()),
            store,
        ));

        let report = service
            .call(SyncRequest::new().with_today(today()).with_dry_run(true))
            .await
            .unwrap();
        let range = report.date_range.unwrap();
        assert_eq!(range.start(), NaiveDate::from_ymd_opt(2026, 7, 30).unwrap());
        assert_eq!(report.failed_identities, vec!["a@x".to_string()]);
        assert!(report.reconciliation.is_none());
    }

    #[test]
    fn test_sync_request_builder() {
        let req = SyncRequest::new().with_today(today()).with_dry_run(true);
        assert_eq!(req.today, Some(today()));
        assert!(req.dry_run);
    }
}
