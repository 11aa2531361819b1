//! 割当ページから団体別チケット数を抽出

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::ScraperConfig;
use crate::error::ScraperError;
use crate::traits::PageDriver;

use super::session::PortalSession;
use super::types::{AllocationLink, TicketRecord};

pub(crate) const ORG_LIST_SELECTOR: &str = "ul.list-group-horizontal > li";
const ORG_ENTRY_SELECTOR: &str = "ul.list-group-horizontal > li a";

const WAIT_INTERVAL: Duration = Duration::from_millis(250);

/// AngularJS の未完了リクエストが無くなるまで待つ（Angularが無いページは即完了）
pub(crate) const ASYNC_IDLE_SCRIPT: &str = r#"
    new Promise((resolve) => {
        try {
            if (window.angular) {
                const injector = angular.element(document.querySelector('body')).injector();
                if (injector) {
                    injector.get('$browser').notifyWhenNoOutstandingRequests(() => resolve(true));
                    return;
                }
            }
        } catch (e) {}
        resolve(true);
    })
"#;

/// 団体ウィジェット1件分
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketEntry {
    pub organization: String,
    pub sold: u32,
    pub total: u32,
}

/// `"<団体名> (<sold>/<total>)"` を解析する
///
/// 括弧が無い・対象外の団体は `Ok(None)`、括弧内の数値が不正なら `Err`。
pub fn parse_ticket_entry(
    text: &str,
    targets: &[String],
) -> Result<Option<TicketEntry>, ScraperError> {
    let text = text.trim();
    if !text.contains('(') || !text.contains(')') {
        return Ok(None);
    }

    let (name, counts) = match text.rsplit_once('(') {
        Some(parts) => parts,
        None => return Ok(None),
    };
    let organization = name.trim();
    if !targets.iter().any(|t| t == organization) {
        return Ok(None);
    }

    let counts = counts.trim().trim_end_matches(')').trim();
    let (sold, total) = counts
        .split_once('/')
        .ok_or_else(|| ScraperError::Parse(format!("{:?}: '/' がありません", text)))?;
    let sold = sold
        .trim()
        .parse::<u32>()
        .map_err(|e| ScraperError::Parse(format!("{:?}: sold {}", text, e)))?;
    let total = total
        .trim()
        .parse::<u32>()
        .map_err(|e| ScraperError::Parse(format!("{:?}: total {}", text, e)))?;

    Ok(Some(TicketEntry {
        organization: organization.to_string(),
        sold,
        total,
    }))
}

/// まだ total > 0 になっていない対象団体
pub fn missing_organizations<'a>(records: &[TicketRecord], targets: &'a [String]) -> Vec<&'a str> {
    targets
        .iter()
        .filter(|t| !records.iter().any(|r| &r.organization == *t && r.total > 0))
        .map(String::as_str)
        .collect()
}

/// 割当ページ1件を処理（失敗はすべて空の結果として扱う）
pub async fn extract(
    session: &PortalSession,
    link: &AllocationLink,
    config: &ScraperConfig,
) -> Vec<TicketRecord> {
    let page = session.page();

    if !link.url.starts_with("http") {
        warn!("Invalid URL: {}", link.url);
        return Vec::new();
    }

    debug!("Opening allocation page {}", link.url);
    if let Err(e) = page.goto(&link.url).await {
        warn!("Failed to open {}: {}", link.url, e);
        return Vec::new();
    }

    wait_for_async_idle(page, config.async_idle_timeout).await;

    if let Err(e) = page
        .wait_for(ORG_LIST_SELECTOR, config.org_list_timeout, WAIT_INTERVAL)
        .await
    {
        warn!("Timeout waiting for org list on {}: {}", link.url, e);
        return Vec::new();
    }

    // ウィジェットの数値は段階的に埋まるので再読込しながら待つ
    let attempts = config.poll_attempts.max(1);
    let mut records = Vec::new();
    for attempt in 1..=attempts {
        records = read_records(page, link, config).await;

        let missing = missing_organizations(&records, &config.target_organizations);
        if missing.is_empty() {
            debug!("All organizations loaded after {} attempt(s)", attempt);
            break;
        }
        if attempt == attempts {
            warn!(
                "Not all organizations loaded in time for {} ({}): missing {:?}",
                link.production_name, link.raw_event_date, missing
            );
            break;
        }
        sleep(config.poll_interval).await;
    }

    info!(
        "Extracted {} record(s) for {} ({})",
        records.len(),
        link.production_name,
        link.raw_event_date
    );
    records
}

async fn wait_for_async_idle(page: &dyn PageDriver, timeout: Duration) {
    match tokio::time::timeout(timeout, page.evaluate(ASYNC_IDLE_SCRIPT)).await {
        Ok(Ok(_)) => debug!("No outstanding page requests"),
        Ok(Err(e)) => debug!("Skipping async idle wait: {}", e),
        Err(_) => warn!("Async idle wait timed out after {:?}, proceeding", timeout),
    }
}

async fn read_records(
    page: &dyn PageDriver,
    link: &AllocationLink,
    config: &ScraperConfig,
) -> Vec<TicketRecord> {
    let texts = match page.texts(ORG_ENTRY_SELECTOR).await {
        Ok(texts) => texts,
        Err(e) => {
            debug!("Failed to read org entries: {}", e);
            return Vec::new();
        }
    };

    texts
        .iter()
        .filter_map(
            |text| match parse_ticket_entry(text, &config.target_organizations) {
                Ok(Some(entry)) => Some(TicketRecord::from_link(
                    link,
                    entry.organization,
                    entry.sold,
                    entry.total,
                )),
                Ok(None) => None,
                Err(e) => {
                    debug!("Error parsing org entry: {}", e);
                    None
                }
            },
        )
        .collect()
}
