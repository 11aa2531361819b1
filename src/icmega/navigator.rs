//! 検索ページの操作と割当リンクの収集

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::{ScraperConfig, SearchStrategy};
use crate::error::ScraperError;
use crate::traits::PageDriver;

use super::session::PortalSession;
use super::types::{AllocationLink, DateRange, ResultRow};

pub(crate) const DATE_FROM_FIELD: &str = "[name='event_start_date_from']";
pub(crate) const DATE_TO_FIELD: &str = "[name='event_start_date_to']";
pub(crate) const FILTER_CHECKBOX: &str = "[name='ChkOption']";

const MENU_ITEM_TEXT: &str = "מועדים והקצאות";
const SEARCH_BUTTON_TEXT: &str = "חפש";
const PORTAL_DATE_FORMAT: &str = "%d/%m/%Y";

/// 検索結果テーブルの列位置
const PRODUCTION_CELL: usize = 2;
const LOCATION_CELL: usize = 3;
const EVENT_DATE_CELL: usize = 5;
const ALLOCATION_CELL: usize = 13;
const MIN_CELLS: usize = ALLOCATION_CELL + 1;

const WAIT_INTERVAL: Duration = Duration::from_millis(250);

const CHECKBOX_STATE_SCRIPT: &str = r#"
    (() => {
        const el = document.querySelector("[name='ChkOption']");
        return el ? el.checked : null;
    })()
"#;

pub(crate) const RESULT_ROWS_SCRIPT: &str = r#"
    (() => {
        const rows = Array.from(document.querySelectorAll('table.table-bordered tr')).slice(1);
        return rows.map(tr => {
            const cells = Array.from(tr.querySelectorAll('td'));
            const linkCell = cells[13];
            return {
                cells: cells.map(td => (td.innerText || '').trim()),
                links: linkCell
                    ? Array.from(linkCell.querySelectorAll('a')).map(a => a.href).filter(h => !!h)
                    : []
            };
        });
    })()
"#;

/// 検索フォームを開き、期間を入力して検索する
///
/// 失敗時は `{artifacts_dir}/search_error_{email}.png` にスクリーンショットを残す。
pub async fn open_search(
    session: &PortalSession,
    range: &DateRange,
    config: &ScraperConfig,
) -> Result<(), ScraperError> {
    let page = session.page();
    let email = &session.identity().email;
    info!("Opening search page for {} ({})", email, range);

    match fill_search_form(page, range, config).await {
        Ok(()) => {
            info!("Search submitted");
            Ok(())
        }
        Err(e) => {
            warn!("Search step failed for {}: {}", email, e);
            capture_failure_screenshot(page, &config.artifacts_dir, email).await;
            Err(match e {
                ScraperError::Navigation(_) => e,
                other => ScraperError::Navigation(other.to_string()),
            })
        }
    }
}

async fn fill_search_form(
    page: &dyn PageDriver,
    range: &DateRange,
    config: &ScraperConfig,
) -> Result<(), ScraperError> {
    match config.search_strategy {
        SearchStrategy::DirectUrl => page.goto(&config.search_url).await?,
        SearchStrategy::MenuClick => {
            let script = click_link_script("a span", MENU_ITEM_TEXT, true);
            click_when_available(page, &script, MENU_ITEM_TEXT, config.element_timeout).await?;
            debug!("Menu item clicked");
        }
    }

    page.wait_for(DATE_FROM_FIELD, config.element_timeout, WAIT_INTERVAL)
        .await?;
    debug!("Date fields found");

    match page.evaluate(CHECKBOX_STATE_SCRIPT).await? {
        Value::Bool(true) => debug!("Filter checkbox already checked"),
        Value::Bool(false) => page.click(FILTER_CHECKBOX).await?,
        _ => return Err(ScraperError::ElementNotFound(FILTER_CHECKBOX.to_string())),
    }

    let from = range.start().format(PORTAL_DATE_FORMAT).to_string();
    let to = range.end().format(PORTAL_DATE_FORMAT).to_string();
    page.type_into(DATE_FROM_FIELD, &from).await?;
    page.type_into(DATE_TO_FIELD, &to).await?;
    debug!("Date range filled: {} - {}", from, to);

    let script = click_link_script("a", SEARCH_BUTTON_TEXT, false);
    let clicked = page.evaluate(&script).await?.as_bool().unwrap_or(false);
    if !clicked {
        return Err(ScraperError::ElementNotFound(format!(
            "検索ボタン ({})",
            SEARCH_BUTTON_TEXT
        )));
    }
    Ok(())
}

/// テキストでアンカーを探してクリックするスクリプト
///
/// `exact` の場合は `selector` の要素テキストが完全一致するもの（祖先の `a` をクリック）。
fn click_link_script(selector: &str, text: &str, exact: bool) -> String {
    let test = if exact {
        format!("el.textContent.trim() === '{}'", text)
    } else {
        format!("el.textContent.indexOf('{}') >= 0", text)
    };
    format!(
        r#"
        (() => {{
            const els = document.querySelectorAll('{selector}');
            for (const el of els) {{
                if ({test}) {{
                    const link = el.closest('a') || el;
                    link.click();
                    return true;
                }}
            }}
            return false;
        }})()
        "#
    )
}

async fn click_when_available(
    page: &dyn PageDriver,
    script: &str,
    label: &str,
    timeout: Duration,
) -> Result<(), ScraperError> {
    let start = Instant::now();
    loop {
        match page.evaluate(script).await {
            Ok(v) if v.as_bool() == Some(true) => return Ok(()),
            Ok(_) => {}
            Err(e) => debug!("Click attempt on {} failed: {}", label, e),
        }
        if start.elapsed() >= timeout {
            return Err(ScraperError::Timeout(format!(
                "{} がクリック可能になりませんでした",
                label
            )));
        }
        sleep(WAIT_INTERVAL).await;
    }
}

pub(crate) fn screenshot_path(artifacts_dir: &Path, email: &str) -> PathBuf {
    let tag: String = email
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '@' | '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    artifacts_dir.join(format!("search_error_{}.png", tag))
}

/// 診断用スクリーンショット（失敗しても元のエラーは変えない）
async fn capture_failure_screenshot(page: &dyn PageDriver, artifacts_dir: &Path, email: &str) {
    let png = match page.screenshot().await {
        Ok(png) => png,
        Err(e) => {
            warn!("Could not capture screenshot: {}", e);
            return;
        }
    };

    let path = screenshot_path(artifacts_dir, email);
    let written = std::fs::create_dir_all(artifacts_dir).and_then(|_| std::fs::write(&path, &png));
    match written {
        Ok(()) => info!("Screenshot saved: {:?}", path),
        Err(e) => {
            warn!("Could not save screenshot to {:?}: {}", path, e);
            use base64::Engine;
            let encoded = base64::engine::general_purpose::STANDARD.encode(&png);
            debug!("Search error screenshot: data:image/png;base64,{}", encoded);
        }
    }
}

/// 検索結果から割当リンクを収集（失敗しても空で返す）
pub async fn list_allocation_links(
    session: &PortalSession,
    config: &ScraperConfig,
) -> Vec<AllocationLink> {
    let page = session.page();
    let anchor = format!("a[href*='{}']", config.allocation_path_pattern);

    if let Err(e) = page
        .wait_for(&anchor, config.element_timeout, WAIT_INTERVAL)
        .await
    {
        warn!("No allocation links rendered: {}", e);
        return Vec::new();
    }

    let rows = match page.evaluate(RESULT_ROWS_SCRIPT).await {
        Ok(Value::Array(rows)) => rows,
        Ok(other) => {
            warn!("Unexpected result table payload: {}", other);
            return Vec::new();
        }
        Err(e) => {
            warn!("Failed to read result table: {}", e);
            return Vec::new();
        }
    };

    let rows: Vec<ResultRow> = rows
        .into_iter()
        .enumerate()
        .filter_map(|(i, row)| match serde_json::from_value(row) {
            Ok(row) => Some(row),
            Err(e) => {
                warn!("Error reading result row {}: {}", i + 1, e);
                None
            }
        })
        .collect();

    let links = allocation_links_from_rows(&rows, &config.allocation_path_pattern);
    info!("Found {} allocation links", links.len());
    links
}

/// 検索結果行を割当リンクに変換（セル数が足りない行は除外）
pub fn allocation_links_from_rows(rows: &[ResultRow], path_pattern: &str) -> Vec<AllocationLink> {
    rows.iter()
        .filter(|row| row.cells.len() >= MIN_CELLS)
        .flat_map(|row| {
            let production_name = row.cells[PRODUCTION_CELL].trim();
            let location = row.cells[LOCATION_CELL].trim();
            let raw_event_date = row.cells[EVENT_DATE_CELL].trim();
            row.links
                .iter()
                .filter(|href| href.contains(path_pattern))
                .map(move |href| AllocationLink {
                    url: href.clone(),
                    production_name: production_name.to_string(),
                    location: location.to_string(),
                    raw_event_date: raw_event_date.to_string(),
                })
        })
        .collect()
}
