//! icmega チケット同期ライブラリ
//!
//! - icmega 劇場ポータルに複数アカウントでログインし、団体別の販売数を取得
//! - Google スプレッドシートの該当行（הפקה / תאריך / ארגון）へ一括書き込み
//!
//! # 使用例
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use icmega_sync::{
//!     ChromiumLauncher, Identity, Orchestrator, ScraperConfig, SheetsClient, SheetsConfig,
//!     SyncRequest, SyncService,
//! };
//! use tower::Service;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ScraperConfig::new(vec![Identity::new("user@example.com", "password")])
//!         .with_headless(true);
//!     let sheets = SheetsClient::new(SheetsConfig::new("spreadsheet-id", "access-token")).unwrap();
//!
//!     let orchestrator = Orchestrator::new(
//!         config.clone(),
//!         Arc::new(ChromiumLauncher::new(&config)),
//!         Arc::new(sheets),
//!     );
//!     let mut service = SyncService::new(orchestrator);
//!
//!     let report = service.call(SyncRequest::new()).await.unwrap();
//!     println!("{}", icmega_sync::report::render(&report));
//! }
//! ```

pub mod browser;
pub mod config;
pub mod error;
pub mod icmega;
pub mod reconcile;
pub mod report;
pub mod service;
pub mod sheets;
pub mod traits;

#[cfg(test)]
mod testing;

// 主要な型をリエクスポート
pub use browser::ChromiumLauncher;
pub use config::{Identity, ScraperConfig, SearchStrategy, SheetsConfig};
pub use error::ScraperError;
pub use icmega::{DateRange, TicketRecord};
pub use reconcile::Reconciliation;
pub use service::{Orchestrator, SyncReport, SyncRequest, SyncService};
pub use sheets::{CellUpdate, CellValue, SheetsClient};
pub use traits::{BrowserLauncher, PageDriver, SheetStore};
