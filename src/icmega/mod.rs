//! icmega 劇場ポータルのスクレイパーモジュール
//!
//! ログイン → 期間検索 → 割当リンク収集 → 団体別チケット数の抽出

pub mod extractor;
pub mod navigator;
pub mod session;
mod types;

pub use extractor::{extract, parse_ticket_entry, TicketEntry};
pub use navigator::{allocation_links_from_rows, list_allocation_links, open_search};
pub use session::PortalSession;
pub use types::{AllocationLink, DateRange, ResultRow, TicketRecord};
