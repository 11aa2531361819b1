use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;
use serde::Deserialize;

use crate::error::ScraperError;

pub const DEFAULT_LOGIN_URL: &str = "https://center.icmega.co.il/login.aspx?_theme=A";
pub const DEFAULT_SEARCH_URL: &str =
    "https://center.icmega.co.il/mn_search.aspx?_TableName=sapak_product_barcode&sidebar=23";
pub const DEFAULT_ALLOCATION_PATH: &str = "sapak_theatre_program.aspx";
pub const DEFAULT_WORKSHEET: &str = "כרטיסים";
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Asia::Jerusalem;
pub const DEFAULT_SHEETS_API_BASE: &str = "https://sheets.googleapis.com";

/// 集計対象の団体
pub const DEFAULT_TARGET_ORGANIZATIONS: [&str; 3] = ["מגה לאן", "חבר", "קרנות השוטרים"];

/// ポータルのログイン情報（1セッション分）
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Identity {
    pub email: String,
    pub password: String,
}

impl Identity {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

// パスワードはログに出さない
impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("email", &self.email)
            .field("password", &"*".repeat(self.password.chars().count()))
            .finish()
    }
}

/// 検索ページへの遷移方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchStrategy {
    /// 検索URLへ直接遷移
    #[default]
    DirectUrl,
    /// サイドメニュー「מועדים והקצאות」をクリック
    MenuClick,
}

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub identities: Vec<Identity>,
    pub target_organizations: Vec<String>,
    pub login_url: String,
    pub search_url: String,
    pub search_strategy: SearchStrategy,
    pub allocation_path_pattern: String,
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    pub window_size: (u32, u32),
    /// 要素出現待機のタイムアウト
    pub element_timeout: Duration,
    /// Angular の未完了リクエスト待機のタイムアウト
    pub async_idle_timeout: Duration,
    /// 団体リスト出現待機のタイムアウト
    pub org_list_timeout: Duration,
    pub poll_interval: Duration,
    pub poll_attempts: u32,
    pub login_settle: Duration,
    /// イベント間の待機
    pub link_delay: Duration,
    pub artifacts_dir: PathBuf,
    /// 「עודכן לאחרונה」の時刻を表すタイムゾーン
    pub timezone: Tz,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            identities: Vec::new(),
            target_organizations: DEFAULT_TARGET_ORGANIZATIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            login_url: DEFAULT_LOGIN_URL.to_string(),
            search_url: DEFAULT_SEARCH_URL.to_string(),
            search_strategy: SearchStrategy::default(),
            allocation_path_pattern: DEFAULT_ALLOCATION_PATH.to_string(),
            headless: true,
            chrome_path: None,
            window_size: (1920, 1080),
            element_timeout: Duration::from_secs(10),
            async_idle_timeout: Duration::from_secs(10),
            org_list_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
            poll_attempts: 8,
            login_settle: Duration::from_secs(2),
            link_delay: Duration::from_secs(1),
            artifacts_dir: PathBuf::from("artifacts"),
            timezone: DEFAULT_TIMEZONE,
        }
    }
}

impl ScraperConfig {
    pub fn new(identities: Vec<Identity>) -> Self {
        Self {
            identities,
            ..Default::default()
        }
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identities.push(identity);
        self
    }

    pub fn with_target_organizations<I, S>(mut self, orgs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_organizations = orgs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_login_url(mut self, url: impl Into<String>) -> Self {
        self.login_url = url.into();
        self
    }

    pub fn with_search_url(mut self, url: impl Into<String>) -> Self {
        self.search_url = url.into();
        self
    }

    pub fn with_search_strategy(mut self, strategy: SearchStrategy) -> Self {
        self.search_strategy = strategy;
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_chrome_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.chrome_path = Some(path.into());
        self
    }

    pub fn with_artifacts_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifacts_dir = path.into();
        self
    }

    /// 要素待機・Angular待機・団体リスト待機をまとめて設定
    pub fn with_timeouts(mut self, timeout: Duration) -> Self {
        self.element_timeout = timeout;
        self.async_idle_timeout = timeout;
        self.org_list_timeout = timeout;
        self
    }

    pub fn with_polling(mut self, interval: Duration, attempts: u32) -> Self {
        self.poll_interval = interval;
        self.poll_attempts = attempts;
        self
    }

    /// ログイン後の待機とイベント間の待機
    pub fn with_delays(mut self, login_settle: Duration, link_delay: Duration) -> Self {
        self.login_settle = login_settle;
        self.link_delay = link_delay;
        self
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }
}

/// スプレッドシート接続設定
#[derive(Clone)]
pub struct SheetsConfig {
    pub spreadsheet_id: String,
    pub worksheet: String,
    /// 解決済みの OAuth アクセストークン
    pub access_token: String,
    pub api_base: String,
}

impl SheetsConfig {
    pub fn new(spreadsheet_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            spreadsheet_id: spreadsheet_id.into(),
            worksheet: DEFAULT_WORKSHEET.to_string(),
            access_token: access_token.into(),
            api_base: DEFAULT_SHEETS_API_BASE.to_string(),
        }
    }

    pub fn with_worksheet(mut self, worksheet: impl Into<String>) -> Self {
        self.worksheet = worksheet.into();
        self
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }
}

impl fmt::Debug for SheetsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SheetsConfig")
            .field("spreadsheet_id", &self.spreadsheet_id)
            .field("worksheet", &self.worksheet)
            .field("access_token", &"<redacted>")
            .field("api_base", &self.api_base)
            .finish()
    }
}

/// 環境変数からログイン情報を収集
///
/// `ICMEGA_ACCOUNTS` (JSON配列) があればそれを優先し、無ければ
/// `ICMEGA_USER{n}_EMAIL` / `ICMEGA_USER{n}_PASSWORD` を n=1 から欠番まで読む。
pub fn identities_from_env() -> Result<Vec<Identity>, ScraperError> {
    identities_from_lookup(|key| std::env::var(key).ok())
}

fn identities_from_lookup<F>(lookup: F) -> Result<Vec<Identity>, ScraperError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(json) = lookup("ICMEGA_ACCOUNTS") {
        let accounts: Vec<Identity> = serde_json::from_str(&json)
            .map_err(|e| ScraperError::Config(format!("ICMEGA_ACCOUNTS: {}", e)))?;
        return Ok(accounts);
    }

    let mut identities = Vec::new();
    for n in 1.. {
        let email = lookup(&format!("ICMEGA_USER{}_EMAIL", n));
        let password = lookup(&format!("ICMEGA_USER{}_PASSWORD", n));
        match (email, password) {
            (Some(email), Some(password)) => identities.push(Identity::new(email, password)),
            (Some(email), None) => {
                return Err(ScraperError::Config(format!(
                    "ICMEGA_USER{}_PASSWORD が未設定です ({})",
                    n, email
                )))
            }
            _ => break,
        }
    }

    if identities.is_empty() {
        return Err(ScraperError::Config(
            "ログイン情報がありません (ICMEGA_USER1_EMAIL / ICMEGA_ACCOUNTS)".into(),
        ));
    }
    Ok(identities)
}
