//! ログイン済みブラウザセッションの管理

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::{Identity, ScraperConfig};
use crate::error::ScraperError;
use crate::traits::{BrowserLauncher, PageDriver};

pub(crate) const USERNAME_FIELD: &str = "[name='recall_UserName']";
pub(crate) const PASSWORD_FIELD: &str = "[name='recall_UserPassword']";
const SUBMIT_SCRIPT: &str = "SubmitForm('L');";

const WAIT_INTERVAL: Duration = Duration::from_millis(250);

/// 1アイデンティティ分のログイン済みセッション
///
/// ブラウザを専有する。`close` は `self` を消費するので二重に閉じることはできない。
pub struct PortalSession {
    identity: Identity,
    driver: Box<dyn PageDriver>,
}

impl PortalSession {
    /// ブラウザを起動してログインする
    ///
    /// 失敗時はブラウザを閉じてから `ScraperError::Login` を返す。
    pub async fn open(
        launcher: &dyn BrowserLauncher,
        identity: &Identity,
        config: &ScraperConfig,
    ) -> Result<Self, ScraperError> {
        info!("Opening session for {}", identity.email);

        let mut driver = launcher
            .launch()
            .await
            .map_err(|e| ScraperError::Login(format!("{}: {}", identity.email, e)))?;

        if let Err(e) = login(driver.as_ref(), identity, config).await {
            if let Err(close_err) = driver.close().await {
                debug!("Failed to close browser after login error: {}", close_err);
            }
            return Err(ScraperError::Login(format!("{}: {}", identity.email, e)));
        }

        info!("Logged in as {}", identity.email);
        Ok(Self {
            identity: identity.clone(),
            driver,
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn page(&self) -> &dyn PageDriver {
        self.driver.as_ref()
    }

    /// ブラウザを解放
    pub async fn close(mut self) {
        if let Err(e) = self.driver.close().await {
            warn!("Failed to close session for {}: {}", self.identity.email, e);
        } else {
            debug!("Session closed for {}", self.identity.email);
        }
    }
}

async fn login(
    page: &dyn PageDriver,
    identity: &Identity,
    config: &ScraperConfig,
) -> Result<(), ScraperError> {
    page.goto(&config.login_url).await?;
    debug!("Login page opened");

    page.wait_for(USERNAME_FIELD, config.element_timeout, WAIT_INTERVAL)
        .await?;
    page.type_into(USERNAME_FIELD, &identity.email).await?;
    page.type_into(PASSWORD_FIELD, &identity.password).await?;

    // ポータル側のクライアントサイド送信
    page.evaluate(SUBMIT_SCRIPT).await?;

    sleep(config.login_settle).await;
    Ok(())
}
