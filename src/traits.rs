use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::sleep;

use crate::error::ScraperError;
use crate::sheets::CellUpdate;

/// リモート操作されるブラウザページ
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// URLへ遷移
    async fn goto(&self, url: &str) -> Result<(), ScraperError>;

    /// セレクタに一致する要素があるか
    async fn exists(&self, selector: &str) -> Result<bool, ScraperError>;

    /// 一致する全要素の innerText
    async fn texts(&self, selector: &str) -> Result<Vec<String>, ScraperError>;

    async fn type_into(&self, selector: &str, text: &str) -> Result<(), ScraperError>;

    async fn click(&self, selector: &str) -> Result<(), ScraperError>;

    /// スクリプト実行（Promiseは解決まで待つ、undefined は null）
    async fn evaluate(&self, script: &str) -> Result<Value, ScraperError>;

    /// PNGスクリーンショット
    async fn screenshot(&self) -> Result<Vec<u8>, ScraperError>;

    /// リソース解放
    async fn close(&mut self) -> Result<(), ScraperError>;

    /// 要素が現れるまで待機
    async fn wait_for(
        &self,
        selector: &str,
        timeout: Duration,
        interval: Duration,
    ) -> Result<(), ScraperError> {
        let start = Instant::now();
        loop {
            match self.exists(selector).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => tracing::debug!("wait_for({}) check error: {}", selector, e),
            }

            if start.elapsed() >= timeout {
                return Err(ScraperError::Timeout(format!(
                    "{} が{:?}以内に見つかりませんでした",
                    selector, timeout
                )));
            }
            sleep(interval).await;
        }
    }
}

/// ブラウザ起動（1ログインにつき1ブラウザ）
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn PageDriver>, ScraperError>;
}

/// 行指向のスプレッドシート
#[async_trait]
pub trait SheetStore: Send + Sync {
    /// ヘッダー行を含む全行
    async fn read_all(&self) -> Result<Vec<Vec<String>>, ScraperError>;

    /// ヘッダー行
    async fn read_headers(&self) -> Result<Vec<String>, ScraperError> {
        Ok(self.read_all().await?.into_iter().next().unwrap_or_default())
    }

    /// セル更新を1回の呼び出しで反映
    async fn batch_update(&self, updates: &[CellUpdate]) -> Result<(), ScraperError>;
}
