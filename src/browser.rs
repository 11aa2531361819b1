//! chromiumoxide によるブラウザ操作

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ScraperConfig;
use crate::error::ScraperError;
use crate::traits::{BrowserLauncher, PageDriver};

/// ヘッドレス Chromium を起動するランチャー
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    headless: bool,
    chrome_path: Option<PathBuf>,
    window_size: (u32, u32),
}

impl ChromiumLauncher {
    pub fn new(config: &ScraperConfig) -> Self {
        Self {
            headless: config.headless,
            chrome_path: config.chrome_path.clone(),
            window_size: config.window_size,
        }
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Box<dyn PageDriver>, ScraperError> {
        info!("Launching browser...");

        // セッションごとにユーザーデータディレクトリを分ける
        let unique_id = format!(
            "{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        );
        let user_data_dir = std::env::temp_dir().join(format!("icmega-{}", unique_id));

        let (width, height) = self.window_size;
        let mut builder = BrowserConfig::builder()
            .user_data_dir(&user_data_dir)
            .window_size(width, height)
            .no_sandbox()
            .request_timeout(Duration::from_secs(60))
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu");

        if !self.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.chrome_path {
            builder = builder.chrome_executable(path);
        }

        let browser_config = builder
            .build()
            .map_err(|e| ScraperError::BrowserInit(format!("ブラウザ設定エラー: {}", e)))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| ScraperError::BrowserInit(e.to_string()))?;

        // ブラウザイベントハンドラをバックグラウンドで実行
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {}", e);
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                let mut driver = ChromiumPage {
                    browser: Some(browser),
                    page: None,
                    handler_task,
                    user_data_dir,
                };
                if let Err(close_err) = driver.close().await {
                    debug!("Failed to close browser after page error: {}", close_err);
                }
                return Err(ScraperError::BrowserInit(e.to_string()));
            }
        };

        info!("Browser launched");
        Ok(Box::new(ChromiumPage {
            browser: Some(browser),
            page: Some(page),
            handler_task,
            user_data_dir,
        }))
    }
}

/// chromiumoxide の `Page` をラップした PageDriver
pub struct ChromiumPage {
    browser: Option<Browser>,
    page: Option<Page>,
    handler_task: JoinHandle<()>,
    user_data_dir: PathBuf,
}

impl ChromiumPage {
    fn get_page(&self) -> Result<&Page, ScraperError> {
        self.page
            .as_ref()
            .ok_or_else(|| ScraperError::BrowserInit("ブラウザは既に終了しています".into()))
    }
}

/// JS文字列リテラル
fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

#[async_trait]
impl PageDriver for ChromiumPage {
    async fn goto(&self, url: &str) -> Result<(), ScraperError> {
        let page = self.get_page()?;
        page.goto(url)
            .await
            .map_err(|e| ScraperError::Navigation(format!("{}: {}", url, e)))?;
        Ok(())
    }

    async fn exists(&self, selector: &str) -> Result<bool, ScraperError> {
        let script = format!("document.querySelector({}) !== null", js_string(selector));
        let value = self.evaluate(&script).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn texts(&self, selector: &str) -> Result<Vec<String>, ScraperError> {
        let page = self.get_page()?;
        let elements = page
            .find_elements(selector)
            .await
            .map_err(|e| ScraperError::ElementNotFound(format!("{}: {}", selector, e)))?;

        let mut texts = Vec::with_capacity(elements.len());
        for element in elements {
            match element.inner_text().await {
                Ok(Some(text)) => texts.push(text),
                Ok(None) => texts.push(String::new()),
                Err(e) => debug!("inner_text failed for {}: {}", selector, e),
            }
        }
        Ok(texts)
    }

    async fn type_into(&self, selector: &str, text: &str) -> Result<(), ScraperError> {
        let page = self.get_page()?;
        page.find_element(selector)
            .await
            .map_err(|e| ScraperError::ElementNotFound(format!("{}: {}", selector, e)))?
            .type_str(text)
            .await
            .map_err(|e| ScraperError::JavaScript(format!("入力失敗 {}: {}", selector, e)))?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), ScraperError> {
        let page = self.get_page()?;
        page.find_element(selector)
            .await
            .map_err(|e| ScraperError::ElementNotFound(format!("{}: {}", selector, e)))?
            .click()
            .await
            .map_err(|e| ScraperError::JavaScript(format!("クリック失敗 {}: {}", selector, e)))?;
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<Value, ScraperError> {
        let page = self.get_page()?;
        let result = page
            .evaluate(script)
            .await
            .map_err(|e| ScraperError::JavaScript(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn screenshot(&self) -> Result<Vec<u8>, ScraperError> {
        let page = self.get_page()?;
        page.screenshot(ScreenshotParams::builder().full_page(true).build())
            .await
            .map_err(|e| ScraperError::JavaScript(format!("スクリーンショット失敗: {}", e)))
    }

    async fn close(&mut self) -> Result<(), ScraperError> {
        self.page = None;

        if let Some(mut browser) = self.browser.take() {
            info!("Closing browser...");
            if let Err(e) = browser.close().await {
                warn!("Browser close failed: {}", e);
            }
            if let Err(e) = browser.wait().await {
                debug!("Browser wait failed: {}", e);
            }
        }
        self.handler_task.abort();

        if self.user_data_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.user_data_dir) {
                debug!("Failed to remove {:?}: {}", self.user_data_dir, e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launcher_takes_browser_settings_from_config() {
        let config = ScraperConfig::default()
            .with_headless(false)
            .with_chrome_path("/usr/bin/chromium");
        let launcher = ChromiumLauncher::new(&config);
        assert!(!launcher.headless);
        assert_eq!(launcher.chrome_path, Some(PathBuf::from("/usr/bin/chromium")));
        assert_eq!(launcher.window_size, (1920, 1080));
    }

    #[test]
    fn test_js_string_escapes_quotes() {
        assert_eq!(js_string("[name='ChkOption']"), "\"[name='ChkOption']\"");
        assert_eq!(js_string("a\"b"), "\"a\\\"b\"");
    }
}
