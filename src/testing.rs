//! テスト用のスクリプト可能な PageDriver

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ScraperError;
use crate::icmega::session::USERNAME_FIELD;
use crate::sheets::CellUpdate;
use crate::traits::{BrowserLauncher, PageDriver, SheetStore};

#[derive(Default)]
struct State {
    current_url: String,
    present: HashSet<String>,
    present_on: HashMap<String, HashSet<String>>,
    texts_on: HashMap<String, VecDeque<Vec<String>>>,
    eval_rules: Vec<(String, Value)>,
    hanging_evals: Vec<String>,
    failing_evals: Vec<String>,
    failing_gotos: HashSet<String>,
    checked: bool,
    screenshot_fails: bool,
    log: Vec<String>,
    close_count: usize,
}

#[derive(Clone, Default)]
pub(crate) struct FakePage {
    state: Arc<Mutex<State>>,
}

impl FakePage {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn with_state(self, f: impl FnOnce(&mut State)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    pub(crate) fn with_login_form(self) -> Self {
        self.with_present(USERNAME_FIELD)
    }

    pub(crate) fn with_present(self, selector: &str) -> Self {
        self.with_state(|s| {
            s.present.insert(selector.to_string());
        })
    }

    pub(crate) fn with_present_on(self, url: &str, selector: &str) -> Self {
        self.with_state(|s| {
            s.present_on
                .entry(url.to_string())
                .or_default()
                .insert(selector.to_string());
        })
    }

    /// URL上で `texts` が返す値の列（最後の値は繰り返し返す）
    pub(crate) fn with_texts_on(self, url: &str, reads: Vec<Vec<&str>>) -> Self {
        self.with_state(|s| {
            s.texts_on.insert(
                url.to_string(),
                reads
                    .into_iter()
                    .map(|r| r.into_iter().map(String::from).collect())
                    .collect(),
            );
        })
    }

    pub(crate) fn with_eval(self, needle: &str, value: Value) -> Self {
        self.with_state(|s| s.eval_rules.push((needle.to_string(), value)))
    }

    /// `needle` を含むスクリプトは完了しない
    pub(crate) fn with_hanging_eval(self, needle: &str) -> Self {
        self.with_state(|s| s.hanging_evals.push(needle.to_string()))
    }

    pub(crate) fn with_failing_eval(self, needle: &str) -> Self {
        self.with_state(|s| s.failing_evals.push(needle.to_string()))
    }

    pub(crate) fn with_failing_goto(self, url: &str) -> Self {
        self.with_state(|s| {
            s.failing_gotos.insert(url.to_string());
        })
    }

    pub(crate) fn with_checked(self, checked: bool) -> Self {
        self.with_state(|s| s.checked = checked)
    }

    pub(crate) fn with_failing_screenshot(self) -> Self {
        self.with_state(|s| s.screenshot_fails = true)
    }

    pub(crate) fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.state.lock().unwrap().close_count
    }

    pub(crate) fn is_checked(&self) -> bool {
        self.state.lock().unwrap().checked
    }
}

#[async_trait]
impl PageDriver for FakePage {
    async fn goto(&self, url: &str) -> Result<(), ScraperError> {
        let mut s = self.state.lock().unwrap();
        s.log.push(format!("goto {}", url));
        if s.failing_gotos.contains(url) {
            return Err(ScraperError::Navigation(format!("{}: net::ERR_CONNECTION_RESET", url)));
        }
        s.current_url = url.to_string();
        Ok(())
    }

    async fn exists(&self, selector: &str) -> Result<bool, ScraperError> {
        let s = self.state.lock().unwrap();
        let on_page = s
            .present_on
            .get(&s.current_url)
            .map(|set| set.contains(selector))
            .unwrap_or(false);
        Ok(on_page || s.present.contains(selector))
    }

    async fn texts(&self, _selector: &str) -> Result<Vec<String>, ScraperError> {
        let mut s = self.state.lock().unwrap();
        let url = s.current_url.clone();
        let reads = match s.texts_on.get_mut(&url) {
            Some(reads) => reads,
            None => return Ok(Vec::new()),
        };
        if reads.len() > 1 {
            Ok(reads.pop_front().unwrap_or_default())
        } else {
            Ok(reads.front().cloned().unwrap_or_default())
        }
    }

    async fn type_into(&self, selector: &str, text: &str) -> Result<(), ScraperError> {
        let mut s = self.state.lock().unwrap();
        s.log.push(format!("type {} {}", selector, text));
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), ScraperError> {
        let mut s = self.state.lock().unwrap();
        if selector.contains("ChkOption") {
            s.checked = !s.checked;
        }
        s.log.push(format!("click {}", selector));
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<Value, ScraperError> {
        {
            let mut s = self.state.lock().unwrap();
            s.log.push(format!("eval {}", script));
            if s.failing_evals.iter().any(|n| script.contains(n.as_str())) {
                return Err(ScraperError::JavaScript("angular is not defined".into()));
            }
            if script.contains(".checked") {
                return Ok(Value::Bool(s.checked));
            }
            if !s.hanging_evals.iter().any(|n| script.contains(n.as_str())) {
                return Ok(s
                    .eval_rules
                    .iter()
                    .find(|(needle, _)| script.contains(needle.as_str()))
                    .map(|(_, v)| v.clone())
                    .unwrap_or(Value::Null));
            }
        }
        std::future::pending().await
    }

    async fn screenshot(&self) -> Result<Vec<u8>, ScraperError> {
        if self.state.lock().unwrap().screenshot_fails {
            return Err(ScraperError::JavaScript("screenshot unavailable".into()));
        }
        Ok(b"\x89PNG".to_vec())
    }

    async fn close(&mut self) -> Result<(), ScraperError> {
        self.state.lock().unwrap().close_count += 1;
        Ok(())
    }
}

/// 起動のたびに次のページを返す（None は起動失敗、最後の要素は繰り返す）
pub(crate) struct FakeLauncher {
    pages: Mutex<VecDeque<Option<FakePage>>>,
}

impl FakeLauncher {
    pub(crate) fn new(page: FakePage) -> Self {
        Self::sequence(vec![Some(page)])
    }

    pub(crate) fn failing() -> Self {
        Self::sequence(vec![None])
    }

    pub(crate) fn sequence(pages: Vec<Option<FakePage>>) -> Self {
        Self {
            pages: Mutex::new(pages.into()),
        }
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Box<dyn PageDriver>, ScraperError> {
        let next = {
            let mut pages = self.pages.lock().unwrap();
            if pages.len() > 1 {
                pages.pop_front().flatten()
            } else {
                pages.front().cloned().flatten()
            }
        };
        match next {
            Some(page) => Ok(Box::new(page)),
            None => Err(ScraperError::BrowserInit("no browser".into())),
        }
    }
}

/// メモリ上のシート
#[derive(Default)]
pub(crate) struct FakeStore {
    values: Mutex<Vec<Vec<String>>>,
    batches: Mutex<Vec<Vec<CellUpdate>>>,
    fail_batch: bool,
}

impl FakeStore {
    pub(crate) fn new(values: Vec<Vec<&str>>) -> Self {
        Self {
            values: Mutex::new(
                values
                    .into_iter()
                    .map(|r| r.into_iter().map(String::from).collect())
                    .collect(),
            ),
            ..Default::default()
        }
    }

    pub(crate) fn with_failing_batch(mut self) -> Self {
        self.fail_batch = true;
        self
    }

    pub(crate) fn batches(&self) -> Vec<Vec<CellUpdate>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl SheetStore for FakeStore {
    async fn read_all(&self) -> Result<Vec<Vec<String>>, ScraperError> {
        Ok(self.values.lock().unwrap().clone())
    }

    async fn batch_update(&self, updates: &[CellUpdate]) -> Result<(), ScraperError> {
        if self.fail_batch {
            return Err(ScraperError::Sheets("HTTP 500".into()));
        }
        self.batches.lock().unwrap().push(updates.to_vec());
        Ok(())
    }
}
