use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("ブラウザ初期化エラー: {0}")]
    BrowserInit(String),

    #[error("ログインエラー: {0}")]
    Login(String),

    #[error("ナビゲーションエラー: {0}")]
    Navigation(String),

    #[error("タイムアウト: {0}")]
    Timeout(String),

    #[error("要素が見つかりません: {0}")]
    ElementNotFound(String),

    #[error("スクリプト実行エラー: {0}")]
    JavaScript(String),

    #[error("解析エラー: {0}")]
    Parse(String),

    #[error("日付解析エラー: {0:?}")]
    DateParse(String),

    #[error("スプレッドシート読み込みエラー: {0}")]
    Sheets(String),

    #[error("スプレッドシート一括更新エラー: {0}")]
    BatchWrite(String),

    #[error("列が見つかりません: {0}")]
    MissingColumn(String),

    #[error("設定エラー: {0}")]
    Config(String),

    #[error("HTTPエラー: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSONエラー: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ファイル操作エラー: {0}")]
    FileIO(#[from] std::io::Error),
}
