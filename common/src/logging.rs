//! ログ初期化
//!
//! tracing-subscriberによる構造化ログのセットアップ。
//! RUST_LOG環境変数でフィルタを上書きできる。

use tracing_subscriber::EnvFilter;

/// ログを初期化
///
/// # Arguments
/// * `default_filter` - RUST_LOG未設定時のフィルタ（例: "info,sqlx=warn"）
pub fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    // 二重初期化はエラーになるため無視する（テストでの多重呼び出し対策）
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
