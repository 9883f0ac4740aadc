//! tenantd-common
//!
//! マルチテナントSaaSプラットフォームの共通レイヤー。
//! エラー型、設定、クレート間で共有するドメイン列挙型を提供する。

/// エラー型定義
pub mod error;

/// 設定管理
pub mod config;

/// ログ初期化
pub mod logging;

/// 共有ドメイン型
pub mod types;
