//! tenantd - マルチテナントSaaSプラットフォームの永続化層
//!
//! テナント・部門・ロール・ユーザー・招待のコアスキーマと、
//! 監査・コンプライアンスサブシステム（追記専用の監査ログ、
//! ログ署名、従量メトリクス、メタデータ変更追跡、
//! 機密データアクセスログ）を提供する。

pub mod audit;
pub mod db;

pub use tenantd_common::config::PlatformConfig;
pub use tenantd_common::error::{TenantdError, TenantdResult};
