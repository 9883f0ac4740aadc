//! データベースアクセス層
//!
//! SQLiteベースのデータ永続化

/// データベースマイグレーション
pub mod migrations;

/// テナント管理
pub mod tenants;

/// 部門管理
pub mod departments;

/// ロール・権限管理
pub mod roles;

/// ユーザー管理
pub mod users;

/// 招待管理
pub mod invitations;

/// 監査ログストレージ
pub mod audit_logs;

/// 監査ログ署名
pub mod signatures;

/// 従量メトリクス
pub mod audit_metrics;

/// メタデータ変更監査
pub mod metadata_audit;

/// 機密データアクセスログ
pub mod sensitive_access;
