//! データベースマイグレーション実行

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tenantd_common::error::TenantdError;

/// SQLiteデータベース接続プールを作成してマイグレーションを実行
///
/// データベースファイルが存在しない場合は作成する。
/// 外部キー制約はスキーマのCASCADE/RESTRICT/SET NULL動作の前提なので
/// 全接続で有効化する。
///
/// # Arguments
/// * `database_url` - データベースURL（例: "sqlite://tenantd.db"）
///
/// # Returns
/// * `Ok(SqlitePool)` - 初期化済みデータベースプール
/// * `Err(TenantdError)` - 初期化失敗
pub async fn initialize_database(database_url: &str) -> Result<SqlitePool, TenantdError> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| TenantdError::Database(format!("Invalid database URL: {}", e)))?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .map_err(|e| TenantdError::Database(format!("Failed to connect to database: {}", e)))?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// マイグレーションを実行（sqlx::migrate!マクロを使用）
///
/// # Arguments
/// * `pool` - データベース接続プール
///
/// # Returns
/// * `Ok(())` - マイグレーション成功
/// * `Err(TenantdError)` - マイグレーション失敗
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), TenantdError> {
    tracing::info!("Running database migrations");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| TenantdError::Database(format!("Failed to run migrations: {}", e)))?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
