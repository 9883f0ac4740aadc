//! 機密データアクセスログ
//!
//! テナントの監査ポリシー（sensitive_tables）で指定されたテーブルへの
//! 読み取りアクセスを記録する。対象外テーブルへのアクセスは記録しない。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tenantd_common::error::{TenantdError, TenantdResult};
use uuid::Uuid;

use super::tenants::{self, parse_timestamp, parse_uuid};

/// 機密データアクセスレコード
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensitiveAccess {
    /// レコードID
    pub id: i64,
    /// アクセスしたユーザーID
    pub user_id: Uuid,
    /// テナントID
    pub tenant_id: Uuid,
    /// アクセスされたテーブル名
    pub accessed_table: String,
    /// アクセスされたレコードのキー
    pub accessed_key: String,
    /// アクセス日時
    pub accessed_at: DateTime<Utc>,
    /// クエリパラメータ（JSON）
    pub query_params: Option<serde_json::Value>,
}

/// アクセスを無条件に記録
pub async fn record(
    pool: &SqlitePool,
    user_id: Uuid,
    tenant_id: Uuid,
    accessed_table: &str,
    accessed_key: &str,
    query_params: Option<&serde_json::Value>,
) -> TenantdResult<i64> {
    let result = sqlx::query(
        "INSERT INTO sensitive_access_logs
             (user_id, tenant_id, accessed_table, accessed_key, accessed_at, query_params)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id.to_string())
    .bind(tenant_id.to_string())
    .bind(accessed_table)
    .bind(accessed_key)
    .bind(Utc::now().to_rfc3339())
    .bind(query_params.map(|v| v.to_string()))
    .execute(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to record sensitive access: {}", e)))?;

    Ok(result.last_insert_rowid())
}

/// テナントの監査ポリシーに従ってアクセスを記録
///
/// テーブルがポリシーのsensitive_tablesに含まれる場合のみ記録する。
///
/// # Returns
/// * `Ok(true)` - 記録した
/// * `Ok(false)` - ポリシー対象外のため記録しなかった
pub async fn record_if_sensitive(
    pool: &SqlitePool,
    user_id: Uuid,
    tenant_id: Uuid,
    accessed_table: &str,
    accessed_key: &str,
    query_params: Option<&serde_json::Value>,
) -> TenantdResult<bool> {
    let policy = tenants::find_audit_policy(pool, tenant_id).await?;

    let is_sensitive = policy
        .map(|p| p.is_sensitive_table(accessed_table))
        .unwrap_or(false);
    if !is_sensitive {
        return Ok(false);
    }

    record(pool, user_id, tenant_id, accessed_table, accessed_key, query_params).await?;
    Ok(true)
}

/// テナントのアクセスログを新しい順で取得
///
/// # Arguments
/// * `since` - この日時以降のみ（Noneで全期間）
pub async fn list_for_tenant(
    pool: &SqlitePool,
    tenant_id: Uuid,
    since: Option<DateTime<Utc>>,
    limit: u32,
) -> TenantdResult<Vec<SensitiveAccess>> {
    let rows = sqlx::query_as::<_, SensitiveAccessRow>(
        "SELECT * FROM sensitive_access_logs
         WHERE tenant_id = ? AND (? IS NULL OR accessed_at >= ?)
         ORDER BY accessed_at DESC, id DESC
         LIMIT ?",
    )
    .bind(tenant_id.to_string())
    .bind(since.map(|t| t.to_rfc3339()))
    .bind(since.map(|t| t.to_rfc3339()))
    .bind(limit as i64)
    .fetch_all(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to list sensitive access: {}", e)))?;

    rows.into_iter()
        .map(SensitiveAccessRow::try_into_access)
        .collect()
}

/// テナント内の特定ユーザーのアクセスログを新しい順で取得
pub async fn list_for_user(
    pool: &SqlitePool,
    tenant_id: Uuid,
    user_id: Uuid,
    since: Option<DateTime<Utc>>,
    limit: u32,
) -> TenantdResult<Vec<SensitiveAccess>> {
    let rows = sqlx::query_as::<_, SensitiveAccessRow>(
        "SELECT * FROM sensitive_access_logs
         WHERE tenant_id = ? AND user_id = ? AND (? IS NULL OR accessed_at >= ?)
         ORDER BY accessed_at DESC, id DESC
         LIMIT ?",
    )
    .bind(tenant_id.to_string())
    .bind(user_id.to_string())
    .bind(since.map(|t| t.to_rfc3339()))
    .bind(since.map(|t| t.to_rfc3339()))
    .bind(limit as i64)
    .fetch_all(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to list sensitive access: {}", e)))?;

    rows.into_iter()
        .map(SensitiveAccessRow::try_into_access)
        .collect()
}

#[derive(sqlx::FromRow)]
struct SensitiveAccessRow {
    id: i64,
    user_id: String,
    tenant_id: String,
    accessed_table: String,
    accessed_key: String,
    accessed_at: String,
    query_params: Option<String>,
}

impl SensitiveAccessRow {
    fn try_into_access(self) -> TenantdResult<SensitiveAccess> {
        Ok(SensitiveAccess {
            id: self.id,
            user_id: parse_uuid(&self.user_id, "user id")?,
            tenant_id: parse_uuid(&self.tenant_id, "tenant id")?,
            accessed_table: self.accessed_table,
            accessed_key: self.accessed_key,
            accessed_at: parse_timestamp(&self.accessed_at, "accessed_at")?,
            query_params: self
                .query_params
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .map_err(|e| {
                    TenantdError::Database(format!("Invalid query_params JSON: {}", e))
                })?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tenants::TenantAuditPolicy;
    use crate::db::users;

    async fn setup_test_db() -> (SqlitePool, Uuid, Uuid) {
        let pool = crate::db::test_utils::test_db_pool().await;
        let tenant = tenants::create(&pool, "Acme", "acme", None).await.unwrap();
        let user = users::create(&pool, "alice@example.com", "h", "Alice", "Smith")
            .await
            .unwrap();
        (pool, tenant.id, user.id)
    }

    #[tokio::test]
    async fn test_record_and_list() {
        let (pool, tenant_id, user_id) = setup_test_db().await;

        let params = serde_json::json!({"fields": ["mfa_secret"]});
        record(&pool, user_id, tenant_id, "users", "u-42", Some(&params))
            .await
            .unwrap();

        let logs = list_for_tenant(&pool, tenant_id, None, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].accessed_table, "users");
        assert_eq!(logs[0].accessed_key, "u-42");
        assert_eq!(logs[0].query_params, Some(params));
    }

    #[tokio::test]
    async fn test_record_if_sensitive_follows_policy() {
        let (pool, tenant_id, user_id) = setup_test_db().await;

        tenants::upsert_audit_policy(
            &pool,
            &TenantAuditPolicy {
                tenant_id,
                log_retention_days: 365,
                require_log_signatures: false,
                sensitive_tables: vec!["users".to_string()],
            },
        )
        .await
        .unwrap();

        let recorded = record_if_sensitive(&pool, user_id, tenant_id, "users", "u-1", None)
            .await
            .unwrap();
        assert!(recorded);

        let skipped = record_if_sensitive(&pool, user_id, tenant_id, "departments", "d-1", None)
            .await
            .unwrap();
        assert!(!skipped);

        let logs = list_for_tenant(&pool, tenant_id, None, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
    }

    #[tokio::test]
    async fn test_no_policy_means_nothing_recorded() {
        let (pool, tenant_id, user_id) = setup_test_db().await;

        let recorded = record_if_sensitive(&pool, user_id, tenant_id, "users", "u-1", None)
            .await
            .unwrap();
        assert!(!recorded);
    }

    #[tokio::test]
    async fn test_list_for_user() {
        let (pool, tenant_id, user_id) = setup_test_db().await;
        let other = users::create(&pool, "bob@example.com", "h", "Bob", "Jones")
            .await
            .unwrap();

        record(&pool, user_id, tenant_id, "users", "u-1", None)
            .await
            .unwrap();
        record(&pool, other.id, tenant_id, "users", "u-2", None)
            .await
            .unwrap();

        let logs = list_for_user(&pool, tenant_id, user_id, None, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].accessed_key, "u-1");
    }

    #[tokio::test]
    async fn test_time_window() {
        let (pool, tenant_id, user_id) = setup_test_db().await;

        record(&pool, user_id, tenant_id, "users", "u-1", None)
            .await
            .unwrap();

        // 未来を起点にすると何もヒットしない
        let future = Utc::now() + chrono::Duration::hours(1);
        let logs = list_for_tenant(&pool, tenant_id, Some(future), 10).await.unwrap();
        assert!(logs.is_empty());

        let past = Utc::now() - chrono::Duration::hours(1);
        let logs = list_for_tenant(&pool, tenant_id, Some(past), 10).await.unwrap();
        assert_eq!(logs.len(), 1);
    }

    #[tokio::test]
    async fn test_cascade_with_tenant() {
        let (pool, tenant_id, user_id) = setup_test_db().await;

        record(&pool, user_id, tenant_id, "users", "u-1", None)
            .await
            .unwrap();
        tenants::delete(&pool, tenant_id).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sensitive_access_logs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
