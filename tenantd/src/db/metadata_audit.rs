//! メタデータ変更監査
//!
//! 任意テーブルの行単位の変更履歴（INSERT/UPDATE/DELETE）を
//! 変更前後の状態スナップショットとともに記録する。
//! 操作種別ごとに前後状態の有無を強制する。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tenantd_common::error::{CommonError, TenantdError, TenantdResult};
use tenantd_common::types::ChangeOperation;
use uuid::Uuid;

use super::tenants::{parse_timestamp, parse_uuid};

/// メタデータ変更レコード
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataChange {
    /// レコードID
    pub id: i64,
    /// 変更されたテーブル名
    pub table_name: String,
    /// 変更された行のID（文字列表現）
    pub record_id: String,
    /// 操作種別
    pub operation: ChangeOperation,
    /// 変更前の状態（INSERTではNone）
    pub before_state: Option<serde_json::Value>,
    /// 変更後の状態（DELETEではNone）
    pub after_state: Option<serde_json::Value>,
    /// 変更日時
    pub changed_at: DateTime<Utc>,
    /// 変更したユーザーID
    pub changed_by_user_id: Option<Uuid>,
    /// テナントID（テナント非依存テーブルではNone）
    pub tenant_id: Option<Uuid>,
}

/// INSERT操作を記録（after_stateのみ）
pub async fn capture_insert(
    pool: &SqlitePool,
    table_name: &str,
    record_id: &str,
    after_state: &serde_json::Value,
    changed_by: Option<Uuid>,
    tenant_id: Option<Uuid>,
) -> TenantdResult<i64> {
    insert_change(
        pool,
        table_name,
        record_id,
        ChangeOperation::Insert,
        None,
        Some(after_state),
        changed_by,
        tenant_id,
    )
    .await
}

/// UPDATE操作を記録（before/after両方が必須）
pub async fn capture_update(
    pool: &SqlitePool,
    table_name: &str,
    record_id: &str,
    before_state: &serde_json::Value,
    after_state: &serde_json::Value,
    changed_by: Option<Uuid>,
    tenant_id: Option<Uuid>,
) -> TenantdResult<i64> {
    insert_change(
        pool,
        table_name,
        record_id,
        ChangeOperation::Update,
        Some(before_state),
        Some(after_state),
        changed_by,
        tenant_id,
    )
    .await
}

/// DELETE操作を記録（before_stateのみ）
pub async fn capture_delete(
    pool: &SqlitePool,
    table_name: &str,
    record_id: &str,
    before_state: &serde_json::Value,
    changed_by: Option<Uuid>,
    tenant_id: Option<Uuid>,
) -> TenantdResult<i64> {
    insert_change(
        pool,
        table_name,
        record_id,
        ChangeOperation::Delete,
        Some(before_state),
        None,
        changed_by,
        tenant_id,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
async fn insert_change(
    pool: &SqlitePool,
    table_name: &str,
    record_id: &str,
    operation: ChangeOperation,
    before_state: Option<&serde_json::Value>,
    after_state: Option<&serde_json::Value>,
    changed_by: Option<Uuid>,
    tenant_id: Option<Uuid>,
) -> TenantdResult<i64> {
    if table_name.is_empty() || record_id.is_empty() {
        return Err(
            CommonError::Validation("Table name and record id must not be empty".to_string())
                .into(),
        );
    }

    let result = sqlx::query(
        "INSERT INTO metadata_audit
             (table_name, record_id, operation, before_state, after_state,
              changed_at, changed_by_user_id, tenant_id)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(table_name)
    .bind(record_id)
    .bind(operation.as_str())
    .bind(before_state.map(|v| v.to_string()))
    .bind(after_state.map(|v| v.to_string()))
    .bind(Utc::now().to_rfc3339())
    .bind(changed_by.map(|u| u.to_string()))
    .bind(tenant_id.map(|t| t.to_string()))
    .execute(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to record metadata change: {}", e)))?;

    Ok(result.last_insert_rowid())
}

/// 特定の行の変更履歴を古い順で取得
pub async fn history_of(
    pool: &SqlitePool,
    table_name: &str,
    record_id: &str,
) -> TenantdResult<Vec<MetadataChange>> {
    let rows = sqlx::query_as::<_, MetadataChangeRow>(
        "SELECT * FROM metadata_audit
         WHERE table_name = ? AND record_id = ?
         ORDER BY changed_at ASC, id ASC",
    )
    .bind(table_name)
    .bind(record_id)
    .fetch_all(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to load change history: {}", e)))?;

    rows.into_iter()
        .map(MetadataChangeRow::try_into_change)
        .collect()
}

/// テーブル単位の変更履歴を新しい順で取得
pub async fn list_by_table(
    pool: &SqlitePool,
    table_name: &str,
    limit: u32,
) -> TenantdResult<Vec<MetadataChange>> {
    let rows = sqlx::query_as::<_, MetadataChangeRow>(
        "SELECT * FROM metadata_audit
         WHERE table_name = ?
         ORDER BY changed_at DESC, id DESC
         LIMIT ?",
    )
    .bind(table_name)
    .bind(limit as i64)
    .fetch_all(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to list table changes: {}", e)))?;

    rows.into_iter()
        .map(MetadataChangeRow::try_into_change)
        .collect()
}

/// テナントの変更履歴を新しい順で取得
pub async fn list_for_tenant(
    pool: &SqlitePool,
    tenant_id: Uuid,
    limit: u32,
) -> TenantdResult<Vec<MetadataChange>> {
    let rows = sqlx::query_as::<_, MetadataChangeRow>(
        "SELECT * FROM metadata_audit
         WHERE tenant_id = ?
         ORDER BY changed_at DESC, id DESC
         LIMIT ?",
    )
    .bind(tenant_id.to_string())
    .bind(limit as i64)
    .fetch_all(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to list metadata changes: {}", e)))?;

    rows.into_iter()
        .map(MetadataChangeRow::try_into_change)
        .collect()
}

#[derive(sqlx::FromRow)]
struct MetadataChangeRow {
    id: i64,
    table_name: String,
    record_id: String,
    operation: String,
    before_state: Option<String>,
    after_state: Option<String>,
    changed_at: String,
    changed_by_user_id: Option<String>,
    tenant_id: Option<String>,
}

impl MetadataChangeRow {
    fn try_into_change(self) -> TenantdResult<MetadataChange> {
        let operation: ChangeOperation = self.operation.parse()?;

        let parse_state = |raw: Option<String>| -> TenantdResult<Option<serde_json::Value>> {
            raw.as_deref()
                .map(serde_json::from_str)
                .transpose()
                .map_err(|e| TenantdError::Database(format!("Invalid state JSON: {}", e)))
        };

        Ok(MetadataChange {
            id: self.id,
            table_name: self.table_name,
            record_id: self.record_id,
            operation,
            before_state: parse_state(self.before_state)?,
            after_state: parse_state(self.after_state)?,
            changed_at: parse_timestamp(&self.changed_at, "changed_at")?,
            changed_by_user_id: self
                .changed_by_user_id
                .as_deref()
                .map(|s| parse_uuid(s, "user id"))
                .transpose()?,
            tenant_id: self
                .tenant_id
                .as_deref()
                .map(|s| parse_uuid(s, "tenant id"))
                .transpose()?,
        })
    }
}
