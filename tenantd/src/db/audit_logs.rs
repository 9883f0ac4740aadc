//! 監査ログストレージ
//!
//! 追記専用。公開APIはINSERTと参照のみで、既存レコードの更新手段は持たない。
//! 削除は保持期限パージ（purge_expired）に限られる。

use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use tenantd_common::error::{TenantdError, TenantdResult};
use tenantd_common::types::ActorType;
use uuid::Uuid;

use crate::audit::integrity::compute_event_checksum;
use crate::audit::types::{AuditEvent, AuditLogFilter, AuditLogRecord};

use super::tenants::{self, parse_timestamp, parse_uuid};

/// 監査ログストレージ
#[derive(Clone)]
pub struct AuditLogStorage {
    pool: SqlitePool,
}

impl AuditLogStorage {
    /// ストレージを作成
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// イベントを1件保存し、割り当てられたログIDを返す
    ///
    /// チェックサムは保存時にここで計算される。
    pub async fn insert(&self, event: &AuditEvent) -> TenantdResult<i64> {
        let checksum = compute_event_checksum(event);

        let result = sqlx::query(
            "INSERT INTO audit_logs
                 (tenant_id, actor_id, actor_type, action, target_table, target_id,
                  details, ip_address, created_at, data_before, data_after,
                  trace_id, reason, changed_fields, context, user_agent, request_id, checksum)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(event.tenant_id.to_string())
        .bind(event.actor_id.map(|a| a.to_string()))
        .bind(event.actor_type.as_str())
        .bind(&event.action)
        .bind(&event.target_table)
        .bind(&event.target_id)
        .bind(event.details.as_ref().map(|v| v.to_string()))
        .bind(&event.ip_address)
        .bind(event.occurred_at.to_rfc3339())
        .bind(event.data_before.as_ref().map(|v| v.to_string()))
        .bind(event.data_after.as_ref().map(|v| v.to_string()))
        .bind(&event.trace_id)
        .bind(&event.reason)
        .bind(
            event
                .changed_fields
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| TenantdError::Database(format!("Failed to serialize fields: {}", e)))?,
        )
        .bind(event.context.as_ref().map(|v| v.to_string()))
        .bind(&event.user_agent)
        .bind(&event.request_id)
        .bind(&checksum)
        .execute(&self.pool)
        .await
        .map_err(|e| TenantdError::Database(format!("Failed to insert audit log: {}", e)))?;

        Ok(result.last_insert_rowid())
    }

    /// イベントを一括保存（単一トランザクション）
    pub async fn insert_batch(&self, events: &[AuditEvent]) -> TenantdResult<Vec<i64>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| TenantdError::Database(format!("Failed to begin transaction: {}", e)))?;

        let mut ids = Vec::with_capacity(events.len());
        for event in events {
            let checksum = compute_event_checksum(event);
            let result = sqlx::query(
                "INSERT INTO audit_logs
                     (tenant_id, actor_id, actor_type, action, target_table, target_id,
                      details, ip_address, created_at, data_before, data_after,
                      trace_id, reason, changed_fields, context, user_agent, request_id, checksum)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(event.tenant_id.to_string())
            .bind(event.actor_id.map(|a| a.to_string()))
            .bind(event.actor_type.as_str())
            .bind(&event.action)
            .bind(&event.target_table)
            .bind(&event.target_id)
            .bind(event.details.as_ref().map(|v| v.to_string()))
            .bind(&event.ip_address)
            .bind(event.occurred_at.to_rfc3339())
            .bind(event.data_before.as_ref().map(|v| v.to_string()))
            .bind(event.data_after.as_ref().map(|v| v.to_string()))
            .bind(&event.trace_id)
            .bind(&event.reason)
            .bind(
                event
                    .changed_fields
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()
                    .map_err(|e| {
                        TenantdError::Database(format!("Failed to serialize fields: {}", e))
                    })?,
            )
            .bind(event.context.as_ref().map(|v| v.to_string()))
            .bind(&event.user_agent)
            .bind(&event.request_id)
            .bind(&checksum)
            .execute(&mut *tx)
            .await
            .map_err(|e| TenantdError::Database(format!("Failed to insert audit log: {}", e)))?;

            ids.push(result.last_insert_rowid());
        }

        tx.commit()
            .await
            .map_err(|e| TenantdError::Database(format!("Failed to commit audit batch: {}", e)))?;

        Ok(ids)
    }

    /// IDでログを取得
    pub async fn get_by_id(&self, id: i64) -> TenantdResult<Option<AuditLogRecord>> {
        let row = sqlx::query_as::<_, AuditLogRow>("SELECT * FROM audit_logs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| TenantdError::Database(format!("Failed to get audit log: {}", e)))?;

        row.map(AuditLogRow::try_into_record).transpose()
    }

    /// フィルタ条件でログを検索（記録日時の降順、ページネーション付き）
    pub async fn query(&self, filter: &AuditLogFilter) -> TenantdResult<Vec<AuditLogRecord>> {
        let (where_clause, binds) = build_where_clause(filter);
        // ページ計算はi64で行う（u32同士の乗算はオーバーフローし得る）
        let per_page = i64::from(filter.per_page.max(1));
        let offset = (i64::from(filter.page.max(1)) - 1) * per_page;

        let sql = format!(
            "SELECT * FROM audit_logs WHERE {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            where_clause
        );

        let mut query = sqlx::query_as::<_, AuditLogRow>(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let rows = query
            .bind(per_page)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| TenantdError::Database(format!("Failed to query audit logs: {}", e)))?;

        rows.into_iter().map(AuditLogRow::try_into_record).collect()
    }

    /// フィルタ条件に一致するログの総数
    pub async fn count(&self, filter: &AuditLogFilter) -> TenantdResult<i64> {
        let (where_clause, binds) = build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM audit_logs WHERE {}", where_clause);

        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }

        query
            .fetch_one(&self.pool)
            .await
            .map_err(|e| TenantdError::Database(format!("Failed to count audit logs: {}", e)))
    }

    /// 保持期限を過ぎたログを削除
    ///
    /// 付随する署名はCASCADEで削除される。
    ///
    /// # Arguments
    /// * `tenant_id` - 対象テナント
    /// * `retention_days` - 保持日数（これより古いログを削除）
    ///
    /// # Returns
    /// * `Ok(u64)` - 削除した件数
    pub async fn purge_expired(&self, tenant_id: Uuid, retention_days: i64) -> TenantdResult<u64> {
        let cutoff = Utc::now() - Duration::days(retention_days);

        let result = sqlx::query("DELETE FROM audit_logs WHERE tenant_id = ? AND created_at < ?")
            .bind(tenant_id.to_string())
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| TenantdError::Database(format!("Failed to purge audit logs: {}", e)))?;

        let purged = result.rows_affected();
        if purged > 0 {
            tracing::info!(
                tenant_id = %tenant_id,
                purged,
                retention_days,
                "Purged expired audit logs"
            );
        }

        Ok(purged)
    }

    /// 全テナントの保持期限切れログを各テナントの監査ポリシーに従って削除
    ///
    /// ポリシー未設定のテナントにはdefault_retention_daysを適用する。
    ///
    /// # Returns
    /// * `Ok(u64)` - 削除した合計件数
    pub async fn purge_by_policy(&self, default_retention_days: i64) -> TenantdResult<u64> {
        let tenant_ids: Vec<String> = sqlx::query_scalar("SELECT id FROM tenants")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| TenantdError::Database(format!("Failed to list tenants: {}", e)))?;

        let mut total = 0;
        for raw in &tenant_ids {
            let tenant_id = parse_uuid(raw, "tenant id")?;
            let retention = tenants::find_audit_policy(&self.pool, tenant_id)
                .await?
                .map(|p| p.log_retention_days)
                .unwrap_or(default_retention_days);
            total += self.purge_expired(tenant_id, retention).await?;
        }

        Ok(total)
    }
}

/// フィルタからWHERE句とバインド値を構築
fn build_where_clause(filter: &AuditLogFilter) -> (String, Vec<String>) {
    let mut conditions = vec!["tenant_id = ?".to_string()];
    let mut binds = vec![filter.tenant_id.to_string()];

    if let Some(action) = &filter.action {
        conditions.push("action = ?".to_string());
        binds.push(action.clone());
    }
    if let Some(actor_id) = filter.actor_id {
        conditions.push("actor_id = ?".to_string());
        binds.push(actor_id.to_string());
    }
    if let Some(actor_type) = filter.actor_type {
        conditions.push("actor_type = ?".to_string());
        binds.push(actor_type.as_str().to_string());
    }
    if let Some(target_table) = &filter.target_table {
        conditions.push("target_table = ?".to_string());
        binds.push(target_table.clone());
    }
    if let Some(target_id) = &filter.target_id {
        conditions.push("target_id = ?".to_string());
        binds.push(target_id.clone());
    }
    if let Some(trace_id) = &filter.trace_id {
        conditions.push("trace_id = ?".to_string());
        binds.push(trace_id.clone());
    }
    if let Some(request_id) = &filter.request_id {
        conditions.push("request_id = ?".to_string());
        binds.push(request_id.clone());
    }
    if let Some(from) = filter.from {
        conditions.push("created_at >= ?".to_string());
        binds.push(from.to_rfc3339());
    }
    if let Some(to) = filter.to {
        conditions.push("created_at <= ?".to_string());
        binds.push(to.to_rfc3339());
    }

    (conditions.join(" AND "), binds)
}

#[derive(sqlx::FromRow)]
struct AuditLogRow {
    id: i64,
    tenant_id: String,
    actor_id: Option<String>,
    actor_type: String,
    action: String,
    target_table: Option<String>,
    target_id: Option<String>,
    details: Option<String>,
    ip_address: Option<String>,
    created_at: String,
    data_before: Option<String>,
    data_after: Option<String>,
    trace_id: Option<String>,
    reason: Option<String>,
    changed_fields: Option<String>,
    context: Option<String>,
    user_agent: Option<String>,
    request_id: Option<String>,
    checksum: Option<Vec<u8>>,
}

impl AuditLogRow {
    fn try_into_record(self) -> TenantdResult<AuditLogRecord> {
        let parse_json = |raw: Option<String>, field: &str| -> TenantdResult<Option<serde_json::Value>> {
            raw.as_deref()
                .map(serde_json::from_str)
                .transpose()
                .map_err(|e| TenantdError::Database(format!("Invalid {} JSON: {}", field, e)))
        };

        Ok(AuditLogRecord {
            id: self.id,
            tenant_id: parse_uuid(&self.tenant_id, "tenant id")?,
            actor_id: self
                .actor_id
                .as_deref()
                .map(|s| parse_uuid(s, "actor id"))
                .transpose()?,
            actor_type: ActorType::from_str(&self.actor_type),
            action: self.action,
            target_table: self.target_table,
            target_id: self.target_id,
            details: parse_json(self.details, "details")?,
            data_before: parse_json(self.data_before, "data_before")?,
            data_after: parse_json(self.data_after, "data_after")?,
            changed_fields: self
                .changed_fields
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .map_err(|e| {
                    TenantdError::Database(format!("Invalid changed_fields JSON: {}", e))
                })?,
            context: parse_json(self.context, "context")?,
            ip_address: self.ip_address,
            trace_id: self.trace_id,
            reason: self.reason,
            user_agent: self.user_agent,
            request_id: self.request_id,
            checksum: self.checksum.unwrap_or_default(),
            created_at: parse_timestamp(&self.created_at, "created_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::integrity::{verify_record, verify_records};
    use crate::db::tenants;

    async fn setup_test_db() -> (AuditLogStorage, SqlitePool, Uuid) {
        let pool = crate::db::test_utils::test_db_pool().await;
        let tenant = tenants::create(&pool, "Acme", "acme", None).await.unwrap();
        (AuditLogStorage::new(pool.clone()), pool, tenant.id)
    }

    fn sample_event(tenant_id: Uuid, action: &str) -> AuditEvent {
        AuditEvent::new(tenant_id, None, action)
            .with_target("tenants", tenant_id.to_string())
            .with_details(serde_json::json!({"source": "test"}))
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let (storage, _pool, tenant_id) = setup_test_db().await;

        let id = storage
            .insert(&sample_event(tenant_id, "tenant.update"))
            .await
            .unwrap();

        let record = storage.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(record.action, "tenant.update");
        assert_eq!(record.tenant_id, tenant_id);
        assert_eq!(record.checksum.len(), 32);
        assert!(verify_record(&record));
    }

    #[tokio::test]
    async fn test_insert_batch() {
        let (storage, _pool, tenant_id) = setup_test_db().await;

        let events: Vec<AuditEvent> = (0..5)
            .map(|i| sample_event(tenant_id, &format!("action.{}", i)))
            .collect();
        let ids = storage.insert_batch(&events).await.unwrap();
        assert_eq!(ids.len(), 5);

        let filter = AuditLogFilter::for_tenant(tenant_id);
        assert_eq!(storage.count(&filter).await.unwrap(), 5);

        let records = storage.query(&filter).await.unwrap();
        let report = verify_records(&records);
        assert!(report.is_intact());
    }

    #[tokio::test]
    async fn test_query_filters() {
        let (storage, pool, tenant_id) = setup_test_db().await;

        let other = tenants::create(&pool, "Other", "other", None).await.unwrap();

        storage
            .insert(&sample_event(tenant_id, "user.invite"))
            .await
            .unwrap();
        storage
            .insert(&sample_event(tenant_id, "tenant.update"))
            .await
            .unwrap();
        storage
            .insert(&sample_event(other.id, "user.invite"))
            .await
            .unwrap();

        // テナント境界を越えない
        let filter = AuditLogFilter::for_tenant(tenant_id);
        assert_eq!(storage.count(&filter).await.unwrap(), 2);

        let mut by_action = AuditLogFilter::for_tenant(tenant_id);
        by_action.action = Some("user.invite".to_string());
        let records = storage.query(&by_action).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, "user.invite");
    }

    #[tokio::test]
    async fn test_query_time_window_and_pagination() {
        let (storage, _pool, tenant_id) = setup_test_db().await;

        for i in 0..10 {
            let mut event = sample_event(tenant_id, &format!("action.{}", i));
            event.occurred_at = Utc::now() - Duration::minutes(10 - i);
            storage.insert(&event).await.unwrap();
        }

        let mut filter = AuditLogFilter::for_tenant(tenant_id);
        filter.per_page = 4;
        filter.page = 1;
        let page1 = storage.query(&filter).await.unwrap();
        assert_eq!(page1.len(), 4);
        // 降順なので最新のアクションが先頭
        assert_eq!(page1[0].action, "action.9");

        filter.page = 3;
        let page3 = storage.query(&filter).await.unwrap();
        assert_eq!(page3.len(), 2);

        let mut windowed = AuditLogFilter::for_tenant(tenant_id);
        windowed.from = Some(Utc::now() - Duration::minutes(3));
        let recent = storage.query(&windowed).await.unwrap();
        assert!(recent.len() < 10);
        assert!(!recent.is_empty());
    }

    #[tokio::test]
    async fn test_query_extreme_page_number() {
        let (storage, _pool, tenant_id) = setup_test_db().await;

        storage
            .insert(&sample_event(tenant_id, "only.action"))
            .await
            .unwrap();

        // u32の上限ページでもオーバーフローせず空ページを返す
        let mut filter = AuditLogFilter::for_tenant(tenant_id);
        filter.page = u32::MAX;
        filter.per_page = 50;
        let records = storage.query(&filter).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_query_by_actor_type_and_trace() {
        let (storage, _pool, tenant_id) = setup_test_db().await;

        let mut traced = sample_event(tenant_id, "user.login");
        traced.trace_id = Some("trace-123".to_string());
        storage.insert(&traced).await.unwrap();

        let system_event = AuditEvent::system(tenant_id, "retention.purge");
        storage.insert(&system_event).await.unwrap();

        let mut by_type = AuditLogFilter::for_tenant(tenant_id);
        by_type.actor_type = Some(ActorType::System);
        let records = storage.query(&by_type).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, "retention.purge");

        let mut by_trace = AuditLogFilter::for_tenant(tenant_id);
        by_trace.trace_id = Some("trace-123".to_string());
        let records = storage.query(&by_trace).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, "user.login");
    }

    #[tokio::test]
    async fn test_purge_by_policy() {
        let (storage, pool, tenant_id) = setup_test_db().await;
        let strict = tenants::create(&pool, "Strict", "strict", None).await.unwrap();

        tenants::upsert_audit_policy(
            &pool,
            &crate::db::tenants::TenantAuditPolicy {
                tenant_id: strict.id,
                log_retention_days: 30,
                require_log_signatures: false,
                sensitive_tables: vec![],
            },
        )
        .await
        .unwrap();

        // 60日前のログ: ポリシー30日のテナントでは期限切れ、
        // デフォルト365日のテナントでは保持対象
        for tid in [tenant_id, strict.id] {
            let mut event = sample_event(tid, "aged.action");
            event.occurred_at = Utc::now() - Duration::days(60);
            storage.insert(&event).await.unwrap();
        }

        let purged = storage.purge_by_policy(365).await.unwrap();
        assert_eq!(purged, 1);

        assert_eq!(
            storage
                .count(&AuditLogFilter::for_tenant(tenant_id))
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            storage
                .count(&AuditLogFilter::for_tenant(strict.id))
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (storage, _pool, tenant_id) = setup_test_db().await;

        let mut old = sample_event(tenant_id, "old.action");
        old.occurred_at = Utc::now() - Duration::days(400);
        storage.insert(&old).await.unwrap();
        storage
            .insert(&sample_event(tenant_id, "new.action"))
            .await
            .unwrap();

        let purged = storage.purge_expired(tenant_id, 365).await.unwrap();
        assert_eq!(purged, 1);

        let filter = AuditLogFilter::for_tenant(tenant_id);
        let remaining = storage.query(&filter).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].action, "new.action");
    }

    #[tokio::test]
    async fn test_purge_scoped_to_tenant() {
        let (storage, pool, tenant_id) = setup_test_db().await;
        let other = tenants::create(&pool, "Other", "other", None).await.unwrap();

        let mut old_a = sample_event(tenant_id, "a");
        old_a.occurred_at = Utc::now() - Duration::days(400);
        storage.insert(&old_a).await.unwrap();

        let mut old_b = sample_event(other.id, "b");
        old_b.occurred_at = Utc::now() - Duration::days(400);
        storage.insert(&old_b).await.unwrap();

        storage.purge_expired(tenant_id, 365).await.unwrap();

        // 他テナントのログは残る
        let filter = AuditLogFilter::for_tenant(other.id);
        assert_eq!(storage.count(&filter).await.unwrap(), 1);
    }
}
