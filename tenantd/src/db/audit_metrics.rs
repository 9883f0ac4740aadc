//! 従量メトリクス
//!
//! テナントごとの機能使用量を計測点単位で記録する。
//! (tenant_id, feature, measured_at)が一意で、同一計測点への
//! 再記録は使用量を加算する。課金計算自体は本クレートの範囲外。

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tenantd_common::error::{TenantdError, TenantdResult};
use uuid::Uuid;

use super::tenants::{parse_timestamp, parse_uuid};

/// 使用量メトリクス
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageMetric {
    /// メトリクスID
    pub id: i64,
    /// テナントID
    pub tenant_id: Uuid,
    /// 機能識別子（例: "api_calls", "storage_gb"）
    pub feature: String,
    /// 使用量
    pub quantity_used: i64,
    /// 計測日時
    pub measured_at: DateTime<Utc>,
}

/// 機能別の使用量合計
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureUsage {
    /// 機能識別子
    pub feature: String,
    /// 使用量合計
    pub total: i64,
}

/// 日別の使用量
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyUsage {
    /// 日付（"YYYY-MM-DD"）
    pub day: String,
    /// 使用量合計
    pub total: i64,
}

/// 使用量を記録
///
/// 同一の(tenant_id, feature, measured_at)への記録は加算になる。
pub async fn record_usage(
    pool: &SqlitePool,
    tenant_id: Uuid,
    feature: &str,
    quantity: i64,
    measured_at: DateTime<Utc>,
) -> TenantdResult<()> {
    sqlx::query(
        "INSERT INTO audit_metrics (tenant_id, feature, quantity_used, measured_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(tenant_id, feature, measured_at) DO UPDATE SET
             quantity_used = quantity_used + excluded.quantity_used",
    )
    .bind(tenant_id.to_string())
    .bind(feature)
    .bind(quantity)
    .bind(measured_at.to_rfc3339())
    .execute(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to record usage: {}", e)))?;

    Ok(())
}

/// テナントの全機能使用量合計
pub async fn total_for_tenant(pool: &SqlitePool, tenant_id: Uuid) -> TenantdResult<i64> {
    let total: Option<i64> = sqlx::query_scalar(
        "SELECT SUM(quantity_used) FROM audit_metrics WHERE tenant_id = ?",
    )
    .bind(tenant_id.to_string())
    .fetch_one(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to sum usage: {}", e)))?;

    Ok(total.unwrap_or(0))
}

/// テナントの機能別使用量合計（使用量の降順）
pub async fn totals_by_feature(
    pool: &SqlitePool,
    tenant_id: Uuid,
) -> TenantdResult<Vec<FeatureUsage>> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        "SELECT feature, SUM(quantity_used) FROM audit_metrics
         WHERE tenant_id = ?
         GROUP BY feature
         ORDER BY SUM(quantity_used) DESC",
    )
    .bind(tenant_id.to_string())
    .fetch_all(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to aggregate usage: {}", e)))?;

    Ok(rows
        .into_iter()
        .map(|(feature, total)| FeatureUsage { feature, total })
        .collect())
}

/// 直近N日間の日別使用量（日付の昇順）
///
/// 記録のない日は結果に含まれない。
pub async fn daily_series(
    pool: &SqlitePool,
    tenant_id: Uuid,
    feature: &str,
    days: i64,
) -> TenantdResult<Vec<DailyUsage>> {
    let since = Utc::now() - Duration::days(days);

    let rows = sqlx::query_as::<_, (String, i64)>(
        "SELECT DATE(measured_at), SUM(quantity_used) FROM audit_metrics
         WHERE tenant_id = ? AND feature = ? AND measured_at >= ?
         GROUP BY DATE(measured_at)
         ORDER BY DATE(measured_at) ASC",
    )
    .bind(tenant_id.to_string())
    .bind(feature)
    .bind(since.to_rfc3339())
    .fetch_all(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to build daily series: {}", e)))?;

    Ok(rows
        .into_iter()
        .map(|(day, total)| DailyUsage { day, total })
        .collect())
}

/// テナントの計測履歴を新しい順で取得
pub async fn list_for_tenant(
    pool: &SqlitePool,
    tenant_id: Uuid,
    limit: u32,
) -> TenantdResult<Vec<UsageMetric>> {
    let rows = sqlx::query_as::<_, UsageMetricRow>(
        "SELECT * FROM audit_metrics WHERE tenant_id = ? ORDER BY measured_at DESC LIMIT ?",
    )
    .bind(tenant_id.to_string())
    .bind(limit as i64)
    .fetch_all(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to list metrics: {}", e)))?;

    rows.into_iter()
        .map(UsageMetricRow::try_into_metric)
        .collect()
}

#[derive(sqlx::FromRow)]
struct UsageMetricRow {
    id: i64,
    tenant_id: String,
    feature: String,
    quantity_used: i64,
    measured_at: String,
}

impl UsageMetricRow {
    fn try_into_metric(self) -> TenantdResult<UsageMetric> {
        Ok(UsageMetric {
            id: self.id,
            tenant_id: parse_uuid(&self.tenant_id, "tenant id")?,
            feature: self.feature,
            quantity_used: self.quantity_used,
            measured_at: parse_timestamp(&self.measured_at, "measured_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tenants;

    async fn setup_test_db() -> (SqlitePool, Uuid) {
        let pool = crate::db::test_utils::test_db_pool().await;
        let tenant = tenants::create(&pool, "Acme", "acme", None).await.unwrap();
        (pool, tenant.id)
    }

    #[tokio::test]
    async fn test_record_and_total() {
        let (pool, tenant_id) = setup_test_db().await;
        let now = Utc::now();

        record_usage(&pool, tenant_id, "api_calls", 100, now)
            .await
            .unwrap();
        record_usage(&pool, tenant_id, "storage_gb", 5, now)
            .await
            .unwrap();

        assert_eq!(total_for_tenant(&pool, tenant_id).await.unwrap(), 105);
    }

    #[tokio::test]
    async fn test_same_measurement_point_accumulates() {
        let (pool, tenant_id) = setup_test_db().await;
        let point = Utc::now();

        record_usage(&pool, tenant_id, "api_calls", 100, point)
            .await
            .unwrap();
        record_usage(&pool, tenant_id, "api_calls", 50, point)
            .await
            .unwrap();

        // 行は1件のまま加算される
        let metrics = list_for_tenant(&pool, tenant_id, 10).await.unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].quantity_used, 150);
    }

    #[tokio::test]
    async fn test_totals_by_feature_ordered() {
        let (pool, tenant_id) = setup_test_db().await;
        let now = Utc::now();

        record_usage(&pool, tenant_id, "api_calls", 1000, now)
            .await
            .unwrap();
        record_usage(&pool, tenant_id, "storage_gb", 20, now)
            .await
            .unwrap();

        let totals = totals_by_feature(&pool, tenant_id).await.unwrap();
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0].feature, "api_calls");
        assert_eq!(totals[0].total, 1000);
    }

    #[tokio::test]
    async fn test_tenant_scoping() {
        let (pool, tenant_id) = setup_test_db().await;
        let other = tenants::create(&pool, "Other", "other", None).await.unwrap();
        let now = Utc::now();

        record_usage(&pool, tenant_id, "api_calls", 100, now)
            .await
            .unwrap();
        record_usage(&pool, other.id, "api_calls", 999, now)
            .await
            .unwrap();

        assert_eq!(total_for_tenant(&pool, tenant_id).await.unwrap(), 100);
        assert_eq!(total_for_tenant(&pool, other.id).await.unwrap(), 999);
    }

    #[tokio::test]
    async fn test_daily_series() {
        let (pool, tenant_id) = setup_test_db().await;
        let now = Utc::now();

        record_usage(&pool, tenant_id, "api_calls", 10, now - Duration::days(2))
            .await
            .unwrap();
        record_usage(&pool, tenant_id, "api_calls", 20, now - Duration::days(1))
            .await
            .unwrap();
        record_usage(&pool, tenant_id, "api_calls", 30, now)
            .await
            .unwrap();
        // 範囲外は含まれない
        record_usage(&pool, tenant_id, "api_calls", 999, now - Duration::days(30))
            .await
            .unwrap();

        let series = daily_series(&pool, tenant_id, "api_calls", 7).await.unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series.iter().map(|d| d.total).sum::<i64>(), 60);
        // 昇順
        assert!(series[0].day < series[2].day);
    }

    #[tokio::test]
    async fn test_metrics_cascade_with_tenant() {
        let (pool, tenant_id) = setup_test_db().await;

        record_usage(&pool, tenant_id, "api_calls", 100, Utc::now())
            .await
            .unwrap();
        tenants::delete(&pool, tenant_id).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_metrics")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
