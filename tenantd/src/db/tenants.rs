//! テナントCRUD操作
//!
//! テナント本体、テナント設定（tenant_configurations）、
//! 監査ポリシー（tenant_audit_policies）を扱う。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tenantd_common::error::{CommonError, TenantdError, TenantdResult};
use tenantd_common::types::TenantStatus;
use uuid::Uuid;

/// テナント（データ分離の起点）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    /// テナントID
    pub id: Uuid,
    /// 表示名
    pub name: String,
    /// URL識別子（例: "my-company"、一意）
    pub slug: String,
    /// カスタムドメイン（一意、任意）
    pub domain: Option<String>,
    /// ステータス
    pub status: TenantStatus,
    /// 親テナントID（リセラー等の階層構造用）
    pub parent_tenant_id: Option<Uuid>,
    /// オンボーディング完了日時
    pub onboarding_completed_at: Option<DateTime<Utc>>,
    /// 残クレジット（10進文字列、本クレートでは演算しない）
    pub available_credits: String,
    /// 課金戦略
    pub billing_strategy: String,
    /// データ保持ポリシー（JSON、任意）
    pub data_retention_policy: Option<serde_json::Value>,
    /// 作成日時
    pub created_at: DateTime<Utc>,
    /// 更新日時
    pub updated_at: DateTime<Utc>,
}

/// テナント固有の設定（ブランディング、ロケール等）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfiguration {
    /// 設定ID
    pub id: Uuid,
    /// テナントID
    pub tenant_id: Uuid,
    /// データ所在リージョン
    pub data_residency_region: String,
    /// タイムゾーン
    pub timezone: String,
    /// ロケール
    pub locale: String,
    /// ブランディング設定（JSON）
    pub branding: serde_json::Value,
    /// その他のテナント固有設定（JSON）
    pub settings: serde_json::Value,
    /// 作成日時
    pub created_at: DateTime<Utc>,
    /// 更新日時
    pub updated_at: DateTime<Utc>,
}

/// テナントの監査ポリシー
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantAuditPolicy {
    /// テナントID
    pub tenant_id: Uuid,
    /// 監査ログ保持日数
    pub log_retention_days: i64,
    /// 監査ログ署名を必須にするか
    pub require_log_signatures: bool,
    /// sensitive_access_logsに記録する対象テーブル
    pub sensitive_tables: Vec<String>,
}

impl TenantAuditPolicy {
    /// テーブルが機密アクセスログの対象かどうか
    pub fn is_sensitive_table(&self, table: &str) -> bool {
        self.sensitive_tables.iter().any(|t| t == table)
    }
}

/// テナントを作成
///
/// # Arguments
/// * `pool` - データベース接続プール
/// * `name` - 表示名
/// * `slug` - URL識別子（一意）
/// * `domain` - カスタムドメイン（任意）
///
/// # Returns
/// * `Ok(Tenant)` - 作成されたテナント（status = pending_setup）
/// * `Err(TenantdError)` - 作成失敗（slug/domain重複など）
pub async fn create(
    pool: &SqlitePool,
    name: &str,
    slug: &str,
    domain: Option<&str>,
) -> TenantdResult<Tenant> {
    if slug.is_empty() {
        return Err(CommonError::Validation("Tenant slug must not be empty".to_string()).into());
    }

    let id = Uuid::new_v4();
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO tenants (id, name, slug, domain, status, parent_tenant_id,
             onboarding_completed_at, available_credits, billing_strategy,
             data_retention_policy, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, NULL, NULL, '0.00', 'subscription', NULL, ?, ?)",
    )
    .bind(id.to_string())
    .bind(name)
    .bind(slug)
    .bind(domain)
    .bind(TenantStatus::PendingSetup.as_str())
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(pool)
    .await
    .map_err(|e| {
        if e.to_string().contains("UNIQUE constraint failed") {
            TenantdError::Conflict(format!("Tenant slug or domain already exists: {}", slug))
        } else {
            TenantdError::Database(format!("Failed to create tenant: {}", e))
        }
    })?;

    Ok(Tenant {
        id,
        name: name.to_string(),
        slug: slug.to_string(),
        domain: domain.map(str::to_string),
        status: TenantStatus::PendingSetup,
        parent_tenant_id: None,
        onboarding_completed_at: None,
        available_credits: "0.00".to_string(),
        billing_strategy: "subscription".to_string(),
        data_retention_policy: None,
        created_at: now,
        updated_at: now,
    })
}

/// IDでテナントを検索
pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> TenantdResult<Option<Tenant>> {
    let row = sqlx::query_as::<_, TenantRow>("SELECT * FROM tenants WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .map_err(|e| TenantdError::Database(format!("Failed to find tenant: {}", e)))?;

    row.map(TenantRow::try_into_tenant).transpose()
}

/// slugでテナントを検索
pub async fn find_by_slug(pool: &SqlitePool, slug: &str) -> TenantdResult<Option<Tenant>> {
    let row = sqlx::query_as::<_, TenantRow>("SELECT * FROM tenants WHERE slug = ?")
        .bind(slug)
        .fetch_optional(pool)
        .await
        .map_err(|e| TenantdError::Database(format!("Failed to find tenant by slug: {}", e)))?;

    row.map(TenantRow::try_into_tenant).transpose()
}

/// すべてのテナントを名前順で取得
pub async fn list(pool: &SqlitePool) -> TenantdResult<Vec<Tenant>> {
    let rows = sqlx::query_as::<_, TenantRow>("SELECT * FROM tenants ORDER BY name ASC")
        .fetch_all(pool)
        .await
        .map_err(|e| TenantdError::Database(format!("Failed to list tenants: {}", e)))?;

    rows.into_iter().map(TenantRow::try_into_tenant).collect()
}

/// テナントのステータスを更新
///
/// # Returns
/// * `Ok(())` - 更新成功
/// * `Err(TenantdError::TenantNotFound)` - テナントが存在しない
pub async fn update_status(
    pool: &SqlitePool,
    id: Uuid,
    status: TenantStatus,
) -> TenantdResult<()> {
    let result = sqlx::query("UPDATE tenants SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(|e| TenantdError::Database(format!("Failed to update tenant status: {}", e)))?;

    if result.rows_affected() == 0 {
        return Err(TenantdError::TenantNotFound(id));
    }

    Ok(())
}

/// 親テナントを設定（リセラー階層）
pub async fn set_parent(pool: &SqlitePool, id: Uuid, parent_id: Option<Uuid>) -> TenantdResult<()> {
    let result = sqlx::query("UPDATE tenants SET parent_tenant_id = ?, updated_at = ? WHERE id = ?")
        .bind(parent_id.map(|p| p.to_string()))
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(|e| TenantdError::Database(format!("Failed to set parent tenant: {}", e)))?;

    if result.rows_affected() == 0 {
        return Err(TenantdError::TenantNotFound(id));
    }

    Ok(())
}

/// オンボーディング完了を記録（status = active）
pub async fn complete_onboarding(pool: &SqlitePool, id: Uuid) -> TenantdResult<()> {
    let now = Utc::now().to_rfc3339();

    let result = sqlx::query(
        "UPDATE tenants SET onboarding_completed_at = ?, status = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&now)
    .bind(TenantStatus::Active.as_str())
    .bind(&now)
    .bind(id.to_string())
    .execute(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to complete onboarding: {}", e)))?;

    if result.rows_affected() == 0 {
        return Err(TenantdError::TenantNotFound(id));
    }

    Ok(())
}

/// 残クレジット（10進文字列）を更新
pub async fn update_credits(pool: &SqlitePool, id: Uuid, credits: &str) -> TenantdResult<()> {
    let result = sqlx::query("UPDATE tenants SET available_credits = ?, updated_at = ? WHERE id = ?")
        .bind(credits)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(|e| TenantdError::Database(format!("Failed to update credits: {}", e)))?;

    if result.rows_affected() == 0 {
        return Err(TenantdError::TenantNotFound(id));
    }

    Ok(())
}

/// データ保持ポリシー（JSON）を更新
pub async fn update_data_retention_policy(
    pool: &SqlitePool,
    id: Uuid,
    policy: Option<&serde_json::Value>,
) -> TenantdResult<()> {
    let policy_json = policy.map(|p| p.to_string());

    let result =
        sqlx::query("UPDATE tenants SET data_retention_policy = ?, updated_at = ? WHERE id = ?")
            .bind(policy_json)
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(pool)
            .await
            .map_err(|e| {
                TenantdError::Database(format!("Failed to update retention policy: {}", e))
            })?;

    if result.rows_affected() == 0 {
        return Err(TenantdError::TenantNotFound(id));
    }

    Ok(())
}

/// テナントを削除
///
/// 所属データ（設定、ロール、部門、招待、監査ログ等）は
/// 外部キーのCASCADEで一括削除される。
pub async fn delete(pool: &SqlitePool, id: Uuid) -> TenantdResult<()> {
    sqlx::query("DELETE FROM tenants WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(|e| TenantdError::Database(format!("Failed to delete tenant: {}", e)))?;

    Ok(())
}

/// テナント設定を保存（存在すれば更新、なければ作成）
pub async fn upsert_configuration(
    pool: &SqlitePool,
    tenant_id: Uuid,
    data_residency_region: &str,
    timezone: &str,
    locale: &str,
    branding: &serde_json::Value,
    settings: &serde_json::Value,
) -> TenantdResult<TenantConfiguration> {
    let now = Utc::now();

    let existing: Option<String> =
        sqlx::query_scalar("SELECT id FROM tenant_configurations WHERE tenant_id = ?")
            .bind(tenant_id.to_string())
            .fetch_optional(pool)
            .await
            .map_err(|e| TenantdError::Database(format!("Failed to find configuration: {}", e)))?;

    let id = match existing {
        Some(raw) => {
            let id = Uuid::parse_str(&raw)
                .map_err(|e| TenantdError::Database(format!("Invalid configuration id: {}", e)))?;
            sqlx::query(
                "UPDATE tenant_configurations
                 SET data_residency_region = ?, timezone = ?, locale = ?,
                     branding = ?, settings = ?, updated_at = ?
                 WHERE id = ?",
            )
            .bind(data_residency_region)
            .bind(timezone)
            .bind(locale)
            .bind(branding.to_string())
            .bind(settings.to_string())
            .bind(now.to_rfc3339())
            .bind(id.to_string())
            .execute(pool)
            .await
            .map_err(|e| TenantdError::Database(format!("Failed to update configuration: {}", e)))?;
            id
        }
        None => {
            let id = Uuid::new_v4();
            sqlx::query(
                "INSERT INTO tenant_configurations
                     (id, tenant_id, data_residency_region, timezone, locale,
                      branding, settings, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(id.to_string())
            .bind(tenant_id.to_string())
            .bind(data_residency_region)
            .bind(timezone)
            .bind(locale)
            .bind(branding.to_string())
            .bind(settings.to_string())
            .bind(now.to_rfc3339())
            .bind(now.to_rfc3339())
            .execute(pool)
            .await
            .map_err(|e| TenantdError::Database(format!("Failed to create configuration: {}", e)))?;
            id
        }
    };

    find_configuration(pool, tenant_id)
        .await?
        .ok_or_else(|| TenantdError::Internal(format!("Configuration vanished: {}", id)))
}

/// テナント設定を取得
pub async fn find_configuration(
    pool: &SqlitePool,
    tenant_id: Uuid,
) -> TenantdResult<Option<TenantConfiguration>> {
    let row = sqlx::query_as::<_, TenantConfigurationRow>(
        "SELECT * FROM tenant_configurations WHERE tenant_id = ?",
    )
    .bind(tenant_id.to_string())
    .fetch_optional(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to find configuration: {}", e)))?;

    row.map(TenantConfigurationRow::try_into_configuration)
        .transpose()
}

/// 監査ポリシーを保存（tenant_idが主キーのUPSERT）
pub async fn upsert_audit_policy(
    pool: &SqlitePool,
    policy: &TenantAuditPolicy,
) -> TenantdResult<()> {
    let sensitive_tables = serde_json::to_string(&policy.sensitive_tables)
        .map_err(|e| TenantdError::Database(format!("Failed to serialize tables: {}", e)))?;

    sqlx::query(
        "INSERT INTO tenant_audit_policies
             (tenant_id, log_retention_days, require_log_signatures, sensitive_tables)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(tenant_id) DO UPDATE SET
             log_retention_days = excluded.log_retention_days,
             require_log_signatures = excluded.require_log_signatures,
             sensitive_tables = excluded.sensitive_tables",
    )
    .bind(policy.tenant_id.to_string())
    .bind(policy.log_retention_days)
    .bind(policy.require_log_signatures as i32)
    .bind(sensitive_tables)
    .execute(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to upsert audit policy: {}", e)))?;

    Ok(())
}

/// 監査ポリシーを取得
pub async fn find_audit_policy(
    pool: &SqlitePool,
    tenant_id: Uuid,
) -> TenantdResult<Option<TenantAuditPolicy>> {
    let row = sqlx::query_as::<_, TenantAuditPolicyRow>(
        "SELECT tenant_id, log_retention_days, require_log_signatures, sensitive_tables
         FROM tenant_audit_policies WHERE tenant_id = ?",
    )
    .bind(tenant_id.to_string())
    .fetch_optional(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to find audit policy: {}", e)))?;

    row.map(TenantAuditPolicyRow::try_into_policy).transpose()
}

// SQLiteからの行取得用の内部型
#[derive(sqlx::FromRow)]
struct TenantRow {
    id: String,
    name: String,
    slug: String,
    domain: Option<String>,
    status: String,
    parent_tenant_id: Option<String>,
    onboarding_completed_at: Option<String>,
    available_credits: String,
    billing_strategy: String,
    data_retention_policy: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TenantRow {
    fn try_into_tenant(self) -> TenantdResult<Tenant> {
        let id = parse_uuid(&self.id, "tenant id")?;
        let parent_tenant_id = self
            .parent_tenant_id
            .as_deref()
            .map(|s| parse_uuid(s, "parent tenant id"))
            .transpose()?;
        let status: TenantStatus = self.status.parse()?;
        let data_retention_policy = self
            .data_retention_policy
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| TenantdError::Database(format!("Invalid retention policy JSON: {}", e)))?;

        Ok(Tenant {
            id,
            name: self.name,
            slug: self.slug,
            domain: self.domain,
            status,
            parent_tenant_id,
            onboarding_completed_at: parse_optional_timestamp(
                self.onboarding_completed_at.as_deref(),
                "onboarding_completed_at",
            )?,
            available_credits: self.available_credits,
            billing_strategy: self.billing_strategy,
            data_retention_policy,
            created_at: parse_timestamp(&self.created_at, "created_at")?,
            updated_at: parse_timestamp(&self.updated_at, "updated_at")?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TenantConfigurationRow {
    id: String,
    tenant_id: String,
    data_residency_region: String,
    timezone: String,
    locale: String,
    branding: String,
    settings: String,
    created_at: String,
    updated_at: String,
}

impl TenantConfigurationRow {
    fn try_into_configuration(self) -> TenantdResult<TenantConfiguration> {
        Ok(TenantConfiguration {
            id: parse_uuid(&self.id, "configuration id")?,
            tenant_id: parse_uuid(&self.tenant_id, "tenant id")?,
            data_residency_region: self.data_residency_region,
            timezone: self.timezone,
            locale: self.locale,
            branding: serde_json::from_str(&self.branding)
                .map_err(|e| TenantdError::Database(format!("Invalid branding JSON: {}", e)))?,
            settings: serde_json::from_str(&self.settings)
                .map_err(|e| TenantdError::Database(format!("Invalid settings JSON: {}", e)))?,
            created_at: parse_timestamp(&self.created_at, "created_at")?,
            updated_at: parse_timestamp(&self.updated_at, "updated_at")?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TenantAuditPolicyRow {
    tenant_id: String,
    log_retention_days: i64,
    require_log_signatures: i64,
    sensitive_tables: String,
}

impl TenantAuditPolicyRow {
    fn try_into_policy(self) -> TenantdResult<TenantAuditPolicy> {
        Ok(TenantAuditPolicy {
            tenant_id: parse_uuid(&self.tenant_id, "tenant id")?,
            log_retention_days: self.log_retention_days,
            require_log_signatures: self.require_log_signatures != 0,
            sensitive_tables: serde_json::from_str(&self.sensitive_tables).map_err(|e| {
                TenantdError::Database(format!("Invalid sensitive_tables JSON: {}", e))
            })?,
        })
    }
}

pub(crate) fn parse_uuid(raw: &str, field: &str) -> TenantdResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| TenantdError::Database(format!("Invalid {}: {}", field, e)))
}

pub(crate) fn parse_timestamp(raw: &str, field: &str) -> TenantdResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TenantdError::Database(format!("Invalid {}: {}", field, e)))
}

pub(crate) fn parse_optional_timestamp(
    raw: Option<&str>,
    field: &str,
) -> TenantdResult<Option<DateTime<Utc>>> {
    raw.map(|s| parse_timestamp(s, field)).transpose()
}
