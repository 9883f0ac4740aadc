//! 監査ログ署名の永続化
//!
//! 1ログにつき署名は1件（audit_log_idが主キー）。
//! 再署名はConflictとして拒否する。署名者はRESTRICTで削除不可。

use chrono::Utc;
use sqlx::SqlitePool;
use tenantd_common::error::{TenantdError, TenantdResult};
use uuid::Uuid;

use crate::audit::types::AuditLogSignature;

use super::tenants::{parse_timestamp, parse_uuid};

/// ログに署名を保存
///
/// # Returns
/// * `Ok(AuditLogSignature)` - 保存された署名
/// * `Err(TenantdError::Conflict)` - 既に署名済み
/// * `Err(TenantdError::NotFound)` - 対象ログが存在しない
pub async fn insert(
    pool: &SqlitePool,
    audit_log_id: i64,
    signature: &[u8],
    signer_user_id: Uuid,
) -> TenantdResult<AuditLogSignature> {
    let signed_at = Utc::now();

    sqlx::query(
        "INSERT INTO audit_log_signatures (audit_log_id, signature, signed_at, signer_user_id)
         VALUES (?, ?, ?, ?)",
    )
    .bind(audit_log_id)
    .bind(signature)
    .bind(signed_at.to_rfc3339())
    .bind(signer_user_id.to_string())
    .execute(pool)
    .await
    .map_err(|e| {
        let message = e.to_string();
        if message.contains("UNIQUE constraint failed") {
            TenantdError::Conflict(format!("Audit log already signed: {}", audit_log_id))
        } else if message.contains("FOREIGN KEY constraint failed") {
            TenantdError::NotFound(format!("Audit log not found: {}", audit_log_id))
        } else {
            TenantdError::Database(format!("Failed to insert signature: {}", e))
        }
    })?;

    Ok(AuditLogSignature {
        audit_log_id,
        signature: signature.to_vec(),
        signed_at,
        signer_user_id,
    })
}

/// ログの署名を取得
pub async fn find_by_log_id(
    pool: &SqlitePool,
    audit_log_id: i64,
) -> TenantdResult<Option<AuditLogSignature>> {
    let row = sqlx::query_as::<_, SignatureRow>(
        "SELECT audit_log_id, signature, signed_at, signer_user_id
         FROM audit_log_signatures WHERE audit_log_id = ?",
    )
    .bind(audit_log_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to find signature: {}", e)))?;

    row.map(SignatureRow::try_into_signature).transpose()
}

/// テナントのログのうち未署名のログIDを昇順で取得
pub async fn unsigned_log_ids(
    pool: &SqlitePool,
    tenant_id: Uuid,
    limit: u32,
) -> TenantdResult<Vec<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT l.id FROM audit_logs l
         LEFT JOIN audit_log_signatures s ON s.audit_log_id = l.id
         WHERE l.tenant_id = ? AND s.audit_log_id IS NULL
         ORDER BY l.id ASC
         LIMIT ?",
    )
    .bind(tenant_id.to_string())
    .bind(limit as i64)
    .fetch_all(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to list unsigned logs: {}", e)))?;

    Ok(ids)
}

#[derive(sqlx::FromRow)]
struct SignatureRow {
    audit_log_id: i64,
    signature: Vec<u8>,
    signed_at: String,
    signer_user_id: String,
}

impl SignatureRow {
    fn try_into_signature(self) -> TenantdResult<AuditLogSignature> {
        Ok(AuditLogSignature {
            audit_log_id: self.audit_log_id,
            signature: self.signature,
            signed_at: parse_timestamp(&self.signed_at, "signed_at")?,
            signer_user_id: parse_uuid(&self.signer_user_id, "signer id")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::signer::LogSigner;
    use crate::audit::types::AuditEvent;
    use crate::db::audit_logs::AuditLogStorage;
    use crate::db::{tenants, users};

    async fn setup_test_db() -> (SqlitePool, AuditLogStorage, Uuid, Uuid) {
        let pool = crate::db::test_utils::test_db_pool().await;
        let tenant = tenants::create(&pool, "Acme", "acme", None).await.unwrap();
        let signer = users::create(&pool, "auditor@example.com", "h", "Ava", "Auditor")
            .await
            .unwrap();
        let storage = AuditLogStorage::new(pool.clone());
        (pool, storage, tenant.id, signer.id)
    }

    #[tokio::test]
    async fn test_sign_and_fetch() {
        let (pool, storage, tenant_id, signer_id) = setup_test_db().await;

        let log_id = storage
            .insert(&AuditEvent::system(tenant_id, "tenant.update"))
            .await
            .unwrap();
        let record = storage.get_by_id(log_id).await.unwrap().unwrap();

        let signer = LogSigner::new(b"test-key").unwrap();
        let signature = signer.sign(&record.checksum).unwrap();

        insert(&pool, log_id, &signature, signer_id).await.unwrap();

        let stored = find_by_log_id(&pool, log_id).await.unwrap().unwrap();
        assert_eq!(stored.signature, signature);
        assert_eq!(stored.signer_user_id, signer_id);
        assert!(signer.verify(&record.checksum, &stored.signature).unwrap());
    }

    #[tokio::test]
    async fn test_resign_is_conflict() {
        let (pool, storage, tenant_id, signer_id) = setup_test_db().await;

        let log_id = storage
            .insert(&AuditEvent::system(tenant_id, "tenant.update"))
            .await
            .unwrap();

        insert(&pool, log_id, &[1_u8; 32], signer_id).await.unwrap();
        let again = insert(&pool, log_id, &[2_u8; 32], signer_id).await;
        assert!(matches!(again, Err(TenantdError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_sign_missing_log() {
        let (pool, _storage, _tenant_id, signer_id) = setup_test_db().await;

        let result = insert(&pool, 9999, &[1_u8; 32], signer_id).await;
        assert!(matches!(result, Err(TenantdError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_signer_cannot_be_deleted() {
        let (pool, storage, tenant_id, signer_id) = setup_test_db().await;

        let log_id = storage
            .insert(&AuditEvent::system(tenant_id, "tenant.update"))
            .await
            .unwrap();
        insert(&pool, log_id, &[1_u8; 32], signer_id).await.unwrap();

        // 署名が残っている間、署名者は削除できない（RESTRICT）
        let result = users::delete(&pool, signer_id).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unsigned_log_ids() {
        let (pool, storage, tenant_id, signer_id) = setup_test_db().await;

        let first = storage
            .insert(&AuditEvent::system(tenant_id, "a"))
            .await
            .unwrap();
        let second = storage
            .insert(&AuditEvent::system(tenant_id, "b"))
            .await
            .unwrap();

        insert(&pool, first, &[1_u8; 32], signer_id).await.unwrap();

        let unsigned = unsigned_log_ids(&pool, tenant_id, 10).await.unwrap();
        assert_eq!(unsigned, vec![second]);
    }

    #[tokio::test]
    async fn test_signature_purged_with_log() {
        let (pool, storage, tenant_id, signer_id) = setup_test_db().await;

        let mut event = AuditEvent::system(tenant_id, "old.action");
        event.occurred_at = chrono::Utc::now() - chrono::Duration::days(400);
        let log_id = storage.insert(&event).await.unwrap();
        insert(&pool, log_id, &[1_u8; 32], signer_id).await.unwrap();

        storage.purge_expired(tenant_id, 365).await.unwrap();

        assert!(find_by_log_id(&pool, log_id).await.unwrap().is_none());
    }
}
