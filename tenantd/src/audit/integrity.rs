//! 監査ログの改竄検知
//!
//! 各レコードの保存時にSHA-256チェックサムを計算し、
//! 後からレコード内容と照合することで改竄を検知する。

use sha2::{Digest, Sha256};
use tenantd_common::error::{TenantdError, TenantdResult};

use super::types::{AuditEvent, AuditLogRecord};

/// チェックサム対象の正規化文字列を構築
///
/// フィールドの順序と区切りは固定。Noneは空文字列として扱う。
/// JSONフィールドはserde_jsonのコンパクト表現をそのまま使う。
#[allow(clippy::too_many_arguments)]
fn canonical_string(
    tenant_id: &str,
    actor_id: &str,
    actor_type: &str,
    action: &str,
    target_table: &str,
    target_id: &str,
    details: &str,
    data_before: &str,
    data_after: &str,
    created_at: &str,
) -> String {
    [
        tenant_id,
        actor_id,
        actor_type,
        action,
        target_table,
        target_id,
        details,
        data_before,
        data_after,
        created_at,
    ]
    .join("|")
}

fn json_field(value: &Option<serde_json::Value>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

/// イベントのチェックサムを計算（保存時に使用）
pub fn compute_event_checksum(event: &AuditEvent) -> Vec<u8> {
    let canonical = canonical_string(
        &event.tenant_id.to_string(),
        &event
            .actor_id
            .map(|a| a.to_string())
            .unwrap_or_default(),
        event.actor_type.as_str(),
        &event.action,
        event.target_table.as_deref().unwrap_or(""),
        event.target_id.as_deref().unwrap_or(""),
        &json_field(&event.details),
        &json_field(&event.data_before),
        &json_field(&event.data_after),
        &event.occurred_at.to_rfc3339(),
    );

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hasher.finalize().to_vec()
}

/// 保存済みレコードのチェックサムを再計算
pub fn compute_record_checksum(record: &AuditLogRecord) -> Vec<u8> {
    let canonical = canonical_string(
        &record.tenant_id.to_string(),
        &record
            .actor_id
            .map(|a| a.to_string())
            .unwrap_or_default(),
        record.actor_type.as_str(),
        &record.action,
        record.target_table.as_deref().unwrap_or(""),
        record.target_id.as_deref().unwrap_or(""),
        &json_field(&record.details),
        &json_field(&record.data_before),
        &json_field(&record.data_after),
        &record.created_at.to_rfc3339(),
    );

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hasher.finalize().to_vec()
}

/// レコードが改竄されていないか検証
pub fn verify_record(record: &AuditLogRecord) -> bool {
    compute_record_checksum(record) == record.checksum
}

/// 検証結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    /// 検証したレコード数
    pub checked: usize,
    /// チェックサム不一致のレコードID
    pub corrupted_ids: Vec<i64>,
}

impl VerificationReport {
    /// すべてのレコードが検証に合格したかどうか
    pub fn is_intact(&self) -> bool {
        self.corrupted_ids.is_empty()
    }
}

/// レコード列を一括検証し、不一致があればエラーを返す
pub fn ensure_intact(records: &[AuditLogRecord]) -> TenantdResult<()> {
    let report = verify_records(records);
    if report.is_intact() {
        Ok(())
    } else {
        Err(TenantdError::Integrity(format!(
            "Checksum mismatch for audit logs: {:?}",
            report.corrupted_ids
        )))
    }
}

/// レコード列を一括検証
pub fn verify_records(records: &[AuditLogRecord]) -> VerificationReport {
    let corrupted_ids = records
        .iter()
        .filter(|r| !verify_record(r))
        .map(|r| r.id)
        .collect();

    VerificationReport {
        checked: records.len(),
        corrupted_ids,
    }
}
