//! 監査ログの型定義

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tenantd_common::types::ActorType;
use uuid::Uuid;

/// 記録対象の監査イベント（永続化前）
///
/// checksumは保存時に計算されるため、このイベントには含まれない。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// テナントID
    pub tenant_id: Uuid,
    /// 操作者のユーザーID（システム起点の場合はNone）
    pub actor_id: Option<Uuid>,
    /// 操作者の種別
    pub actor_type: ActorType,
    /// アクション名（例: "tenant.update", "user.invite"）
    pub action: String,
    /// 対象テーブル名
    pub target_table: Option<String>,
    /// 対象レコードID
    pub target_id: Option<String>,
    /// 任意の詳細情報（JSON）
    pub details: Option<serde_json::Value>,
    /// 変更前の状態（JSON）
    pub data_before: Option<serde_json::Value>,
    /// 変更後の状態（JSON）
    pub data_after: Option<serde_json::Value>,
    /// 変更されたフィールド名の一覧
    pub changed_fields: Option<Vec<String>>,
    /// リクエストコンテキスト（JSON）
    pub context: Option<serde_json::Value>,
    /// 操作元IPアドレス
    pub ip_address: Option<String>,
    /// 分散トレースID
    pub trace_id: Option<String>,
    /// 操作理由（コンプライアンス用の自由記述）
    pub reason: Option<String>,
    /// User-Agentヘッダ
    pub user_agent: Option<String>,
    /// リクエストID
    pub request_id: Option<String>,
    /// 発生日時
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    /// 最小限のフィールドでイベントを作成
    pub fn new(tenant_id: Uuid, actor_id: Option<Uuid>, action: impl Into<String>) -> Self {
        Self {
            tenant_id,
            actor_id,
            actor_type: ActorType::User,
            action: action.into(),
            target_table: None,
            target_id: None,
            details: None,
            data_before: None,
            data_after: None,
            changed_fields: None,
            context: None,
            ip_address: None,
            trace_id: None,
            reason: None,
            user_agent: None,
            request_id: None,
            occurred_at: Utc::now(),
        }
    }

    /// システム起点のイベントを作成
    pub fn system(tenant_id: Uuid, action: impl Into<String>) -> Self {
        Self {
            actor_type: ActorType::System,
            ..Self::new(tenant_id, None, action)
        }
    }

    /// 対象レコードを設定
    pub fn with_target(mut self, table: impl Into<String>, id: impl Into<String>) -> Self {
        self.target_table = Some(table.into());
        self.target_id = Some(id.into());
        self
    }

    /// 変更前後の状態を設定
    pub fn with_change(
        mut self,
        before: Option<serde_json::Value>,
        after: Option<serde_json::Value>,
        changed_fields: Vec<String>,
    ) -> Self {
        self.data_before = before;
        self.data_after = after;
        self.changed_fields = Some(changed_fields);
        self
    }

    /// 詳細情報を設定
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// 操作理由を設定
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// 保存済みの監査ログレコード
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogRecord {
    /// ログID（挿入順の連番）
    pub id: i64,
    /// テナントID
    pub tenant_id: Uuid,
    /// 操作者のユーザーID
    pub actor_id: Option<Uuid>,
    /// 操作者の種別
    pub actor_type: ActorType,
    /// アクション名
    pub action: String,
    /// 対象テーブル名
    pub target_table: Option<String>,
    /// 対象レコードID
    pub target_id: Option<String>,
    /// 任意の詳細情報（JSON）
    pub details: Option<serde_json::Value>,
    /// 変更前の状態（JSON）
    pub data_before: Option<serde_json::Value>,
    /// 変更後の状態（JSON）
    pub data_after: Option<serde_json::Value>,
    /// 変更されたフィールド名の一覧
    pub changed_fields: Option<Vec<String>>,
    /// リクエストコンテキスト（JSON）
    pub context: Option<serde_json::Value>,
    /// 操作元IPアドレス
    pub ip_address: Option<String>,
    /// 分散トレースID
    pub trace_id: Option<String>,
    /// 操作理由
    pub reason: Option<String>,
    /// User-Agentヘッダ
    pub user_agent: Option<String>,
    /// リクエストID
    pub request_id: Option<String>,
    /// 保存時に計算されたSHA-256チェックサム
    pub checksum: Vec<u8>,
    /// 記録日時
    pub created_at: DateTime<Utc>,
}

/// 監査ログのクエリフィルタ
///
/// tenant_idは必須。テナント境界を越える検索は提供しない。
#[derive(Debug, Clone)]
pub struct AuditLogFilter {
    /// テナントID（必須）
    pub tenant_id: Uuid,
    /// アクション名（完全一致）
    pub action: Option<String>,
    /// 操作者のユーザーID
    pub actor_id: Option<Uuid>,
    /// 操作者の種別
    pub actor_type: Option<ActorType>,
    /// 対象テーブル名
    pub target_table: Option<String>,
    /// 対象レコードID
    pub target_id: Option<String>,
    /// 分散トレースID
    pub trace_id: Option<String>,
    /// リクエストID
    pub request_id: Option<String>,
    /// この日時以降（含む）
    pub from: Option<DateTime<Utc>>,
    /// この日時以前（含む）
    pub to: Option<DateTime<Utc>>,
    /// ページ番号（1始まり）
    pub page: u32,
    /// 1ページあたりの件数
    pub per_page: u32,
}

impl AuditLogFilter {
    /// テナントの全ログを対象とするフィルタ
    pub fn for_tenant(tenant_id: Uuid) -> Self {
        Self {
            tenant_id,
            action: None,
            actor_id: None,
            actor_type: None,
            target_table: None,
            target_id: None,
            trace_id: None,
            request_id: None,
            from: None,
            to: None,
            page: 1,
            per_page: 50,
        }
    }
}

/// 署名レコード
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogSignature {
    /// 対象ログID（1ログにつき1署名）
    pub audit_log_id: i64,
    /// HMAC-SHA256署名
    pub signature: Vec<u8>,
    /// 署名日時
    pub signed_at: DateTime<Utc>,
    /// 署名者のユーザーID
    pub signer_user_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_builders() {
        let tenant_id = Uuid::new_v4();
        let actor = Uuid::new_v4();

        let event = AuditEvent::new(tenant_id, Some(actor), "user.invite")
            .with_target("invitations", "abc")
            .with_details(serde_json::json!({"email": "bob@example.com"}))
            .with_reason("Quarterly onboarding");

        assert_eq!(event.actor_type, ActorType::User);
        assert_eq!(event.action, "user.invite");
        assert_eq!(event.target_table.as_deref(), Some("invitations"));
        assert!(event.reason.is_some());

        let system = AuditEvent::system(tenant_id, "retention.purge");
        assert_eq!(system.actor_type, ActorType::System);
        assert!(system.actor_id.is_none());
    }

    #[test]
    fn test_filter_defaults() {
        let filter = AuditLogFilter::for_tenant(Uuid::new_v4());
        assert_eq!(filter.page, 1);
        assert_eq!(filter.per_page, 50);
        assert!(filter.action.is_none());
    }
}
