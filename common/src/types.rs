//! 共有ドメイン型
//!
//! テナント・招待・監査で使う列挙型。
//! DBには小文字スネークケースの文字列として保存される。

use crate::error::{CommonError, TenantdError};
use serde::{Deserialize, Serialize};

/// テナントのステータス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    /// 稼働中
    Active,
    /// 一時停止
    Suspended,
    /// 削除済み（論理削除）
    Deleted,
    /// セットアップ待ち
    PendingSetup,
    /// トライアル
    Trial,
}

impl TenantStatus {
    /// TenantStatusを文字列に変換
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Deleted => "deleted",
            Self::PendingSetup => "pending_setup",
            Self::Trial => "trial",
        }
    }
}

impl std::fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TenantStatus {
    type Err = TenantdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "deleted" => Ok(Self::Deleted),
            "pending_setup" => Ok(Self::PendingSetup),
            "trial" => Ok(Self::Trial),
            _ => Err(CommonError::Validation(format!("Invalid tenant status: {}", s)).into()),
        }
    }
}

/// 招待のステータス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    /// 承諾待ち
    Pending,
    /// 承諾済み
    Accepted,
    /// 期限切れ
    Expired,
    /// 無効化済み
    Revoked,
}

impl InvitationStatus {
    /// InvitationStatusを文字列に変換
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }
}

impl std::fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for InvitationStatus {
    type Err = TenantdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "expired" => Ok(Self::Expired),
            "revoked" => Ok(Self::Revoked),
            _ => Err(CommonError::Validation(format!("Invalid invitation status: {}", s)).into()),
        }
    }
}

/// 監査ログのアクター種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    /// ユーザー操作
    User,
    /// システムプロセス
    System,
    /// APIキー経由
    ApiKey,
}

impl ActorType {
    /// 文字列からActorTypeに変換（不明値はUser扱い）
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Self {
        match s {
            "system" => Self::System,
            "api_key" => Self::ApiKey,
            _ => Self::User,
        }
    }

    /// ActorTypeを文字列に変換
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::System => "system",
            Self::ApiKey => "api_key",
        }
    }
}

impl std::fmt::Display for ActorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// メタデータ変更の操作種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOperation {
    /// 行の挿入
    Insert,
    /// 行の更新
    Update,
    /// 行の削除
    Delete,
}

impl ChangeOperation {
    /// ChangeOperationを文字列に変換
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ChangeOperation {
    type Err = TenantdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(Self::Insert),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            _ => Err(CommonError::Validation(format!("Invalid operation: {}", s)).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_status_roundtrip() {
        for status in [
            TenantStatus::Active,
            TenantStatus::Suspended,
            TenantStatus::Deleted,
            TenantStatus::PendingSetup,
            TenantStatus::Trial,
        ] {
            let parsed: TenantStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_tenant_status_invalid() {
        let result: Result<TenantStatus, _> = "bogus".parse();
        assert!(result.is_err());
    }

    #[test]
    fn test_tenant_status_serialization() {
        assert_eq!(
            serde_json::to_string(&TenantStatus::PendingSetup).unwrap(),
            "\"pending_setup\""
        );
    }

    #[test]
    fn test_invitation_status_roundtrip() {
        for status in [
            InvitationStatus::Pending,
            InvitationStatus::Accepted,
            InvitationStatus::Expired,
            InvitationStatus::Revoked,
        ] {
            let parsed: InvitationStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_actor_type_serialization() {
        assert_eq!(serde_json::to_string(&ActorType::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&ActorType::System).unwrap(),
            "\"system\""
        );
        assert_eq!(
            serde_json::to_string(&ActorType::ApiKey).unwrap(),
            "\"api_key\""
        );
    }

    #[test]
    fn test_actor_type_from_str_defaults_to_user() {
        assert_eq!(ActorType::from_str("user"), ActorType::User);
        assert_eq!(ActorType::from_str("system"), ActorType::System);
        assert_eq!(ActorType::from_str("api_key"), ActorType::ApiKey);
        assert_eq!(ActorType::from_str("unknown"), ActorType::User);
    }

    #[test]
    fn test_change_operation_serialization() {
        assert_eq!(
            serde_json::to_string(&ChangeOperation::Insert).unwrap(),
            "\"INSERT\""
        );
        let parsed: ChangeOperation = "DELETE".parse().unwrap();
        assert_eq!(parsed, ChangeOperation::Delete);
    }
}
