//! 招待CRUD操作
//!
//! トークンはSHA-256ハッシュで保存し、平文は発行時に一度だけ返す。
//! 受理（accept）は単一使用で、pendingかつ未失効の場合のみ成功する。

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tenantd_common::error::{TenantdError, TenantdResult};
use tenantd_common::types::InvitationStatus;
use uuid::Uuid;

use super::tenants::{parse_timestamp, parse_uuid};

/// トークン生成に使用する文字セット（紛らわしい文字を除外）
const TOKEN_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghjkmnpqrstuvwxyz23456789";

/// トークン長
const TOKEN_LENGTH: usize = 48;

/// 招待の既定有効時間
pub const DEFAULT_VALID_HOURS: i64 = 72;

/// 招待
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitation {
    /// 招待ID
    pub id: Uuid,
    /// テナントID
    pub tenant_id: Uuid,
    /// 参加先部門ID
    pub department_id: Uuid,
    /// 招待したユーザーID
    pub invited_by_user_id: Uuid,
    /// 受理時に付与されるロールID
    pub role_id: Uuid,
    /// 招待先メールアドレス
    pub invitee_email: String,
    /// ステータス
    pub status: InvitationStatus,
    /// 失効日時
    pub expires_at: DateTime<Utc>,
    /// 作成日時
    pub created_at: DateTime<Utc>,
    /// 更新日時
    pub updated_at: DateTime<Utc>,
}

impl Invitation {
    /// 失効日時を過ぎているかどうか
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// 招待トークンを生成
fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LENGTH)
        .map(|_| {
            let idx = rng.gen_range(0..TOKEN_CHARSET.len());
            TOKEN_CHARSET[idx] as char
        })
        .collect()
}

/// トークンをSHA-256でハッシュ化（16進文字列）
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// 招待を作成
///
/// # Arguments
/// * `pool` - データベース接続プール
/// * `tenant_id` - テナントID
/// * `department_id` - 参加先部門ID
/// * `invited_by_user_id` - 招待したユーザーID
/// * `role_id` - 受理時に付与するロールID
/// * `invitee_email` - 招待先メールアドレス
/// * `valid_hours` - 有効時間（通常はDEFAULT_VALID_HOURS）
///
/// # Returns
/// * `Ok((Invitation, String))` - 作成された招待と平文トークン。
///   平文トークンはここでしか取得できない。
pub async fn create(
    pool: &SqlitePool,
    tenant_id: Uuid,
    department_id: Uuid,
    invited_by_user_id: Uuid,
    role_id: Uuid,
    invitee_email: &str,
    valid_hours: i64,
) -> TenantdResult<(Invitation, String)> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    let expires_at = now + Duration::hours(valid_hours);
    let token = generate_token();
    let token_hash = hash_token(&token);

    sqlx::query(
        "INSERT INTO invitations
             (id, tenant_id, department_id, invited_by_user_id, role_id,
              invitee_email, token_hash, status, expires_at, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(tenant_id.to_string())
    .bind(department_id.to_string())
    .bind(invited_by_user_id.to_string())
    .bind(role_id.to_string())
    .bind(invitee_email)
    .bind(&token_hash)
    .bind(InvitationStatus::Pending.as_str())
    .bind(expires_at.to_rfc3339())
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to create invitation: {}", e)))?;

    let invitation = Invitation {
        id,
        tenant_id,
        department_id,
        invited_by_user_id,
        role_id,
        invitee_email: invitee_email.to_string(),
        status: InvitationStatus::Pending,
        expires_at,
        created_at: now,
        updated_at: now,
    };

    Ok((invitation, token))
}

/// IDで招待を検索
pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> TenantdResult<Option<Invitation>> {
    let row = sqlx::query_as::<_, InvitationRow>("SELECT * FROM invitations WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .map_err(|e| TenantdError::Database(format!("Failed to find invitation: {}", e)))?;

    row.map(InvitationRow::try_into_invitation).transpose()
}

/// 平文トークンで招待を検索
pub async fn find_by_token(pool: &SqlitePool, token: &str) -> TenantdResult<Option<Invitation>> {
    let token_hash = hash_token(token);

    let row = sqlx::query_as::<_, InvitationRow>("SELECT * FROM invitations WHERE token_hash = ?")
        .bind(&token_hash)
        .fetch_optional(pool)
        .await
        .map_err(|e| TenantdError::Database(format!("Failed to find invitation: {}", e)))?;

    row.map(InvitationRow::try_into_invitation).transpose()
}

/// テナントの招待一覧を作成日時の降順で取得
pub async fn list_by_tenant(pool: &SqlitePool, tenant_id: Uuid) -> TenantdResult<Vec<Invitation>> {
    let rows = sqlx::query_as::<_, InvitationRow>(
        "SELECT * FROM invitations WHERE tenant_id = ? ORDER BY created_at DESC",
    )
    .bind(tenant_id.to_string())
    .fetch_all(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to list invitations: {}", e)))?;

    rows.into_iter()
        .map(InvitationRow::try_into_invitation)
        .collect()
}

/// トークンが受理可能か検証する（状態は変更しない）
///
/// # Returns
/// * `Ok(Invitation)` - pendingかつ未失効の招待
/// * `Err(TenantdError::NotFound)` - トークンが存在しない
/// * `Err(TenantdError::Conflict)` - 失効済み、または受理可能でない
pub async fn validate(pool: &SqlitePool, token: &str) -> TenantdResult<Invitation> {
    let invitation = find_by_token(pool, token)
        .await?
        .ok_or_else(|| TenantdError::NotFound("Invitation not found".to_string()))?;

    if invitation.status != InvitationStatus::Pending {
        return Err(TenantdError::Conflict(format!(
            "Invitation is not pending: {}",
            invitation.status
        )));
    }
    if invitation.is_expired() {
        return Err(TenantdError::Conflict("Invitation has expired".to_string()));
    }

    Ok(invitation)
}

/// 招待を受理する（単一使用）
///
/// pendingかつ未失効の場合のみ成功し、ステータスをacceptedに遷移させる。
/// 失効日時を過ぎていた場合はexpiredに遷移させてエラーを返す。
///
/// # Returns
/// * `Ok(Invitation)` - 受理された招待
/// * `Err(TenantdError::NotFound)` - トークンが存在しない
/// * `Err(TenantdError::Conflict)` - 既に使用済み・失効・取り消し済み
pub async fn accept(pool: &SqlitePool, token: &str) -> TenantdResult<Invitation> {
    let invitation = find_by_token(pool, token)
        .await?
        .ok_or_else(|| TenantdError::NotFound("Invitation not found".to_string()))?;

    if invitation.status != InvitationStatus::Pending {
        return Err(TenantdError::Conflict(format!(
            "Invitation is not pending: {}",
            invitation.status
        )));
    }

    if invitation.is_expired() {
        set_status(pool, invitation.id, InvitationStatus::Expired).await?;
        return Err(TenantdError::Conflict("Invitation has expired".to_string()));
    }

    // ステータス条件付きUPDATEで二重受理を防ぐ
    let result = sqlx::query(
        "UPDATE invitations SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(InvitationStatus::Accepted.as_str())
    .bind(Utc::now().to_rfc3339())
    .bind(invitation.id.to_string())
    .bind(InvitationStatus::Pending.as_str())
    .execute(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to accept invitation: {}", e)))?;

    if result.rows_affected() == 0 {
        return Err(TenantdError::Conflict(
            "Invitation was already used".to_string(),
        ));
    }

    Ok(Invitation {
        status: InvitationStatus::Accepted,
        ..invitation
    })
}

/// 招待を取り消す（pendingのみ）
pub async fn revoke(pool: &SqlitePool, id: Uuid) -> TenantdResult<()> {
    let result = sqlx::query(
        "UPDATE invitations SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(InvitationStatus::Revoked.as_str())
    .bind(Utc::now().to_rfc3339())
    .bind(id.to_string())
    .bind(InvitationStatus::Pending.as_str())
    .execute(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to revoke invitation: {}", e)))?;

    if result.rows_affected() == 0 {
        return Err(TenantdError::Conflict(
            "Invitation is not pending".to_string(),
        ));
    }

    Ok(())
}

/// 失効日時を過ぎたpending招待を一括でexpiredに遷移させる
///
/// # Returns
/// * `Ok(u64)` - 遷移させた件数
pub async fn mark_expired(pool: &SqlitePool) -> TenantdResult<u64> {
    let result = sqlx::query(
        "UPDATE invitations SET status = ?, updated_at = ? WHERE status = ? AND expires_at < ?",
    )
    .bind(InvitationStatus::Expired.as_str())
    .bind(Utc::now().to_rfc3339())
    .bind(InvitationStatus::Pending.as_str())
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to expire invitations: {}", e)))?;

    Ok(result.rows_affected())
}

async fn set_status(pool: &SqlitePool, id: Uuid, status: InvitationStatus) -> TenantdResult<()> {
    sqlx::query("UPDATE invitations SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(|e| TenantdError::Database(format!("Failed to update invitation: {}", e)))?;

    Ok(())
}

#[derive(sqlx::FromRow)]
struct InvitationRow {
    id: String,
    tenant_id: String,
    department_id: String,
    invited_by_user_id: String,
    role_id: String,
    invitee_email: String,
    #[allow(dead_code)]
    token_hash: String,
    status: String,
    expires_at: String,
    created_at: String,
    updated_at: String,
}

impl InvitationRow {
    fn try_into_invitation(self) -> TenantdResult<Invitation> {
        let status: InvitationStatus = self.status.parse()?;

        Ok(Invitation {
            id: parse_uuid(&self.id, "invitation id")?,
            tenant_id: parse_uuid(&self.tenant_id, "tenant id")?,
            department_id: parse_uuid(&self.department_id, "department id")?,
            invited_by_user_id: parse_uuid(&self.invited_by_user_id, "inviter id")?,
            role_id: parse_uuid(&self.role_id, "role id")?,
            invitee_email: self.invitee_email,
            status,
            expires_at: parse_timestamp(&self.expires_at, "expires_at")?,
            created_at: parse_timestamp(&self.created_at, "created_at")?,
            updated_at: parse_timestamp(&self.updated_at, "updated_at")?,
        })
    }
}
