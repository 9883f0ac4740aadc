//! ロール・権限管理
//!
//! tenant_idがNULLのロールはシステムロール（全テナント共通）。
//! ロールは割り当て（user_tenant_roles / user_department_roles）が
//! 残っている限り削除できない（RESTRICT）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tenantd_common::error::{TenantdError, TenantdResult};
use uuid::Uuid;

use super::tenants::{parse_timestamp, parse_uuid};

/// ロール
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    /// ロールID
    pub id: Uuid,
    /// 所属テナントID（NULLはシステムロール）
    pub tenant_id: Option<Uuid>,
    /// ロール名（テナント内で一意）
    pub name: String,
    /// 説明
    pub description: Option<String>,
    /// 作成日時
    pub created_at: DateTime<Utc>,
    /// 更新日時
    pub updated_at: DateTime<Utc>,
}

impl Role {
    /// システムロール（全テナント共通）かどうか
    pub fn is_system_role(&self) -> bool {
        self.tenant_id.is_none()
    }
}

/// 権限
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    /// 権限ID
    pub id: Uuid,
    /// 機械可読な識別子（例: "users.invite"、一意）
    pub codename: String,
    /// 表示名
    pub name: String,
}

/// テナント単位のロール割り当て
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserTenantRole {
    /// 割り当てID
    pub id: Uuid,
    /// ユーザーID
    pub user_id: Uuid,
    /// テナントID
    pub tenant_id: Uuid,
    /// ロールID
    pub role_id: Uuid,
}

/// ロールを作成
///
/// # Arguments
/// * `pool` - データベース接続プール
/// * `tenant_id` - 所属テナント（Noneでシステムロール）
/// * `name` - ロール名
/// * `description` - 説明（任意）
pub async fn create(
    pool: &SqlitePool,
    tenant_id: Option<Uuid>,
    name: &str,
    description: Option<&str>,
) -> TenantdResult<Role> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO roles (id, tenant_id, name, description, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(tenant_id.map(|t| t.to_string()))
    .bind(name)
    .bind(description)
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(pool)
    .await
    .map_err(|e| {
        if e.to_string().contains("UNIQUE constraint failed") {
            TenantdError::Conflict(format!("Role already exists: {}", name))
        } else {
            TenantdError::Database(format!("Failed to create role: {}", e))
        }
    })?;

    Ok(Role {
        id,
        tenant_id,
        name: name.to_string(),
        description: description.map(str::to_string),
        created_at: now,
        updated_at: now,
    })
}

/// IDでロールを検索
pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> TenantdResult<Option<Role>> {
    let row = sqlx::query_as::<_, RoleRow>("SELECT * FROM roles WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .map_err(|e| TenantdError::Database(format!("Failed to find role: {}", e)))?;

    row.map(RoleRow::try_into_role).transpose()
}

/// テナントで利用可能なロール一覧（テナントロール＋システムロール）
pub async fn list_for_tenant(pool: &SqlitePool, tenant_id: Uuid) -> TenantdResult<Vec<Role>> {
    let rows = sqlx::query_as::<_, RoleRow>(
        "SELECT * FROM roles WHERE tenant_id = ? OR tenant_id IS NULL ORDER BY name ASC",
    )
    .bind(tenant_id.to_string())
    .fetch_all(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to list roles: {}", e)))?;

    rows.into_iter().map(RoleRow::try_into_role).collect()
}

/// システムロールの一覧
pub async fn list_system_roles(pool: &SqlitePool) -> TenantdResult<Vec<Role>> {
    let rows = sqlx::query_as::<_, RoleRow>(
        "SELECT * FROM roles WHERE tenant_id IS NULL ORDER BY name ASC",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to list system roles: {}", e)))?;

    rows.into_iter().map(RoleRow::try_into_role).collect()
}

/// ロールを削除
///
/// # Returns
/// * `Err(TenantdError::Conflict)` - 割り当てが残っている（RESTRICT）
pub async fn delete(pool: &SqlitePool, id: Uuid) -> TenantdResult<()> {
    sqlx::query("DELETE FROM roles WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(|e| {
            if e.to_string().contains("FOREIGN KEY constraint failed") {
                TenantdError::Conflict(format!("Role still has assignments: {}", id))
            } else {
                TenantdError::Database(format!("Failed to delete role: {}", e))
            }
        })?;

    Ok(())
}

/// 権限を作成
pub async fn create_permission(
    pool: &SqlitePool,
    codename: &str,
    name: &str,
) -> TenantdResult<Permission> {
    let id = Uuid::new_v4();

    sqlx::query("INSERT INTO permissions (id, codename, name) VALUES (?, ?, ?)")
        .bind(id.to_string())
        .bind(codename)
        .bind(name)
        .execute(pool)
        .await
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint failed") {
                TenantdError::Conflict(format!("Permission already exists: {}", codename))
            } else {
                TenantdError::Database(format!("Failed to create permission: {}", e))
            }
        })?;

    Ok(Permission {
        id,
        codename: codename.to_string(),
        name: name.to_string(),
    })
}

/// codenameで権限を検索
pub async fn find_permission(pool: &SqlitePool, codename: &str) -> TenantdResult<Option<Permission>> {
    let row = sqlx::query_as::<_, PermissionRow>("SELECT * FROM permissions WHERE codename = ?")
        .bind(codename)
        .fetch_optional(pool)
        .await
        .map_err(|e| TenantdError::Database(format!("Failed to find permission: {}", e)))?;

    row.map(PermissionRow::try_into_permission).transpose()
}

/// ロールに権限を付与
pub async fn grant_permission(
    pool: &SqlitePool,
    role_id: Uuid,
    permission_id: Uuid,
) -> TenantdResult<()> {
    sqlx::query("INSERT INTO role_permissions (role_id, permission_id) VALUES (?, ?)")
        .bind(role_id.to_string())
        .bind(permission_id.to_string())
        .execute(pool)
        .await
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint failed") {
                TenantdError::Conflict("Role already has this permission".to_string())
            } else {
                TenantdError::Database(format!("Failed to grant permission: {}", e))
            }
        })?;

    Ok(())
}

/// ロールから権限を剥奪
pub async fn revoke_permission(
    pool: &SqlitePool,
    role_id: Uuid,
    permission_id: Uuid,
) -> TenantdResult<()> {
    let result =
        sqlx::query("DELETE FROM role_permissions WHERE role_id = ? AND permission_id = ?")
            .bind(role_id.to_string())
            .bind(permission_id.to_string())
            .execute(pool)
            .await
            .map_err(|e| TenantdError::Database(format!("Failed to revoke permission: {}", e)))?;

    if result.rows_affected() == 0 {
        return Err(TenantdError::NotFound(
            "Permission grant not found".to_string(),
        ));
    }

    Ok(())
}

/// ロールに付与された権限の一覧をcodename順で取得
pub async fn permissions_of(pool: &SqlitePool, role_id: Uuid) -> TenantdResult<Vec<Permission>> {
    let rows = sqlx::query_as::<_, PermissionRow>(
        "SELECT p.id, p.codename, p.name FROM permissions p
         INNER JOIN role_permissions rp ON rp.permission_id = p.id
         WHERE rp.role_id = ?
         ORDER BY p.codename ASC",
    )
    .bind(role_id.to_string())
    .fetch_all(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to list role permissions: {}", e)))?;

    rows.into_iter()
        .map(PermissionRow::try_into_permission)
        .collect()
}

/// ユーザーにテナントロールを割り当て
pub async fn assign_tenant_role(
    pool: &SqlitePool,
    user_id: Uuid,
    tenant_id: Uuid,
    role_id: Uuid,
) -> TenantdResult<UserTenantRole> {
    let id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO user_tenant_roles (id, user_id, tenant_id, role_id) VALUES (?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(user_id.to_string())
    .bind(tenant_id.to_string())
    .bind(role_id.to_string())
    .execute(pool)
    .await
    .map_err(|e| {
        if e.to_string().contains("UNIQUE constraint failed") {
            TenantdError::Conflict("User already has this role in the tenant".to_string())
        } else {
            TenantdError::Database(format!("Failed to assign tenant role: {}", e))
        }
    })?;

    Ok(UserTenantRole {
        id,
        user_id,
        tenant_id,
        role_id,
    })
}

/// テナントロールの割り当てを解除
pub async fn revoke_tenant_role(
    pool: &SqlitePool,
    user_id: Uuid,
    tenant_id: Uuid,
    role_id: Uuid,
) -> TenantdResult<()> {
    let result = sqlx::query(
        "DELETE FROM user_tenant_roles WHERE user_id = ? AND tenant_id = ? AND role_id = ?",
    )
    .bind(user_id.to_string())
    .bind(tenant_id.to_string())
    .bind(role_id.to_string())
    .execute(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to revoke tenant role: {}", e)))?;

    if result.rows_affected() == 0 {
        return Err(TenantdError::NotFound(
            "Tenant role assignment not found".to_string(),
        ));
    }

    Ok(())
}

/// テナント内でユーザーが持つロールの一覧
pub async fn roles_of_user(
    pool: &SqlitePool,
    user_id: Uuid,
    tenant_id: Uuid,
) -> TenantdResult<Vec<Role>> {
    let rows = sqlx::query_as::<_, RoleRow>(
        "SELECT r.* FROM roles r
         INNER JOIN user_tenant_roles utr ON utr.role_id = r.id
         WHERE utr.user_id = ? AND utr.tenant_id = ?
         ORDER BY r.name ASC",
    )
    .bind(user_id.to_string())
    .bind(tenant_id.to_string())
    .fetch_all(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to list user roles: {}", e)))?;

    rows.into_iter().map(RoleRow::try_into_role).collect()
}

/// テナント内でユーザーが権限を持つかどうか（ロール経由の実効判定）
pub async fn user_has_permission(
    pool: &SqlitePool,
    user_id: Uuid,
    tenant_id: Uuid,
    codename: &str,
) -> TenantdResult<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM user_tenant_roles utr
         INNER JOIN role_permissions rp ON rp.role_id = utr.role_id
         INNER JOIN permissions p ON p.id = rp.permission_id
         WHERE utr.user_id = ? AND utr.tenant_id = ? AND p.codename = ?",
    )
    .bind(user_id.to_string())
    .bind(tenant_id.to_string())
    .bind(codename)
    .fetch_one(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to check permission: {}", e)))?;

    Ok(count > 0)
}

#[derive(sqlx::FromRow)]
struct RoleRow {
    id: String,
    tenant_id: Option<String>,
    name: String,
    description: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RoleRow {
    fn try_into_role(self) -> TenantdResult<Role> {
        Ok(Role {
            id: parse_uuid(&self.id, "role id")?,
            tenant_id: self
                .tenant_id
                .as_deref()
                .map(|s| parse_uuid(s, "tenant id"))
                .transpose()?,
            name: self.name,
            description: self.description,
            created_at: parse_timestamp(&self.created_at, "created_at")?,
            updated_at: parse_timestamp(&self.updated_at, "updated_at")?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PermissionRow {
    id: String,
    codename: String,
    name: String,
}

impl PermissionRow {
    fn try_into_permission(self) -> TenantdResult<Permission> {
        Ok(Permission {
            id: parse_uuid(&self.id, "permission id")?,
            codename: self.codename,
            name: self.name,
        })
    }
}
