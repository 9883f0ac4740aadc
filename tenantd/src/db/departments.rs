//! 部門CRUD操作
//!
//! 部門はテナント内の組織単位で、親部門による階層構造を持てる。
//! 部門単位のロール割り当て（user_department_roles）もここで扱う。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tenantd_common::error::{TenantdError, TenantdResult};
use uuid::Uuid;

use super::tenants::{parse_timestamp, parse_uuid};

/// 部門
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Department {
    /// 部門ID
    pub id: Uuid,
    /// 所属テナントID
    pub tenant_id: Uuid,
    /// 親部門ID（階層構造用）
    pub parent_department_id: Option<Uuid>,
    /// 部門名（テナント内で一意）
    pub name: String,
    /// 説明
    pub description: Option<String>,
    /// 連絡先メールアドレス
    pub contact_email: Option<String>,
    /// 正式名称（請求書等に使用）
    pub legal_name: Option<String>,
    /// 作成日時
    pub created_at: DateTime<Utc>,
    /// 更新日時
    pub updated_at: DateTime<Utc>,
}

/// 部門単位のロール割り当て
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDepartmentRole {
    /// 割り当てID
    pub id: Uuid,
    /// ユーザーID
    pub user_id: Uuid,
    /// 部門ID
    pub department_id: Uuid,
    /// ロールID
    pub role_id: Uuid,
}

/// 部門を作成
///
/// # Returns
/// * `Ok(Department)` - 作成された部門
/// * `Err(TenantdError::Conflict)` - 同名の部門がテナント内に既に存在する
pub async fn create(
    pool: &SqlitePool,
    tenant_id: Uuid,
    name: &str,
    description: Option<&str>,
    parent_department_id: Option<Uuid>,
) -> TenantdResult<Department> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO departments (id, tenant_id, parent_department_id, name, description,
             contact_email, legal_name, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, NULL, NULL, ?, ?)",
    )
    .bind(id.to_string())
    .bind(tenant_id.to_string())
    .bind(parent_department_id.map(|p| p.to_string()))
    .bind(name)
    .bind(description)
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(pool)
    .await
    .map_err(|e| {
        if e.to_string().contains("UNIQUE constraint failed") {
            TenantdError::Conflict(format!("Department already exists in tenant: {}", name))
        } else {
            TenantdError::Database(format!("Failed to create department: {}", e))
        }
    })?;

    Ok(Department {
        id,
        tenant_id,
        parent_department_id,
        name: name.to_string(),
        description: description.map(str::to_string),
        contact_email: None,
        legal_name: None,
        created_at: now,
        updated_at: now,
    })
}

/// IDで部門を検索
pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> TenantdResult<Option<Department>> {
    let row = sqlx::query_as::<_, DepartmentRow>("SELECT * FROM departments WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .map_err(|e| TenantdError::Database(format!("Failed to find department: {}", e)))?;

    row.map(DepartmentRow::try_into_department).transpose()
}

/// テナント内の部門一覧を名前順で取得
pub async fn list_by_tenant(pool: &SqlitePool, tenant_id: Uuid) -> TenantdResult<Vec<Department>> {
    let rows = sqlx::query_as::<_, DepartmentRow>(
        "SELECT * FROM departments WHERE tenant_id = ? ORDER BY name ASC",
    )
    .bind(tenant_id.to_string())
    .fetch_all(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to list departments: {}", e)))?;

    rows.into_iter()
        .map(DepartmentRow::try_into_department)
        .collect()
}

/// 直下の子部門の一覧を取得
pub async fn list_children(pool: &SqlitePool, parent_id: Uuid) -> TenantdResult<Vec<Department>> {
    let rows = sqlx::query_as::<_, DepartmentRow>(
        "SELECT * FROM departments WHERE parent_department_id = ? ORDER BY name ASC",
    )
    .bind(parent_id.to_string())
    .fetch_all(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to list child departments: {}", e)))?;

    rows.into_iter()
        .map(DepartmentRow::try_into_department)
        .collect()
}

/// 部門情報を更新
pub async fn update(
    pool: &SqlitePool,
    id: Uuid,
    name: &str,
    description: Option<&str>,
    contact_email: Option<&str>,
    legal_name: Option<&str>,
) -> TenantdResult<()> {
    let result = sqlx::query(
        "UPDATE departments
         SET name = ?, description = ?, contact_email = ?, legal_name = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(name)
    .bind(description)
    .bind(contact_email)
    .bind(legal_name)
    .bind(Utc::now().to_rfc3339())
    .bind(id.to_string())
    .execute(pool)
    .await
    .map_err(|e| {
        if e.to_string().contains("UNIQUE constraint failed") {
            TenantdError::Conflict(format!("Department already exists in tenant: {}", name))
        } else {
            TenantdError::Database(format!("Failed to update department: {}", e))
        }
    })?;

    if result.rows_affected() == 0 {
        return Err(TenantdError::NotFound(format!(
            "Department not found: {}",
            id
        )));
    }

    Ok(())
}

/// 部門を削除
///
/// 子部門のparent_department_idはNULLになる（SET NULL）。
/// 部門単位のロール割り当てはCASCADEで削除される。
pub async fn delete(pool: &SqlitePool, id: Uuid) -> TenantdResult<()> {
    sqlx::query("DELETE FROM departments WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(|e| TenantdError::Database(format!("Failed to delete department: {}", e)))?;

    Ok(())
}

/// ユーザーに部門ロールを割り当て
pub async fn assign_role(
    pool: &SqlitePool,
    user_id: Uuid,
    department_id: Uuid,
    role_id: Uuid,
) -> TenantdResult<UserDepartmentRole> {
    let id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO user_department_roles (id, user_id, department_id, role_id)
         VALUES (?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(user_id.to_string())
    .bind(department_id.to_string())
    .bind(role_id.to_string())
    .execute(pool)
    .await
    .map_err(|e| {
        if e.to_string().contains("UNIQUE constraint failed") {
            TenantdError::Conflict("User already has this role in the department".to_string())
        } else {
            TenantdError::Database(format!("Failed to assign department role: {}", e))
        }
    })?;

    Ok(UserDepartmentRole {
        id,
        user_id,
        department_id,
        role_id,
    })
}

/// 部門ロールの割り当てを解除
pub async fn revoke_role(
    pool: &SqlitePool,
    user_id: Uuid,
    department_id: Uuid,
    role_id: Uuid,
) -> TenantdResult<()> {
    let result = sqlx::query(
        "DELETE FROM user_department_roles
         WHERE user_id = ? AND department_id = ? AND role_id = ?",
    )
    .bind(user_id.to_string())
    .bind(department_id.to_string())
    .bind(role_id.to_string())
    .execute(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to revoke department role: {}", e)))?;

    if result.rows_affected() == 0 {
        return Err(TenantdError::NotFound(
            "Department role assignment not found".to_string(),
        ));
    }

    Ok(())
}

/// 部門に割り当てられたユーザーIDの一覧（重複なし）
pub async fn member_ids(pool: &SqlitePool, department_id: Uuid) -> TenantdResult<Vec<Uuid>> {
    let rows: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT user_id FROM user_department_roles WHERE department_id = ? ORDER BY user_id",
    )
    .bind(department_id.to_string())
    .fetch_all(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to list department members: {}", e)))?;

    rows.iter().map(|raw| parse_uuid(raw, "user id")).collect()
}

#[derive(sqlx::FromRow)]
struct DepartmentRow {
    id: String,
    tenant_id: String,
    parent_department_id: Option<String>,
    name: String,
    description: Option<String>,
    contact_email: Option<String>,
    legal_name: Option<String>,
    created_at: String,
    updated_at: String,
}

impl DepartmentRow {
    fn try_into_department(self) -> TenantdResult<Department> {
        Ok(Department {
            id: parse_uuid(&self.id, "department id")?,
            tenant_id: parse_uuid(&self.tenant_id, "tenant id")?,
            parent_department_id: self
                .parent_department_id
                .as_deref()
                .map(|s| parse_uuid(s, "parent department id"))
                .transpose()?,
            name: self.name,
            description: self.description,
            contact_email: self.contact_email,
            legal_name: self.legal_name,
            created_at: parse_timestamp(&self.created_at, "created_at")?,
            updated_at: parse_timestamp(&self.updated_at, "updated_at")?,
        })
    }
}
