//! ユーザーCRUD操作
//!
//! ユーザーはグローバルなアイデンティティであり、テナントには属さない。
//! テナントとの関連はuser_tenant_rolesを介して表現される。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tenantd_common::error::{TenantdError, TenantdResult};
use uuid::Uuid;

use super::tenants::{parse_optional_timestamp, parse_timestamp, parse_uuid};

/// ユーザー
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// ユーザーID
    pub id: Uuid,
    /// メールアドレス（一意）
    pub email: String,
    /// パスワードハッシュ（認証処理自体は本クレートの範囲外）
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// 名
    pub first_name: String,
    /// 姓
    pub last_name: String,
    /// アバター画像URL
    pub avatar_url: Option<String>,
    /// MFAシークレット
    #[serde(skip_serializing)]
    pub mfa_secret: Option<String>,
    /// プラットフォーム運営スタッフかどうか
    pub is_staff: bool,
    /// アクティブかどうか
    pub is_active: bool,
    /// 最終ログイン日時
    pub last_login: Option<DateTime<Utc>>,
    /// 作成日時
    pub created_at: DateTime<Utc>,
}

impl User {
    /// 表示用のフルネーム
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// ユーザーを作成
///
/// # Arguments
/// * `pool` - データベース接続プール
/// * `email` - メールアドレス（一意）
/// * `password_hash` - ハッシュ済みパスワード
/// * `first_name` - 名
/// * `last_name` - 姓
///
/// # Returns
/// * `Ok(User)` - 作成されたユーザー
/// * `Err(TenantdError::Conflict)` - メールアドレスが既に存在する
pub async fn create(
    pool: &SqlitePool,
    email: &str,
    password_hash: &str,
    first_name: &str,
    last_name: &str,
) -> TenantdResult<User> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO users (id, email, password_hash, first_name, last_name,
             avatar_url, mfa_secret, is_staff, is_active, last_login, created_at)
         VALUES (?, ?, ?, ?, ?, NULL, NULL, 0, 1, NULL, ?)",
    )
    .bind(id.to_string())
    .bind(email)
    .bind(password_hash)
    .bind(first_name)
    .bind(last_name)
    .bind(now.to_rfc3339())
    .execute(pool)
    .await
    .map_err(|e| {
        if e.to_string().contains("UNIQUE constraint failed") {
            TenantdError::Conflict(format!("Email already registered: {}", email))
        } else {
            TenantdError::Database(format!("Failed to create user: {}", e))
        }
    })?;

    Ok(User {
        id,
        email: email.to_string(),
        password_hash: password_hash.to_string(),
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        avatar_url: None,
        mfa_secret: None,
        is_staff: false,
        is_active: true,
        last_login: None,
        created_at: now,
    })
}

/// IDでユーザーを検索
pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> TenantdResult<Option<User>> {
    let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .map_err(|e| TenantdError::Database(format!("Failed to find user: {}", e)))?;

    row.map(UserRow::try_into_user).transpose()
}

/// メールアドレスでユーザーを検索
pub async fn find_by_email(pool: &SqlitePool, email: &str) -> TenantdResult<Option<User>> {
    let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await
        .map_err(|e| TenantdError::Database(format!("Failed to find user by email: {}", e)))?;

    row.map(UserRow::try_into_user).transpose()
}

/// プロフィール（氏名・アバター）を更新
pub async fn update_profile(
    pool: &SqlitePool,
    id: Uuid,
    first_name: &str,
    last_name: &str,
    avatar_url: Option<&str>,
) -> TenantdResult<()> {
    let result = sqlx::query(
        "UPDATE users SET first_name = ?, last_name = ?, avatar_url = ? WHERE id = ?",
    )
    .bind(first_name)
    .bind(last_name)
    .bind(avatar_url)
    .bind(id.to_string())
    .execute(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to update user profile: {}", e)))?;

    if result.rows_affected() == 0 {
        return Err(TenantdError::NotFound(format!("User not found: {}", id)));
    }

    Ok(())
}

/// MFAシークレットを設定（Noneで解除）
pub async fn set_mfa_secret(
    pool: &SqlitePool,
    id: Uuid,
    mfa_secret: Option<&str>,
) -> TenantdResult<()> {
    let result = sqlx::query("UPDATE users SET mfa_secret = ? WHERE id = ?")
        .bind(mfa_secret)
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(|e| TenantdError::Database(format!("Failed to set MFA secret: {}", e)))?;

    if result.rows_affected() == 0 {
        return Err(TenantdError::NotFound(format!("User not found: {}", id)));
    }

    Ok(())
}

/// アクティブ状態を切り替え
pub async fn set_active(pool: &SqlitePool, id: Uuid, is_active: bool) -> TenantdResult<()> {
    let result = sqlx::query("UPDATE users SET is_active = ? WHERE id = ?")
        .bind(is_active as i32)
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(|e| TenantdError::Database(format!("Failed to update user state: {}", e)))?;

    if result.rows_affected() == 0 {
        return Err(TenantdError::NotFound(format!("User not found: {}", id)));
    }

    Ok(())
}

/// スタッフフラグを設定
pub async fn set_staff(pool: &SqlitePool, id: Uuid, is_staff: bool) -> TenantdResult<()> {
    let result = sqlx::query("UPDATE users SET is_staff = ? WHERE id = ?")
        .bind(is_staff as i32)
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(|e| TenantdError::Database(format!("Failed to update staff flag: {}", e)))?;

    if result.rows_affected() == 0 {
        return Err(TenantdError::NotFound(format!("User not found: {}", id)));
    }

    Ok(())
}

/// 最終ログイン日時を現在時刻に更新
pub async fn touch_last_login(pool: &SqlitePool, id: Uuid) -> TenantdResult<()> {
    sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(|e| TenantdError::Database(format!("Failed to update last login: {}", e)))?;

    Ok(())
}

/// ユーザーが所属する（ロール割り当てを持つ）テナントIDの一覧
///
/// 同一テナントで複数ロールを持つ場合も1件として返す。
pub async fn tenant_ids_of(pool: &SqlitePool, user_id: Uuid) -> TenantdResult<Vec<Uuid>> {
    let rows: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT tenant_id FROM user_tenant_roles WHERE user_id = ? ORDER BY tenant_id",
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await
    .map_err(|e| TenantdError::Database(format!("Failed to list user tenants: {}", e)))?;

    rows.iter()
        .map(|raw| parse_uuid(raw, "tenant id"))
        .collect()
}

/// ユーザーを削除
pub async fn delete(pool: &SqlitePool, id: Uuid) -> TenantdResult<()> {
    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(|e| TenantdError::Database(format!("Failed to delete user: {}", e)))?;

    Ok(())
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    email: String,
    password_hash: String,
    first_name: String,
    last_name: String,
    avatar_url: Option<String>,
    mfa_secret: Option<String>,
    is_staff: i64,
    is_active: i64,
    last_login: Option<String>,
    created_at: String,
}

impl UserRow {
    fn try_into_user(self) -> TenantdResult<User> {
        Ok(User {
            id: parse_uuid(&self.id, "user id")?,
            email: self.email,
            password_hash: self.password_hash,
            first_name: self.first_name,
            last_name: self.last_name,
            avatar_url: self.avatar_url,
            mfa_secret: self.mfa_secret,
            is_staff: self.is_staff != 0,
            is_active: self.is_active != 0,
            last_login: parse_optional_timestamp(self.last_login.as_deref(), "last_login")?,
            created_at: parse_timestamp(&self.created_at, "created_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_test_db() -> SqlitePool {
        crate::db::test_utils::test_db_pool().await
    }

    #[tokio::test]
    async fn test_create_and_find_user() {
        let pool = setup_test_db().await;

        let user = create(&pool, "alice@example.com", "hashed", "Alice", "Smith")
            .await
            .expect("Failed to create user");

        assert!(user.is_active);
        assert!(!user.is_staff);
        assert_eq!(user.full_name(), "Alice Smith");

        let found = find_by_id(&pool, user.id).await.unwrap().unwrap();
        assert_eq!(found.email, "alice@example.com");

        let by_email = find_by_email(&pool, "alice@example.com").await.unwrap();
        assert_eq!(by_email.unwrap().id, user.id);
    }

    #[tokio::test]
    async fn test_duplicate_email_is_conflict() {
        let pool = setup_test_db().await;

        create(&pool, "alice@example.com", "h", "Alice", "Smith")
            .await
            .unwrap();
        let result = create(&pool, "alice@example.com", "h2", "Alicia", "Smythe").await;

        assert!(matches!(result, Err(TenantdError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_update_profile() {
        let pool = setup_test_db().await;

        let user = create(&pool, "alice@example.com", "h", "Alice", "Smith")
            .await
            .unwrap();

        update_profile(
            &pool,
            user.id,
            "Alicia",
            "Jones",
            Some("https://cdn.example.com/a.png"),
        )
        .await
        .unwrap();

        let found = find_by_id(&pool, user.id).await.unwrap().unwrap();
        assert_eq!(found.first_name, "Alicia");
        assert_eq!(found.last_name, "Jones");
        assert!(found.avatar_url.is_some());
    }

    #[tokio::test]
    async fn test_update_missing_user() {
        let pool = setup_test_db().await;

        let result = update_profile(&pool, Uuid::new_v4(), "X", "Y", None).await;
        assert!(matches!(result, Err(TenantdError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_mfa_and_flags() {
        let pool = setup_test_db().await;

        let user = create(&pool, "alice@example.com", "h", "Alice", "Smith")
            .await
            .unwrap();

        set_mfa_secret(&pool, user.id, Some("JBSWY3DPEHPK3PXP"))
            .await
            .unwrap();
        set_staff(&pool, user.id, true).await.unwrap();
        set_active(&pool, user.id, false).await.unwrap();

        let found = find_by_id(&pool, user.id).await.unwrap().unwrap();
        assert_eq!(found.mfa_secret.as_deref(), Some("JBSWY3DPEHPK3PXP"));
        assert!(found.is_staff);
        assert!(!found.is_active);

        set_mfa_secret(&pool, user.id, None).await.unwrap();
        let found = find_by_id(&pool, user.id).await.unwrap().unwrap();
        assert!(found.mfa_secret.is_none());
    }

    #[tokio::test]
    async fn test_touch_last_login() {
        let pool = setup_test_db().await;

        let user = create(&pool, "alice@example.com", "h", "Alice", "Smith")
            .await
            .unwrap();
        assert!(user.last_login.is_none());

        touch_last_login(&pool, user.id).await.unwrap();
        let found = find_by_id(&pool, user.id).await.unwrap().unwrap();
        assert!(found.last_login.is_some());
    }

    #[tokio::test]
    async fn test_delete_user() {
        let pool = setup_test_db().await;

        let user = create(&pool, "alice@example.com", "h", "Alice", "Smith")
            .await
            .unwrap();
        delete(&pool, user.id).await.unwrap();

        assert!(find_by_id(&pool, user.id).await.unwrap().is_none());
    }
}
