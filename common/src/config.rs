//! 設定管理
//!
//! PlatformConfig等の設定構造体

use serde::{Deserialize, Serialize};

/// プラットフォーム設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// データベースURL (デフォルト: "sqlite://tenantd.db")
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// 監査ログのフラッシュ間隔（秒）(デフォルト: 30)
    #[serde(default = "default_audit_flush_interval")]
    pub audit_flush_interval_secs: u64,

    /// 監査ログバッファ上限エントリ数 (デフォルト: 10000)
    #[serde(default = "default_audit_buffer_capacity")]
    pub audit_buffer_capacity: usize,

    /// 監査ログ保持日数のデフォルト（テナントポリシー未設定時）(デフォルト: 365)
    #[serde(default = "default_log_retention_days")]
    pub default_log_retention_days: i64,

    /// 静的アセットのルートディレクトリ (デフォルト: "staticfiles")
    #[serde(default = "default_static_root")]
    pub static_root: String,

    /// アップロードメディアのルートディレクトリ (デフォルト: "media")
    #[serde(default = "default_media_root")]
    pub media_root: String,
}

fn default_database_url() -> String {
    "sqlite://tenantd.db".to_string()
}

fn default_audit_flush_interval() -> u64 {
    30
}

fn default_audit_buffer_capacity() -> usize {
    10_000
}

fn default_log_retention_days() -> i64 {
    365
}

fn default_static_root() -> String {
    "staticfiles".to_string()
}

fn default_media_root() -> String {
    "media".to_string()
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            audit_flush_interval_secs: default_audit_flush_interval(),
            audit_buffer_capacity: default_audit_buffer_capacity(),
            default_log_retention_days: default_log_retention_days(),
            static_root: default_static_root(),
            media_root: default_media_root(),
        }
    }
}

impl PlatformConfig {
    /// 環境変数からの上書きを適用した設定を構築
    ///
    /// `TENANTD_DATABASE_URL` / `TENANTD_AUDIT_FLUSH_INTERVAL_SECS` /
    /// `TENANTD_AUDIT_BUFFER_CAPACITY` / `TENANTD_LOG_RETENTION_DAYS` を参照する。
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("TENANTD_DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(v) = env_parse("TENANTD_AUDIT_FLUSH_INTERVAL_SECS") {
            config.audit_flush_interval_secs = v;
        }
        if let Some(v) = env_parse("TENANTD_AUDIT_BUFFER_CAPACITY") {
            config.audit_buffer_capacity = v;
        }
        if let Some(v) = env_parse("TENANTD_LOG_RETENTION_DAYS") {
            config.default_log_retention_days = v;
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_config_defaults() {
        let config = PlatformConfig::default();

        assert_eq!(config.database_url, "sqlite://tenantd.db");
        assert_eq!(config.audit_flush_interval_secs, 30);
        assert_eq!(config.audit_buffer_capacity, 10_000);
        assert_eq!(config.default_log_retention_days, 365);
        assert_eq!(config.static_root, "staticfiles");
        assert_eq!(config.media_root, "media");
    }

    #[test]
    fn test_platform_config_deserialization() {
        let json = r#"{"database_url":"sqlite::memory:","default_log_retention_days":90}"#;
        let config: PlatformConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.default_log_retention_days, 90);
        // デフォルト値が適用される
        assert_eq!(config.audit_flush_interval_secs, 30);
        assert_eq!(config.static_root, "staticfiles");
    }
}
