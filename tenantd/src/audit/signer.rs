//! 監査ログ署名
//!
//! エントリのチェックサムに対するHMAC-SHA256署名。
//! 鍵はプラットフォーム運用側が保持し、テナントには公開しない。

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tenantd_common::error::{TenantdError, TenantdResult};

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256による監査ログ署名器
#[derive(Clone)]
pub struct LogSigner {
    key: Vec<u8>,
}

impl LogSigner {
    /// 署名鍵から署名器を作成
    ///
    /// # Returns
    /// * `Err(TenantdError::Signature)` - 鍵が空
    pub fn new(key: &[u8]) -> TenantdResult<Self> {
        if key.is_empty() {
            return Err(TenantdError::Signature(
                "Signing key must not be empty".to_string(),
            ));
        }
        Ok(Self { key: key.to_vec() })
    }

    /// チェックサムに署名
    pub fn sign(&self, checksum: &[u8]) -> TenantdResult<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| TenantdError::Signature(format!("Invalid signing key: {}", e)))?;
        mac.update(checksum);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// 署名を検証
    pub fn verify(&self, checksum: &[u8], signature: &[u8]) -> TenantdResult<bool> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| TenantdError::Signature(format!("Invalid signing key: {}", e)))?;
        mac.update(checksum);
        Ok(mac.verify_slice(signature).is_ok())
    }
}

impl std::fmt::Debug for LogSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 鍵はログに出さない
        f.debug_struct("LogSigner").finish_non_exhaustive()
    }
}
