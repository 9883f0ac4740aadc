//! 監査・コンプライアンスサブシステム
//!
//! - types: 監査イベント・レコード・フィルタの型定義
//! - integrity: SHA-256チェックサムによる改竄検知
//! - signer: HMAC-SHA256による監査ログ署名
//! - recorder: バッファリング付き非同期レコーダー

pub mod integrity;
pub mod recorder;
pub mod signer;
pub mod types;

pub use recorder::{AuditRecorder, RecorderConfig, SigningIdentity};
pub use signer::LogSigner;
pub use types::{AuditEvent, AuditLogFilter, AuditLogRecord, AuditLogSignature};
