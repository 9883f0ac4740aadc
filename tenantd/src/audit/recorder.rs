//! 監査イベントレコーダー
//!
//! イベントをチャネル経由で受け取り、バッファリングして
//! 定期的にまとめて永続化するバックグラウンドタスク。
//! バッファ溢れ時は最も古いイベントから破棄する。
//!
//! テナントの監査ポリシーでrequire_log_signaturesが有効な場合、
//! 永続化と同時に署名を付与する。

use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::Duration;

use sqlx::SqlitePool;
use tenantd_common::config::PlatformConfig;
use tenantd_common::error::{TenantdError, TenantdResult};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::db::audit_logs::AuditLogStorage;
use crate::db::{signatures, tenants};

use super::integrity::compute_event_checksum;
use super::signer::LogSigner;
use super::types::AuditEvent;

/// レコーダー設定
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// フラッシュ間隔（秒）
    pub flush_interval_secs: u64,
    /// バッファ容量（超過時は最古のイベントを破棄）
    pub buffer_capacity: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: 30,
            buffer_capacity: 10_000,
        }
    }
}

impl RecorderConfig {
    /// プラットフォーム設定から構築
    pub fn from_platform(config: &PlatformConfig) -> Self {
        Self {
            flush_interval_secs: config.audit_flush_interval_secs,
            buffer_capacity: config.audit_buffer_capacity,
        }
    }
}

/// 署名設定（署名器と署名者ユーザー）
#[derive(Clone)]
pub struct SigningIdentity {
    /// 署名器
    pub signer: LogSigner,
    /// 署名者として記録するユーザーID
    pub signer_user_id: Uuid,
}

/// 監査イベントレコーダーのハンドル
pub struct AuditRecorder {
    tx: mpsc::Sender<AuditEvent>,
    handle: JoinHandle<()>,
}

impl AuditRecorder {
    /// レコーダーを起動
    pub fn spawn(
        pool: SqlitePool,
        config: RecorderConfig,
        signing: Option<SigningIdentity>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.buffer_capacity.max(1));
        let handle = tokio::spawn(background_task(pool, config, signing, rx));
        Self { tx, handle }
    }

    /// イベントを記録キューに投入（ノンブロッキング）
    ///
    /// # Returns
    /// * `Err(TenantdError::Internal)` - レコーダーが停止済み、またはキューが満杯
    pub fn record(&self, event: AuditEvent) -> TenantdResult<()> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                TenantdError::Internal("Audit queue is full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                TenantdError::Internal("Audit recorder is stopped".to_string())
            }
        })
    }

    /// レコーダーを停止し、バッファ内の残りイベントをフラッシュする
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.handle.await {
            tracing::error!("Audit recorder task failed: {}", e);
        }
    }
}

async fn background_task(
    pool: SqlitePool,
    config: RecorderConfig,
    signing: Option<SigningIdentity>,
    mut rx: mpsc::Receiver<AuditEvent>,
) {
    let storage = AuditLogStorage::new(pool.clone());
    let mut buffer: VecDeque<AuditEvent> = VecDeque::new();
    let mut interval = tokio::time::interval(Duration::from_secs(config.flush_interval_secs.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::info!(
        flush_interval_secs = config.flush_interval_secs,
        buffer_capacity = config.buffer_capacity,
        "Audit recorder started"
    );

    loop {
        tokio::select! {
            received = rx.recv() => {
                match received {
                    Some(event) => {
                        if buffer.len() >= config.buffer_capacity {
                            // 最も古いイベントを破棄
                            buffer.pop_front();
                            tracing::warn!("Audit buffer overflow, dropping oldest event");
                        }
                        buffer.push_back(event);
                    }
                    None => {
                        // 送信側が閉じられた。残りをフラッシュして終了。
                        flush(&pool, &storage, &signing, &mut buffer).await;
                        tracing::info!("Audit recorder stopped");
                        return;
                    }
                }
            }
            _ = interval.tick() => {
                flush(&pool, &storage, &signing, &mut buffer).await;
            }
        }
    }
}

async fn flush(
    pool: &SqlitePool,
    storage: &AuditLogStorage,
    signing: &Option<SigningIdentity>,
    buffer: &mut VecDeque<AuditEvent>,
) {
    if buffer.is_empty() {
        return;
    }

    let events: Vec<AuditEvent> = buffer.drain(..).collect();
    let count = events.len();

    let ids = match storage.insert_batch(&events).await {
        Ok(ids) => ids,
        Err(e) => {
            tracing::error!("Failed to flush {} audit events: {}", count, e);
            return;
        }
    };

    tracing::debug!(flushed = count, "Flushed audit events");

    if let Some(identity) = signing {
        if let Err(e) = sign_flushed(pool, identity, &events, &ids).await {
            tracing::error!("Failed to sign audit events: {}", e);
        }
    }
}

/// ポリシーでrequire_log_signaturesが有効なテナントのイベントに署名
async fn sign_flushed(
    pool: &SqlitePool,
    identity: &SigningIdentity,
    events: &[AuditEvent],
    ids: &[i64],
) -> TenantdResult<()> {
    let mut requires: HashMap<Uuid, bool> = HashMap::new();

    for (event, &log_id) in events.iter().zip(ids) {
        let required = match requires.get(&event.tenant_id) {
            Some(&cached) => cached,
            None => {
                let required = tenants::find_audit_policy(pool, event.tenant_id)
                    .await?
                    .map(|p| p.require_log_signatures)
                    .unwrap_or(false);
                requires.insert(event.tenant_id, required);
                required
            }
        };

        if !required {
            continue;
        }

        let checksum = compute_event_checksum(event);
        let signature = identity.signer.sign(&checksum)?;
        signatures::insert(pool, log_id, &signature, identity.signer_user_id).await?;
    }

    Ok(())
}
