use aes_gcm::{
    Aes256Gcm,
    aead::{Aead, KeyInit},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as base64_engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::config::AppConfig;
use crate::error::AppError;

use super::models::UserAccount;
use super::storage::UserStore;

/// 密钥派生的域隔离标签：同一主密钥在别处派生不会得到相同的加密密钥。
const KEY_CONTEXT: &[u8] = b"lumen-backend/user-credential/v1";

const NONCE_LEN: usize = 12;

/// 本次请求实际使用的上游密钥。
#[derive(Debug, Clone)]
pub enum ResolvedKey {
    /// 用户自备密钥：不限量，不计入每日额度
    Own(String),
    /// 共享默认密钥：受每日额度约束
    Shared(String),
}

impl ResolvedKey {
    pub fn api_key(&self) -> &str {
        match self {
            ResolvedKey::Own(k) | ResolvedKey::Shared(k) => k,
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, ResolvedKey::Shared(_))
    }
}

fn derive_key(secret: &str) -> [u8; 32] {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(secret.as_bytes()).expect("hmac key");
    mac.update(KEY_CONTEXT);
    let bytes = mac.finalize().into_bytes();
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes[..32]);
    key
}

/// 加密用户自备密钥，输出 base64(nonce ‖ ciphertext)。
///
/// 显式的服务层函数：数据模型本身不做任何隐式加解密。
pub fn encrypt_credential(secret: &str, plain: &str) -> Result<String, AppError> {
    if secret.trim().is_empty() {
        return Err(AppError::Internal(
            "credentials.secret 未配置，无法保存自备密钥".into(),
        ));
    }
    let key = derive_key(secret);
    let cipher = Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(&key));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = aes_gcm::Nonce::from_slice(&nonce_bytes);

    let encrypted = cipher
        .encrypt(nonce, plain.as_bytes())
        .map_err(|e| AppError::Internal(format!("加密自备密钥失败: {e}")))?;

    let mut payload = Vec::with_capacity(NONCE_LEN + encrypted.len());
    payload.extend_from_slice(&nonce_bytes);
    payload.extend_from_slice(&encrypted);
    Ok(base64_engine.encode(payload))
}

/// 解密存储的自备密钥；任何格式/完整性问题都视为密钥无效。
pub fn decrypt_credential(secret: &str, stored: &str) -> Result<String, AppError> {
    let key = derive_key(secret);
    let cipher = Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(&key));

    let raw = base64_engine
        .decode(stored)
        .map_err(|_| AppError::InvalidCredential("存储的密钥格式无效".into()))?;
    if raw.len() <= NONCE_LEN {
        return Err(AppError::InvalidCredential("存储的密钥长度无效".into()));
    }
    let nonce = aes_gcm::Nonce::from_slice(&raw[..NONCE_LEN]);
    let plain = cipher
        .decrypt(nonce, &raw[NONCE_LEN..])
        .map_err(|_| AppError::InvalidCredential("存储的密钥解密失败".into()))?;
    String::from_utf8(plain).map_err(|_| AppError::InvalidCredential("存储的密钥内容无效".into()))
}

/// 决定本次请求使用哪把密钥。
///
/// - 有自备密钥且可解密 → Own（不限量）
/// - 无自备密钥 → Shared（受额度约束）
/// - 自备密钥无法解密 → 当场清除并报错，让用户重新录入；
///   不会静默回退到共享密钥（避免把计费/额度问题藏起来）
pub async fn resolve(
    store: &UserStore,
    user: &UserAccount,
    config: &AppConfig,
) -> Result<ResolvedKey, AppError> {
    if user.has_own_credential
        && let Some(stored) = user.own_credential.as_deref()
        && !stored.is_empty()
    {
        match decrypt_credential(&config.credentials.secret, stored) {
            Ok(key) if !key.trim().is_empty() => return Ok(ResolvedKey::Own(key)),
            _ => {
                let now = chrono::Utc::now().to_rfc3339();
                store.clear_credential(&user.subject, &now).await?;
                tracing::warn!("用户 {} 的自备密钥无法解密，已清除", user.subject);
                return Err(AppError::InvalidCredential(
                    "存储的 API 密钥已失效并被清除，请重新录入，或使用免费额度".into(),
                ));
            }
        }
    }

    let shared = config.gemini.default_api_key.trim();
    if shared.is_empty() {
        return Err(AppError::Internal("共享密钥未配置，无法提供免费额度".into()));
    }
    Ok(ResolvedKey::Shared(shared.to_string()))
}
