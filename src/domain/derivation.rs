//! 密钥派生
//!
//! 从进程级根密钥为每个用户确定性派生ed25519存款地址。
//! 相同输入永远产生相同地址（重启后地址稳定、审计可复现）。

use bip39::{Language, Mnemonic};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use hmac::{Hmac, Mac};
use sha2::Sha512;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha512 = Hmac<Sha512>;

/// 用户存款地址派生的域分隔符
const DEPOSIT_DOMAIN: &[u8] = b"mintgate/deposit/v1";
/// 服务权限签名者的保留命名空间（非用户命名空间）
const AUTHORITY_DOMAIN: &[u8] = b"mintgate/authority/v1";

/// 派生失败（仅在启动时可能发生，致命错误）
#[derive(Debug, thiserror::Error)]
pub enum DerivationError {
    #[error("root mnemonic is empty")]
    EmptySecret,
    #[error("invalid root mnemonic: {0}")]
    InvalidMnemonic(String),
}

/// 进程级根密钥材料
///
/// 启动时解析一次，之后以引用传入派生调用。
/// 种子字节不离开本模块：不打日志、不序列化、Drop时清零。
pub struct RootKeyMaterial {
    seed: RootSeed,
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct RootSeed([u8; 64]);

// 防止意外通过Debug泄漏种子
impl std::fmt::Debug for RootKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RootKeyMaterial(<redacted>)")
    }
}

impl RootKeyMaterial {
    /// 从BIP39助记词解析根密钥
    ///
    /// 助记词缺失或格式错误是致命错误，进程不得对外服务。
    pub fn from_mnemonic(phrase: &str) -> Result<Self, DerivationError> {
        let phrase = phrase.trim();
        if phrase.is_empty() {
            return Err(DerivationError::EmptySecret);
        }

        let mnemonic = Mnemonic::parse_in(Language::English, phrase)
            .map_err(|e| DerivationError::InvalidMnemonic(e.to_string()))?;

        let seed = mnemonic.to_seed("");

        Ok(Self {
            seed: RootSeed(seed),
        })
    }

    /// 为用户派生存款签名者
    ///
    /// 纯函数：(seed, user_id, index) → 同一地址。
    /// 派生索引在(user, asset)命名空间内由账本分配，从0开始。
    pub fn derive(&self, user_id: Uuid, derivation_index: u32) -> DerivedSigner {
        let mut message = Vec::with_capacity(DEPOSIT_DOMAIN.len() + 16 + 4);
        message.extend_from_slice(DEPOSIT_DOMAIN);
        message.extend_from_slice(user_id.as_bytes());
        message.extend_from_slice(&derivation_index.to_be_bytes());

        self.derive_from_message(&message)
    }

    /// 派生服务权限签名者（持有mint/freeze权限的平台密钥）
    ///
    /// 使用保留命名空间，与任何用户存款地址不可能冲突。
    pub fn derive_service_authority(&self) -> DerivedSigner {
        self.derive_from_message(AUTHORITY_DOMAIN)
    }

    fn derive_from_message(&self, message: &[u8]) -> DerivedSigner {
        // HMAC-SHA512(seed, message)，取前32字节作为密钥材料
        let mut mac = HmacSha512::new_from_slice(&self.seed.0)
            .expect("HMAC accepts keys of any length");
        mac.update(message);
        let digest = mac.finalize().into_bytes();

        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(&digest[..32]);

        // Ed25519 clamping
        key_bytes[0] &= 248;
        key_bytes[31] &= 127;
        key_bytes[31] |= 64;

        let signing_key = SigningKey::from_bytes(&key_bytes);
        key_bytes.zeroize();

        DerivedSigner { signing_key }
    }
}

/// 不透明签名句柄
///
/// 调用方只能拿到公开地址和签名能力，私钥字节不导出。
pub struct DerivedSigner {
    signing_key: SigningKey,
}

impl DerivedSigner {
    /// 公开地址（公钥的Base58编码）
    pub fn address(&self) -> String {
        bs58::encode(self.verifying_key().to_bytes()).into_string()
    }

    /// 公钥（用于构造指令）
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// 对消息签名
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }
}

impl std::fmt::Debug for DerivedSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedSigner")
            .field("address", &self.address())
            .finish()
    }
}
