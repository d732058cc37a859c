// 权限变更交易构造与签名
//
// 派生私钥只在本模块的签名调用中短暂存在于内存，
// 签名后交易以base64线格式交给RPC能力提交

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::{AuthorityKind, DerivedSigner};

/// set-authority 指令体
///
/// new_authority = None 编码撤销：权限被永久移除，链上不可逆
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetAuthorityInstruction {
    pub mint_address: String,
    pub authority_kind: AuthorityKind,
    pub new_authority: Option<String>,
    /// 当前权限持有者（签名者地址）
    pub current_authority: String,
}

/// 已签名交易的线格式
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SignedTransaction {
    instruction: SetAuthorityInstruction,
    signer_pubkey: [u8; 32],
    signature: Vec<u8>,
}

/// 构造并签名set-authority交易，返回base64编码的线格式
pub fn build_set_authority_tx(
    signer: &DerivedSigner,
    mint_address: &str,
    authority_kind: AuthorityKind,
    new_authority: Option<&str>,
) -> Result<String> {
    let instruction = SetAuthorityInstruction {
        mint_address: mint_address.to_string(),
        authority_kind,
        new_authority: new_authority.map(|s| s.to_string()),
        current_authority: signer.address(),
    };

    let message =
        bincode::serialize(&instruction).context("Failed to serialize authority instruction")?;

    let signature = signer.sign(&message);

    let signed = SignedTransaction {
        instruction,
        signer_pubkey: signer.verifying_key().to_bytes(),
        signature: signature.to_bytes().to_vec(),
    };

    let wire = bincode::serialize(&signed).context("Failed to serialize signed transaction")?;

    use base64::Engine;
    Ok(base64::engine::general_purpose::STANDARD.encode(wire))
}

/// 解码线格式，取出指令体（测试用，模拟节点侧的交易解析）
#[cfg(test)]
pub(crate) fn decode_set_authority_tx(wire: &str) -> Result<SetAuthorityInstruction> {
    use base64::Engine;

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(wire)
        .context("Wire format is not valid base64")?;
    let signed: SignedTransaction =
        bincode::deserialize(&bytes).context("Failed to deserialize signed transaction")?;
    Ok(signed.instruction)
}
