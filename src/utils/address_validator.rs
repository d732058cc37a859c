//! 地址验证模块
//!
//! 统一的地址验证逻辑：Base58解码后必须是32字节ed25519公钥

/// 地址验证器
pub struct AddressValidator;

impl AddressValidator {
    /// 验证地址格式
    ///
    /// # 返回
    /// - true: 地址是合法的Base58编码32字节公钥
    /// - false: 地址无效
    pub fn validate(address: &str) -> bool {
        // Base58编码的32字节公钥，字符长度在32-44之间
        if address.len() < 32 || address.len() > 44 {
            return false;
        }

        match bs58::decode(address).into_vec() {
            Ok(bytes) => bytes.len() == 32,
            Err(_) => false,
        }
    }
}
