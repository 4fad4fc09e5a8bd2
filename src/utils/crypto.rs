use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

/// Reality X25519 密钥对
pub struct RealityKeyPair {
    pub private_key: [u8; 32],
    pub public_key: [u8; 32],
}

/// 生成 X25519 密钥对
pub fn generate_reality_keypair() -> RealityKeyPair {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public_key = PublicKey::from(&secret);

    RealityKeyPair {
        private_key: secret.to_bytes(),
        public_key: public_key.to_bytes(),
    }
}

/// 由私钥计算公钥
pub fn public_key_for(private_key: &[u8; 32]) -> [u8; 32] {
    PublicKey::from(&StaticSecret::from(*private_key)).to_bytes()
}

/// URL-safe, no padding (Xray 格式)
pub fn encode_key(key: &[u8; 32]) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(key)
}

/// 解析 32 字节私钥：base64url / base64 (有无填充) / hex
pub fn decode_private_key(s: &str) -> Result<[u8; 32]> {
    let s = s.trim();
    let engines = [
        &general_purpose::URL_SAFE_NO_PAD,
        &general_purpose::URL_SAFE,
        &general_purpose::STANDARD,
        &general_purpose::STANDARD_NO_PAD,
    ];

    let decoded = engines
        .iter()
        .find_map(|engine| engine.decode(s).ok().filter(|b| b.len() == 32))
        .or_else(|| hex::decode(s).ok().filter(|b| b.len() == 32))
        .ok_or_else(|| anyhow!("私钥必须是 32 字节的 base64url、base64 或 hex"))?;

    let mut key = [0u8; 32];
    key.copy_from_slice(&decoded);
    Ok(key)
}

/// 8 字节随机 short id (hex)
pub fn generate_short_id() -> String {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let keypair = generate_reality_keypair();
        assert_eq!(public_key_for(&keypair.private_key), keypair.public_key);
    }

    #[test]
    fn test_public_key_from_encoded_private_key() {
        // RFC 7748 6.1 测试向量
        let private_key =
            decode_private_key("77076d0a7318a57d3c16c17251b26645df4c2f87ebc0992ab177fba51db92c2a")
                .unwrap();
        assert_eq!(
            hex::encode(public_key_for(&private_key)),
            "8520f0098930a754748b7ddcb43ef75a0dbf3a0d26381af4eba4a98eaa9b4e6a"
        );
    }

    #[test]
    fn test_key_encodings() {
        let keypair = generate_reality_keypair();
        let key = keypair.private_key;

        assert_eq!(decode_private_key(&encode_key(&key)).unwrap(), key);
        assert_eq!(decode_private_key(&general_purpose::STANDARD.encode(key)).unwrap(), key);
        assert_eq!(decode_private_key(&hex::encode(key)).unwrap(), key);
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert!(decode_private_key("").is_err());
        assert!(decode_private_key(&hex::encode([1u8; 31])).is_err());
        assert!(decode_private_key(&encode_key(&[1u8; 32])[..40]).is_err());
    }

    #[test]
    fn test_short_id_format() {
        let id = generate_short_id();
        assert_eq!(id.len(), 16);
        assert!(id.parse::<crate::transport::reality::ShortId>().is_ok());
    }
}
