use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{anyhow, Result};
use hkdf::Hkdf;
use sha2::Sha256;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};

use super::hello_parser::{ClientHelloInfo, SESSION_ID_OFFSET};

const AUTH_INFO: &[u8] = b"REALITY";
const SESSION_ID_LEN: usize = 32;

/// 客户端版本 `x.y.z`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientVersion(pub [u8; 3]);

impl FromStr for ClientVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.is_empty() || parts.len() > 3 {
            return Err(anyhow!("invalid client version: {}", s));
        }
        let mut version = [0u8; 3];
        for (slot, part) in version.iter_mut().zip(parts) {
            *slot = part
                .parse()
                .map_err(|_| anyhow!("invalid client version: {}", s))?;
        }
        Ok(Self(version))
    }
}

impl fmt::Display for ClientVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0[0], self.0[1], self.0[2])
    }
}

/// Short ID: 最多 8 字节，右侧补零
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShortId(pub [u8; 8]);

impl FromStr for ShortId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() > 16 || s.len() % 2 != 0 {
            return Err(anyhow!("short id must be even-length hex of at most 16 digits: {:?}", s));
        }
        let bytes = hex::decode(s).map_err(|e| anyhow!("invalid short id {:?}: {}", s, e))?;
        let mut id = [0u8; 8];
        id[..bytes.len()].copy_from_slice(&bytes);
        Ok(Self(id))
    }
}

/// 拒绝原因。任何一种都会回落到目标站点，对端无法区分。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("not a TLS handshake")]
    NotTls,
    #[error("malformed ClientHello")]
    MalformedHello,
    #[error("server name {0:?} not accepted")]
    ServerNameMismatch(Option<String>),
    #[error("no X25519 key share")]
    MissingKeyShare,
    #[error("session id length {0}")]
    InvalidSessionId(usize),
    #[error("session id authentication failed")]
    DecryptFailed,
    #[error("client version {0} below minimum")]
    ClientVersionTooLow(ClientVersion),
    #[error("client version {0} above maximum")]
    ClientVersionTooHigh(ClientVersion),
    #[error("clock skew {0}ms exceeds limit")]
    ClockSkew(u64),
    #[error("unknown short id {}", hex::encode(.0))]
    UnknownShortId([u8; 8]),
}

/// 已认证的 session id 内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub version: ClientVersion,
    pub timestamp: u32,
    pub short_id: ShortId,
}

/// Reality 握手认证
///
/// 客户端把 `version[3] | 0 | unix_seconds | short_id[8]` 用
/// AES-256-GCM 加密后放进 ClientHello 的 session id。密钥为
/// `HKDF-SHA256(X25519(server_priv, client_share), salt = random[..20], "REALITY")`，
/// nonce 为 `random[20..]`，AAD 为 session id 置零后的握手消息。
#[derive(Clone)]
pub struct RealityAuth {
    private_key: StaticSecret,
    short_ids: HashSet<ShortId>,
    min_client_ver: Option<ClientVersion>,
    max_client_ver: Option<ClientVersion>,
    max_time_diff: Duration,
}

impl RealityAuth {
    /// `max_time_diff` 为零时不检查时间戳
    pub fn new(
        private_key: [u8; 32],
        short_ids: impl IntoIterator<Item = ShortId>,
        min_client_ver: Option<ClientVersion>,
        max_client_ver: Option<ClientVersion>,
        max_time_diff: Duration,
    ) -> Self {
        Self {
            private_key: StaticSecret::from(private_key),
            short_ids: short_ids.into_iter().collect(),
            min_client_ver,
            max_client_ver,
            max_time_diff,
        }
    }

    /// 客户端配置使用的公钥
    pub fn public_key(&self) -> [u8; 32] {
        PublicKey::from(&self.private_key).to_bytes()
    }

    /// 客户端给出的 short id 是否在配置集合中
    pub fn validate_short_id(&self, short_id: &ShortId) -> bool {
        self.short_ids.contains(short_id)
    }

    /// 认证 ClientHello。服务名检查由调用方完成。
    pub fn authenticate(
        &self,
        hello: &ClientHelloInfo,
        now: SystemTime,
    ) -> Result<SessionInfo, RejectReason> {
        let client_public = hello.public_key.ok_or(RejectReason::MissingKeyShare)?;
        if hello.session_id.len() != SESSION_ID_LEN
            || hello.handshake.len() < SESSION_ID_OFFSET + SESSION_ID_LEN
        {
            return Err(RejectReason::InvalidSessionId(hello.session_id.len()));
        }

        let shared = self
            .private_key
            .diffie_hellman(&PublicKey::from(client_public));
        let auth_key = derive_auth_key(shared.as_bytes(), &hello.client_random)?;

        let mut aad = hello.handshake.clone();
        aad[SESSION_ID_OFFSET..SESSION_ID_OFFSET + SESSION_ID_LEN].fill(0);

        let cipher =
            Aes256Gcm::new_from_slice(&auth_key).map_err(|_| RejectReason::DecryptFailed)?;
        let plain = cipher
            .decrypt(
                Nonce::from_slice(&hello.client_random[20..]),
                Payload {
                    msg: &hello.session_id,
                    aad: &aad,
                },
            )
            .map_err(|_| RejectReason::DecryptFailed)?;
        if plain.len() != 16 {
            return Err(RejectReason::DecryptFailed);
        }

        let version = ClientVersion([plain[0], plain[1], plain[2]]);
        let timestamp = u32::from_be_bytes([plain[4], plain[5], plain[6], plain[7]]);
        let mut short_id = [0u8; 8];
        short_id.copy_from_slice(&plain[8..16]);
        let short_id = ShortId(short_id);

        if let Some(min) = self.min_client_ver {
            if version < min {
                return Err(RejectReason::ClientVersionTooLow(version));
            }
        }
        if let Some(max) = self.max_client_ver {
            if version > max {
                return Err(RejectReason::ClientVersionTooHigh(version));
            }
        }

        if !self.max_time_diff.is_zero() {
            let now_ms = now
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            let diff = now_ms.abs_diff(timestamp as u64 * 1000);
            if diff > self.max_time_diff.as_millis() as u64 {
                return Err(RejectReason::ClockSkew(diff));
            }
        }

        if !self.validate_short_id(&short_id) {
            return Err(RejectReason::UnknownShortId(short_id.0));
        }

        Ok(SessionInfo {
            version,
            timestamp,
            short_id,
        })
    }
}

fn derive_auth_key(shared: &[u8], client_random: &[u8; 32]) -> Result<[u8; 32], RejectReason> {
    let hk = Hkdf::<Sha256>::new(Some(&client_random[..20]), shared);
    let mut auth_key = [0u8; 32];
    hk.expand(AUTH_INFO, &mut auth_key)
        .map_err(|_| RejectReason::DecryptFailed)?;
    Ok(auth_key)
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::transport::reality::hello_parser::parse_client_hello;
    use crate::transport::reality::hello_parser::testing::RECORD_SESSION_ID_OFFSET;

    const SHORT_ID: [u8; 8] = [0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef];

    fn auth() -> RealityAuth {
        RealityAuth::new(
            [0x42; 32],
            ["0123456789abcdef".parse::<ShortId>().unwrap()],
            Some("1.8.0".parse().unwrap()),
            Some("1.9.9".parse().unwrap()),
            Duration::from_secs(60),
        )
    }

    fn check(auth: &RealityAuth, record: &[u8]) -> Result<SessionInfo, RejectReason> {
        let hello = parse_client_hello(record).unwrap().unwrap();
        auth.authenticate(&hello, SystemTime::now())
    }

    #[test]
    fn test_short_id_parse() {
        assert_eq!("0123456789abcdef".parse::<ShortId>().unwrap().0, SHORT_ID);
        assert_eq!("ab".parse::<ShortId>().unwrap().0, [0xab, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!("".parse::<ShortId>().unwrap().0, [0u8; 8]);
        assert!("abc".parse::<ShortId>().is_err());
        assert!("0123456789abcdef00".parse::<ShortId>().is_err());
        assert!("zz".parse::<ShortId>().is_err());
    }

    #[test]
    fn test_client_version_parse_and_order() {
        let v: ClientVersion = "1.8.0".parse().unwrap();
        assert_eq!(v, ClientVersion([1, 8, 0]));
        assert_eq!("25.3".parse::<ClientVersion>().unwrap(), ClientVersion([25, 3, 0]));
        assert!("1.x.0".parse::<ClientVersion>().is_err());
        assert!("1.2.3.4".parse::<ClientVersion>().is_err());
        assert!(ClientVersion([1, 8, 0]) < ClientVersion([1, 10, 0]));
    }

    #[test]
    fn test_validate_short_id() {
        let auth = auth();
        assert!(auth.validate_short_id(&ShortId(SHORT_ID)));
        assert!(!auth.validate_short_id(&ShortId([0u8; 8])));
    }

    #[test]
    fn test_authentic_hello_accepted() {
        let auth = auth();
        let params = HelloParams::new("www.apple.com", SHORT_ID);
        let record = authentic_hello(auth.public_key(), &params);

        let info = check(&auth, &record).unwrap();
        assert_eq!(info.short_id, ShortId(SHORT_ID));
        assert_eq!(info.version, ClientVersion([1, 8, 0]));
    }

    #[test]
    fn test_wrong_server_key_rejected() {
        let auth = auth();
        let other = RealityAuth::new([0x24; 32], Vec::new(), None, None, Duration::ZERO);
        let params = HelloParams::new("www.apple.com", SHORT_ID);
        let record = authentic_hello(other.public_key(), &params);

        assert_eq!(check(&auth, &record), Err(RejectReason::DecryptFailed));
    }

    #[test]
    fn test_tampered_hello_rejected() {
        let auth = auth();
        let params = HelloParams::new("www.apple.com", SHORT_ID);
        let mut record = authentic_hello(auth.public_key(), &params);
        // 篡改第一个 cipher suite
        record[RECORD_SESSION_ID_OFFSET + 32 + 2] ^= 0xff;

        assert_eq!(check(&auth, &record), Err(RejectReason::DecryptFailed));
    }

    #[test]
    fn test_unknown_short_id_rejected() {
        let auth = auth();
        let params = HelloParams::new("www.apple.com", [9u8; 8]);
        let record = authentic_hello(auth.public_key(), &params);

        assert_eq!(check(&auth, &record), Err(RejectReason::UnknownShortId([9u8; 8])));
    }

    #[test]
    fn test_clock_skew_rejected() {
        let auth = auth();
        let mut params = HelloParams::new("www.apple.com", SHORT_ID);
        params.timestamp = unix_now() - 3600;
        let record = authentic_hello(auth.public_key(), &params);

        assert!(matches!(check(&auth, &record), Err(RejectReason::ClockSkew(_))));
    }

    #[test]
    fn test_clock_skew_unchecked_when_zero() {
        let auth = RealityAuth::new([0x42; 32], [ShortId(SHORT_ID)], None, None, Duration::ZERO);
        let mut params = HelloParams::new("www.apple.com", SHORT_ID);
        params.timestamp = 0;
        let record = authentic_hello(auth.public_key(), &params);

        assert!(check(&auth, &record).is_ok());
    }

    #[test]
    fn test_client_version_bounds() {
        let auth = auth();

        let mut params = HelloParams::new("www.apple.com", SHORT_ID);
        params.version = [1, 7, 9];
        let record = authentic_hello(auth.public_key(), &params);
        assert_eq!(
            check(&auth, &record),
            Err(RejectReason::ClientVersionTooLow(ClientVersion([1, 7, 9])))
        );

        params.version = [2, 0, 0];
        let record = authentic_hello(auth.public_key(), &params);
        assert_eq!(
            check(&auth, &record),
            Err(RejectReason::ClientVersionTooHigh(ClientVersion([2, 0, 0])))
        );
    }

    #[test]
    fn test_missing_key_share_rejected() {
        let auth = auth();
        let record = crate::transport::reality::hello_parser::testing::client_hello(
            [3u8; 32],
            Some("www.apple.com"),
            None,
        );
        assert_eq!(check(&auth, &record), Err(RejectReason::MissingKeyShare));
    }
}
