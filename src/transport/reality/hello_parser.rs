use anyhow::{anyhow, Result};
use bytes::Buf;

/// TLS 记录类型: Handshake
pub const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
/// TLS 记录头长度
pub const RECORD_HEADER_LEN: usize = 5;
/// 握手消息内 session id 的偏移: type(1) + len(3) + version(2) + random(32) + sid_len(1)
pub const SESSION_ID_OFFSET: usize = 39;

const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;
const EXT_SERVER_NAME: u16 = 0x0000;
const EXT_KEY_SHARE: u16 = 0x0033;
const GROUP_X25519: u16 = 0x001d;

pub struct ClientHelloInfo {
    pub client_random: [u8; 32],
    pub session_id: Vec<u8>,
    pub server_name: Option<String>,
    pub public_key: Option<[u8; 32]>,
    /// 完整的握手消息 (不含记录头)
    pub handshake: Vec<u8>,
}

/// 记录头是否为 TLS 握手 (0x16) 且版本为 3.1 - 3.4
pub fn is_tls_handshake(buf: &[u8]) -> bool {
    buf.len() >= 3
        && buf[0] == CONTENT_TYPE_HANDSHAKE
        && buf[1] == 0x03
        && (0x01..=0x04).contains(&buf[2])
}

/// 记录总长度 (含记录头)，头部不足时返回 None
pub fn record_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < RECORD_HEADER_LEN {
        return None;
    }
    Some(RECORD_HEADER_LEN + u16::from_be_bytes([buf[3], buf[4]]) as usize)
}

/// 解析 ClientHello 消息，提取 Random, SessionID, SNI 和 X25519 Public Key
///
/// `buf` 必须包含完整的第一条记录。不是 ClientHello 时返回 `Ok(None)`。
pub fn parse_client_hello(buf: &[u8]) -> Result<Option<ClientHelloInfo>> {
    if !is_tls_handshake(buf) {
        return Ok(None);
    }
    let total = match record_len(buf) {
        Some(total) if buf.len() >= total => total,
        _ => return Err(anyhow!("Incomplete TLS record")),
    };
    let record = &buf[RECORD_HEADER_LEN..total];

    // Handshake Header: Type(1) + Len(3)
    if record.len() < 4 {
        return Err(anyhow!("Short buffer for handshake header"));
    }
    if record[0] != HANDSHAKE_CLIENT_HELLO {
        return Ok(None);
    }
    let hs_len = u32::from_be_bytes([0, record[1], record[2], record[3]]) as usize;
    if record.len() < 4 + hs_len {
        return Err(anyhow!("ClientHello spans multiple records"));
    }
    let handshake = &record[..4 + hs_len];
    let mut cursor = &handshake[4..];

    // ClientHello Version (2 bytes)
    if cursor.remaining() < 2 + 32 + 1 {
        return Err(anyhow!("Short buffer for Version/Random"));
    }
    cursor.advance(2);

    let mut client_random = [0u8; 32];
    cursor.copy_to_slice(&mut client_random);

    let session_id_len = cursor.get_u8() as usize;
    if cursor.remaining() < session_id_len {
        return Err(anyhow!("Short buffer for SessionID"));
    }
    let mut session_id = vec![0u8; session_id_len];
    cursor.copy_to_slice(&mut session_id);

    // Cipher Suites
    if cursor.remaining() < 2 {
        return Err(anyhow!("Short buffer for CipherSuites Len"));
    }
    let cipher_suites_len = cursor.get_u16() as usize;
    if cursor.remaining() < cipher_suites_len {
        return Err(anyhow!("Short buffer for CipherSuites"));
    }
    cursor.advance(cipher_suites_len);

    // Compression Methods
    if cursor.remaining() < 1 {
        return Err(anyhow!("Short buffer for CompressionMethods Len"));
    }
    let compression_methods_len = cursor.get_u8() as usize;
    if cursor.remaining() < compression_methods_len {
        return Err(anyhow!("Short buffer for CompressionMethods"));
    }
    cursor.advance(compression_methods_len);

    let mut info = ClientHelloInfo {
        client_random,
        session_id,
        server_name: None,
        public_key: None,
        handshake: handshake.to_vec(),
    };

    // No extensions?
    if cursor.remaining() < 2 {
        return Ok(Some(info));
    }
    let extensions_len = cursor.get_u16() as usize;
    if cursor.remaining() < extensions_len {
        return Err(anyhow!("Short buffer for Extensions"));
    }
    let mut extensions = &cursor[..extensions_len];

    while extensions.remaining() >= 4 {
        let ext_type = extensions.get_u16();
        let ext_len = extensions.get_u16() as usize;
        if extensions.remaining() < ext_len {
            break;
        }
        let ext_data = &extensions[..ext_len];
        extensions.advance(ext_len);

        match ext_type {
            EXT_SERVER_NAME => info.server_name = parse_server_name(ext_data),
            EXT_KEY_SHARE => info.public_key = parse_x25519_share(ext_data),
            _ => {}
        }
    }

    Ok(Some(info))
}

fn parse_server_name(mut data: &[u8]) -> Option<String> {
    if data.remaining() < 2 {
        return None;
    }
    let list_len = data.get_u16() as usize;
    if data.remaining() < list_len {
        return None;
    }
    let mut list = &data[..list_len];

    while list.remaining() >= 3 {
        let name_type = list.get_u8();
        let name_len = list.get_u16() as usize;
        if list.remaining() < name_len {
            break;
        }
        // NameType: HostName (0x00)
        if name_type == 0x00 {
            return String::from_utf8(list[..name_len].to_vec()).ok();
        }
        list.advance(name_len);
    }
    None
}

fn parse_x25519_share(mut data: &[u8]) -> Option<[u8; 32]> {
    if data.remaining() < 2 {
        return None;
    }
    let shares_len = data.get_u16() as usize;
    if data.remaining() < shares_len {
        return None;
    }
    let mut shares = &data[..shares_len];

    while shares.remaining() >= 4 {
        let group = shares.get_u16();
        let key_len = shares.get_u16() as usize;
        if shares.remaining() < key_len {
            break;
        }
        if group == GROUP_X25519 && key_len == 32 {
            let mut key = [0u8; 32];
            shares.copy_to_slice(&mut key);
            return Some(key);
        }
        shares.advance(key_len);
    }
    None
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_classifier() {
        assert!(is_tls_handshake(&[0x16, 0x03, 0x01]));
        assert!(is_tls_handshake(&[0x16, 0x03, 0x03, 0x00]));
        assert!(!is_tls_handshake(&[0x16, 0x03]));
        assert!(!is_tls_handshake(&[0x17, 0x03, 0x03]));
        assert!(!is_tls_handshake(&[0x16, 0x02, 0x00]));
        assert!(!is_tls_handshake(b"GET / HTTP/1.1"));
    }

    #[test]
    fn test_parse_fields() {
        let key = [7u8; 32];
        let record = client_hello([9u8; 32], Some("www.example.com"), Some(key));
        let info = parse_client_hello(&record).unwrap().unwrap();

        assert_eq!(info.client_random, [9u8; 32]);
        assert_eq!(info.session_id, vec![0u8; 32]);
        assert_eq!(info.server_name.as_deref(), Some("www.example.com"));
        assert_eq!(info.public_key, Some(key));
        assert_eq!(info.handshake, record[RECORD_HEADER_LEN..].to_vec());
        assert_eq!(record_len(&record), Some(record.len()));
    }

    #[test]
    fn test_missing_extensions() {
        let record = client_hello([1u8; 32], None, None);
        let info = parse_client_hello(&record).unwrap().unwrap();
        assert!(info.server_name.is_none());
        assert!(info.public_key.is_none());
    }

    #[test]
    fn test_not_client_hello() {
        assert!(parse_client_hello(b"\x00\x01\x02garbage").unwrap().is_none());

        let mut record = client_hello([1u8; 32], None, None);
        record[RECORD_HEADER_LEN] = 0x02;
        assert!(parse_client_hello(&record).unwrap().is_none());
    }

    #[test]
    fn test_truncated_record() {
        let record = client_hello([1u8; 32], Some("a.com"), None);
        assert!(parse_client_hello(&record[..record.len() - 1]).is_err());
    }
}
