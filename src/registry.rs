//! 客户端注册表
//!
//! 进程内存中的 UUID -> 客户端记录映射，连接任务并发读取，
//! 管理接口并发增删。

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("没有配置任何 VLESS 客户端")]
    NoClientsConfigured,

    #[error("客户端 UUID 无效: {0}")]
    InvalidClientId(String),
}

/// 客户端记录，创建后不可变
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientRecord {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl ClientRecord {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            flow: None,
            label: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<Uuid, ClientRecord>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从所有 VLESS 入站收集客户端
    pub fn from_config(config: &Config) -> Result<Self, RegistryError> {
        let registry = Self::new();
        for settings in config.vless_settings() {
            for client in &settings.clients {
                let id = Uuid::parse_str(&client.id)
                    .map_err(|_| RegistryError::InvalidClientId(client.id.clone()))?;
                registry.add(ClientRecord {
                    id,
                    flow: client.flow.clone().filter(|f| !f.is_empty()),
                    label: client.email.clone().filter(|e| !e.is_empty()),
                });
            }
        }

        if registry.is_empty() {
            return Err(RegistryError::NoClientsConfigured);
        }
        Ok(registry)
    }

    /// 纯查询，无副作用
    pub fn authenticate(&self, id: &Uuid) -> bool {
        self.clients.read().contains_key(id)
    }

    pub fn get(&self, id: &Uuid) -> Option<ClientRecord> {
        self.clients.read().get(id).cloned()
    }

    /// 相同 UUID 覆盖旧记录
    pub fn add(&self, record: ClientRecord) {
        self.clients.write().insert(record.id, record);
    }

    /// 返回记录是否存在过
    pub fn remove(&self, id: &Uuid) -> bool {
        self.clients.write().remove(id).is_some()
    }

    pub fn list(&self) -> Vec<ClientRecord> {
        self.clients.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn config(clients: &str) -> Config {
        Config::from_json(&format!(
            r#"{{ "port": 443, "inbounds": [
                {{ "protocol": "vmess", "port": 443, "settings": {{ "clients": [{{ "id": "x" }}] }} }},
                {{ "protocol": "vless", "port": 443, "settings": {{ "clients": {} }} }}
            ] }}"#,
            clients
        ))
        .unwrap()
    }

    #[test]
    fn test_from_config() {
        let registry = ClientRegistry::from_config(&config(
            r#"[{ "id": "b831381d-6324-4d53-ad4f-8cda48b30811", "flow": "", "email": "a@b" }]"#,
        ))
        .unwrap();
        assert_eq!(registry.len(), 1);

        let id = Uuid::parse_str("b831381d-6324-4d53-ad4f-8cda48b30811").unwrap();
        let record = registry.get(&id).unwrap();
        assert_eq!(record.flow, None);
        assert_eq!(record.label.as_deref(), Some("a@b"));
    }

    #[test]
    fn test_no_clients() {
        assert!(matches!(
            ClientRegistry::from_config(&config("[]")),
            Err(RegistryError::NoClientsConfigured)
        ));
        assert!(matches!(
            ClientRegistry::from_config(&config(r#"[{ "id": "nope" }]"#)),
            Err(RegistryError::InvalidClientId(_))
        ));
    }

    #[test]
    fn test_add_is_idempotent() {
        let registry = ClientRegistry::new();
        let id = Uuid::new_v4();
        registry.add(ClientRecord::new(id));
        registry.add(ClientRecord {
            label: Some("second".to_string()),
            ..ClientRecord::new(id)
        });

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&id).unwrap().label.as_deref(), Some("second"));
    }

    #[test]
    fn test_remove() {
        let registry = ClientRegistry::new();
        let id = Uuid::new_v4();
        registry.add(ClientRecord::new(id));

        assert!(!registry.remove(&Uuid::new_v4()));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(&id));
        assert!(!registry.authenticate(&id));
        assert!(registry.list().is_empty());
    }

    #[test]
    fn test_concurrent_authenticate() {
        let registry = Arc::new(ClientRegistry::new());
        let known: Vec<Uuid> = (0..16).map(|_| Uuid::new_v4()).collect();
        for id in &known {
            registry.add(ClientRecord::new(*id));
        }

        let mut handles = Vec::new();
        for t in 0..8 {
            let registry = registry.clone();
            let known = known.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..1000 {
                    assert!(registry.authenticate(&known[(i + t) % known.len()]));
                    assert!(!registry.authenticate(&Uuid::from_u128(i as u128)));
                }
            }));
        }

        // 管理路径同时增删
        let churn = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    let id = Uuid::new_v4();
                    registry.add(ClientRecord::new(id));
                    let record = registry.get(&id).unwrap();
                    assert_eq!(record.id, id);
                    assert!(registry.remove(&id));
                }
            })
        };

        for handle in handles {
            handle.join().unwrap();
        }
        churn.join().unwrap();
        assert_eq!(registry.len(), known.len());
    }
}
