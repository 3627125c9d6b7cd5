use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    VMess,
    VLess,
    Trojan,
}

impl ProtocolKind {
    pub const ALL: [ProtocolKind; 3] =
        [ProtocolKind::VMess, ProtocolKind::VLess, ProtocolKind::Trojan];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::VMess => "vmess",
            ProtocolKind::VLess => "vless",
            ProtocolKind::Trojan => "trojan",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed share link. `raw` is what gets written to the valid list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyDescriptor {
    pub raw: String,
    pub remark: Option<String>,
    pub fields: ProtocolFields,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolFields {
    VMess(VMessFields),
    VLess(VLessFields),
    Trojan(TrojanFields),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VMessFields {
    pub address: String,
    pub port: u16,
    pub id: String,
    pub alter_id: u32,
    pub network: String,
    pub tls: bool,
    pub host: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VLessFields {
    pub uuid: String,
    /// Carried from `uuid:password@` userinfo. Xray's VLESS user has no
    /// password, so nothing downstream reads it.
    pub password: Option<String>,
    pub address: String,
    pub port: u16,
    pub security: Option<String>,
    pub network: String,
    pub path: Option<String>,
    pub host_header: Option<String>,
    pub flow: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrojanFields {
    pub password: String,
    pub address: String,
    pub port: u16,
}

impl ProxyDescriptor {
    pub fn kind(&self) -> ProtocolKind {
        match &self.fields {
            ProtocolFields::VMess(_) => ProtocolKind::VMess,
            ProtocolFields::VLess(_) => ProtocolKind::VLess,
            ProtocolFields::Trojan(_) => ProtocolKind::Trojan,
        }
    }

    pub fn server(&self) -> (&str, u16) {
        match &self.fields {
            ProtocolFields::VMess(f) => (&f.address, f.port),
            ProtocolFields::VLess(f) => (&f.address, f.port),
            ProtocolFields::Trojan(f) => (&f.address, f.port),
        }
    }

    /// Short label for log lines: the remark if there is one, else `host:port`.
    pub fn name(&self) -> String {
        match &self.remark {
            Some(remark) => remark.clone(),
            None => {
                let (address, port) = self.server();
                format!("{}:{}", address, port)
            }
        }
    }
}
