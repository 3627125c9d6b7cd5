//! Xray configuration built from a single descriptor.
//!
//! Every config has the same local SOCKS inbound and exactly one outbound for
//! the descriptor under test. Field order in the structs is the field order in
//! the serialized JSON.

use serde::Serialize;
use tracing::debug;

use crate::descriptor::{
    ProtocolFields, ProtocolKind, ProxyDescriptor, TrojanFields, VLessFields, VMessFields,
};
use crate::error::BuildError;

pub const DEFAULT_SOCKS_PORT: u16 = 1080;

/// Knobs for [`build`].
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Port of the local SOCKS inbound. The engine never binds it in test mode.
    pub socks_port: u16,
    /// Protocols the builder will emit outbounds for.
    pub protocols: Vec<ProtocolKind>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            socks_port: DEFAULT_SOCKS_PORT,
            protocols: ProtocolKind::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineConfig {
    pub inbounds: Vec<Inbound>,
    pub outbounds: Vec<Outbound>,
}

impl EngineConfig {
    /// Two-space indented JSON, as handed to the engine.
    pub fn to_json_pretty(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Inbound {
    pub port: u16,
    pub protocol: String,
    pub sniffing: Sniffing,
    pub settings: SocksSettings,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sniffing {
    pub enabled: bool,
    pub dest_override: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SocksSettings {
    pub udp: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outbound {
    pub protocol: ProtocolKind,
    pub settings: OutboundSettings,
    pub stream_settings: StreamSettings,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OutboundSettings {
    VMess { vnext: Vec<VNext<VMessUser>> },
    VLess { vnext: Vec<VNext<VLessUser>> },
    Trojan { servers: Vec<TrojanServer> },
}

#[derive(Debug, Clone, Serialize)]
pub struct VNext<U> {
    pub address: String,
    pub port: u16,
    pub users: Vec<U>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VMessUser {
    pub id: String,
    pub alter_id: u32,
    pub security: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VLessUser {
    pub id: String,
    pub encryption: String,
    pub flow: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrojanServer {
    pub address: String,
    pub port: u16,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSettings {
    pub network: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_settings: Option<TcpSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_settings: Option<WsSettings>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TcpSettings {
    pub header: TcpHeader,
}

#[derive(Debug, Clone, Serialize)]
pub struct TcpHeader {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WsSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<WsHeaders>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WsHeaders {
    #[serde(rename = "Host")]
    pub host: String,
}

/// Build the engine config for one descriptor.
pub fn build(
    descriptor: &ProxyDescriptor,
    options: &BuildOptions,
) -> Result<EngineConfig, BuildError> {
    let kind = descriptor.kind();
    if !options.protocols.contains(&kind) {
        return Err(BuildError::UnknownProtocol(kind.to_string()));
    }

    let outbound = match &descriptor.fields {
        ProtocolFields::VMess(fields) => vmess_outbound(fields),
        ProtocolFields::VLess(fields) => vless_outbound(fields)?,
        ProtocolFields::Trojan(fields) => trojan_outbound(fields),
    };

    Ok(EngineConfig {
        inbounds: vec![socks_inbound(options.socks_port)],
        outbounds: vec![outbound],
    })
}

fn socks_inbound(port: u16) -> Inbound {
    Inbound {
        port,
        protocol: "socks".to_string(),
        sniffing: Sniffing {
            enabled: true,
            dest_override: vec!["http".to_string(), "tls".to_string()],
        },
        settings: SocksSettings { udp: true },
    }
}

fn vmess_outbound(fields: &VMessFields) -> Outbound {
    let mut stream = base_stream_settings(&fields.network, fields.tls);
    if fields.network == "ws" {
        stream.ws_settings = Some(WsSettings {
            path: fields.path.clone(),
            headers: fields.host.clone().map(|host| WsHeaders { host }),
        });
    }

    Outbound {
        protocol: ProtocolKind::VMess,
        settings: OutboundSettings::VMess {
            vnext: vec![VNext {
                address: fields.address.clone(),
                port: fields.port,
                users: vec![VMessUser {
                    id: fields.id.clone(),
                    alter_id: fields.alter_id,
                    security: "auto".to_string(),
                }],
            }],
        },
        stream_settings: stream,
    }
}

fn vless_outbound(fields: &VLessFields) -> Result<Outbound, BuildError> {
    if fields.password.is_some() {
        debug!("Ignoring vless password for {}:{}", fields.address, fields.port);
    }

    let tls = fields.security.as_deref() == Some("tls");
    let mut stream = base_stream_settings(&fields.network, tls);
    if fields.network == "ws" {
        let host = fields.host_header.clone().ok_or(BuildError::MissingHostHeader)?;
        stream.ws_settings = Some(WsSettings {
            path: fields.path.clone(),
            headers: Some(WsHeaders { host }),
        });
    }

    Ok(Outbound {
        protocol: ProtocolKind::VLess,
        settings: OutboundSettings::VLess {
            vnext: vec![VNext {
                address: fields.address.clone(),
                port: fields.port,
                users: vec![VLessUser {
                    id: fields.uuid.clone(),
                    encryption: "none".to_string(),
                    flow: fields.flow.clone(),
                }],
            }],
        },
        stream_settings: stream,
    })
}

fn trojan_outbound(fields: &TrojanFields) -> Outbound {
    Outbound {
        protocol: ProtocolKind::Trojan,
        settings: OutboundSettings::Trojan {
            servers: vec![TrojanServer {
                address: fields.address.clone(),
                port: fields.port,
                password: fields.password.clone(),
            }],
        },
        stream_settings: StreamSettings {
            network: "tcp".to_string(),
            security: Some("tls".to_string()),
            ..Default::default()
        },
    }
}

fn base_stream_settings(network: &str, tls: bool) -> StreamSettings {
    StreamSettings {
        network: network.to_string(),
        security: tls.then(|| "tls".to_string()),
        tcp_settings: (network == "tcp").then(|| TcpSettings {
            header: TcpHeader {
                kind: "none".to_string(),
            },
        }),
        ws_settings: None,
    }
}
