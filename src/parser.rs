use base64::Engine;
use base64::engine::GeneralPurpose;
use base64::engine::general_purpose::{
    STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD,
};
use serde::Deserialize;
use tracing::trace;

use crate::descriptor::{
    ProtocolFields, ProxyDescriptor, TrojanFields, VLessFields, VMessFields,
};
use crate::error::ParseError;

const VMESS_PREFIX: &str = "vmess://";
const VLESS_PREFIX: &str = "vless://";
const TROJAN_PREFIX: &str = "trojan://";

/// Port used when a vless/trojan link has no `:port`.
pub const DEFAULT_PORT: u16 = 443;

/// Share links out there use every base64 flavour, standard first.
const BASE64_ENGINES: [&GeneralPurpose; 4] =
    [&STANDARD, &STANDARD_NO_PAD, &URL_SAFE, &URL_SAFE_NO_PAD];

/// Parse one input line into a descriptor.
pub fn parse(raw: &str) -> Result<ProxyDescriptor, ParseError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ParseError::Empty);
    }

    let (fields, remark) = if let Some(rest) = raw.strip_prefix(VMESS_PREFIX) {
        parse_vmess(rest)?
    } else if let Some(rest) = raw.strip_prefix(VLESS_PREFIX) {
        parse_vless(rest)?
    } else if let Some(rest) = raw.strip_prefix(TROJAN_PREFIX) {
        parse_trojan(rest)?
    } else {
        let scheme = raw.split_once("://").map(|(scheme, _)| scheme).unwrap_or(raw);
        return Err(ParseError::UnsupportedScheme(scheme.chars().take(32).collect()));
    };

    Ok(ProxyDescriptor {
        raw: raw.to_string(),
        remark,
        fields,
    })
}

// ======================= VMess =======================

/// The JSON object carried inside a vmess:// link.
#[derive(Deserialize, Debug)]
struct VMessJson {
    #[serde(default, deserialize_with = "deserialize_text")]
    ps: Option<String>,
    add: String,
    #[serde(deserialize_with = "deserialize_port")]
    port: u16,
    id: String,
    #[serde(default, deserialize_with = "deserialize_alter_id")]
    aid: u32,
    #[serde(default, deserialize_with = "deserialize_text")]
    net: Option<String>,
    #[serde(default, deserialize_with = "deserialize_text")]
    tls: Option<String>,
    #[serde(default, deserialize_with = "deserialize_text")]
    host: Option<String>,
    #[serde(default, deserialize_with = "deserialize_text")]
    path: Option<String>,
}

fn parse_vmess(payload: &str) -> Result<(ProtocolFields, Option<String>), ParseError> {
    let decoded = decode_base64(payload)?;
    let text = String::from_utf8(decoded).map_err(|e| ParseError::JsonError(e.to_string()))?;
    trace!("Decoded vmess payload: {}", text);

    let json: VMessJson =
        serde_json::from_str(&text).map_err(|e| ParseError::JsonError(e.to_string()))?;
    if json.add.is_empty() {
        return Err(ParseError::JsonError("missing server address".into()));
    }
    if json.id.is_empty() {
        return Err(ParseError::JsonError("missing user id".into()));
    }

    let fields = VMessFields {
        address: json.add,
        port: json.port,
        id: json.id,
        alter_id: json.aid,
        network: non_empty(json.net).unwrap_or_else(|| "tcp".to_string()),
        tls: json.tls.as_deref() == Some("tls"),
        host: non_empty(json.host),
        path: non_empty(json.path),
    };

    Ok((ProtocolFields::VMess(fields), non_empty(json.ps)))
}

fn decode_base64(payload: &str) -> Result<Vec<u8>, ParseError> {
    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let mut last_error = None;
    for engine in BASE64_ENGINES {
        match engine.decode(&cleaned) {
            Ok(decoded) => return Ok(decoded),
            Err(e) => last_error = Some(e),
        }
    }
    Err(ParseError::Base64Error(
        last_error.map(|e| e.to_string()).unwrap_or_default(),
    ))
}

/// vmess links carry the port as either a number or a numeric string.
fn deserialize_port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortValue {
        Number(u16),
        String(String),
    }

    match PortValue::deserialize(deserializer)? {
        PortValue::Number(n) => Ok(n),
        PortValue::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn deserialize_alter_id<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum AlterIdValue {
        Number(u32),
        String(String),
    }

    match Option::<AlterIdValue>::deserialize(deserializer)? {
        Some(AlterIdValue::Number(n)) => Ok(n),
        Some(AlterIdValue::String(s)) if s.trim().is_empty() => Ok(0),
        Some(AlterIdValue::String(s)) => s.trim().parse().map_err(serde::de::Error::custom),
        None => Ok(0),
    }
}

/// Optional vmess fields are only meaningful as strings; anything else is absent.
fn deserialize_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        _ => Ok(None),
    }
}

// ======================= VLess =======================

#[derive(Default)]
struct VLessParams {
    security: Option<String>,
    network: Option<String>,
    path: Option<String>,
    host: Option<String>,
    flow: Option<String>,
}

fn parse_vless(rest: &str) -> Result<(ProtocolFields, Option<String>), ParseError> {
    let (userinfo, location) = rest
        .split_once('@')
        .ok_or_else(|| ParseError::MalformedUri("vless link has no '@'".into()))?;
    let (location, remark) = split_remark(location);
    let (hostport, query) = match location.split_once('?') {
        Some((hostport, query)) => (hostport, Some(query)),
        None => (location, None),
    };

    let (uuid, password) = match userinfo.split_once(':') {
        Some((uuid, password)) => (uuid, non_empty(Some(password.to_string()))),
        None => (userinfo, None),
    };
    if uuid.is_empty() {
        return Err(ParseError::MalformedUri("vless link has no uuid".into()));
    }

    let (address, port) = split_host_port(hostport)?;
    let params = query.map(parse_vless_query).unwrap_or_default();

    let fields = VLessFields {
        uuid: uuid.to_string(),
        password,
        address,
        port,
        security: params.security,
        network: params.network.unwrap_or_else(|| "tcp".to_string()),
        path: params.path,
        host_header: params.host,
        flow: params.flow.unwrap_or_default(),
    };

    Ok((ProtocolFields::VLess(fields), remark))
}

fn parse_vless_query(query: &str) -> VLessParams {
    let mut params = VLessParams::default();
    for pair in query.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let value = non_empty(Some(decode_component(value)));
        match key {
            "security" => params.security = value,
            "type" => params.network = value,
            "path" => params.path = value,
            "host" => params.host = value,
            "flow" => params.flow = value,
            _ => trace!("Ignoring vless query key {:?}", key),
        }
    }
    params
}

// ======================= Trojan =======================

fn parse_trojan(rest: &str) -> Result<(ProtocolFields, Option<String>), ParseError> {
    let (password, location) = rest
        .split_once('@')
        .ok_or_else(|| ParseError::MalformedUri("trojan link has no '@'".into()))?;
    let (location, remark) = split_remark(location);
    if password.is_empty() {
        return Err(ParseError::MalformedUri("trojan link has no password".into()));
    }

    // Trojan stream settings are fixed, so query parameters carry nothing we use.
    let hostport = location
        .split_once('?')
        .map(|(hostport, _)| hostport)
        .unwrap_or(location);
    let (address, port) = split_host_port(hostport)?;

    let fields = TrojanFields {
        password: password.to_string(),
        address,
        port,
    };

    Ok((ProtocolFields::Trojan(fields), remark))
}

// ======================= Helpers =======================

/// Split `host:port` on the last colon, `[v6]:port` on the bracket.
fn split_host_port(hostport: &str) -> Result<(String, u16), ParseError> {
    let (host, port) = if let Some(bracketed) = hostport.strip_prefix('[') {
        let (host, after) = bracketed.split_once(']').ok_or_else(|| {
            ParseError::MalformedUri(format!("unterminated IPv6 literal in {:?}", hostport))
        })?;
        match after.strip_prefix(':') {
            Some(port) => (host, Some(port)),
            None if after.is_empty() => (host, None),
            None => {
                return Err(ParseError::MalformedUri(format!(
                    "unexpected text after IPv6 literal in {:?}",
                    hostport
                )));
            }
        }
    } else {
        match hostport.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (hostport, None),
        }
    };

    if host.is_empty() {
        return Err(ParseError::MalformedUri(format!("missing host in {:?}", hostport)));
    }

    let port = match port {
        Some(port) => port
            .parse::<u16>()
            .map_err(|_| ParseError::MalformedUri(format!("invalid port {:?}", port)))?,
        None => DEFAULT_PORT,
    };

    Ok((host.to_string(), port))
}

fn split_remark(rest: &str) -> (&str, Option<String>) {
    match rest.split_once('#') {
        Some((body, tag)) => (body, non_empty(Some(decode_component(tag)))),
        None => (rest, None),
    }
}

fn decode_component(value: &str) -> String {
    urlencoding::decode(value)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
