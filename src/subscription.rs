use anyhow::{Context, Result};
use base64::{Engine, prelude::BASE64_STANDARD};
use tracing::debug;

/// Read the candidate list from a local path, a `file://` URL or an http(s) URL.
pub async fn load_input(source: &str) -> Result<String> {
    let content = if source.starts_with("http://") || source.starts_with("https://") {
        fetch_remote(source).await?
    } else {
        let path = source.strip_prefix("file://").unwrap_or(source);
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read input file {}", path))?
    };

    Ok(decode_subscription(content))
}

async fn fetch_remote(url: &str) -> Result<String> {
    let response = reqwest::get(url)
        .await
        .with_context(|| format!("Failed to fetch {}", url))?;

    if !response.status().is_success() {
        return Err(anyhow::anyhow!("Failed to fetch {}: {}", url, response.status()));
    }

    Ok(response.text().await?)
}

/// Subscription bodies are often one base64 blob wrapping the link list.
pub fn decode_subscription(content: String) -> String {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() || !is_base64(&compact) {
        return content;
    }

    match BASE64_STANDARD.decode(&compact) {
        Ok(decoded) => match String::from_utf8(decoded) {
            Ok(text) if text.contains("://") => {
                debug!("Input was base64 encoded, decoded {} bytes", text.len());
                text
            }
            _ => content,
        },
        Err(_) => content,
    }
}

pub fn is_base64(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=')
        && s.len() % 4 == 0
}
