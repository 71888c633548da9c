//! Canonical descriptor fingerprint used as the cache identity.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use tether_domain::config::McpServerConfig;

/// Hex SHA-256 over name, transport kind, url and key-sorted headers.
///
/// Every field is length-prefixed, so no two descriptors share an encoding.
/// Header insertion order never changes the result; any change to a value
/// does. The server id is the cache key and is deliberately not part of it.
pub fn signature(config: &McpServerConfig) -> String {
    let transport = &config.transport;
    let headers: BTreeMap<&str, &str> = transport
        .headers
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    let mut hasher = Sha256::new();
    match config.name.as_deref() {
        Some(name) => {
            hasher.update([1u8]);
            field(&mut hasher, name);
        }
        None => hasher.update([0u8]),
    }
    field(&mut hasher, transport.kind.as_str());
    field(&mut hasher, &transport.url);
    hasher.update((headers.len() as u64).to_le_bytes());
    for (name, value) in headers {
        field(&mut hasher, name);
        field(&mut hasher, value);
    }
    format!("{:x}", hasher.finalize())
}

fn field(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

#[cfg(test)]
mod tests {
    use tether_domain::config::McpTransportConfig;

    use super::*;

    fn server(transport: McpTransportConfig) -> McpServerConfig {
        McpServerConfig::new("weather", transport)
    }

    #[test]
    fn header_order_does_not_matter() {
        let a = server(
            McpTransportConfig::sse("http://x/sse")
                .with_header("A", "1")
                .with_header("B", "2"),
        );
        let b = server(
            McpTransportConfig::sse("http://x/sse")
                .with_header("B", "2")
                .with_header("A", "1"),
        );
        assert_eq!(signature(&a), signature(&b));
        assert_eq!(signature(&a).len(), 64);
    }

    #[test]
    fn any_transport_change_is_visible() {
        let base = server(McpTransportConfig::sse("http://x/sse").with_header("A", "1"));
        let url = server(McpTransportConfig::sse("http://y/sse").with_header("A", "1"));
        let header = server(McpTransportConfig::sse("http://x/sse").with_header("A", "2"));
        let kind = server(McpTransportConfig::streamable_http("http://x/sse").with_header("A", "1"));
        let mut named = base.clone();
        named.name = Some("Weather".into());

        let sig = signature(&base);
        for other in [url, header, kind, named] {
            assert_ne!(sig, signature(&other));
        }
    }

    #[test]
    fn field_boundaries_are_part_of_the_identity() {
        let split_a = server(McpTransportConfig::sse("http://x/sse").with_header("ab", "c"));
        let split_b = server(McpTransportConfig::sse("http://x/sse").with_header("a", "bc"));
        assert_ne!(signature(&split_a), signature(&split_b));

        let unnamed = server(McpTransportConfig::sse("http://x/sse"));
        let mut empty_name = unnamed.clone();
        empty_name.name = Some(String::new());
        assert_ne!(signature(&unnamed), signature(&empty_name));
    }
}
