//! MCP configuration types, re-exported from `tether-domain`.
//!
//! The canonical definitions live in `tether_domain::config` so that host
//! applications can deserialize them without depending on this crate.

pub use tether_domain::config::{
    CircuitBreakerConfig, McpConfig, McpLifecycleConfig, McpServerConfig, McpTransportConfig,
    McpTransportKind, RetryConfig,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_defaults() {
        let cfg: McpConfig = serde_json::from_str("{}").unwrap();
        assert!(cfg.servers.is_empty());
        assert_eq!(cfg.lifecycle.retry, RetryConfig::default());
    }

    #[test]
    fn deserialize_json_descriptor() {
        let raw = r#"{
            "id": "weather",
            "name": "Weather",
            "transport": {
                "kind": "streamable-http",
                "url": "https://tools.example.com/mcp",
                "headers": { "Authorization": "Bearer t" }
            }
        }"#;
        let cfg: McpServerConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.id, "weather");
        assert_eq!(cfg.name.as_deref(), Some("Weather"));
        assert_eq!(cfg.transport.kind, McpTransportKind::StreamableHttp);
        assert_eq!(cfg.transport.headers["Authorization"], "Bearer t");
    }

    #[test]
    fn headers_are_optional() {
        let raw = r#"{ "id": "remote", "transport": { "kind": "sse", "url": "http://localhost:8080/sse" } }"#;
        let cfg: McpServerConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.transport, McpTransportConfig::sse("http://localhost:8080/sse"));
    }

    #[test]
    fn unknown_kind_is_kept_for_later_rejection() {
        let raw = r#"{ "id": "local", "transport": { "kind": "stdio", "url": "" } }"#;
        let cfg: McpServerConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.transport.kind, McpTransportKind::Unsupported);
    }
}
