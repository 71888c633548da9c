use serde::Serialize;

/// Structured trace events emitted by the MCP client lifecycle.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    McpClientCreated {
        server_id: String,
        transport: String,
        duration_ms: u64,
    },
    McpClientCreateFailed {
        server_id: String,
        code: String,
        recoverable: bool,
        message: String,
    },
    McpClientClosed {
        server_id: String,
        reason: String,
    },
    McpCircuitTransition {
        server_id: String,
        from: String,
        to: String,
        failure_count: u32,
    },
    McpHealthChecked {
        server_id: String,
        healthy: bool,
        latency_ms: Option<u64>,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "tether_event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_event_tag() {
        let ev = TraceEvent::McpCircuitTransition {
            server_id: "weather".into(),
            from: "closed".into(),
            to: "open".into(),
            failure_count: 5,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "McpCircuitTransition");
        assert_eq!(json["server_id"], "weather");
        assert_eq!(json["failure_count"], 5);
    }
}
