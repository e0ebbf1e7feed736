//! Connection settings for the chat server.

/// Production chat server endpoint.
pub const DEFAULT_ENDPOINT: &str = "wss://api.leetcode.se";
/// Sub-path the production server mounts its Socket.IO handler on.
pub const DEFAULT_PATH: &str = "/sys25d";
/// Local development endpoint.
pub const LOCAL_ENDPOINT: &str = "ws://localhost:3000";

const SOCKET_IO_PATH: &str = "socket.io";
const ENGINE_IO_QUERY: &str = "EIO=4&transport=websocket";

/// Where and how to reach the chat server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatConfig {
    path: String,
    local: bool,
    endpoint_override: Option<String>,
}

impl ChatConfig {
    /// Creates a config pointing at the production endpoint and path.
    pub fn new() -> Self {
        Self {
            path: DEFAULT_PATH.to_string(),
            local: false,
            endpoint_override: None,
        }
    }

    /// Enables or disables local mode endpoint routing.
    pub fn with_local_mode(mut self, local: bool) -> Self {
        self.local = local;
        self
    }

    /// Sets an explicit endpoint override.
    ///
    /// The override takes precedence over local mode when set.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        self.endpoint_override = Some(endpoint.trim().trim_end_matches('/').to_string());
        self
    }

    /// Sets the server sub-path. An empty path selects the stock `socket.io` path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn endpoint(&self) -> &str {
        if let Some(endpoint) = self.endpoint_override.as_deref() {
            return endpoint;
        }
        if self.local {
            LOCAL_ENDPOINT
        } else {
            DEFAULT_ENDPOINT
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Websocket URL for the Engine.IO v4 websocket transport.
    pub fn socket_url(&self) -> String {
        let path = match self.path.trim().trim_matches('/') {
            "" => SOCKET_IO_PATH,
            path => path,
        };
        format!("{}/{path}/?{ENGINE_IO_QUERY}", self.endpoint())
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{ChatConfig, DEFAULT_ENDPOINT, LOCAL_ENDPOINT};

    #[test]
    fn uses_production_endpoint_by_default() {
        let config = ChatConfig::new();
        assert_eq!(config.endpoint(), DEFAULT_ENDPOINT);
        assert_eq!(
            config.socket_url(),
            "wss://api.leetcode.se/sys25d/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn uses_local_endpoint_when_enabled() {
        let config = ChatConfig::new().with_local_mode(true);
        assert_eq!(config.endpoint(), LOCAL_ENDPOINT);
    }

    #[test]
    fn endpoint_override_takes_precedence() {
        let config = ChatConfig::new()
            .with_local_mode(true)
            .with_endpoint("ws://127.0.0.1:4000/  \n");
        assert_eq!(config.endpoint(), "ws://127.0.0.1:4000");
    }

    #[test]
    fn empty_path_falls_back_to_socket_io() {
        let config = ChatConfig::new()
            .with_endpoint("ws://127.0.0.1:4000")
            .with_path("");
        assert_eq!(
            config.socket_url(),
            "ws://127.0.0.1:4000/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn path_slashes_are_normalized() {
        let config = ChatConfig::new().with_path("chat/");
        assert_eq!(
            config.socket_url(),
            "wss://api.leetcode.se/chat/?EIO=4&transport=websocket"
        );
    }
}
