use crate::extensions::{ContextTakeoverMode, Extensions};
use crate::interceptor::InterceptorChain;
use crate::reconnect::ReconnectConfig;
use rustls::ServerConfig as RustlsConfig;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub web_socket_config: Option<WebSocketConfig>,
    pub tls_config: Option<Arc<RustlsConfig>>,
    pub interceptors: Option<InterceptorChain>,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub web_socket_config: WebSocketConfig,
    pub ca_file: Option<String>,
    pub additional_http_headers: Vec<(String, String)>,
    pub sec_websocket_protocol: Option<Vec<String>>,
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let mut web_socket_config = WebSocketConfig::default();
        web_socket_config.keep_alive_interval = Duration::from_secs(20);
        ClientConfig {
            web_socket_config,
            ca_file: None,
            additional_http_headers: Vec::new(),
            sec_websocket_protocol: None,
            reconnect: ReconnectConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub max_frame_size: Option<usize>,
    pub max_message_size: Option<usize>,
    pub extensions: Option<Extensions>,
    pub keep_alive_interval: Duration,
    pub supported_sub_protocols: Option<Vec<String>>,
    pub include_exception_in_close_response: bool,
    /// This endpoint's policy for negotiating the client-direction
    /// `no_context_takeover` request during the handshake.
    pub client_context_takeover: ContextTakeoverMode,
    /// This endpoint's policy for negotiating the server-direction
    /// `no_context_takeover` request during the handshake.
    pub server_context_takeover: ContextTakeoverMode,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            max_message_size: Some(64 << 20),
            max_frame_size: Some(16 << 20),
            extensions: None,
            keep_alive_interval: Duration::from_secs(60),
            supported_sub_protocols: None,
            include_exception_in_close_response: false,
            client_context_takeover: ContextTakeoverMode::Allow,
            server_context_takeover: ContextTakeoverMode::Allow,
        }
    }
}
