use crate::error::Error;

const PERMESSAGE_DEFLATE: &str = "permessage-deflate";
const CLIENT_NO_CONTEXT_TAKEOVER: &str = "client_no_context_takeover";
const SERVER_NO_CONTEXT_TAKEOVER: &str = "server_no_context_takeover";
const CLIENT_MAX_WINDOW_BITS: &str = "client_max_window_bits";
const SERVER_MAX_WINDOW_BITS: &str = "server_max_window_bits";

/// It's important to enhance that some compression extensions,
/// in some cases affects compression and
/// decompression(client_no_context_takeover, server_no_context_takeover),
/// while another one affects only compression(client_max_window_bits, server_max_window_bits).
/// Keeping the context between compression and decompression,
/// improves performance but adds more overhead, consuming more memory.
/// Larger window sizes (closer to 15)
/// result in better compression ratios but are slower and use more memory.
/// Smaller window sizes (closer to 8) offer faster performance but with worse compression.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extensions {
    /// Dictates if compression is enabled
    pub permessage_deflate: bool,
    /// Asks that the client should reset its compression context after compressing a message,
    /// if accepted by the server,
    /// the server must reset the compression context when decompressing each message.
    /// Bear in mind
    /// that this option is related to resetting the context when the client compresses,
    /// and when the server decompresses.
    /// The opposite is not valid.
    pub client_no_context_takeover: Option<bool>,
    /// Asks that the server should reset its compression context after compressing a message,
    /// if a client asks this, and the server accepts,
    /// the client must reset the compression context when decompressing each message.
    /// Bear in mind
    /// that this option is related to resetting the context when the server compresses,
    /// and when the client decompresses.
    /// The opposite is not valid.
    pub server_no_context_takeover: Option<bool>,
    /// Asks that the client sets its compression window to a specific number.
    pub client_max_window_bits: Option<u8>,
    /// Asks that the server sets its compression window to a specific number.
    pub server_max_window_bits: Option<u8>,
}

/// Per-direction policy for negotiating `*_no_context_takeover`, configured
/// independently of the `Extensions` payload itself since it governs how a
/// *request* from the peer is answered rather than what this endpoint offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextTakeoverMode {
    /// Grant the peer's request as-is; this is the RFC 7692 default.
    #[default]
    Allow,
    /// Always negotiate `no_context_takeover`, whether or not the peer asked.
    Prefer,
    /// Never negotiate `no_context_takeover`; a peer that requires it fails
    /// the handshake instead of silently being downgraded.
    DontAllow,
}

fn negotiate_context_takeover(
    peer_requested: Option<bool>,
    mode: ContextTakeoverMode,
) -> Result<Option<bool>, Error> {
    match mode {
        ContextTakeoverMode::Prefer => Ok(Some(true)),
        ContextTakeoverMode::DontAllow => {
            if peer_requested == Some(true) {
                Err(Error::ExtensionNotNegotiable(
                    "peer requires no_context_takeover but this endpoint does not allow it"
                        .to_string(),
                ))
            } else {
                Ok(None)
            }
        }
        ContextTakeoverMode::Allow => Ok(peer_requested),
    }
}

// In first stage server will accept all the client extension configs, and
// will reply the handshake request with everything that came from client
// on a second stage, the end-user will set the default extension settings when calling
// accept_async_with_config, and the server will read the client settings from the handshake
// and will merge with the default settings, prioritizing what is default
pub fn parse_extensions(extensions_header_value: String) -> Option<Extensions> {
    let extensions_str = extensions_header_value.split(';');
    let mut extensions = Extensions::default();

    for extension_str in extensions_str.into_iter() {
        if extension_str.trim() == PERMESSAGE_DEFLATE {
            extensions.permessage_deflate = true;
        } else if extension_str.trim().starts_with(CLIENT_NO_CONTEXT_TAKEOVER) {
            extensions.client_no_context_takeover = Some(true);
        } else if extension_str.trim().starts_with(SERVER_NO_CONTEXT_TAKEOVER) {
            extensions.server_no_context_takeover = Some(true);
        } else if extension_str.trim().starts_with(CLIENT_MAX_WINDOW_BITS) {
            if !extension_str.contains('=') {
                extensions.client_max_window_bits = Some(15);
            } else {
                extensions.client_max_window_bits =
                    extension_str.trim().split('=').last()?.parse::<u8>().ok();
            }
        } else if extension_str.trim().starts_with(SERVER_MAX_WINDOW_BITS) {
            if !extension_str.contains('=') {
                extensions.server_max_window_bits = Some(15);
            } else {
                extensions.server_max_window_bits =
                    extension_str.trim().split('=').last()?.parse::<u8>().ok();
            }
        }
    }
    if !extensions.permessage_deflate {
        return None;
    }

    Some(extensions)
}

/// Merges the server's configured extension preferences with what the client
/// requested. `client_context_takeover`/`server_context_takeover` are this
/// endpoint's policy for each direction's `no_context_takeover` request; a
/// `DontAllow` policy rejects the merge (`Err`) rather than silently dropping
/// the client's request when the client actually requires it.
pub fn merge_extensions(
    server_extensions: Option<Extensions>,
    client_extensions: Option<Extensions>,
    client_context_takeover: ContextTakeoverMode,
    server_context_takeover: ContextTakeoverMode,
) -> Result<Option<Extensions>, Error> {
    let server_ext = match server_extensions {
        Some(ext) => ext,
        None => return Ok(None),
    };
    let client_ext = match client_extensions {
        Some(ext) => ext,
        None => return Ok(None),
    };

    let client_no_context_takeover = negotiate_context_takeover(
        client_ext.client_no_context_takeover,
        client_context_takeover,
    )?;
    let server_no_context_takeover = negotiate_context_takeover(
        client_ext.server_no_context_takeover,
        server_context_takeover,
    )?;

    let merged_extensions = Extensions {
        permessage_deflate: client_ext.permessage_deflate && server_ext.permessage_deflate,
        client_no_context_takeover,
        server_no_context_takeover,
        client_max_window_bits: match (
            server_ext.client_max_window_bits,
            client_ext.client_max_window_bits,
        ) {
            (Some(server_bits), Some(client_bits)) => Some(std::cmp::min(server_bits, client_bits)),
            (Some(server_bits), None) => Some(server_bits),
            (None, Some(client_bits)) => Some(client_bits),
            (None, None) => None,
        },
        server_max_window_bits: match (
            server_ext.server_max_window_bits,
            client_ext.server_max_window_bits,
        ) {
            (Some(server_bits), Some(client_bits)) => Some(std::cmp::min(server_bits, client_bits)),
            (Some(server_bits), None) => Some(server_bits),
            (None, Some(client_bits)) => Some(client_bits),
            (None, None) => None,
        },
    };
    Ok(Some(merged_extensions))
}

/// Renders the `Sec-WebSocket-Extensions` header *value* (no header name, no
/// trailing CRLF) for a negotiated extension set, for use by the server
/// handshake driver, which emits headers through `HeaderMap` rather than by
/// concatenating a raw request string.
pub fn format_extension_header(extensions: &Extensions) -> Option<String> {
    if !extensions.permessage_deflate {
        return None;
    }
    let mut value = String::from(PERMESSAGE_DEFLATE);
    if let Some(true) = extensions.client_no_context_takeover {
        value.push_str(&format!("; {}", CLIENT_NO_CONTEXT_TAKEOVER));
    }
    if let Some(true) = extensions.server_no_context_takeover {
        value.push_str(&format!("; {}", SERVER_NO_CONTEXT_TAKEOVER));
    }
    if let Some(bits) = extensions.client_max_window_bits {
        value.push_str(&format!("; {}={}", CLIENT_MAX_WINDOW_BITS, bits));
    }
    if let Some(bits) = extensions.server_max_window_bits {
        value.push_str(&format!("; {}={}", SERVER_MAX_WINDOW_BITS, bits));
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_extensions_reads_permessage_deflate_and_params() {
        let header = "permessage-deflate; client_no_context_takeover; server_max_window_bits=10";
        let extensions = parse_extensions(header.to_string()).unwrap();
        assert!(extensions.permessage_deflate);
        assert_eq!(extensions.client_no_context_takeover, Some(true));
        assert_eq!(extensions.server_max_window_bits, Some(10));
        assert_eq!(extensions.server_no_context_takeover, None);
    }

    #[test]
    fn parse_extensions_without_permessage_deflate_is_none() {
        assert!(parse_extensions("client_no_context_takeover".to_string()).is_none());
    }

    #[test]
    fn merge_extensions_requires_both_sides_to_request_deflate() {
        let server = Extensions {
            permessage_deflate: true,
            ..Default::default()
        };
        assert!(merge_extensions(
            Some(server.clone()),
            None,
            ContextTakeoverMode::Allow,
            ContextTakeoverMode::Allow
        )
        .unwrap()
        .is_none());
        assert!(merge_extensions(
            None,
            Some(server.clone()),
            ContextTakeoverMode::Allow,
            ContextTakeoverMode::Allow
        )
        .unwrap()
        .is_none());

        let client = Extensions {
            permessage_deflate: false,
            ..Default::default()
        };
        let merged = merge_extensions(
            Some(server),
            Some(client),
            ContextTakeoverMode::Allow,
            ContextTakeoverMode::Allow,
        )
        .unwrap()
        .unwrap();
        assert!(!merged.permessage_deflate);
    }

    #[test]
    fn merge_extensions_picks_the_narrower_window() {
        let server = Extensions {
            permessage_deflate: true,
            client_max_window_bits: Some(15),
            ..Default::default()
        };
        let client = Extensions {
            permessage_deflate: true,
            client_max_window_bits: Some(9),
            ..Default::default()
        };
        let merged = merge_extensions(
            Some(server),
            Some(client),
            ContextTakeoverMode::Allow,
            ContextTakeoverMode::Allow,
        )
        .unwrap()
        .unwrap();
        assert_eq!(merged.client_max_window_bits, Some(9));
    }

    #[test]
    fn merge_extensions_allow_grants_requested_context_takeover() {
        let server = Extensions {
            permessage_deflate: true,
            ..Default::default()
        };
        let client = Extensions {
            permessage_deflate: true,
            client_no_context_takeover: Some(true),
            ..Default::default()
        };
        let merged = merge_extensions(
            Some(server),
            Some(client),
            ContextTakeoverMode::Allow,
            ContextTakeoverMode::Allow,
        )
        .unwrap()
        .unwrap();
        assert_eq!(merged.client_no_context_takeover, Some(true));
    }

    #[test]
    fn merge_extensions_dont_allow_rejects_a_required_no_context_takeover() {
        let server = Extensions {
            permessage_deflate: true,
            ..Default::default()
        };
        let client = Extensions {
            permessage_deflate: true,
            server_no_context_takeover: Some(true),
            ..Default::default()
        };
        let result = merge_extensions(
            Some(server),
            Some(client),
            ContextTakeoverMode::Allow,
            ContextTakeoverMode::DontAllow,
        );
        assert!(matches!(result, Err(Error::ExtensionNotNegotiable(_))));
    }

    #[test]
    fn merge_extensions_prefer_always_requests_no_context_takeover() {
        let server = Extensions {
            permessage_deflate: true,
            ..Default::default()
        };
        let client = Extensions {
            permessage_deflate: true,
            ..Default::default()
        };
        let merged = merge_extensions(
            Some(server),
            Some(client),
            ContextTakeoverMode::Prefer,
            ContextTakeoverMode::Allow,
        )
        .unwrap()
        .unwrap();
        assert_eq!(merged.client_no_context_takeover, Some(true));
    }

    #[test]
    fn format_extension_header_round_trips_through_parse() {
        let extensions = Extensions {
            permessage_deflate: true,
            server_no_context_takeover: Some(true),
            client_max_window_bits: Some(12),
            ..Default::default()
        };
        let rendered = format_extension_header(&extensions).unwrap();
        let parsed = parse_extensions(rendered).unwrap();
        assert_eq!(parsed.permessage_deflate, extensions.permessage_deflate);
        assert_eq!(
            parsed.server_no_context_takeover,
            extensions.server_no_context_takeover
        );
        assert_eq!(parsed.client_max_window_bits, extensions.client_max_window_bits);
    }
}
