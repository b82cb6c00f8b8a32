use crate::error::Error;
use crate::extensions::{format_extension_header, Extensions};
use crate::http::{self, HeaderMap};
use tokio::io::AsyncRead;
use url::Url;

/// Parses a `ws://`/`wss://` URL and assembles the headers for the client's
/// Upgrade request. Returns `(headers, request_path, host_with_port, host,
/// use_tls)` — the caller still needs `host_with_port` to open the TCP
/// connection and `use_tls` to decide whether to wrap it.
pub fn construct_http_request(
    ws_url: &str,
    key: &str,
    extensions: Option<Extensions>,
    sec_websocket_protocol: Option<&[String]>,
    additional_headers: &[(String, String)],
) -> Result<(HeaderMap, String, String, String, bool), Error> {
    let parsed_url = Url::parse(ws_url)?;
    let mut use_tls = false;

    let http_port: u16 = match parsed_url.scheme() {
        "ws" => 80,
        "wss" => {
            use_tls = true;
            443
        }
        _ => return Err(Error::InvalidSchemeURL),
    };

    let host = parsed_url.host_str().ok_or(Error::URLNoHost)?;
    let port = parsed_url.port().unwrap_or(http_port);

    let request_host_field = match parsed_url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => String::from(host),
    };

    let host_with_port = format!("{}:{}", host, port);

    let request_path = match parsed_url.query() {
        Some(query) => format!("{}?{}", parsed_url.path(), query),
        None => parsed_url.path().to_string(),
    };

    let mut headers = HeaderMap::new();
    headers.insert("Host", request_host_field);
    headers.insert("Connection", "Upgrade");
    headers.insert("Upgrade", "websocket");
    headers.insert("Sec-WebSocket-Key", key);
    headers.insert("Sec-WebSocket-Version", "13");

    if let Some(value) = extensions.and_then(|ext| format_extension_header(&ext)) {
        headers.insert("Sec-WebSocket-Extensions", value);
    }

    if let Some(protocols) = sec_websocket_protocol {
        if !protocols.is_empty() {
            headers.insert("Sec-WebSocket-Protocol", protocols.join(", "));
        }
    }

    for (name, value) in additional_headers {
        headers.insert(name, value.clone());
    }

    Ok((headers, request_path, host_with_port, host.to_string(), use_tls))
}

#[derive(Debug)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub version: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Returns the parsed request alongside any bytes the underlying read
    /// pulled in past the header terminator, so the caller can hand them to
    /// whatever reads the body/frames next instead of discarding them.
    pub async fn parse_http_request<R: AsyncRead + Unpin>(
        reader: &mut R,
    ) -> Result<(HttpRequest, Vec<u8>), Error> {
        let (raw, leftover) = http::read_until_headers_end(reader).await?;
        let (first_line, headers) = http::parse_headers(&raw)?;

        let method = first_line.method.ok_or(Error::InvalidHTTPHandshake)?;

        Ok((
            HttpRequest {
                method,
                path: first_line.target,
                version: "HTTP/1.1".to_string(),
                headers,
                body: Vec::new(),
            },
            leftover,
        ))
    }

    /// Parses the first match, in client-preference order, against the
    /// server's configured supported sub-protocols from a comma-separated
    /// `Sec-WebSocket-Protocol` header value.
    pub fn negotiate_sub_protocol(&self, supported: &[String]) -> Option<String> {
        let requested = self.headers.get("sec-websocket-protocol")?;
        requested
            .split(',')
            .map(|p| p.trim().trim_matches('"'))
            .find(|candidate| supported.iter().any(|s| s == candidate))
            .map(|s| s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructs_valid_request_headers() {
        let (headers, path, host_with_port, host, use_tls) =
            construct_http_request("ws://localhost:8080/chat", "dGhlIHNhbXBsZSBub25jZQ==", None, None, &[])
                .unwrap();
        assert_eq!(host_with_port, "localhost:8080");
        assert_eq!(host, "localhost");
        assert!(!use_tls);
        assert_eq!(path, "/chat");
        assert_eq!(headers.get("upgrade"), Some("websocket"));
        assert_eq!(
            headers.get("sec-websocket-key"),
            Some("dGhlIHNhbXBsZSBub25jZQ==")
        );
    }

    #[test]
    fn wss_scheme_sets_tls_and_default_port() {
        let (_, _, host_with_port, _, use_tls) =
            construct_http_request("wss://example.com/", "key", None, None, &[]).unwrap();
        assert!(use_tls);
        assert_eq!(host_with_port, "example.com:443");
    }

    #[test]
    fn rejects_non_websocket_scheme() {
        let result = construct_http_request("ftp://localhost:8080", "key", None, None, &[]);
        assert!(matches!(result, Err(Error::InvalidSchemeURL)));
    }

    #[tokio::test]
    async fn parses_request_line_and_headers() {
        let raw = b"GET /chat HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\n\r\n";
        let mut cursor = std::io::Cursor::new(raw.to_vec());
        let (request, leftover) = HttpRequest::parse_http_request(&mut cursor).await.unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/chat");
        assert_eq!(request.headers.get("upgrade"), Some("websocket"));
        assert!(leftover.is_empty());
    }

    #[test]
    fn negotiates_first_supported_sub_protocol() {
        let mut headers = HeaderMap::new();
        headers.insert("Sec-WebSocket-Protocol", "chatv2, chat");
        let request = HttpRequest {
            method: "GET".to_string(),
            path: "/".to_string(),
            version: "HTTP/1.1".to_string(),
            headers,
            body: Vec::new(),
        };
        let supported = vec!["chat".to_string()];
        assert_eq!(
            request.negotiate_sub_protocol(&supported),
            Some("chat".to_string())
        );
    }
}
