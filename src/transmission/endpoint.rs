//! Transmission RPC endpoint parsing.

use super::TransmissionError;
use reqwest::Url;

/// Default Transmission RPC port
pub const DEFAULT_RPC_PORT: u16 = 9091;
/// Default Transmission RPC path
pub const DEFAULT_RPC_PATH: &str = "/transmission/rpc";

/// Fully resolved RPC endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcEndpoint {
    url: Url,
}

impl RpcEndpoint {
    /// Parse a user-supplied endpoint.
    ///
    /// Accepts bare hosts (`192.168.1.2`, `nas.local:9091`) as well as full
    /// URLs. Missing scheme means `http`, missing port means 9091 and a
    /// missing path means `/transmission/rpc`.
    ///
    /// # Errors
    ///
    /// Returns [`TransmissionError::InvalidEndpoint`] if the value is not a usable URL.
    pub fn parse(raw: &str) -> Result<Self, TransmissionError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(TransmissionError::InvalidEndpoint("empty URL".to_string()));
        }

        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("http://{raw}")
        };

        let mut url = Url::parse(&with_scheme)
            .map_err(|e| TransmissionError::InvalidEndpoint(format!("{raw}: {e}")))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(TransmissionError::InvalidEndpoint(format!(
                "unsupported scheme {}",
                url.scheme()
            )));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(TransmissionError::InvalidEndpoint(format!("{raw}: missing host")));
        }

        // An explicit default port (80/443) is dropped by the parser, so only
        // fill in 9091 when the user wrote no port at all.
        if url.port().is_none() && !has_explicit_port(raw) {
            url.set_port(Some(DEFAULT_RPC_PORT)).map_err(|()| {
                TransmissionError::InvalidEndpoint(format!("{raw}: cannot set port"))
            })?;
        }

        let path = url.path().trim_matches('/').to_string();
        if path.is_empty() {
            url.set_path(DEFAULT_RPC_PATH);
        } else {
            url.set_path(&format!("/{path}"));
        }
        url.set_query(None);
        url.set_fragment(None);

        Ok(Self { url })
    }

    /// The full RPC URL.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Whether the endpoint uses TLS.
    #[must_use]
    pub fn is_https(&self) -> bool {
        self.url.scheme() == "https"
    }
}

fn has_explicit_port(raw: &str) -> bool {
    let authority = raw.split_once("://").map_or(raw, |(_, rest)| rest);
    let authority = authority.split('/').next().unwrap_or_default();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);
    // IPv6 literals carry colons inside brackets.
    let after_bracket = host_port.rsplit_once(']').map_or(host_port, |(_, tail)| tail);
    after_bracket.contains(':')
}
