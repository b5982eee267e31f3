use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Reasons a feed address is refused at subscription time.
#[derive(Error, Debug)]
pub enum AddressError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    #[error("URL has no host")]
    MissingHost,
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(String),
    #[error("Localhost not allowed")]
    Localhost,
}

/// Validates a feed address supplied by a subscriber.
///
/// Rejects non-HTTP(S) schemes, localhost and private/link-local IP ranges so
/// the engine can never be pointed at internal services. Only applied when a
/// feed is first created; the fetcher trusts addresses already in the store.
///
/// ```
/// use feedrelay::util::validate_address;
///
/// assert!(validate_address("https://example.com/feed.xml").is_ok());
/// assert!(validate_address("http://localhost/feed").is_err());
/// assert!(validate_address("file:///etc/passwd").is_err());
/// ```
pub fn validate_address(address: &str) -> Result<Url, AddressError> {
    let url = Url::parse(address)?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(AddressError::UnsupportedScheme(scheme.to_owned())),
    }

    let host = url.host_str().ok_or(AddressError::MissingHost)?;
    if host.eq_ignore_ascii_case("localhost") {
        return Err(AddressError::Localhost);
    }

    let bare = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    if let Ok(ip) = bare.parse::<IpAddr>() {
        if ip.is_loopback() {
            return Err(AddressError::Localhost);
        }
        if is_private_ip(&ip) {
            return Err(AddressError::PrivateIp(ip.to_string()));
        }
    }

    Ok(url)
}

/// Pulls candidate feed addresses out of free-form command arguments.
///
/// Arguments are split on whitespace; a token is kept only if it parses as an
/// http(s) URL with a host and a non-root path (a bare domain is almost never
/// a feed). Order is preserved.
///
/// ```
/// use feedrelay::util::extract_addresses;
///
/// let found = extract_addresses("please add https://blog.example.com/rss.xml thanks");
/// assert_eq!(found, vec!["https://blog.example.com/rss.xml".to_string()]);
/// ```
pub fn extract_addresses(args: &str) -> Vec<String> {
    args.split_whitespace()
        .filter(|token| {
            Url::parse(token)
                .map(|url| {
                    matches!(url.scheme(), "http" | "https")
                        && url.host_str().is_some()
                        && url.path().len() > 1
                })
                .unwrap_or(false)
        })
        .map(str::to_string)
        .collect()
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_private() || ipv4.is_loopback() || ipv4.is_link_local() || ipv4.is_unspecified()
        }
        IpAddr::V6(ipv6) => {
            if ipv6.is_loopback() || ipv6.is_unspecified() {
                return true;
            }
            let segments = ipv6.segments();
            // Unique Local (fc00::/7)
            let is_unique_local = (segments[0] & 0xfe00) == 0xfc00;
            // Link-Local (fe80::/10)
            let is_link_local = (segments[0] & 0xffc0) == 0xfe80;
            is_unique_local || is_link_local
        }
    }
}
