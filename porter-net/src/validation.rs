// porter-net/src/validation.rs
use porter_common::error::{PorterError, Result};
use url::Url;

/// Validates a download URL: https everywhere, plain http only for loopback hosts.
pub fn validate_url(url_str: &str) -> Result<Url> {
    let url = Url::parse(url_str)
        .map_err(|e| PorterError::Validation(format!("Failed to parse URL '{url_str}': {e}")))?;
    match url.scheme() {
        "https" => Ok(url),
        "http" if is_loopback(&url) => Ok(url),
        scheme => Err(PorterError::Validation(format!(
            "Invalid URL scheme for '{url_str}': Must be https, but got '{scheme}'"
        ))),
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(d)) => d == "localhost",
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

/// Whether `err` (or anything it wraps) is a transient network failure the
/// client may want to retry.
pub fn is_network_error(err: &PorterError) -> bool {
    match err.root() {
        PorterError::NetworkDisconnected(_) => true,
        PorterError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request() || e.is_body(),
        PorterError::Io(e) => matches!(
            e.kind(),
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::NotConnected
                | std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::BrokenPipe
        ),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_http_is_only_allowed_on_loopback() {
        assert!(validate_url("https://itch.io/upload/1").is_ok());
        assert!(validate_url("http://127.0.0.1:8080/file.zip").is_ok());
        assert!(validate_url("http://localhost/file.zip").is_ok());
        assert!(validate_url("http://example.org/file.zip").is_err());
        assert!(validate_url("not a url").is_err());
    }

    #[test]
    fn network_errors_are_recognized_through_context() {
        let err = PorterError::from(std::io::Error::from(std::io::ErrorKind::ConnectionReset))
            .context("downloading vcredist");
        assert!(is_network_error(&err));
        assert!(!is_network_error(&PorterError::Generic("disk full".into())));
    }
}
