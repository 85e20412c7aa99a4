//! Hostname normalization shared by domain creation, push and request routing.
//!
//! Every hostname stored or looked up goes through [`normalize_hostname`] so
//! that `HTTPS://WWW.Bücher.example./path` and `bücher.example` resolve to the
//! same row.

use thiserror::Error;
use url::Host;

const MAX_HOSTNAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Errors produced while validating an operator supplied hostname.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostnameError {
    #[error("hostname is required")]
    Empty,
    #[error("hostname `{0}` is not a valid domain name")]
    Invalid(String),
    #[error("hostname `{0}` is an IP address, a domain name is required")]
    IpAddress(String),
    #[error("hostname `{0}` must contain at least one dot")]
    NotQualified(String),
    #[error("hostname `{0}` exceeds the maximum length")]
    TooLong(String),
}

/// Normalizes a hostname: strips protocol, path, port, trailing dot and a
/// leading `www.`, lowercases and converts to the IDNA ASCII form.
pub fn normalize_hostname(input: &str) -> Result<String, HostnameError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(HostnameError::Empty);
    }

    let without_scheme = match trimmed.find("://") {
        Some(index) => &trimmed[index + 3..],
        None => trimmed,
    };
    let authority = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    if authority.contains('@') {
        return Err(HostnameError::Invalid(input.trim().to_string()));
    }
    let host = strip_port(authority).trim_end_matches('.');
    if host.is_empty() {
        return Err(HostnameError::Empty);
    }

    let ascii = match Host::parse(host) {
        Ok(Host::Domain(domain)) => domain,
        Ok(Host::Ipv4(_)) | Ok(Host::Ipv6(_)) => {
            return Err(HostnameError::IpAddress(host.to_string()))
        }
        Err(_) => return Err(HostnameError::Invalid(host.to_string())),
    };
    let ascii = ascii.to_ascii_lowercase();
    let ascii = ascii.strip_prefix("www.").unwrap_or(&ascii).to_string();

    validate_labels(&ascii)?;
    Ok(ascii)
}

fn strip_port(authority: &str) -> &str {
    match authority.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            host
        }
        _ => authority,
    }
}

fn validate_labels(hostname: &str) -> Result<(), HostnameError> {
    if hostname.len() > MAX_HOSTNAME_LEN {
        return Err(HostnameError::TooLong(hostname.to_string()));
    }
    if !hostname.contains('.') {
        return Err(HostnameError::NotQualified(hostname.to_string()));
    }

    let labels: Vec<&str> = hostname.split('.').collect();
    for label in &labels {
        let valid = !label.is_empty()
            && label.len() <= MAX_LABEL_LEN
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
        if !valid {
            return Err(HostnameError::Invalid(hostname.to_string()));
        }
    }

    let tld = labels.last().copied().unwrap_or_default();
    if tld.bytes().all(|b| b.is_ascii_digit()) {
        return Err(HostnameError::Invalid(hostname.to_string()));
    }

    Ok(())
}

/// `true` when the hostname is a registrable apex (two labels) rather than a sub-domain.
pub fn is_apex(hostname: &str) -> bool {
    hostname.split('.').count() <= 2
}
