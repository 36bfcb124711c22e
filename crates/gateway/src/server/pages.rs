//! Informational pages served on every path except the issuance endpoint.

/// Shown when the request was addressed to the gateway's own hostname
pub const GATEWAY_PAGE: &str = "<!DOCTYPE html>\n\
<html><head><title>Certomat</title></head><body>\
<h1>Certomat</h1>\
<p>This gateway issues TLS certificates to registered hosts. \
Hosts submit a certificate signing request with \
<code>POST /get-cert-from-csr</code>.</p>\
</body></html>\n";

/// Shown for any other host name: the client reached this server under a
/// name that local DNS should have resolved to a local address
pub const UNCONFIGURED_DNS_PAGE: &str = "<!DOCTYPE html>\n\
<html><head><title>Local DNS is not configured</title></head><body>\
<h1>Local DNS is not configured</h1>\
<p>This server already holds a valid TLS certificate for this name, \
but local DNS is sending you to the public gateway instead of the \
server's local address. Point this name at the local server in your \
DNS configuration.</p>\
</body></html>\n";

/// Page for a request whose `Host` is `host`
pub fn page_for(host: Option<&str>, canonical_host: &str) -> &'static str {
    match host {
        Some(host) if same_host(host, canonical_host) => GATEWAY_PAGE,
        _ => UNCONFIGURED_DNS_PAGE,
    }
}

/// Case-insensitive host comparison ignoring any port and trailing dot
fn same_host(host: &str, canonical_host: &str) -> bool {
    let host = strip_port(host.trim());
    let host = host.strip_suffix('.').unwrap_or(host);
    host.eq_ignore_ascii_case(canonical_host)
}

/// `host:port` -> `host`; bracketed IPv6 literals keep their brackets
pub fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }

    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("certomat.example.org:443"), "certomat.example.org");
        assert_eq!(strip_port("certomat.example.org"), "certomat.example.org");
        assert_eq!(strip_port("[::1]:8443"), "[::1]");
        assert_eq!(strip_port("host:"), "host:");
    }

    #[test]
    fn test_page_selection() {
        let canonical = "certomat.example.org";
        assert_eq!(page_for(Some("certomat.example.org"), canonical), GATEWAY_PAGE);
        assert_eq!(page_for(Some("CERTOMAT.Example.org:443"), canonical), GATEWAY_PAGE);
        assert_eq!(page_for(Some("certomat.example.org."), canonical), GATEWAY_PAGE);
        assert_eq!(page_for(Some("host1.example.org"), canonical), UNCONFIGURED_DNS_PAGE);
        assert_eq!(page_for(None, canonical), UNCONFIGURED_DNS_PAGE);
    }
}
