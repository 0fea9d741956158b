//! Candidate list parsing

/// Split an endpoint list into candidates
///
/// One endpoint per line; surrounding whitespace is trimmed, blank lines and
/// lines starting with `#` are skipped. Order is preserved.
pub fn parse_candidates(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Split a target into host and port
///
/// A fully numeric suffix after the last `:` is always taken as the port and
/// surrounding brackets are stripped from the host. No IPv6 validation is
/// done, so a bare `2001:db8::1` splits into host `2001:db8:` and port `1`.
/// Anything else uses `default_port`. Returns `None` when the numeric suffix
/// does not fit in a port number.
pub fn split_host_port(target: &str, default_port: u16) -> Option<(&str, u16)> {
    if let Some((host, port)) = target.rsplit_once(':') {
        if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) {
            let port = port.parse::<u16>().ok()?;
            return Some((host.trim_matches(|c| c == '[' || c == ']'), port));
        }
    }
    Some((target, default_port))
}
