//! Plain-HTTP forward proxy request handling

use super::{ProxyError, TargetDescriptor, DEFAULT_HTTP_PORT};
use crate::transport::{Transport, TransportError};

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Offset just past the blank line ending the header block
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
        .map(|pos| pos + HEADER_TERMINATOR.len())
}

/// Read from the browser until the header block is complete
///
/// Body bytes that arrive in the same reads are kept; the read does not wait
/// for a body announced by `Content-Length`.
pub async fn read_request_head<T: Transport>(
    transport: &mut T,
    buffer_size: usize,
    max_size: usize,
) -> Result<Vec<u8>, ProxyError> {
    let mut request = Vec::with_capacity(buffer_size);
    let mut chunk = vec![0u8; buffer_size.max(1)];

    loop {
        let n = match transport.recv(&mut chunk).await {
            Ok(n) => n,
            Err(TransportError::Closed) => return Err(ProxyError::ClientClosed),
            Err(e) => return Err(e.into()),
        };

        // Only the newly read bytes plus a terminator-sized overlap need scanning
        let scan_from = request.len().saturating_sub(HEADER_TERMINATOR.len() - 1);
        request.extend_from_slice(&chunk[..n]);

        if find_header_end(&request[scan_from..]).is_some() {
            return Ok(request);
        }
        if request.len() > max_size {
            return Err(ProxyError::RequestTooLarge(max_size));
        }
    }
}

/// First line of a request, for logging
pub fn request_line(request: &[u8]) -> Option<String> {
    let end = request
        .windows(2)
        .position(|w| w == b"\r\n")
        .unwrap_or(request.len());
    let line = String::from_utf8_lossy(&request[..end]).trim().to_string();
    (!line.is_empty()).then_some(line)
}

/// Derive the target of a decrypted HTTP request
///
/// The port is taken from the text after the last `:` of the `Host` value;
/// if that does not parse, the whole value is the host and the port is 80.
/// A value like `:8080` has no host and is rejected.
pub fn resolve_target(request: &[u8]) -> Result<TargetDescriptor, ProxyError> {
    let text = String::from_utf8_lossy(request);
    let mut lines = text.split("\r\n");

    let first = lines.next().unwrap_or_default();
    let mut parts = first.split_whitespace();
    if parts.next().is_none() {
        return Err(ProxyError::TargetParseError("empty request line".to_string()));
    }
    let path = parts.next().unwrap_or("/").to_string();

    let host_value = lines
        .take_while(|line| !line.is_empty())
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim().eq_ignore_ascii_case("host").then(|| value.trim())
        })
        .filter(|value| !value.is_empty())
        .ok_or(ProxyError::MissingTargetHost)?;

    let (host, port) = match host_value.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(_) if host.is_empty() => return Err(ProxyError::MissingTargetHost),
            Ok(port) => (host.to_string(), port),
            Err(_) => (host_value.to_string(), DEFAULT_HTTP_PORT),
        },
        None => (host_value.to_string(), DEFAULT_HTTP_PORT),
    };

    Ok(TargetDescriptor { host, port, path })
}
