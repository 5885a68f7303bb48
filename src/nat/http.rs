//! Minimal HTTP/1.1 client for SOAP control requests.
//!
//! Header names are written exactly as given. Some gateways match
//! `SOAPAction` case-sensitively, and general purpose clients lowercase or
//! title-case header names on the wire.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;
use url::{Host, Url};

use super::error::{IoErrorContext, NatError, NatResult, UpnpError};

/// A fully read HTTP response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First header named `name`, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// POST `body` to `url` with `headers` in the given order and casing.
///
/// `Connection: close` is appended; everything else, including `Host` and
/// `Content-Length`, is the caller's responsibility.
pub async fn post(
    url: &Url,
    headers: &[(&str, String)],
    body: &str,
    limit: Duration,
) -> NatResult<HttpResponse> {
    let addr = resolve(url).await?;

    let mut path = url.path().to_string();
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }

    let mut request = format!("POST {} HTTP/1.1\r\n", path);
    for (name, value) in headers {
        request.push_str(name);
        request.push_str(": ");
        request.push_str(value);
        request.push_str("\r\n");
    }
    request.push_str("Connection: close\r\n\r\n");
    request.push_str(body);

    let exchange = async {
        let mut stream = TcpStream::connect(addr)
            .await
            .nat_context(&format!("Connecting to {}", addr))?;
        stream
            .write_all(request.as_bytes())
            .await
            .nat_context("Sending HTTP request")?;
        read_response(&mut stream).await
    };

    let response = timeout(limit, exchange)
        .await
        .map_err(|_| NatError::Timeout(limit))??;

    debug!("POST {} -> {} {}", url, response.status, response.reason);
    Ok(response)
}

async fn resolve(url: &Url) -> NatResult<SocketAddr> {
    let port = url
        .port_or_known_default()
        .ok_or_else(|| UpnpError::InvalidUrl(format!("{}: no port", url)))?;

    match url.host() {
        Some(Host::Ipv4(ip)) => Ok(SocketAddr::new(ip.into(), port)),
        Some(Host::Ipv6(ip)) => Ok(SocketAddr::new(ip.into(), port)),
        Some(Host::Domain(domain)) => tokio::net::lookup_host((domain, port))
            .await
            .nat_context(&format!("Resolving {}", domain))?
            .next()
            .ok_or_else(|| UpnpError::InvalidUrl(format!("{}: host does not resolve", url)).into()),
        None => Err(UpnpError::InvalidUrl(format!("{}: no host", url)).into()),
    }
}

async fn read_response(stream: &mut TcpStream) -> NatResult<HttpResponse> {
    let mut buf = BytesMut::with_capacity(4096);

    loop {
        let read = stream
            .read_buf(&mut buf)
            .await
            .nat_context("Reading HTTP response")?;
        let eof = read == 0;

        if let Some(response) = parse_response(&buf, eof)? {
            return Ok(response);
        }
        if eof {
            return Err(UpnpError::InvalidResponse(
                "connection closed before the response headers ended".to_string(),
            )
            .into());
        }
    }
}

/// Parse a buffered response. `Ok(None)` means more bytes are needed.
pub fn parse_response(buf: &[u8], eof: bool) -> Result<Option<HttpResponse>, UpnpError> {
    let Some(head_end) = find(buf, b"\r\n\r\n") else {
        return Ok(None);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]);
    let mut lines = head.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(UpnpError::InvalidResponse(format!("bad status line: {}", status_line)));
    }
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| UpnpError::InvalidResponse(format!("bad status line: {}", status_line)))?;
    let reason = parts.next().unwrap_or_default().to_string();

    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
        .collect();

    let mut response = HttpResponse { status, reason, headers, body: Vec::new() };
    let raw_body = &buf[head_end + 4..];

    let chunked = response
        .header("Transfer-Encoding")
        .map(|te| te.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false);

    if chunked {
        match decode_chunked(raw_body)? {
            Some(body) => response.body = body,
            None if eof => {
                return Err(UpnpError::InvalidResponse("truncated chunked body".to_string()))
            }
            None => return Ok(None),
        }
    } else if let Some(length) = response.header("Content-Length") {
        let length: usize = length
            .parse()
            .map_err(|_| UpnpError::InvalidResponse(format!("bad Content-Length: {}", length)))?;
        if raw_body.len() >= length {
            response.body = raw_body[..length].to_vec();
        } else if eof {
            response.body = raw_body.to_vec();
        } else {
            return Ok(None);
        }
    } else if eof {
        response.body = raw_body.to_vec();
    } else {
        return Ok(None);
    }

    Ok(Some(response))
}

/// Decode a chunked body. `Ok(None)` if the terminating chunk has not arrived.
fn decode_chunked(mut data: &[u8]) -> Result<Option<Vec<u8>>, UpnpError> {
    let mut body = Vec::new();

    loop {
        let Some(line_end) = find(data, b"\r\n") else {
            return Ok(None);
        };
        let size_line = String::from_utf8_lossy(&data[..line_end]);
        let size_hex = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| UpnpError::InvalidResponse(format!("bad chunk size: {}", size_hex)))?;

        if size == 0 {
            return Ok(Some(body));
        }

        let chunk_start = line_end + 2;
        if data.len() < chunk_start + size + 2 {
            return Ok(None);
        }
        let chunk_end = chunk_start + size;
        if &data[chunk_end..chunk_end + 2] != b"\r\n" {
            return Err(UpnpError::InvalidResponse(format!(
                "chunk of {} bytes not followed by CRLF",
                size
            )));
        }
        body.extend_from_slice(&data[chunk_start..chunk_end]);
        data = &data[chunk_end + 2..];
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
