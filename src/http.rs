use crate::error::{Error, Result};
use percent_encoding::percent_decode_str;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Read, Write};

pub const MAX_HEADER_SIZE: usize = 16 * 1024;

/// One request per connection, the body is never read.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    /// percent decoded, without the query string
    pub path: String,
    pub query: Option<String>,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

impl Request {
    /// Read the request line and headers from `stream`.
    pub fn read_from(stream: impl Read) -> Result<Request> {
        let mut reader = BufReader::new(stream.take(MAX_HEADER_SIZE as u64));

        let mut line = String::new();
        read_line(&mut reader, &mut line)?;
        let mut parts = line.split_whitespace();
        let (method, target, version) = match (parts.next(), parts.next(), parts.next()) {
            (Some(method), Some(target), Some(version)) => (method, target, version),
            _ => return Err(Error::BadRequest(format!("malformed request line {line:?}"))),
        };
        if !version.starts_with("HTTP/") {
            return Err(Error::BadRequest(format!("unsupported protocol {version}")));
        }

        let (raw_path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (target, None),
        };
        let path = percent_decode_str(raw_path)
            .decode_utf8()
            .map_err(|_| Error::BadRequest("path is not valid utf-8".to_string()))?
            .into_owned();

        let mut headers = Vec::new();
        loop {
            let mut header = String::new();
            read_line(&mut reader, &mut header)?;
            if header.is_empty() {
                break;
            }
            match header.split_once(':') {
                Some((name, value)) => headers.push((name.trim().to_string(), value.trim().to_string())),
                None => return Err(Error::BadRequest(format!("malformed header {header:?}"))),
            }
        }

        Ok(Request {
            method: method.to_string(),
            path,
            query,
            version: version.to_string(),
            headers,
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Read one CRLF terminated line, without the terminator. Running out of input before the end of
/// the line means the headers were too large or the peer hung up.
fn read_line(reader: &mut impl BufRead, line: &mut String) -> Result<()> {
    let read = reader.read_line(line)?;
    if read == 0 || !line.ends_with('\n') {
        return Err(Error::BadRequest("incomplete request head".to_string()));
    }
    let trimmed = line.trim_end_matches(['\r', '\n']).len();
    line.truncate(trimmed);
    Ok(())
}

/////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Response {
    pub fn json(status: u16, value: &Value) -> Response {
        Response {
            status,
            content_type: "application/json",
            body: value.to_string().into_bytes(),
        }
    }

    pub fn html(body: &str) -> Response {
        Response {
            status: 200,
            content_type: "text/html; charset=utf-8",
            body: body.as_bytes().to_vec(),
        }
    }

    /// `{"error": message}`
    pub fn error_json(status: u16, message: impl Into<String>) -> Response {
        Response::json(status, &json!({ "error": message.into() }))
    }

    pub fn write_to(&self, mut stream: impl Write) -> Result<()> {
        let head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            self.status,
            reason_phrase(self.status),
            self.content_type,
            self.body.len()
        );
        stream.write_all(head.as_bytes())?;
        stream.write_all(&self.body)?;
        stream.flush()?;
        Ok(())
    }
}

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_head() {
        let raw = b"GET /api/motion/humanoid/run%20fast.pkl?x=1 HTTP/1.1\r\nHost: localhost\r\nAccept: */*\r\n\r\n";
        let request = Request::read_from(&raw[..]).unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/api/motion/humanoid/run fast.pkl");
        assert_eq!(request.query.as_deref(), Some("x=1"));
        assert_eq!(request.header("host"), Some("localhost"));
        assert_eq!(request.headers.len(), 2);
    }

    #[test]
    fn rejects_bad_requests() {
        assert!(matches!(Request::read_from(&b"GARBAGE\r\n\r\n"[..]), Err(Error::BadRequest(_))));
        assert!(matches!(Request::read_from(&b"GET / HTTP/1.1\r\nHost"[..]), Err(Error::BadRequest(_))));

        let mut huge = b"GET / HTTP/1.1\r\nX-Fill: ".to_vec();
        huge.extend(std::iter::repeat(b'a').take(MAX_HEADER_SIZE));
        huge.extend(b"\r\n\r\n");
        assert!(matches!(Request::read_from(&huge[..]), Err(Error::BadRequest(_))));
    }

    #[test]
    fn writes_response() {
        let mut out = Vec::new();
        Response::error_json(404, "File not found").write_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("Content-Type: application/json\r\n"));
        assert!(text.contains("Content-Length: 26\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with("\r\n\r\n{\"error\":\"File not found\"}"));
    }
}
