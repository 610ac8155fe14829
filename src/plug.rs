#![allow(dead_code)]
use crate::core::{FsError, Result};
use crate::http::HttpConfig;
use ahash::{HashMap, HashMapExt};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub struct HttpResponse {
    pub data: Vec<u8>,
    pub status: u16,
    pub content_length: Option<u64>,
    pub content_range: Option<(u64, u64)>,
}

impl HttpResponse {
    pub fn new(
        data: Vec<u8>,
        status: u16,
        content_length: Option<u64>,
        content_range: Option<(u64, u64)>,
    ) -> Self {
        Self {
            data,
            status,
            content_length,
            content_range,
        }
    }
}

/// Metadata from a HEAD request. Fields are `None` when the server omits them
/// or answers with a non-success status.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HttpHead {
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
}

/// internal blocking transport trait.
pub trait BlockingHttp: Send + Sync {
    fn head(&self, url: &str) -> Result<HttpHead>;
    fn get_range(&self, url: &str, start: u64, end: u64) -> Result<HttpResponse>;
}

#[cfg(all(not(feature = "reqwest"), not(feature = "curl")))]
compile_error!("Enable either `curl` (default) or `reqwest` feature.");

pub(crate) fn build_default_transport(config: &HttpConfig) -> Arc<dyn BlockingHttp> {
    #[cfg(feature = "reqwest")]
    {
        Arc::new(ReqwestBlockingTransport::new(config))
    }
    #[cfg(all(not(feature = "reqwest"), feature = "curl"))]
    {
        Arc::new(CurlBlockingTransport::new(config))
    }
}

fn parse_content_range(header: &str) -> Option<(u64, u64)> {
    let parts: Vec<&str> = header.split_whitespace().collect();
    if parts.len() < 2 || parts[0] != "bytes" {
        return None;
    }

    let range_part = parts[1].split('/').next()?;
    let mut range_iter = range_part.split('-');

    let start = range_iter.next()?.parse::<u64>().ok()?;
    let end = range_iter.next()?.parse::<u64>().ok()?;

    Some((start, end))
}

/// Enforce strict Range semantics on a response to `bytes=start-...`.
///
/// 416 means the range starts past the end and yields an empty body.
fn check_range_response(mut response: HttpResponse, start: u64) -> Result<HttpResponse> {
    match response.status {
        416 => {
            response.data.clear();
            Ok(response)
        }
        200 => Err(FsError::Protocol(
            "Server does not support Range requests (returned 200 instead of 206). \
             This library requires strict Range semantics."
                .into(),
        )),
        206 => match response.content_range {
            Some((resp_start, _)) if resp_start != start => Err(FsError::Protocol(
                "Server returned incorrect range start".into(),
            )),
            _ => Ok(response),
        },
        status => Err(FsError::Network(format!("HTTP error: {}", status))),
    }
}

#[cfg(feature = "reqwest")]
struct ReqwestBlockingTransport {
    client: reqwest::blocking::Client,
}

#[cfg(feature = "reqwest")]
impl ReqwestBlockingTransport {
    fn new(config: &HttpConfig) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.read_timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.idle_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { client }
    }

    fn header(response: &reqwest::blocking::Response, name: &str) -> Option<String> {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }
}

#[cfg(feature = "reqwest")]
impl BlockingHttp for ReqwestBlockingTransport {
    fn head(&self, url: &str) -> Result<HttpHead> {
        let response = self
            .client
            .head(url)
            .send()
            .map_err(|e| FsError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Ok(HttpHead::default());
        }

        Ok(HttpHead {
            content_length: Self::header(&response, "content-length")
                .and_then(|v| v.parse::<u64>().ok()),
            content_type: Self::header(&response, "content-type"),
        })
    }

    fn get_range(&self, url: &str, start: u64, end: u64) -> Result<HttpResponse> {
        let range_header = format!("bytes={}-{}", start, end);

        let response = self
            .client
            .get(url)
            .header("Range", range_header)
            .send()
            .map_err(|e| FsError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let content_length = response.content_length();
        let content_range =
            Self::header(&response, "content-range").and_then(|v| parse_content_range(&v));

        let data = if status == 206 {
            response
                .bytes()
                .map_err(|e| FsError::Network(e.to_string()))?
                .to_vec()
        } else {
            Vec::new()
        };

        check_range_response(
            HttpResponse::new(data, status, content_length, content_range),
            start,
        )
    }
}

#[cfg(all(not(feature = "reqwest"), feature = "curl"))]
struct CurlBlockingTransport {
    connect_timeout: Duration,
    read_timeout: Duration,
}

#[cfg(all(not(feature = "reqwest"), feature = "curl"))]
impl CurlBlockingTransport {
    fn new(config: &HttpConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
        }
    }

    fn request(
        &self,
        url: &str,
        head_only: bool,
        range: Option<(u64, u64)>,
    ) -> Result<(HttpResponse, HashMap<String, String>)> {
        let net = |e: curl::Error| FsError::Network(e.to_string());

        let mut easy = curl::easy::Easy::new();
        easy.url(url).map_err(net)?;
        easy.connect_timeout(self.connect_timeout).map_err(net)?;
        easy.timeout(self.read_timeout).map_err(net)?;
        easy.follow_location(true).map_err(net)?;

        if head_only {
            easy.nobody(true).map_err(net)?;
            easy.custom_request("HEAD").map_err(net)?;
        }

        if let Some((start, end)) = range {
            easy.range(&format!("{start}-{end}")).map_err(net)?;
        }

        let mut data = Vec::new();
        let mut headers = HashMap::<String, String>::new();

        {
            let mut transfer = easy.transfer();
            transfer
                .write_function(|chunk| {
                    data.extend_from_slice(chunk);
                    Ok(chunk.len())
                })
                .map_err(net)?;

            transfer
                .header_function(|header| {
                    if let Ok(line) = std::str::from_utf8(header) {
                        let line = line.trim();
                        if let Some((name, value)) = line.split_once(':') {
                            headers.insert(name.trim().to_ascii_lowercase(), value.trim().into());
                        }
                    }
                    true
                })
                .map_err(net)?;

            transfer.perform().map_err(net)?;
        }

        let status = easy.response_code().map_err(net)? as u16;
        let content_length = headers
            .get("content-length")
            .and_then(|v| v.parse::<u64>().ok());
        let content_range = headers
            .get("content-range")
            .and_then(|value| parse_content_range(value));

        Ok((
            HttpResponse::new(data, status, content_length, content_range),
            headers,
        ))
    }
}

#[cfg(all(not(feature = "reqwest"), feature = "curl"))]
impl BlockingHttp for CurlBlockingTransport {
    fn head(&self, url: &str) -> Result<HttpHead> {
        let (response, mut headers) = self.request(url, true, None)?;
        if !(200..300).contains(&response.status) {
            return Ok(HttpHead::default());
        }

        Ok(HttpHead {
            content_length: response.content_length,
            content_type: headers.remove("content-type"),
        })
    }

    fn get_range(&self, url: &str, start: u64, end: u64) -> Result<HttpResponse> {
        let (response, _) = self.request(url, false, Some((start, end)))?;
        check_range_response(response, start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_range() {
        assert_eq!(parse_content_range("bytes 0-99/1000"), Some((0, 99)));
        assert_eq!(parse_content_range("bytes 5-9/*"), Some((5, 9)));
        assert_eq!(parse_content_range("items 0-1/2"), None);
        assert_eq!(parse_content_range("bytes"), None);
    }

    #[test]
    fn range_not_satisfiable_is_empty() {
        let response = HttpResponse::new(b"error page".to_vec(), 416, None, None);
        let checked = check_range_response(response, 500).unwrap();
        assert!(checked.data.is_empty());
    }

    #[test]
    fn full_body_response_is_rejected() {
        let response = HttpResponse::new(vec![1, 2, 3], 200, Some(3), None);
        assert!(matches!(
            check_range_response(response, 0),
            Err(FsError::Protocol(_))
        ));
    }

    #[test]
    fn wrong_range_start_is_rejected() {
        let response = HttpResponse::new(vec![0; 10], 206, Some(10), Some((10, 19)));
        assert!(matches!(
            check_range_response(response, 0),
            Err(FsError::Protocol(_))
        ));
    }

    #[test]
    fn server_errors_are_network_errors() {
        let response = HttpResponse::new(Vec::new(), 503, None, None);
        assert!(matches!(
            check_range_response(response, 0),
            Err(FsError::Network(_))
        ));
    }
}
