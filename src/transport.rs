//! HTTP 傳輸層的抽象。引擎只透過 [`Transport`] 與伺服器溝通，預設實作為
//! [`ReqwestTransport`]；測試或自訂環境可以注入任何實作。

use std::time::Duration;

use reqwest::{blocking::Client, header::HeaderMap, Url};
use thiserror::Error;

pub const REPLAY_NONCE: &str = "Replay-Nonce";
pub const LOCATION: &str = "Location";
pub const LINK: &str = "Link";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const JOSE_JSON: &str = "application/jose+json";

/// 傳輸層錯誤。
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Transport error: {0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
        }
    }
}

/// 送往伺服器的請求。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self {
            method: Method::Head,
            ..Self::get(url)
        }
    }

    /// 建立帶有 JWS 內容的 POST 請求。
    pub fn post_jose(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: vec![(CONTENT_TYPE.to_string(), JOSE_JSON.to_string())],
            body,
        }
    }
}

/// 伺服器回應，標頭依原樣保留。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// 請求的 URL，用於解析相對的 `Location` 與 `Link`。
    pub url: String,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
            url: String::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 取得第一個名稱相符（不區分大小寫）的標頭值。
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// 回應的 `Location` 標頭，相對路徑會依請求 URL 解析為絕對 URL。
    pub fn location(&self) -> Option<String> {
        self.header(LOCATION).map(|l| self.resolve(l))
    }

    /// 回傳所有 `rel` 相符的 `Link` 標頭目標。
    pub fn links(&self, rel: &str) -> Vec<String> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(LINK))
            .flat_map(|(_, v)| parse_link_header(v))
            .filter(|(_, rels)| rels.iter().any(|r| r.eq_ignore_ascii_case(rel)))
            .map(|(target, _)| self.resolve(&target))
            .collect()
    }

    fn resolve(&self, reference: &str) -> String {
        Url::parse(&self.url)
            .and_then(|base| base.join(reference))
            .map(String::from)
            .unwrap_or_else(|_| reference.to_string())
    }
}

/// 解析 RFC 8288 `Link` 標頭，回傳 (目標, rel 列表)。
fn parse_link_header(value: &str) -> Vec<(String, Vec<String>)> {
    value
        .split(',')
        .filter_map(|entry| {
            let entry = entry.trim();
            let start = entry.find('<')?;
            let end = entry[start..].find('>')? + start;
            let target = entry[start + 1..end].to_string();
            let rels = entry[end + 1..]
                .split(';')
                .filter_map(|param| {
                    let (name, value) = param.split_once('=')?;
                    if name.trim().eq_ignore_ascii_case("rel") {
                        Some(value.trim().trim_matches('"').to_string())
                    } else {
                        None
                    }
                })
                .flat_map(|v| {
                    v.split_whitespace()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                })
                .collect();
            Some((target, rels))
        })
        .collect()
}

/// 發送 HTTP 請求的抽象。
///
/// 實作者必須原樣保留回應中的 `Replay-Nonce`、`Location` 與 `Link` 標頭，
/// 並將連線、逾時等失敗回報為 [`TransportError`]。
pub trait Transport: Send + Sync {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// 以 `reqwest` 阻塞式客戶端實作的預設傳輸層。
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Head => self.client.head(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder.send()?;
        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body = response.bytes()?.to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
            url: request.url,
        })
    }
}

/// 轉換回應標頭。非 ASCII 的值以有損方式解碼，不影響其他標頭（例如 `Replay-Nonce`）。
fn collect_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}
