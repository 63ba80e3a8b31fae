//! 帶簽名請求的協定客戶端：負責 nonce 取用、簽名、送出、錯誤對應與 badNonce 重試。

use std::{fmt, sync::Arc, time::Duration};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    directory::Directory,
    error::{AcmeError, Result},
    jws::Jws,
    nonce::{NewNonceEndpoint, NonceStore},
    payload::Payload,
    problem::{Problem, ProblemKind},
    protection::Protection,
    signature::AccountSigner,
    transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, REPLAY_NONCE},
};

/// 預設的 ACME 目錄 URL。
pub const DEFAULT_DIRECTORY_URL: &str = "https://acme-v02.api.letsencrypt.org/directory";
/// Let's Encrypt 測試環境的目錄 URL。
pub const STAGING_DIRECTORY_URL: &str =
    "https://acme-staging-v02.api.letsencrypt.org/directory";
pub const DEFAULT_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// 同一個簽名請求最多送出的次數（首次加上一次 badNonce 重試）。
const MAX_ATTEMPTS: usize = 2;

/// 簽名請求成功後的結果：解碼後的資源與原始回應。
#[derive(Debug, Clone)]
pub struct SignedResponse<T> {
    pub value: T,
    pub response: HttpResponse,
}

impl<T: DeserializeOwned> SignedResponse<T> {
    /// 將成功回應的內容解碼為 `T`；空內容視為 JSON `null`。
    fn decode(response: HttpResponse) -> Result<Self> {
        let decoded = if response.body.iter().all(u8::is_ascii_whitespace) {
            serde_json::from_value(Value::Null)
        } else {
            serde_json::from_slice(&response.body)
        };
        let value = decoded.map_err(|e| AcmeError::MalformedResponse {
            status: response.status,
            reason: format!("undecodable response body: {}", e),
        })?;
        Ok(Self { value, response })
    }
}

impl<T> SignedResponse<T> {
    /// 回應中的 `Location` 標頭。
    pub fn location(&self) -> Option<String> {
        self.response.location()
    }

    /// 回應中 `rel` 相符的 `Link` 標頭。
    pub fn links(&self, rel: &str) -> Vec<String> {
        self.response.links(rel)
    }
}

/// ACME 協定客戶端。
///
/// 傳輸層、目錄與 nonce 池都屬於單一客戶端，不共用任何全域狀態。
/// 客戶端可在多個執行緒間共用，每個呼叫都是阻塞式的。
pub struct Client {
    transport: Arc<dyn Transport>,
    directory: Directory,
    nonces: NonceStore,
}

impl Client {
    /// 以預設設定連線到指定的目錄。
    pub fn new(directory_url: &str) -> Result<Self> {
        ClientBuilder::new().directory_url(directory_url).build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// 以已取得的目錄與自訂傳輸層建立客戶端，nonce 由目錄的 newNonce 端點補充。
    pub fn with_directory(transport: Arc<dyn Transport>, directory: Directory) -> Self {
        let source = NewNonceEndpoint::new(transport.clone(), directory.new_nonce.clone());
        Self {
            transport,
            directory,
            nonces: NonceStore::new(source),
        }
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn nonces(&self) -> &NonceStore {
        &self.nonces
    }

    /// 送出帶簽名的 POST 請求。
    ///
    /// `kid` 為 `None` 時標頭附上簽名者的 JWK（僅供 newAccount 使用），
    /// 否則以帳戶 URL 作為 `kid`。
    ///
    /// # Errors
    ///
    /// - [`AcmeError::Signature`]：金鑰無法對應到 JWS 演算法或簽名失敗，此時不會送出任何請求。
    /// - [`AcmeError::Network`]：傳輸層失敗。
    /// - [`AcmeError::Protocol`]：伺服器回傳問題文件；badNonce 會自動重試一次。
    /// - [`AcmeError::MalformedResponse`]：回應內容無法解讀。
    pub fn post<T: DeserializeOwned>(
        &self,
        url: &str,
        signer: &dyn AccountSigner,
        kid: Option<&str>,
        payload: &Payload,
    ) -> Result<SignedResponse<T>> {
        let protection = match kid {
            Some(kid) => Protection::with_kid(signer, kid)?,
            None => Protection::with_jwk(signer)?,
        };
        self.post_jws(url, |nonce| Ok(protection.sign(url, Some(nonce), payload)?))
    }

    /// POST-as-GET：以空 payload 讀取資源。
    pub fn post_as_get<T: DeserializeOwned>(
        &self,
        url: &str,
        signer: &dyn AccountSigner,
        kid: &str,
    ) -> Result<SignedResponse<T>> {
        self.post(url, signer, Some(kid), &Payload::Empty)
    }

    /// 協定核心迴圈：取用 nonce、以 `sign` 產生 JWS、送出並處理回應。
    ///
    /// 每次嘗試都會重新呼叫 `sign`，因此重試時一定使用新的 nonce；
    /// 被拒絕的 nonce 不會放回池中。
    pub(crate) fn post_jws<T, F>(&self, url: &str, mut sign: F) -> Result<SignedResponse<T>>
    where
        T: DeserializeOwned,
        F: FnMut(String) -> Result<Jws>,
    {
        let mut attempt = 1;
        loop {
            let nonce = self.nonces.take()?;
            let jws = sign(nonce)?;
            let body = serde_json::to_vec(&jws)?;

            debug!(url, attempt, "sending signed request");
            let response = self.transport.send(HttpRequest::post_jose(url, body))?;
            if let Some(nonce) = response.header(REPLAY_NONCE) {
                self.nonces.put(nonce);
            }

            if response.is_success() {
                return SignedResponse::decode(response);
            }

            let problem = Problem::from_response(&response)?;
            if problem.is(ProblemKind::BadNonce) && attempt < MAX_ATTEMPTS {
                warn!(url, detail = %problem.detail, "server rejected nonce, retrying once");
                attempt += 1;
                continue;
            }
            debug!(url, status = problem.status, problem = %problem.problem_type, "request rejected");
            return Err(AcmeError::Protocol(problem));
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("directory", &self.directory)
            .field("nonces", &self.nonces)
            .finish_non_exhaustive()
    }
}

/// 用於建立 [`Client`] 的建構器。
pub struct ClientBuilder {
    directory_url: String,
    user_agent: String,
    timeout: Duration,
    transport: Option<Arc<dyn Transport>>,
}

impl ClientBuilder {
    /// 創建一個新的 [`ClientBuilder`] 實例，並設置預設值。
    ///
    /// 預設值包括：
    /// - ACME 目錄 URL：`"https://acme-v02.api.letsencrypt.org/directory"`
    /// - User-Agent：`racme-protocol/<版本>`
    /// - 請求逾時：30 秒
    pub fn new() -> Self {
        Self {
            directory_url: DEFAULT_DIRECTORY_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: DEFAULT_TIMEOUT,
            transport: None,
        }
    }

    /// 設置 ACME 目錄 URL。
    pub fn directory_url(mut self, directory_url: &str) -> Self {
        self.directory_url = directory_url.to_string();
        self
    }

    /// 改用 Let's Encrypt 測試環境。
    pub fn staging(self) -> Self {
        self.directory_url(STAGING_DIRECTORY_URL)
    }

    pub fn user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = user_agent.to_string();
        self
    }

    /// 設置預設傳輸層的請求逾時；使用自訂傳輸層時無效。
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 使用自訂的傳輸層取代預設的 reqwest 實作。
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// 取得目錄並建立 [`Client`]。
    ///
    /// # Errors
    ///
    /// 建立傳輸層或取得目錄失敗時回傳錯誤。
    pub fn build(self) -> Result<Client> {
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&self.user_agent, self.timeout)?),
        };
        let directory = Directory::fetch(transport.as_ref(), &self.directory_url)?;
        Ok(Client::with_directory(transport, directory))
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
