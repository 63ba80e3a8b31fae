use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use thiserror::Error;
use tracing::debug;

use crate::transport::{HttpRequest, Transport, TransportError, REPLAY_NONCE};

/// 表示在取得 Nonce 時可能發生的錯誤狀況。
#[derive(Debug, Error)]
pub enum NonceError {
    /// 池中沒有可用的 nonce，且未設定補充來源。
    #[error("nonce pool exhausted and no refill source is available")]
    Exhausted,
    /// 向 newNonce 端點發送請求時失敗。
    #[error("Failed to make request: {0}")]
    RequestFailed(#[from] TransportError),
    /// newNonce 端點回傳非成功狀態碼。
    #[error("newNonce endpoint answered with status {0}")]
    BadStatus(u16),
    /// 當回應中缺少 `Replay-Nonce` 標頭時回傳此錯誤。
    #[error("No Replay-Nonce header found in response")]
    NoNonceHeader,
}

type Result<T> = std::result::Result<T, NonceError>;

/// 定義補充 nonce 的來源。
pub trait NonceSource: Send + Sync {
    /// 向伺服器索取一個全新的 nonce。
    fn fetch(&self) -> Result<String>;
}

/// 透過 HTTP HEAD 請求 newNonce 端點取得 `Replay-Nonce` 的實作。
pub struct NewNonceEndpoint {
    transport: Arc<dyn Transport>,
    url: String,
}

impl NewNonceEndpoint {
    pub fn new(transport: Arc<dyn Transport>, url: impl Into<String>) -> Self {
        Self {
            transport,
            url: url.into(),
        }
    }
}

impl NonceSource for NewNonceEndpoint {
    fn fetch(&self) -> Result<String> {
        let response = self.transport.send(HttpRequest::head(&self.url))?;
        if !response.is_success() {
            return Err(NonceError::BadStatus(response.status));
        }
        response
            .header(REPLAY_NONCE)
            .map(ToString::to_string)
            .ok_or(NonceError::NoNonceHeader)
    }
}

/// 池中最多保留的 nonce 數量，超過時丟棄最舊的一個。
pub const MAX_POOLED_NONCES: usize = 32;

/// 執行緒安全的一次性 nonce 池。
///
/// 每個 nonce 只會被 [`take`](Self::take) 交出一次；伺服器回應中觀察到的新 nonce
/// 透過 [`put`](Self::put) 放回池中。池為空時向補充來源索取，索取過程不持有鎖，
/// 因此不會阻塞其他並行的取用。
pub struct NonceStore {
    pool: Mutex<VecDeque<String>>,
    source: Option<Box<dyn NonceSource>>,
}

impl NonceStore {
    /// 建立一個以 `source` 作為補充來源的 nonce 池。
    pub fn new(source: impl NonceSource + 'static) -> Self {
        Self {
            pool: Mutex::new(VecDeque::new()),
            source: Some(Box::new(source)),
        }
    }

    /// 建立一個沒有補充來源的 nonce 池，只能使用 `put` 放入的 nonce。
    pub fn detached() -> Self {
        Self {
            pool: Mutex::new(VecDeque::new()),
            source: None,
        }
    }

    /// 取出一個 nonce，取出後即不再屬於池。
    ///
    /// # Errors
    ///
    /// 池為空且沒有補充來源時回傳 [`NonceError::Exhausted`]；補充請求失敗時回傳對應錯誤。
    pub fn take(&self) -> Result<String> {
        if let Some(nonce) = self.lock().pop_back() {
            return Ok(nonce);
        }

        let source = self.source.as_ref().ok_or(NonceError::Exhausted)?;
        debug!("nonce pool empty, requesting a fresh nonce");
        source.fetch()
    }

    /// 記錄一個剛從伺服器回應中觀察到的 nonce。
    pub fn put(&self, nonce: impl Into<String>) {
        let nonce = nonce.into();
        if nonce.is_empty() {
            return;
        }

        let mut pool = self.lock();
        if pool.contains(&nonce) {
            return;
        }
        if pool.len() >= MAX_POOLED_NONCES {
            pool.pop_front();
        }
        pool.push_back(nonce);
    }

    /// 目前池中可用的 nonce 數量。
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // 池中的資料在任何時刻都是完整的，鎖中毒時沿用即可。
    fn lock(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for NonceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NonceStore")
            .field("pooled", &self.len())
            .field("refillable", &self.source.is_some())
            .finish()
    }
}
