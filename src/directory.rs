use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::transport::{HttpRequest, Transport, TransportError};

/// 表示處理目錄操作時可能發生的錯誤類型。
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// JSON 解析或序列化錯誤。
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// HTTP 請求錯誤。
    #[error("Request error: {0}")]
    Request(#[from] TransportError),
    /// 目錄端點回傳非成功狀態碼。
    #[error("directory endpoint answered with status {0}")]
    BadStatus(u16),
}

/// 簡化目錄操作結果的型別。
type DirectoryResult<T> = std::result::Result<T, DirectoryError>;

/// 表示與目錄相關的 API 結構，包含與帳號、nonce、訂單、續期資訊及撤銷憑證相關的 URL。
///
/// 引擎中所有端點都由此取得，不會自行拼接任何 URL。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Directory {
    /// 用於新帳號註冊的 API 路徑。
    #[serde(rename = "newAccount")]
    pub new_account: String,
    /// 用於取得新的 nonce 值的 API 路徑。
    #[serde(rename = "newNonce")]
    pub new_nonce: String,
    /// 用於訂單相關操作的 API 路徑。
    #[serde(rename = "newOrder")]
    pub new_order: String,
    /// 用於撤銷憑證的 API 路徑。
    #[serde(rename = "revokeCert")]
    pub revoke_cert: String,
    /// 帳戶金鑰輪替的 API 路徑。
    #[serde(rename = "keyChange")]
    pub key_change: String,
    /// 用於取得續期資訊的 API 路徑，可能不存在。
    #[serde(rename = "renewalInfo", default, skip_serializing_if = "Option::is_none")]
    pub renewal_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<DirectoryMeta>,
}

/// 目錄中的 `meta` 物件。
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DirectoryMeta {
    #[serde(rename = "termsOfService", default, skip_serializing_if = "Option::is_none")]
    pub terms_of_service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(rename = "caaIdentities", default, skip_serializing_if = "Vec::is_empty")]
    pub caa_identities: Vec<String>,
    /// 為 `true` 時，newAccount 必須附上外部帳戶綁定。
    #[serde(rename = "externalAccountRequired", default)]
    pub external_account_required: bool,
}

impl Directory {
    /// 透過傳輸層以 GET 取得並解析目錄。
    ///
    /// # 參數
    ///
    /// - `transport`: 用於送出請求的傳輸層。
    /// - `url`: 目錄的 URL。
    pub fn fetch(transport: &dyn Transport, url: &str) -> DirectoryResult<Self> {
        debug!(url, "fetching directory");
        let response = transport.send(HttpRequest::get(url))?;
        if !response.is_success() {
            return Err(DirectoryError::BadStatus(response.status));
        }
        Ok(serde_json::from_slice(&response.body)?)
    }

    /// 伺服器是否要求外部帳戶綁定。
    pub fn external_account_required(&self) -> bool {
        self.meta
            .as_ref()
            .is_some_and(|m| m.external_account_required)
    }
}
