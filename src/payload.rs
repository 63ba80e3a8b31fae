use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{base64::Base64, jwk::Jwk, jws::Jws};

/// JWS 的 payload：JSON 內容，或 POST-as-GET 使用的空字串。
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Empty,
}

impl Payload {
    /// 將 payload 編碼為 base64url；空 payload 編碼為空字串。
    pub fn to_base64(&self) -> Result<Base64, serde_json::Error> {
        match self {
            Payload::Json(value) => Ok(Base64::new(serde_json::to_vec(value)?)),
            Payload::Empty => Ok(Base64::new(b"")),
        }
    }
}

/// 所有 API 載荷共用的轉換行為。
pub trait PayloadT: Serialize {
    /// 將載荷轉換為可簽名的 [`Payload`]。
    fn to_payload(&self) -> Result<Payload, serde_json::Error> {
        Ok(Payload::Json(serde_json::to_value(self)?))
    }
}

/// 建立新帳號（newAccount）所需的載荷資料。
///
/// `only_return_existing` 為 `true` 時，伺服器只會回傳已綁定此金鑰的帳戶，找不到則拒絕。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewAccountRequest {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contact: Vec<String>,
    #[serde(rename = "termsOfServiceAgreed", default)]
    pub terms_of_service_agreed: bool,
    #[serde(
        rename = "onlyReturnExisting",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub only_return_existing: bool,
    #[serde(
        rename = "externalAccountBinding",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub external_account_binding: Option<Jws>,
}

impl PayloadT for NewAccountRequest {}

/// 更新帳戶的載荷；未提供聯絡資訊時序列化為 `{}`，伺服器視為單純讀取。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateAccountPayload {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contact: Vec<String>,
}

impl PayloadT for UpdateAccountPayload {}

/// 停用帳戶的載荷。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeactivatePayload {
    pub status: String,
}

impl DeactivatePayload {
    pub fn new() -> Self {
        Self {
            status: "deactivated".to_string(),
        }
    }
}

impl Default for DeactivatePayload {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadT for DeactivatePayload {}

/// 金鑰輪替內層 JWS 的載荷：帳戶 URL 與舊公鑰。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyChangePayload {
    pub account: String,
    #[serde(rename = "oldKey")]
    pub old_key: Jwk,
}

impl PayloadT for KeyChangePayload {}
