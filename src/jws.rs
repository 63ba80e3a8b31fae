//! 此模組提供 ACME 使用的 Flattened JSON Web Signature (RFC 7515) 結構與簽名操作。

use std::result;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    base64::{Base64, DecodeError},
    jwk::Jwk,
    payload::Payload,
    signature::{create_signature, AccountSigner, SignatureAlgorithm, SignatureError},
};

/// 表示與 JWS 相關的錯誤。
#[derive(Error, Debug)]
pub enum JwsError {
    /// 當 Base64 解碼失敗時回傳此錯誤。
    #[error("Base64 decode error: {0}")]
    Base64DecodeError(#[from] DecodeError),
    /// 當 JSON 序列化或反序列化過程中發生錯誤時回傳此錯誤。
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),
}

type Result<T> = result::Result<T, JwsError>;

/// 保護標頭中用來識別簽名金鑰的欄位，`jwk` 與 `kid` 必定恰好出現一個。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyBinding {
    /// 直接附上公鑰；只用於尚未註冊的 newAccount 請求與金鑰輪替的內層 JWS。
    #[serde(rename = "jwk")]
    Jwk(Jwk),
    /// 帳戶 URL。
    #[serde(rename = "kid")]
    Kid(String),
}

/// JWS 保護標頭。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedHeader {
    /// 簽章演算法
    pub alg: String,
    /// 防止重放攻擊的 nonce，金鑰輪替的內層 JWS 不帶此欄位。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// 請求目標 URL，必須與實際送出的 URL 相同。
    pub url: String,
    #[serde(flatten)]
    pub key: KeyBinding,
}

impl ProtectedHeader {
    pub fn to_base64(&self) -> Result<Base64> {
        Ok(Base64::new(serde_json::to_vec(self)?))
    }

    pub fn kid(&self) -> Option<&str> {
        match &self.key {
            KeyBinding::Kid(kid) => Some(kid),
            KeyBinding::Jwk(_) => None,
        }
    }

    pub fn jwk(&self) -> Option<&Jwk> {
        match &self.key {
            KeyBinding::Jwk(jwk) => Some(jwk),
            KeyBinding::Kid(_) => None,
        }
    }
}

/// 表示一個 Flattened JWS 物件，各部分皆為 base64url 編碼字串。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Jws {
    /// 對應 JWS 中的 "protected" 欄位，包含已編碼的 header 資訊。
    #[serde(rename = "protected")]
    header: String,
    payload: String,
    signature: String,
}

impl Jws {
    /// 由已編碼的三個部分組成 JWS。
    pub fn new(header_b64: &Base64, payload_b64: &Base64, signature_b64: &Base64) -> Self {
        Jws {
            header: header_b64.base64_url(),
            payload: payload_b64.base64_url(),
            signature: signature_b64.base64_url(),
        }
    }

    /// 以簽名者對 `header` 與 `payload` 簽名並組成 JWS。
    ///
    /// 簽名所涵蓋的正是序列化後送出的位元組，呼叫端不應再修改結果。
    pub fn sign(
        header: &ProtectedHeader,
        payload: &Payload,
        signer: &dyn AccountSigner,
        alg: SignatureAlgorithm,
    ) -> Result<Self> {
        let header_b64 = header.to_base64()?;
        let payload_b64 = payload.to_base64()?;
        let signature_b64 = create_signature(&header_b64, &payload_b64, signer, alg)?;
        Ok(Self::new(&header_b64, &payload_b64, &signature_b64))
    }

    pub fn protected(&self) -> &str {
        &self.header
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// 簽名輸入：`protected || '.' || payload`。
    pub fn signing_input(&self) -> String {
        format!("{}.{}", self.header, self.payload)
    }

    pub fn decode_header(&self) -> Result<ProtectedHeader> {
        let bytes = Base64::from_url(&self.header)?.decode()?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// 解碼 payload；空 payload（POST-as-GET）回傳空位元組。
    pub fn decode_payload(&self) -> Result<Vec<u8>> {
        Ok(Base64::from_url(&self.payload)?.decode()?)
    }

    pub fn decode_signature(&self) -> Result<Vec<u8>> {
        Ok(Base64::from_url(&self.signature)?.decode()?)
    }
}
