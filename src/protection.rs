//! 簽名信封的建立：一般請求的 JWS、金鑰輪替的內外層 JWS，以及外部帳戶綁定（EAB）。

use openssl::{hash::MessageDigest, pkey::PKey, sign::Signer};
use thiserror::Error;

use crate::{
    base64::Base64,
    jwk::{Jwk, JwkError},
    jws::{Jws, JwsError, KeyBinding, ProtectedHeader},
    payload::{KeyChangePayload, Payload, PayloadT},
    signature::{AccountSigner, SignatureAlgorithm, SignatureError},
};

/// 定義保護機制中可能產生的錯誤類型。
#[derive(Debug, Error)]
pub enum ProtectionError {
    /// 金鑰輪替時，新金鑰對內層 JWS 的簽名失敗。
    #[error("inner jws: {0}")]
    InnerSignature(#[source] Box<ProtectionError>),
    /// 金鑰輪替時，舊金鑰對外層 JWS 的簽名失敗。
    #[error("outer jws: {0}")]
    OuterSignature(#[source] Box<ProtectionError>),
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    Jwk(#[from] JwkError),
    #[error("JWS error: {0}")]
    Jws(#[from] JwsError),
    /// JSON 序列化錯誤
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// EAB 的 HMAC 金鑰不是合法的 base64url 字串。
    #[error("invalid external account binding key: {0}")]
    InvalidEabKey(String),
    #[error("HMAC error: {0}")]
    Hmac(#[from] openssl::error::ErrorStack),
}

/// 自定義的結果型別，錯誤類型為 [`ProtectionError`]
type Result<T> = std::result::Result<T, ProtectionError>;

/// 以帳戶簽名者產生保護標頭並簽名的工具。
///
/// 建立時即決定演算法與金鑰綁定方式（`jwk` 或 `kid`），
/// 之後每次 [`sign`](Self::sign) 只需提供目標 URL 與 nonce。
pub struct Protection<'a> {
    signer: &'a dyn AccountSigner,
    alg: SignatureAlgorithm,
    key: KeyBinding,
}

impl<'a> Protection<'a> {
    /// 在標頭中直接附上公鑰，用於 newAccount 請求。
    ///
    /// # Errors
    ///
    /// 簽名者的金鑰無法對應到 JWS 演算法時回傳 [`SignatureError::UnsupportedKeyType`]。
    pub fn with_jwk(signer: &'a dyn AccountSigner) -> Result<Self> {
        let alg = signer.algorithm()?;
        let jwk = signer_jwk(signer)?;
        Ok(Self {
            signer,
            alg,
            key: KeyBinding::Jwk(jwk),
        })
    }

    /// 以帳戶 URL 作為 `kid`，用於已註冊帳戶的所有請求。
    pub fn with_kid(signer: &'a dyn AccountSigner, kid: impl Into<String>) -> Result<Self> {
        Ok(Self {
            signer,
            alg: signer.algorithm()?,
            key: KeyBinding::Kid(kid.into()),
        })
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.alg
    }

    /// 根據目前設定生成一個 [`ProtectedHeader`]。
    pub fn create_header(&self, url: impl Into<String>, nonce: Option<String>) -> ProtectedHeader {
        ProtectedHeader {
            alg: self.alg.as_str().to_string(),
            nonce,
            url: url.into(),
            key: self.key.clone(),
        }
    }

    /// 產生標頭並對 payload 簽名。
    pub fn sign(&self, url: &str, nonce: Option<String>, payload: &Payload) -> Result<Jws> {
        let header = self.create_header(url, nonce);
        Ok(Jws::sign(&header, payload, self.signer, self.alg)?)
    }
}

/// 取得簽名者公鑰的 JWK 表示。
pub fn signer_jwk(signer: &dyn AccountSigner) -> Result<Jwk> {
    Ok(Jwk::from_public_key(&signer.public_key()?)?)
}

/// 金鑰輪替的內層 JWS，由新金鑰簽名，標頭不含 nonce。
///
/// 建立後不可修改，外層 JWS 會原樣將其作為 payload。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerEnvelope(Jws);

impl InnerEnvelope {
    /// 以新金鑰簽署 `{account, oldKey}`。
    ///
    /// # Errors
    ///
    /// 任何失敗皆包裝為 [`ProtectionError::InnerSignature`]。
    pub fn sign(
        new_key: &dyn AccountSigner,
        key_change_url: &str,
        account_url: &str,
        old_key: Jwk,
    ) -> Result<Self> {
        let sign = || -> Result<Jws> {
            let protection = Protection::with_jwk(new_key)?;
            let payload = KeyChangePayload {
                account: account_url.to_string(),
                old_key,
            }
            .to_payload()?;
            protection.sign(key_change_url, None, &payload)
        };
        sign()
            .map(Self)
            .map_err(|e| ProtectionError::InnerSignature(Box::new(e)))
    }

    pub fn jws(&self) -> &Jws {
        &self.0
    }

    /// 以舊帳戶金鑰包裝成外層 JWS。
    ///
    /// # Errors
    ///
    /// 任何失敗皆包裝為 [`ProtectionError::OuterSignature`]。
    pub fn wrap(&self, outer: &Protection<'_>, url: &str, nonce: String) -> Result<Jws> {
        let sign = || -> Result<Jws> {
            let payload = Payload::Json(serde_json::to_value(&self.0)?);
            outer.sign(url, Some(nonce), &payload)
        };
        sign().map_err(|e| ProtectionError::OuterSignature(Box::new(e)))
    }
}

/// 外部帳戶綁定使用的 MAC 演算法。
pub const EAB_ALGORITHM: &str = "HS256";

/// 產生 newAccount 請求中的 `externalAccountBinding` 欄位。
///
/// 以 CA 提供的 HMAC 金鑰（base64url 編碼）對帳戶公鑰簽名，
/// 標頭為 `{alg: HS256, kid: key_id, url: newAccount}`。
pub fn external_account_binding(
    key_id: &str,
    hmac_key: &str,
    account_key: &Jwk,
    new_account_url: &str,
) -> Result<Jws> {
    let mac_key = Base64::from_url(hmac_key)
        .and_then(|k| k.decode())
        .map_err(|e| ProtectionError::InvalidEabKey(e.to_string()))?;
    if mac_key.is_empty() {
        return Err(ProtectionError::InvalidEabKey("empty key".to_string()));
    }

    let header = ProtectedHeader {
        alg: EAB_ALGORITHM.to_string(),
        nonce: None,
        url: new_account_url.to_string(),
        key: KeyBinding::Kid(key_id.to_string()),
    };
    let header_b64 = header.to_base64()?;
    let payload_b64 = Payload::Json(serde_json::to_value(account_key)?).to_base64()?;

    let pkey = PKey::hmac(&mac_key)?;
    let mut signer = Signer::new(MessageDigest::sha256(), &pkey)?;
    signer.update(format!("{}.{}", header_b64.as_str(), payload_b64.as_str()).as_bytes())?;
    let mac = signer.sign_to_vec()?;

    Ok(Jws::new(&header_b64, &payload_b64, &Base64::new(mac)))
}
