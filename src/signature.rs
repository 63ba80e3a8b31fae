use std::fmt;

use openssl::{
    bn::BigNum,
    ecdsa::EcdsaSig,
    hash::MessageDigest,
    nid::Nid,
    pkey::{Id, PKey, Public},
    sign::Verifier,
};
use thiserror::Error;

use crate::{base64::Base64, jwk::key_type_name};

/// 定義簽名操作可能遇到的錯誤類型。
#[derive(Debug, Error)]
pub enum SignatureError {
    /// 金鑰類型無法對應到任何 JWS 演算法。
    #[error("unknown key type: {0}")]
    UnsupportedKeyType(String),
    /// 簽名過程中發生錯誤，附帶錯誤訊息。
    #[error("Signing error: {0}")]
    SigningError(String),
}

impl From<openssl::error::ErrorStack> for SignatureError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        SignatureError::SigningError(e.to_string())
    }
}

type Result<T> = std::result::Result<T, SignatureError>;

/// ACME 帳戶金鑰可使用的 JWS 演算法。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
    Rs256,
    Es256,
    Es384,
    Es512,
}

impl SignatureAlgorithm {
    /// 依公鑰類型決定演算法：RSA 使用 RS256，EC 依曲線選擇 ES256/ES384/ES512。
    ///
    /// 無法對應的金鑰一律回傳 [`SignatureError::UnsupportedKeyType`]，不做任何猜測。
    pub fn for_key(key: &PKey<Public>) -> Result<Self> {
        match key.id() {
            Id::RSA => Ok(Self::Rs256),
            Id::EC => {
                let ec = key
                    .ec_key()
                    .map_err(|e| SignatureError::UnsupportedKeyType(e.to_string()))?;
                match ec.group().curve_name() {
                    Some(Nid::X9_62_PRIME256V1) => Ok(Self::Es256),
                    Some(Nid::SECP384R1) => Ok(Self::Es384),
                    Some(Nid::SECP521R1) => Ok(Self::Es512),
                    other => Err(SignatureError::UnsupportedKeyType(format!(
                        "EC curve {}",
                        other
                            .and_then(|n| n.short_name().ok())
                            .unwrap_or("unnamed")
                    ))),
                }
            }
            other => Err(SignatureError::UnsupportedKeyType(key_type_name(other))),
        }
    }

    /// 回傳 JWS `alg` 欄位使用的名稱。
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rs256 => "RS256",
            Self::Es256 => "ES256",
            Self::Es384 => "ES384",
            Self::Es512 => "ES512",
        }
    }

    pub fn digest(&self) -> MessageDigest {
        match self {
            Self::Rs256 | Self::Es256 => MessageDigest::sha256(),
            Self::Es384 => MessageDigest::sha384(),
            Self::Es512 => MessageDigest::sha512(),
        }
    }

    /// ECDSA 簽名中 r 與 s 各自的固定長度；RSA 回傳 `None`。
    fn coordinate_len(&self) -> Option<usize> {
        match self {
            Self::Rs256 => None,
            Self::Es256 => Some(32),
            Self::Es384 => Some(48),
            Self::Es512 => Some(66),
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 帳戶簽名者的抽象，任何能提供公鑰並對位元組簽名的物件都可作為帳戶金鑰。
///
/// 實作者回傳的簽名必須是 JWS 格式：RSA 為 PKCS#1 v1.5 簽名，
/// ECDSA 為固定長度的 `r || s`（可使用 [`ecdsa_der_to_jws`] 轉換）。
pub trait AccountSigner: Send + Sync + fmt::Debug {
    /// 回傳與簽名私鑰對應的公鑰。
    fn public_key(&self) -> Result<PKey<Public>>;

    /// 以指定演算法對資料簽名。
    fn sign(&self, alg: SignatureAlgorithm, data: &[u8]) -> Result<Vec<u8>>;

    /// 由公鑰推導出應使用的演算法。
    fn algorithm(&self) -> Result<SignatureAlgorithm> {
        SignatureAlgorithm::for_key(&self.public_key()?)
    }
}

/// 將 OpenSSL 產生的 DER 格式 ECDSA 簽名轉為 JWS 使用的 `r || s`。
pub fn ecdsa_der_to_jws(der: &[u8], alg: SignatureAlgorithm) -> Result<Vec<u8>> {
    let len = alg.coordinate_len().ok_or_else(|| {
        SignatureError::SigningError(format!("{} is not an ECDSA algorithm", alg))
    })?;
    let sig = EcdsaSig::from_der(der)?;
    let mut out = sig.r().to_vec_padded(len as i32)?;
    out.extend(sig.s().to_vec_padded(len as i32)?);
    Ok(out)
}

/// 根據 header 與 payload 的 base64url 編碼組合出簽名輸入並簽名。
///
/// 簽名輸入為 `ASCII(BASE64URL(header) || '.' || BASE64URL(payload))`。
pub fn create_signature(
    header_b64: &Base64,
    payload_b64: &Base64,
    signer: &dyn AccountSigner,
    alg: SignatureAlgorithm,
) -> Result<Base64> {
    let signing_input = format!("{}.{}", header_b64.as_str(), payload_b64.as_str());
    let signature = signer.sign(alg, signing_input.as_bytes())?;
    Ok(Base64::new(signature))
}

/// 以公鑰驗證 JWS 簽名。
pub fn verify_signature(
    key: &PKey<Public>,
    alg: SignatureAlgorithm,
    signing_input: &[u8],
    signature: &[u8],
) -> Result<bool> {
    let der;
    let signature = match alg.coordinate_len() {
        Some(len) => {
            if signature.len() != len * 2 {
                return Ok(false);
            }
            let r = BigNum::from_slice(&signature[..len])?;
            let s = BigNum::from_slice(&signature[len..])?;
            der = EcdsaSig::from_private_components(r, s)?.to_der()?;
            der.as_slice()
        }
        None => signature,
    };

    let mut verifier = Verifier::new(alg.digest(), key)?;
    verifier.update(signing_input)?;
    Ok(verifier.verify(signature)?)
}
