use std::collections::BTreeMap;

use openssl::{
    bn::{BigNum, BigNumContext},
    ec::{EcGroup, EcKey},
    error::ErrorStack,
    nid::Nid,
    pkey::{Id, PKey, Public},
    rsa::Rsa,
    sha::sha256,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::base64::{Base64, DecodeError};

/// JWK 相關操作的錯誤類型。
#[derive(Debug, Error)]
pub enum JwkError {
    /// 無法對應到任何 JWK 格式的金鑰類型。
    #[error("unknown key type: {0}")]
    UnsupportedKeyType(String),
    /// 不支援的橢圓曲線。
    #[error("unsupported curve: {0}")]
    UnsupportedCurve(String),
    #[error("Failed to convert key: {0}")]
    KeyConversionError(#[from] ErrorStack),
    #[error("Base64 decode error: {0}")]
    Base64(#[from] DecodeError),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, JwkError>;

/// JSON Web Key (RFC 7517) 的公開部分，支援 RSA 與 EC 兩種金鑰。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kty")]
pub enum Jwk {
    #[serde(rename = "RSA")]
    Rsa(RsaJwk),
    #[serde(rename = "EC")]
    Ec(EcJwk),
}

/// RSA 公鑰參數，皆為 base64url 編碼的大端整數。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsaJwk {
    pub n: String,
    pub e: String,
}

/// EC 公鑰參數，座標依曲線長度補零後編碼。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcJwk {
    pub crv: String,
    pub x: String,
    pub y: String,
}

/// 支援的曲線：(JWK 名稱, OpenSSL NID, 座標位元組長度)。
const CURVES: [(&str, Nid, i32); 3] = [
    ("P-256", Nid::X9_62_PRIME256V1, 32),
    ("P-384", Nid::SECP384R1, 48),
    ("P-521", Nid::SECP521R1, 66),
];

/// 回傳金鑰類型的可讀名稱，用於錯誤訊息。
pub(crate) fn key_type_name(id: Id) -> String {
    match id {
        Id::RSA => "RSA".to_string(),
        Id::EC => "EC".to_string(),
        Id::DSA => "DSA".to_string(),
        Id::ED25519 => "Ed25519".to_string(),
        Id::HMAC => "HMAC".to_string(),
        other => format!("{:?}", other),
    }
}

impl Jwk {
    /// 由 OpenSSL 公鑰建立 JWK。
    ///
    /// # 錯誤
    ///
    /// 金鑰類型不是 RSA 或 EC、或曲線不在 P-256/P-384/P-521 之列時回傳錯誤。
    pub fn from_public_key(key: &PKey<Public>) -> Result<Self> {
        match key.id() {
            Id::RSA => {
                let rsa = key.rsa()?;
                Ok(Jwk::Rsa(RsaJwk {
                    n: Base64::new(rsa.n().to_vec()).base64_url(),
                    e: Base64::new(rsa.e().to_vec()).base64_url(),
                }))
            }
            Id::EC => {
                let ec = key.ec_key()?;
                let nid = ec.group().curve_name();
                let (crv, _, len) = CURVES
                    .iter()
                    .find(|(_, n, _)| Some(*n) == nid)
                    .ok_or_else(|| {
                        JwkError::UnsupportedCurve(
                            nid.and_then(|n| n.short_name().ok())
                                .unwrap_or("unnamed")
                                .to_string(),
                        )
                    })?;

                let mut ctx = BigNumContext::new()?;
                let mut x = BigNum::new()?;
                let mut y = BigNum::new()?;
                ec.public_key()
                    .affine_coordinates_gfp(ec.group(), &mut x, &mut y, &mut ctx)?;

                Ok(Jwk::Ec(EcJwk {
                    crv: crv.to_string(),
                    x: Base64::new(x.to_vec_padded(*len)?).base64_url(),
                    y: Base64::new(y.to_vec_padded(*len)?).base64_url(),
                }))
            }
            other => Err(JwkError::UnsupportedKeyType(key_type_name(other))),
        }
    }

    /// 將 JWK 還原為 OpenSSL 公鑰，用於驗證簽名。
    pub fn to_public_key(&self) -> Result<PKey<Public>> {
        match self {
            Jwk::Rsa(jwk) => {
                let n = BigNum::from_slice(&Base64::from_url(&jwk.n)?.decode()?)?;
                let e = BigNum::from_slice(&Base64::from_url(&jwk.e)?.decode()?)?;
                Ok(PKey::from_rsa(Rsa::from_public_components(n, e)?)?)
            }
            Jwk::Ec(jwk) => {
                let (_, nid, _) = CURVES
                    .iter()
                    .find(|(name, _, _)| *name == jwk.crv)
                    .ok_or_else(|| JwkError::UnsupportedCurve(jwk.crv.clone()))?;
                let group = EcGroup::from_curve_name(*nid)?;
                let x = BigNum::from_slice(&Base64::from_url(&jwk.x)?.decode()?)?;
                let y = BigNum::from_slice(&Base64::from_url(&jwk.y)?.decode()?)?;
                let ec = EcKey::from_public_key_affine_coordinates(&group, &x, &y)?;
                Ok(PKey::from_ec_key(ec)?)
            }
        }
    }

    /// 產生 RFC 7638 規定的正規 JSON：只含必要成員、鍵名排序、無空白。
    pub fn to_acme_json(&self) -> Result<String> {
        let mut map = BTreeMap::new();
        match self {
            Jwk::Rsa(jwk) => {
                map.insert("e", jwk.e.as_str());
                map.insert("kty", "RSA");
                map.insert("n", jwk.n.as_str());
            }
            Jwk::Ec(jwk) => {
                map.insert("crv", jwk.crv.as_str());
                map.insert("kty", "EC");
                map.insert("x", jwk.x.as_str());
                map.insert("y", jwk.y.as_str());
            }
        }
        Ok(serde_json::to_string(&map)?)
    }

    /// 計算 JWK thumbprint：正規 JSON 的 SHA-256，再以 base64url 編碼。
    ///
    /// 帳戶註冊前以此識別金鑰，挑戰的 key authorization 也依賴此值。
    pub fn thumbprint(&self) -> Result<String> {
        let hash = sha256(self.to_acme_json()?.as_bytes());
        Ok(Base64::new(hash).base64_url())
    }
}
