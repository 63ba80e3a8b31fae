use openssl::{
    ec::{EcGroup, EcKey},
    error::ErrorStack,
    nid::Nid,
    pkey::{Id, PKey, Private, Public},
    rsa::Rsa,
    sign::Signer,
};
use thiserror::Error;

use crate::{
    jwk::{Jwk, JwkError},
    signature::{ecdsa_der_to_jws, AccountSigner, SignatureAlgorithm, SignatureError},
};

/// 鍵相關操作的錯誤列舉。
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("OpenSSL error: {0}")]
    OpenSSL(#[from] ErrorStack),
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("JWK error: {0}")]
    JwkError(#[from] JwkError),
}

type Result<T> = std::result::Result<T, KeyError>;

/// 表示一組非對稱加密的金鑰對，是 [`AccountSigner`] 的預設實作。
///
/// 金鑰的產生與保存屬於呼叫端的責任，此結構只負責持有與簽名。
#[derive(Debug, Clone)]
pub struct KeyPair {
    /// 私鑰，使用 OpenSSL 的 `PKey` 封裝。
    pub pri_key: PKey<Private>,
    /// 公鑰，從私鑰派生而來。
    pub pub_key: PKey<Public>,
}

impl KeyPair {
    /// 預設的 RSA 金鑰位數。
    const DEFAULT_RSA_BITS: u32 = 2048;
    /// 預設的橢圓曲線。
    const DEFAULT_CURVE: &'static str = "P-256";

    /// 依演算法名稱產生新的金鑰對。
    ///
    /// `alg_name` 不區分大小寫：`"RSA"` 產生 RSA 金鑰（`bits` 預設 2048），
    /// `"EC"` 或 `"ECDSA"` 產生 P-256 金鑰。
    pub fn generate(alg_name: &str, bits: Option<u32>) -> Result<Self> {
        match alg_name.to_uppercase().as_str() {
            "RSA" => {
                let rsa = Rsa::generate(bits.unwrap_or(Self::DEFAULT_RSA_BITS))?;
                Self::from_private_key(PKey::from_rsa(rsa)?)
            }
            "EC" | "ECDSA" => Self::generate_ec(Self::DEFAULT_CURVE),
            other => Err(KeyError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    /// 在指定曲線（`P-256`、`P-384`、`P-521`）上產生 EC 金鑰。
    pub fn generate_ec(curve: &str) -> Result<Self> {
        let nid = match curve {
            "P-256" => Nid::X9_62_PRIME256V1,
            "P-384" => Nid::SECP384R1,
            "P-521" => Nid::SECP521R1,
            other => return Err(KeyError::UnsupportedAlgorithm(other.to_string())),
        };
        let group = EcGroup::from_curve_name(nid)?;
        Self::from_private_key(PKey::from_ec_key(EcKey::generate(&group)?)?)
    }

    /// 根據 PEM 格式的私鑰資料建立金鑰對。
    pub fn from_pem(pri_key_pem: &[u8]) -> Result<Self> {
        Self::from_private_key(PKey::private_key_from_pem(pri_key_pem)?)
    }

    /// 以 PKCS#8 PEM 格式匯出私鑰，供呼叫端自行保存。
    pub fn to_pem(&self) -> Result<Vec<u8>> {
        Ok(self.pri_key.private_key_to_pem_pkcs8()?)
    }

    fn from_private_key(pri_key: PKey<Private>) -> Result<Self> {
        let pub_key = Self::derive_public_key(&pri_key)?;
        Ok(Self { pri_key, pub_key })
    }

    /// 根據私鑰派生出對應的公鑰。
    fn derive_public_key(pri_key: &PKey<Private>) -> Result<PKey<Public>> {
        match pri_key.id() {
            Id::RSA => {
                let rsa = pri_key.rsa()?;
                let pub_rsa =
                    Rsa::from_public_components(rsa.n().to_owned()?, rsa.e().to_owned()?)?;
                Ok(PKey::from_rsa(pub_rsa)?)
            }
            Id::EC => {
                let ec = pri_key.ec_key()?;
                let pub_ec = EcKey::from_public_key(ec.group(), ec.public_key())?;
                Ok(PKey::from_ec_key(pub_ec)?)
            }
            other => Err(KeyError::UnsupportedAlgorithm(format!("{:?}", other))),
        }
    }

    pub fn jwk(&self) -> Result<Jwk> {
        Ok(Jwk::from_public_key(&self.pub_key)?)
    }

    /// 計算並回傳金鑰的 thumbprint，用於唯一識別金鑰。
    pub fn thumbprint(&self) -> Result<String> {
        Ok(self.jwk()?.thumbprint()?)
    }
}

impl AccountSigner for KeyPair {
    fn public_key(&self) -> std::result::Result<PKey<Public>, SignatureError> {
        Ok(self.pub_key.clone())
    }

    fn sign(
        &self,
        alg: SignatureAlgorithm,
        data: &[u8],
    ) -> std::result::Result<Vec<u8>, SignatureError> {
        let expected = SignatureAlgorithm::for_key(&self.pub_key)?;
        if expected != alg {
            return Err(SignatureError::SigningError(format!(
                "key requires {}, asked to sign with {}",
                expected, alg
            )));
        }

        let mut signer = Signer::new(alg.digest(), &self.pri_key)?;
        signer.update(data)?;
        let signature = signer.sign_to_vec()?;

        match alg {
            SignatureAlgorithm::Rs256 => Ok(signature),
            _ => ecdsa_der_to_jws(&signature, alg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_rejects_unknown_algorithm() {
        assert!(matches!(
            KeyPair::generate("DSA", None),
            Err(KeyError::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(
            KeyPair::generate_ec("P-192"),
            Err(KeyError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_pem_round_trip_keeps_thumbprint() -> Result<()> {
        let key = KeyPair::generate("ecdsa", None)?;
        let restored = KeyPair::from_pem(&key.to_pem()?)?;
        assert_eq!(key.thumbprint()?, restored.thumbprint()?);
        Ok(())
    }

    #[test]
    fn test_distinct_keys_have_distinct_thumbprints() -> Result<()> {
        let a = KeyPair::generate("RSA", Some(2048))?;
        let b = KeyPair::generate("RSA", Some(2048))?;
        assert_ne!(a.thumbprint()?, b.thumbprint()?);
        assert_eq!(a.thumbprint()?, a.thumbprint()?);
        Ok(())
    }

    #[test]
    fn test_sign_rejects_mismatched_algorithm() -> Result<()> {
        let key = KeyPair::generate_ec("P-256")?;
        let err = key.sign(SignatureAlgorithm::Rs256, b"data").unwrap_err();
        assert!(matches!(err, SignatureError::SigningError(_)));
        Ok(())
    }
}
