use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

pub use base64::DecodeError;

/// 以 URL 安全、無填充的 Base64 形式保存資料，JWS 的每個區段都使用此格式。
///
/// # 示例
///
/// ```
/// # use racme_protocol::base64::Base64;
/// let b64 = Base64::new("Hello, World!");
/// assert_eq!(b64.base64_url(), "SGVsbG8sIFdvcmxkIQ");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64 {
    encoded: String,
}

impl Base64 {
    /// 將任意可轉為位元組切片的輸入編碼。
    pub fn new<T: AsRef<[u8]>>(input: T) -> Self {
        Self {
            encoded: URL_SAFE_NO_PAD.encode(input),
        }
    }

    /// 由已編碼的 URL 安全字串建立實例，並驗證其可被解碼。
    ///
    /// # 錯誤
    ///
    /// 字串含有非法字元或長度不正確時回傳 [`DecodeError`]。
    pub fn from_url(url_encoded: &str) -> Result<Self, DecodeError> {
        URL_SAFE_NO_PAD.decode(url_encoded)?;
        Ok(Self {
            encoded: url_encoded.to_string(),
        })
    }

    /// 解碼回原始位元組。
    pub fn decode(&self) -> Result<Vec<u8>, DecodeError> {
        URL_SAFE_NO_PAD.decode(&self.encoded)
    }

    /// 回傳 URL 安全的編碼字串。
    pub fn base64_url(&self) -> String {
        self.encoded.clone()
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    pub fn is_empty(&self) -> bool {
        self.encoded.is_empty()
    }
}
