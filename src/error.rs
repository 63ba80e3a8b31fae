use thiserror::Error;

use crate::{
    directory::DirectoryError,
    jwk::JwkError,
    nonce::NonceError,
    problem::{Problem, ProblemKind},
    protection::ProtectionError,
    signature::SignatureError,
    transport::TransportError,
};

/// 協定引擎所有公開操作回傳的錯誤。
#[derive(Debug, Error)]
pub enum AcmeError {
    /// 傳輸層失敗（連線、逾時等）。
    #[error("Network error: {0}")]
    Network(#[from] TransportError),
    /// 伺服器回應既不是預期的資源，也不是合法的問題文件。
    #[error("Malformed response (status {status}): {reason}")]
    MalformedResponse { status: u16, reason: String },
    /// 伺服器以問題文件拒絕了請求。
    #[error("{0}")]
    Protocol(Problem),
    /// 帳戶缺少 URL，請求尚未送出即失敗。
    #[error("malformed account: missing account URL")]
    MissingAccountUrl,
    /// 帳戶沒有 orders 集合 URL，請求尚未送出即失敗。
    #[error("no order collection for account")]
    NoOrderCollection,
    /// 其他在送出請求前就被拒絕的情況，例如帳戶選項回傳的錯誤。
    #[error("{0}")]
    Local(String),
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    Protection(ProtectionError),
    #[error("Nonce error: {0}")]
    Nonce(#[from] NonceError),
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AcmeError>;

impl AcmeError {
    /// 若錯誤來自伺服器的問題文件則回傳之。
    pub fn problem(&self) -> Option<&Problem> {
        match self {
            AcmeError::Protocol(problem) => Some(problem),
            _ => None,
        }
    }

    pub fn is_problem(&self, kind: ProblemKind) -> bool {
        self.problem().is_some_and(|p| p.is(kind))
    }
}

impl From<Problem> for AcmeError {
    fn from(problem: Problem) -> Self {
        AcmeError::Protocol(problem)
    }
}

// 金鑰類型無法對應時，不論在哪一層被偵測到都回報為簽名錯誤。
impl From<ProtectionError> for AcmeError {
    fn from(e: ProtectionError) -> Self {
        match e {
            ProtectionError::Signature(e) => AcmeError::Signature(e),
            ProtectionError::Jwk(
                JwkError::UnsupportedKeyType(name) | JwkError::UnsupportedCurve(name),
            ) => AcmeError::Signature(SignatureError::UnsupportedKeyType(name)),
            other => AcmeError::Protection(other),
        }
    }
}
