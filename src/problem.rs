use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::AcmeError, transport::HttpResponse};

/// ACME 錯誤類型 URN 的共同前綴。
pub const ACME_ERROR_PREFIX: &str = "urn:ietf:params:acme:error:";

/// 伺服器回傳的問題文件（RFC 7807）。
///
/// `problem_type` 依原樣保留，可透過 [`Problem::kind`] 取得型別化的分類。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "type", default)]
    pub problem_type: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(rename = "subproblems", default, skip_serializing_if = "Vec::is_empty")]
    pub sub_problems: Vec<Problem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<Value>,
}

/// RFC 8555 §6.7 定義的錯誤類型，其他值以 [`ProblemKind::Other`] 保留。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProblemKind {
    AccountDoesNotExist,
    AlreadyRevoked,
    BadCsr,
    BadNonce,
    BadPublicKey,
    BadRevocationReason,
    BadSignatureAlgorithm,
    Caa,
    Compound,
    Connection,
    Dns,
    ExternalAccountRequired,
    IncorrectResponse,
    InvalidContact,
    Malformed,
    OrderNotReady,
    RateLimited,
    RejectedIdentifier,
    ServerInternal,
    Tls,
    Unauthorized,
    UnsupportedContact,
    UnsupportedIdentifier,
    UserActionRequired,
    Other(String),
}

impl ProblemKind {
    /// 解析錯誤類型字串；非 ACME 命名空間的值歸類為 `Other`。
    pub fn parse(problem_type: &str) -> Self {
        let Some(name) = problem_type.strip_prefix(ACME_ERROR_PREFIX) else {
            return Self::Other(problem_type.to_string());
        };
        match name {
            "accountDoesNotExist" => Self::AccountDoesNotExist,
            "alreadyRevoked" => Self::AlreadyRevoked,
            "badCSR" => Self::BadCsr,
            "badNonce" => Self::BadNonce,
            "badPublicKey" => Self::BadPublicKey,
            "badRevocationReason" => Self::BadRevocationReason,
            "badSignatureAlgorithm" => Self::BadSignatureAlgorithm,
            "caa" => Self::Caa,
            "compound" => Self::Compound,
            "connection" => Self::Connection,
            "dns" => Self::Dns,
            "externalAccountRequired" => Self::ExternalAccountRequired,
            "incorrectResponse" => Self::IncorrectResponse,
            "invalidContact" => Self::InvalidContact,
            "malformed" => Self::Malformed,
            "orderNotReady" => Self::OrderNotReady,
            "rateLimited" => Self::RateLimited,
            "rejectedIdentifier" => Self::RejectedIdentifier,
            "serverInternal" => Self::ServerInternal,
            "tls" => Self::Tls,
            "unauthorized" => Self::Unauthorized,
            "unsupportedContact" => Self::UnsupportedContact,
            "unsupportedIdentifier" => Self::UnsupportedIdentifier,
            "userActionRequired" => Self::UserActionRequired,
            _ => Self::Other(problem_type.to_string()),
        }
    }
}

impl Problem {
    /// 以 ACME 錯誤名稱（如 `"malformed"`）建立問題文件。
    pub fn new(name: &str, detail: impl Into<String>, status: u16) -> Self {
        Self {
            problem_type: format!("{}{}", ACME_ERROR_PREFIX, name),
            detail: detail.into(),
            status,
            instance: None,
            sub_problems: Vec::new(),
            identifier: None,
        }
    }

    pub fn kind(&self) -> ProblemKind {
        ProblemKind::parse(&self.problem_type)
    }

    pub fn is(&self, kind: ProblemKind) -> bool {
        self.kind() == kind
    }

    /// 將錯誤回應轉換為 [`Problem`]。
    ///
    /// 回應內容必須是帶有非空 `type` 的 JSON 物件，否則視為
    /// [`AcmeError::MalformedResponse`]。缺少 `status` 時沿用 HTTP 狀態碼。
    pub fn from_response(response: &HttpResponse) -> Result<Self, AcmeError> {
        let mut problem: Problem =
            serde_json::from_slice(&response.body).map_err(|e| AcmeError::MalformedResponse {
                status: response.status,
                reason: format!("undecodable problem document: {}", e),
            })?;

        if problem.problem_type.is_empty() {
            return Err(AcmeError::MalformedResponse {
                status: response.status,
                reason: "problem document without type".to_string(),
            });
        }
        if problem.status == 0 {
            problem.status = response.status;
        }
        Ok(problem)
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "acme: error code {} {:?}: {}",
            self.status, self.problem_type, self.detail
        )?;
        for sub in &self.sub_problems {
            write!(f, "; subproblem: {}", sub)?;
        }
        Ok(())
    }
}

impl std::error::Error for Problem {}
