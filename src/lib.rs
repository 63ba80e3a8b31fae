//! # ACME 帳戶協定引擎
//!
//! 本庫實作 RFC 8555 中帶簽名請求的部分：nonce 管理、JWS 簽名信封、
//! 以及 ACME 帳戶資源的各項操作。
//!
//! - **client**: [`Client`] 負責取用 nonce、簽名、送出請求並將錯誤回應對應為 [`Problem`]，
//!   遇到 `badNonce` 時會以新的 nonce 自動重試一次。
//! - **account**: 帳戶的註冊、更新、停用、金鑰輪替與訂單列表。
//! - **protection**: 一般請求與金鑰輪替（內外兩層 JWS）的簽名信封，以及外部帳戶綁定。
//! - **nonce**: 執行緒安全的一次性 nonce 池。
//! - **transport**: HTTP 傳輸層抽象，預設使用 `reqwest` 的阻塞式客戶端。
//!
//! 帳戶金鑰透過 [`AccountSigner`] 抽象提供，[`KeyPair`] 是基於 OpenSSL 的預設實作，
//! 支援 RSA（RS256）以及 P-256、P-384、P-521（ES256、ES384、ES512）。
//!
//! ## 示例
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use racme_protocol::{Client, KeyPair};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 1. 連線到 ACME 目錄
//!     let client = Client::builder().staging().build()?;
//!
//!     // 2. 以新的金鑰註冊帳戶
//!     let key = Arc::new(KeyPair::generate_ec("P-256")?);
//!     let account = client.new_account(key, false, true, &["mailto:admin@example.com"])?;
//!
//!     // 3. 更換帳戶金鑰
//!     let new_key = Arc::new(KeyPair::generate("RSA", Some(2048))?);
//!     let account = client.account_key_change(&account, new_key)?;
//!
//!     // 4. 列出帳戶的所有訂單
//!     let orders = client.fetch_order_list(&account)?;
//!     println!("{} orders", orders.len());
//!
//!     Ok(())
//! }
//! ```

pub mod account;
pub mod base64;
pub mod client;
pub mod directory;
pub mod error;
pub mod jwk;
pub mod jws;
pub mod key_pair;
pub mod nonce;
pub mod order;
pub mod payload;
pub mod problem;
pub mod protection;
pub mod signature;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use account::{Account, AccountStatus, NewAccountOption};
pub use client::{Client, ClientBuilder};
pub use error::AcmeError;
pub use key_pair::KeyPair;
pub use order::OrderList;
pub use problem::{Problem, ProblemKind};
pub use signature::AccountSigner;
