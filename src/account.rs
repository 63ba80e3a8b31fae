//! ACME 帳戶資源與其操作：註冊、更新、停用、金鑰輪替與訂單列表。

use std::{collections::HashSet, fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    client::{Client, SignedResponse},
    error::{AcmeError, Result},
    order::OrderList,
    payload::{DeactivatePayload, NewAccountRequest, PayloadT, UpdateAccountPayload},
    protection::{self, signer_jwk, InnerEnvelope, Protection, ProtectionError},
    signature::AccountSigner,
};

/// 帳戶狀態。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    #[default]
    Valid,
    Deactivated,
    Revoked,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Valid => "valid",
            AccountStatus::Deactivated => "deactivated",
            AccountStatus::Revoked => "revoked",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 伺服器回傳的帳戶物件。
#[derive(Debug, Clone, Deserialize)]
struct AccountBody {
    status: AccountStatus,
    #[serde(default)]
    contact: Vec<String>,
    #[serde(default)]
    orders: Option<String>,
}

/// 表示 ACME 帳戶的結構體。
///
/// 帳戶只是伺服器狀態的快照，所有操作都回傳新的 [`Account`]，失敗時呼叫端手上的值不變。
#[derive(Debug, Clone)]
pub struct Account {
    /// 帳戶金鑰。
    pub private_key: Arc<dyn AccountSigner>,
    /// 帳戶 URL，同時也是之後所有請求的 `kid`。
    pub url: String,
    pub status: AccountStatus,
    pub contact: Vec<String>,
    /// 訂單集合的 URL。
    pub orders: Option<String>,
    /// 帳戶公鑰的 JWK thumbprint，用於計算 key authorization。
    pub thumbprint: String,
}

impl Account {
    /// 以金鑰建立尚未註冊的帳戶。
    pub fn new(private_key: Arc<dyn AccountSigner>) -> Self {
        Self {
            private_key,
            url: String::new(),
            status: AccountStatus::Valid,
            contact: Vec::new(),
            orders: None,
            thumbprint: String::new(),
        }
    }

    /// 以已知的帳戶 URL 建立帳戶，其他欄位可透過 [`Client::update_account`] 向伺服器取得。
    pub fn with_url(private_key: Arc<dyn AccountSigner>, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::new(private_key)
        }
    }

    fn apply(&mut self, body: AccountBody) {
        self.status = body.status;
        self.contact = body.contact;
        self.orders = body.orders;
    }

    fn refresh_thumbprint(&mut self) -> Result<()> {
        let jwk = signer_jwk(self.private_key.as_ref())?;
        self.thumbprint = jwk.thumbprint().map_err(ProtectionError::from)?;
        Ok(())
    }

    fn require_url(&self) -> Result<&str> {
        if self.url.is_empty() {
            return Err(AcmeError::MissingAccountUrl);
        }
        Ok(&self.url)
    }
}

// 金鑰以指標比較：兩個帳戶只有持有同一把金鑰時才相等。
impl PartialEq for Account {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.private_key, &other.private_key)
            && self.url == other.url
            && self.status == other.status
            && self.contact == other.contact
            && self.orders == other.orders
            && self.thumbprint == other.thumbprint
    }
}

/// newAccount 請求的選項函式，依序套用於簽名者、帳戶、請求與客戶端。
///
/// 任一選項回傳錯誤時整個註冊流程立即中止，錯誤原樣回傳給呼叫端。
pub type NewAccountOption = Box<
    dyn Fn(&dyn AccountSigner, &mut Account, &mut NewAccountRequest, &Client) -> Result<()>
        + Send
        + Sync,
>;

/// 只取回已綁定此金鑰的既有帳戶，不建立新帳戶。
pub fn only_return_existing() -> NewAccountOption {
    Box::new(|_, _, request, _| {
        request.only_return_existing = true;
        Ok(())
    })
}

/// 同意伺服器的服務條款。
pub fn agree_tos() -> NewAccountOption {
    Box::new(|_, _, request, _| {
        request.terms_of_service_agreed = true;
        Ok(())
    })
}

/// 設定帳戶聯絡資訊，例如 `mailto:admin@example.com`。
pub fn with_contacts<S: AsRef<str>>(contacts: &[S]) -> NewAccountOption {
    let contacts: Vec<String> = contacts.iter().map(|c| c.as_ref().to_string()).collect();
    Box::new(move |_, _, request, _| {
        request.contact = contacts.clone();
        Ok(())
    })
}

/// 附上外部帳戶綁定。`hmac_key` 為 CA 提供的 base64url 編碼金鑰。
pub fn external_account_binding(key_id: &str, hmac_key: &str) -> NewAccountOption {
    let key_id = key_id.to_string();
    let hmac_key = hmac_key.to_string();
    Box::new(move |signer, _, request, client| {
        let jwk = signer_jwk(signer)?;
        let eab = protection::external_account_binding(
            &key_id,
            &hmac_key,
            &jwk,
            &client.directory().new_account,
        )?;
        request.external_account_binding = Some(eab);
        Ok(())
    })
}

impl Client {
    /// 註冊新帳戶，或在 `only_return_existing` 為 `true` 時取回既有帳戶。
    ///
    /// 伺服器回應的 `Location` 會成為帳戶 URL。
    pub fn new_account<S: AsRef<str>>(
        &self,
        private_key: Arc<dyn AccountSigner>,
        only_return_existing: bool,
        terms_of_service_agreed: bool,
        contacts: &[S],
    ) -> Result<Account> {
        let mut options = Vec::new();
        if only_return_existing {
            options.push(self::only_return_existing());
        }
        if terms_of_service_agreed {
            options.push(agree_tos());
        }
        if !contacts.is_empty() {
            options.push(with_contacts(contacts));
        }
        self.new_account_options(private_key, &options)
    }

    /// 依序套用選項後送出 newAccount 請求。
    ///
    /// # Errors
    ///
    /// 選項回傳的錯誤會原樣回傳，且不會送出任何請求。
    pub fn new_account_options(
        &self,
        private_key: Arc<dyn AccountSigner>,
        options: &[NewAccountOption],
    ) -> Result<Account> {
        let mut account = Account::new(private_key.clone());
        let mut request = NewAccountRequest::default();
        for option in options {
            option(private_key.as_ref(), &mut account, &mut request, self)?;
        }
        if self.directory().external_account_required()
            && !request.only_return_existing
            && request.external_account_binding.is_none()
        {
            return Err(AcmeError::Local(
                "server requires external account binding".to_string(),
            ));
        }

        let response: SignedResponse<AccountBody> = self.post(
            &self.directory().new_account,
            private_key.as_ref(),
            None,
            &request.to_payload()?,
        )?;
        account.url = response
            .location()
            .ok_or_else(|| AcmeError::MalformedResponse {
                status: response.response.status,
                reason: "newAccount response without Location header".to_string(),
            })?;
        account.apply(response.value);
        account.refresh_thumbprint()?;

        debug!(url = %account.url, status = %account.status, "account registered");
        Ok(account)
    }

    /// 更新帳戶聯絡資訊並回傳伺服器上的最新帳戶。
    ///
    /// `contacts` 為空時只送出 `{}`，伺服器上的聯絡資訊不會改變，
    /// 可用來重新取得帳戶狀態。
    ///
    /// # Errors
    ///
    /// 帳戶沒有 URL 時回傳 [`AcmeError::MissingAccountUrl`]。
    pub fn update_account<S: AsRef<str>>(
        &self,
        account: &Account,
        contacts: &[S],
    ) -> Result<Account> {
        let url = account.require_url()?;
        let payload = UpdateAccountPayload {
            contact: contacts.iter().map(|c| c.as_ref().to_string()).collect(),
        };
        let response: SignedResponse<AccountBody> =
            self.post(url, account.private_key.as_ref(), Some(url), &payload.to_payload()?)?;

        let mut updated = account.clone();
        updated.apply(response.value);
        if updated.thumbprint.is_empty() {
            updated.refresh_thumbprint()?;
        }
        Ok(updated)
    }

    /// 停用帳戶。停用是終態，之後該帳戶的請求都會被伺服器拒絕。
    pub fn deactivate_account(&self, account: &Account) -> Result<Account> {
        let url = account.require_url()?;
        let response: SignedResponse<AccountBody> = self.post(
            url,
            account.private_key.as_ref(),
            Some(url),
            &DeactivatePayload::new().to_payload()?,
        )?;

        let mut updated = account.clone();
        updated.apply(response.value);
        debug!(url, status = %updated.status, "account deactivated");
        Ok(updated)
    }

    /// 將帳戶金鑰更換為 `new_key`。
    ///
    /// 內層 JWS 由新金鑰簽名，外層由目前的帳戶金鑰簽名。成功時回傳使用新金鑰的帳戶；
    /// 失敗時伺服器上的金鑰不變。
    ///
    /// # Errors
    ///
    /// - 舊金鑰類型不受支援時回傳 [`AcmeError::Signature`]。
    /// - 新金鑰簽名失敗時回傳 [`ProtectionError::InnerSignature`]，此時不會送出任何請求。
    /// - 舊金鑰簽名失敗時回傳 [`ProtectionError::OuterSignature`]。
    pub fn account_key_change(
        &self,
        account: &Account,
        new_key: Arc<dyn AccountSigner>,
    ) -> Result<Account> {
        account.private_key.algorithm()?;
        let old_key = signer_jwk(account.private_key.as_ref())?;
        let account_url = account.require_url()?;
        let url = &self.directory().key_change;

        let inner = InnerEnvelope::sign(new_key.as_ref(), url, account_url, old_key)?;
        let outer = Protection::with_kid(account.private_key.as_ref(), account_url)
            .map_err(|e| ProtectionError::OuterSignature(Box::new(e)))?;
        let response: SignedResponse<Option<AccountBody>> =
            self.post_jws(url, |nonce| Ok(inner.wrap(&outer, url, nonce)?))?;

        let mut updated = account.clone();
        updated.private_key = new_key;
        if let Some(body) = response.value {
            updated.apply(body);
        }
        updated.refresh_thumbprint()?;

        debug!(url = account_url, "account key changed");
        Ok(updated)
    }

    /// 取得帳戶的所有訂單 URL，會依 `Link: rel="next"` 走訪所有分頁。
    ///
    /// # Errors
    ///
    /// 帳戶沒有 orders URL 時回傳 [`AcmeError::NoOrderCollection`]，不會送出任何請求。
    pub fn fetch_order_list(&self, account: &Account) -> Result<OrderList> {
        let orders_url = match account.orders.as_deref() {
            Some(url) if !url.is_empty() => url,
            _ => return Err(AcmeError::NoOrderCollection),
        };
        let account_url = account.require_url()?;

        let mut list = OrderList::default();
        let mut visited = HashSet::new();
        let mut next = Some(orders_url.to_string());
        while let Some(page) = next.take() {
            if !visited.insert(page.clone()) {
                warn!(url = %page, "order list pagination loops back, stopping");
                break;
            }
            let response: SignedResponse<OrderList> =
                self.post_as_get(&page, account.private_key.as_ref(), account_url)?;
            next = response.links("next").into_iter().next();
            list.orders.extend(response.value.orders);
        }
        Ok(list)
    }
}
