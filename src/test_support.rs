//! 測試用的記憶體內 ACME 伺服器，會實際驗證 JWS 簽名與 nonce。

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use openssl::{
    hash::MessageDigest,
    pkey::{PKey, Public},
    sign::Signer,
};
use serde_json::{json, Value};

use crate::{
    client::Client,
    directory::Directory,
    jwk::Jwk,
    jws::{Jws, ProtectedHeader},
    key_pair::KeyPair,
    payload::{KeyChangePayload, NewAccountRequest},
    problem::Problem,
    signature::{verify_signature, AccountSigner, SignatureAlgorithm, SignatureError},
    transport::{
        HttpRequest, HttpResponse, Method, Transport, TransportError, CONTENT_TYPE, LINK, LOCATION,
        REPLAY_NONCE,
    },
};

pub const BASE: &str = "https://ca.test";

struct AccountRecord {
    url: String,
    key: Jwk,
    thumbprint: String,
    contact: Vec<String>,
    status: &'static str,
    orders: Vec<String>,
}

impl AccountRecord {
    fn body(&self) -> Value {
        json!({
            "status": self.status,
            "contact": self.contact,
            "orders": format!("{}/orders", self.url),
        })
    }
}

#[derive(Default)]
struct State {
    next_nonce: u64,
    live_nonces: HashSet<String>,
    accounts: Vec<AccountRecord>,
    reject_nonces: usize,
    bad_nonce_replies: usize,
    requests: Vec<HttpRequest>,
    page_size: usize,
    eab: Option<(String, Vec<u8>)>,
}

impl State {
    fn fresh_nonce(&mut self) -> String {
        self.next_nonce += 1;
        let nonce = format!("nonce-{}", self.next_nonce);
        self.live_nonces.insert(nonce.clone());
        nonce
    }
}

/// 通過驗證的請求內容。
struct Verified {
    header: ProtectedHeader,
    payload: Vec<u8>,
    account: Option<usize>,
}

type Handled = Result<HttpResponse, Problem>;

pub struct MockAcme {
    state: Mutex<State>,
}

impl MockAcme {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                page_size: 100,
                ..Default::default()
            }),
        })
    }

    pub fn directory() -> Directory {
        Directory {
            new_account: format!("{}/new-acct", BASE),
            new_nonce: format!("{}/new-nonce", BASE),
            new_order: format!("{}/new-order", BASE),
            revoke_cert: format!("{}/revoke-cert", BASE),
            key_change: format!("{}/key-change", BASE),
            renewal_info: None,
            meta: None,
        }
    }

    pub fn client(self: &Arc<Self>) -> Client {
        Client::with_directory(self.clone(), Self::directory())
    }

    /// 接下來的 `n` 個已簽名請求一律回覆 badNonce。
    pub fn reject_next_nonces(&self, n: usize) {
        self.lock().reject_nonces = n;
    }

    pub fn bad_nonce_replies(&self) -> usize {
        self.lock().bad_nonce_replies
    }

    pub fn require_eab(&self, kid: &str, hmac_key: &[u8]) {
        self.lock().eab = Some((kid.to_string(), hmac_key.to_vec()));
    }

    pub fn set_page_size(&self, size: usize) {
        self.lock().page_size = size;
    }

    pub fn add_orders(&self, account_url: &str, count: usize) {
        let mut state = self.lock();
        if let Some(account) = state.accounts.iter_mut().find(|a| a.url == account_url) {
            let start = account.orders.len();
            for i in start..start + count {
                account.orders.push(format!("{}/order/{}", account_url, i));
            }
        }
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.lock().requests.clone()
    }

    pub fn post_count(&self) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.method == Method::Post)
            .count()
    }

    pub fn account_thumbprint(&self, account_url: &str) -> Option<String> {
        self.lock()
            .accounts
            .iter()
            .find(|a| a.url == account_url)
            .map(|a| a.thumbprint.clone())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn route(state: &mut State, request: &HttpRequest) -> Handled {
        let path = request.url.strip_prefix(BASE).unwrap_or_default();
        match (request.method, path) {
            (Method::Get, "/dir") => Ok(json_response(200, &json!(Self::directory()))),
            (Method::Head, "/new-nonce") => Ok(HttpResponse::new(200)),
            (Method::Post, "/new-acct") => {
                let verified = verify(state, request)?;
                new_account(state, verified)
            }
            (Method::Post, "/key-change") => {
                let verified = verify(state, request)?;
                key_change(state, request, verified)
            }
            (Method::Post, p) if p.starts_with("/acct/") && p.contains("/orders") => {
                let verified = verify(state, request)?;
                order_list(state, request, verified)
            }
            (Method::Post, p) if p.starts_with("/acct/") => {
                let verified = verify(state, request)?;
                update_account(state, request, verified)
            }
            _ => Err(Problem::new("malformed", "no such resource", 404)),
        }
    }
}

impl Transport for MockAcme {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut state = self.lock();
        state.requests.push(request.clone());

        let mut response = match Self::route(&mut state, &request) {
            Ok(response) => response,
            Err(problem) => {
                if problem.problem_type.ends_with(":badNonce") {
                    state.bad_nonce_replies += 1;
                }
                json_response(problem.status, &json!(problem))
                    .with_header(CONTENT_TYPE, "application/problem+json")
            }
        };
        if request.method != Method::Get {
            let nonce = state.fresh_nonce();
            response = response.with_header(REPLAY_NONCE, nonce);
        }
        response.url = request.url;
        Ok(response)
    }
}

fn json_response(status: u16, body: &Value) -> HttpResponse {
    HttpResponse::new(status).with_body(body.to_string())
}

fn malformed(detail: &str) -> Problem {
    Problem::new("malformed", detail, 400)
}

fn parse_alg(alg: &str) -> Option<SignatureAlgorithm> {
    [
        SignatureAlgorithm::Rs256,
        SignatureAlgorithm::Es256,
        SignatureAlgorithm::Es384,
        SignatureAlgorithm::Es512,
    ]
    .into_iter()
    .find(|a| a.as_str() == alg)
}

fn signature_valid(jws: &Jws, alg: &str, key: &Jwk) -> bool {
    let (Some(alg), Ok(key), Ok(signature)) =
        (parse_alg(alg), key.to_public_key(), jws.decode_signature())
    else {
        return false;
    };
    verify_signature(&key, alg, jws.signing_input().as_bytes(), &signature).unwrap_or(false)
}

fn verify(state: &mut State, request: &HttpRequest) -> Result<Verified, Problem> {
    let jws: Jws = serde_json::from_slice(&request.body)
        .map_err(|_| malformed("request body is not a flattened JWS"))?;
    let header = jws
        .decode_header()
        .map_err(|_| malformed("undecodable protected header"))?;
    if header.url != request.url {
        return Err(Problem::new("unauthorized", "url header does not match request", 403));
    }

    let nonce = header
        .nonce
        .clone()
        .ok_or_else(|| Problem::new("badNonce", "missing nonce", 400))?;
    if !state.live_nonces.remove(&nonce) {
        return Err(Problem::new("badNonce", "unknown or reused nonce", 400));
    }
    if state.reject_nonces > 0 {
        state.reject_nonces -= 1;
        return Err(Problem::new("badNonce", "nonce expired", 400));
    }

    let (key, account) = match (header.jwk(), header.kid()) {
        (Some(jwk), None) => (jwk.clone(), None),
        (None, Some(kid)) => {
            if !kid.starts_with(&format!("{}/acct/", BASE)) {
                return Err(malformed("kid is missing the expected URL prefix"));
            }
            let index = state
                .accounts
                .iter()
                .position(|a| a.url == kid)
                .ok_or_else(|| Problem::new("accountDoesNotExist", "unknown account", 400))?;
            if state.accounts[index].status != "valid" {
                return Err(Problem::new("unauthorized", "account is not valid", 403));
            }
            (state.accounts[index].key.clone(), Some(index))
        }
        _ => return Err(malformed("exactly one of jwk and kid is required")),
    };

    if !signature_valid(&jws, &header.alg, &key) {
        return Err(malformed("JWS verification error"));
    }
    let payload = jws
        .decode_payload()
        .map_err(|_| malformed("undecodable payload"))?;
    Ok(Verified {
        header,
        payload,
        account,
    })
}

fn validate_contacts(contacts: &[String]) -> Result<(), Problem> {
    for contact in contacts {
        let valid = contact
            .strip_prefix("mailto:")
            .is_some_and(|addr| addr.contains('@') && !addr.contains(' '));
        if !valid {
            return Err(Problem::new(
                "invalidContact",
                format!("invalid contact {:?}", contact),
                400,
            ));
        }
    }
    Ok(())
}

fn check_eab(
    state: &State,
    request: &NewAccountRequest,
    account_key: &Jwk,
) -> Result<(), Problem> {
    let Some((kid, hmac_key)) = &state.eab else {
        return Ok(());
    };
    let eab = request.external_account_binding.as_ref().ok_or_else(|| {
        Problem::new("externalAccountRequired", "external account binding required", 400)
    })?;
    let unauthorized = || Problem::new("unauthorized", "invalid external account binding", 403);

    let header = eab.decode_header().map_err(|_| unauthorized())?;
    if header.alg != "HS256"
        || header.kid() != Some(kid.as_str())
        || header.url != format!("{}/new-acct", BASE)
        || header.nonce.is_some()
    {
        return Err(unauthorized());
    }
    let bound: Jwk = eab
        .decode_payload()
        .ok()
        .and_then(|p| serde_json::from_slice(&p).ok())
        .ok_or_else(unauthorized)?;
    if &bound != account_key {
        return Err(unauthorized());
    }

    let expected = PKey::hmac(hmac_key)
        .and_then(|key| {
            let mut signer = Signer::new(MessageDigest::sha256(), &key)?;
            signer.update(eab.signing_input().as_bytes())?;
            signer.sign_to_vec()
        })
        .map_err(|_| unauthorized())?;
    if eab.decode_signature().ok() != Some(expected) {
        return Err(unauthorized());
    }
    Ok(())
}

fn new_account(state: &mut State, verified: Verified) -> Handled {
    let key = verified
        .header
        .jwk()
        .cloned()
        .ok_or_else(|| malformed("newAccount requests must carry a jwk"))?;
    let request: NewAccountRequest = serde_json::from_slice(&verified.payload)
        .map_err(|_| malformed("undecodable newAccount payload"))?;
    let thumbprint = key
        .thumbprint()
        .map_err(|_| Problem::new("badPublicKey", "cannot thumbprint key", 400))?;

    if let Some(existing) = state.accounts.iter().find(|a| a.thumbprint == thumbprint) {
        return Ok(json_response(200, &existing.body()).with_header(LOCATION, existing.url.clone()));
    }
    if request.only_return_existing {
        return Err(Problem::new(
            "accountDoesNotExist",
            "no account exists with the provided key",
            400,
        ));
    }
    if !request.terms_of_service_agreed {
        return Err(malformed("must agree to terms of service"));
    }
    validate_contacts(&request.contact)?;
    check_eab(state, &request, &key)?;

    let record = AccountRecord {
        url: format!("{}/acct/{}", BASE, state.accounts.len() + 1),
        key,
        thumbprint,
        contact: request.contact,
        status: "valid",
        orders: Vec::new(),
    };
    let response = json_response(201, &record.body()).with_header(LOCATION, record.url.clone());
    state.accounts.push(record);
    Ok(response)
}

fn update_account(state: &mut State, request: &HttpRequest, verified: Verified) -> Handled {
    let index = verified
        .account
        .ok_or_else(|| malformed("account requests must use kid"))?;
    if state.accounts[index].url != request.url {
        return Err(Problem::new("unauthorized", "kid does not own this account", 403));
    }

    if !verified.payload.is_empty() {
        let body: Value = serde_json::from_slice(&verified.payload)
            .map_err(|_| malformed("undecodable account payload"))?;
        if let Some(contact) = body.get("contact") {
            let contact: Vec<String> = serde_json::from_value(contact.clone())
                .map_err(|_| malformed("contact must be a list of strings"))?;
            validate_contacts(&contact)?;
            state.accounts[index].contact = contact;
        }
        match body.get("status").and_then(Value::as_str) {
            Some("deactivated") => state.accounts[index].status = "deactivated",
            Some(other) => {
                return Err(malformed(&format!("cannot move account to {}", other)));
            }
            None => {}
        }
    }
    Ok(json_response(200, &state.accounts[index].body()))
}

fn order_list(state: &mut State, request: &HttpRequest, verified: Verified) -> Handled {
    let index = verified
        .account
        .ok_or_else(|| malformed("order list requests must use kid"))?;
    let account = &state.accounts[index];
    let collection = format!("{}/orders", account.url);
    let (path, query) = request
        .url
        .split_once('?')
        .unwrap_or((request.url.as_str(), ""));
    if path != collection {
        return Err(Problem::new("unauthorized", "not your order list", 403));
    }
    if !verified.payload.is_empty() {
        return Err(malformed("order list must be fetched with POST-as-GET"));
    }

    let page: usize = query
        .strip_prefix("page=")
        .and_then(|p| p.parse().ok())
        .unwrap_or(0);
    let size = state.page_size.max(1);
    let orders: Vec<&String> = account.orders.iter().skip(page * size).take(size).collect();
    let mut response = json_response(200, &json!({ "orders": orders }));
    if account.orders.len() > (page + 1) * size {
        response = response.with_header(
            LINK,
            format!("<{}?page={}>;rel=\"next\"", collection, page + 1),
        );
    }
    Ok(response)
}

fn key_change(state: &mut State, request: &HttpRequest, verified: Verified) -> Handled {
    let index = verified
        .account
        .ok_or_else(|| malformed("key change must be signed with kid"))?;
    let inner: Jws = serde_json::from_slice(&verified.payload)
        .map_err(|_| malformed("key change payload must be a JWS"))?;
    let inner_header = inner
        .decode_header()
        .map_err(|_| malformed("undecodable inner header"))?;
    let new_key = inner_header
        .jwk()
        .cloned()
        .ok_or_else(|| malformed("inner JWS must carry a jwk"))?;
    if inner_header.nonce.is_some() || inner_header.url != request.url {
        return Err(malformed("inner JWS header is invalid"));
    }
    if !signature_valid(&inner, &inner_header.alg, &new_key) {
        return Err(malformed("inner JWS verification error"));
    }

    let change: KeyChangePayload = inner
        .decode_payload()
        .ok()
        .and_then(|p| serde_json::from_slice(&p).ok())
        .ok_or_else(|| malformed("undecodable key change payload"))?;
    let old_thumbprint = change
        .old_key
        .thumbprint()
        .map_err(|_| malformed("invalid oldKey"))?;
    if change.account != state.accounts[index].url
        || old_thumbprint != state.accounts[index].thumbprint
    {
        return Err(malformed("key change does not match the signing account"));
    }

    let new_thumbprint = new_key
        .thumbprint()
        .map_err(|_| Problem::new("badPublicKey", "cannot thumbprint key", 400))?;
    if let Some(owner) = state.accounts.iter().find(|a| a.thumbprint == new_thumbprint) {
        let mut problem = Problem::new("malformed", "new key is already in use", 409);
        problem.instance = Some(owner.url.clone());
        return Err(problem);
    }

    let account = &mut state.accounts[index];
    account.key = new_key;
    account.thumbprint = new_thumbprint;
    Ok(json_response(200, &account.body()))
}

/// 公鑰合法，但每次簽名都失敗的簽名者。
#[derive(Debug)]
pub struct FailingSigner(KeyPair);

impl FailingSigner {
    pub fn new() -> Self {
        Self(KeyPair::generate_ec("P-256").unwrap())
    }
}

impl AccountSigner for FailingSigner {
    fn public_key(&self) -> Result<PKey<Public>, SignatureError> {
        self.0.public_key()
    }

    fn sign(&self, _alg: SignatureAlgorithm, _data: &[u8]) -> Result<Vec<u8>, SignatureError> {
        Err(SignatureError::SigningError(
            "cannot sign key okeydokey".to_string(),
        ))
    }
}

/// 持有 Ed25519 金鑰、無法對應到 ACME 演算法的簽名者。
#[derive(Debug)]
pub struct Ed25519Signer(PKey<Public>);

impl Ed25519Signer {
    pub fn new() -> Self {
        let private = PKey::generate_ed25519().unwrap();
        Self(PKey::public_key_from_der(&private.public_key_to_der().unwrap()).unwrap())
    }
}

impl AccountSigner for Ed25519Signer {
    fn public_key(&self) -> Result<PKey<Public>, SignatureError> {
        Ok(self.0.clone())
    }

    fn sign(&self, _alg: SignatureAlgorithm, _data: &[u8]) -> Result<Vec<u8>, SignatureError> {
        Err(SignatureError::SigningError("not reachable".to_string()))
    }
}
