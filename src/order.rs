use serde::{Deserialize, Serialize};

/// 帳戶的訂單集合（`orders` 資源）。分頁時各頁的 URL 會依序合併。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderList {
    #[serde(default)]
    pub orders: Vec<String>,
}

impl OrderList {
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}
