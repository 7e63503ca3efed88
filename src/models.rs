//! Domain records exchanged with the backend and persisted offline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cylinder sizes sold by the business.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProductType {
    #[serde(rename = "33lb")]
    Lb33,
    #[serde(rename = "40lb")]
    Lb40,
    #[serde(rename = "100lb")]
    Lb100,
}

/// Price per cylinder, in whole pesos.
pub type PriceTable = BTreeMap<ProductType, i64>;

/// Prices served when the backend has never been reached on this device.
pub fn default_price_table() -> PriceTable {
    PriceTable::from([
        (ProductType::Lb33, 25_000),
        (ProductType::Lb40, 30_000),
        (ProductType::Lb100, 70_000),
    ])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_prices: Option<PriceTable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Customer {
    /// Records created offline carry a `local-` id until the backend
    /// assigns a real one.
    pub fn is_provisional(&self) -> bool {
        self.id.starts_with(LOCAL_ID_PREFIX)
    }
}

pub const LOCAL_ID_PREFIX: &str = "local-";

/// Body for customer creation and update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerDraft {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_prices: Option<PriceTable>,
}

impl CustomerDraft {
    pub fn into_customer(self, id: String) -> Customer {
        Customer {
            id,
            name: self.name,
            phone: self.phone,
            location: self.location,
            custom_prices: self.custom_prices,
            created_at: Some(Utc::now()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Transfer,
    Credit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleItem {
    pub product_type: ProductType,
    pub quantity: u32,
    pub unit_price: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    pub items: Vec<SaleItem>,
    pub total: i64,
    pub payment_method: PaymentMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub sold_at: DateTime<Utc>,
}

impl SalePayload {
    /// Sum of `unit_price * quantity`, or `None` if it does not fit in an `i64`.
    pub fn computed_total(&self) -> Option<i64> {
        self.items.iter().try_fold(0i64, |acc, item| {
            item.unit_price
                .checked_mul(i64::from(item.quantity))
                .and_then(|line| acc.checked_add(line))
        })
    }
}

/// A deferred backend mutation. Each kind replays against its own endpoint,
/// so a customer update can never be posted as a sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum OperationPayload {
    Sale(SalePayload),
    CustomerCreate(CustomerDraft),
    CustomerUpdate { id: String, draft: CustomerDraft },
}

impl OperationPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            OperationPayload::Sale(_) => "sale",
            OperationPayload::CustomerCreate(_) => "customer_create",
            OperationPayload::CustomerUpdate { .. } => "customer_update",
        }
    }

    /// Point references to customer `from` at `to`. Returns whether anything
    /// changed.
    pub fn rewrite_customer_id(&mut self, from: &str, to: &str) -> bool {
        let slot = match self {
            OperationPayload::Sale(sale) => sale.customer_id.as_mut(),
            OperationPayload::CustomerUpdate { id, .. } => Some(id),
            OperationPayload::CustomerCreate(_) => None,
        };
        match slot {
            Some(id) if id.as_str() == from => {
                *id = to.to_string();
                true
            }
            _ => false,
        }
    }
}
