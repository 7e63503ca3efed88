//! Scriptable backend and fixtures shared by unit tests.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::api::Backend;
use crate::error::{Error, Result};
use crate::models::{
    Customer, CustomerDraft, PaymentMethod, PriceTable, ProductType, SaleItem, SalePayload,
};

#[derive(Default)]
pub struct FakeBackend {
    healthy: AtomicBool,
    /// Per-call sale outcomes; once exhausted every sale succeeds unless
    /// `fail_all_sales` is set.
    sale_script: Mutex<VecDeque<bool>>,
    fail_all_sales: AtomicBool,
    pub sale_calls: Mutex<Vec<SalePayload>>,
    pub sale_started: Notify,
    sale_gate: Mutex<Option<Arc<Notify>>>,

    customers: Mutex<Option<Vec<Customer>>>,
    prices: Mutex<Option<PriceTable>>,

    fail_customer_writes: AtomicBool,
    /// Acknowledge creates without echoing the record back.
    silent_creates: AtomicBool,
    pub created: Mutex<Vec<CustomerDraft>>,
    pub updated: Mutex<Vec<(String, CustomerDraft)>>,
}

impl FakeBackend {
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn script_sales(&self, outcomes: &[bool]) {
        self.sale_script.lock().unwrap().extend(outcomes.iter().copied());
    }

    pub fn fail_all_sales(&self, fail: bool) {
        self.fail_all_sales.store(fail, Ordering::SeqCst);
    }

    /// Block every sale submission until `gate` is notified.
    pub fn hold_sales(&self, gate: Arc<Notify>) {
        *self.sale_gate.lock().unwrap() = Some(gate);
    }

    pub fn set_customers(&self, customers: Option<Vec<Customer>>) {
        *self.customers.lock().unwrap() = customers;
    }

    pub fn set_prices(&self, prices: Option<PriceTable>) {
        *self.prices.lock().unwrap() = prices;
    }

    pub fn fail_customer_writes(&self, fail: bool) {
        self.fail_customer_writes.store(fail, Ordering::SeqCst);
    }

    pub fn silent_creates(&self, silent: bool) {
        self.silent_creates.store(silent, Ordering::SeqCst);
    }

    pub fn sale_totals(&self) -> Vec<i64> {
        self.sale_calls
            .lock()
            .unwrap()
            .iter()
            .map(|sale| sale.total)
            .collect()
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn submit_sale(&self, sale: &SalePayload) -> Result<Option<Value>> {
        self.sale_calls.lock().unwrap().push(sale.clone());
        self.sale_started.notify_one();

        let gate = self.sale_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let scripted = self.sale_script.lock().unwrap().pop_front();
        let ok = scripted.unwrap_or(!self.fail_all_sales.load(Ordering::SeqCst));
        if ok {
            Ok(Some(serde_json::json!({ "id": format!("sale-{}", sale.total) })))
        } else {
            Err(Error::Network("Connection to https://backend.test timed out".into()))
        }
    }

    async fn search_customers(&self, name: &str) -> Result<Vec<Customer>> {
        let customers = self.customers.lock().unwrap().clone();
        let Some(customers) = customers else {
            return Err(Error::remote(Some(503), "Backend server error (HTTP 503)"));
        };
        let needle = name.to_lowercase();
        Ok(customers
            .into_iter()
            .filter(|c| c.name.to_lowercase().contains(&needle))
            .collect())
    }

    async fn create_customer(&self, draft: &CustomerDraft) -> Result<Option<Customer>> {
        if self.fail_customer_writes.load(Ordering::SeqCst) {
            return Err(Error::Network("Cannot reach backend".into()));
        }
        let mut created = self.created.lock().unwrap();
        created.push(draft.clone());
        if self.silent_creates.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(
            draft.clone().into_customer(format!("srv-{}", created.len())),
        ))
    }

    async fn update_customer(&self, id: &str, draft: &CustomerDraft) -> Result<Option<Customer>> {
        if self.fail_customer_writes.load(Ordering::SeqCst) {
            return Err(Error::Network("Cannot reach backend".into()));
        }
        self.updated
            .lock()
            .unwrap()
            .push((id.to_string(), draft.clone()));
        Ok(Some(draft.clone().into_customer(id.to_string())))
    }

    async fn fetch_prices(&self) -> Result<PriceTable> {
        self.prices
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::Network("Cannot reach backend".into()))
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

pub fn sale(total: i64) -> SalePayload {
    SalePayload {
        customer_id: Some("cust-1".into()),
        customer_name: Some("Panadería San Jorge".into()),
        items: vec![SaleItem {
            product_type: ProductType::Lb40,
            quantity: 1,
            unit_price: total,
        }],
        total,
        payment_method: PaymentMethod::Cash,
        notes: None,
        sold_at: Utc::now(),
    }
}

pub fn customer(id: &str, name: &str) -> Customer {
    Customer {
        id: id.to_string(),
        name: name.to_string(),
        phone: None,
        location: None,
        custom_prices: None,
        created_at: None,
    }
}

pub fn draft(name: &str) -> CustomerDraft {
    CustomerDraft {
        name: name.to_string(),
        phone: Some("3105550000".into()),
        location: Some("Vereda El Placer".into()),
        custom_prices: None,
    }
}
