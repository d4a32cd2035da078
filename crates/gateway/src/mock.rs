//! Scripted in-process gateway for tests and local runs.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use cardvault_core::Amount;

use crate::client::{GatewayOrder, OrderLookup, PaymentGateway};
use crate::error::{GatewayError, GatewayResult};
use crate::handoff::RefundHandoff;
use crate::request::{PaymentForm, PaymentRequest};
use crate::signing::{Merchant, Params};

const MOCK_BASE: &str = "https://gateway.mock";

/// Gateway double: refunds succeed and queries report "unavailable" unless
/// a result has been queued.
#[derive(Debug)]
pub struct MockGateway {
    merchant: Merchant,
    refund_script: Mutex<VecDeque<GatewayResult<()>>>,
    query_script: Mutex<VecDeque<GatewayResult<GatewayOrder>>>,
    refunds: Mutex<Vec<(String, Amount)>>,
    fail_payment_forms: AtomicBool,
    refund_delay: Mutex<Duration>,
}

impl MockGateway {
    pub fn new(merchant: Merchant) -> Self {
        Self {
            merchant,
            refund_script: Mutex::new(VecDeque::new()),
            query_script: Mutex::new(VecDeque::new()),
            refunds: Mutex::new(Vec::new()),
            fail_payment_forms: AtomicBool::new(false),
            refund_delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn push_refund_result(&self, result: GatewayResult<()>) {
        self.refund_script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(result);
    }

    pub fn push_query_result(&self, result: GatewayResult<GatewayOrder>) {
        self.query_script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(result);
    }

    pub fn fail_payment_forms(&self, fail: bool) {
        self.fail_payment_forms.store(fail, Ordering::SeqCst);
    }

    /// Hold every refund call for `delay` before answering.
    pub fn set_refund_delay(&self, delay: Duration) {
        *self.refund_delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    /// Refund calls received, in order.
    pub fn refunds(&self) -> Vec<(String, Amount)> {
        self.refunds.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// A notification the real gateway would send for a paid order.
    pub fn signed_notification(
        &self,
        order_no: &str,
        trade_no: &str,
        channel: &str,
        money: &str,
        trade_status: &str,
    ) -> Params {
        let mut p = Params::new();
        p.insert("pid".to_string(), self.merchant.pid.clone());
        p.insert("trade_no".to_string(), trade_no.to_string());
        p.insert("out_trade_no".to_string(), order_no.to_string());
        p.insert("type".to_string(), channel.to_string());
        p.insert("name".to_string(), "card".to_string());
        p.insert("money".to_string(), money.to_string());
        p.insert("trade_status".to_string(), trade_status.to_string());
        let sign = self.merchant.sign(&p);
        p.insert("sign".to_string(), sign);
        p.insert("sign_type".to_string(), "MD5".to_string());
        p
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    fn merchant(&self) -> &Merchant {
        &self.merchant
    }

    fn build_payment_request(&self, req: &PaymentRequest<'_>) -> GatewayResult<PaymentForm> {
        if self.fail_payment_forms.load(Ordering::SeqCst) {
            return Err(GatewayError::Misconfigured("payment forms disabled".to_string()));
        }
        let mut fields = Params::new();
        fields.insert("pid".to_string(), self.merchant.pid.clone());
        fields.insert("type".to_string(), req.channel.to_string());
        fields.insert("out_trade_no".to_string(), req.order_no.to_string());
        fields.insert("name".to_string(), req.product_name.to_string());
        fields.insert("money".to_string(), req.amount.to_two_decimals());
        let sign = self.merchant.sign(&fields);
        fields.insert("sign".to_string(), sign);
        fields.insert("sign_type".to_string(), "MD5".to_string());
        Ok(PaymentForm {
            redirect_url: format!("{MOCK_BASE}/submit.php"),
            form_fields: fields,
        })
    }

    async fn query_order(&self, _lookup: OrderLookup) -> GatewayResult<GatewayOrder> {
        self.query_script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Err(GatewayError::unavailable("no scripted query result")))
    }

    async fn refund(&self, trade_no: &str, amount: Amount) -> GatewayResult<()> {
        let delay = *self.refund_delay.lock().unwrap_or_else(|e| e.into_inner());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.refunds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((trade_no.to_string(), amount));
        self.refund_script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(Ok(()))
    }

    fn manual_refund_handoff(
        &self,
        order_no: &str,
        trade_no: &str,
        amount: Amount,
        expires_at: DateTime<Utc>,
    ) -> RefundHandoff {
        RefundHandoff::issue(
            format!("{MOCK_BASE}/api.php"),
            &self.merchant,
            order_no,
            trade_no,
            amount,
            expires_at,
        )
    }
}
