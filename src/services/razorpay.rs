//! Razorpay gateway client.
//!
//! Implements the Orders, Plans, Customers, Subscriptions and Refunds APIs
//! plus HMAC signature verification for checkout callbacks and webhooks.
//! Domain services talk to the [`PaymentGateway`] trait so tests can swap in
//! [`StubGateway`].

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::RazorpayConfig;
use crate::error::AppError;
use crate::models::PlanType;

const CURRENCY: &str = "INR";

/// Rupees to the gateway's paise wire unit.
pub fn to_paise(amount: Decimal) -> Result<u64, AppError> {
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_u64()
        .ok_or_else(|| {
            AppError::BadRequest(anyhow!("amount {} cannot be expressed in paise", amount))
        })
}

/// Paise back to rupees.
pub fn from_paise(paise: u64) -> Decimal {
    Decimal::from(paise) / Decimal::ONE_HUNDRED
}

fn hmac_sha256_hex(payload: &str, secret: &str) -> Result<String, AppError> {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::InternalError(anyhow!("Invalid HMAC key length")))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Response from order creation.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    /// Amount in paise.
    pub amount: u64,
    pub currency: String,
    pub receipt: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayPlan {
    pub id: String,
    pub period: String,
    pub interval: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayCustomer {
    pub id: String,
    pub name: String,
    pub email: String,
}

/// Subscription entity, both as returned by creation and as carried in
/// webhook payloads.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySubscription {
    pub id: String,
    pub plan_id: Option<String>,
    pub status: String,
    pub total_count: Option<u32>,
    pub paid_count: Option<u32>,
    pub short_url: Option<String>,
}

/// Payment entity, both as fetched from the Payments API and as carried in
/// webhook payloads.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayPayment {
    pub id: String,
    /// Amount in paise.
    pub amount: u64,
    pub currency: Option<String>,
    pub status: Option<String>,
    pub order_id: Option<String>,
    pub method: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayRefund {
    pub id: String,
    pub payment_id: String,
    pub amount: u64,
    pub status: String,
}

/// Webhook envelope: `event` names the delivery, `payload` carries the
/// entities the event is about.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    #[serde(default)]
    pub payload: WebhookPayload,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub subscription: Option<WebhookSubscriptionRef>,
    #[serde(default)]
    pub payment: Option<WebhookPaymentRef>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookSubscriptionRef {
    pub entity: GatewaySubscription,
}

#[derive(Debug, Deserialize)]
pub struct WebhookPaymentRef {
    pub entity: GatewayPayment,
}

impl WebhookEvent {
    /// Gateway id of the subscription entity, when the payload carries one.
    pub fn subscription_id(&self) -> Option<&str> {
        self.payload
            .subscription
            .as_ref()
            .map(|s| s.entity.id.as_str())
    }

    pub fn payment(&self) -> Option<&GatewayPayment> {
        self.payload.payment.as_ref().map(|p| &p.entity)
    }
}

/// Parse a webhook request body. Call only after the signature check.
pub fn parse_webhook_event(body: &str) -> Result<WebhookEvent, AppError> {
    serde_json::from_str(body)
        .map_err(|e| AppError::BadRequest(anyhow!("malformed webhook body: {}", e)))
}

/// Gateway operations the fee services depend on.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(&self, amount: Decimal, receipt: &str) -> Result<GatewayOrder, AppError>;

    async fn create_plan(
        &self,
        plan_type: PlanType,
        installment_amount: Decimal,
        description: &str,
    ) -> Result<GatewayPlan, AppError>;

    async fn create_customer(&self, name: &str, email: &str)
        -> Result<GatewayCustomer, AppError>;

    async fn create_subscription(
        &self,
        plan_id: &str,
        customer_id: &str,
        total_installments: u32,
        start_at: DateTime<Utc>,
    ) -> Result<GatewaySubscription, AppError>;

    async fn cancel_subscription(&self, gateway_subscription_id: &str) -> Result<(), AppError>;

    async fn get_payment(&self, gateway_payment_id: &str) -> Result<GatewayPayment, AppError>;

    async fn create_refund(
        &self,
        gateway_payment_id: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<GatewayRefund, AppError>;

    /// Checkout callback: `HMAC-SHA256("{order_id}|{payment_id}", key_secret)`.
    fn verify_payment_signature(
        &self,
        order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> Result<bool, AppError>;

    /// Subscription checkout: `HMAC-SHA256("{payment_id}|{subscription_id}", key_secret)`.
    fn verify_subscription_signature(
        &self,
        payment_id: &str,
        subscription_id: &str,
        signature: &str,
    ) -> Result<bool, AppError>;

    /// Webhook delivery: `HMAC-SHA256(raw_body, webhook_secret)`.
    fn verify_webhook_signature(&self, body: &str, signature: &str) -> Result<bool, AppError>;
}

#[derive(Debug, Serialize)]
struct CreateOrderRequest {
    amount: u64,
    currency: String,
    receipt: String,
}

#[derive(Debug, Serialize)]
struct CreatePlanRequest {
    period: String,
    interval: u32,
    item: PlanItem,
}

#[derive(Debug, Serialize)]
struct PlanItem {
    name: String,
    amount: u64,
    currency: String,
}

#[derive(Debug, Serialize)]
struct CreateCustomerRequest {
    name: String,
    email: String,
    fail_existing: String,
}

#[derive(Debug, Serialize)]
struct CreateSubscriptionRequest {
    plan_id: String,
    customer_id: String,
    total_count: u32,
    start_at: i64,
    customer_notify: u8,
}

#[derive(Debug, Serialize)]
struct CancelSubscriptionRequest {
    cancel_at_cycle_end: u8,
}

#[derive(Debug, Serialize)]
struct CreateRefundRequest {
    amount: u64,
    notes: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RazorpayApiError {
    error: RazorpayErrorDetail,
}

#[derive(Debug, Deserialize)]
struct RazorpayErrorDetail {
    code: String,
    description: String,
}

/// Live client over the Razorpay REST API.
#[derive(Clone)]
pub struct RazorpayClient {
    client: Client,
    config: RazorpayConfig,
}

impl RazorpayClient {
    pub fn new(config: RazorpayConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Check if credentials are set.
    pub fn is_configured(&self) -> bool {
        !self.config.key_id.is_empty() && !self.config.key_secret.expose_secret().is_empty()
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.basic_auth(
            &self.config.key_id,
            Some(self.config.key_secret.expose_secret()),
        )
    }

    async fn execute<T: serde::de::DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
        context: &'static str,
    ) -> Result<T, AppError> {
        if !self.is_configured() {
            return Err(AppError::Gateway(anyhow!(
                "Razorpay credentials not configured"
            )));
        }

        let response = self.authed(builder).send().await?;
        let status = response.status();
        let body = response.text().await?;

        tracing::debug!(status = %status, context = context, body = %body, "Razorpay response");

        if status.is_success() {
            serde_json::from_str(&body).map_err(|e| {
                AppError::Gateway(anyhow!("Razorpay {} returned unexpected body: {}", context, e))
            })
        } else {
            let error: RazorpayApiError =
                serde_json::from_str(&body).unwrap_or_else(|_| RazorpayApiError {
                    error: RazorpayErrorDetail {
                        code: "UNKNOWN".to_string(),
                        description: body.clone(),
                    },
                });
            tracing::error!(
                code = %error.error.code,
                description = %error.error.description,
                context = context,
                "Razorpay call failed"
            );
            Err(AppError::Gateway(anyhow!(
                "Razorpay error: {} - {}",
                error.error.code,
                error.error.description
            )))
        }
    }

    fn key_signature(&self, payload: &str) -> Result<String, AppError> {
        hmac_sha256_hex(payload, self.config.key_secret.expose_secret())
    }
}

#[async_trait]
impl PaymentGateway for RazorpayClient {
    async fn create_order(&self, amount: Decimal, receipt: &str) -> Result<GatewayOrder, AppError> {
        let request = CreateOrderRequest {
            amount: to_paise(amount)?,
            currency: CURRENCY.to_string(),
            receipt: receipt.to_string(),
        };
        let url = format!("{}/orders", self.config.api_base_url);
        let order: GatewayOrder = self
            .execute(self.client.post(&url).json(&request), "create_order")
            .await?;
        tracing::info!(order_id = %order.id, amount = order.amount, "Razorpay order created");
        Ok(order)
    }

    async fn create_plan(
        &self,
        plan_type: PlanType,
        installment_amount: Decimal,
        description: &str,
    ) -> Result<GatewayPlan, AppError> {
        let request = CreatePlanRequest {
            period: plan_type.as_str().to_string(),
            interval: 1,
            item: PlanItem {
                name: description.to_string(),
                amount: to_paise(installment_amount)?,
                currency: CURRENCY.to_string(),
            },
        };
        let url = format!("{}/plans", self.config.api_base_url);
        let plan: GatewayPlan = self
            .execute(self.client.post(&url).json(&request), "create_plan")
            .await?;
        tracing::info!(plan_id = %plan.id, period = %plan.period, "Razorpay plan created");
        Ok(plan)
    }

    async fn create_customer(
        &self,
        name: &str,
        email: &str,
    ) -> Result<GatewayCustomer, AppError> {
        let request = CreateCustomerRequest {
            name: name.to_string(),
            email: email.to_string(),
            // reuse an existing customer with the same contact details
            fail_existing: "0".to_string(),
        };
        let url = format!("{}/customers", self.config.api_base_url);
        let customer: GatewayCustomer = self
            .execute(self.client.post(&url).json(&request), "create_customer")
            .await?;
        Ok(customer)
    }

    async fn create_subscription(
        &self,
        plan_id: &str,
        customer_id: &str,
        total_installments: u32,
        start_at: DateTime<Utc>,
    ) -> Result<GatewaySubscription, AppError> {
        let request = CreateSubscriptionRequest {
            plan_id: plan_id.to_string(),
            customer_id: customer_id.to_string(),
            total_count: total_installments,
            start_at: start_at.timestamp(),
            customer_notify: 1,
        };
        let url = format!("{}/subscriptions", self.config.api_base_url);
        let subscription: GatewaySubscription = self
            .execute(self.client.post(&url).json(&request), "create_subscription")
            .await?;
        tracing::info!(
            subscription_id = %subscription.id,
            status = %subscription.status,
            "Razorpay subscription created"
        );
        Ok(subscription)
    }

    async fn cancel_subscription(&self, gateway_subscription_id: &str) -> Result<(), AppError> {
        let request = CancelSubscriptionRequest {
            cancel_at_cycle_end: 0,
        };
        let url = format!(
            "{}/subscriptions/{}/cancel",
            self.config.api_base_url, gateway_subscription_id
        );
        let _cancelled: GatewaySubscription = self
            .execute(self.client.post(&url).json(&request), "cancel_subscription")
            .await?;
        tracing::info!(
            subscription_id = %gateway_subscription_id,
            "Razorpay subscription cancelled"
        );
        Ok(())
    }

    async fn get_payment(&self, gateway_payment_id: &str) -> Result<GatewayPayment, AppError> {
        let url = format!("{}/payments/{}", self.config.api_base_url, gateway_payment_id);
        self.execute(self.client.get(&url), "get_payment").await
    }

    async fn create_refund(
        &self,
        gateway_payment_id: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<GatewayRefund, AppError> {
        let request = CreateRefundRequest {
            amount: to_paise(amount)?,
            notes: serde_json::json!({ "reason": reason }),
        };
        let url = format!(
            "{}/payments/{}/refund",
            self.config.api_base_url, gateway_payment_id
        );
        let refund: GatewayRefund = self
            .execute(self.client.post(&url).json(&request), "create_refund")
            .await?;
        tracing::info!(
            refund_id = %refund.id,
            payment_id = %gateway_payment_id,
            "Razorpay refund created"
        );
        Ok(refund)
    }

    fn verify_payment_signature(
        &self,
        order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> Result<bool, AppError> {
        let expected = self.key_signature(&format!("{}|{}", order_id, payment_id))?;
        let is_valid = expected == signature;
        if !is_valid {
            tracing::warn!(
                order_id = %order_id,
                payment_id = %payment_id,
                "Payment signature verification failed"
            );
        }
        Ok(is_valid)
    }

    fn verify_subscription_signature(
        &self,
        payment_id: &str,
        subscription_id: &str,
        signature: &str,
    ) -> Result<bool, AppError> {
        let expected = self.key_signature(&format!("{}|{}", payment_id, subscription_id))?;
        let is_valid = expected == signature;
        if !is_valid {
            tracing::warn!(
                subscription_id = %subscription_id,
                payment_id = %payment_id,
                "Subscription signature verification failed"
            );
        }
        Ok(is_valid)
    }

    fn verify_webhook_signature(&self, body: &str, signature: &str) -> Result<bool, AppError> {
        let expected = hmac_sha256_hex(body, self.config.webhook_secret.expose_secret())?;
        let is_valid = expected == signature;
        if !is_valid {
            tracing::warn!("Webhook signature verification failed");
        }
        Ok(is_valid)
    }
}

/// Deterministic in-process gateway for tests and local development.
///
/// Signatures are real HMACs over the stub secrets, so callers can sign
/// payloads with the helper methods and have verification round-trip.
pub struct StubGateway {
    key_secret: String,
    webhook_secret: String,
    seq: std::sync::atomic::AtomicU64,
    fail_refunds: std::sync::atomic::AtomicBool,
    payments: std::sync::Mutex<std::collections::HashMap<String, u64>>,
    cancelled: std::sync::Mutex<Vec<String>>,
    refunds: std::sync::Mutex<Vec<(String, u64)>>,
}

impl Default for StubGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl StubGateway {
    pub fn new() -> Self {
        Self {
            key_secret: "stub-key-secret".to_string(),
            webhook_secret: "stub-webhook-secret".to_string(),
            seq: std::sync::atomic::AtomicU64::new(0),
            fail_refunds: std::sync::atomic::AtomicBool::new(false),
            payments: std::sync::Mutex::new(std::collections::HashMap::new()),
            cancelled: std::sync::Mutex::new(Vec::new()),
            refunds: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn webhook_secret(&self) -> &str {
        &self.webhook_secret
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self
            .seq
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1;
        format!("{}_{:04}", prefix, n)
    }

    /// Make subsequent `create_refund` calls fail, for exercising the
    /// gateway-first refund path.
    pub fn set_fail_refunds(&self, fail: bool) {
        self.fail_refunds
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Seed a payment the stub will report from `get_payment`.
    pub fn seed_payment(&self, gateway_payment_id: &str, amount: Decimal) {
        let paise = (amount * Decimal::ONE_HUNDRED).round().to_u64().unwrap_or(0);
        self.payments
            .lock()
            .unwrap()
            .insert(gateway_payment_id.to_string(), paise);
    }

    pub fn cancelled_subscriptions(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn refund_calls(&self) -> Vec<(String, u64)> {
        self.refunds.lock().unwrap().clone()
    }

    /// Sign a checkout callback the way the gateway would.
    pub fn sign_checkout(&self, order_id: &str, payment_id: &str) -> String {
        hmac_sha256_hex(&format!("{}|{}", order_id, payment_id), &self.key_secret)
            .unwrap_or_default()
    }

    /// Sign a subscription checkout callback.
    pub fn sign_subscription_checkout(&self, payment_id: &str, subscription_id: &str) -> String {
        hmac_sha256_hex(
            &format!("{}|{}", payment_id, subscription_id),
            &self.key_secret,
        )
        .unwrap_or_default()
    }

    /// Sign a webhook body.
    pub fn sign_webhook(&self, body: &str) -> String {
        hmac_sha256_hex(body, &self.webhook_secret).unwrap_or_default()
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_order(&self, amount: Decimal, receipt: &str) -> Result<GatewayOrder, AppError> {
        Ok(GatewayOrder {
            id: self.next_id("order"),
            amount: to_paise(amount)?,
            currency: CURRENCY.to_string(),
            receipt: Some(receipt.to_string()),
            status: "created".to_string(),
        })
    }

    async fn create_plan(
        &self,
        plan_type: PlanType,
        _installment_amount: Decimal,
        _description: &str,
    ) -> Result<GatewayPlan, AppError> {
        Ok(GatewayPlan {
            id: self.next_id("plan"),
            period: plan_type.as_str().to_string(),
            interval: 1,
        })
    }

    async fn create_customer(
        &self,
        name: &str,
        email: &str,
    ) -> Result<GatewayCustomer, AppError> {
        Ok(GatewayCustomer {
            id: self.next_id("cust"),
            name: name.to_string(),
            email: email.to_string(),
        })
    }

    async fn create_subscription(
        &self,
        plan_id: &str,
        _customer_id: &str,
        total_installments: u32,
        _start_at: DateTime<Utc>,
    ) -> Result<GatewaySubscription, AppError> {
        Ok(GatewaySubscription {
            id: self.next_id("sub"),
            plan_id: Some(plan_id.to_string()),
            status: "created".to_string(),
            total_count: Some(total_installments),
            paid_count: Some(0),
            short_url: None,
        })
    }

    async fn cancel_subscription(&self, gateway_subscription_id: &str) -> Result<(), AppError> {
        self.cancelled
            .lock()
            .map_err(|e| AppError::InternalError(anyhow!("stub gateway mutex poisoned: {}", e)))?
            .push(gateway_subscription_id.to_string());
        Ok(())
    }

    async fn get_payment(&self, gateway_payment_id: &str) -> Result<GatewayPayment, AppError> {
        let amount = self
            .payments
            .lock()
            .map_err(|e| AppError::InternalError(anyhow!("stub gateway mutex poisoned: {}", e)))?
            .get(gateway_payment_id)
            .copied()
            .ok_or_else(|| {
                AppError::Gateway(anyhow!("no such payment: {}", gateway_payment_id))
            })?;
        Ok(GatewayPayment {
            id: gateway_payment_id.to_string(),
            amount,
            currency: Some(CURRENCY.to_string()),
            status: Some("captured".to_string()),
            order_id: None,
            method: Some("card".to_string()),
            error_description: None,
        })
    }

    async fn create_refund(
        &self,
        gateway_payment_id: &str,
        amount: Decimal,
        _reason: &str,
    ) -> Result<GatewayRefund, AppError> {
        if self.fail_refunds.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(AppError::Gateway(anyhow!("refund rejected by gateway")));
        }
        let paise = to_paise(amount)?;
        self.refunds
            .lock()
            .map_err(|e| AppError::InternalError(anyhow!("stub gateway mutex poisoned: {}", e)))?
            .push((gateway_payment_id.to_string(), paise));
        Ok(GatewayRefund {
            id: self.next_id("rfnd"),
            payment_id: gateway_payment_id.to_string(),
            amount: paise,
            status: "processed".to_string(),
        })
    }

    fn verify_payment_signature(
        &self,
        order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> Result<bool, AppError> {
        Ok(self.sign_checkout(order_id, payment_id) == signature)
    }

    fn verify_subscription_signature(
        &self,
        payment_id: &str,
        subscription_id: &str,
        signature: &str,
    ) -> Result<bool, AppError> {
        Ok(self.sign_subscription_checkout(payment_id, subscription_id) == signature)
    }

    fn verify_webhook_signature(&self, body: &str, signature: &str) -> Result<bool, AppError> {
        Ok(self.sign_webhook(body) == signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use secrecy::Secret;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(api_base_url: String) -> RazorpayConfig {
        RazorpayConfig {
            key_id: "rzp_test_123".to_string(),
            key_secret: Secret::new("my_secret_key".to_string()),
            webhook_secret: Secret::new("webhook_secret".to_string()),
            api_base_url,
        }
    }

    fn test_client() -> RazorpayClient {
        RazorpayClient::new(test_config("https://api.razorpay.com/v1".to_string()))
    }

    #[test]
    fn paise_conversion_rounds_to_the_unit() {
        assert_eq!(to_paise(dec!(150.50)).unwrap(), 15050);
        assert_eq!(to_paise(dec!(12000)).unwrap(), 1200000);
        assert!(to_paise(dec!(-1)).is_err());
        assert_eq!(from_paise(15050), dec!(150.50));
    }

    #[test]
    fn configured_when_credentials_present() {
        assert!(test_client().is_configured());

        let empty = RazorpayConfig {
            key_id: String::new(),
            key_secret: Secret::new(String::new()),
            webhook_secret: Secret::new(String::new()),
            api_base_url: String::new(),
        };
        assert!(!RazorpayClient::new(empty).is_configured());
    }

    #[test]
    fn payment_signature_round_trips() {
        let client = test_client();
        let expected = client.key_signature("order_123|pay_456").unwrap();
        assert!(client
            .verify_payment_signature("order_123", "pay_456", &expected)
            .unwrap());
        assert!(!client
            .verify_payment_signature("order_123", "pay_456", "invalid_signature")
            .unwrap());
    }

    #[test]
    fn subscription_signature_round_trips() {
        let client = test_client();
        let expected = client.key_signature("pay_456|sub_789").unwrap();
        assert!(client
            .verify_subscription_signature("pay_456", "sub_789", &expected)
            .unwrap());
        assert!(!client
            .verify_subscription_signature("sub_789", "pay_456", &expected)
            .unwrap());
    }

    #[test]
    fn webhook_signature_uses_webhook_secret() {
        let client = test_client();
        let body = r#"{"event":"subscription.charged"}"#;
        let expected = hmac_sha256_hex(body, "webhook_secret").unwrap();
        assert!(client.verify_webhook_signature(body, &expected).unwrap());
        assert!(!client.verify_webhook_signature(body, "bad").unwrap());
    }

    #[tokio::test]
    async fn create_order_parses_gateway_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "order_Nf2jD28W4ZFYpk",
                "entity": "order",
                "amount": 1200000,
                "currency": "INR",
                "receipt": "2026000001",
                "status": "created"
            })))
            .mount(&server)
            .await;

        let client = RazorpayClient::new(test_config(server.uri()));
        let order = client
            .create_order(dec!(12000), "2026000001")
            .await
            .unwrap();
        assert_eq!(order.id, "order_Nf2jD28W4ZFYpk");
        assert_eq!(order.amount, 1200000);
        assert_eq!(order.receipt.as_deref(), Some("2026000001"));
    }

    #[tokio::test]
    async fn gateway_error_body_surfaces_code_and_description() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {
                    "code": "BAD_REQUEST_ERROR",
                    "description": "Order amount less than minimum amount allowed"
                }
            })))
            .mount(&server)
            .await;

        let client = RazorpayClient::new(test_config(server.uri()));
        let err = client.create_order(dec!(0.01), "r1").await.unwrap_err();
        match err {
            AppError::Gateway(e) => {
                let message = e.to_string();
                assert!(message.contains("BAD_REQUEST_ERROR"));
                assert!(message.contains("minimum amount"));
            }
            other => panic!("expected gateway error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn stub_signatures_round_trip() {
        let stub = StubGateway::new();
        let signature = stub.sign_checkout("order_1", "pay_1");
        assert!(stub
            .verify_payment_signature("order_1", "pay_1", &signature)
            .unwrap());

        let body = r#"{"event":"subscription.activated"}"#;
        assert!(stub
            .verify_webhook_signature(body, &stub.sign_webhook(body))
            .unwrap());
    }

    #[tokio::test]
    async fn stub_refund_toggle_fails_refunds_only() {
        let stub = StubGateway::new();
        stub.seed_payment("pay_9", dec!(500));
        stub.set_fail_refunds(true);
        assert!(stub.create_refund("pay_9", dec!(500), "test").await.is_err());
        assert!(stub.get_payment("pay_9").await.is_ok());

        stub.set_fail_refunds(false);
        let refund = stub.create_refund("pay_9", dec!(500), "test").await.unwrap();
        assert_eq!(refund.amount, 50000);
        assert_eq!(stub.refund_calls(), vec![("pay_9".to_string(), 50000)]);
    }

    #[test]
    fn webhook_body_parses_subscription_and_payment_entities() {
        let body = r#"{
            "event": "subscription.charged",
            "payload": {
                "subscription": { "entity": { "id": "sub_1", "status": "active" } },
                "payment": { "entity": { "id": "pay_1", "amount": 100000, "status": "captured" } }
            }
        }"#;
        let event = parse_webhook_event(body).unwrap();
        assert_eq!(event.event, "subscription.charged");
        assert_eq!(event.payload.subscription.unwrap().entity.id, "sub_1");
        let payment = event.payload.payment.unwrap().entity;
        assert_eq!(payment.id, "pay_1");
        assert_eq!(payment.amount, 100000);
    }
}
