use anyhow::Result;
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use std::env;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub razorpay: RazorpayConfig,
    pub reconciliation: ReconciliationConfig,
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub db_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct RazorpayConfig {
    pub key_id: String,
    pub key_secret: Secret<String>,
    pub webhook_secret: Secret<String>,
    pub api_base_url: String,
}

/// Knobs for charge retries and receipt display.
#[derive(Deserialize, Clone, Debug)]
pub struct ReconciliationConfig {
    pub max_charge_retries: u32,
    pub retry_backoff_hours: i64,
    pub receipt_prefix: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("FEE_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("FEE_SERVICE_PORT")
            .unwrap_or_else(|_| "3007".to_string())
            .parse()?;

        let db_url = env::var("FEE_DATABASE_URL")
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());
        let db_name = env::var("FEE_DATABASE_NAME").unwrap_or_else(|_| "fee_db".to_string());

        let key_id = env::var("RAZORPAY_KEY_ID").unwrap_or_else(|_| "rzp_test_key".to_string());
        let key_secret =
            env::var("RAZORPAY_KEY_SECRET").unwrap_or_else(|_| "dev-key-secret".to_string());
        let webhook_secret =
            env::var("RAZORPAY_WEBHOOK_SECRET").unwrap_or_else(|_| "dev-webhook-secret".to_string());
        let api_base_url = env::var("RAZORPAY_API_BASE_URL")
            .unwrap_or_else(|_| "https://api.razorpay.com/v1".to_string());

        let max_charge_retries = env::var("FEE_MAX_CHARGE_RETRIES")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .unwrap_or(3);
        let retry_backoff_hours = env::var("FEE_RETRY_BACKOFF_HOURS")
            .unwrap_or_else(|_| "24".to_string())
            .parse()
            .unwrap_or(24);
        let receipt_prefix = env::var("FEE_RECEIPT_PREFIX").unwrap_or_else(|_| "SF".to_string());

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: Secret::new(db_url),
                db_name,
            },
            razorpay: RazorpayConfig {
                key_id,
                key_secret: Secret::new(key_secret),
                webhook_secret: Secret::new(webhook_secret),
                api_base_url,
            },
            reconciliation: ReconciliationConfig {
                max_charge_retries,
                retry_backoff_hours,
                receipt_prefix,
            },
            service_name: "fee-service".to_string(),
        })
    }
}
