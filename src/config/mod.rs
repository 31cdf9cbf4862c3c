use serde::Deserialize;
use std::env;

// Container for all runtime settings, read from the environment once at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub consultation: ConsultationConfig,
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
    pub acquire_timeout_seconds: u64,
}

// Payment gateway credentials and callback endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub merchant_id: String,
    pub merchant_password: String,
    pub webhook_secret: String,
    pub base_url: String,
    pub success_url: String,
    pub fail_url: String,
    pub webhook_url: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

// Price of one consultation slot, in minor currency units.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsultationConfig {
    pub price_minor: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    pub api_token: String,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            app: AppConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8000".to_string())
                    .parse()
                    .expect("PORT must be a valid number"),
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
                rust_log: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "consult_booking=debug,tower_http=debug".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
                pool_size: env::var("DB_POOL_SIZE")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .expect("DB_POOL_SIZE must be a valid number"),
                acquire_timeout_seconds: env::var("DB_ACQUIRE_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .expect("DB_ACQUIRE_TIMEOUT_SECONDS must be a valid number"),
            },
            gateway: GatewayConfig {
                merchant_id: env::var("MERCHANT_ID").expect("MERCHANT_ID must be set"),
                merchant_password: env::var("MERCHANT_PASSWORD")
                    .expect("MERCHANT_PASSWORD must be set"),
                webhook_secret: env::var("GATEWAY_WEBHOOK_SECRET")
                    .expect("GATEWAY_WEBHOOK_SECRET must be set"),
                base_url: env::var("PAYMENT_GATEWAY_URL")
                    .unwrap_or_else(|_| "https://gateway.example.com/api/v1".to_string()),
                success_url: env::var("PAYMENT_SUCCESS_URL")
                    .unwrap_or_else(|_| "https://your-domain.com/payment/success".to_string()),
                fail_url: env::var("PAYMENT_FAIL_URL")
                    .unwrap_or_else(|_| "https://your-domain.com/payment/fail".to_string()),
                webhook_url: env::var("PAYMENT_WEBHOOK_URL")
                    .unwrap_or_else(|_| "https://your-domain.com/api/webhooks/payment".to_string()),
                timeout_seconds: env::var("GATEWAY_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .expect("GATEWAY_TIMEOUT_SECONDS must be a valid number"),
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: env::var("CIRCUIT_BREAKER_FAILURE_THRESHOLD")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .expect("CIRCUIT_BREAKER_FAILURE_THRESHOLD must be a valid number"),
                timeout_seconds: env::var("CIRCUIT_BREAKER_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .expect("CIRCUIT_BREAKER_TIMEOUT_SECONDS must be a valid number"),
            },
            consultation: ConsultationConfig {
                price_minor: env::var("CONSULTATION_PRICE_MINOR")
                    .unwrap_or_else(|_| "5000".to_string())
                    .parse()
                    .expect("CONSULTATION_PRICE_MINOR must be a valid number"),
                currency: env::var("CONSULTATION_CURRENCY").unwrap_or_else(|_| "EUR".to_string()),
            },
            admin: AdminConfig {
                api_token: env::var("ADMIN_API_TOKEN").expect("ADMIN_API_TOKEN must be set"),
            },
        }
    }
}
