// config.rs
use std::env;

use crate::errors::{AppError, Result};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mpesa_consumer_key: String,
    pub mpesa_consumer_secret: String,
    pub mpesa_short_code: String,
    pub mpesa_passkey: String,
    pub mpesa_callback_url: String,
    pub mpesa_environment: String,
    /// Overrides the environment-selected Daraja host. Used for local stubs
    /// and gateway simulators.
    pub mpesa_base_url: Option<String>,
    pub toll_amount: u32,
    pub database_url: String,
    pub port: u16,
    pub host: String,
}

fn require(name: &str) -> Result<String> {
    env::var(name).map_err(|_| AppError::Configuration(format!("{} must be set", name)))
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let mpesa_environment =
            env::var("MPESA_ENVIRONMENT").unwrap_or_else(|_| "sandbox".to_string());

        let toll_amount = env::var("TOLL_AMOUNT")
            .unwrap_or_else(|_| "100".to_string())
            .parse::<u32>()
            .map_err(|_| AppError::Configuration("TOLL_AMOUNT must be an integer".into()))?;
        if toll_amount == 0 {
            return Err(AppError::Configuration(
                "TOLL_AMOUNT must be greater than 0".into(),
            ));
        }

        Ok(AppConfig {
            mpesa_consumer_key: require("MPESA_CONSUMER_KEY")?,
            mpesa_consumer_secret: require("MPESA_CONSUMER_SECRET")?,
            mpesa_short_code: require("MPESA_SHORT_CODE")?,
            mpesa_passkey: require("MPESA_PASSKEY")?,
            mpesa_callback_url: require("MPESA_CALLBACK_URL")?,
            mpesa_environment,
            mpesa_base_url: env::var("MPESA_BASE_URL").ok(),
            toll_amount,
            database_url: require("DATABASE_URL")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .map_err(|_| AppError::Configuration("PORT must be a number".into()))?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
        })
    }

    pub fn is_production(&self) -> bool {
        self.mpesa_environment == "production"
    }

    fn mpesa_base_url(&self) -> String {
        if let Some(base) = &self.mpesa_base_url {
            return base.trim_end_matches('/').to_string();
        }
        if self.is_production() {
            "https://api.safaricom.co.ke".to_string()
        } else {
            "https://sandbox.safaricom.co.ke".to_string()
        }
    }

    pub fn mpesa_auth_url(&self) -> String {
        format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.mpesa_base_url()
        )
    }

    pub fn mpesa_stk_url(&self) -> String {
        format!("{}/mpesa/stkpush/v1/processrequest", self.mpesa_base_url())
    }
}
