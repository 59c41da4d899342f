// services/mpesa.rs
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as base64, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, Result};

/// Scheduled refresh cadence, kept under the ~60 minute token lifetime so a
/// token is always replaced with margin rather than at expiry.
const TOKEN_REFRESH_PERIOD: Duration = Duration::from_secs(55 * 60);

fn refresh_margin() -> chrono::Duration {
    chrono::Duration::minutes(5)
}

#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub expires_in: String,
}

#[derive(Debug, Clone)]
pub struct CachedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// A token is served from cache only while the refresh margin is still
    /// left before expiry; at or past that boundary a refresh runs first.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + refresh_margin() < self.expires_at
    }
}

#[derive(Debug, Serialize)]
pub struct StkPushRequest {
    #[serde(rename = "BusinessShortCode")]
    pub business_short_code: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "TransactionType")]
    pub transaction_type: String,
    #[serde(rename = "Amount")]
    pub amount: String,
    #[serde(rename = "PartyA")]
    pub party_a: String,
    #[serde(rename = "PartyB")]
    pub party_b: String,
    #[serde(rename = "PhoneNumber")]
    pub phone_number: String,
    #[serde(rename = "CallBackURL")]
    pub callback_url: String,
    #[serde(rename = "AccountReference")]
    pub account_reference: String,
    #[serde(rename = "TransactionDesc")]
    pub transaction_desc: String,
}

#[derive(Debug, Deserialize)]
pub struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription")]
    pub response_description: String,
    #[serde(rename = "CustomerMessage", default)]
    pub customer_message: String,
}

/// Seam over the push-payment call so the initiation flow can be exercised
/// without the live gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn stk_push(
        &self,
        phone_number: &str,
        amount: u32,
        account_reference: &str,
    ) -> Result<StkPushResponse>;
}

/// Client for the Safaricom Daraja gateway. Owns the cached access token;
/// one instance is shared through `AppState`.
#[derive(Debug, Clone)]
pub struct MpesaGateway {
    config: AppConfig,
    client: Client,
    cached_token: Arc<RwLock<Option<CachedToken>>>,
}

impl MpesaGateway {
    pub fn new(config: AppConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        MpesaGateway {
            config,
            client,
            cached_token: Arc::new(RwLock::new(None)),
        }
    }

    /// Lenient best-effort rewrite of local phone formats to the
    /// international form the gateway expects. Anything unrecognized is
    /// passed through unchanged.
    pub fn format_phone_number(phone: &str) -> String {
        let phone = phone.trim();
        if phone.starts_with("254") && phone.len() == 12 {
            return phone.to_string();
        }
        if phone.starts_with("07") && phone.len() == 10 {
            return format!("254{}", &phone[1..]);
        }
        if phone.starts_with("7") && phone.len() == 9 {
            return format!("254{}", phone);
        }
        phone.to_string()
    }

    fn generate_password(&self, timestamp: &str) -> String {
        let password_string = format!(
            "{}{}{}",
            self.config.mpesa_short_code, self.config.mpesa_passkey, timestamp
        );
        base64.encode(password_string)
    }

    pub fn has_cached_token(&self) -> bool {
        self.cached_token.read().unwrap().is_some()
    }

    /// Current access token, refreshing inline when the cache is empty or
    /// inside the refresh margin. A stale token is never handed out.
    pub async fn access_token(&self) -> Result<String> {
        {
            let cached = self.cached_token.read().unwrap();
            if let Some(token) = cached.as_ref() {
                if token.is_fresh(Utc::now()) {
                    return Ok(token.access_token.clone());
                }
            }
        }

        self.refresh_token().await
    }

    /// Fetches a new token from the gateway and replaces the cache. The cache
    /// is written only after the request fully completes, so an overlapping
    /// refresh cannot leave a half-written credential behind; last completed
    /// refresh wins.
    pub async fn refresh_token(&self) -> Result<String> {
        info!("requesting new M-Pesa access token");
        let auth_string = format!(
            "{}:{}",
            self.config.mpesa_consumer_key, self.config.mpesa_consumer_secret
        );
        let encoded_auth = base64.encode(auth_string);

        let response = self
            .client
            .get(self.config.mpesa_auth_url())
            .header(header::AUTHORIZATION, format!("Basic {}", encoded_auth))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("M-Pesa auth failed: {} - {}", status, body);
            return Err(AppError::UpstreamAuth(format!(
                "token endpoint returned {}",
                status
            )));
        }

        let auth_response: AuthResponse = response.json().await?;
        let lifetime_secs = auth_response.expires_in.parse::<i64>().unwrap_or(3600);
        let token = CachedToken {
            access_token: auth_response.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(lifetime_secs),
        };

        *self.cached_token.write().unwrap() = Some(token.clone());
        info!("access token obtained, expires at {}", token.expires_at);
        Ok(token.access_token)
    }

    /// Submits an STK push request. `Ok` means the gateway accepted the
    /// request (`ResponseCode == "0"`) and will later report the outcome via
    /// the callback URL; a decline surfaces as `PaymentRejected` and a
    /// transport failure as `GatewayUnreachable`. No inline retry either way.
    pub async fn stk_push(
        &self,
        phone_number: &str,
        amount: u32,
        account_reference: &str,
    ) -> Result<StkPushResponse> {
        let formatted_phone = Self::format_phone_number(phone_number);
        info!("STK push for {} - KSh {}", formatted_phone, amount);

        let access_token = self.access_token().await?;
        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let password = self.generate_password(&timestamp);

        let stk_request = StkPushRequest {
            business_short_code: self.config.mpesa_short_code.clone(),
            password,
            timestamp,
            transaction_type: "CustomerPayBillOnline".to_string(),
            amount: amount.to_string(),
            party_a: formatted_phone.clone(),
            party_b: self.config.mpesa_short_code.clone(),
            phone_number: formatted_phone,
            callback_url: self.config.mpesa_callback_url.clone(),
            account_reference: account_reference.to_string(),
            transaction_desc: "Toll Fee Payment".to_string(),
        };

        let response = self
            .client
            .post(self.config.mpesa_stk_url())
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .header(header::CONTENT_TYPE, "application/json")
            .json(&stk_request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("STK push request failed: {} - {}", status, body);
            // a gateway outage or a stale credential is not a declined payment
            if status == StatusCode::UNAUTHORIZED {
                return Err(AppError::UpstreamAuth(format!(
                    "push endpoint returned {}",
                    status
                )));
            }
            if status.is_server_error() {
                return Err(AppError::GatewayUnreachable(format!(
                    "gateway returned {}",
                    status
                )));
            }
            return Err(AppError::PaymentRejected(format!(
                "gateway returned {}: {}",
                status, body
            )));
        }

        let stk_response: StkPushResponse = response.json().await?;
        if stk_response.response_code != "0" {
            warn!(
                "STK push rejected: {} - {}",
                stk_response.response_code, stk_response.response_description
            );
            return Err(AppError::PaymentRejected(
                stk_response.response_description,
            ));
        }

        info!("STK push accepted: {}", stk_response.checkout_request_id);
        Ok(stk_response)
    }

    /// Background refresh loop. Failures are logged and retried on the next
    /// tick; the loop never takes the process down.
    pub fn spawn_token_refresh(&self) -> tokio::task::JoinHandle<()> {
        // clones share the token cache through its inner Arc
        let gateway = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TOKEN_REFRESH_PERIOD);
            // consume the immediate first tick; startup already fetched a token
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = gateway.refresh_token().await {
                    warn!("scheduled token refresh failed, retrying next tick: {}", e);
                }
            }
        })
    }
}

#[async_trait]
impl PaymentGateway for MpesaGateway {
    async fn stk_push(
        &self,
        phone_number: &str,
        amount: u32,
        account_reference: &str,
    ) -> Result<StkPushResponse> {
        MpesaGateway::stk_push(self, phone_number, amount, account_reference).await
    }
}
