// handlers/payments.rs
use axum::{
    extract::{Path, Query, State},
    Json,
};
use mongodb::bson::oid::ObjectId;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::errors::{AppError, Result};
use crate::models::transaction::{
    NewTransaction, PaymentOutcome, StkCallback, StkCallbackEnvelope, Transaction,
};
use crate::services::ledger::TransactionStore;
use crate::services::mpesa::{MpesaGateway, PaymentGateway};
use crate::services::registry::VehicleRegistry;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InitiatePayment {
    pub license_plate: String,
    pub phone_number: String,
}

/// Verification flow: confirm the plate is registered, push the toll fee to
/// the payer's phone, and open a `pending` ledger row for the attempt. A
/// rejected or unreachable gateway leaves no row behind.
pub async fn initiate_payment(
    State(state): State<AppState>,
    Json(request): Json<InitiatePayment>,
) -> Result<Json<Value>> {
    let plate = request.license_plate.trim().to_uppercase();
    if plate.is_empty() {
        return Err(AppError::Validation("license plate cannot be blank".into()));
    }
    if request.phone_number.trim().is_empty() {
        return Err(AppError::Validation("phone number cannot be blank".into()));
    }

    let (tx, customer_message) = process_initiation(
        state.vehicles.as_ref(),
        state.mpesa.as_ref(),
        state.ledger.as_ref(),
        &plate,
        &request.phone_number,
        state.toll_amount,
    )
    .await?;

    Ok(Json(json!({
        "registered": true,
        "transaction_id": tx.id.map(|id| id.to_hex()),
        "checkout_request_id": tx.checkout_request_id,
        "customer_message": customer_message,
    })))
}

/// Core initiation flow: registry existence check, then gateway push, then
/// the `pending` ledger row. A miss or a gateway failure returns before the
/// next step, so an unregistered plate never reaches the gateway and a
/// declined push never opens a row.
pub async fn process_initiation(
    vehicles: &dyn VehicleRegistry,
    gateway: &dyn PaymentGateway,
    ledger: &dyn TransactionStore,
    plate: &str,
    phone_number: &str,
    amount: u32,
) -> Result<(Transaction, String)> {
    if vehicles.find_by_plate(plate).await?.is_none() {
        info!("payment refused, plate {} not registered", plate);
        return Err(AppError::VehicleNotFound);
    }

    let accepted = gateway.stk_push(phone_number, amount, plate).await?;

    let tx = ledger
        .create(NewTransaction {
            license_plate: plate.to_string(),
            phone_number: MpesaGateway::format_phone_number(phone_number),
            amount,
            checkout_request_id: accepted.checkout_request_id,
            merchant_request_id: accepted.merchant_request_id,
        })
        .await?;

    info!(
        "payment initiated for {}: checkout {}",
        plate, tx.checkout_request_id
    );

    Ok((tx, accepted.customer_message))
}

/// Gateway webhook. Always acknowledges with the success body M-Pesa expects;
/// anything else makes the gateway retry the callback indefinitely. Unmatched
/// or replayed callbacks are logged and dropped.
pub async fn mpesa_callback(
    State(state): State<AppState>,
    Json(payload): Json<StkCallbackEnvelope>,
) -> Json<Value> {
    let callback = payload.body.stk_callback;
    info!(
        "received M-Pesa callback for checkout {} (merchant {}, result code {})",
        callback.checkout_request_id, callback.merchant_request_id, callback.result_code
    );

    if let Err(e) = reconcile_callback(state.ledger.as_ref(), &callback).await {
        // acknowledge anyway; a storage hiccup must not trigger a retry storm
        error!(
            "failed to reconcile callback {}: {}",
            callback.checkout_request_id, e
        );
    }

    Json(json!({ "ResultCode": 0, "ResultDesc": "Success" }))
}

/// Applies the callback's outcome to the matching `pending` ledger row. The
/// store's conditional update makes this idempotent under duplicate delivery.
pub async fn reconcile_callback(
    store: &dyn TransactionStore,
    callback: &StkCallback,
) -> Result<()> {
    let outcome = if callback.result_code == 0 {
        match callback.receipt_number() {
            Some(receipt_number) => PaymentOutcome::Success { receipt_number },
            // receipt_number is only ever stored for a success
            None => PaymentOutcome::Failed {
                description: "gateway reported success without a receipt number".into(),
            },
        }
    } else {
        PaymentOutcome::Failed {
            description: callback.result_desc.clone(),
        }
    };

    match store
        .apply_outcome(&callback.checkout_request_id, outcome)
        .await?
    {
        Some(tx) => info!(
            "transaction {} resolved to {}",
            tx.checkout_request_id,
            tx.status.as_str()
        ),
        None => warn!(
            "callback for unknown or already-settled checkout {}, ignoring",
            callback.checkout_request_id
        ),
    }
    Ok(())
}

/// Poll target for the verification UI. Pure read; safe at any frequency.
pub async fn transaction_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let id = ObjectId::parse_str(&id)?;
    let tx = state
        .ledger
        .find_by_id(&id)
        .await?
        .ok_or(AppError::TransactionNotFound)?;

    Ok(Json(json!({
        "status": tx.status.as_str(),
        "receipt_number": tx.receipt_number,
        "updated_at": tx.updated_at.to_rfc3339(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    pub limit: Option<i64>,
}

pub async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<TransactionsQuery>,
) -> Result<Json<Value>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let transactions = state.ledger.list_recent(limit).await?;
    Ok(Json(json!({
        "count": transactions.len(),
        "transactions": transactions,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::transaction::TransactionStatus;
    use crate::models::vehicle::Vehicle;
    use crate::services::ledger::InMemoryTransactionStore;
    use crate::services::mpesa::StkPushResponse;
    use crate::services::registry::InMemoryVehicleRegistry;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn pending_attempt(checkout_id: &str) -> NewTransaction {
        NewTransaction {
            license_plate: "KAA001A".into(),
            phone_number: "254712345678".into(),
            amount: 100,
            checkout_request_id: checkout_id.into(),
            merchant_request_id: "29115-34620561-1".into(),
        }
    }

    fn callback(checkout_id: &str, result_code: i32, body: Value) -> StkCallback {
        let desc = if result_code == 0 {
            "The service request is processed successfully."
        } else {
            "Request cancelled by user."
        };
        let payload = json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": checkout_id,
                    "ResultCode": result_code,
                    "ResultDesc": desc,
                    "CallbackMetadata": body,
                }
            }
        });
        serde_json::from_value::<StkCallbackEnvelope>(payload)
            .unwrap()
            .body
            .stk_callback
    }

    fn success_metadata(receipt: &str) -> Value {
        json!({
            "Item": [
                { "Name": "Amount", "Value": 100.0 },
                { "Name": "MpesaReceiptNumber", "Value": receipt },
                { "Name": "TransactionDate", "Value": 20191219102115u64 },
                { "Name": "PhoneNumber", "Value": 254712345678u64 }
            ]
        })
    }

    fn registered_vehicle(plate: &str) -> Vehicle {
        Vehicle {
            id: None,
            license_plate: plate.into(),
            owner_name: "Jane Wanjiku".into(),
            car_type: "Saloon".into(),
            brand: "Toyota".into(),
            color: "White".into(),
            contact: "0712345678".into(),
            registration_date: "2024-03-01".into(),
            created_at: Utc::now(),
        }
    }

    struct AcceptingGateway {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PaymentGateway for AcceptingGateway {
        async fn stk_push(
            &self,
            _phone_number: &str,
            _amount: u32,
            _account_reference: &str,
        ) -> Result<StkPushResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(StkPushResponse {
                merchant_request_id: "29115-34620561-1".into(),
                checkout_request_id: "ws_CO_1".into(),
                response_code: "0".into(),
                response_description: "Success. Request accepted for processing".into(),
                customer_message: "Success. Request accepted for processing".into(),
            })
        }
    }

    struct RejectingGateway {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PaymentGateway for RejectingGateway {
        async fn stk_push(
            &self,
            _phone_number: &str,
            _amount: u32,
            _account_reference: &str,
        ) -> Result<StkPushResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::PaymentRejected(
                "The initiator information is invalid.".into(),
            ))
        }
    }

    #[tokio::test]
    async fn unregistered_vehicle_makes_no_gateway_call_and_no_row() {
        let vehicles = InMemoryVehicleRegistry::new();
        vehicles.register(registered_vehicle("KAA001A")).await.unwrap();
        let ledger = InMemoryTransactionStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let gateway = AcceptingGateway { calls: calls.clone() };

        let err = process_initiation(
            &vehicles,
            &gateway,
            &ledger,
            "ZZZ999Z",
            "0712345678",
            100,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::VehicleNotFound));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(ledger.list_recent(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejected_initiation_leaves_no_ledger_row() {
        let vehicles = InMemoryVehicleRegistry::new();
        vehicles.register(registered_vehicle("KAA001A")).await.unwrap();
        let ledger = InMemoryTransactionStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let gateway = RejectingGateway { calls: calls.clone() };

        let err = process_initiation(
            &vehicles,
            &gateway,
            &ledger,
            "KAA001A",
            "0712345678",
            100,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::PaymentRejected(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(ledger.list_recent(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn accepted_initiation_then_callback_completes_the_payment() {
        let vehicles = InMemoryVehicleRegistry::new();
        vehicles.register(registered_vehicle("KAA001A")).await.unwrap();
        let ledger = InMemoryTransactionStore::new();
        let gateway = AcceptingGateway {
            calls: Arc::new(AtomicUsize::new(0)),
        };

        let (tx, _message) = process_initiation(
            &vehicles,
            &gateway,
            &ledger,
            "KAA001A",
            "0712345678",
            100,
        )
        .await
        .unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.phone_number, "254712345678");
        assert_eq!(tx.checkout_request_id, "ws_CO_1");

        reconcile_callback(&ledger, &callback("ws_CO_1", 0, success_metadata("QWE123")))
            .await
            .unwrap();

        let stored = ledger
            .find_by_id(tx.id.as_ref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TransactionStatus::Success);
        assert_eq!(stored.receipt_number.as_deref(), Some("QWE123"));
    }

    #[tokio::test]
    async fn successful_callback_resolves_the_pending_row() {
        let store = InMemoryTransactionStore::new();
        let tx = store.create(pending_attempt("ws_CO_1")).await.unwrap();

        reconcile_callback(&store, &callback("ws_CO_1", 0, success_metadata("QWE123")))
            .await
            .unwrap();

        let stored = store
            .find_by_id(tx.id.as_ref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TransactionStatus::Success);
        assert_eq!(stored.receipt_number.as_deref(), Some("QWE123"));
    }

    #[tokio::test]
    async fn cancelled_payment_is_marked_failed_with_description() {
        let store = InMemoryTransactionStore::new();
        let tx = store.create(pending_attempt("ws_CO_1")).await.unwrap();

        reconcile_callback(&store, &callback("ws_CO_1", 1032, Value::Null))
            .await
            .unwrap();

        let stored = store
            .find_by_id(tx.id.as_ref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TransactionStatus::Failed);
        assert_eq!(stored.receipt_number, None);
        assert_eq!(
            stored.result_description.as_deref(),
            Some("Request cancelled by user.")
        );
    }

    #[tokio::test]
    async fn unmatched_callback_mutates_nothing() {
        let store = InMemoryTransactionStore::new();
        let tx = store.create(pending_attempt("ws_CO_1")).await.unwrap();

        reconcile_callback(
            &store,
            &callback("ws_CO_unknown", 0, success_metadata("QWE123")),
        )
        .await
        .unwrap();

        let stored = store
            .find_by_id(tx.id.as_ref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TransactionStatus::Pending);
        assert_eq!(stored.receipt_number, None);
    }

    #[tokio::test]
    async fn duplicate_callback_does_not_overwrite_the_first_outcome() {
        let store = InMemoryTransactionStore::new();
        let tx = store.create(pending_attempt("ws_CO_1")).await.unwrap();

        let first = callback("ws_CO_1", 0, success_metadata("QWE123"));
        reconcile_callback(&store, &first).await.unwrap();
        // gateway redelivers; this time as a failure
        reconcile_callback(&store, &callback("ws_CO_1", 1037, Value::Null))
            .await
            .unwrap();

        let stored = store
            .find_by_id(tx.id.as_ref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TransactionStatus::Success);
        assert_eq!(stored.receipt_number.as_deref(), Some("QWE123"));
    }

    #[tokio::test]
    async fn success_without_receipt_is_recorded_as_failure() {
        let store = InMemoryTransactionStore::new();
        let tx = store.create(pending_attempt("ws_CO_1")).await.unwrap();

        reconcile_callback(&store, &callback("ws_CO_1", 0, json!({ "Item": [] })))
            .await
            .unwrap();

        let stored = store
            .find_by_id(tx.id.as_ref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TransactionStatus::Failed);
        assert_eq!(stored.receipt_number, None);
    }
}
