use skyfare_core::events::NoopEventPublisher;
use skyfare_core::models::{
    LineItem, OrderStatus, PaymentStatus, SettlementRequest, ShipmentEntry, ShipmentRequest,
    MAX_SHIPMENT_QUANTITY,
};
use skyfare_core::payment::{AuthorizationOutcome, AuthorizationRequest, PaymentAuthorizer, PaymentError};
use skyfare_core::repository::OrderReader;
use skyfare_core::{InventoryResource, SettlementError};
use skyfare_order::{
    InMemorySettlementStore, MockPaymentAuthorizer, SettlementOrchestrator, SettlementPolicy,
    SettlementService,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinSet;

const USER: i64 = 1;
const OTHER_USER: i64 = 2;

const CARD: i64 = 3;
const DECLINING_CARD: i64 = 4;
const OTHER_USERS_CARD: i64 = 5;
const INACTIVE_CARD: i64 = 6;
const FAILING_CARD: i64 = 8;

/// Approves like the mock gateway, optionally waits for a signal first, and records voids.
#[derive(Default)]
struct TestGateway {
    gate: Option<Arc<Notify>>,
    delay: Option<Duration>,
    voided: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl PaymentAuthorizer for TestGateway {
    async fn authorize(&self, request: &AuthorizationRequest) -> Result<AuthorizationOutcome, PaymentError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        MockPaymentAuthorizer.authorize(request).await
    }

    async fn void(&self, authorization_ref: &str) -> Result<(), PaymentError> {
        self.voided.lock().unwrap().push(authorization_ref.to_string());
        Ok(())
    }
}

fn seeded_store() -> InMemorySettlementStore {
    InMemorySettlementStore::builder()
        .seat(55, 10, 1200, 1)
        .seat(60, 10, 800, 5)
        .seat(61, 10, 500, 0)
        .seat(70, 11, 400, 10)
        .baggage(7, 150, Some(2))
        .baggage(8, 90, None)
        .payment_method(CARD, USER, "tok_visa", true)
        .payment_method(DECLINING_CARD, USER, "tok_decline", true)
        .payment_method(OTHER_USERS_CARD, OTHER_USER, "tok_visa", true)
        .payment_method(INACTIVE_CARD, USER, "tok_visa", false)
        .payment_method(FAILING_CARD, USER, "tok_fail", true)
        .address(9, USER)
        .address(10, USER)
        .address(19, OTHER_USER)
        .build()
}

fn orchestrator_with(
    store: &InMemorySettlementStore,
    gateway: Arc<dyn PaymentAuthorizer>,
    policy: SettlementPolicy,
) -> SettlementOrchestrator<InMemorySettlementStore> {
    SettlementOrchestrator::new(
        Arc::new(store.clone()),
        gateway,
        Arc::new(NoopEventPublisher),
        policy,
    )
}

fn orchestrator(store: &InMemorySettlementStore) -> SettlementOrchestrator<InMemorySettlementStore> {
    orchestrator_with(store, Arc::new(MockPaymentAuthorizer), SettlementPolicy::default())
}

fn item(flight_id: i64, seat_id: i64, baggage_id: Option<i64>, passenger_count: u32) -> LineItem {
    LineItem {
        flight_id,
        seat_id,
        baggage_id,
        passenger_count,
    }
}

fn request(items: Vec<LineItem>) -> SettlementRequest {
    SettlementRequest {
        user_id: USER,
        payment_method_ref: CARD,
        items,
        shipment: None,
        idempotency_key: None,
    }
}

fn shipment(cost: i64, address_id: i64) -> ShipmentRequest {
    ShipmentRequest {
        cost,
        entries: vec![ShipmentEntry {
            address_id,
            quantity: 1,
            description: Some("suitcase".to_string()),
        }],
    }
}

async fn wait_for_pending(store: &InMemorySettlementStore) {
    while store.orders_with_status(OrderStatus::Pending).await == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[tokio::test]
async fn test_single_seat_checkout() {
    let store = seeded_store();
    let service = orchestrator(&store);

    let receipt = service.settle(request(vec![item(10, 55, None, 1)])).await.unwrap();

    assert_eq!(receipt.order.total, 1200);
    assert_eq!(receipt.order.status, OrderStatus::Paid);
    assert_eq!(receipt.tickets.len(), 1);
    assert_eq!(receipt.tickets[0].price, 1200);
    assert_eq!(receipt.tickets[0].seat_id, 55);
    assert!(receipt.shipment.is_none());
    assert_eq!(store.remaining_seats(55).await, Some(0));

    let detail = store.get_order(USER, receipt.order.id).await.unwrap().unwrap();
    let payment = detail.payment.unwrap();
    assert_eq!(payment.status, PaymentStatus::Approved);
    assert_eq!(payment.amount, 1200);
    assert!(store.get_order(OTHER_USER, receipt.order.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_shipment_cost_is_added_to_total() {
    let store = seeded_store();
    let service = orchestrator(&store);

    let mut req = request(vec![item(10, 60, None, 1)]);
    req.shipment = Some(shipment(150, 9));
    let receipt = service.settle(req).await.unwrap();

    assert_eq!(receipt.order.total, 950);
    assert_eq!(receipt.computed_total(), 950);
    let shipment = receipt.shipment.unwrap();
    assert_eq!(shipment.cost, 150);
    assert_eq!(shipment.address_id, 9);
    assert_eq!(shipment.quantity, 1);
    assert_eq!(store.shipment_count().await, 1);
}

#[tokio::test]
async fn test_total_matches_tickets_and_shipment() {
    let store = seeded_store();
    let service = orchestrator(&store);

    let mut req = request(vec![item(10, 60, Some(7), 2), item(11, 70, Some(8), 3)]);
    req.shipment = Some(ShipmentRequest {
        cost: 300,
        entries: vec![
            ShipmentEntry { address_id: 10, quantity: 2, description: None },
            ShipmentEntry { address_id: 10, quantity: 1, description: Some("skis".to_string()) },
        ],
    });
    let receipt = service.settle(req).await.unwrap();

    // (800 + 150) * 2 + (400 + 90) * 3 + 300
    assert_eq!(receipt.order.total, 3670);
    assert_eq!(receipt.computed_total(), receipt.order.total);
    assert_eq!(receipt.tickets.len(), 5);
    assert_eq!(receipt.shipment.as_ref().map(|s| s.quantity), Some(3));

    let codes: HashSet<_> = receipt.tickets.iter().map(|t| t.code.as_str()).collect();
    assert_eq!(codes.len(), 5);

    assert_eq!(store.remaining_seats(60).await, Some(3));
    assert_eq!(store.remaining_seats(70).await, Some(7));
    assert_eq!(store.remaining_baggage(7).await, Some(0));
    assert_eq!(store.remaining_baggage(8).await, None);
}

#[tokio::test]
async fn test_concurrent_checkouts_for_last_seat() {
    let store = seeded_store();
    let service = orchestrator(&store);

    let (first, second) = tokio::join!(
        service.settle(request(vec![item(10, 55, None, 1)])),
        service.settle(request(vec![item(10, 55, None, 1)])),
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(SettlementError::InsufficientInventory { resource: InventoryResource::Seat, id: 55, .. })
    )));
    assert_eq!(store.ticket_count().await, 1);
    assert_eq!(store.remaining_seats(55).await, Some(0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_attempts_never_oversell() {
    let store = seeded_store();
    let service = Arc::new(orchestrator(&store));

    let mut attempts = JoinSet::new();
    for _ in 0..12 {
        let service = service.clone();
        attempts.spawn(async move { service.settle(request(vec![item(10, 60, None, 1)])).await });
    }

    let mut succeeded = 0;
    let mut sold_out = 0;
    while let Some(result) = attempts.join_next().await {
        match result.unwrap() {
            Ok(_) => succeeded += 1,
            Err(SettlementError::InsufficientInventory { .. }) => sold_out += 1,
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    assert_eq!(succeeded, 5);
    assert_eq!(sold_out, 7);
    assert_eq!(store.ticket_count().await, 5);
    assert_eq!(store.remaining_seats(60).await, Some(0));
}

#[tokio::test]
async fn test_partial_reservation_failure_leaves_nothing_behind() {
    let store = seeded_store();
    let service = orchestrator(&store);

    let err = service
        .settle(request(vec![item(10, 60, Some(7), 2), item(10, 61, None, 1)]))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SettlementError::InsufficientInventory { resource: InventoryResource::Seat, id: 61, requested: 1 }
    ));
    assert_eq!(store.remaining_seats(60).await, Some(5));
    assert_eq!(store.remaining_baggage(7).await, Some(2));
    assert_eq!(store.ticket_count().await, 0);
    for status in [OrderStatus::Pending, OrderStatus::Paid, OrderStatus::Failed] {
        assert_eq!(store.orders_with_status(status).await, 0);
    }
}

#[tokio::test]
async fn test_baggage_stock_is_reserved() {
    let store = seeded_store();
    let service = orchestrator(&store);

    service.settle(request(vec![item(10, 60, Some(7), 2)])).await.unwrap();
    assert_eq!(store.remaining_baggage(7).await, Some(0));

    let err = service
        .settle(request(vec![item(10, 60, Some(7), 1)]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SettlementError::InsufficientInventory { resource: InventoryResource::Baggage, id: 7, .. }
    ));
    assert_eq!(store.remaining_seats(60).await, Some(3));
}

#[tokio::test]
async fn test_declined_payment_releases_inventory_and_retry_succeeds() {
    let store = seeded_store();
    let service = orchestrator(&store);

    let mut declined = request(vec![item(10, 55, None, 1)]);
    declined.payment_method_ref = DECLINING_CARD;
    let err = service.settle(declined).await.unwrap_err();

    assert!(matches!(err, SettlementError::PaymentDeclined(_)));
    assert_eq!(store.remaining_seats(55).await, Some(1));
    assert_eq!(store.orders_with_status(OrderStatus::Paid).await, 0);
    assert_eq!(store.orders_with_status(OrderStatus::Failed).await, 1);
    assert_eq!(store.ticket_count().await, 0);

    // First record created in a fresh store is the order.
    let payments = store.payments_for(1).await;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Declined);

    let receipt = service.settle(request(vec![item(10, 55, None, 1)])).await.unwrap();
    assert_eq!(receipt.order.status, OrderStatus::Paid);
    assert_eq!(store.remaining_seats(55).await, Some(0));
}

#[tokio::test]
async fn test_gateway_failure_releases_inventory() {
    let store = seeded_store();
    let service = orchestrator(&store);

    let mut req = request(vec![item(10, 55, None, 1)]);
    req.payment_method_ref = FAILING_CARD;
    let err = service.settle(req).await.unwrap_err();

    assert!(matches!(err, SettlementError::PaymentUnavailable(_)));
    assert_eq!(store.remaining_seats(55).await, Some(1));
    assert_eq!(store.orders_with_status(OrderStatus::Failed).await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_payment_timeout_releases_inventory() {
    let store = seeded_store();
    let gateway = Arc::new(TestGateway {
        delay: Some(Duration::from_secs(30)),
        ..Default::default()
    });
    let policy = SettlementPolicy {
        payment_timeout: Duration::from_millis(50),
        ..Default::default()
    };
    let service = orchestrator_with(&store, gateway, policy);

    let err = service.settle(request(vec![item(10, 55, None, 1)])).await.unwrap_err();

    assert!(matches!(err, SettlementError::PaymentTimeout(_)));
    assert_eq!(store.remaining_seats(55).await, Some(1));
    assert_eq!(store.orders_with_status(OrderStatus::Pending).await, 0);
    assert_eq!(store.orders_with_status(OrderStatus::Failed).await, 1);
}

#[tokio::test]
async fn test_payment_method_must_belong_to_user_and_be_active() {
    let store = seeded_store();
    let service = orchestrator(&store);

    for card in [OTHER_USERS_CARD, INACTIVE_CARD, 999] {
        let mut req = request(vec![item(10, 55, None, 1)]);
        req.payment_method_ref = card;
        let err = service.settle(req).await.unwrap_err();
        assert!(matches!(err, SettlementError::InvalidPaymentMethod(_)), "card {}", card);
    }

    assert_eq!(store.remaining_seats(55).await, Some(1));
    assert_eq!(store.orders_with_status(OrderStatus::Failed).await, 0);
}

#[tokio::test]
async fn test_rejects_malformed_carts() {
    let store = seeded_store();
    let service = orchestrator(&store);

    let cases = vec![
        request(vec![]),
        request(vec![item(10, 60, None, 0)]),
        request(vec![item(10, 60, None, 10)]),
        request(vec![item(11, 60, None, 1)]),
        request(vec![item(10, 404, None, 1)]),
        request(vec![item(10, 60, Some(404), 1)]),
        SettlementRequest {
            shipment: Some(shipment(150, 19)),
            ..request(vec![item(10, 60, None, 1)])
        },
        SettlementRequest {
            shipment: Some(shipment(-1, 9)),
            ..request(vec![item(10, 60, None, 1)])
        },
        SettlementRequest {
            shipment: Some(ShipmentRequest {
                cost: 100,
                entries: vec![
                    ShipmentEntry { address_id: 9, quantity: 1, description: None },
                    ShipmentEntry { address_id: 10, quantity: 1, description: None },
                ],
            }),
            ..request(vec![item(10, 60, None, 1)])
        },
        SettlementRequest {
            idempotency_key: Some("   ".to_string()),
            ..request(vec![item(10, 60, None, 1)])
        },
        SettlementRequest {
            shipment: Some(ShipmentRequest {
                cost: 150,
                entries: vec![
                    ShipmentEntry { address_id: 9, quantity: u32::MAX, description: None },
                    ShipmentEntry { address_id: 9, quantity: 1, description: None },
                ],
            }),
            ..request(vec![item(10, 60, None, 1)])
        },
        SettlementRequest {
            shipment: Some(ShipmentRequest {
                cost: 150,
                entries: vec![ShipmentEntry {
                    address_id: 9,
                    quantity: MAX_SHIPMENT_QUANTITY + 1,
                    description: None,
                }],
            }),
            ..request(vec![item(10, 60, None, 1)])
        },
    ];

    for (index, case) in cases.into_iter().enumerate() {
        let err = service.settle(case).await.unwrap_err();
        assert!(matches!(err, SettlementError::Validation(_)), "case {}: {}", index, err);
    }

    assert_eq!(store.remaining_seats(60).await, Some(5));
    assert_eq!(store.orders_with_status(OrderStatus::Failed).await, 0);
    assert_eq!(store.orders_with_status(OrderStatus::Pending).await, 0);
}

#[tokio::test]
async fn test_oversized_shipment_is_rejected_before_payment() {
    let store = seeded_store();
    let service = orchestrator(&store);

    let mut req = request(vec![item(10, 55, None, 1)]);
    req.shipment = Some(ShipmentRequest {
        cost: 150,
        entries: vec![
            ShipmentEntry { address_id: 9, quantity: u32::MAX, description: None },
            ShipmentEntry { address_id: 9, quantity: 1, description: None },
        ],
    });

    let err = service.settle(req).await.unwrap_err();
    assert!(matches!(err, SettlementError::Validation(_)), "{}", err);

    assert_eq!(store.remaining_seats(55).await, Some(1));
    assert_eq!(store.orders_with_status(OrderStatus::Pending).await, 0);
    assert_eq!(store.shipment_count().await, 0);
}

#[tokio::test]
async fn test_shipment_only_checkout() {
    let store = seeded_store();
    let service = orchestrator(&store);

    let mut req = request(vec![]);
    req.shipment = Some(shipment(150, 9));
    let receipt = service.settle(req).await.unwrap();

    assert_eq!(receipt.order.total, 150);
    assert!(receipt.tickets.is_empty());
    assert!(receipt.shipment.is_some());
}

#[tokio::test]
async fn test_idempotent_retry_replays_receipt() {
    let store = seeded_store();
    let service = orchestrator(&store);

    let keyed = || SettlementRequest {
        idempotency_key: Some("cart-42".to_string()),
        ..request(vec![item(10, 60, None, 2)])
    };

    let first = service.settle(keyed()).await.unwrap();
    let second = service.settle(keyed()).await.unwrap();

    assert_eq!(first.order.id, second.order.id);
    assert_eq!(first.tickets, second.tickets);
    assert_eq!(store.ticket_count().await, 2);
    assert_eq!(store.remaining_seats(60).await, Some(3));
}

#[tokio::test]
async fn test_key_in_flight_is_rejected_as_duplicate() {
    let store = seeded_store();
    let gate = Arc::new(Notify::new());
    let gateway = Arc::new(TestGateway {
        gate: Some(gate.clone()),
        ..Default::default()
    });
    let service = Arc::new(orchestrator_with(&store, gateway, SettlementPolicy::default()));

    let keyed = || SettlementRequest {
        idempotency_key: Some("cart-7".to_string()),
        ..request(vec![item(10, 60, None, 1)])
    };

    let in_flight = {
        let service = service.clone();
        let req = keyed();
        tokio::spawn(async move { service.settle(req).await })
    };
    wait_for_pending(&store).await;

    let err = service.settle(keyed()).await.unwrap_err();
    assert!(matches!(err, SettlementError::DuplicateRequest(_)));

    gate.notify_one();
    let receipt = in_flight.await.unwrap().unwrap();
    assert_eq!(receipt.order.status, OrderStatus::Paid);
    assert_eq!(store.remaining_seats(60).await, Some(4));
}

#[tokio::test]
async fn test_failed_key_can_be_retried() {
    let store = seeded_store();
    let service = orchestrator(&store);

    let mut declined = request(vec![item(10, 55, None, 1)]);
    declined.payment_method_ref = DECLINING_CARD;
    declined.idempotency_key = Some("cart-9".to_string());
    service.settle(declined).await.unwrap_err();

    let retry = SettlementRequest {
        idempotency_key: Some("cart-9".to_string()),
        ..request(vec![item(10, 55, None, 1)])
    };
    let receipt = service.settle(retry).await.unwrap();
    assert_eq!(receipt.order.status, OrderStatus::Paid);
}

#[tokio::test]
async fn test_storage_failure_voids_and_compensates() {
    let store = seeded_store();
    let gateway = Arc::new(TestGateway::default());
    let service = orchestrator_with(&store, gateway.clone(), SettlementPolicy::default());

    store.set_ticket_writes_failing(true);
    let err = service.settle(request(vec![item(10, 55, None, 1)])).await.unwrap_err();

    let correlation_id = match err {
        SettlementError::Storage { correlation_id, .. } => correlation_id,
        other => panic!("expected storage failure, got {}", other),
    };
    assert!(!correlation_id.is_nil());
    assert_eq!(gateway.voided.lock().unwrap().len(), 1);
    assert_eq!(store.remaining_seats(55).await, Some(1));
    assert_eq!(store.orders_with_status(OrderStatus::Failed).await, 1);
    assert_eq!(store.ticket_count().await, 0);
}

#[tokio::test]
async fn test_sweeper_fails_stale_pending_orders() {
    let store = seeded_store();
    let gate = Arc::new(Notify::new());
    let gateway = Arc::new(TestGateway {
        gate: Some(gate.clone()),
        ..Default::default()
    });
    let service = Arc::new(orchestrator_with(&store, gateway.clone(), SettlementPolicy::default()));

    let stuck = {
        let service = service.clone();
        tokio::spawn(async move { service.settle(request(vec![item(10, 55, None, 1)])).await })
    };
    wait_for_pending(&store).await;
    assert_eq!(store.remaining_seats(55).await, Some(0));

    assert_eq!(service.expire_stale(Duration::from_secs(3600)).await.unwrap(), 0);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(service.expire_stale(Duration::ZERO).await.unwrap(), 1);
    assert_eq!(store.remaining_seats(55).await, Some(1));

    // The late approval can no longer move the order to PAID.
    gate.notify_one();
    let err = stuck.await.unwrap().unwrap_err();
    assert!(matches!(err, SettlementError::Storage { .. }));
    assert_eq!(gateway.voided.lock().unwrap().len(), 1);
    assert_eq!(store.orders_with_status(OrderStatus::Failed).await, 1);
    assert_eq!(store.ticket_count().await, 0);
    assert_eq!(store.remaining_seats(55).await, Some(1));
}

#[tokio::test]
async fn test_quote_does_not_reserve() {
    let store = seeded_store();
    let service = orchestrator(&store);

    let quote = service
        .quote(&[item(10, 60, Some(7), 2)], Some(&shipment(150, 9)))
        .await
        .unwrap();

    assert_eq!(quote.tickets_total, 1900);
    assert_eq!(quote.total, 2050);
    assert_eq!(quote.currency, "MXN");
    assert_eq!(store.remaining_seats(60).await, Some(5));
    assert_eq!(store.remaining_baggage(7).await, Some(2));
}
