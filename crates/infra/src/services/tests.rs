use std::sync::Arc;

use chrono::{Duration, Utc};

use cardvault_auth::Principal;
use cardvault_core::{Amount, Clock, ManualClock, ProductId, UserId};
use cardvault_events::{BusInvalidationSink, CacheInvalidation, EventBus, InMemoryEventBus, Subscription};
use cardvault_gateway::{GatewayError, GatewayOrder, Merchant, MockGateway, Params, TRADE_SUCCESS};
use cardvault_inventory::CardStatus;
use cardvault_products::{InMemoryCatalog, Product};
use cardvault_sales::{Order, OrderEvent, OrderStatus, TransitionPolicy};

use crate::lease::LocalLease;
use crate::store::{InMemoryStore, OrderRepository, Store, StoreTx};

use super::*;

const KEY: &str = "merchant-key";
const PID: &str = "1001";

struct Harness {
    shop: Shop<InMemoryStore>,
    store: InMemoryStore,
    gateway: Arc<MockGateway>,
    clock: Arc<ManualClock>,
    invalidations: Subscription<CacheInvalidation>,
    product: Product,
    buyer: Principal,
    admin: Principal,
}

impl Harness {
    async fn new(stock: usize, price: &str) -> Self {
        Self::with_settings(stock, price, ShopSettings::default()).await
    }

    async fn with_settings(stock: usize, price: &str, settings: ShopSettings) -> Self {
        let store = InMemoryStore::new();
        let catalog = Arc::new(InMemoryCatalog::new());
        let gateway = Arc::new(MockGateway::new(Merchant::new(PID, KEY)));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let bus: Arc<InMemoryEventBus<CacheInvalidation>> = Arc::new(InMemoryEventBus::new());
        let invalidations = bus.subscribe();

        let product = Product {
            id: ProductId::new(),
            name: "Gift card".to_string(),
            price: Amount::parse(price).unwrap(),
            min_qty: 1,
            max_qty: 10,
            is_active: true,
        };
        catalog.upsert(product.clone());
        store
            .import_cards(product.id, (0..stock).map(|i| format!("CARD-{i:04}")))
            .await;

        let shop = Shop::new(ShopContext {
            store: store.clone(),
            catalog,
            gateway: gateway.clone(),
            invalidation: Arc::new(BusInvalidationSink::new(bus)),
            clock: clock.clone(),
            lease: Arc::new(LocalLease::new()),
            settings,
        });

        Self {
            shop,
            store,
            gateway,
            clock,
            invalidations,
            product,
            buyer: Principal::Buyer { id: UserId::new() },
            admin: Principal::Admin { id: UserId::new() },
        }
    }

    async fn place(&self, quantity: u32) -> Order {
        self.place_as(&self.buyer, quantity).await.unwrap().order
    }

    async fn place_as(&self, principal: &Principal, quantity: u32) -> ServiceResult<PlacedOrder> {
        self.shop
            .checkout()
            .place_order(
                principal,
                CheckoutRequest {
                    product_id: self.product.id,
                    quantity,
                    channel: "alipay".to_string(),
                },
            )
            .await
    }

    fn notification(&self, order: &Order, money: &str) -> Params {
        self.gateway
            .signed_notification(&order.order_no, "T-100", &order.payment_method, money, TRADE_SUCCESS)
    }

    async fn pay(&self, order: &Order) -> Order {
        let money = order.total_amount.to_two_decimals();
        let reply = self.shop.webhooks().handle(&self.notification(order, &money)).await;
        assert_eq!(reply, WebhookReply::Success);
        self.reload(order).await
    }

    async fn reload(&self, order: &Order) -> Order {
        self.shop.context().load_order(order.id).await.unwrap()
    }

    async fn count(&self, status: CardStatus) -> usize {
        self.store
            .cards()
            .await
            .into_iter()
            .filter(|c| c.product_id == self.product.id && c.status == status)
            .count()
    }

    async fn stock(&self) -> u64 {
        self.shop.checkout().stock(self.product.id).await.unwrap()
    }
}

#[tokio::test]
async fn expiry_returns_reserved_stock() {
    let h = Harness::new(5, "1.00").await;

    let order = h.place(3).await;
    assert_eq!(h.stock().await, 2);

    h.clock.advance(Duration::minutes(16));
    assert_eq!(h.stock().await, 5);
    assert_eq!(h.reload(&order).await.status, OrderStatus::Expired);
    assert_eq!(h.count(CardStatus::Locked).await, 0);
}

#[tokio::test]
async fn notification_amount_must_match_to_the_cent() {
    let h = Harness::new(1, "10.00").await;
    let order = h.place(1).await;

    let reply = h.shop.webhooks().handle(&h.notification(&order, "10.01")).await;
    assert_eq!(reply, WebhookReply::Rejected);
    assert_eq!(reply.body(), "fail");
    assert_eq!(reply.status_code(), 400);
    assert_eq!(h.reload(&order).await.status, OrderStatus::Pending);

    let reply = h.shop.webhooks().handle(&h.notification(&order, "10.00")).await;
    assert_eq!(reply, WebhookReply::Success);
    let paid = h.reload(&order).await;
    assert_eq!(paid.status, OrderStatus::Completed);
    assert_eq!(paid.trade_no.as_deref(), Some("T-100"));
    assert_eq!(h.count(CardStatus::Sold).await, 1);
    assert_eq!(h.store.sales_count(h.product.id).await, 1);
}

#[tokio::test]
async fn repeated_notifications_fulfill_once() {
    let h = Harness::new(5, "2.50").await;
    let order = h.place(2).await;
    let params = h.notification(&order, "5.00");

    for _ in 0..5 {
        let reply = h.shop.webhooks().handle(&params).await;
        assert_eq!(reply, WebhookReply::Success);
        assert_eq!(reply.body(), "success");
    }

    assert_eq!(h.count(CardStatus::Sold).await, 2);
    assert_eq!(h.store.sales_count(h.product.id).await, 2);
}

#[tokio::test]
async fn concurrent_notifications_sell_quantity_cards() {
    let h = Harness::new(6, "1.00").await;
    let order = h.place(3).await;
    let params = h.notification(&order, "3.00");

    let (first, second) = (h.shop.webhooks(), h.shop.webhooks());
    let (a, b) = tokio::join!(first.handle(&params), second.handle(&params));
    assert_eq!(a, WebhookReply::Success);
    assert_eq!(b, WebhookReply::Success);
    assert_eq!(h.count(CardStatus::Sold).await, 3);
    assert_eq!(h.store.sales_count(h.product.id).await, 3);
}

#[tokio::test]
async fn stale_snapshot_after_completion_is_already_settled() {
    let h = Harness::new(3, "1.00").await;
    let stale = h.place(2).await;
    h.pay(&stale).await;
    assert_eq!(stale.status, OrderStatus::Pending);

    let event = OrderEvent::PaymentConfirmed {
        trade_no: "T-LATE".to_string(),
        paid_at: h.clock.now(),
    };
    match h.shop.context().complete_order(&stale, event).await {
        Ok(Completion::AlreadySettled(current)) => {
            assert_eq!(current.status, OrderStatus::Completed);
            assert_eq!(current.trade_no.as_deref(), Some("T-100"));
        }
        other => panic!("expected an already settled order, got {other:?}"),
    }

    let reply = h.shop.webhooks().confirm_payment(&stale, "T-LATE").await;
    assert_eq!(reply, WebhookReply::Success);
    assert_eq!(h.count(CardStatus::Sold).await, 2);
    assert_eq!(h.store.sales_count(h.product.id).await, 2);
}

#[tokio::test]
async fn stale_snapshot_after_expiry_asks_for_redelivery() {
    let h = Harness::new(2, "1.00").await;
    let stale = h.place(2).await;
    h.clock.advance(Duration::minutes(16));
    h.shop.sweeper().sweep_as(&h.admin).await.unwrap();
    assert_eq!(h.reload(&stale).await.status, OrderStatus::Expired);

    let event = OrderEvent::PaymentConfirmed {
        trade_no: "T-LATE".to_string(),
        paid_at: h.clock.now(),
    };
    assert!(matches!(
        h.shop.context().complete_order(&stale, event).await,
        Err(ServiceError::Conflict(_))
    ));

    let reply = h.shop.webhooks().confirm_payment(&stale, "T-LATE").await;
    assert_eq!(reply, WebhookReply::RetryLater);
    assert_eq!(reply.status_code(), 500);
    assert_eq!(reply.body(), "fail");
    assert_eq!(h.count(CardStatus::Sold).await, 0);
    assert_eq!(h.count(CardStatus::Available).await, 2);
}

#[tokio::test]
async fn forged_or_mismatched_notifications_are_rejected() {
    let h = Harness::new(2, "1.00").await;
    let order = h.place(1).await;

    let mut tampered = h.notification(&order, "1.00");
    tampered.insert("money".to_string(), "0.01".to_string());
    assert_eq!(h.shop.webhooks().handle(&tampered).await, WebhookReply::Rejected);

    let mut wrong_type = h.notification(&order, "1.00");
    wrong_type.insert("sign_type".to_string(), "RSA".to_string());
    assert_eq!(h.shop.webhooks().handle(&wrong_type).await, WebhookReply::Rejected);

    let stranger = MockGateway::new(Merchant::new("9999", KEY));
    let foreign = stranger.signed_notification(&order.order_no, "T-1", "alipay", "1.00", TRADE_SUCCESS);
    assert_eq!(h.shop.webhooks().handle(&foreign).await, WebhookReply::Rejected);

    let wrong_channel = h
        .gateway
        .signed_notification(&order.order_no, "T-1", "wxpay", "1.00", TRADE_SUCCESS);
    assert_eq!(h.shop.webhooks().handle(&wrong_channel).await, WebhookReply::Rejected);

    let unknown = h
        .gateway
        .signed_notification("20260101000000000000", "T-1", "alipay", "1.00", TRADE_SUCCESS);
    assert_eq!(h.shop.webhooks().handle(&unknown).await, WebhookReply::Rejected);

    let mut missing = h.notification(&order, "1.00");
    missing.remove("trade_no");
    assert_eq!(h.shop.webhooks().handle(&missing).await, WebhookReply::Rejected);

    assert_eq!(h.reload(&order).await.status, OrderStatus::Pending);
}

#[tokio::test]
async fn non_success_and_closed_orders_are_acknowledged_without_change() {
    let h = Harness::new(2, "1.00").await;
    let order = h.place(1).await;

    let waiting = h
        .gateway
        .signed_notification(&order.order_no, "T-1", "alipay", "1.00", "WAIT_BUYER_PAY");
    assert_eq!(h.shop.webhooks().handle(&waiting).await, WebhookReply::Success);
    assert_eq!(h.reload(&order).await.status, OrderStatus::Pending);

    h.clock.advance(Duration::minutes(16));
    h.shop.sweeper().sweep().await.unwrap();

    let late = h.notification(&order, "1.00");
    assert_eq!(h.shop.webhooks().handle(&late).await, WebhookReply::Success);
    assert_eq!(h.reload(&order).await.status, OrderStatus::Expired);
    assert_eq!(h.count(CardStatus::Sold).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_checkouts_never_oversell() {
    let h = Harness::new(5, "1.00").await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let shop = h.shop.clone();
        let product_id = h.product.id;
        tasks.push(tokio::spawn(async move {
            let buyer = Principal::Buyer { id: UserId::new() };
            shop.checkout()
                .place_order(
                    &buyer,
                    CheckoutRequest {
                        product_id,
                        quantity: 1,
                        channel: "alipay".to_string(),
                    },
                )
                .await
        }));
    }

    let mut placed = 0;
    let mut short = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => placed += 1,
            Err(ServiceError::InsufficientStock { requested: 1, available: 0 }) => short += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(placed, 5);
    assert_eq!(short, 3);
    assert_eq!(h.count(CardStatus::Locked).await, 5);
}

#[tokio::test]
async fn insufficient_stock_reserves_nothing() {
    let h = Harness::new(2, "1.00").await;

    let err = h.place_as(&h.buyer, 3).await.unwrap_err();
    assert_eq!(
        err,
        ServiceError::InsufficientStock {
            requested: 3,
            available: 2
        }
    );
    assert_eq!(h.count(CardStatus::Available).await, 2);
}

#[tokio::test]
async fn checkout_validates_channel_and_quantity() {
    let h = Harness::new(2, "1.00").await;

    let err = h
        .shop
        .checkout()
        .place_order(
            &h.buyer,
            CheckoutRequest {
                product_id: h.product.id,
                quantity: 1,
                channel: "paypal".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));

    assert!(matches!(h.place_as(&h.buyer, 11).await, Err(ServiceError::Validation(_))));
    assert!(matches!(h.place_as(&h.buyer, 0).await, Err(ServiceError::Validation(_))));
    assert_eq!(h.count(CardStatus::Available).await, 2);
}

#[tokio::test]
async fn payment_form_failure_keeps_the_reservation() {
    let h = Harness::new(3, "4.00").await;
    h.gateway.fail_payment_forms(true);

    let err = h.place_as(&h.buyer, 2).await.unwrap_err();
    let ServiceError::PartialSuccess { order_no, .. } = err else {
        panic!("expected partial success, got {err:?}");
    };
    assert_eq!(h.count(CardStatus::Locked).await, 2);

    assert!(h.shop.checkout().resume_payment(&h.buyer, &order_no).await.is_err());

    h.gateway.fail_payment_forms(false);
    let form = h.shop.checkout().resume_payment(&h.buyer, &order_no).await.unwrap();
    assert_eq!(form.form_fields["out_trade_no"], order_no);
    assert_eq!(form.form_fields["money"], "8.00");

    let other = Principal::Buyer { id: UserId::new() };
    assert!(matches!(
        h.shop.checkout().resume_payment(&other, &order_no).await,
        Err(ServiceError::Forbidden(_))
    ));
}

#[tokio::test]
async fn resume_is_refused_once_the_reservation_lapses() {
    let h = Harness::new(1, "1.00").await;
    let order = h.place(1).await;

    h.clock.advance(Duration::minutes(16));
    assert!(matches!(
        h.shop.checkout().resume_payment(&h.buyer, &order.order_no).await,
        Err(ServiceError::Conflict(_))
    ));
}

#[tokio::test]
async fn order_view_discloses_cards_only_after_completion() {
    let h = Harness::new(2, "1.00").await;
    let order = h.place(2).await;

    let view = h.shop.checkout().order_view(&h.buyer, &order.order_no).await.unwrap();
    assert!(view.cards.is_empty());

    h.pay(&order).await;
    let view = h.shop.checkout().order_view(&h.buyer, &order.order_no).await.unwrap();
    assert_eq!(view.cards.len(), 2);
    assert!(view.cards.iter().all(|c| c.secret.is_some()));

    let stranger = Principal::Buyer { id: UserId::new() };
    assert!(matches!(
        h.shop.checkout().order_view(&stranger, &order.order_no).await,
        Err(ServiceError::Forbidden(_))
    ));
    assert!(h.shop.checkout().order_view(&h.admin, &order.order_no).await.is_ok());
}

#[tokio::test]
async fn rejected_gateway_refund_changes_nothing() {
    let h = Harness::new(2, "10.00").await;
    let order = h.pay(&h.place(1).await).await;
    h.shop
        .refunds()
        .request(&h.buyer, order.id, "card already used")
        .await
        .unwrap();

    h.gateway.push_refund_result(Err(GatewayError::Rejected {
        code: 0,
        message: "refund failed".to_string(),
    }));
    let err = h.shop.refunds().approve(&h.admin, order.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::GatewayRejected { code: 0, .. }));

    assert_eq!(h.reload(&order).await.status, OrderStatus::RefundPending);
    assert_eq!(h.count(CardStatus::Sold).await, 1);

    let retried = h.shop.refunds().approve(&h.admin, order.id).await.unwrap();
    assert_eq!(retried.status, OrderStatus::Refunded);
    assert_eq!(h.gateway.refunds().len(), 2);
    assert_eq!(h.count(CardStatus::Available).await, 2);
}

#[tokio::test]
async fn unreachable_gateway_leaves_refund_pending() {
    let h = Harness::new(1, "1.00").await;
    let order = h.pay(&h.place(1).await).await;
    h.shop.refunds().request(&h.buyer, order.id, "wrong region").await.unwrap();

    h.gateway.push_refund_result(Err(GatewayError::unavailable("timeout")));
    assert!(matches!(
        h.shop.refunds().approve(&h.admin, order.id).await,
        Err(ServiceError::GatewayUnavailable(_))
    ));
    assert_eq!(h.reload(&order).await.status, OrderStatus::RefundPending);
}

#[tokio::test]
async fn approved_refund_returns_cards_to_the_pool() {
    let h = Harness::new(3, "2.00").await;
    let order = h.pay(&h.place(2).await).await;
    assert_eq!(h.stock().await, 1);

    h.shop.refunds().request(&h.buyer, order.id, "did not work").await.unwrap();
    let refunded = h.shop.refunds().approve(&h.admin, order.id).await.unwrap();
    assert_eq!(refunded.status, OrderStatus::Refunded);
    assert!(refunded.refunded_at.is_some());
    assert_eq!(h.stock().await, 3);
    assert_eq!(h.gateway.refunds(), vec![("T-100".to_string(), Amount::parse("4.00").unwrap())]);

    let again = h.shop.refunds().approve(&h.admin, order.id).await.unwrap();
    assert_eq!(again.status, OrderStatus::Refunded);
    assert_eq!(h.gateway.refunds().len(), 1);

    for card in h.store.cards().await {
        card.check_invariants().unwrap();
    }
}

async fn pending_refund(h: &Harness) -> Order {
    let order = h.pay(&h.place(1).await).await;
    h.shop.refunds().request(&h.buyer, order.id, "code invalid").await.unwrap();
    h.gateway.set_refund_delay(std::time::Duration::from_millis(50));
    order
}

#[tokio::test]
async fn concurrent_approvals_refund_once() {
    let h = Harness::new(1, "4.00").await;
    let order = pending_refund(&h).await;

    let (first, second) = (h.shop.refunds(), h.shop.refunds());
    let (a, b) = tokio::join!(first.approve(&h.admin, order.id), second.approve(&h.admin, order.id));

    let outcomes = [a, b];
    let refunded = outcomes
        .iter()
        .filter(|r| matches!(r, Ok(o) if o.status == OrderStatus::Refunded))
        .count();
    assert!(refunded >= 1);
    for outcome in &outcomes {
        assert!(matches!(outcome, Ok(_) | Err(ServiceError::Conflict(_))), "{outcome:?}");
    }
    assert_eq!(h.gateway.refunds().len(), 1);
    assert_eq!(h.reload(&order).await.status, OrderStatus::Refunded);
    assert_eq!(h.count(CardStatus::Available).await, 1);
}

#[tokio::test]
async fn attestation_cannot_overtake_a_gateway_refund() {
    let h = Harness::new(1, "4.00").await;
    let order = pending_refund(&h).await;
    let handoff = h.shop.refunds().issue_manual_handoff(&h.admin, order.id).await.unwrap();
    let attestation = ManualAttestation {
        expires_at: handoff.expires_at,
        token: handoff.token,
        succeeded: true,
        note: None,
    };

    let (first, second) = (h.shop.refunds(), h.shop.refunds());
    let (approved, attested) = tokio::join!(
        first.approve(&h.admin, order.id),
        second.record_manual_attestation(&h.admin, order.id, attestation)
    );

    assert_eq!(approved.unwrap().status, OrderStatus::Refunded);
    assert!(matches!(attested, Err(ServiceError::Conflict(_))), "{attested:?}");
    assert_eq!(h.gateway.refunds().len(), 1);
    assert_eq!(h.count(CardStatus::Available).await, 1);
}

#[tokio::test]
async fn rejection_waits_for_an_inflight_refund() {
    let h = Harness::new(1, "4.00").await;
    let order = pending_refund(&h).await;

    let (first, second) = (h.shop.refunds(), h.shop.refunds());
    let (approved, rejected) = tokio::join!(
        first.approve(&h.admin, order.id),
        second.reject(&h.admin, order.id, Some("too late".to_string()))
    );

    assert_eq!(approved.unwrap().status, OrderStatus::Refunded);
    assert!(matches!(rejected, Err(ServiceError::Conflict(_))), "{rejected:?}");
    let settled = h.reload(&order).await;
    assert_eq!(settled.status, OrderStatus::Refunded);
    assert_eq!(settled.refund_rejection, None);
}

#[tokio::test]
async fn abandoned_refund_claims_expire() {
    let h = Harness::new(1, "4.00").await;
    let order = pending_refund(&h).await;
    let stale_before = h.clock.now() - h.shop.context().settings.refund_claim_ttl;
    {
        let mut tx = h.store.begin().await.unwrap();
        assert!(tx.claim_refund(order.id, h.clock.now(), stale_before).await.unwrap());
        tx.commit().await.unwrap();
    }

    assert!(matches!(
        h.shop.refunds().approve(&h.admin, order.id).await,
        Err(ServiceError::Conflict(_))
    ));
    assert!(h.gateway.refunds().is_empty());

    h.clock.advance(Duration::minutes(6));
    let refunded = h.shop.refunds().approve(&h.admin, order.id).await.unwrap();
    assert_eq!(refunded.status, OrderStatus::Refunded);
    assert_eq!(h.gateway.refunds().len(), 1);
}

#[tokio::test]
async fn refund_requests_are_guarded() {
    let h = Harness::new(2, "1.00").await;
    let pending = h.place(1).await;

    assert!(matches!(
        h.shop.refunds().request(&h.buyer, pending.id, "changed my mind").await,
        Err(ServiceError::InvalidStateTransition { .. })
    ));

    let order = h.pay(&pending).await;
    assert!(matches!(
        h.shop.refunds().request(&h.buyer, order.id, "no").await,
        Err(ServiceError::Validation(_))
    ));
    let stranger = Principal::Buyer { id: UserId::new() };
    assert!(matches!(
        h.shop.refunds().request(&stranger, order.id, "not mine at all").await,
        Err(ServiceError::Forbidden(_))
    ));

    h.shop.refunds().request(&h.buyer, order.id, "code invalid").await.unwrap();
    assert!(matches!(
        h.shop.refunds().approve(&h.buyer, order.id).await,
        Err(ServiceError::Forbidden(_))
    ));
}

#[tokio::test]
async fn rejected_refunds_are_final_by_default() {
    let h = Harness::new(1, "1.00").await;
    let order = h.pay(&h.place(1).await).await;
    h.shop.refunds().request(&h.buyer, order.id, "code invalid").await.unwrap();

    let rejected = h
        .shop
        .refunds()
        .reject(&h.admin, order.id, Some("code was redeemed".to_string()))
        .await
        .unwrap();
    assert_eq!(rejected.status, OrderStatus::RefundRejected);
    assert_eq!(rejected.refund_rejection.as_deref(), Some("code was redeemed"));
    assert_eq!(h.count(CardStatus::Sold).await, 1);

    assert!(matches!(
        h.shop.refunds().request(&h.buyer, order.id, "please look again").await,
        Err(ServiceError::InvalidStateTransition { .. })
    ));
}

#[tokio::test]
async fn resubmission_can_be_enabled() {
    let settings = ShopSettings {
        policy: TransitionPolicy {
            allow_refund_resubmission: true,
            ..TransitionPolicy::default()
        },
        ..ShopSettings::default()
    };
    let h = Harness::with_settings(1, "1.00", settings).await;
    let order = h.pay(&h.place(1).await).await;
    h.shop.refunds().request(&h.buyer, order.id, "code invalid").await.unwrap();
    h.shop.refunds().reject(&h.admin, order.id, None).await.unwrap();

    let again = h
        .shop
        .refunds()
        .request(&h.buyer, order.id, "here is a screenshot")
        .await
        .unwrap();
    assert_eq!(again.status, OrderStatus::RefundPending);
    assert_eq!(again.refund_rejection, None);
}

#[tokio::test]
async fn manual_handoff_attestation_applies_the_refund() {
    let h = Harness::new(2, "3.00").await;
    let order = h.pay(&h.place(1).await).await;
    h.shop.refunds().request(&h.buyer, order.id, "code invalid").await.unwrap();

    let handoff = h.shop.refunds().issue_manual_handoff(&h.admin, order.id).await.unwrap();
    assert_eq!(handoff.params["act"], "refund");
    assert_eq!(handoff.params["trade_no"], "T-100");
    assert_eq!(handoff.params["money"], "3.00");

    let forged = ManualAttestation {
        expires_at: handoff.expires_at,
        token: "0".repeat(32),
        succeeded: true,
        note: None,
    };
    assert!(matches!(
        h.shop.refunds().record_manual_attestation(&h.admin, order.id, forged).await,
        Err(ServiceError::Validation(_))
    ));

    let failed = ManualAttestation {
        expires_at: handoff.expires_at,
        token: handoff.token.clone(),
        succeeded: false,
        note: Some("gateway said no".to_string()),
    };
    let unchanged = h
        .shop
        .refunds()
        .record_manual_attestation(&h.admin, order.id, failed)
        .await
        .unwrap();
    assert_eq!(unchanged.status, OrderStatus::RefundPending);

    let ok = ManualAttestation {
        expires_at: handoff.expires_at,
        token: handoff.token,
        succeeded: true,
        note: None,
    };
    let refunded = h
        .shop
        .refunds()
        .record_manual_attestation(&h.admin, order.id, ok)
        .await
        .unwrap();
    assert_eq!(refunded.status, OrderStatus::Refunded);
    assert_eq!(h.count(CardStatus::Available).await, 2);
    assert!(h.gateway.refunds().is_empty());
}

#[tokio::test]
async fn expired_handoffs_cannot_be_attested() {
    let h = Harness::new(1, "1.00").await;
    let order = h.pay(&h.place(1).await).await;
    h.shop.refunds().request(&h.buyer, order.id, "code invalid").await.unwrap();
    let handoff = h.shop.refunds().issue_manual_handoff(&h.admin, order.id).await.unwrap();

    h.clock.advance(Duration::minutes(6));
    let late = ManualAttestation {
        expires_at: handoff.expires_at,
        token: handoff.token,
        succeeded: true,
        note: None,
    };
    assert!(matches!(
        h.shop.refunds().record_manual_attestation(&h.admin, order.id, late).await,
        Err(ServiceError::Validation(_))
    ));
    assert_eq!(h.reload(&order).await.status, OrderStatus::RefundPending);
}

#[tokio::test]
async fn manual_completion_races_cleanly_with_the_webhook() {
    let h = Harness::new(2, "1.00").await;
    let order = h.place(2).await;

    let done = h
        .shop
        .admin()
        .complete_manually(&h.admin, order.id, Some("T-ADMIN".to_string()))
        .await
        .unwrap();
    assert_eq!(done.status, OrderStatus::Completed);
    assert_eq!(done.trade_no.as_deref(), Some("T-ADMIN"));

    let repeat = h.shop.admin().complete_manually(&h.admin, order.id, None).await.unwrap();
    assert_eq!(repeat.status, OrderStatus::Completed);

    let after = h.pay(&order).await;
    assert_eq!(after.trade_no.as_deref(), Some("T-ADMIN"));
    assert_eq!(h.count(CardStatus::Sold).await, 2);
    assert_eq!(h.store.sales_count(h.product.id).await, 2);

    assert!(matches!(
        h.shop.admin().complete_manually(&h.buyer, order.id, None).await,
        Err(ServiceError::Forbidden(_))
    ));
}

#[tokio::test]
async fn gateway_sync_completes_paid_orders() {
    let h = Harness::new(3, "1.50").await;
    let order = h.place(2).await;

    h.gateway.push_query_result(Err(GatewayError::unavailable("challenge page")));
    assert!(matches!(
        h.shop.admin().sync_with_gateway(&h.admin, order.id).await,
        Err(ServiceError::GatewayUnavailable(_))
    ));

    let remote = GatewayOrder {
        trade_no: "T-9".to_string(),
        out_trade_no: order.order_no.clone(),
        channel: "alipay".to_string(),
        money: "3.00".to_string(),
        paid: false,
    };
    h.gateway.push_query_result(Ok(remote.clone()));
    let outcome = h.shop.admin().sync_with_gateway(&h.admin, order.id).await.unwrap();
    assert!(!outcome.completed);
    assert_eq!(outcome.order.status, OrderStatus::Pending);

    h.gateway.push_query_result(Ok(GatewayOrder {
        money: "2.99".to_string(),
        paid: true,
        ..remote.clone()
    }));
    assert!(matches!(
        h.shop.admin().sync_with_gateway(&h.admin, order.id).await,
        Err(ServiceError::Validation(_))
    ));

    h.gateway.push_query_result(Ok(GatewayOrder {
        channel: "wxpay".to_string(),
        paid: true,
        ..remote.clone()
    }));
    assert!(matches!(
        h.shop.admin().sync_with_gateway(&h.admin, order.id).await,
        Err(ServiceError::Validation(_))
    ));
    assert_eq!(h.reload(&order).await.status, OrderStatus::Pending);

    h.gateway.push_query_result(Ok(GatewayOrder { paid: true, ..remote }));
    let outcome = h.shop.admin().sync_with_gateway(&h.admin, order.id).await.unwrap();
    assert!(outcome.completed);
    assert_eq!(outcome.order.status, OrderStatus::Completed);
    assert_eq!(outcome.order.trade_no.as_deref(), Some("T-9"));
    assert_eq!(h.count(CardStatus::Sold).await, 2);
}

#[tokio::test]
async fn sweeping_twice_is_a_no_op() {
    let h = Harness::new(4, "1.00").await;
    let a = h.place(1).await;
    let b = h.place(2).await;

    h.clock.advance(Duration::minutes(16));
    let first = h.shop.sweeper().sweep_as(&h.admin).await.unwrap();
    assert_eq!(
        first,
        SweepReport {
            expired_orders: 2,
            released_cards: 3
        }
    );
    let second = h.shop.sweeper().sweep_as(&h.admin).await.unwrap();
    assert_eq!(second, SweepReport::default());

    assert_eq!(h.reload(&a).await.status, OrderStatus::Expired);
    assert_eq!(h.reload(&b).await.status, OrderStatus::Expired);
    assert_eq!(h.count(CardStatus::Available).await, 4);

    assert!(matches!(
        h.shop.sweeper().sweep_as(&h.buyer).await,
        Err(ServiceError::Forbidden(_))
    ));
}

#[tokio::test]
async fn lazy_sweeps_are_throttled() {
    let h = Harness::new(2, "1.00").await;
    let sweeper = h.shop.sweeper();

    assert!(sweeper.maybe_sweep().await.unwrap().is_some());
    assert!(sweeper.maybe_sweep().await.unwrap().is_none());
    h.clock.advance(Duration::seconds(61));
    assert!(sweeper.maybe_sweep().await.unwrap().is_some());
}

#[tokio::test]
async fn state_changes_publish_invalidations() {
    let h = Harness::new(2, "1.00").await;
    let order = h.place(1).await;
    h.pay(&order).await;

    let keys: Vec<String> = h.invalidations.drain().iter().map(|m| m.cache_key()).collect();
    assert!(keys.contains(&format!("stock:{}", h.product.id)));
    assert!(keys.contains(&format!("order:{}", order.order_no)));
    assert!(keys.len() >= 4);
}
