use super::*;
use shared::util::now_millis;

fn zero_ttl() -> ManagerSettings {
    ManagerSettings {
        reservation_ttl: Duration::ZERO,
        ..Default::default()
    }
}

#[test]
fn test_confirm_after_hold_lapsed_is_refused() {
    let (manager, mut rx) = create_synced_manager(zero_ttl(), 16);
    let order = manager.create(100, vec![item(1, 2)], None).unwrap();

    let err = manager.confirm(order.id).unwrap_err();

    assert!(matches!(err, ManagerError::OrderExpired(id) if id == order.id));
    assert_eq!(manager.get_order(order.id).unwrap().status, OrderStatus::Buffer);
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn test_expiry_sweep_releases_lapsed_holds() {
    let (manager, _rx) = create_synced_manager(zero_ttl(), 16);
    let order = manager.create(100, vec![item(1, 2)], None).unwrap();
    assert_eq!(manager.ledger().reserved(1), 2);

    assert_eq!(manager.expire_due_orders().unwrap(), 1);

    let expired = manager.get_order(order.id).unwrap();
    assert_eq!(expired.status, OrderStatus::Expired);
    assert_eq!(manager.ledger().reserved(1), 0);
    assert_eq!(stock(&manager, 1), 10);
    // Nothing left to expire
    assert_eq!(manager.expire_due_orders().unwrap(), 0);
}

#[test]
fn test_expire_loses_race_to_confirm() {
    let manager = create_test_manager();
    let order = manager.create(100, vec![item(1, 1)], None).unwrap();
    manager.confirm(order.id).unwrap();

    assert!(!manager.expire(order.id).unwrap());
    assert_eq!(manager.get_order(order.id).unwrap().status, OrderStatus::Pending);
    assert_eq!(manager.ledger().reserved(1), 1);
}

#[test]
fn test_sweep_at_future_instant_only_touches_buffer() {
    let manager = create_test_manager();
    let buffered = manager.create(100, vec![item(1, 1)], None).unwrap();
    let confirmed = manager.create(100, vec![item(1, 1)], None).unwrap();
    manager.confirm(confirmed.id).unwrap();

    let in_a_day = now_millis() + 24 * 60 * 60 * 1000;
    assert_eq!(manager.expire_due_orders_at(in_a_day).unwrap(), 1);

    assert_eq!(
        manager.get_order(buffered.id).unwrap().status,
        OrderStatus::Expired
    );
    assert_eq!(
        manager.get_order(confirmed.id).unwrap().status,
        OrderStatus::Pending
    );
    assert_eq!(manager.ledger().reserved(1), 1);
}

#[test]
fn test_terminal_orders_refuse_everything() {
    let manager = create_test_manager();
    let delivered = assigned_order(&manager, vec![item(1, 1)]);
    manager.mark_delivered(delivered, ACTIVE_COURIER).unwrap();
    let cancelled = manager.create(100, vec![item(1, 1)], None).unwrap().id;
    manager.cancel(cancelled).unwrap();

    for id in [delivered, cancelled] {
        assert!(matches!(
            manager.cancel(id),
            Err(ManagerError::OrderClosed { .. })
        ));
        assert!(matches!(
            manager.confirm(id),
            Err(ManagerError::OrderClosed { .. })
        ));
        assert!(matches!(
            manager.set_payment_method(id, PaymentMethod::Card),
            Err(ManagerError::OrderClosed { .. })
        ));
        assert!(!manager.expire(id).unwrap());
    }
    assert!(matches!(
        manager.mark_delivered(delivered, ACTIVE_COURIER),
        Err(ManagerError::OrderClosed { .. })
    ));
    // Delivered stock was deducted exactly once
    assert_eq!(stock(&manager, 1), 9);
}

#[test]
fn test_negative_stock_aborts_delivery() {
    let manager = create_test_manager();
    let id = assigned_order(&manager, vec![item(1, 3)]);

    // On-hand stock corrected below the held quantity
    let mut corrected = manager.catalog().get_product(1).unwrap().unwrap();
    corrected.available = 1;
    manager.catalog().upsert_product(&corrected).unwrap();

    let err = manager.mark_delivered(id, ACTIVE_COURIER).unwrap_err();

    assert!(matches!(err, ManagerError::NegativeStock { product_id: 1 }));
    assert_eq!(
        manager.get_order(id).unwrap().status,
        OrderStatus::CourierAssigned
    );
    assert_eq!(stock(&manager, 1), 1);
    assert_eq!(manager.ledger().reserved(1), 3);
}

#[test]
fn test_refused_transition_keeps_counters() {
    let manager = create_test_manager();
    let id = assigned_order(&manager, vec![item(1, 2), item(3, 1)]);
    let before = manager.ledger().snapshot();

    assert!(manager.mark_delivered(id, OTHER_COURIER).is_err());
    assert!(manager.confirm(id).is_err());

    assert_eq!(manager.ledger().snapshot(), before);
}

#[test]
fn test_purge_not_issued() {
    let manager = create_test_manager();
    let id = assigned_order(&manager, vec![item(1, 1)]);
    manager.set_not_issued(id).unwrap();

    assert_eq!(manager.purge_stale_not_issued(60).unwrap(), 0);
    assert_eq!(manager.purge_stale_not_issued(0).unwrap(), 1);

    assert!(matches!(
        manager.get_order(id),
        Err(ManagerError::OrderNotFound(_))
    ));
    assert!(manager.storage().reservations_for_order(id).unwrap().is_empty());
}

#[test]
fn test_cancel_stale_orders() {
    let (manager, mut rx) = create_synced_manager(ManagerSettings::default(), 16);
    let buffered = manager.create(100, vec![item(1, 1)], None).unwrap();
    let pending = manager.create(100, vec![item(1, 1)], None).unwrap();
    manager.confirm(pending.id).unwrap();
    let assigned = assigned_order(&manager, vec![item(1, 1)]);
    drain(&mut rx);

    assert_eq!(manager.cancel_stale_orders(Duration::from_secs(3600)).unwrap(), 0);
    assert_eq!(manager.cancel_stale_orders(Duration::ZERO).unwrap(), 2);

    assert_eq!(
        manager.get_order(buffered.id).unwrap().status,
        OrderStatus::Buffer
    );
    assert_eq!(
        manager.get_order(assigned).unwrap().status,
        OrderStatus::Cancelled
    );
    assert_eq!(manager.ledger().reserved(1), 1);
    assert_eq!(drain(&mut rx).len(), 2);
}

#[test]
fn test_clear_stale_delivery_slots() {
    let manager = create_test_manager();
    let open = manager.create(100, vec![item(1, 1)], None).unwrap();
    manager
        .set_delivery_slot(
            open.id,
            DeliverySlot {
                interval: "14-16".into(),
                exact_time: Some("15:10".into()),
            },
        )
        .unwrap();
    let delivered = assigned_order(&manager, vec![item(1, 1)]);
    manager
        .set_delivery_slot(
            delivered,
            DeliverySlot {
                interval: "10-12".into(),
                exact_time: Some("11:00".into()),
            },
        )
        .unwrap();
    manager.mark_delivered(delivered, ACTIVE_COURIER).unwrap();

    assert_eq!(manager.clear_stale_delivery_slots().unwrap(), 1);

    let slot = manager.get_order(open.id).unwrap().delivery_slot.unwrap();
    assert_eq!(slot.interval, "14-16");
    assert!(slot.exact_time.is_none());
    // Closed orders keep their history
    let kept = manager.get_order(delivered).unwrap().delivery_slot.unwrap();
    assert_eq!(kept.exact_time.as_deref(), Some("11:00"));
}

#[test]
fn test_full_sync_queue_never_fails_transition() {
    let (manager, mut rx) = create_synced_manager(ManagerSettings::default(), 1);
    let a = manager.create(100, vec![item(1, 1)], None).unwrap();
    let b = manager.create(100, vec![item(1, 1)], None).unwrap();

    manager.confirm(a.id).unwrap();
    manager.confirm(b.id).unwrap();

    assert_eq!(drain(&mut rx), vec![("append_record", a.id)]);
    assert_eq!(manager.get_order(b.id).unwrap().status, OrderStatus::Pending);
}

#[test]
fn test_holds_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("depot.redb");

    let (pending_id, buffer_id) = {
        let manager = OrdersManager::with_storage(DepotStorage::open(&path).unwrap());
        seed(&manager);
        let pending = manager.create(100, vec![item(1, 2)], None).unwrap();
        manager.confirm(pending.id).unwrap();
        let buffer = manager.create(100, vec![item(1, 3)], None).unwrap();
        (pending.id, buffer.id)
    };

    let manager = OrdersManager::with_storage(DepotStorage::open(&path).unwrap());
    manager.ledger().restore_reservations().unwrap();

    assert_eq!(manager.ledger().reserved(1), 5);
    manager.cancel(buffer_id).unwrap();
    assert_eq!(manager.ledger().reserved(1), 2);
    assert_eq!(manager.get_order(pending_id).unwrap().status, OrderStatus::Pending);
}

#[test]
fn test_confirm_and_expiry_sweep_race_has_one_winner() {
    let manager = create_test_manager();
    let in_a_day = now_millis() + 24 * 60 * 60 * 1000;

    for _ in 0..50 {
        let order = manager.create(100, vec![item(1, 1)], None).unwrap();
        let barrier = std::sync::Barrier::new(2);

        let (confirmed, expired) = std::thread::scope(|s| {
            let confirm = s.spawn(|| {
                barrier.wait();
                manager.confirm(order.id)
            });
            let sweep = s.spawn(|| {
                barrier.wait();
                manager.expire_due_orders_at(in_a_day)
            });
            (confirm.join().unwrap(), sweep.join().unwrap().unwrap())
        });

        let status = manager.get_order(order.id).unwrap().status;
        match confirmed {
            Ok(_) => {
                assert_eq!(expired, 0);
                assert_eq!(status, OrderStatus::Pending);
                assert_eq!(manager.ledger().reserved(1), 1);
                manager.cancel(order.id).unwrap();
            }
            Err(_) => {
                assert_eq!(expired, 1);
                assert_eq!(status, OrderStatus::Expired);
            }
        }
        assert_eq!(manager.ledger().reserved(1), 0);
    }
    assert_eq!(stock(&manager, 1), 10);
}

#[test]
fn test_confirm_and_expire_race_on_lapsed_hold() {
    let (manager, _rx) = create_synced_manager(zero_ttl(), 256);

    for _ in 0..50 {
        let order = manager.create(100, vec![item(1, 1)], None).unwrap();
        let barrier = std::sync::Barrier::new(2);

        let (confirmed, expired) = std::thread::scope(|s| {
            let confirm = s.spawn(|| {
                barrier.wait();
                manager.confirm(order.id)
            });
            let expire = s.spawn(|| {
                barrier.wait();
                manager.expire(order.id)
            });
            (confirm.join().unwrap(), expire.join().unwrap().unwrap())
        });

        // A lapsed hold can never be confirmed, so expire always wins
        assert!(confirmed.is_err());
        assert!(expired);
        assert_eq!(
            manager.get_order(order.id).unwrap().status,
            OrderStatus::Expired
        );
        assert_eq!(manager.ledger().reserved(1), 0);
    }
}
