use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use uuid::Uuid;

use crate::calendar::WorkingCalendar;
use crate::model::*;
use crate::notify::NotifyHub;

use super::{Engine, EngineError};

// ── Test infrastructure ──────────────────────────────────────

fn wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("forecourt_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn engine_at(path: PathBuf) -> Engine {
    Engine::new(path, WorkingCalendar::standard(), Arc::new(NotifyHub::new())).unwrap()
}

fn engine(name: &str) -> Engine {
    engine_at(wal_path(name))
}

fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 12, 8).unwrap()
}

fn saturday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 12, 13).unwrap()
}

fn sunday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 12, 14).unwrap()
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn wash_service(id: Uuid) -> Service {
    Service {
        id,
        name: "Exterior Wash".into(),
        category: "wash".into(),
        base_price_cents: 4000,
        duration_min: 60,
        active: true,
    }
}

struct Marketplace {
    vendor_id: Uuid,
    service_id: Uuid,
    customer_id: Uuid,
}

/// One active vendor offering one active 60-minute service, plus a
/// customer with a filled-in profile.
async fn seed_marketplace(engine: &Engine) -> Marketplace {
    let vendor_id = Uuid::new_v4();
    let service_id = Uuid::new_v4();
    let customer_id = Uuid::new_v4();

    engine.seed_service(wash_service(service_id)).await.unwrap();
    engine
        .upsert_vendor(
            vendor_id,
            Profile {
                fullname: "Kerb & Shine".into(),
                contact_info: "shine@example.com".into(),
                address: "1 Forecourt Way".into(),
            },
        )
        .await
        .unwrap();
    engine
        .upsert_customer(
            customer_id,
            Profile {
                fullname: "Robin Walker".into(),
                contact_info: "robin@example.com".into(),
                address: "22 Acacia Ave".into(),
            },
        )
        .await
        .unwrap();
    engine
        .upsert_offering(
            vendor_id,
            Offering {
                service_id,
                price_cents: 4000,
                duration_min: 60,
                active: true,
            },
        )
        .await
        .unwrap();

    Marketplace {
        vendor_id,
        service_id,
        customer_id,
    }
}

/// Cart one item and immediately check it out. Returns the booking item id
/// (which is the cart item id, carried across the conversion).
async fn book(
    engine: &Engine,
    m: &Marketplace,
    date: NaiveDate,
    time: NaiveTime,
) -> Uuid {
    let item_id = Uuid::new_v4();
    engine
        .add_cart_item(CartItem {
            id: item_id,
            customer_id: m.customer_id,
            vendor_id: m.vendor_id,
            service_id: m.service_id,
            preferred_date: date,
            preferred_time: time,
        })
        .await
        .unwrap();
    engine
        .checkout(Uuid::new_v4(), m.customer_id, PaymentMethod::Card)
        .await
        .unwrap();
    item_id
}

fn availability(day: &SlotDay) -> Vec<(String, bool)> {
    day.slots
        .iter()
        .map(|s| (s.time.format("%H:%M").to_string(), s.is_available))
        .collect()
}

// ── Slot computation ─────────────────────────────────────────

#[tokio::test]
async fn weekend_yields_empty_slots_not_errors() {
    let engine = engine("weekend_empty.wal");
    let m = seed_marketplace(&engine).await;

    for date in [saturday(), sunday()] {
        let day = engine
            .compute_slots(m.vendor_id, m.service_id, date)
            .await
            .unwrap();
        assert!(day.slots.is_empty(), "{date} should have no slots");
        assert_eq!(day.date, date);
    }
}

#[tokio::test]
async fn weekend_is_empty_even_when_fully_booked() {
    let engine = engine("weekend_booked.wal");
    let m = seed_marketplace(&engine).await;
    book(&engine, &m, monday(), hm(10, 0)).await;

    let day = engine
        .compute_slots(m.vendor_id, m.service_id, saturday())
        .await
        .unwrap();
    assert!(day.slots.is_empty());
}

#[tokio::test]
async fn weekend_precedes_offering_lookup() {
    // Even an unknown vendor gets the empty-slot success on a weekend.
    let engine = engine("weekend_precedence.wal");
    let day = engine
        .compute_slots(Uuid::new_v4(), Uuid::new_v4(), saturday())
        .await
        .unwrap();
    assert!(day.slots.is_empty());
}

#[tokio::test]
async fn open_working_day_has_eight_free_slots() {
    let engine = engine("open_day.wal");
    let m = seed_marketplace(&engine).await;

    let day = engine
        .compute_slots(m.vendor_id, m.service_id, monday())
        .await
        .unwrap();
    let expected: Vec<(String, bool)> = (9..17).map(|h| (format!("{h:02}:00"), true)).collect();
    assert_eq!(availability(&day), expected);
}

#[tokio::test]
async fn unknown_vendor_or_service_is_not_found() {
    let engine = engine("unknown_pair.wal");
    let m = seed_marketplace(&engine).await;

    let err = engine
        .compute_slots(Uuid::new_v4(), m.service_id, monday())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { what: "vendor", .. }));

    let err = engine
        .compute_slots(m.vendor_id, Uuid::new_v4(), monday())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { what: "offering", .. }));
}

#[tokio::test]
async fn inactive_offering_is_not_found() {
    let engine = engine("inactive_offering.wal");
    let m = seed_marketplace(&engine).await;
    engine
        .update_offering(m.vendor_id, m.service_id, None, None, Some(false))
        .await
        .unwrap();

    let err = engine
        .compute_slots(m.vendor_id, m.service_id, monday())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { what: "offering", .. }));
}

#[tokio::test]
async fn retired_service_is_not_found() {
    let engine = engine("retired_service.wal");
    let m = seed_marketplace(&engine).await;
    engine.retire_service(m.service_id).await.unwrap();

    let err = engine
        .compute_slots(m.vendor_id, m.service_id, monday())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { what: "offering", .. }));
}

#[tokio::test]
async fn ninety_minute_service_cannot_start_at_four() {
    let engine = engine("ninety_tail.wal");
    let m = seed_marketplace(&engine).await;
    engine
        .update_offering(m.vendor_id, m.service_id, None, Some(90), None)
        .await
        .unwrap();

    let day = engine
        .compute_slots(m.vendor_id, m.service_id, monday())
        .await
        .unwrap();
    let slots = availability(&day);
    assert_eq!(slots.len(), 8);
    // 16:00 + 90min = 17:30 overruns the window.
    assert_eq!(slots[7], ("16:00".into(), false));
    // 15:00 + 90min = 16:30 fits.
    assert_eq!(slots[6], ("15:00".into(), true));
}

#[tokio::test]
async fn booking_blocks_exactly_the_overlapped_slots() {
    let engine = engine("booking_blocks.wal");
    let m = seed_marketplace(&engine).await;
    book(&engine, &m, monday(), hm(10, 0)).await;

    let day = engine
        .compute_slots(m.vendor_id, m.service_id, monday())
        .await
        .unwrap();
    assert_eq!(
        availability(&day),
        vec![
            ("09:00".into(), true), // ends exactly at 10:00 — touching is legal
            ("10:00".into(), false),
            ("11:00".into(), true), // back-to-back after the booking
            ("12:00".into(), true),
            ("13:00".into(), true),
            ("14:00".into(), true),
            ("15:00".into(), true),
            ("16:00".into(), true),
        ]
    );
}

#[tokio::test]
async fn ninety_minute_query_spans_into_booked_hour() {
    let engine = engine("ninety_span.wal");
    let m = seed_marketplace(&engine).await;
    book(&engine, &m, monday(), hm(10, 0)).await;

    engine
        .update_offering(m.vendor_id, m.service_id, None, Some(90), None)
        .await
        .unwrap();
    let day = engine
        .compute_slots(m.vendor_id, m.service_id, monday())
        .await
        .unwrap();
    let slots = availability(&day);
    // 09:00–10:30 now reaches the 10:00–11:00 booking.
    assert_eq!(slots[0], ("09:00".into(), false));
    assert_eq!(slots[2], ("11:00".into(), true));
}

#[tokio::test]
async fn zero_duration_offering_falls_back_to_grid_width() {
    let engine = engine("zero_duration.wal");
    let m = seed_marketplace(&engine).await;
    engine
        .update_offering(m.vendor_id, m.service_id, None, Some(0), None)
        .await
        .unwrap();

    let day = engine
        .compute_slots(m.vendor_id, m.service_id, monday())
        .await
        .unwrap();
    // Falls back to the 60-minute granularity: a full normal grid.
    assert_eq!(day.slots.len(), 8);
    assert!(day.slots.iter().all(|s| s.is_available));
}

#[tokio::test]
async fn cancelled_booking_frees_its_slot() {
    let engine = engine("cancelled_frees.wal");
    let m = seed_marketplace(&engine).await;
    let item_id = book(&engine, &m, monday(), hm(10, 0)).await;

    engine
        .transition_item(
            Principal {
                role: Role::Customer,
                id: m.customer_id,
            },
            item_id,
            ItemStatus::Cancelled,
        )
        .await
        .unwrap();

    let day = engine
        .compute_slots(m.vendor_id, m.service_id, monday())
        .await
        .unwrap();
    assert!(day.slots.iter().all(|s| s.is_available));
}

#[tokio::test]
async fn other_vendors_bookings_do_not_interfere() {
    let engine = engine("vendor_isolation.wal");
    let m = seed_marketplace(&engine).await;
    let other = seed_marketplace(&engine).await;
    book(&engine, &other, monday(), hm(10, 0)).await;

    let day = engine
        .compute_slots(m.vendor_id, m.service_id, monday())
        .await
        .unwrap();
    assert!(day.slots.iter().all(|s| s.is_available));
}

// ── Cart ─────────────────────────────────────────────────────

#[tokio::test]
async fn cart_requires_active_offering_and_service() {
    let engine = engine("cart_validation.wal");
    let m = seed_marketplace(&engine).await;

    // Unknown service.
    let err = engine
        .add_cart_item(CartItem {
            id: Uuid::new_v4(),
            customer_id: m.customer_id,
            vendor_id: m.vendor_id,
            service_id: Uuid::new_v4(),
            preferred_date: monday(),
            preferred_time: hm(10, 0),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { what: "service", .. }));

    // Offering switched off.
    engine
        .update_offering(m.vendor_id, m.service_id, None, None, Some(false))
        .await
        .unwrap();
    let err = engine
        .add_cart_item(CartItem {
            id: Uuid::new_v4(),
            customer_id: m.customer_id,
            vendor_id: m.vendor_id,
            service_id: m.service_id,
            preferred_date: monday(),
            preferred_time: hm(10, 0),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { what: "offering", .. }));
}

#[tokio::test]
async fn cart_round_trip() {
    let engine = engine("cart_round_trip.wal");
    let m = seed_marketplace(&engine).await;
    let item_id = Uuid::new_v4();

    engine
        .add_cart_item(CartItem {
            id: item_id,
            customer_id: m.customer_id,
            vendor_id: m.vendor_id,
            service_id: m.service_id,
            preferred_date: monday(),
            preferred_time: hm(10, 0),
        })
        .await
        .unwrap();
    assert_eq!(engine.cart(m.customer_id).len(), 1);

    engine
        .reschedule_cart_item(item_id, m.customer_id, monday(), hm(14, 0))
        .await
        .unwrap();
    assert_eq!(engine.cart(m.customer_id)[0].preferred_time, hm(14, 0));

    engine.remove_cart_item(item_id, m.customer_id).await.unwrap();
    assert!(engine.cart(m.customer_id).is_empty());

    let err = engine
        .remove_cart_item(item_id, m.customer_id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { what: "cart item", .. }));
}

#[tokio::test]
async fn rescheduling_anothers_cart_item_is_not_found() {
    let engine = engine("cart_ownership.wal");
    let m = seed_marketplace(&engine).await;
    let stranger = Uuid::new_v4();
    let item_id = Uuid::new_v4();

    engine
        .add_cart_item(CartItem {
            id: item_id,
            customer_id: m.customer_id,
            vendor_id: m.vendor_id,
            service_id: m.service_id,
            preferred_date: monday(),
            preferred_time: hm(10, 0),
        })
        .await
        .unwrap();

    let err = engine
        .reschedule_cart_item(item_id, stranger, monday(), hm(11, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { what: "cart item", .. }));
}

// ── Checkout ─────────────────────────────────────────────────

#[tokio::test]
async fn checkout_converts_cart_into_group() {
    let engine = engine("checkout_basic.wal");
    let m = seed_marketplace(&engine).await;
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();

    for (id, time) in [(first, hm(9, 0)), (second, hm(13, 0))] {
        engine
            .add_cart_item(CartItem {
                id,
                customer_id: m.customer_id,
                vendor_id: m.vendor_id,
                service_id: m.service_id,
                preferred_date: monday(),
                preferred_time: time,
            })
            .await
            .unwrap();
    }

    let group_id = Uuid::new_v4();
    let group = engine
        .checkout(group_id, m.customer_id, PaymentMethod::Card)
        .await
        .unwrap();

    assert_eq!(group.item_ids.len(), 2);
    assert!(group.item_ids.contains(&first));
    assert!(group.item_ids.contains(&second));
    assert_eq!(group.payment.total_cents, 8000);
    assert_eq!(group.payment.method, PaymentMethod::Card);
    assert_eq!(group.contact_snapshot.fullname, "Robin Walker");
    assert!(engine.cart(m.customer_id).is_empty());
    assert_eq!(engine.group(group_id).unwrap(), group);
    assert_eq!(engine.customer_groups(m.customer_id), vec![group.clone()]);

    let items = engine.vendor_bookings(m.vendor_id, None, None).await;
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|i| i.status == ItemStatus::Processing));
    assert!(items.iter().all(|i| i.group_id == group_id));
    // start/end derived from preferred date+time and snapshot duration
    assert_eq!(items[0].start_time, monday().and_time(hm(9, 0)));
    assert_eq!(items[0].end_time, monday().and_time(hm(10, 0)));
}

#[tokio::test]
async fn checkout_with_one_bad_item_persists_nothing() {
    let engine = engine("checkout_rollback.wal");
    let m = seed_marketplace(&engine).await;

    // Second service through the same vendor.
    let detail_id = Uuid::new_v4();
    engine
        .seed_service(Service {
            id: detail_id,
            name: "Full Detail".into(),
            category: "detail".into(),
            base_price_cents: 15000,
            duration_min: 120,
            active: true,
        })
        .await
        .unwrap();
    engine
        .upsert_offering(
            m.vendor_id,
            Offering {
                service_id: detail_id,
                price_cents: 15000,
                duration_min: 120,
                active: true,
            },
        )
        .await
        .unwrap();

    for (service_id, time) in [(m.service_id, hm(9, 0)), (detail_id, hm(13, 0))] {
        engine
            .add_cart_item(CartItem {
                id: Uuid::new_v4(),
                customer_id: m.customer_id,
                vendor_id: m.vendor_id,
                service_id,
                preferred_date: monday(),
                preferred_time: time,
            })
            .await
            .unwrap();
    }

    // Deactivate one offering between cart-add and checkout.
    engine
        .update_offering(m.vendor_id, detail_id, None, None, Some(false))
        .await
        .unwrap();

    let group_id = Uuid::new_v4();
    let err = engine
        .checkout(group_id, m.customer_id, PaymentMethod::Cash)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { what: "offering", .. }));

    // All-or-nothing: no group, no items, cart untouched.
    assert!(engine.group(group_id).is_none());
    assert!(engine.vendor_bookings(m.vendor_id, None, None).await.is_empty());
    assert_eq!(engine.cart(m.customer_id).len(), 2);
}

#[tokio::test]
async fn checkout_of_empty_cart_errors() {
    let engine = engine("checkout_empty.wal");
    let m = seed_marketplace(&engine).await;
    let err = engine
        .checkout(Uuid::new_v4(), m.customer_id, PaymentMethod::Cash)
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::EmptyCart(m.customer_id));
}

#[tokio::test]
async fn checkout_group_id_must_be_fresh() {
    let engine = engine("checkout_dup_group.wal");
    let m = seed_marketplace(&engine).await;
    let group_id = Uuid::new_v4();

    engine
        .add_cart_item(CartItem {
            id: Uuid::new_v4(),
            customer_id: m.customer_id,
            vendor_id: m.vendor_id,
            service_id: m.service_id,
            preferred_date: monday(),
            preferred_time: hm(9, 0),
        })
        .await
        .unwrap();
    engine
        .checkout(group_id, m.customer_id, PaymentMethod::Cash)
        .await
        .unwrap();

    engine
        .add_cart_item(CartItem {
            id: Uuid::new_v4(),
            customer_id: m.customer_id,
            vendor_id: m.vendor_id,
            service_id: m.service_id,
            preferred_date: monday(),
            preferred_time: hm(11, 0),
        })
        .await
        .unwrap();
    let err = engine
        .checkout(group_id, m.customer_id, PaymentMethod::Cash)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::AlreadyExists {
            what: "booking group",
            ..
        }
    ));
}

#[tokio::test]
async fn snapshot_shields_history_from_catalog_changes() {
    let engine = engine("snapshot.wal");
    let m = seed_marketplace(&engine).await;
    let item_id = book(&engine, &m, monday(), hm(10, 0)).await;

    // Reprice and re-time the offering after the booking exists.
    engine
        .update_offering(m.vendor_id, m.service_id, Some(9900), Some(30), None)
        .await
        .unwrap();

    let items = engine.vendor_bookings(m.vendor_id, None, None).await;
    let item = items.iter().find(|i| i.id == item_id).unwrap();
    assert_eq!(item.snapshot.price_cents, 4000);
    assert_eq!(item.snapshot.duration_min, 60);
    assert_eq!(item.end_time, monday().and_time(hm(11, 0)));

    // Occupancy keeps the snapshotted hour: a fresh 30-minute query still
    // sees 10:00 blocked for the full hour.
    let day = engine
        .compute_slots(m.vendor_id, m.service_id, monday())
        .await
        .unwrap();
    let ten = day
        .slots
        .iter()
        .find(|s| s.time == hm(10, 0))
        .unwrap();
    assert!(!ten.is_available);
}

#[tokio::test]
async fn checkout_spans_multiple_vendors() {
    let engine = engine("checkout_multi_vendor.wal");
    let m = seed_marketplace(&engine).await;
    let other = seed_marketplace(&engine).await;

    for (vendor_id, service_id) in [
        (m.vendor_id, m.service_id),
        (other.vendor_id, other.service_id),
    ] {
        engine
            .add_cart_item(CartItem {
                id: Uuid::new_v4(),
                customer_id: m.customer_id,
                vendor_id,
                service_id,
                preferred_date: monday(),
                preferred_time: hm(10, 0),
            })
            .await
            .unwrap();
    }

    let group = engine
        .checkout(Uuid::new_v4(), m.customer_id, PaymentMethod::Wallet)
        .await
        .unwrap();
    assert_eq!(group.item_ids.len(), 2);
    assert_eq!(engine.vendor_bookings(m.vendor_id, None, None).await.len(), 1);
    assert_eq!(
        engine.vendor_bookings(other.vendor_id, None, None).await.len(),
        1
    );
    assert_eq!(
        engine.customer_bookings(m.customer_id, None, None).await.len(),
        2
    );
}

// ── Lifecycle ────────────────────────────────────────────────

#[tokio::test]
async fn vendor_completes_then_customer_confirms() {
    let engine = engine("lifecycle_happy.wal");
    let m = seed_marketplace(&engine).await;
    let item_id = book(&engine, &m, monday(), hm(10, 0)).await;

    let vendor = Principal {
        role: Role::Vendor,
        id: m.vendor_id,
    };
    let customer = Principal {
        role: Role::Customer,
        id: m.customer_id,
    };

    let item = engine
        .transition_item(vendor, item_id, ItemStatus::VendorDone)
        .await
        .unwrap();
    assert_eq!(item.status, ItemStatus::VendorDone);
    assert!(item.vendor_done_at.is_some());
    assert!(item.confirmed_at.is_none());

    let item = engine
        .transition_item(customer, item_id, ItemStatus::CustomerConfirmed)
        .await
        .unwrap();
    assert_eq!(item.status, ItemStatus::CustomerConfirmed);
    assert!(item.confirmed_at.is_some());
}

#[tokio::test]
async fn cancellation_stamps_nothing() {
    let engine = engine("lifecycle_cancel.wal");
    let m = seed_marketplace(&engine).await;
    let item_id = book(&engine, &m, monday(), hm(10, 0)).await;

    let item = engine
        .transition_item(
            Principal {
                role: Role::Vendor,
                id: m.vendor_id,
            },
            item_id,
            ItemStatus::Cancelled,
        )
        .await
        .unwrap();
    assert_eq!(item.status, ItemStatus::Cancelled);
    assert!(item.vendor_done_at.is_none());
    assert!(item.confirmed_at.is_none());
}

#[tokio::test]
async fn cancelled_is_terminal() {
    let engine = engine("lifecycle_terminal.wal");
    let m = seed_marketplace(&engine).await;
    let item_id = book(&engine, &m, monday(), hm(10, 0)).await;
    let customer = Principal {
        role: Role::Customer,
        id: m.customer_id,
    };

    engine
        .transition_item(customer, item_id, ItemStatus::Cancelled)
        .await
        .unwrap();
    let err = engine
        .transition_item(customer, item_id, ItemStatus::CustomerConfirmed)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::InvalidTransition {
            from: ItemStatus::Cancelled,
            requested: ItemStatus::CustomerConfirmed,
        }
    );
}

#[tokio::test]
async fn confirmation_requires_vendor_done_first() {
    let engine = engine("lifecycle_order.wal");
    let m = seed_marketplace(&engine).await;
    let item_id = book(&engine, &m, monday(), hm(10, 0)).await;

    let err = engine
        .transition_item(
            Principal {
                role: Role::Customer,
                id: m.customer_id,
            },
            item_id,
            ItemStatus::CustomerConfirmed,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
}

#[tokio::test]
async fn wrong_owner_reads_as_not_found() {
    let engine = engine("lifecycle_auth.wal");
    let m = seed_marketplace(&engine).await;
    let item_id = book(&engine, &m, monday(), hm(10, 0)).await;

    // A different vendor cannot see the booking, let alone complete it.
    let err = engine
        .transition_item(
            Principal {
                role: Role::Vendor,
                id: Uuid::new_v4(),
            },
            item_id,
            ItemStatus::VendorDone,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { what: "booking", .. }));

    // A stranger customer cannot cancel it either.
    let err = engine
        .transition_item(
            Principal {
                role: Role::Customer,
                id: Uuid::new_v4(),
            },
            item_id,
            ItemStatus::Cancelled,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { what: "booking", .. }));
}

#[tokio::test]
async fn unknown_item_is_not_found() {
    let engine = engine("lifecycle_unknown.wal");
    let m = seed_marketplace(&engine).await;
    let err = engine
        .transition_item(
            Principal {
                role: Role::Vendor,
                id: m.vendor_id,
            },
            Uuid::new_v4(),
            ItemStatus::VendorDone,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { what: "booking", .. }));
}

// ── Group deletion ───────────────────────────────────────────

#[tokio::test]
async fn deleting_a_group_cascades_to_items() {
    let engine = engine("group_cascade.wal");
    let m = seed_marketplace(&engine).await;
    let item_id = book(&engine, &m, monday(), hm(10, 0)).await;
    let group_id = engine.vendor_bookings(m.vendor_id, None, None).await[0].group_id;

    engine.delete_group(group_id, m.customer_id).await.unwrap();

    assert!(engine.group(group_id).is_none());
    assert!(engine.vendor_bookings(m.vendor_id, None, None).await.is_empty());
    assert!(engine
        .customer_bookings(m.customer_id, None, None)
        .await
        .is_empty());
    assert!(engine.vendor_of_item(&item_id).is_none());

    // The slot opens up again.
    let day = engine
        .compute_slots(m.vendor_id, m.service_id, monday())
        .await
        .unwrap();
    assert!(day.slots.iter().all(|s| s.is_available));
}

#[tokio::test]
async fn deleting_anothers_group_is_not_found() {
    let engine = engine("group_auth.wal");
    let m = seed_marketplace(&engine).await;
    book(&engine, &m, monday(), hm(10, 0)).await;
    let group_id = engine.vendor_bookings(m.vendor_id, None, None).await[0].group_id;

    let err = engine
        .delete_group(group_id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::NotFound {
            what: "booking group",
            ..
        }
    ));
    assert!(engine.group(group_id).is_some());
}

// ── Catalog and listing queries ──────────────────────────────

#[tokio::test]
async fn service_list_is_active_only_and_sorted() {
    let engine = engine("service_list.wal");
    let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
    for (id, name) in [(ids[0], "Wax"), (ids[1], "Detail"), (ids[2], "Oil Change")] {
        engine
            .seed_service(Service {
                id,
                name: name.into(),
                category: "misc".into(),
                base_price_cents: 1000,
                duration_min: 30,
                active: true,
            })
            .await
            .unwrap();
    }
    engine.retire_service(ids[1]).await.unwrap();

    let names: Vec<String> = engine.list_services().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["Oil Change", "Wax"]);
}

#[tokio::test]
async fn offering_list_excludes_inactive_pairs() {
    let engine = engine("offering_list.wal");
    let m = seed_marketplace(&engine).await;

    let retired = Uuid::new_v4();
    engine
        .seed_service(Service {
            id: retired,
            name: "Undercoat".into(),
            category: "misc".into(),
            base_price_cents: 2000,
            duration_min: 45,
            active: true,
        })
        .await
        .unwrap();
    engine
        .upsert_offering(
            m.vendor_id,
            Offering {
                service_id: retired,
                price_cents: 2000,
                duration_min: 45,
                active: true,
            },
        )
        .await
        .unwrap();
    engine.retire_service(retired).await.unwrap();

    let infos = engine.vendor_offerings(m.vendor_id).await;
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].service_id, m.service_id);
    assert_eq!(infos[0].service_name, "Exterior Wash");
}

#[tokio::test]
async fn booking_lists_paginate_in_start_order() {
    let engine = engine("pagination.wal");
    let m = seed_marketplace(&engine).await;
    for hour in [13, 9, 11, 15] {
        book(&engine, &m, monday(), hm(hour, 0)).await;
    }

    let all = engine.vendor_bookings(m.vendor_id, None, None).await;
    let hours: Vec<u32> = all
        .iter()
        .map(|b| {
            use chrono::Timelike;
            b.start_time.time().hour()
        })
        .collect();
    assert_eq!(hours, vec![9, 11, 13, 15]);

    let page = engine.vendor_bookings(m.vendor_id, Some(2), Some(1)).await;
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].start_time, monday().and_time(hm(11, 0)));

    let customer_page = engine
        .customer_bookings(m.customer_id, Some(3), Some(2))
        .await;
    assert_eq!(customer_page.len(), 2);
    assert_eq!(customer_page[0].start_time, monday().and_time(hm(13, 0)));
}

// ── Notifications ────────────────────────────────────────────

#[tokio::test]
async fn checkout_notifies_the_vendor_channel() {
    let engine = engine("notify_checkout.wal");
    let m = seed_marketplace(&engine).await;
    let mut rx = engine.notify.subscribe(m.vendor_id);

    book(&engine, &m, monday(), hm(10, 0)).await;

    let event = rx.recv().await.unwrap();
    match event {
        Event::GroupCreated { items, .. } => {
            assert_eq!(items.len(), 1);
            assert_eq!(items[0].vendor_id, m.vendor_id);
        }
        other => panic!("expected GroupCreated, got {other:?}"),
    }
}

#[tokio::test]
async fn status_change_notifies_the_vendor_channel() {
    let engine = engine("notify_status.wal");
    let m = seed_marketplace(&engine).await;
    let item_id = book(&engine, &m, monday(), hm(10, 0)).await;

    let mut rx = engine.notify.subscribe(m.vendor_id);
    engine
        .transition_item(
            Principal {
                role: Role::Vendor,
                id: m.vendor_id,
            },
            item_id,
            ItemStatus::VendorDone,
        )
        .await
        .unwrap();

    let event = rx.recv().await.unwrap();
    assert!(matches!(
        event,
        Event::ItemStatusChanged {
            status: ItemStatus::VendorDone,
            ..
        }
    ));
}

// ── Durability ───────────────────────────────────────────────

#[tokio::test]
async fn replay_restores_the_whole_marketplace() {
    let path = wal_path("replay_full.wal");
    let vendor_id;
    let service_id;
    let customer_id;
    let done_item;
    let cart_item_id = Uuid::new_v4();

    {
        let engine = engine_at(path.clone());
        let m = seed_marketplace(&engine).await;
        vendor_id = m.vendor_id;
        service_id = m.service_id;
        customer_id = m.customer_id;

        done_item = book(&engine, &m, monday(), hm(10, 0)).await;
        engine
            .transition_item(
                Principal {
                    role: Role::Vendor,
                    id: vendor_id,
                },
                done_item,
                ItemStatus::VendorDone,
            )
            .await
            .unwrap();

        // Leave one item sitting in the cart.
        engine
            .add_cart_item(CartItem {
                id: cart_item_id,
                customer_id,
                vendor_id,
                service_id,
                preferred_date: monday(),
                preferred_time: hm(15, 0),
            })
            .await
            .unwrap();
    }

    let reopened = engine_at(path);
    assert!(reopened.services.contains_key(&service_id));
    assert!(reopened.customers.contains_key(&customer_id));

    let items = reopened.vendor_bookings(vendor_id, None, None).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, done_item);
    assert_eq!(items[0].status, ItemStatus::VendorDone);
    assert!(items[0].vendor_done_at.is_some());
    assert_eq!(items[0].snapshot.price_cents, 4000);

    let cart = reopened.cart(customer_id);
    assert_eq!(cart.len(), 1);
    assert_eq!(cart[0].id, cart_item_id);

    // The replayed booking still blocks its slot.
    let day = reopened
        .compute_slots(vendor_id, service_id, monday())
        .await
        .unwrap();
    let ten = day.slots.iter().find(|s| s.time == hm(10, 0)).unwrap();
    assert!(!ten.is_available);
}

#[tokio::test]
async fn compaction_keeps_groups_and_live_carts() {
    let path = wal_path("compact_semantics.wal");
    let vendor_id;
    let customer_id;
    let group_id;
    let cart_item_id = Uuid::new_v4();

    {
        let engine = engine_at(path.clone());
        let m = seed_marketplace(&engine).await;
        vendor_id = m.vendor_id;
        customer_id = m.customer_id;

        book(&engine, &m, monday(), hm(10, 0)).await;
        group_id = engine.vendor_bookings(vendor_id, None, None).await[0].group_id;

        engine
            .add_cart_item(CartItem {
                id: cart_item_id,
                customer_id,
                vendor_id,
                service_id: m.service_id,
                preferred_date: monday(),
                preferred_time: hm(15, 0),
            })
            .await
            .unwrap();

        engine.compact_wal().await.unwrap();
    }

    let reopened = engine_at(path);
    // The checkout survived compaction, and replaying it did not wipe the
    // cart item that was live when the WAL was rewritten.
    assert!(reopened.group(group_id).is_some());
    assert_eq!(reopened.vendor_bookings(vendor_id, None, None).await.len(), 1);
    let cart = reopened.cart(customer_id);
    assert_eq!(cart.len(), 1);
    assert_eq!(cart[0].id, cart_item_id);
}

#[tokio::test]
async fn group_deletion_survives_restart() {
    let path = wal_path("delete_restart.wal");
    let vendor_id;
    let group_id;

    {
        let engine = engine_at(path.clone());
        let m = seed_marketplace(&engine).await;
        vendor_id = m.vendor_id;
        book(&engine, &m, monday(), hm(10, 0)).await;
        group_id = engine.vendor_bookings(vendor_id, None, None).await[0].group_id;
        engine.delete_group(group_id, m.customer_id).await.unwrap();
    }

    let reopened = engine_at(path);
    assert!(reopened.group(group_id).is_none());
    assert!(reopened.vendor_bookings(vendor_id, None, None).await.is_empty());
}
