use std::collections::HashMap;

use chrono::{Duration, NaiveDate, NaiveTime};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::limits::*;
use crate::model::*;

use super::lifecycle::{self, Stamp};
use super::{apply_status, now_local, Engine, EngineError, WalCommand};

fn validate_text(what: &'static str, s: &str, max: usize) -> Result<(), EngineError> {
    if s.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn validate_profile(profile: &Profile) -> Result<(), EngineError> {
    validate_text("name too long", &profile.fullname, MAX_NAME_LEN)?;
    validate_text("contact info too long", &profile.contact_info, MAX_TEXT_LEN)?;
    validate_text("address too long", &profile.address, MAX_TEXT_LEN)
}

fn validate_money(cents: i64) -> Result<(), EngineError> {
    if !(0..=MAX_PRICE_CENTS).contains(&cents) {
        return Err(EngineError::LimitExceeded("price out of range"));
    }
    Ok(())
}

fn validate_duration(minutes: u32) -> Result<(), EngineError> {
    if minutes > MAX_DURATION_MIN {
        return Err(EngineError::LimitExceeded("duration too long"));
    }
    Ok(())
}

fn validate_schedule(date: NaiveDate) -> Result<(), EngineError> {
    use chrono::Datelike;
    if !(MIN_SCHEDULE_YEAR..=MAX_SCHEDULE_YEAR).contains(&date.year()) {
        return Err(EngineError::LimitExceeded("preferred date out of range"));
    }
    Ok(())
}

impl Engine {
    // ── Catalog ──────────────────────────────────────────────

    pub async fn seed_service(&self, service: Service) -> Result<(), EngineError> {
        validate_text("name too long", &service.name, MAX_NAME_LEN)?;
        validate_text("category too long", &service.category, MAX_TEXT_LEN)?;
        validate_money(service.base_price_cents)?;
        validate_duration(service.duration_min)?;
        if self.services.len() >= MAX_SERVICES {
            return Err(EngineError::LimitExceeded("too many services"));
        }
        if self.services.contains_key(&service.id) {
            return Err(EngineError::AlreadyExists {
                what: "service",
                id: service.id,
            });
        }

        let event = Event::ServiceSeeded {
            service: service.clone(),
        };
        self.commit(&event).await?;
        self.services.insert(service.id, service);
        Ok(())
    }

    pub async fn retire_service(&self, id: Uuid) -> Result<(), EngineError> {
        if !self.services.contains_key(&id) {
            return Err(EngineError::NotFound {
                what: "service",
                id,
            });
        }
        let event = Event::ServiceRetired { id };
        self.commit(&event).await?;
        if let Some(mut svc) = self.services.get_mut(&id) {
            svc.active = false;
        }
        Ok(())
    }

    // ── Profiles ─────────────────────────────────────────────

    pub async fn upsert_customer(&self, id: Uuid, profile: Profile) -> Result<(), EngineError> {
        validate_profile(&profile)?;
        let event = Event::CustomerUpserted {
            id,
            profile: profile.clone(),
        };
        self.commit(&event).await?;
        self.customers.insert(id, Customer { id, profile });
        Ok(())
    }

    pub async fn upsert_vendor(&self, id: Uuid, profile: Profile) -> Result<(), EngineError> {
        validate_profile(&profile)?;
        let event = Event::VendorUpserted {
            id,
            profile: profile.clone(),
        };
        self.commit(&event).await?;
        match self.vendor_state(&id) {
            Some(vs) => vs.write().await.profile = profile,
            None => {
                self.vendors.insert(
                    id,
                    std::sync::Arc::new(tokio::sync::RwLock::new(VendorState::new(id, profile))),
                );
            }
        }
        self.notify.send(id, &event);
        Ok(())
    }

    // ── Offerings ────────────────────────────────────────────

    pub async fn upsert_offering(
        &self,
        vendor_id: Uuid,
        offering: Offering,
    ) -> Result<(), EngineError> {
        validate_money(offering.price_cents)?;
        validate_duration(offering.duration_min)?;
        if !self.services.contains_key(&offering.service_id) {
            return Err(EngineError::NotFound {
                what: "service",
                id: offering.service_id,
            });
        }
        let vs = self.vendor_state(&vendor_id).ok_or(EngineError::NotFound {
            what: "vendor",
            id: vendor_id,
        })?;
        let mut guard = vs.write().await;
        if !guard.offerings.contains_key(&offering.service_id)
            && guard.offerings.len() >= MAX_OFFERINGS_PER_VENDOR
        {
            return Err(EngineError::LimitExceeded("too many offerings"));
        }

        let event = Event::OfferingUpserted {
            vendor_id,
            offering: offering.clone(),
        };
        self.commit(&event).await?;
        guard.offerings.insert(offering.service_id, offering);
        self.notify.send(vendor_id, &event);
        Ok(())
    }

    /// Partial offering update; unset fields keep their current value.
    pub async fn update_offering(
        &self,
        vendor_id: Uuid,
        service_id: Uuid,
        price_cents: Option<i64>,
        duration_min: Option<u32>,
        active: Option<bool>,
    ) -> Result<Offering, EngineError> {
        let vs = self.vendor_state(&vendor_id).ok_or(EngineError::NotFound {
            what: "vendor",
            id: vendor_id,
        })?;
        let mut guard = vs.write().await;
        let current = guard
            .offerings
            .get(&service_id)
            .ok_or(EngineError::NotFound {
                what: "offering",
                id: service_id,
            })?;

        let merged = Offering {
            service_id,
            price_cents: price_cents.unwrap_or(current.price_cents),
            duration_min: duration_min.unwrap_or(current.duration_min),
            active: active.unwrap_or(current.active),
        };
        validate_money(merged.price_cents)?;
        validate_duration(merged.duration_min)?;

        let event = Event::OfferingUpserted {
            vendor_id,
            offering: merged.clone(),
        };
        self.commit(&event).await?;
        guard.offerings.insert(service_id, merged.clone());
        self.notify.send(vendor_id, &event);
        Ok(merged)
    }

    pub async fn remove_offering(
        &self,
        vendor_id: Uuid,
        service_id: Uuid,
    ) -> Result<(), EngineError> {
        let vs = self.vendor_state(&vendor_id).ok_or(EngineError::NotFound {
            what: "vendor",
            id: vendor_id,
        })?;
        let mut guard = vs.write().await;
        if !guard.offerings.contains_key(&service_id) {
            return Err(EngineError::NotFound {
                what: "offering",
                id: service_id,
            });
        }

        let event = Event::OfferingRemoved {
            vendor_id,
            service_id,
        };
        self.commit(&event).await?;
        guard.offerings.remove(&service_id);
        self.notify.send(vendor_id, &event);
        Ok(())
    }

    // ── Cart ─────────────────────────────────────────────────

    /// Validates that the vendor actively offers the (active) service
    /// before the item enters the cart.
    pub async fn add_cart_item(&self, item: CartItem) -> Result<(), EngineError> {
        validate_schedule(item.preferred_date)?;
        if !self.customers.contains_key(&item.customer_id) {
            return Err(EngineError::NotFound {
                what: "customer",
                id: item.customer_id,
            });
        }
        let service_active = self
            .services
            .get(&item.service_id)
            .map(|s| s.active)
            .unwrap_or(false);
        if !service_active {
            return Err(EngineError::NotFound {
                what: "service",
                id: item.service_id,
            });
        }
        let vs = self
            .vendor_state(&item.vendor_id)
            .ok_or(EngineError::NotFound {
                what: "vendor",
                id: item.vendor_id,
            })?;
        {
            let guard = vs.read().await;
            let offered = guard
                .offerings
                .get(&item.service_id)
                .is_some_and(|o| o.active);
            if !offered {
                return Err(EngineError::NotFound {
                    what: "offering",
                    id: item.service_id,
                });
            }
        }
        if self.vendor_of_item(&item.id).is_some()
            || self
                .carts
                .get(&item.customer_id)
                .is_some_and(|cart| cart.iter().any(|i| i.id == item.id))
        {
            return Err(EngineError::AlreadyExists {
                what: "cart item",
                id: item.id,
            });
        }
        if self
            .carts
            .get(&item.customer_id)
            .is_some_and(|cart| cart.len() >= MAX_CART_ITEMS)
        {
            return Err(EngineError::LimitExceeded("cart is full"));
        }

        let event = Event::CartItemAdded { item: item.clone() };
        self.commit(&event).await?;
        self.carts.entry(item.customer_id).or_default().push(item);
        Ok(())
    }

    pub async fn reschedule_cart_item(
        &self,
        id: Uuid,
        customer_id: Uuid,
        preferred_date: NaiveDate,
        preferred_time: NaiveTime,
    ) -> Result<(), EngineError> {
        validate_schedule(preferred_date)?;
        let known = self
            .carts
            .get(&customer_id)
            .is_some_and(|cart| cart.iter().any(|i| i.id == id));
        if !known {
            return Err(EngineError::NotFound {
                what: "cart item",
                id,
            });
        }

        let event = Event::CartItemRescheduled {
            id,
            customer_id,
            preferred_date,
            preferred_time,
        };
        self.commit(&event).await?;
        if let Some(mut cart) = self.carts.get_mut(&customer_id)
            && let Some(item) = cart.iter_mut().find(|i| i.id == id)
        {
            item.preferred_date = preferred_date;
            item.preferred_time = preferred_time;
        }
        Ok(())
    }

    pub async fn remove_cart_item(&self, id: Uuid, customer_id: Uuid) -> Result<(), EngineError> {
        let known = self
            .carts
            .get(&customer_id)
            .is_some_and(|cart| cart.iter().any(|i| i.id == id));
        if !known {
            return Err(EngineError::NotFound {
                what: "cart item",
                id,
            });
        }

        let event = Event::CartItemRemoved { id, customer_id };
        self.commit(&event).await?;
        if let Some(mut cart) = self.carts.get_mut(&customer_id) {
            cart.retain(|i| i.id != id);
        }
        Ok(())
    }

    // ── Checkout ─────────────────────────────────────────────

    /// Convert the customer's whole cart into a booking group.
    ///
    /// Two phases under the involved vendors' write locks (acquired in
    /// sorted id order): validate every item, then commit the group and
    /// all items as a single WAL event. Any validation failure aborts the
    /// checkout with the cart untouched.
    ///
    /// There is no occupancy check against existing bookings: two
    /// concurrent checkouts can both take the same window, and the
    /// vendor/customer workflow sorts out the double-booking afterwards.
    pub async fn checkout(
        &self,
        group_id: Uuid,
        customer_id: Uuid,
        method: PaymentMethod,
    ) -> Result<BookingGroup, EngineError> {
        if self.groups.contains_key(&group_id) {
            return Err(EngineError::AlreadyExists {
                what: "booking group",
                id: group_id,
            });
        }
        let contact_snapshot = self
            .customers
            .get(&customer_id)
            .map(|c| c.profile.clone())
            .ok_or(EngineError::NotFound {
                what: "customer",
                id: customer_id,
            })?;
        let cart: Vec<CartItem> = self
            .carts
            .get(&customer_id)
            .map(|c| c.clone())
            .unwrap_or_default();
        if cart.is_empty() {
            return Err(EngineError::EmptyCart(customer_id));
        }

        // Lock vendors in sorted order so concurrent checkouts touching
        // the same vendors cannot deadlock.
        let mut vendor_ids: Vec<Uuid> = cart.iter().map(|i| i.vendor_id).collect();
        vendor_ids.sort();
        vendor_ids.dedup();

        let mut guards = Vec::with_capacity(vendor_ids.len());
        let mut guard_idx = HashMap::new();
        for vid in &vendor_ids {
            let vs = self.vendor_state(vid).ok_or(EngineError::NotFound {
                what: "vendor",
                id: *vid,
            })?;
            guard_idx.insert(*vid, guards.len());
            guards.push(vs.write_owned().await);
        }

        // Phase 1: every item must still resolve to an active offering of
        // an active service.
        let mut per_vendor_new: HashMap<Uuid, usize> = HashMap::new();
        for item in &cart {
            let service_active = self
                .services
                .get(&item.service_id)
                .is_some_and(|s| s.active);
            if !service_active {
                return Err(EngineError::NotFound {
                    what: "service",
                    id: item.service_id,
                });
            }
            let guard = &guards[guard_idx[&item.vendor_id]];
            let offered = guard
                .offerings
                .get(&item.service_id)
                .is_some_and(|o| o.active);
            if !offered {
                return Err(EngineError::NotFound {
                    what: "offering",
                    id: item.service_id,
                });
            }
            validate_schedule(item.preferred_date)?;

            let new_count = per_vendor_new.entry(item.vendor_id).or_insert(0);
            *new_count += 1;
            if guard.bookings.len() + *new_count > MAX_BOOKINGS_PER_VENDOR {
                return Err(EngineError::LimitExceeded("too many bookings for vendor"));
            }
        }

        // Phase 2: build the snapshotted items and commit everything as
        // one event.
        let now = now_local();
        let mut items = Vec::with_capacity(cart.len());
        let mut total_cents: i64 = 0;
        for cart_item in &cart {
            let guard = &guards[guard_idx[&cart_item.vendor_id]];
            let offering = &guard.offerings[&cart_item.service_id];
            let service_name = self
                .services
                .get(&cart_item.service_id)
                .map(|s| s.name.clone())
                .unwrap_or_default();
            let duration_min = if offering.duration_min == 0 {
                self.calendar.slot_minutes
            } else {
                offering.duration_min
            };
            let start_time = cart_item.preferred_date.and_time(cart_item.preferred_time);
            let end_time = start_time + Duration::minutes(duration_min as i64);
            total_cents += offering.price_cents;

            items.push(BookingItem {
                id: cart_item.id,
                group_id,
                customer_id,
                vendor_id: cart_item.vendor_id,
                service_id: cart_item.service_id,
                snapshot: ServiceSnapshot {
                    name: service_name,
                    price_cents: offering.price_cents,
                    duration_min,
                },
                preferred_date: cart_item.preferred_date,
                preferred_time: cart_item.preferred_time,
                start_time,
                end_time,
                status: ItemStatus::Processing,
                vendor_done_at: None,
                confirmed_at: None,
            });
        }

        let group = BookingGroup {
            id: group_id,
            customer_id,
            contact_snapshot,
            payment: Payment {
                total_cents,
                method,
            },
            item_ids: items.iter().map(|i| i.id).collect(),
            created_at: now,
        };

        let event = Event::GroupCreated {
            group: group.clone(),
            items: items.clone(),
        };
        self.commit(&event).await?;

        self.groups.insert(group_id, group.clone());
        self.carts.remove(&customer_id);
        for item in items {
            self.index_item(&item);
            let guard = &mut guards[guard_idx[&item.vendor_id]];
            guard.insert_booking(item);
        }
        metrics::counter!(crate::observability::BOOKING_ITEMS_CREATED_TOTAL)
            .increment(group.item_ids.len() as u64);
        for vid in &vendor_ids {
            self.notify.send(*vid, &event);
        }
        Ok(group)
    }

    // ── Lifecycle ────────────────────────────────────────────

    /// Apply one status transition on behalf of a principal. The principal
    /// must own the item's side of the booking; a mismatch is reported as
    /// not-found so strangers cannot distinguish "exists" from "not mine".
    pub async fn transition_item(
        &self,
        principal: Principal,
        item_id: Uuid,
        requested: ItemStatus,
    ) -> Result<BookingItem, EngineError> {
        let (vendor_id, mut guard) = self.resolve_item_write(&item_id).await?;
        let item = guard.booking(item_id).ok_or(EngineError::NotFound {
            what: "booking",
            id: item_id,
        })?;

        let owns = match principal.role {
            Role::Vendor => item.vendor_id == principal.id,
            Role::Customer => item.customer_id == principal.id,
        };
        if !owns {
            return Err(EngineError::NotFound {
                what: "booking",
                id: item_id,
            });
        }

        let stamp = lifecycle::transition(principal.role, item.status, requested)?;
        let stamped_at = match stamp {
            Stamp::None => None,
            Stamp::VendorDone | Stamp::Confirmed => Some(now_local()),
        };

        let event = Event::ItemStatusChanged {
            id: item_id,
            vendor_id,
            status: requested,
            stamped_at,
        };
        self.commit(&event).await?;
        if let Some(item) = guard.booking_mut(item_id) {
            apply_status(item, requested, stamped_at);
        }
        self.notify.send(vendor_id, &event);

        guard
            .booking(item_id)
            .cloned()
            .ok_or(EngineError::NotFound {
                what: "booking",
                id: item_id,
            })
    }

    // ── Group deletion ───────────────────────────────────────

    /// Cascade-delete a booking group and all its items. Items never
    /// disappear any other way.
    pub async fn delete_group(&self, group_id: Uuid, customer_id: Uuid) -> Result<(), EngineError> {
        let group = self
            .groups
            .get(&group_id)
            .map(|g| g.clone())
            .ok_or(EngineError::NotFound {
                what: "booking group",
                id: group_id,
            })?;
        if group.customer_id != customer_id {
            return Err(EngineError::NotFound {
                what: "booking group",
                id: group_id,
            });
        }

        let mut vendor_ids: Vec<Uuid> = group
            .item_ids
            .iter()
            .filter_map(|id| self.vendor_of_item(id))
            .collect();
        vendor_ids.sort();
        vendor_ids.dedup();

        let mut guards = Vec::with_capacity(vendor_ids.len());
        let mut guard_idx = HashMap::new();
        for vid in &vendor_ids {
            let vs = self.vendor_state(vid).ok_or(EngineError::NotFound {
                what: "vendor",
                id: *vid,
            })?;
            guard_idx.insert(*vid, guards.len());
            guards.push(vs.write_owned().await);
        }

        let event = Event::GroupDeleted { id: group_id };
        self.commit(&event).await?;

        self.groups.remove(&group_id);
        for item_id in &group.item_ids {
            if let Some(vendor_id) = self.vendor_of_item(item_id)
                && let Some(&idx) = guard_idx.get(&vendor_id)
            {
                guards[idx].remove_booking(*item_id);
            }
            self.unindex_item(*item_id, group.customer_id);
        }
        for vid in &vendor_ids {
            self.notify.send(*vid, &event);
        }
        Ok(())
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL with only the events needed to rebuild the current
    /// state. Groups are emitted before cart entries so that replaying a
    /// checkout (which clears its owner's cart) cannot wipe a cart that is
    /// live at compaction time.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for svc in self.services.iter() {
            events.push(Event::ServiceSeeded {
                service: svc.value().clone(),
            });
        }
        for customer in self.customers.iter() {
            events.push(Event::CustomerUpserted {
                id: *customer.key(),
                profile: customer.value().profile.clone(),
            });
        }

        let mut items_by_group: HashMap<Uuid, Vec<BookingItem>> = HashMap::new();
        let vendor_states: Vec<_> = self.vendors.iter().map(|e| e.value().clone()).collect();
        for vs in vendor_states {
            let guard = vs.read().await;
            events.push(Event::VendorUpserted {
                id: guard.id,
                profile: guard.profile.clone(),
            });
            for offering in guard.offerings.values() {
                events.push(Event::OfferingUpserted {
                    vendor_id: guard.id,
                    offering: offering.clone(),
                });
            }
            for item in &guard.bookings {
                items_by_group
                    .entry(item.group_id)
                    .or_default()
                    .push(item.clone());
            }
        }

        for group in self.groups.iter() {
            events.push(Event::GroupCreated {
                group: group.value().clone(),
                items: items_by_group.remove(group.key()).unwrap_or_default(),
            });
        }
        for cart in self.carts.iter() {
            for item in cart.value() {
                events.push(Event::CartItemAdded { item: item.clone() });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
