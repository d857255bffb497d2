use std::collections::HashMap;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::limits::*;
use crate::model::*;

use super::slots::slot_grid;
use super::{Engine, EngineError};

fn page_bounds(limit: Option<usize>, offset: Option<usize>) -> (usize, usize) {
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    (limit, offset.unwrap_or(0))
}

impl Engine {
    /// The slot grid for one vendor/service/date.
    ///
    /// Outcome precedence: a non-working day succeeds with an empty slot
    /// list before the offering is even looked at; an unknown or inactive
    /// vendor/service pairing is not-found; a fully booked day is a
    /// success with every slot unavailable. Only the pair lookup can fail
    /// here — syntax errors never reach the engine.
    pub async fn compute_slots(
        &self,
        vendor_id: Uuid,
        service_id: Uuid,
        date: NaiveDate,
    ) -> Result<SlotDay, EngineError> {
        let Some(window) = self.calendar.day_window(date) else {
            return Ok(SlotDay {
                vendor_id,
                service_id,
                date,
                slots: Vec::new(),
            });
        };

        let vs = self.vendor_state(&vendor_id).ok_or(EngineError::NotFound {
            what: "vendor",
            id: vendor_id,
        })?;
        let guard = vs.read().await;

        let offering = guard
            .offerings
            .get(&service_id)
            .filter(|o| o.active)
            .ok_or(EngineError::NotFound {
                what: "offering",
                id: service_id,
            })?;
        let service_active = self
            .services
            .get(&service_id)
            .is_some_and(|s| s.active);
        if !service_active {
            return Err(EngineError::NotFound {
                what: "offering",
                id: service_id,
            });
        }

        let duration_min = if offering.duration_min == 0 {
            self.calendar.slot_minutes
        } else {
            offering.duration_min
        };

        let busy: Vec<TimeRange> = guard.bookings_on(date).map(|b| b.occupancy()).collect();
        let slots = slot_grid(window, self.calendar.slot_minutes, duration_min, &busy);

        Ok(SlotDay {
            vendor_id,
            service_id,
            date,
            slots,
        })
    }

    /// Active catalog services, ordered by name.
    pub fn list_services(&self) -> Vec<Service> {
        let mut services: Vec<Service> = self
            .services
            .iter()
            .filter(|e| e.value().active)
            .map(|e| e.value().clone())
            .collect();
        services.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        services
    }

    /// A vendor's active offerings joined with service names, ordered by
    /// service name. Unknown vendors list as empty.
    pub async fn vendor_offerings(&self, vendor_id: Uuid) -> Vec<OfferingInfo> {
        let Some(vs) = self.vendor_state(&vendor_id) else {
            return Vec::new();
        };
        let guard = vs.read().await;
        let mut infos: Vec<OfferingInfo> = guard
            .offerings
            .values()
            .filter(|o| o.active)
            .filter(|o| {
                self.services
                    .get(&o.service_id)
                    .is_some_and(|s| s.active)
            })
            .map(|o| OfferingInfo {
                service_id: o.service_id,
                service_name: self
                    .services
                    .get(&o.service_id)
                    .map(|s| s.name.clone())
                    .unwrap_or_default(),
                price_cents: o.price_cents,
                duration_min: o.duration_min,
                active: o.active,
            })
            .collect();
        infos.sort_by(|a, b| a.service_name.cmp(&b.service_name).then(a.service_id.cmp(&b.service_id)));
        infos
    }

    pub fn cart(&self, customer_id: Uuid) -> Vec<CartItem> {
        self.carts
            .get(&customer_id)
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    pub fn group(&self, id: Uuid) -> Option<BookingGroup> {
        self.groups.get(&id).map(|g| g.clone())
    }

    /// A customer's booking groups, oldest first.
    pub fn customer_groups(&self, customer_id: Uuid) -> Vec<BookingGroup> {
        let mut groups: Vec<BookingGroup> = self
            .groups
            .iter()
            .filter(|g| g.value().customer_id == customer_id)
            .map(|g| g.value().clone())
            .collect();
        groups.sort_by_key(|g| (g.created_at, g.id));
        groups
    }

    /// A vendor's booking items in start-time order, paginated.
    pub async fn vendor_bookings(
        &self,
        vendor_id: Uuid,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Vec<BookingItem> {
        let (limit, offset) = page_bounds(limit, offset);
        let Some(vs) = self.vendor_state(&vendor_id) else {
            return Vec::new();
        };
        let guard = vs.read().await;
        guard
            .bookings
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    /// A customer's booking items across all vendors, in start-time order,
    /// paginated.
    pub async fn customer_bookings(
        &self,
        customer_id: Uuid,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Vec<BookingItem> {
        let (limit, offset) = page_bounds(limit, offset);
        let ids: Vec<Uuid> = self
            .customer_items
            .get(&customer_id)
            .map(|v| v.clone())
            .unwrap_or_default();

        let mut by_vendor: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for id in ids {
            if let Some(vendor_id) = self.vendor_of_item(&id) {
                by_vendor.entry(vendor_id).or_default().push(id);
            }
        }

        let mut items = Vec::new();
        for (vendor_id, item_ids) in by_vendor {
            let Some(vs) = self.vendor_state(&vendor_id) else {
                continue;
            };
            let guard = vs.read().await;
            for id in item_ids {
                if let Some(item) = guard.booking(id) {
                    items.push(item.clone());
                }
            }
        }

        items.sort_by_key(|b| (b.start_time, b.id));
        items.into_iter().skip(offset).take(limit).collect()
    }
}
