mod error;
pub mod lifecycle;
mod mutations;
mod queries;
pub mod slots;
#[cfg(test)]
mod tests;

pub use error::EngineError;
pub use lifecycle::{transition, Stamp};
pub use slots::slot_grid;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDateTime;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use uuid::Uuid;

use crate::calendar::WorkingCalendar;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedVendorState = Arc<RwLock<VendorState>>;

pub(crate) fn now_local() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

// ── Group-commit WAL channel ─────────────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task owning the WAL. Appends are batched: the first Append
/// blocks, every immediately available Append joins its batch, then one
/// fsync commits them all and every sender gets the shared result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut failed = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            failed = Some(e);
            break;
        }
    }
    // Flush even after an append error so partially buffered bytes cannot
    // leak into the next batch (these callers are all told they failed).
    let flushed = wal.flush_sync();
    match failed {
        Some(e) => Err(e),
        None => flushed,
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────────────

/// One tenant's marketplace: catalog, profiles, carts, bookings, and the
/// WAL that makes them durable. All maps are keyed by UUID; per-vendor
/// state (offerings + booking list) sits behind its own `RwLock` so slot
/// queries and checkouts touching different vendors never contend.
pub struct Engine {
    calendar: WorkingCalendar,
    pub services: DashMap<Uuid, Service>,
    pub customers: DashMap<Uuid, Customer>,
    pub vendors: DashMap<Uuid, SharedVendorState>,
    pub(super) carts: DashMap<Uuid, Vec<CartItem>>,
    pub(super) groups: DashMap<Uuid, BookingGroup>,
    /// Reverse lookup: booking item id → owning vendor id.
    pub(super) item_to_vendor: DashMap<Uuid, Uuid>,
    /// Customer id → booking item ids, for customer-side listings.
    pub(super) customer_items: DashMap<Uuid, Vec<Uuid>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("services", &self.services.len())
            .field("customers", &self.customers.len())
            .field("vendors", &self.vendors.len())
            .finish_non_exhaustive()
    }
}

/// Set a status and its timestamp side effect on an item.
pub(super) fn apply_status(
    item: &mut BookingItem,
    status: ItemStatus,
    stamped_at: Option<NaiveDateTime>,
) {
    match status {
        ItemStatus::VendorDone => item.vendor_done_at = stamped_at,
        ItemStatus::CustomerConfirmed => item.confirmed_at = stamped_at,
        ItemStatus::Processing | ItemStatus::Cancelled => {}
    }
    item.status = status;
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        calendar: WorkingCalendar,
        notify: Arc<NotifyHub>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            calendar,
            services: DashMap::new(),
            customers: DashMap::new(),
            vendors: DashMap::new(),
            carts: DashMap::new(),
            groups: DashMap::new(),
            item_to_vendor: DashMap::new(),
            customer_items: DashMap::new(),
            wal_tx,
            notify,
        };

        for event in &events {
            engine.replay_apply(event);
        }

        Ok(engine)
    }

    pub fn calendar(&self) -> &WorkingCalendar {
        &self.calendar
    }

    pub fn vendor_state(&self, id: &Uuid) -> Option<SharedVendorState> {
        self.vendors.get(id).map(|e| e.value().clone())
    }

    pub fn vendor_of_item(&self, item_id: &Uuid) -> Option<Uuid> {
        self.item_to_vendor.get(item_id).map(|e| *e.value())
    }

    /// Make an event durable through the background group-commit writer.
    /// Mutations call this before touching in-memory state, so a WAL
    /// failure leaves the engine unchanged.
    pub(super) async fn commit(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Item id → owning vendor, write-locked. Unknown items surface as
    /// not-found on the booking, not the vendor.
    pub(super) async fn resolve_item_write(
        &self,
        item_id: &Uuid,
    ) -> Result<(Uuid, tokio::sync::OwnedRwLockWriteGuard<VendorState>), EngineError> {
        let vendor_id = self.vendor_of_item(item_id).ok_or(EngineError::NotFound {
            what: "booking",
            id: *item_id,
        })?;
        let vs = self.vendor_state(&vendor_id).ok_or(EngineError::NotFound {
            what: "vendor",
            id: vendor_id,
        })?;
        let guard = vs.write_owned().await;
        Ok((vendor_id, guard))
    }

    pub(super) fn index_item(&self, item: &BookingItem) {
        self.item_to_vendor.insert(item.id, item.vendor_id);
        self.customer_items
            .entry(item.customer_id)
            .or_default()
            .push(item.id);
    }

    pub(super) fn unindex_item(&self, item_id: Uuid, customer_id: Uuid) {
        self.item_to_vendor.remove(&item_id);
        if let Some(mut ids) = self.customer_items.get_mut(&customer_id) {
            ids.retain(|i| *i != item_id);
        }
    }

    /// Rebuild state from one replayed event. Startup only: we are the
    /// sole owner of every vendor Arc here, so `try_write` cannot fail.
    fn replay_apply(&self, event: &Event) {
        match event {
            Event::ServiceSeeded { service } => {
                self.services.insert(service.id, service.clone());
            }
            Event::ServiceRetired { id } => {
                if let Some(mut svc) = self.services.get_mut(id) {
                    svc.active = false;
                }
            }
            Event::CustomerUpserted { id, profile } => {
                self.customers.insert(
                    *id,
                    Customer {
                        id: *id,
                        profile: profile.clone(),
                    },
                );
            }
            Event::VendorUpserted { id, profile } => {
                if let Some(vs) = self.vendor_state(id) {
                    vs.try_write().expect("replay: uncontended write").profile = profile.clone();
                } else {
                    self.vendors.insert(
                        *id,
                        Arc::new(RwLock::new(VendorState::new(*id, profile.clone()))),
                    );
                }
            }
            Event::OfferingUpserted {
                vendor_id,
                offering,
            } => {
                if let Some(vs) = self.vendor_state(vendor_id) {
                    vs.try_write()
                        .expect("replay: uncontended write")
                        .offerings
                        .insert(offering.service_id, offering.clone());
                }
            }
            Event::OfferingRemoved {
                vendor_id,
                service_id,
            } => {
                if let Some(vs) = self.vendor_state(vendor_id) {
                    vs.try_write()
                        .expect("replay: uncontended write")
                        .offerings
                        .remove(service_id);
                }
            }
            Event::CartItemAdded { item } => {
                self.carts
                    .entry(item.customer_id)
                    .or_default()
                    .push(item.clone());
            }
            Event::CartItemRescheduled {
                id,
                customer_id,
                preferred_date,
                preferred_time,
            } => {
                if let Some(mut cart) = self.carts.get_mut(customer_id)
                    && let Some(item) = cart.iter_mut().find(|i| i.id == *id)
                {
                    item.preferred_date = *preferred_date;
                    item.preferred_time = *preferred_time;
                }
            }
            Event::CartItemRemoved { id, customer_id } => {
                if let Some(mut cart) = self.carts.get_mut(customer_id) {
                    cart.retain(|i| i.id != *id);
                }
            }
            Event::GroupCreated { group, items } => {
                self.groups.insert(group.id, group.clone());
                self.carts.remove(&group.customer_id);
                for item in items {
                    if let Some(vs) = self.vendor_state(&item.vendor_id) {
                        vs.try_write()
                            .expect("replay: uncontended write")
                            .insert_booking(item.clone());
                    }
                    self.index_item(item);
                }
            }
            Event::ItemStatusChanged {
                id,
                vendor_id,
                status,
                stamped_at,
            } => {
                if let Some(vs) = self.vendor_state(vendor_id) {
                    let mut guard = vs.try_write().expect("replay: uncontended write");
                    if let Some(item) = guard.booking_mut(*id) {
                        apply_status(item, *status, *stamped_at);
                    }
                }
            }
            Event::GroupDeleted { id } => {
                if let Some((_, group)) = self.groups.remove(id) {
                    for item_id in &group.item_ids {
                        if let Some(vendor_id) = self.vendor_of_item(item_id)
                            && let Some(vs) = self.vendor_state(&vendor_id)
                        {
                            vs.try_write()
                                .expect("replay: uncontended write")
                                .remove_booking(*item_id);
                        }
                        self.unindex_item(*item_id, group.customer_id);
                    }
                }
            }
        }
    }
}
