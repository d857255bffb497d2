use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

/// Half-open range `[start, end)` on the local civil timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeRange {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        debug_assert!(start <= end, "TimeRange start must not be after end");
        Self { start, end }
    }

    /// Strict half-open intersection. Touching endpoints do not overlap,
    /// so back-to-back bookings are legal; zero-length ranges overlap
    /// nothing, including themselves.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

/// A catalog service operators seed into the marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub name: String,
    /// e.g. wash / detail / maintenance / repair
    pub category: String,
    /// Minor currency units.
    pub base_price_cents: i64,
    /// Default duration; an offering may override it.
    pub duration_min: u32,
    pub active: bool,
}

/// Contact card shared by customers and vendors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub fullname: String,
    pub contact_info: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub profile: Profile,
}

/// A vendor's price/duration for one catalog service. At most one offering
/// exists per (vendor, service) pair — it is keyed by service id inside
/// the vendor state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offering {
    pub service_id: Uuid,
    pub price_cents: i64,
    pub duration_min: u32,
    pub active: bool,
}

/// A desired appointment sitting in a customer's cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub vendor_id: Uuid,
    pub service_id: Uuid,
    pub preferred_date: NaiveDate,
    pub preferred_time: NaiveTime,
}

/// Lifecycle of a booking item. `Processing` is the initial state;
/// `CustomerConfirmed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemStatus {
    Processing,
    VendorDone,
    CustomerConfirmed,
    Cancelled,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Processing => "processing",
            ItemStatus::VendorDone => "vendor_done",
            ItemStatus::CustomerConfirmed => "customer_confirmed",
            ItemStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(ItemStatus::Processing),
            "vendor_done" => Some(ItemStatus::VendorDone),
            "customer_confirmed" => Some(ItemStatus::CustomerConfirmed),
            "cancelled" => Some(ItemStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the marketplace an authenticated caller acts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Customer,
    Vendor,
}

/// An authenticated caller: a role tag plus the profile id it acts as.
/// Mutations check the principal against the record's owning reference and
/// report a mismatch as not-found, never as forbidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub role: Role,
    pub id: Uuid,
}

/// Catalog values copied onto a booking item at checkout. Later offering or
/// service edits never alter historical bookings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub name: String,
    pub price_cents: i64,
    pub duration_min: u32,
}

/// One schedulable unit of work, owned by its booking group and indexed by
/// vendor and customer. `start_time`/`end_time` are derived at creation
/// (start = preferred date+time, end = start + snapshotted duration) and
/// are always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingItem {
    pub id: Uuid,
    pub group_id: Uuid,
    pub customer_id: Uuid,
    pub vendor_id: Uuid,
    pub service_id: Uuid,
    pub snapshot: ServiceSnapshot,
    pub preferred_date: NaiveDate,
    pub preferred_time: NaiveTime,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub status: ItemStatus,
    pub vendor_done_at: Option<NaiveDateTime>,
    pub confirmed_at: Option<NaiveDateTime>,
}

impl BookingItem {
    /// The span this item occupies on the vendor's calendar.
    pub fn occupancy(&self) -> TimeRange {
        TimeRange::new(self.start_time, self.end_time)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    Card,
    Cash,
    Wallet,
    External,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::Cash => "cash",
            PaymentMethod::Wallet => "wallet",
            PaymentMethod::External => "external",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "card" => Some(PaymentMethod::Card),
            "cash" => Some(PaymentMethod::Cash),
            "wallet" => Some(PaymentMethod::Wallet),
            "external" => Some(PaymentMethod::External),
            _ => None,
        }
    }
}

/// Payment is a record, not a workflow: the total of the item price
/// snapshots and the chosen method, fixed at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub total_cents: i64,
    pub method: PaymentMethod,
}

/// One checkout transaction. Items are created with the group and only die
/// with it (cascade delete); the contact snapshot freezes the customer's
/// profile as it was at booking time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingGroup {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub contact_snapshot: Profile,
    pub payment: Payment,
    pub item_ids: Vec<Uuid>,
    pub created_at: NaiveDateTime,
}

/// Per-vendor live state: profile, offerings keyed by service id, and the
/// vendor's booking items sorted by `start_time`.
#[derive(Debug, Clone)]
pub struct VendorState {
    pub id: Uuid,
    pub profile: Profile,
    pub offerings: std::collections::HashMap<Uuid, Offering>,
    pub bookings: Vec<BookingItem>,
}

impl VendorState {
    pub fn new(id: Uuid, profile: Profile) -> Self {
        Self {
            id,
            profile,
            offerings: std::collections::HashMap::new(),
            bookings: Vec::new(),
        }
    }

    /// Insert keeping the list sorted by `start_time`.
    pub fn insert_booking(&mut self, item: BookingItem) {
        let pos = self
            .bookings
            .binary_search_by_key(&item.start_time, |b| b.start_time)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, item);
    }

    pub fn remove_booking(&mut self, id: Uuid) -> Option<BookingItem> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Uuid) -> Option<&BookingItem> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Uuid) -> Option<&mut BookingItem> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Items whose `start_time` falls on `date`, cancelled ones excluded.
    /// Binary search skips everything before the day.
    pub fn bookings_on(&self, date: NaiveDate) -> impl Iterator<Item = &BookingItem> {
        let day_start = date.and_time(NaiveTime::MIN);
        let lo = self.bookings.partition_point(|b| b.start_time < day_start);
        self.bookings[lo..]
            .iter()
            .take_while(move |b| b.start_time.date() == date)
            .filter(|b| b.status != ItemStatus::Cancelled)
    }
}

/// WAL record format — flat, one variant per state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ServiceSeeded {
        service: Service,
    },
    ServiceRetired {
        id: Uuid,
    },
    CustomerUpserted {
        id: Uuid,
        profile: Profile,
    },
    VendorUpserted {
        id: Uuid,
        profile: Profile,
    },
    OfferingUpserted {
        vendor_id: Uuid,
        offering: Offering,
    },
    OfferingRemoved {
        vendor_id: Uuid,
        service_id: Uuid,
    },
    CartItemAdded {
        item: CartItem,
    },
    CartItemRescheduled {
        id: Uuid,
        customer_id: Uuid,
        preferred_date: NaiveDate,
        preferred_time: NaiveTime,
    },
    CartItemRemoved {
        id: Uuid,
        customer_id: Uuid,
    },
    GroupCreated {
        group: BookingGroup,
        items: Vec<BookingItem>,
    },
    ItemStatusChanged {
        id: Uuid,
        vendor_id: Uuid,
        status: ItemStatus,
        stamped_at: Option<NaiveDateTime>,
    },
    GroupDeleted {
        id: Uuid,
    },
}

// ── Query result types ───────────────────────────────────────────

/// A vendor offering joined with its catalog service name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OfferingInfo {
    pub service_id: Uuid,
    pub service_name: String,
    pub price_cents: i64,
    pub duration_min: u32,
    pub active: bool,
}

fn serialize_hhmm<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&t.format("%H:%M").to_string())
}

/// One grid slot. Ephemeral — computed per query, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Slot {
    #[serde(serialize_with = "serialize_hhmm")]
    pub time: NaiveTime,
    pub is_available: bool,
}

/// Result of a slot query. Serializes to the wire JSON contract:
/// `{"vendor_id", "service_id", "date", "slots": [{"time", "is_available"}]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotDay {
    pub vendor_id: Uuid,
    pub service_id: Uuid,
    pub date: NaiveDate,
    pub slots: Vec<Slot>,
}
