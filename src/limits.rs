//! Hard input bounds. Every limit maps to a `LimitExceeded` error; none of
//! them are configurable at runtime.

/// Longest accepted service/profile name.
pub const MAX_NAME_LEN: usize = 200;

/// Longest accepted free-text field (contact info, address, category).
pub const MAX_TEXT_LEN: usize = 255;

/// Catalog size cap per tenant.
pub const MAX_SERVICES: usize = 10_000;

/// Cart entries per customer; also the largest possible booking group.
pub const MAX_CART_ITEMS: usize = 50;

/// Booking items a single vendor can hold.
pub const MAX_BOOKINGS_PER_VENDOR: usize = 100_000;

/// Offerings a single vendor can register.
pub const MAX_OFFERINGS_PER_VENDOR: usize = 500;

/// Service/offering duration cap — one full day.
pub const MAX_DURATION_MIN: u32 = 1_440;

/// Price cap in minor units (guards against accidental overflow input).
pub const MAX_PRICE_CENTS: i64 = 100_000_000;

/// Accepted scheduling horizon for preferred dates.
pub const MIN_SCHEDULE_YEAR: i32 = 2000;
pub const MAX_SCHEDULE_YEAR: i32 = 2100;

/// Booking list pagination.
pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 200;

/// Tenant registry bounds.
pub const MAX_TENANTS: usize = 64;
pub const MAX_TENANT_NAME_LEN: usize = 128;
