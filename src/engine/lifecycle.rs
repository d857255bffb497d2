use crate::model::{ItemStatus, Role};

use super::EngineError;

/// Timestamp side effect of an accepted transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stamp {
    None,
    VendorDone,
    Confirmed,
}

/// The booking-item state machine, keyed on (role, current, requested):
///
/// ```text
/// processing --vendor--> vendor_done --customer--> customer_confirmed
/// processing --vendor--> cancelled
/// processing --customer--> cancelled
/// vendor_done --customer--> cancelled
/// ```
///
/// `customer_confirmed` and `cancelled` are terminal. Everything outside
/// the table is rejected; callers verify ownership separately before
/// asking for a transition.
pub fn transition(
    role: Role,
    current: ItemStatus,
    requested: ItemStatus,
) -> Result<Stamp, EngineError> {
    use ItemStatus::*;
    match (role, current, requested) {
        (Role::Vendor, Processing, VendorDone) => Ok(Stamp::VendorDone),
        (Role::Vendor, Processing, Cancelled) => Ok(Stamp::None),
        (Role::Customer, VendorDone, CustomerConfirmed) => Ok(Stamp::Confirmed),
        (Role::Customer, Processing, Cancelled) => Ok(Stamp::None),
        (Role::Customer, VendorDone, Cancelled) => Ok(Stamp::None),
        _ => Err(EngineError::InvalidTransition {
            from: current,
            requested,
        }),
    }
}
