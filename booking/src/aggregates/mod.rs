//! Pure reducers for capacity, reservations, and payments.

pub mod capacity;
pub mod payment;
pub mod reservation;

pub use capacity::{CapacityAction, CapacityEnvironment, CapacityReducer};
pub use payment::{ChargeOutcome, PaymentAction, PaymentEnvironment, PaymentReducer, PaymentState};
pub use reservation::{
    ReservationAction, ReservationEnvironment, ReservationReducer, ReservationState,
};
