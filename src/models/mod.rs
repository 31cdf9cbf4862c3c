pub mod booking;
pub mod payment_order;

pub use booking::{Booking, BookingStatus, PaymentStatus};
pub use payment_order::{BookingEffect, GatewayStatus, PaymentOrder};
