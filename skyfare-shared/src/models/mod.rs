pub mod events;

pub use events::{OrderFailedEvent, OrderPaidEvent, ORDER_FAILED_TOPIC, ORDER_PAID_TOPIC};
