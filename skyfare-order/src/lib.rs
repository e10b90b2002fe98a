pub mod fulfillment;
pub mod memory;
pub mod orchestrator;
pub mod settlement;

pub use fulfillment::TicketIssuer;
pub use memory::{InMemorySettlementStore, InMemoryStoreBuilder};
pub use orchestrator::{MockPaymentAuthorizer, PaymentOrchestrator};
pub use settlement::{SettlementOrchestrator, SettlementPolicy, SettlementService};
