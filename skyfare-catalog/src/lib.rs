pub mod inventory;
pub mod pricing;

pub use inventory::{InventoryError, InventoryManager, StockKey};
pub use pricing::{PricedLine, PricingEngine, PricingError, Quote};
