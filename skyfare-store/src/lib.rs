pub mod app_config;
pub mod database;
pub mod events;
pub mod redis_repo;
pub mod settlement_repo;

pub use database::DbClient;
pub use events::EventProducer;
pub use redis_repo::RedisClient;
pub use settlement_repo::{PgSettlementStore, PgSettlementTx};
