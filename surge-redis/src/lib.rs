//! Redis protocol support: a fixed pool of multiplexed connections, the
//! command adapter, and the read-percent workload factory.

pub mod adapter;
pub mod config;
pub mod factory;
pub mod pool;

pub use adapter::RedisAdapter;
pub use config::RedisConfig;
pub use factory::RedisOperationFactory;
pub use pool::RedisConnectionPool;
