//! Lock-free ring buffers that carry frames between threads without ever
//! blocking a producer.

mod cache_pad;
mod market_bus;
mod order_bus;

pub use cache_pad::CacheAligned;
pub use market_bus::{Consumer as MarketConsumer, MarketBus, Producer as MarketProducer, ReserveGuard};
pub use order_bus::{OrderBus, OrderBusConsumer, OrderBusProducer};
