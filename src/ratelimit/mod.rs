//! Rate limiting logic and state management.

mod clock;
mod global;
mod key;
mod limiter;
mod memory;
mod policy;
mod redis_store;
mod store;
mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use global::{check, check_sync, global_limiter};
pub use key::RateLimitKey;
pub use limiter::{RateLimitResult, RateLimiter};
pub use memory::MemoryStore;
pub use policy::{Preset, RateLimitConfig};
pub use redis_store::{RedisStore, DEFAULT_KEY_PREFIX};
pub use store::CounterStore;
pub use window::Window;
