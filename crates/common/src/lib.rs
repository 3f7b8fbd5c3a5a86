pub mod config;
pub mod error;
pub mod keyedmutex;
pub mod localcache;
pub mod redis;
pub mod score;
pub mod singleflight;
pub mod snowflake;
pub mod status;
pub mod types;

pub use config::Config;
pub use error::{is_unique_violation, Error, Result};
pub use keyedmutex::KeyedMutex;
pub use localcache::LocalCache;
pub use redis::RedisClient;
pub use singleflight::Singleflight;
pub use snowflake::IdGenerator;
pub use status::{ConsumeStatus, StatusBoard};
