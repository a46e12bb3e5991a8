pub mod config;
pub mod execution;
pub mod logging;
pub mod rate_limit;
pub mod tasks;
pub mod ws;

pub use config::{ExecutorConfig, RateLimitConfig, SessionConfig};
pub use execution::TradeExecutor;
pub use rate_limit::RateLimiter;
pub use tasks::TaskSupervisor;
pub use ws::SessionManager;
