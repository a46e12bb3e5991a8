//! Exchange WebSocket connectivity: wire decoding, typed market caches,
//! subscription fan-out, and the session that ties them together.

pub mod dispatch;
pub mod events;
pub mod session;
pub mod state;

pub use dispatch::{CallbackRegistry, EventCallback, SubscriptionKey};
pub use events::{Channel, EventError, MarketEvent, TickerPayload, TradeRecord, TradeSide};
pub use session::{
    ConnectionState, NetworkConnectionMetrics, PerformanceMetrics, SessionManager, WsError,
};
pub use state::{MarketCache, PairOrderBook, PairStatus, TickerSnapshot};
