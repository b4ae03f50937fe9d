//! Domain types for the perpetual-futures simulator

pub mod ids;
pub mod market;
pub mod order;
pub mod position;
pub mod trade;

pub use ids::{IdGen, OrderId, TradeId};
pub use market::{
    DataKind, DepthUpdate, FundingRate, Kline, MarketDataPoint, MarketPayload, OpenInterest,
    PriceLevel, TradePrint,
};
pub use order::{
    OrderAuditEntry, OrderEvent, OrderRequest, OrderSide, OrderStatus, OrderType, SimulatedOrder,
};
pub use position::{LiquidationEvent, MarginMode, Position};
pub use trade::Trade;

/// Symbol type alias
pub type Symbol = String;
