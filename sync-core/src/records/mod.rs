mod balance;
mod order;
mod position;
mod ticker;
mod trade;

pub use balance::{Balance, BalanceUpdate};
pub use order::{Fee, Order, OrderStatus};
pub use position::Position;
pub use ticker::Ticker;
pub use trade::Trade;
