//! Request cost estimation.
//!
//! [`CostTable`] turns a request kind and size into abstract cost units before
//! the request runs. [`CostEstimator`] measures how long served requests
//! actually took and derives the server's total recharge rate from it.

pub mod constants;
mod estimator;
mod table;

pub use estimator::CostEstimator;
pub use table::{CostTable, RequestCost, RequestKind};
