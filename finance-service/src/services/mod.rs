pub mod database;
pub mod metrics;

pub use database::{Database, PaymentTotals};
pub use metrics::{get_metrics, init_metrics};
