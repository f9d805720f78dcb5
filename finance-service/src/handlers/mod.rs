//! HTTP handlers, all scoped to the acting institution.

pub mod fee_structures;
pub mod invoices;
pub mod payments;
pub mod reports;
