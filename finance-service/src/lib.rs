//! finance-service: fee invoicing and payment reconciliation for a
//! multi-institution school management platform.
//!
//! Core responsibilities: sequential invoice/payment numbering per
//! (institution, month), payment-to-invoice balance reconciliation under a
//! row lock, and derived invoice status.

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
