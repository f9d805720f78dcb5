//! Domain models for finance-service.

mod fee_structure;
mod invoice;
mod numbering;
mod payment;

pub use fee_structure::{CreateFeeStructure, FeeStructure, UpdateFeeStructure};
pub use invoice::{
    derive_invoice_status, CreateInvoice, Invoice, InvoiceStatus, ListInvoicesFilter,
};
pub use numbering::{format_document_number, DocumentKind};
pub use payment::{
    CreatePayment, ListPaymentsFilter, Payment, PaymentMode, PaymentStatus,
};
