mod institution;

pub use institution::InstitutionContext;
