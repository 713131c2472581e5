// HTTP handlers
pub mod instances;
