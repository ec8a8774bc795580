pub mod backfill;
pub mod components;
pub mod engine;
pub mod identity;
pub mod lifecycle;
pub mod normalizer;
pub mod store;
pub mod tax;
pub mod workbook;
