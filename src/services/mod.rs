// src/services/mod.rs

pub mod access;
pub mod catalog;
pub mod exam;

pub use catalog::CatalogService;
pub use exam::ExamService;
