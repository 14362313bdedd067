pub mod app_context;
pub mod catalog;
pub mod startup;
