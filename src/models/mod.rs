pub mod ai;
pub mod settings;
pub mod stock;
