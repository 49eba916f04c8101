pub mod attribution;
pub mod cost_drivers;
pub mod insights;
