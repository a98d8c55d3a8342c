pub mod analyze;
pub mod contract;
pub mod decision;
