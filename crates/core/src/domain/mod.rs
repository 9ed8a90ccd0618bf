pub mod attack;
pub mod contract;
