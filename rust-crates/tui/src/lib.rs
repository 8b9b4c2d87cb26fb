pub use generated_abi::crash_types;

pub mod controller;
pub mod error;
pub mod ledger;
pub mod session;
pub mod timers;
pub mod wallets;
