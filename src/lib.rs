pub mod audit;
pub mod blob;
pub mod config;
pub mod consent;
pub mod custody;
pub mod digest;
pub mod error;
pub mod events;
pub mod identity;
pub mod ledger;

pub use error::CustodyError;
