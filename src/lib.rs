pub mod archiver;
pub mod credentials;
pub mod error;
pub mod fetch;
pub mod params;
pub mod report;
pub mod signer;
pub mod store;
pub mod utils;
