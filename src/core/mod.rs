pub mod filter;
pub mod hash;
pub mod matcher;
pub mod record;
pub mod store;
