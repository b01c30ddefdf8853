pub mod chat;
pub mod escrow;
pub mod identity;
pub(crate) mod locks;
pub mod verification;
