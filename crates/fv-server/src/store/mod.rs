//! Process state stores: the durable user document and the in-memory
//! session and invite tables.

pub mod invites;
pub mod sessions;
pub mod users;
