//! crudgate - access control for CRUD channels
//!
//! Decides whether clients of a real-time data-synchronization server may
//! create, read, update and delete resources, subscribe to the channels that
//! carry them, and receive the data broadcast on those channels.

pub mod authz;
pub mod errors;
pub mod settings;
