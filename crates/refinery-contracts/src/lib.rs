pub mod credentials;
pub mod diagnostic;
pub mod domains;
pub mod error;
pub mod events;
pub mod library;
pub mod stage;
pub mod store;
