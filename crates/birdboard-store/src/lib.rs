//! Local SQLite cache for Birdboard.
//!
//! A [`Store`] owns the connection. All reads and writes go through
//! [`Store::read`] / [`Store::write`], which hand out a [`StoreTx`] bound to a
//! single transaction.

pub mod error;
pub mod metadata;
pub mod species;
mod store;
pub mod weather;

pub use error::StoreError;
pub use metadata::{keys, MetaValue};
pub use species::{ImagePair, NewSpecies, Species, SpeciesDetails};
pub use store::{Store, StoreTx};
