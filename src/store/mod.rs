pub mod filestore;
pub mod memory;
pub mod token;

pub use echocore::store::{KeyValueStore, Result, StoreError};
pub use filestore::FileStore;
pub use memory::MemoryStore;
pub use token::TokenStore;
