pub mod error;
pub mod rows;
pub mod schema;
pub mod store;

pub use error::{Result, StoreError};
pub use schema::init_db;
pub use store::Store;
