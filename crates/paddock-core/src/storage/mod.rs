pub mod locks;
pub mod schema;
pub mod store;

pub use locks::RaceLocks;
pub use store::Store;
