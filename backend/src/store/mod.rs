mod sqlite;

pub use sqlite::{GatewayStore, StoreError};
