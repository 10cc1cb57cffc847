pub mod config;
pub mod db;
pub mod error;
pub mod hub;
pub mod identity;
pub mod protocol;
pub mod rooms;
pub mod session;
pub mod store;

use axum::extract::FromRef;

pub use error::{ChatError, ChatResult};
pub use hub::Hub;
pub use session::{Session, SessionState};
pub use store::{SqliteStore, Store, StoreError};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub hub: Hub<SqliteStore>,
}
