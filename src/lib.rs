mod backend;
mod config;
mod errors;
mod event;
mod key;
mod store;
mod watcher;
mod watcher_manager;

pub use backend::*;
pub use config::*;
pub use errors::*;
pub use event::*;
pub use key::*;
pub use store::*;
pub use watcher::*;
pub use watcher_manager::*;
