//! Crate root for the control plane binary. Kept thin: module
//! declarations plus a `prelude` the binary imports from so `main.rs`
//! doesn't have to know the module layout.

pub mod config;
pub mod handlers;
pub mod kernel;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;

pub mod prelude {
    pub use crate::config::Config;
    pub use crate::kernel::Kernel;
    pub use crate::state::{AppState, SystemMode};
}
