//! REST adapters and the services that ride along with them: the opaque
//! token service, auth middleware, the reminder scheduler, and the custom
//! command interpolator/executor.

pub mod apps;
pub mod auth;
pub mod bots;
pub mod channels;
pub mod commands;
pub mod error;
pub mod interpolate;
pub mod kanban;
pub mod messages;
pub mod middleware;
pub mod reactions;
pub mod reminders;
pub mod state;
pub mod token;
pub mod users;
pub mod webhooks;

pub use error::ApiError;
pub use state::{AppState, AppStateInner};
