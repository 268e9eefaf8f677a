//! Smart-HTTP git endpoint for per-app repositories: pkt-line framing,
//! a hand-rolled loose-object store, pack reading/writing, and the
//! store↔repository sync that keeps app code rows and `refs/heads/main`
//! in step.

pub mod http;
pub mod object;
pub mod pack;
pub mod pkt;
pub mod repo;

pub use http::{git_router, GitState};
pub use repo::Repository;
