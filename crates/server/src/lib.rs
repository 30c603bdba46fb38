#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! HTTP request surface for `mcall`: healthcheck, batch submission, and
//! optional basic authentication.

mod auth;
mod routes;

pub use auth::Credentials;
pub use routes::{AppState, router, serve};
