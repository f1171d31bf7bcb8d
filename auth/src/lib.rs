//! # Courier Auth
//!
//! Client for the external auth gateway. The notification gateway uses
//! [`AuthClient`] as its [`TokenValidator`](courier_core::identity::TokenValidator)
//! to turn `Authorization: Bearer` tokens into user ids.
//!
//! Contract (JSON over HTTP):
//!
//! | Call | Request | Response |
//! |------|---------|----------|
//! | `POST /auth/validate` | `{token}` | `{success, user_id, role}` |
//! | `POST /auth/login` | `{email, password}` | `{token}` |
//! | `POST /auth/register` | `{email, password}` | `{success}` |

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;

pub use client::AuthClient;
pub use courier_core::identity::{AuthError, Identity};
