//! Relay sessions: the token-keyed registry mapping a short code typed by a
//! human to a live tmux target.

pub mod store;
pub mod token;
pub mod types;

pub use store::{
    register_session, FileSessionStore, InMemorySessionStore, SessionStore, StoreError,
};
pub use token::{generate_token, is_lookup_token, is_valid_token};
pub use types::*;
