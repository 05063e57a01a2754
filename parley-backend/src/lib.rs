//! Identity and chat-store backends for parley
//!
//! The conversation manager talks to two remote collaborators: an identity
//! service that knows who is signed in, and a row store that keeps chat
//! threads and their messages. Both are defined as traits here, together
//! with a Supabase implementation (GoTrue auth + PostgREST tables).

pub mod auth;
pub mod base;
pub mod client;
pub mod store;

pub use base::{
    AuthSession, AuthUser, BackendError, BackendResult, ChatStore, IdentityProvider,
    MessageRecord, NewMessage, SignUpOutcome,
};
pub use client::SupabaseClient;
