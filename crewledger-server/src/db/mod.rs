//! Queries shared by the SMS pipeline and the dashboard
//!
//! Handlers that only read for a single view keep their SQL inline; anything
//! written from more than one place lives here.

pub mod conversation;
pub mod documents;
pub mod employees;
pub mod receipts;
pub mod users;

pub use conversation::{ConversationState, StateTarget};
pub use users::CurrentUser;
