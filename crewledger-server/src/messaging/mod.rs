//! SMS conversation handling
//!
//! Inbound webhook messages flow through [`router::route_message`], which
//! looks up the sender, consults their conversation state and either answers
//! directly or hands media to [`intake::Intake`].

pub mod i18n;
pub mod intake;
pub mod router;
pub mod twiml;

pub use intake::Intake;
pub use router::{route_message, InboundMedia, InboundMessage};
