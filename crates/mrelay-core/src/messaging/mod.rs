//! Outbound messaging abstractions (WhatsApp Cloud API today).

pub mod port;

pub use port::{MediaUpload, OutboundPort};
