//! WhatsApp Cloud API adapters: outbound client and inbound webhook.

pub mod client;
pub mod types;
pub mod webhook;

pub use client::CloudApiClient;
pub use webhook::{router, WebhookState};
