//! Delivery backends for Zapline.
//!
//! Currently one real backend: the WhatsApp Business Cloud API. The engine
//! only sees the `Transport` trait from `zapline-core`.

pub mod whatsapp;

pub use whatsapp::WhatsAppTransport;
