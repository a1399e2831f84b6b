//! kontor-protocol – Netzwerkprotokoll-Definitionen
//!
//! Dieses Crate definiert alle Ereignistypen die zwischen Kontor-Client
//! und Signaling-Server ausgetauscht werden, sowie das Wire-Format
//! (Laengenpraefix + JSON).

pub mod control;
pub mod wire;

pub use control::{ClientEvent, Notification, ServerEvent};
pub use wire::{ClientCodec, EventCodec, ServerCodec};
