//! Kontor Signalisierung – Praesenz & Anruf-Verhandlung
//!
//! Client-Subsystem fuer das virtuelle Buero: haelt genau einen
//! Duplex-Kanal zum Signaling-Server, spiegelt die Online-Liste und
//! verhandelt Anrufe bis zum Meeting-Link. Die eigentliche Medien-
//! Sitzung findet ausserhalb statt (externes Meeting per Link).
//!
//! ## Architektur
//!
//! ```text
//!                 +------------------------+
//!                 |    SignalingClient     |  Kompositionswurzel
//!                 +-----------+------------+
//!                             |
//!        +--------------------+--------------------+
//!        |                    |                    |
//!        v                    v                    v
//! +-------------+    +----------------+   +------------------+
//! | Verbindung  |    | AnrufManager   |   | Wiederverbindung |
//! | (Duplex-    |    | (State Machine |   | (Automatik +     |
//! |  Kanal)     |    |  1 Verhandlung)|   |  manuell)        |
//! +------+------+    +----------------+   +------------------+
//!        |
//!        |  Registry<Notification> / Registry<Vec<UserId>>
//!        v
//! +-----------------+
//! | PraesenzTracker |  Schnappschuss-Spiegel der Online-Liste
//! +-----------------+
//! ```
//!
//! Transport: TCP mit laengenpraefixierten JSON-Frames
//! (`kontor-protocol`). Ereignis-Fan-out im Prozess ueber
//! [`registry::Registry`], Anruf-Ereignisse fuer die UI ueber einen
//! tokio-Broadcast.

pub mod auth;
pub mod call;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod presence;
pub mod reconnect;
pub mod registry;

pub use auth::{CredentialSpeicher, StatischerSpeicher};
pub use call::{
    Anruf, AnrufEreignis, AnrufKommandos, AnrufManager, AnrufRolle, AnrufZustand, KeineKommandos,
};
pub use client::SignalingClient;
pub use config::SignalingConfig;
pub use connection::{
    AnrufAntwort, LebenszyklusEreignis, SignalKanal, Verbindung, VerbindungsZustand,
};
pub use error::{SignalingError, SignalingResult};
pub use presence::PraesenzTracker;
pub use reconnect::WiederverbindungsPolitik;
pub use registry::{Abo, Registry};
