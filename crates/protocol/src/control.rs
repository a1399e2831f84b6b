//! Signalisierungs-Protokoll
//!
//! Definiert alle Ereignisse die ueber den Duplex-Kanal zwischen Client
//! und Signaling-Server ausgetauscht werden.
//!
//! ## Design
//! - Request/Response-Paare tragen eine `request_id: u32` zur Zuordnung
//! - JSON-Serialisierung via serde (Signalisierung, nicht zeitkritisch)
//! - Tagged Enums fuer typsichere Ereignistypen
//! - Unbekannte Ereignis- und Notification-Typen werden toleriert
//!   (Vorwaertskompatibilitaet) statt die Verbindung zu beenden

use kontor_core::types::{CallId, ConnectionId, UserId};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Status-Konstanten
// ---------------------------------------------------------------------------

/// Auth-Ack-Status bei erfolgreicher Authentifizierung.
/// Jeder andere Wert gilt als Fehlschlag.
pub const AUTH_STATUS_AUTHENTIFIZIERT: &str = "authenticated";

/// Antwort-Status einer angenommenen Anruf-Annahme.
/// Jeder andere Wert gilt als Fehlschlag.
pub const ANRUF_STATUS_ANGENOMMEN: &str = "ACCEPTED";

// ---------------------------------------------------------------------------
// Notification-Payload (Server -> Client)
// ---------------------------------------------------------------------------

/// Notification-Ereignisse, diskriminiert ueber das `type`-Feld
///
/// Der Server sendet neben den Anruf-Typen auch Task-Notifications die
/// dieses Subsystem nicht betreffen; diese landen in `Unbekannt` und
/// werden beim Dispatch verworfen.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all_fields = "camelCase")]
pub enum Notification {
    /// Eingehender Anruf – startet die Verhandlung auf Empfaengerseite
    IncomingCall {
        call_id: CallId,
        caller_id: UserId,
        caller_name: Option<String>,
    },
    /// Gegenseite hat einen ausgehenden Anruf angenommen
    CallAccepted {
        call_id: CallId,
        meeting_link: Option<String>,
    },
    /// Antwort-Ereignis auf einen ausgehenden Anruf (aequivalent zu
    /// `CallAccepted`, aelterer Server-Ereignisname)
    CallResponse {
        call_id: CallId,
        meeting_link: Option<String>,
    },
    /// Laufender Anruf wurde beendet
    CallEnded { call_id: CallId },
    /// Ausgehender Anruf wurde serverseitig nicht beantwortet
    CallTimeout { call_id: CallId },
    /// Gegenseite hat den Anruf abgebrochen bevor er zustande kam
    CallCancelled { call_id: CallId },
    /// Unbekannter Notification-Typ – wird ignoriert
    #[serde(other)]
    Unbekannt,
}

// ---------------------------------------------------------------------------
// Client -> Server
// ---------------------------------------------------------------------------

/// Ereignisse die der Client an den Server sendet
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// Authentifizierungs-Handshake; wird mit `AuthAck` beantwortet
    Auth { request_id: u32, token: String },
    /// Anruf starten (fire-and-forget, keine Antwort)
    CallInitiate { receiver_id: UserId },
    /// Remote-Prozedur: Anruf annehmen oder ablehnen;
    /// wird mit `CallAnswerResponse` beantwortet
    CallAnswer {
        request_id: u32,
        call_id: CallId,
        accept: bool,
    },
}

// ---------------------------------------------------------------------------
// Server -> Client
// ---------------------------------------------------------------------------

/// Ereignisse die der Server an den Client sendet
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Begruessung nach dem Transport-Connect, traegt die opake
    /// Verbindungs-ID (nur Diagnose)
    Welcome { connection_id: ConnectionId },
    /// Antwort auf `ClientEvent::Auth`
    AuthAck {
        request_id: u32,
        status: String,
        message: Option<String>,
    },
    /// Notification-Fanout (Anruf- und Task-Ereignisse)
    Notification { payload: Notification },
    /// Vollstaendiger Praesenz-Schnappschuss – ersetzt den lokalen
    /// Zustand komplett, nie ein Delta
    ConnectedUsers { user_ids: Vec<UserId> },
    /// Antwort auf `ClientEvent::CallAnswer`
    CallAnswerResponse {
        request_id: u32,
        id: CallId,
        status: String,
        meeting_link: Option<String>,
    },
    /// Unbekannter Ereignistyp – wird ignoriert
    #[serde(other)]
    Unbekannt,
}

impl ServerEvent {
    /// Erstellt ein erfolgreiches Auth-Ack
    pub fn auth_ok(request_id: u32) -> Self {
        Self::AuthAck {
            request_id,
            status: AUTH_STATUS_AUTHENTIFIZIERT.to_string(),
            message: None,
        }
    }

    /// Erstellt ein fehlgeschlagenes Auth-Ack
    pub fn auth_fehler(request_id: u32, status: impl Into<String>, message: &str) -> Self {
        Self::AuthAck {
            request_id,
            status: status.into(),
            message: Some(message.to_string()),
        }
    }

    /// Erstellt eine angenommene `CallAnswerResponse` mit Meeting-Link
    pub fn anruf_angenommen(request_id: u32, call_id: CallId, meeting_link: &str) -> Self {
        Self::CallAnswerResponse {
            request_id,
            id: call_id,
            status: ANRUF_STATUS_ANGENOMMEN.to_string(),
            meeting_link: Some(meeting_link.to_string()),
        }
    }

    /// Erstellt eine abgelehnte/fehlgeschlagene `CallAnswerResponse`
    pub fn anruf_abgewiesen(request_id: u32, call_id: CallId, status: impl Into<String>) -> Self {
        Self::CallAnswerResponse {
            request_id,
            id: call_id,
            status: status.into(),
            meeting_link: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
