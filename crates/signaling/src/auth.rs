//! Authentifizierungs-Handshake
//!
//! Direkt nach dem Transport-Aufbau sendet der Client ein
//! `Auth`-Ereignis mit dem gespeicherten Token und wartet auf das Ack.
//! Nur der Status `authenticated` schaltet die Verbindung frei; jeder
//! andere Status, ein Zeitlimit oder ein Transportfehler fuehrt zum
//! vollstaendigen Trennen (kein teil-authentifizierter Zustand).
//!
//! Ohne gespeichertes Token bleibt die Verbindung bestehen, aber
//! unauthentifiziert: eingehender Verkehr wird verworfen bis ein
//! Neuaufbau mit Token erfolgt.

use std::sync::Arc;

use kontor_protocol::control::{ClientEvent, ServerEvent, AUTH_STATUS_AUTHENTIFIZIERT};

use crate::connection::Verbindung;

// ---------------------------------------------------------------------------
// CredentialSpeicher
// ---------------------------------------------------------------------------

/// Quelle des Auth-Tokens
///
/// Trait-Naht zum Host: der Prozess der dieses Subsystem einbettet
/// entscheidet wo das Token herkommt (Keychain, Session-Datei, ...).
pub trait CredentialSpeicher: Send + Sync + 'static {
    /// Gibt das aktuelle Token zurueck, falls eines hinterlegt ist
    fn token(&self) -> Option<String>;
}

/// Einfachster Speicher: haelt ein festes Token im Arbeitsspeicher
pub struct StatischerSpeicher {
    token: parking_lot::Mutex<Option<String>>,
}

impl StatischerSpeicher {
    /// Speicher mit hinterlegtem Token
    pub fn mit_token(token: impl Into<String>) -> Self {
        Self {
            token: parking_lot::Mutex::new(Some(token.into())),
        }
    }

    /// Speicher ohne Token (unauthentifizierter Betrieb)
    pub fn leer() -> Self {
        Self {
            token: parking_lot::Mutex::new(None),
        }
    }

    /// Ersetzt das hinterlegte Token
    pub fn token_setzen(&self, token: Option<String>) {
        *self.token.lock() = token;
    }
}

impl CredentialSpeicher for StatischerSpeicher {
    fn token(&self) -> Option<String> {
        self.token.lock().clone()
    }
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// Fuehrt den Auth-Handshake auf der frisch aufgebauten Verbindung aus
///
/// Laeuft als eigener Task, damit die Connect-Meldung an die
/// Lifecycle-Observer nicht auf das Ack warten muss.
pub(crate) async fn handshake_ausfuehren<S: CredentialSpeicher>(verbindung: Arc<Verbindung<S>>) {
    let token = match verbindung.speicher().token() {
        Some(t) => t,
        None => {
            tracing::info!("Kein Token hinterlegt, Verbindung bleibt unauthentifiziert");
            return;
        }
    };

    let zeitlimit = verbindung.config().handshake_timeout();
    let anfrage = verbindung.anfragen(move |request_id| ClientEvent::Auth { request_id, token });

    let ack = match tokio::time::timeout(zeitlimit, anfrage).await {
        Ok(Ok(ack)) => ack,
        Ok(Err(e)) => {
            tracing::warn!(fehler = %e, "Auth-Handshake abgebrochen");
            verbindung.authentifiziert_setzen(false);
            verbindung.trennen();
            return;
        }
        Err(_) => {
            tracing::warn!(
                zeitlimit_sek = zeitlimit.as_secs(),
                "Kein Auth-Ack innerhalb des Zeitlimits, trenne Verbindung"
            );
            verbindung.authentifiziert_setzen(false);
            verbindung.trennen();
            return;
        }
    };

    match ack {
        ServerEvent::AuthAck {
            status, message, ..
        } => {
            if status == AUTH_STATUS_AUTHENTIFIZIERT {
                verbindung.authentifiziert_setzen(true);
                tracing::info!("Authentifizierung erfolgreich");
            } else {
                tracing::warn!(
                    status = %status,
                    meldung = message.as_deref().unwrap_or("-"),
                    "Server hat die Authentifizierung abgelehnt, trenne Verbindung"
                );
                verbindung.authentifiziert_setzen(false);
                verbindung.trennen();
            }
        }
        other => {
            tracing::warn!(antwort = ?other, "Unerwartete Antwort auf Auth, trenne Verbindung");
            verbindung.authentifiziert_setzen(false);
            verbindung.trennen();
        }
    }
}
