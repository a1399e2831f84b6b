//! Kompositionswurzel des Signalisierungs-Clients
//!
//! Verdrahtet Verbindung, Praesenz-Tracker, Anruf-Manager und
//! Wiederverbindungs-Politik. Der einbettende Prozess erstellt genau
//! eine Instanz und injiziert Credential-Quelle und Host-Kommandos.

use std::sync::Arc;

use crate::auth::CredentialSpeicher;
use crate::call::{AnrufKommandos, AnrufManager};
use crate::config::SignalingConfig;
use crate::connection::Verbindung;
use crate::error::SignalingResult;
use crate::presence::PraesenzTracker;
use crate::reconnect::WiederverbindungsPolitik;

/// Vollstaendig verdrahteter Signalisierungs-Client
pub struct SignalingClient<S: CredentialSpeicher> {
    verbindung: Arc<Verbindung<S>>,
    praesenz: PraesenzTracker,
    anrufe: AnrufManager<Verbindung<S>>,
    wiederverbindung: WiederverbindungsPolitik<S>,
}

impl<S: CredentialSpeicher> SignalingClient<S> {
    /// Verdrahtet alle Komponenten (noch ohne Transport)
    pub fn neu(
        config: SignalingConfig,
        speicher: Arc<S>,
        kommandos: Arc<dyn AnrufKommandos>,
    ) -> Self {
        let verbindung = Verbindung::neu(config, speicher);
        let praesenz = PraesenzTracker::neu(verbindung.praesenz());
        let anrufe = AnrufManager::neu(
            Arc::clone(&verbindung),
            kommandos,
            verbindung.benachrichtigungen(),
        );
        let wiederverbindung = WiederverbindungsPolitik::neu(Arc::clone(&verbindung));

        Self {
            verbindung,
            praesenz,
            anrufe,
            wiederverbindung,
        }
    }

    /// Baut die Verbindung auf und startet die Wiederverbindungs-Schleife
    ///
    /// Schlaegt der erste Aufbau fehl, uebernimmt die Automatik; der
    /// Fehler wird trotzdem gemeldet damit der Host ihn anzeigen kann.
    pub async fn starten(&self) -> SignalingResult<()> {
        self.wiederverbindung.starten();
        self.verbindung.verbinden().await
    }

    /// Faehrt den Client herunter: Automatik stoppen, laufende
    /// Verhandlung verwerfen, Transport trennen
    pub fn stoppen(&self) {
        self.wiederverbindung.stoppen();
        self.anrufe.zuruecksetzen();
        self.verbindung.trennen();
    }

    /// Zugriff auf den Verbindungs-Manager
    pub fn verbindung(&self) -> &Arc<Verbindung<S>> {
        &self.verbindung
    }

    /// Zugriff auf den Praesenz-Tracker
    pub fn praesenz(&self) -> &PraesenzTracker {
        &self.praesenz
    }

    /// Zugriff auf den Anruf-Manager
    pub fn anrufe(&self) -> &AnrufManager<Verbindung<S>> {
        &self.anrufe
    }

    /// Zugriff auf die Wiederverbindungs-Politik
    pub fn wiederverbindung(&self) -> &WiederverbindungsPolitik<S> {
        &self.wiederverbindung
    }

    /// Prueft ob der Transport steht
    pub fn ist_verbunden(&self) -> bool {
        self.verbindung.ist_verbunden()
    }

    /// Prueft ob der Handshake erfolgreich war
    pub fn ist_authentifiziert(&self) -> bool {
        self.verbindung.ist_authentifiziert()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StatischerSpeicher;
    use crate::call::KeineKommandos;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn starten_und_stoppen() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let adresse = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut offene = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                offene.push(stream);
            }
        });

        let mut config = SignalingConfig::default();
        config.netzwerk.server_adresse = adresse.ip().to_string();
        config.netzwerk.server_port = adresse.port();

        let client = SignalingClient::neu(
            config,
            Arc::new(StatischerSpeicher::leer()),
            Arc::new(KeineKommandos),
        );

        client.starten().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(client.ist_verbunden());
        assert!(client.praesenz().laedt());
        assert!(client.anrufe().aktueller_anruf().is_none());

        client.stoppen();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!client.ist_verbunden());
    }
}
