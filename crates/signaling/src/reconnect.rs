//! Wiederverbindungs-Politik
//!
//! Zwei Wege zurueck zum Server:
//! - Automatisch: eine Schleife prueft im festen Intervall ob der
//!   Transport steht und verbindet sonst neu (kein Backoff, das
//!   Intervall ist bewusst konstant)
//! - Manuell: Trennen, kurze Settle-Pause damit der alte Transport
//!   vollstaendig abgebaut ist, dann Neuaufbau
//!
//! Waehrend eines manuellen Versuchs pausiert die Automatik, damit
//! nicht zwei Verbindungsaufbauten gleichzeitig laufen. Ein Watchdog
//! setzt den Indikator zurueck falls der manuelle Versuch haengt.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::auth::CredentialSpeicher;
use crate::connection::{LebenszyklusEreignis, Verbindung};
use crate::error::SignalingResult;
use crate::registry::Abo;

/// Automatische und manuelle Wiederverbindung fuer eine `Verbindung`
pub struct WiederverbindungsPolitik<S: CredentialSpeicher> {
    verbindung: Arc<Verbindung<S>>,
    /// Gesetzt waehrend ein manueller Versuch laeuft
    manuell: Arc<AtomicBool>,
    /// Schutz gegen doppelte Schleifen-Tasks
    gestartet: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    _abo: Abo<LebenszyklusEreignis>,
}

impl<S: CredentialSpeicher> WiederverbindungsPolitik<S> {
    /// Erstellt die Politik (Schleife startet erst mit `starten()`)
    pub fn neu(verbindung: Arc<Verbindung<S>>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);

        let abo = verbindung.lebenszyklus_abonnieren("wiederverbindung", |ereignis| {
            if *ereignis == LebenszyklusEreignis::Getrennt {
                tracing::info!("Transport weg, automatische Wiederverbindung uebernimmt");
            }
        });

        Self {
            verbindung,
            manuell: Arc::new(AtomicBool::new(false)),
            gestartet: AtomicBool::new(false),
            shutdown_tx,
            _abo: abo,
        }
    }

    /// Startet die automatische Wiederverbindungs-Schleife
    ///
    /// Idempotent: solange die Schleife laeuft, ist ein weiterer
    /// Aufruf ein No-op.
    pub fn starten(&self) {
        if self.gestartet.swap(true, Ordering::SeqCst) {
            tracing::debug!("Wiederverbindungs-Schleife laeuft bereits");
            return;
        }

        let verbindung = Arc::clone(&self.verbindung);
        let manuell = Arc::clone(&self.manuell);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let intervall = verbindung.config().wiederverbindung_intervall();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(intervall) => {}
                    Ok(()) = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                if verbindung.ist_verbunden() || manuell.load(Ordering::SeqCst) {
                    continue;
                }

                tracing::debug!("Automatischer Wiederverbindungsversuch");
                if let Err(e) = verbindung.verbinden().await {
                    // Server nicht erreichbar ist der Normalfall hier,
                    // daher nur debug
                    tracing::debug!(fehler = %e, "Wiederverbindungsversuch fehlgeschlagen");
                }
            }
            tracing::debug!("Wiederverbindungs-Schleife beendet");
        });
    }

    /// Stoppt die automatische Schleife (`starten()` darf danach wieder
    /// aufgerufen werden)
    pub fn stoppen(&self) {
        self.gestartet.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
    }

    /// Erzwingt einen vollstaendigen Neuaufbau des Transports
    pub async fn manuell_wiederverbinden(&self) -> SignalingResult<()> {
        self.manuell.store(true, Ordering::SeqCst);
        tracing::info!("Manuelles Wiederverbinden angefordert");

        self.verbindung.trennen();
        // Alter Transport muss vollstaendig abgebaut sein bevor der
        // neue startet
        tokio::time::sleep(self.verbindung.config().settle_verzoegerung()).await;

        let ergebnis = self.verbindung.verbinden().await;
        match &ergebnis {
            Ok(()) => {
                self.manuell.store(false, Ordering::SeqCst);
            }
            Err(e) => {
                tracing::warn!(fehler = %e, "Manuelles Wiederverbinden fehlgeschlagen");
                // Watchdog raeumt den Indikator auf falls bis dahin
                // keine Verbindung zustande kam
                let verbindung = Arc::clone(&self.verbindung);
                let manuell = Arc::clone(&self.manuell);
                let watchdog = verbindung.config().watchdog_zeitlimit();
                tokio::spawn(async move {
                    tokio::time::sleep(watchdog).await;
                    if !verbindung.ist_verbunden() && manuell.swap(false, Ordering::SeqCst) {
                        tracing::warn!("Wiederverbinden nicht gelungen, Indikator zurueckgesetzt");
                    }
                });
            }
        }
        ergebnis
    }

    /// `true` waehrend ein manueller Versuch laeuft
    pub fn ist_wiederverbindung(&self) -> bool {
        self.manuell.load(Ordering::SeqCst)
    }
}

impl<S: CredentialSpeicher> Drop for WiederverbindungsPolitik<S> {
    fn drop(&mut self) {
        // Die Schleife darf den Eigentuemer nicht ueberleben
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StatischerSpeicher;
    use crate::config::SignalingConfig;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn zaehl_server() -> (std::net::SocketAddr, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let adresse = listener.local_addr().unwrap();
        let zaehler = Arc::new(AtomicUsize::new(0));

        let z = Arc::clone(&zaehler);
        tokio::spawn(async move {
            let mut offene = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                z.fetch_add(1, Ordering::SeqCst);
                offene.push(stream);
            }
        });

        (adresse, zaehler)
    }

    fn test_config(adresse: std::net::SocketAddr) -> SignalingConfig {
        let mut config = SignalingConfig::default();
        config.netzwerk.server_adresse = adresse.ip().to_string();
        config.netzwerk.server_port = adresse.port();
        config.wiederverbindung.intervall_ms = 50;
        config.wiederverbindung.settle_ms = 10;
        config.wiederverbindung.watchdog_ms = 100;
        config
    }

    #[tokio::test]
    async fn automatik_verbindet_getrennten_client() {
        let (adresse, zaehler) = zaehl_server().await;
        let verbindung = Verbindung::neu(test_config(adresse), Arc::new(StatischerSpeicher::leer()));
        let politik = WiederverbindungsPolitik::neu(Arc::clone(&verbindung));

        politik.starten();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(verbindung.ist_verbunden());
        assert_eq!(zaehler.load(Ordering::SeqCst), 1);

        politik.stoppen();
    }

    #[tokio::test]
    async fn starten_ist_idempotent() {
        let (adresse, zaehler) = zaehl_server().await;
        let verbindung = Verbindung::neu(test_config(adresse), Arc::new(StatischerSpeicher::leer()));
        let politik = WiederverbindungsPolitik::neu(Arc::clone(&verbindung));

        politik.starten();
        politik.starten();
        politik.starten();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(verbindung.ist_verbunden());
        assert_eq!(zaehler.load(Ordering::SeqCst), 1);

        politik.stoppen();
    }

    #[tokio::test]
    async fn drop_beendet_die_schleife() {
        let (adresse, zaehler) = zaehl_server().await;
        let verbindung = Verbindung::neu(test_config(adresse), Arc::new(StatischerSpeicher::leer()));
        let politik = WiederverbindungsPolitik::neu(Arc::clone(&verbindung));

        politik.starten();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(verbindung.ist_verbunden());

        // Drop ohne stoppen(): die Schleife muss trotzdem enden
        drop(politik);
        verbindung.trennen();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(!verbindung.ist_verbunden());
        assert_eq!(zaehler.load(Ordering::SeqCst), 1, "Keine Wiederverbindung nach Drop");
    }

    #[tokio::test]
    async fn manuelles_wiederverbinden_baut_neuen_transport() {
        let (adresse, zaehler) = zaehl_server().await;
        let verbindung = Verbindung::neu(test_config(adresse), Arc::new(StatischerSpeicher::leer()));
        let politik = WiederverbindungsPolitik::neu(Arc::clone(&verbindung));

        verbindung.verbinden().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        politik.manuell_wiederverbinden().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(verbindung.ist_verbunden());
        assert!(!politik.ist_wiederverbindung());
        assert_eq!(zaehler.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn watchdog_raeumt_indikator_auf() {
        // Kein Server auf dieser Adresse
        let mut config = SignalingConfig::default();
        config.netzwerk.server_adresse = "127.0.0.1".into();
        config.netzwerk.server_port = 1; // Connect schlaegt fehl
        config.wiederverbindung.settle_ms = 10;
        config.wiederverbindung.watchdog_ms = 100;

        let verbindung = Verbindung::neu(config, Arc::new(StatischerSpeicher::leer()));
        let politik = WiederverbindungsPolitik::neu(Arc::clone(&verbindung));

        let ergebnis = politik.manuell_wiederverbinden().await;
        assert!(ergebnis.is_err());
        assert!(politik.ist_wiederverbindung());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!politik.ist_wiederverbindung());
    }
}
