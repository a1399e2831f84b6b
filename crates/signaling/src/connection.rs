//! Verbindungs-Manager – Verwaltet den einen Duplex-Kanal zum Server
//!
//! Pro Prozess existiert hoechstens ein lebender Transport. Die State
//! Machine verwaltet den Verbindungszustand:
//!
//! ```text
//! Getrennt -> Verbindet -> Verbunden
//!     ^                        |
//!     +------- trennen --------+
//! ```
//!
//! Nach jedem erfolgreichen Transport-Connect wird der Auth-Handshake
//! gestartet, ohne die Connect-Meldung an Lifecycle-Observer zu
//! blockieren: `ist_verbunden` und `ist_authentifiziert` sind zwei
//! unabhaengige Flags.

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use kontor_core::types::{CallId, ConnectionId, UserId};
use kontor_protocol::control::{ClientEvent, Notification, ServerEvent};
use kontor_protocol::wire::ClientCodec;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::codec::Framed;

use crate::auth::{self, CredentialSpeicher};
use crate::config::SignalingConfig;
use crate::error::{SignalingError, SignalingResult};
use crate::registry::{Abo, Registry};

// ---------------------------------------------------------------------------
// Verbindungszustand
// ---------------------------------------------------------------------------

/// Groesse der ausgehenden Sende-Queue
const SENDE_QUEUE_GROESSE: usize = 64;

/// Zustand des Duplex-Kanals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbindungsZustand {
    /// Kein Transport vorhanden
    Getrennt,
    /// Transport-Aufbau laeuft
    Verbindet,
    /// Transport steht
    Verbunden,
}

/// Lifecycle-Ereignisse fuer Observer die sich vor Abschluss der
/// Authentifizierung anmelden muessen (zweiter, einfacher Fan-out
/// getrennt von der Ereignis-Registry)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LebenszyklusEreignis {
    /// Transport wurde aufgebaut
    Verbunden,
    /// Transport ist weggefallen (lokal oder serverseitig)
    Getrennt,
}

// ---------------------------------------------------------------------------
// SignalKanal
// ---------------------------------------------------------------------------

/// Ergebnis der Annehmen/Ablehnen-Remote-Prozedur
#[derive(Debug, Clone)]
pub struct AnrufAntwort {
    /// Anruf-ID auf die sich die Antwort bezieht
    pub id: CallId,
    /// Antwort-Status; nur `ANRUF_STATUS_ANGENOMMEN` gilt als Erfolg
    pub status: String,
    /// Meeting-Link, nur bei angenommenem Anruf vorhanden
    pub meeting_link: Option<String>,
}

/// Sende-Seite des Duplex-Kanals
///
/// Trait-Naht zwischen Anruf-Verhandlung und Verbindungs-Manager, damit
/// die State Machine ohne echten Transport getestet werden kann.
#[async_trait]
pub trait SignalKanal: Send + Sync + 'static {
    /// Sendet ein Ereignis fire-and-forget
    async fn senden(&self, ereignis: ClientEvent) -> SignalingResult<()>;

    /// Remote-Prozedur: Anruf annehmen oder ablehnen und auf die
    /// Antwort des Servers warten
    async fn anruf_beantworten(
        &self,
        call_id: CallId,
        accept: bool,
    ) -> SignalingResult<AnrufAntwort>;
}

// ---------------------------------------------------------------------------
// Verbindung
// ---------------------------------------------------------------------------

/// Verwaltet den einen Duplex-Kanal des Prozesses
///
/// Wird einmal am Kompositionswurzel erstellt und per `Arc` in die
/// abhaengigen Komponenten injiziert – kein globaler Singleton-Zustand.
pub struct Verbindung<S: CredentialSpeicher> {
    config: Arc<SignalingConfig>,
    speicher: Arc<S>,
    zustand: Mutex<VerbindungsZustand>,
    /// Trennen wurde waehrend des laufenden Aufbaus angefordert;
    /// `verbinden()` loest es nach dem Connect ein
    trennen_angefordert: AtomicBool,
    /// Opake Server-ID der aktuellen Verbindung (nur Diagnose)
    verbindungs_id: Mutex<Option<ConnectionId>>,
    authentifiziert: AtomicBool,
    naechste_request_id: AtomicU32,
    /// Offene Request/Response-Anfragen, indiziert nach request_id
    offene_anfragen: DashMap<u32, oneshot::Sender<ServerEvent>>,
    sende_tx: Mutex<Option<mpsc::Sender<ClientEvent>>>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    lebenszyklus: Registry<LebenszyklusEreignis>,
    benachrichtigungen: Registry<Notification>,
    praesenz: Registry<Vec<UserId>>,
}

impl<S: CredentialSpeicher> Verbindung<S> {
    /// Erstellt einen neuen Verbindungs-Manager (noch ohne Transport)
    pub fn neu(config: SignalingConfig, speicher: Arc<S>) -> Arc<Self> {
        Arc::new(Self {
            config: Arc::new(config),
            speicher,
            zustand: Mutex::new(VerbindungsZustand::Getrennt),
            trennen_angefordert: AtomicBool::new(false),
            verbindungs_id: Mutex::new(None),
            authentifiziert: AtomicBool::new(false),
            naechste_request_id: AtomicU32::new(1),
            offene_anfragen: DashMap::new(),
            sende_tx: Mutex::new(None),
            shutdown_tx: Mutex::new(None),
            lebenszyklus: Registry::neu(),
            benachrichtigungen: Registry::neu(),
            praesenz: Registry::neu(),
        })
    }

    /// Baut den Transport auf, falls noch keiner existiert
    ///
    /// Idempotent: waehrend `Verbindet`/`Verbunden` ist der Aufruf ein
    /// No-op. Nach erfolgreichem Connect werden Lifecycle-Observer
    /// sofort benachrichtigt und der Auth-Handshake parallel gestartet.
    pub async fn verbinden(self: &Arc<Self>) -> SignalingResult<()> {
        {
            let mut zustand = self.zustand.lock();
            if *zustand != VerbindungsZustand::Getrennt {
                tracing::debug!(
                    zustand = ?*zustand,
                    "verbinden() ignoriert – Verbindung existiert bereits"
                );
                return Ok(());
            }
            *zustand = VerbindungsZustand::Verbindet;
        }

        let adresse = self.config.server_adresse();
        tracing::info!(adresse = %adresse, "Verbinde mit Signaling-Server");

        let stream = match TcpStream::connect(&adresse).await {
            Ok(s) => s,
            Err(e) => {
                *self.zustand.lock() = VerbindungsZustand::Getrennt;
                self.trennen_angefordert.store(false, Ordering::SeqCst);
                tracing::warn!(adresse = %adresse, fehler = %e, "Transport-Connect fehlgeschlagen");
                return Err(SignalingError::Io(e));
            }
        };

        // Kam waehrend des Connects ein trennen() an, gewinnt es:
        // frischer Transport wird sofort wieder verworfen
        if self.trennen_angefordert.swap(false, Ordering::SeqCst) {
            *self.zustand.lock() = VerbindungsZustand::Getrennt;
            tracing::info!("Trennen waehrend des Aufbaus angefordert, Transport verworfen");
            return Ok(());
        }

        let framed = Framed::new(
            stream,
            ClientCodec::mit_max_groesse(self.config.netzwerk.max_frame_groesse),
        );
        let (sende_tx, sende_rx) = mpsc::channel::<ClientEvent>(SENDE_QUEUE_GROESSE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.sende_tx.lock() = Some(sende_tx);
        *self.shutdown_tx.lock() = Some(shutdown_tx);
        *self.zustand.lock() = VerbindungsZustand::Verbunden;

        // Enges Restfenster: trennen() zwischen der Pruefung oben und
        // dem Zustandswechsel landet im Flag statt im watch-Kanal
        if self.trennen_angefordert.swap(false, Ordering::SeqCst) {
            self.trennen();
        }

        tracing::info!(adresse = %adresse, "Transport verbunden");

        // Ereignis-Schleife im eigenen Task
        let selbst = Arc::clone(self);
        tokio::spawn(async move {
            selbst.ereignis_schleife(framed, sende_rx, shutdown_rx).await;
        });

        // Lifecycle-Observer sofort benachrichtigen; der Handshake darf
        // die reine Konnektivitaets-Meldung nicht blockieren
        self.lebenszyklus.ausliefern(&LebenszyklusEreignis::Verbunden);

        let selbst = Arc::clone(self);
        tokio::spawn(async move {
            auth::handshake_ausfuehren(selbst).await;
        });

        Ok(())
    }

    /// Fordert den Abbau des Transports an
    ///
    /// Idempotent. Das eigentliche Aufraeumen (Zustand, offene Anfragen,
    /// Lifecycle-Meldung) erledigt die Ereignis-Schleife beim Beenden.
    pub fn trennen(&self) {
        match *self.zustand.lock() {
            VerbindungsZustand::Getrennt => return,
            VerbindungsZustand::Verbindet => {
                // Aufbau laeuft noch, es gibt noch keinen watch-Kanal;
                // verbinden() loest die Vormerkung nach dem Connect ein
                self.authentifiziert.store(false, Ordering::SeqCst);
                self.trennen_angefordert.store(true, Ordering::SeqCst);
                tracing::debug!("Trennen vorgemerkt, Verbindungsaufbau laeuft noch");
                return;
            }
            VerbindungsZustand::Verbunden => {}
        }
        // Auth-Flag sofort zuruecksetzen, nicht erst beim Schleifen-Ende
        self.authentifiziert.store(false, Ordering::SeqCst);

        let shutdown = self.shutdown_tx.lock().clone();
        if let Some(tx) = shutdown {
            let _ = tx.send(true);
        }
    }

    // -----------------------------------------------------------------------
    // Ereignis-Schleife
    // -----------------------------------------------------------------------

    async fn ereignis_schleife(
        self: Arc<Self>,
        mut framed: Framed<TcpStream, ClientCodec>,
        mut sende_rx: mpsc::Receiver<ClientEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                // Eingehendes Ereignis vom Server
                frame = framed.next() => {
                    match frame {
                        Some(Ok(wert)) => self.eingang_verarbeiten(wert),
                        Some(Err(e)) => {
                            tracing::warn!(fehler = %e, "Frame-Lesefehler");
                            break;
                        }
                        None => {
                            tracing::info!("Verbindung vom Server getrennt");
                            break;
                        }
                    }
                }

                // Ausgehendes Ereignis aus der Sende-Queue
                Some(ausgehend) = sende_rx.recv() => {
                    if let Err(e) = framed.send(ausgehend).await {
                        tracing::warn!(fehler = %e, "Senden fehlgeschlagen");
                        break;
                    }
                }

                // Lokales Trennen
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Trennen angefordert – Verbindung wird geschlossen");
                        let _ = framed.close().await;
                        break;
                    }
                }
            }
        }

        self.aufraeumen();
    }

    /// Ordnet ein eingehendes Server-Ereignis zu
    ///
    /// Fehlerhafte Payloads werden hier verworfen statt die Verbindung
    /// zu beenden; unbekannte Typen ebenso (Vorwaertskompatibilitaet).
    fn eingang_verarbeiten(&self, wert: serde_json::Value) {
        let ereignis: ServerEvent = match serde_json::from_value(wert) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(fehler = %e, "Fehlerhaftes Server-Ereignis verworfen");
                return;
            }
        };

        // Antworten auf offene Anfragen zuerst zuordnen
        let antwort_id = match &ereignis {
            ServerEvent::AuthAck { request_id, .. } => Some(*request_id),
            ServerEvent::CallAnswerResponse { request_id, .. } => Some(*request_id),
            _ => None,
        };
        if let Some(request_id) = antwort_id {
            match self.offene_anfragen.remove(&request_id) {
                Some((_, tx)) => {
                    let _ = tx.send(ereignis);
                }
                None => {
                    tracing::debug!(request_id, "Antwort ohne offene Anfrage verworfen");
                }
            }
            return;
        }

        match ereignis {
            ServerEvent::Welcome { connection_id } => {
                tracing::debug!(verbindung = %connection_id, "Server-Begruessung empfangen");
                *self.verbindungs_id.lock() = Some(connection_id);
            }
            ServerEvent::Notification { payload } => {
                // Bis zum erfolgreichen Handshake gilt eingehender
                // Verkehr nicht als authentifiziert und wird verworfen
                if !self.ist_authentifiziert() {
                    tracing::trace!("Notification vor Abschluss des Handshakes verworfen");
                    return;
                }
                if matches!(payload, Notification::Unbekannt) {
                    tracing::trace!("Unbekannter Notification-Typ verworfen");
                    return;
                }
                self.benachrichtigungen.ausliefern(&payload);
            }
            ServerEvent::ConnectedUsers { user_ids } => {
                if !self.ist_authentifiziert() {
                    tracing::trace!("Praesenz-Schnappschuss vor Abschluss des Handshakes verworfen");
                    return;
                }
                self.praesenz.ausliefern(&user_ids);
            }
            ServerEvent::Unbekannt => {
                tracing::trace!("Unbekanntes Server-Ereignis verworfen");
            }
            // Oben bereits als Antworten zugeordnet
            ServerEvent::AuthAck { .. } | ServerEvent::CallAnswerResponse { .. } => {}
        }
    }

    /// Raeumt nach dem Ende der Ereignis-Schleife auf
    fn aufraeumen(&self) {
        *self.sende_tx.lock() = None;
        *self.shutdown_tx.lock() = None;
        *self.verbindungs_id.lock() = None;
        self.authentifiziert.store(false, Ordering::SeqCst);
        // Laufende Anfragen schlagen fehl: die oneshot-Sender fallen weg
        self.offene_anfragen.clear();

        let war_getrennt = {
            let mut zustand = self.zustand.lock();
            let alt = *zustand;
            *zustand = VerbindungsZustand::Getrennt;
            alt == VerbindungsZustand::Getrennt
        };
        if !war_getrennt {
            tracing::info!("Verbindung getrennt");
            self.lebenszyklus.ausliefern(&LebenszyklusEreignis::Getrennt);
        }
    }

    // -----------------------------------------------------------------------
    // Senden & Anfragen
    // -----------------------------------------------------------------------

    /// Reiht ein Ereignis in die Sende-Queue ein
    pub(crate) async fn einreihen(&self, ereignis: ClientEvent) -> SignalingResult<()> {
        let tx = self
            .sende_tx
            .lock()
            .clone()
            .ok_or(SignalingError::NichtVerbunden)?;
        tx.send(ereignis)
            .await
            .map_err(|_| SignalingError::SendFehler)
    }

    /// Sendet eine Anfrage und wartet auf die Antwort mit derselben
    /// request_id
    pub(crate) async fn anfragen(
        &self,
        bau: impl FnOnce(u32) -> ClientEvent,
    ) -> SignalingResult<ServerEvent> {
        let request_id = self.naechste_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.offene_anfragen.insert(request_id, tx);

        if let Err(e) = self.einreihen(bau(request_id)).await {
            self.offene_anfragen.remove(&request_id);
            return Err(e);
        }

        // Faellt die Verbindung weg, verwirft das Aufraeumen den Sender
        // und das Warten endet hier mit einem Fehler
        rx.await.map_err(|_| SignalingError::Getrennt)
    }

    // -----------------------------------------------------------------------
    // Zustands-Zugriff
    // -----------------------------------------------------------------------

    /// Gibt den aktuellen Verbindungszustand zurueck
    pub fn zustand(&self) -> VerbindungsZustand {
        *self.zustand.lock()
    }

    /// Prueft ob der Transport steht (unabhaengig von der Authentifizierung)
    pub fn ist_verbunden(&self) -> bool {
        *self.zustand.lock() == VerbindungsZustand::Verbunden
    }

    /// Prueft ob der Handshake auf der aktuellen Verbindung erfolgreich war
    pub fn ist_authentifiziert(&self) -> bool {
        self.authentifiziert.load(Ordering::SeqCst)
    }

    /// Gibt die opake Server-Verbindungs-ID zurueck (nur Diagnose)
    pub fn verbindungs_id(&self) -> Option<ConnectionId> {
        self.verbindungs_id.lock().clone()
    }

    pub(crate) fn authentifiziert_setzen(&self, wert: bool) {
        self.authentifiziert.store(wert, Ordering::SeqCst);
    }

    pub(crate) fn speicher(&self) -> &S {
        &self.speicher
    }

    pub(crate) fn config(&self) -> &SignalingConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Fan-outs
    // -----------------------------------------------------------------------

    /// Meldet einen Lifecycle-Observer an (erreichbar vor der
    /// Authentifizierung)
    pub fn lebenszyklus_abonnieren(
        &self,
        id: impl Into<String>,
        rueckruf: impl Fn(&LebenszyklusEreignis) + Send + Sync + 'static,
    ) -> Abo<LebenszyklusEreignis> {
        self.lebenszyklus.abonnieren(id, rueckruf)
    }

    /// Registry der Anruf-/Task-Notifications
    pub fn benachrichtigungen(&self) -> &Registry<Notification> {
        &self.benachrichtigungen
    }

    /// Registry der Praesenz-Schnappschuesse
    pub fn praesenz(&self) -> &Registry<Vec<UserId>> {
        &self.praesenz
    }
}

// ---------------------------------------------------------------------------
// SignalKanal-Implementierung
// ---------------------------------------------------------------------------

#[async_trait]
impl<S: CredentialSpeicher> SignalKanal for Verbindung<S> {
    async fn senden(&self, ereignis: ClientEvent) -> SignalingResult<()> {
        self.einreihen(ereignis).await
    }

    async fn anruf_beantworten(
        &self,
        call_id: CallId,
        accept: bool,
    ) -> SignalingResult<AnrufAntwort> {
        let cid = call_id.clone();
        let antwort = self
            .anfragen(move |request_id| ClientEvent::CallAnswer {
                request_id,
                call_id: cid,
                accept,
            })
            .await?;

        match antwort {
            ServerEvent::CallAnswerResponse {
                id,
                status,
                meeting_link,
                ..
            } => Ok(AnrufAntwort {
                id,
                status,
                meeting_link,
            }),
            other => Err(SignalingError::UnerwarteteAntwort(format!(
                "Erwartet CallAnswerResponse, erhalten: {:?}",
                std::mem::discriminant(&other)
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
