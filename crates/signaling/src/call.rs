//! Anruf-Verhandlung – State Machine fuer genau eine Verhandlung
//!
//! Es existiert hoechstens eine laufende Verhandlung pro Client
//! (`aktueller == None` bedeutet Leerlauf). Trifft ein zweiter
//! eingehender Anruf waehrend einer laufenden Verhandlung ein, gewinnt
//! der neue und die alte wird als abgebrochen gemeldet.
//!
//! ```text
//!            IncomingCall                 anrufen()
//!                 |                           |
//!                 v                           v
//!         KlingeltEingehend           KlingeltAusgehend
//!           |           |                     |
//!      annehmen()   ablehnen()          CallAccepted
//!           |           |                     |
//!           v           v                     v
//!        Annahme     (Leerlauf)           Verbunden
//!         |    |                              |
//!    ACCEPTED  sonst                      CallEnded
//!         |    |                              |
//!         v    v                              v
//!   Verbunden (Leerlauf)                 (Leerlauf)
//! ```

use chrono::{DateTime, Utc};
use kontor_core::types::{CallId, UserId};
use kontor_protocol::control::{ClientEvent, Notification, ANRUF_STATUS_ANGENOMMEN};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::connection::SignalKanal;
use crate::error::{SignalingError, SignalingResult};
use crate::registry::{Abo, Registry};

/// Hoerer-ID des Managers in der Notification-Registry
const HOERER_ID: &str = "anruf-manager";

/// Kapazitaet des Ereignis-Broadcasts
const EREIGNIS_KAPAZITAET: usize = 32;

// ---------------------------------------------------------------------------
// Typen
// ---------------------------------------------------------------------------

/// Rolle des lokalen Clients in der Verhandlung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnrufRolle {
    /// Lokaler Client hat den Anruf gestartet
    Anrufer,
    /// Lokaler Client wurde angerufen
    Angerufener,
}

/// Zustand der laufenden Verhandlung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnrufZustand {
    /// Eingehender Anruf klingelt, wartet auf annehmen/ablehnen
    KlingeltEingehend,
    /// Ausgehender Anruf klingelt bei der Gegenseite
    KlingeltAusgehend,
    /// Annehmen laeuft, Antwort des Servers steht aus
    Annahme,
    /// Anruf steht, Meeting-Link liegt vor
    Verbunden,
}

/// Die laufende Anruf-Verhandlung
#[derive(Debug, Clone, Serialize)]
pub struct Anruf {
    /// Server-ID des Anrufs; bei ausgehenden Anrufen erst ab der
    /// Annahme durch die Gegenseite bekannt
    pub call_id: Option<CallId>,
    /// Gegenseite der Verhandlung
    pub peer_id: UserId,
    /// Anzeigename der Gegenseite, falls der Server einen mitliefert
    pub peer_name: Option<String>,
    pub rolle: AnrufRolle,
    pub zustand: AnrufZustand,
    /// Meeting-Link, vorhanden ab `Verbunden`
    pub meeting_link: Option<String>,
    /// Beginn der Verhandlung
    pub erstellt: DateTime<Utc>,
}

/// Ereignisse der Anruf-Verhandlung fuer Konsumenten (UI, Ton)
#[derive(Debug, Clone)]
pub enum AnrufEreignis {
    /// Eingehender Anruf klingelt
    Eingehend { anruf: Anruf },
    /// Ausgehender Anruf wurde gestartet
    Ausgehend { anruf: Anruf },
    /// Anruf steht, `anruf.meeting_link` liegt vor
    Angenommen { anruf: Anruf },
    /// Eingehender Anruf wurde lokal abgelehnt
    Abgelehnt { call_id: CallId },
    /// Anruf wurde von der Gegenseite oder durch einen neueren Anruf
    /// abgebrochen
    Abgebrochen { call_id: Option<CallId> },
    /// Ausgehender Anruf wurde nicht beantwortet
    Zeitueberschreitung { call_id: CallId },
    /// Laufender Anruf wurde beendet
    Beendet { call_id: CallId },
    /// Annehmen ist fehlgeschlagen, Verhandlung wurde verworfen
    Fehlgeschlagen { call_id: CallId, grund: String },
}

/// Host-Kommandos die der Manager bei eingehenden Anrufen ausloest
///
/// Trait-Naht zum einbettenden Prozess (Klingelton, Fenster nach vorn).
pub trait AnrufKommandos: Send + Sync + 'static {
    /// Eingehender Anruf klingelt
    fn klingeln(&self, anruf: &Anruf);
    /// Anwendung in den Vordergrund holen
    fn in_vordergrund(&self);
}

/// No-op-Implementierung fuer Hosts ohne UI (Tests, Headless)
pub struct KeineKommandos;

impl AnrufKommandos for KeineKommandos {
    fn klingeln(&self, _anruf: &Anruf) {}
    fn in_vordergrund(&self) {}
}

// ---------------------------------------------------------------------------
// AnrufManager
// ---------------------------------------------------------------------------

/// Verwaltet die eine laufende Anruf-Verhandlung
pub struct AnrufManager<K: SignalKanal> {
    inner: Arc<AnrufInner<K>>,
    _abo: Abo<Notification>,
}

struct AnrufInner<K: SignalKanal> {
    kanal: Arc<K>,
    kommandos: Arc<dyn AnrufKommandos>,
    aktueller: Mutex<Option<Anruf>>,
    ereignis_tx: broadcast::Sender<AnrufEreignis>,
}

impl<K: SignalKanal> AnrufManager<K> {
    /// Erstellt den Manager und meldet ihn an der Notification-Registry an
    pub fn neu(
        kanal: Arc<K>,
        kommandos: Arc<dyn AnrufKommandos>,
        benachrichtigungen: &Registry<Notification>,
    ) -> Self {
        let (ereignis_tx, _) = broadcast::channel(EREIGNIS_KAPAZITAET);
        let inner = Arc::new(AnrufInner {
            kanal,
            kommandos,
            aktueller: Mutex::new(None),
            ereignis_tx,
        });

        let i = Arc::clone(&inner);
        let abo = benachrichtigungen.abonnieren(HOERER_ID, move |n: &Notification| {
            i.benachrichtigung_verarbeiten(n);
        });

        Self { inner, _abo: abo }
    }

    /// Abonniert die Ereignisse der Anruf-Verhandlung
    pub fn ereignisse_abonnieren(&self) -> broadcast::Receiver<AnrufEreignis> {
        self.inner.ereignis_tx.subscribe()
    }

    /// Gibt die aktuelle Verhandlung zurueck (`None` = Leerlauf)
    pub fn aktueller_anruf(&self) -> Option<Anruf> {
        self.inner.aktueller.lock().clone()
    }

    /// Startet einen ausgehenden Anruf
    ///
    /// Fire-and-forget auf Protokollebene: der Server antwortet erst
    /// wenn die Gegenseite reagiert (`CallAccepted`/`CallTimeout`).
    pub async fn anrufen(&self, empfaenger: UserId) -> SignalingResult<()> {
        let anruf = Anruf {
            call_id: None,
            peer_id: empfaenger.clone(),
            peer_name: None,
            rolle: AnrufRolle::Anrufer,
            zustand: AnrufZustand::KlingeltAusgehend,
            meeting_link: None,
            erstellt: Utc::now(),
        };

        {
            let mut aktueller = self.inner.aktueller.lock();
            if aktueller.is_some() {
                return Err(SignalingError::BereitsAktiv);
            }
            *aktueller = Some(anruf.clone());
        }

        if let Err(e) = self
            .inner
            .kanal
            .senden(ClientEvent::CallInitiate {
                receiver_id: empfaenger.clone(),
            })
            .await
        {
            // Reservierung zurueckrollen falls noch unsere
            let mut aktueller = self.inner.aktueller.lock();
            if matches!(
                &*aktueller,
                Some(a) if a.rolle == AnrufRolle::Anrufer && a.peer_id == empfaenger
                    && a.zustand == AnrufZustand::KlingeltAusgehend
            ) {
                *aktueller = None;
            }
            return Err(e);
        }

        tracing::info!(empfaenger = %empfaenger, "Ausgehender Anruf gestartet");
        let _ = self
            .inner
            .ereignis_tx
            .send(AnrufEreignis::Ausgehend { anruf });
        Ok(())
    }

    /// Nimmt den klingelnden eingehenden Anruf an
    ///
    /// Blockiert bis die Antwort des Servers eintrifft. Wird die
    /// Verhandlung waehrenddessen ueberholt (Abbruch, neuer Anruf),
    /// wird die verspaetete Antwort verworfen und `Ueberholt` gemeldet.
    pub async fn annehmen(&self) -> SignalingResult<Anruf> {
        let call_id = {
            let mut aktueller = self.inner.aktueller.lock();
            // Eingehende Anrufe tragen immer eine Server-ID
            match aktueller.as_mut() {
                Some(Anruf {
                    zustand: zustand @ AnrufZustand::KlingeltEingehend,
                    call_id: Some(id),
                    ..
                }) => {
                    *zustand = AnrufZustand::Annahme;
                    id.clone()
                }
                _ => return Err(SignalingError::KeinAktiverAnruf),
            }
        };

        tracing::info!(anruf = %call_id, "Nehme Anruf an");
        let antwort = match self
            .inner
            .kanal
            .anruf_beantworten(call_id.clone(), true)
            .await
        {
            Ok(antwort) => antwort,
            Err(e) => {
                self.annahme_verwerfen(&call_id, e.to_string());
                return Err(e);
            }
        };

        let mut aktueller = self.inner.aktueller.lock();

        // Identitaets-Pruefung: gilt die Antwort noch der laufenden
        // Verhandlung? Sonst verwerfen ohne den Zustand anzufassen.
        let laufend = match aktueller.as_mut() {
            Some(a)
                if a.zustand == AnrufZustand::Annahme
                    && a.call_id.as_ref() == Some(&call_id) =>
            {
                a
            }
            _ => {
                tracing::debug!(anruf = %call_id, "Verspaetete Annahme-Antwort verworfen");
                return Err(SignalingError::Ueberholt);
            }
        };

        if antwort.status == ANRUF_STATUS_ANGENOMMEN {
            laufend.zustand = AnrufZustand::Verbunden;
            laufend.meeting_link = antwort.meeting_link;
            let anruf = laufend.clone();
            tracing::info!(anruf = %call_id, "Anruf angenommen, Meeting-Link erhalten");
            let _ = self.inner.ereignis_tx.send(AnrufEreignis::Angenommen {
                anruf: anruf.clone(),
            });
            Ok(anruf)
        } else {
            tracing::warn!(anruf = %call_id, status = %antwort.status, "Annehmen fehlgeschlagen");
            *aktueller = None;
            let _ = self.inner.ereignis_tx.send(AnrufEreignis::Fehlgeschlagen {
                call_id,
                grund: antwort.status.clone(),
            });
            Err(SignalingError::AnrufFehlgeschlagen(antwort.status))
        }
    }

    /// Lehnt den klingelnden eingehenden Anruf ab
    ///
    /// Raeumt sofort lokal auf; die Antwort des Servers interessiert
    /// nicht mehr und wird im Hintergrund abgewartet.
    pub fn ablehnen(&self) -> SignalingResult<()> {
        let call_id = {
            let mut aktueller = self.inner.aktueller.lock();
            match &*aktueller {
                Some(Anruf {
                    zustand: AnrufZustand::KlingeltEingehend,
                    call_id: Some(id),
                    ..
                }) => {
                    let id = id.clone();
                    *aktueller = None;
                    id
                }
                _ => return Err(SignalingError::KeinAktiverAnruf),
            }
        };

        tracing::info!(anruf = %call_id, "Lehne Anruf ab");
        let kanal = Arc::clone(&self.inner.kanal);
        let id = call_id.clone();
        tokio::spawn(async move {
            if let Err(e) = kanal.anruf_beantworten(id, false).await {
                tracing::debug!(fehler = %e, "Ablehnen-Antwort nicht zustellbar");
            }
        });

        let _ = self
            .inner
            .ereignis_tx
            .send(AnrufEreignis::Abgelehnt { call_id });
        Ok(())
    }

    /// Verwirft die laufende Verhandlung bedingungslos (lokaler Reset,
    /// z. B. beim Herunterfahren)
    pub fn zuruecksetzen(&self) {
        let verworfen = self.inner.aktueller.lock().take();
        if let Some(anruf) = verworfen {
            tracing::debug!(anruf = ?anruf.call_id, "Verhandlung zurueckgesetzt");
            let _ = self.inner.ereignis_tx.send(AnrufEreignis::Abgebrochen {
                call_id: anruf.call_id,
            });
        }
    }

    /// Raeumt nach einem fehlgeschlagenen Annehmen auf, sofern die
    /// Verhandlung nicht inzwischen ueberholt wurde
    fn annahme_verwerfen(&self, call_id: &CallId, grund: String) {
        let mut aktueller = self.inner.aktueller.lock();
        let passt = matches!(
            &*aktueller,
            Some(a) if a.zustand == AnrufZustand::Annahme
                && a.call_id.as_ref() == Some(call_id)
        );
        if passt {
            *aktueller = None;
            let _ = self.inner.ereignis_tx.send(AnrufEreignis::Fehlgeschlagen {
                call_id: call_id.clone(),
                grund,
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Notification-Dispatch
// ---------------------------------------------------------------------------

impl<K: SignalKanal> AnrufInner<K> {
    fn benachrichtigung_verarbeiten(&self, notification: &Notification) {
        match notification {
            Notification::IncomingCall {
                call_id,
                caller_id,
                caller_name,
            } => self.eingehend(call_id, caller_id, caller_name.clone()),

            Notification::CallAccepted {
                call_id,
                meeting_link,
            }
            | Notification::CallResponse {
                call_id,
                meeting_link,
            } => self.ausgehender_angenommen(call_id, meeting_link.clone()),

            Notification::CallEnded { call_id } => self.beendet(call_id),
            Notification::CallTimeout { call_id } => self.zeitueberschreitung(call_id),
            Notification::CallCancelled { call_id } => self.abgebrochen(call_id),
            Notification::Unbekannt => {}
        }
    }

    /// Eingehender Anruf: der neue gewinnt immer (last-write-wins)
    fn eingehend(&self, call_id: &CallId, caller_id: &UserId, caller_name: Option<String>) {
        let anruf = {
            let mut aktueller = self.aktueller.lock();

            if let Some(bestehend) = &*aktueller {
                if bestehend.call_id.as_ref() == Some(call_id) {
                    tracing::trace!(anruf = %call_id, "Doppeltes IncomingCall ignoriert");
                    return;
                }
                tracing::info!(
                    alt = ?bestehend.call_id,
                    neu = %call_id,
                    "Laufende Verhandlung durch neuen eingehenden Anruf ueberholt"
                );
                let _ = self.ereignis_tx.send(AnrufEreignis::Abgebrochen {
                    call_id: bestehend.call_id.clone(),
                });
            }

            let anruf = Anruf {
                call_id: Some(call_id.clone()),
                peer_id: caller_id.clone(),
                peer_name: caller_name,
                rolle: AnrufRolle::Angerufener,
                zustand: AnrufZustand::KlingeltEingehend,
                meeting_link: None,
                erstellt: Utc::now(),
            };
            *aktueller = Some(anruf.clone());
            anruf
        };

        tracing::info!(anruf = %call_id, anrufer = %anruf.peer_id, "Eingehender Anruf klingelt");
        let _ = self.ereignis_tx.send(AnrufEreignis::Eingehend {
            anruf: anruf.clone(),
        });
        self.kommandos.klingeln(&anruf);
        self.kommandos.in_vordergrund();
    }

    /// Gegenseite hat den ausgehenden Anruf angenommen
    fn ausgehender_angenommen(&self, call_id: &CallId, meeting_link: Option<String>) {
        let anruf = {
            let mut aktueller = self.aktueller.lock();
            match aktueller.as_mut() {
                Some(a)
                    if a.rolle == AnrufRolle::Anrufer
                        && a.zustand == AnrufZustand::KlingeltAusgehend =>
                {
                    // Server-ID wird erst hier bekannt
                    a.call_id = Some(call_id.clone());
                    a.zustand = AnrufZustand::Verbunden;
                    a.meeting_link = meeting_link;
                    a.clone()
                }
                _ => {
                    tracing::debug!(anruf = %call_id, "CallAccepted ohne passenden ausgehenden Anruf verworfen");
                    return;
                }
            }
        };

        tracing::info!(anruf = %call_id, "Ausgehender Anruf angenommen");
        let _ = self.ereignis_tx.send(AnrufEreignis::Angenommen { anruf });
    }

    /// Laufender Anruf wurde beendet
    fn beendet(&self, call_id: &CallId) {
        let mut aktueller = self.aktueller.lock();
        let passt = matches!(
            &*aktueller,
            Some(a) if a.zustand == AnrufZustand::Verbunden
                && a.call_id.as_ref() == Some(call_id)
        );
        if !passt {
            tracing::trace!(anruf = %call_id, "CallEnded ohne passenden Anruf verworfen");
            return;
        }

        *aktueller = None;
        tracing::info!(anruf = %call_id, "Anruf beendet");
        let _ = self.ereignis_tx.send(AnrufEreignis::Beendet {
            call_id: call_id.clone(),
        });
    }

    /// Ausgehender Anruf wurde nicht beantwortet
    fn zeitueberschreitung(&self, call_id: &CallId) {
        let mut aktueller = self.aktueller.lock();
        // Der ausgehende Anruf kennt seine Server-ID noch nicht,
        // daher greift das Timeout auch ohne ID-Abgleich
        let passt = matches!(
            &*aktueller,
            Some(a) if a.call_id.as_ref() == Some(call_id)
                || (a.zustand == AnrufZustand::KlingeltAusgehend && a.call_id.is_none())
        );
        if !passt {
            tracing::trace!(anruf = %call_id, "CallTimeout ohne passenden Anruf verworfen");
            return;
        }

        *aktueller = None;
        tracing::info!(anruf = %call_id, "Anruf nicht beantwortet");
        let _ = self.ereignis_tx.send(AnrufEreignis::Zeitueberschreitung {
            call_id: call_id.clone(),
        });
    }

    /// Gegenseite hat abgebrochen bevor der Anruf zustande kam
    fn abgebrochen(&self, call_id: &CallId) {
        let mut aktueller = self.aktueller.lock();
        // Der ausgehende Anruf kennt seine Server-ID noch nicht,
        // daher greift der Abbruch dort auch ohne ID-Abgleich
        let passt = matches!(
            &*aktueller,
            Some(a) if (a.call_id.as_ref() == Some(call_id)
                    && matches!(
                        a.zustand,
                        AnrufZustand::KlingeltEingehend | AnrufZustand::Annahme
                    ))
                || (a.zustand == AnrufZustand::KlingeltAusgehend && a.call_id.is_none())
        );
        if !passt {
            tracing::trace!(anruf = %call_id, "CallCancelled ohne passenden Anruf verworfen");
            return;
        }

        *aktueller = None;
        tracing::info!(anruf = %call_id, "Anruf von der Gegenseite abgebrochen");
        let _ = self.ereignis_tx.send(AnrufEreignis::Abgebrochen {
            call_id: Some(call_id.clone()),
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
