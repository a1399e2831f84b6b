//! Praesenz-Tracker – Spiegel der serverseitigen Online-Liste
//!
//! Der Server sendet immer vollstaendige Schnappschuesse, nie Deltas.
//! Jeder Schnappschuss ersetzt den lokalen Zustand komplett; ein Peer
//! der im neuen Schnappschuss fehlt gilt sofort als offline.

use kontor_core::types::UserId;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::registry::{Abo, Registry};

/// Hoerer-ID des Trackers in der Praesenz-Registry
const HOERER_ID: &str = "praesenz-tracker";

/// Haelt die Menge der aktuell verbundenen Peers
pub struct PraesenzTracker {
    inner: Arc<PraesenzInner>,
    /// Haelt die Anmeldung in der Registry; Lebensdauer ist an den
    /// Tracker gebunden, abgemeldet wird nie implizit
    _abo: Abo<Vec<UserId>>,
}

struct PraesenzInner {
    online: RwLock<HashSet<UserId>>,
    /// `false` bis zum ersten Schnappschuss; davor ist die leere Menge
    /// "noch unbekannt", nicht "niemand online"
    erhalten: AtomicBool,
}

impl PraesenzTracker {
    /// Erstellt den Tracker und meldet ihn an der Praesenz-Registry an
    pub fn neu(registry: &Registry<Vec<UserId>>) -> Self {
        let inner = Arc::new(PraesenzInner {
            online: RwLock::new(HashSet::new()),
            erhalten: AtomicBool::new(false),
        });

        let i = Arc::clone(&inner);
        let abo = registry.abonnieren(HOERER_ID, move |schnappschuss: &Vec<UserId>| {
            let mut online = i.online.write();
            online.clear();
            online.extend(schnappschuss.iter().cloned());
            i.erhalten.store(true, Ordering::SeqCst);
            tracing::debug!(anzahl = online.len(), "Praesenz-Schnappschuss uebernommen");
        });

        Self { inner, _abo: abo }
    }

    /// Gibt die aktuell bekannten Online-Peers zurueck
    pub fn online_peers(&self) -> HashSet<UserId> {
        self.inner.online.read().clone()
    }

    /// Prueft ob ein Peer laut letztem Schnappschuss online ist
    pub fn ist_online(&self, user_id: &UserId) -> bool {
        self.inner.online.read().contains(user_id)
    }

    /// Anzahl der Online-Peers
    pub fn anzahl(&self) -> usize {
        self.inner.online.read().len()
    }

    /// `true` solange noch kein Schnappschuss angekommen ist
    pub fn laedt(&self) -> bool {
        !self.inner.erhalten.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nutzer(ids: &[&str]) -> Vec<UserId> {
        ids.iter().map(|id| UserId::neu(*id)).collect()
    }

    #[test]
    fn schnappschuss_ersetzt_zustand_komplett() {
        let registry: Registry<Vec<UserId>> = Registry::neu();
        let tracker = PraesenzTracker::neu(&registry);

        registry.ausliefern(&nutzer(&["a", "b", "c"]));
        assert_eq!(tracker.anzahl(), 3);
        assert!(tracker.ist_online(&UserId::neu("a")));

        // Kein Delta: wer fehlt ist offline
        registry.ausliefern(&nutzer(&["b", "d"]));
        assert_eq!(tracker.anzahl(), 2);
        assert!(!tracker.ist_online(&UserId::neu("a")));
        assert!(tracker.ist_online(&UserId::neu("b")));
        assert!(tracker.ist_online(&UserId::neu("d")));
    }

    #[test]
    fn leerer_schnappschuss_leert_die_menge() {
        let registry: Registry<Vec<UserId>> = Registry::neu();
        let tracker = PraesenzTracker::neu(&registry);

        registry.ausliefern(&nutzer(&["a"]));
        registry.ausliefern(&nutzer(&[]));
        assert_eq!(tracker.anzahl(), 0);
        assert!(!tracker.laedt());
    }

    #[test]
    fn laedt_bis_zum_ersten_schnappschuss() {
        let registry: Registry<Vec<UserId>> = Registry::neu();
        let tracker = PraesenzTracker::neu(&registry);

        assert!(tracker.laedt());
        assert_eq!(tracker.anzahl(), 0);

        registry.ausliefern(&nutzer(&[]));
        assert!(!tracker.laedt());
    }

    #[test]
    fn doppelte_eintraege_im_schnappschuss_werden_dedupliziert() {
        let registry: Registry<Vec<UserId>> = Registry::neu();
        let tracker = PraesenzTracker::neu(&registry);

        registry.ausliefern(&nutzer(&["a", "a", "b"]));
        assert_eq!(tracker.anzahl(), 2);
    }
}
