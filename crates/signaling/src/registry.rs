//! Ereignis-Registry – Verteilt eingehende Server-Ereignisse an Hoerer
//!
//! Eine `Registry<E>` haelt pro Hoerer-ID genau einen Rueckruf. Meldet
//! sich dieselbe ID erneut an, ersetzt der neue Rueckruf den alten –
//! so entstehen keine Doppel-Zustellungen wenn ein Konsument sich nach
//! einem Neuaufbau erneut anmeldet ohne sich vorher abzumelden.
//!
//! ## Zustell-Garantien
//! - Best-effort, nicht persistent: ohne angemeldeten Hoerer geht ein
//!   Ereignis verloren; es gibt keine Queue und kein Replay
//! - Synchrone Zustellung, hoechstens einmal pro Hoerer pro Ereignis
//! - Reihenfolge der Hoerer untereinander ist unspezifiziert

use dashmap::DashMap;
use std::sync::{Arc, Weak};

/// Rueckruf-Typ eines Hoerers
pub type Rueckruf<E> = Arc<dyn Fn(&E) + Send + Sync>;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Hoerer-Registry fuer eine Ereignis-Kategorie
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
/// Verschiedene Kategorien (Notifications, Praesenz) verwenden getrennte
/// Registry-Instanzen und beeinflussen sich nicht.
pub struct Registry<E> {
    inner: Arc<RegistryInner<E>>,
}

struct RegistryInner<E> {
    hoerer: DashMap<String, Rueckruf<E>>,
}

impl<E> Clone for Registry<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> Registry<E> {
    /// Erstellt eine neue, leere Registry
    pub fn neu() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                hoerer: DashMap::new(),
            }),
        }
    }

    /// Meldet einen Hoerer an oder ersetzt den bestehenden Rueckruf
    /// derselben ID
    ///
    /// Gibt ein `Abo` zurueck, dessen `abmelden()` den Hoerer wieder
    /// entfernt.
    pub fn abonnieren(
        &self,
        id: impl Into<String>,
        rueckruf: impl Fn(&E) + Send + Sync + 'static,
    ) -> Abo<E> {
        let id = id.into();
        let ersetzt = self
            .inner
            .hoerer
            .insert(id.clone(), Arc::new(rueckruf))
            .is_some();

        if ersetzt {
            tracing::debug!(hoerer = %id, "Hoerer-Rueckruf ersetzt");
        } else {
            tracing::debug!(hoerer = %id, "Hoerer angemeldet");
        }

        Abo {
            registry: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Entfernt einen Hoerer
    ///
    /// Gibt `true` zurueck wenn die ID angemeldet war.
    pub fn abmelden(&self, id: &str) -> bool {
        let entfernt = self.inner.hoerer.remove(id).is_some();
        if entfernt {
            tracing::debug!(hoerer = %id, "Hoerer abgemeldet");
        }
        entfernt
    }

    /// Stellt ein Ereignis an alle aktuell angemeldeten Hoerer zu
    ///
    /// Gibt die Anzahl der erreichten Hoerer zurueck. Ohne Hoerer ist
    /// das Ereignis verloren.
    pub fn ausliefern(&self, ereignis: &E) -> usize {
        // Rueckrufe vor dem Aufruf einsammeln, damit ein Hoerer sich
        // waehrend der Zustellung ab- oder ummelden kann
        let rueckrufe: Vec<Rueckruf<E>> = self
            .inner
            .hoerer
            .iter()
            .map(|eintrag| Arc::clone(eintrag.value()))
            .collect();

        for rueckruf in &rueckrufe {
            rueckruf(ereignis);
        }
        rueckrufe.len()
    }

    /// Prueft ob eine Hoerer-ID angemeldet ist
    pub fn ist_abonniert(&self, id: &str) -> bool {
        self.inner.hoerer.contains_key(id)
    }

    /// Gibt die Anzahl der angemeldeten Hoerer zurueck
    pub fn anzahl(&self) -> usize {
        self.inner.hoerer.len()
    }
}

impl<E> Default for Registry<E> {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Abo
// ---------------------------------------------------------------------------

/// Abmelde-Token eines angemeldeten Hoerers
///
/// Die Lebensdauer ist explizit: das Abo entfernt den Hoerer nur durch
/// einen Aufruf von `abmelden()`, nie implizit beim Drop.
pub struct Abo<E> {
    registry: Weak<RegistryInner<E>>,
    id: String,
}

impl<E> Abo<E> {
    /// Entfernt den Hoerer aus der Registry
    pub fn abmelden(self) {
        if let Some(inner) = self.registry.upgrade() {
            inner.hoerer.remove(&self.id);
            tracing::debug!(hoerer = %self.id, "Hoerer via Abo abgemeldet");
        }
    }

    /// Gibt die Hoerer-ID zurueck
    pub fn id(&self) -> &str {
        &self.id
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
