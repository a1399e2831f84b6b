//! Client-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Client ohne Konfigurationsdatei
//! lauffaehig ist.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Vollstaendige Signalisierungs-Konfiguration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SignalingConfig {
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Authentifizierungs-Einstellungen
    pub auth: AuthEinstellungen,
    /// Wiederverbindungs-Einstellungen
    pub wiederverbindung: WiederverbindungsEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Adresse des Signaling-Servers
    pub server_adresse: String,
    /// Port des Signaling-Servers
    pub server_port: u16,
    /// Maximale Frame-Groesse in Bytes
    pub max_frame_groesse: usize,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            server_adresse: "127.0.0.1".into(),
            server_port: 4477,
            max_frame_groesse: 1024 * 1024,
        }
    }
}

/// Authentifizierungs-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthEinstellungen {
    /// Zeitlimit fuer das Handshake-Ack in Sekunden
    pub handshake_timeout_sek: u64,
}

impl Default for AuthEinstellungen {
    fn default() -> Self {
        Self {
            handshake_timeout_sek: 10,
        }
    }
}

/// Wiederverbindungs-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WiederverbindungsEinstellungen {
    /// Intervall der automatischen Wiederverbindungsversuche in ms
    pub intervall_ms: u64,
    /// Wartezeit zwischen Trennen und Neuverbinden beim manuellen
    /// Wiederverbinden in ms (alter Transport muss vollstaendig weg sein)
    pub settle_ms: u64,
    /// Watchdog fuer den "verbinde erneut"-Indikator in ms
    pub watchdog_ms: u64,
}

impl Default for WiederverbindungsEinstellungen {
    fn default() -> Self {
        Self {
            intervall_ms: 5000,
            settle_ms: 100,
            watchdog_ms: 5000,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl SignalingConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Gibt die vollstaendige Server-Adresse zurueck
    pub fn server_adresse(&self) -> String {
        format!(
            "{}:{}",
            self.netzwerk.server_adresse, self.netzwerk.server_port
        )
    }

    /// Zeitlimit fuer das Handshake-Ack
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.auth.handshake_timeout_sek)
    }

    /// Intervall der automatischen Wiederverbindungsversuche
    pub fn wiederverbindung_intervall(&self) -> Duration {
        Duration::from_millis(self.wiederverbindung.intervall_ms)
    }

    /// Settle-Wartezeit beim manuellen Wiederverbinden
    pub fn settle_verzoegerung(&self) -> Duration {
        Duration::from_millis(self.wiederverbindung.settle_ms)
    }

    /// Watchdog-Zeitlimit fuer den Wiederverbindungs-Indikator
    pub fn watchdog_zeitlimit(&self) -> Duration {
        Duration::from_millis(self.wiederverbindung.watchdog_ms)
    }
}
