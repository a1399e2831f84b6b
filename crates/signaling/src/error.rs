//! Fehlertypen fuer die Signalisierung

use kontor_core::KontorError;
use thiserror::Error;

/// Fehlertyp fuer die Signalisierung
#[derive(Debug, Error)]
pub enum SignalingError {
    /// IO-Fehler (TCP, Socket)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Operation erfordert eine bestehende Verbindung
    #[error("Nicht mit Server verbunden")]
    NichtVerbunden,

    /// Verbindung wurde waehrend einer laufenden Anfrage getrennt
    #[error("Verbindung getrennt")]
    Getrennt,

    /// Senden an den Server fehlgeschlagen (Queue geschlossen)
    #[error("Senden fehlgeschlagen")]
    SendFehler,

    /// Zeitlimit ueberschritten (Handshake)
    #[error("Zeitlimit ueberschritten")]
    Zeitlimit,

    /// Server hat die Authentifizierung abgelehnt
    #[error("Authentifizierung fehlgeschlagen: {0}")]
    Authentifizierung(String),

    /// Antwort vom Server hatte nicht den erwarteten Typ
    #[error("Unerwartete Antwort: {0}")]
    UnerwarteteAntwort(String),

    /// Annehmen/Ablehnen ohne klingelnden Anruf
    #[error("Kein aktiver Anruf")]
    KeinAktiverAnruf,

    /// Anruf starten waehrend bereits eine Verhandlung laeuft
    #[error("Es laeuft bereits eine Anruf-Verhandlung")]
    BereitsAktiv,

    /// Verhandlung wurde waehrend der laufenden Remote-Prozedur ueberholt;
    /// die verspaetete Antwort wurde verworfen
    #[error("Verhandlung wurde ueberholt")]
    Ueberholt,

    /// Remote-Prozedur hat den Anruf nicht zustande gebracht
    #[error("Anruf fehlgeschlagen: {0}")]
    AnrufFehlgeschlagen(String),
}

/// Result-Typ fuer die Signalisierung
pub type SignalingResult<T> = Result<T, SignalingError>;

impl From<SignalingError> for KontorError {
    fn from(e: SignalingError) -> Self {
        match e {
            SignalingError::Io(io) => KontorError::Verbindung(io.to_string()),
            SignalingError::NichtVerbunden | SignalingError::SendFehler => {
                KontorError::Verbindung(e.to_string())
            }
            SignalingError::Getrennt => KontorError::Getrennt(e.to_string()),
            SignalingError::Zeitlimit => KontorError::Zeitlimit(e.to_string()),
            SignalingError::Authentifizierung(grund) => KontorError::Authentifizierung(grund),
            SignalingError::UnerwarteteAntwort(grund) => KontorError::UngueltigeNachricht(grund),
            SignalingError::KeinAktiverAnruf => KontorError::KeinAktiverAnruf,
            SignalingError::BereitsAktiv | SignalingError::Ueberholt => {
                KontorError::AnrufFehlgeschlagen(e.to_string())
            }
            SignalingError::AnrufFehlgeschlagen(grund) => KontorError::AnrufFehlgeschlagen(grund),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        assert_eq!(
            SignalingError::KeinAktiverAnruf.to_string(),
            "Kein aktiver Anruf"
        );
        assert_eq!(
            SignalingError::AnrufFehlgeschlagen("REJECTED".into()).to_string(),
            "Anruf fehlgeschlagen: REJECTED"
        );
    }

    #[test]
    fn konvertierung_in_kontor_fehler() {
        let e: KontorError = SignalingError::KeinAktiverAnruf.into();
        assert!(matches!(e, KontorError::KeinAktiverAnruf));

        let e: KontorError = SignalingError::Authentifizierung("Token abgelehnt".into()).into();
        assert!(matches!(e, KontorError::Authentifizierung(_)));
    }
}
