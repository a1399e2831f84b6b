//! Wire-Format fuer den Duplex-Kanal
//!
//! Frame-basiertes Protokoll: Length(u32 big-endian) + JSON-Payload.
//!
//! ## Frame-Format
//!
//! ```text
//! +--------+--------+--------+--------+----...----+
//! | Laenge (u32 BE) | 4 Bytes        | Payload    |
//! +--------+--------+--------+--------+----...----+
//! ```
//!
//! Die Laenge gibt die Anzahl der Payload-Bytes an (ohne die 4 Laengen-Bytes).
//! Maximale Frame-Groesse ist konfigurierbar (Standard: 1 MB).
//!
//! Der Codec ist generisch ueber Empfangs- und Sende-Typ, damit dieselbe
//! Implementierung die Client-Seite und einen Test-Server bedienen kann.

use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use std::marker::PhantomData;
use tokio_util::codec::{Decoder, Encoder};

use crate::control::{ClientEvent, ServerEvent};

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Standard-maximale Frame-Groesse (1 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Groesse des Laengen-Felds in Bytes
pub const LENGTH_FIELD_SIZE: usize = 4;

// ---------------------------------------------------------------------------
// EventCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer den frame-basierten Duplex-Kanal
///
/// `Ein` ist der Typ eingehender Frames (Decoder-Item), `Aus` der Typ
/// ausgehender Frames (Encoder-Item).
#[derive(Debug, Clone)]
pub struct EventCodec<Ein, Aus> {
    /// Maximale erlaubte Frame-Groesse in Bytes
    max_frame_size: usize,
    _richtung: PhantomData<fn() -> (Ein, Aus)>,
}

/// Codec der Client-Seite
///
/// Eingehende Frames werden als `serde_json::Value` dekodiert; die
/// Typ-Diskriminierung zu `ServerEvent` passiert erst beim Dispatch,
/// damit fehlerhafte Payloads verworfen werden koennen ohne die
/// Verbindung zu beenden.
pub type ClientCodec = EventCodec<serde_json::Value, ClientEvent>;

/// Codec der Server-Seite (Mock-Server in Tests)
pub type ServerCodec = EventCodec<ClientEvent, ServerEvent>;

impl<Ein, Aus> EventCodec<Ein, Aus> {
    /// Erstellt einen neuen Codec mit Standard-Limits
    pub fn neu() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            _richtung: PhantomData,
        }
    }

    /// Erstellt einen Codec mit benutzerdefinierter maximaler Frame-Groesse
    pub fn mit_max_groesse(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            _richtung: PhantomData,
        }
    }

    /// Gibt die konfigurierte maximale Frame-Groesse zurueck
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl<Ein, Aus> Default for EventCodec<Ein, Aus> {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Decoder-Implementierung
// ---------------------------------------------------------------------------

impl<Ein, Aus> Decoder for EventCodec<Ein, Aus>
where
    Ein: DeserializeOwned,
{
    type Item = Ein;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Warte auf mindestens 4 Bytes fuer das Laengen-Feld
        if src.len() < LENGTH_FIELD_SIZE {
            return Ok(None);
        }

        // Laenge lesen (big-endian u32) ohne den Buffer zu veraendern
        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        // Maximale Frame-Groesse pruefen
        if length > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Frame zu gross: {} Bytes (Maximum: {} Bytes)",
                    length, self.max_frame_size
                ),
            ));
        }

        // Pruefen ob der vollstaendige Frame bereits im Buffer ist
        let total_size = LENGTH_FIELD_SIZE + length;
        if src.len() < total_size {
            // Speicher vorbelegen um Reallocations zu vermeiden
            src.reserve(total_size - src.len());
            return Ok(None);
        }

        // Laengen-Feld verbrauchen
        src.advance(LENGTH_FIELD_SIZE);

        // Payload-Bytes extrahieren
        let payload = src.split_to(length);

        // JSON deserialisieren
        let ereignis: Ein = serde_json::from_slice(&payload).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("JSON-Deserialisierung fehlgeschlagen: {}", e),
            )
        })?;

        Ok(Some(ereignis))
    }
}

// ---------------------------------------------------------------------------
// Encoder-Implementierung
// ---------------------------------------------------------------------------

impl<Ein, Aus> Encoder<Aus> for EventCodec<Ein, Aus>
where
    Ein: DeserializeOwned,
    Aus: Serialize,
{
    type Error = io::Error;

    fn encode(&mut self, item: Aus, dst: &mut BytesMut) -> Result<(), Self::Error> {
        // JSON serialisieren
        let json = serde_json::to_vec(&item).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("JSON-Serialisierung fehlgeschlagen: {}", e),
            )
        })?;

        // Groesse pruefen
        if json.len() > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Nachricht zu gross: {} Bytes (Maximum: {} Bytes)",
                    json.len(),
                    self.max_frame_size
                ),
            ));
        }

        // Laengen-Feld + Payload schreiben
        dst.reserve(LENGTH_FIELD_SIZE + json.len());
        dst.put_u32(json.len() as u32);
        dst.put_slice(&json);

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use kontor_core::types::{CallId, UserId};

    #[test]
    fn client_event_roundtrip() {
        let mut server_codec = ServerCodec::neu();
        let mut buf = BytesMut::new();

        let ereignis = ClientEvent::CallInitiate {
            receiver_id: UserId::neu("u7"),
        };
        // Client-Seite kodiert ...
        let mut client_codec = ClientCodec::neu();
        client_codec.encode(ereignis, &mut buf).unwrap();

        // ... Server-Seite dekodiert
        let dekodiert = server_codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(
            dekodiert,
            ClientEvent::CallInitiate { receiver_id } if receiver_id == UserId::neu("u7")
        ));
        assert!(buf.is_empty(), "Buffer muss vollstaendig verbraucht sein");
    }

    #[test]
    fn unvollstaendiger_frame_wartet_auf_mehr_daten() {
        let mut codec = ServerCodec::neu();
        let mut buf = BytesMut::new();

        let mut voll = BytesMut::new();
        ClientCodec::neu()
            .encode(
                ClientEvent::Auth {
                    request_id: 1,
                    token: "abc".into(),
                },
                &mut voll,
            )
            .unwrap();

        // Nur die Haelfte einspielen -> noch kein Item
        let haelfte = voll.split_to(voll.len() / 2);
        buf.extend_from_slice(&haelfte);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        // Rest einspielen -> Item vollstaendig
        buf.extend_from_slice(&voll);
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn zu_grosser_frame_wird_abgelehnt() {
        let mut codec = ServerCodec::mit_max_groesse(16);
        let mut buf = BytesMut::new();
        // Laengen-Feld behauptet 1024 Payload-Bytes
        buf.put_u32(1024);
        buf.put_slice(&[0u8; 32]);

        let fehler = codec.decode(&mut buf).unwrap_err();
        assert_eq!(fehler.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn client_codec_dekodiert_tolerant_als_value() {
        let mut codec = ClientCodec::neu();
        let mut buf = BytesMut::new();

        // Bekannter Typ mit fehlerhaftem Payload – auf Codec-Ebene noch ok,
        // die Diskriminierung passiert erst beim Dispatch
        let kaputt = br#"{"type":"connected_users","userIds":42}"#;
        buf.put_u32(kaputt.len() as u32);
        buf.put_slice(kaputt);

        let wert = codec.decode(&mut buf).unwrap().unwrap();
        assert!(serde_json::from_value::<ServerEvent>(wert).is_err());
    }

    #[test]
    fn mehrere_frames_im_buffer() {
        let mut server_codec = ServerCodec::neu();
        let mut client_codec = ClientCodec::neu();
        let mut buf = BytesMut::new();

        for i in 0..3 {
            client_codec
                .encode(
                    ClientEvent::CallAnswer {
                        request_id: i,
                        call_id: CallId::neu(format!("c{i}")),
                        accept: true,
                    },
                    &mut buf,
                )
                .unwrap();
        }

        for i in 0..3 {
            let e = server_codec.decode(&mut buf).unwrap().unwrap();
            assert!(matches!(
                e,
                ClientEvent::CallAnswer { request_id, .. } if request_id == i
            ));
        }
        assert!(server_codec.decode(&mut buf).unwrap().is_none());
    }
}
