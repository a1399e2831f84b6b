//! End-to-End-Ablaeufe gegen einen Mock-Server
//!
//! Der Mock-Server laeuft inline im Testkoerper: Asserts auf der
//! Serverseite schlagen damit direkt im Test fehl. Dekodiert werden
//! `ClientEvent`s, gesendet rohe JSON-Werte – so lassen sich auch
//! absichtlich kaputte Frames einspeisen.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

use kontor_core::types::{CallId, UserId};
use kontor_protocol::control::{ClientEvent, Notification, ServerEvent};
use kontor_protocol::wire::EventCodec;
use kontor_signaling::{
    AnrufZustand, KeineKommandos, SignalingClient, SignalingConfig, SignalingError,
    StatischerSpeicher,
};

const TOKEN: &str = "token-1";

type MockRahmen = Framed<TcpStream, EventCodec<ClientEvent, serde_json::Value>>;

async fn mock_listener() -> (TcpListener, SignalingConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let adresse = listener.local_addr().unwrap();

    let mut config = SignalingConfig::default();
    config.netzwerk.server_adresse = adresse.ip().to_string();
    config.netzwerk.server_port = adresse.port();
    (listener, config)
}

fn test_client(config: SignalingConfig) -> SignalingClient<StatischerSpeicher> {
    SignalingClient::neu(
        config,
        Arc::new(StatischerSpeicher::mit_token(TOKEN)),
        Arc::new(KeineKommandos),
    )
}

async fn akzeptieren(listener: &TcpListener) -> MockRahmen {
    let (stream, _) = listener.accept().await.unwrap();
    Framed::new(stream, EventCodec::neu())
}

async fn sende(rahmen: &mut MockRahmen, ereignis: ServerEvent) {
    rahmen
        .send(serde_json::to_value(&ereignis).unwrap())
        .await
        .unwrap();
}

/// Liest das Auth-Ereignis und bestaetigt es
async fn auth_abwickeln(rahmen: &mut MockRahmen) {
    match rahmen.next().await.unwrap().unwrap() {
        ClientEvent::Auth { request_id, token } => {
            assert_eq!(token, TOKEN);
            sende(rahmen, ServerEvent::auth_ok(request_id)).await;
        }
        other => panic!("Erwartet Auth, erhalten: {other:?}"),
    }
}

/// Pollt bis die Bedingung zutrifft oder das Zeitlimit ablaeuft
async fn warten_bis(beschreibung: &str, bedingung: impl Fn() -> bool) {
    for _ in 0..200 {
        if bedingung() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Bedingung nicht erreicht: {beschreibung}");
}

fn eingehender_anruf(call_id: &str, caller_id: &str) -> ServerEvent {
    ServerEvent::Notification {
        payload: Notification::IncomingCall {
            call_id: CallId::neu(call_id),
            caller_id: UserId::neu(caller_id),
            caller_name: Some("Anna".into()),
        },
    }
}

#[tokio::test]
async fn handshake_und_praesenz_schnappschuss() {
    let (listener, config) = mock_listener().await;
    let client = test_client(config);
    client.starten().await.unwrap();

    let mut rahmen = akzeptieren(&listener).await;
    auth_abwickeln(&mut rahmen).await;

    warten_bis("authentifiziert", || client.ist_authentifiziert()).await;
    assert!(client.praesenz().laedt());

    sende(
        &mut rahmen,
        ServerEvent::ConnectedUsers {
            user_ids: vec![UserId::neu("u1"), UserId::neu("u2")],
        },
    )
    .await;

    warten_bis("Praesenz angekommen", || client.praesenz().anzahl() == 2).await;
    assert!(client.praesenz().ist_online(&UserId::neu("u1")));
    assert!(!client.praesenz().laedt());

    client.stoppen();
}

#[tokio::test]
async fn eingehenden_anruf_annehmen_liefert_meeting_link() {
    let (listener, config) = mock_listener().await;
    let client = test_client(config);
    client.starten().await.unwrap();

    let mut rahmen = akzeptieren(&listener).await;
    auth_abwickeln(&mut rahmen).await;
    warten_bis("authentifiziert", || client.ist_authentifiziert()).await;

    sende(&mut rahmen, eingehender_anruf("c1", "u1")).await;
    warten_bis("Anruf klingelt", || {
        client.anrufe().aktueller_anruf().is_some()
    })
    .await;

    let anruf = client.anrufe().aktueller_anruf().unwrap();
    assert_eq!(anruf.zustand, AnrufZustand::KlingeltEingehend);
    assert_eq!(anruf.peer_name.as_deref(), Some("Anna"));

    // Annehmen und Mock-Antwort laufen nebeneinander
    let antwort = async {
        match rahmen.next().await.unwrap().unwrap() {
            ClientEvent::CallAnswer {
                request_id,
                call_id,
                accept,
            } => {
                assert!(accept);
                assert_eq!(call_id, CallId::neu("c1"));
                sende(
                    &mut rahmen,
                    ServerEvent::anruf_angenommen(request_id, call_id, "https://meet.kontor/raum-1"),
                )
                .await;
            }
            other => panic!("Erwartet CallAnswer, erhalten: {other:?}"),
        }
    };
    let (ergebnis, ()) = tokio::join!(client.anrufe().annehmen(), antwort);
    let annahme = ergebnis.unwrap();

    assert_eq!(annahme.zustand, AnrufZustand::Verbunden);
    assert_eq!(
        annahme.meeting_link.as_deref(),
        Some("https://meet.kontor/raum-1")
    );

    client.stoppen();
}

#[tokio::test]
async fn ablehnen_sendet_absage_und_raeumt_auf() {
    let (listener, config) = mock_listener().await;
    let client = test_client(config);
    client.starten().await.unwrap();

    let mut rahmen = akzeptieren(&listener).await;
    auth_abwickeln(&mut rahmen).await;
    warten_bis("authentifiziert", || client.ist_authentifiziert()).await;

    sende(&mut rahmen, eingehender_anruf("c1", "u1")).await;
    warten_bis("Anruf klingelt", || {
        client.anrufe().aktueller_anruf().is_some()
    })
    .await;

    client.anrufe().ablehnen().unwrap();
    assert!(client.anrufe().aktueller_anruf().is_none());

    // Die Absage erreicht den Server trotzdem
    match rahmen.next().await.unwrap().unwrap() {
        ClientEvent::CallAnswer {
            request_id,
            call_id,
            accept,
        } => {
            assert!(!accept);
            sende(
                &mut rahmen,
                ServerEvent::anruf_abgewiesen(request_id, call_id, "REJECTED"),
            )
            .await;
        }
        other => panic!("Erwartet CallAnswer, erhalten: {other:?}"),
    }

    client.stoppen();
}

#[tokio::test]
async fn abgelehnte_authentifizierung_trennt_die_verbindung() {
    let (listener, config) = mock_listener().await;
    let client = test_client(config);
    client.starten().await.unwrap();

    let mut rahmen = akzeptieren(&listener).await;
    match rahmen.next().await.unwrap().unwrap() {
        ClientEvent::Auth { request_id, .. } => {
            sende(
                &mut rahmen,
                ServerEvent::auth_fehler(request_id, "invalid_token", "Token abgelaufen"),
            )
            .await;
        }
        other => panic!("Erwartet Auth, erhalten: {other:?}"),
    }

    warten_bis("Verbindung getrennt", || !client.ist_verbunden()).await;
    assert!(!client.ist_authentifiziert());

    client.stoppen();
}

#[tokio::test]
async fn ereignisse_vor_dem_handshake_werden_verworfen() {
    let (listener, config) = mock_listener().await;
    let client = test_client(config);
    client.starten().await.unwrap();

    let mut rahmen = akzeptieren(&listener).await;
    let request_id = match rahmen.next().await.unwrap().unwrap() {
        ClientEvent::Auth { request_id, .. } => request_id,
        other => panic!("Erwartet Auth, erhalten: {other:?}"),
    };

    // Notification und Praesenz VOR dem Ack: beides muss verworfen werden
    sende(&mut rahmen, eingehender_anruf("c1", "u1")).await;
    sende(
        &mut rahmen,
        ServerEvent::ConnectedUsers {
            user_ids: vec![UserId::neu("u1")],
        },
    )
    .await;
    sende(&mut rahmen, ServerEvent::auth_ok(request_id)).await;

    warten_bis("authentifiziert", || client.ist_authentifiziert()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(client.anrufe().aktueller_anruf().is_none());
    assert!(client.praesenz().laedt());

    client.stoppen();
}

#[tokio::test]
async fn kaputte_und_verspaetete_ereignisse_beenden_die_verbindung_nicht() {
    let (listener, config) = mock_listener().await;
    let client = test_client(config);
    client.starten().await.unwrap();

    let mut rahmen = akzeptieren(&listener).await;
    auth_abwickeln(&mut rahmen).await;
    warten_bis("authentifiziert", || client.ist_authentifiziert()).await;

    // Gueltiges JSON, aber kein gueltiges Ereignis (Pflichtfeld fehlt)
    rahmen
        .send(serde_json::json!({ "type": "notification" }))
        .await
        .unwrap();
    // Antwort auf eine Anfrage die nie gestellt wurde
    sende(
        &mut rahmen,
        ServerEvent::anruf_angenommen(999, CallId::neu("c9"), "https://meet.kontor/fremd"),
    )
    .await;
    // Danach ein regulaeres Ereignis: die Verbindung lebt noch
    sende(
        &mut rahmen,
        ServerEvent::ConnectedUsers {
            user_ids: vec![UserId::neu("u1")],
        },
    )
    .await;

    warten_bis("Praesenz angekommen", || client.praesenz().anzahl() == 1).await;
    assert!(client.ist_verbunden());
    assert!(client.anrufe().aktueller_anruf().is_none());

    client.stoppen();
}

#[tokio::test]
async fn anrufen_waehrend_klingelndem_anruf_wird_abgewiesen() {
    let (listener, config) = mock_listener().await;
    let client = test_client(config);
    client.starten().await.unwrap();

    let mut rahmen = akzeptieren(&listener).await;
    auth_abwickeln(&mut rahmen).await;
    warten_bis("authentifiziert", || client.ist_authentifiziert()).await;

    sende(&mut rahmen, eingehender_anruf("c1", "u1")).await;
    warten_bis("Anruf klingelt", || {
        client.anrufe().aktueller_anruf().is_some()
    })
    .await;

    let ergebnis = client.anrufe().anrufen(UserId::neu("u2")).await;
    assert!(matches!(ergebnis, Err(SignalingError::BereitsAktiv)));

    client.stoppen();
}
