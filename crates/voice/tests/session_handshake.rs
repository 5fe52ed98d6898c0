//! Verbindungsaufbau und Lebenszyklus gegen ein In-Memory-Relay

mod common;

use common::*;
use funkwerk_core::event::SessionEreignis;
use funkwerk_core::types::UserId;
use funkwerk_protocol::signal::{NachrichtenArt, SignalPayload, TeilnehmerInfo};
use funkwerk_voice::{VerbindungsZustand, VoiceError};
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn handshake_durchlaeuft_alle_schritte() {
    let mut u = umgebung(
        test_config(),
        RelayVerhalten {
            teilnehmer: vec![TeilnehmerInfo {
                user_id: UserId(5),
                ssrc: Some(55),
            }],
            ..Default::default()
        },
    );
    let mut zustaende = u.session.zustand_beobachten();
    let beobachtet = tokio::spawn(async move {
        let mut gesehen = Vec::new();
        while zustaende.changed().await.is_ok() {
            let z = zustaende.borrow_and_update().clone();
            let fertig = z == VerbindungsZustand::Verbunden;
            gesehen.push(z);
            if fertig {
                break;
            }
        }
        gesehen
    });

    u.session
        .starten("relay.test:4000", UserId(100), "token")
        .await
        .unwrap();

    assert_eq!(u.session.zustand(), VerbindungsZustand::Verbunden);
    let ssrc = u.session.ssrc().await.unwrap();
    assert_ne!(ssrc, 0);
    assert_eq!(
        ereignis_abwarten(&mut u.ereignisse, |e| matches!(e, SessionEreignis::Verbunden { .. })).await,
        SessionEreignis::Verbunden { ssrc }
    );

    assert_eq!(
        u.relay.anfrage_arten(),
        vec![
            NachrichtenArt::Capabilities,
            NachrichtenArt::Join,
            NachrichtenArt::CreateTransport,
            NachrichtenArt::Produce,
        ]
    );
    match u.relay.anfragen.lock().last() {
        Some(SignalPayload::Produce(p)) => {
            assert_eq!(p.ssrc, ssrc);
            assert_eq!(p.transport_id, "transport-1");
        }
        andere => panic!("Produce erwartet, erhalten {andere:?}"),
    }
    assert_eq!(
        *u.relay.transport_ziel.lock(),
        Some("127.0.0.1:50000".parse().unwrap())
    );
    // Teilnehmer aus der Join-Antwort sind sofort aufloesbar
    assert_eq!(u.session.statistik().sender_eintraege, 1);

    // Zwischenstaende kommen ueber den watch-Kanal; einzelne koennen
    // zusammenfallen, das Ende ist immer Verbunden
    let gesehen = beobachtet.await.unwrap();
    assert_eq!(gesehen.last(), Some(&VerbindungsZustand::Verbunden));
    assert!(gesehen
        .iter()
        .all(|z| matches!(z, VerbindungsZustand::Verbinde(_) | VerbindungsZustand::Verbunden)));

    u.session.bereit_abwarten().await.unwrap();
    u.session.stoppen().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn antwort_falscher_art_wird_ignoriert() {
    let u = umgebung(
        test_config(),
        RelayVerhalten {
            falsche_art_zuerst: true,
            ..Default::default()
        },
    );
    u.session
        .starten("relay.test:4000", UserId(100), "token")
        .await
        .unwrap();
    assert_eq!(u.session.zustand(), VerbindungsZustand::Verbunden);
    assert_eq!(u.relay.anfrage_arten().len(), 4);
    u.session.stoppen().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn zeitlimit_bricht_aufbau_ab() {
    let mut u = umgebung(
        test_config(),
        RelayVerhalten {
            join_ignorieren: true,
            ..Default::default()
        },
    );
    let start = Instant::now();

    let ergebnis = u.session.starten("relay.test:4000", UserId(100), "token").await;
    match ergebnis {
        Err(VoiceError::Verbindung { schritt, .. }) => assert_eq!(schritt, "join"),
        anderes => panic!("Verbindungsfehler erwartet, erhalten {anderes:?}"),
    }
    assert!(start.elapsed() >= Duration::from_millis(10_000));
    assert!(matches!(
        u.session.zustand(),
        VerbindungsZustand::Fehlgeschlagen(_)
    ));
    match ereignis_abwarten(&mut u.ereignisse, |e| {
        matches!(e, SessionEreignis::VerbindungFehlgeschlagen { .. })
    })
    .await
    {
        SessionEreignis::VerbindungFehlgeschlagen { schritt, .. } => assert_eq!(schritt, "join"),
        _ => unreachable!(),
    }
    assert_eq!(
        u.relay.anfrage_arten(),
        vec![NachrichtenArt::Capabilities, NachrichtenArt::Join]
    );
    assert!(u.session.bereit_abwarten().await.is_err());
    assert!(u.session.ssrc().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn fehler_antwort_bricht_aufbau_ab() {
    let u = umgebung(
        test_config(),
        RelayVerhalten {
            fehler_bei: Some(NachrichtenArt::CreateTransport),
            ..Default::default()
        },
    );

    match u.session.starten("relay.test:4000", UserId(100), "token").await {
        Err(VoiceError::Verbindung { schritt, grund }) => {
            assert_eq!(schritt, "create_transport");
            assert!(grund.contains("verboten"), "{grund}");
        }
        anderes => panic!("Verbindungsfehler erwartet, erhalten {anderes:?}"),
    }
    // Kein Transport geoeffnet, kein Produce gesendet
    assert!(u.relay.transport_ziel.lock().is_none());
    assert!(!u.relay.anfrage_arten().contains(&NachrichtenArt::Produce));
}

#[tokio::test(start_paused = true)]
async fn zweiter_start_wird_abgelehnt() {
    let u = verbunden(test_config(), RelayVerhalten::default()).await;
    assert!(matches!(
        u.session.starten("relay.test:4000", UserId(100), "token").await,
        Err(VoiceError::BereitsVerbunden)
    ));
    assert_eq!(u.session.zustand(), VerbindungsZustand::Verbunden);
    u.session.stoppen().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn keepalive_misst_latenz() {
    let mut u = verbunden(
        test_config(),
        RelayVerhalten {
            keepalive_echo: true,
            ..Default::default()
        },
    )
    .await;

    ereignis_abwarten(&mut u.ereignisse, |e| {
        matches!(e, SessionEreignis::LatenzGeaendert { .. })
    })
    .await;
    assert!(u.session.statistik().empfang.keepalive_antworten >= 1);
    assert!(u.relay.keepalives_vom_client() >= 1);
    u.session.stoppen().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stoppen_baut_alles_ab() {
    let mut u = verbunden(test_config(), RelayVerhalten::default()).await;
    let a = UserId(1);
    let b = UserId(2);

    u.relay.sprecher_melden(a, 10);
    u.relay.sprecher_melden(b, 11);
    for _ in 0..2 {
        ereignis_abwarten(&mut u.ereignisse, |e| {
            matches!(e, SessionEreignis::SprechStatus { .. })
        })
        .await;
    }
    u.relay.rtp_senden(10, 0, [1, 0]);
    u.relay.rtp_senden(11, 0, [2, 0]);
    warten_bis(|| u.session.eingehende_pipelines().len() == 2).await;
    let streams = u.session.eingehende_pipelines();

    u.session.stoppen().await.unwrap();

    let mut zerstoert = Vec::new();
    loop {
        match ereignis_abwarten(&mut u.ereignisse, |e| {
            matches!(
                e,
                SessionEreignis::StreamZerstoert { .. } | SessionEreignis::Getrennt
            )
        })
        .await
        {
            SessionEreignis::StreamZerstoert { user_id } => zerstoert.push(user_id),
            _ => break,
        }
    }
    zerstoert.sort();
    assert_eq!(zerstoert, vec![a, b]);

    assert_eq!(u.session.zustand(), VerbindungsZustand::Getrennt);
    assert!(u.session.eingehende_pipelines().is_empty());
    assert_eq!(u.session.statistik().sender_eintraege, 0);
    assert!(streams.iter().all(|s| s.ist_geschlossen()));
    assert!(u.session.ssrc().await.is_none());

    // Nach dem Stoppen keine Keepalives mehr
    let vorher = u.relay.keepalives_vom_client();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(u.relay.keepalives_vom_client(), vorher);

    // Erneutes Stoppen ist ein No-Op
    u.session.stoppen().await.unwrap();
}
