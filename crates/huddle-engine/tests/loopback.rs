//! Integration tests for the loopback media engine.

use std::time::Duration;

use huddle_engine::{
    Consumer, EngineError, LoopbackEngine, LoopbackRouter, MediaEngine,
    Producer, Router, RouterConfig, TransportOptions, WebRtcTransport,
};
use huddle_protocol::{
    DtlsParameters, MediaKind, ProducerId, RtpCapabilities, RtpParameters,
};
use serde_json::json;

async fn router(engine: &LoopbackEngine) -> LoopbackRouter {
    engine.create_router(&RouterConfig::default()).await.unwrap()
}

fn audio_caps() -> RtpCapabilities {
    RtpCapabilities(json!({ "codecs": [{ "kind": "audio", "mimeType": "audio/opus" }] }))
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_router_capabilities_list_configured_codecs() {
    let engine = LoopbackEngine::new();
    let router = router(&engine).await;

    let caps = router.rtp_capabilities();
    let codecs = caps.0["codecs"].as_array().unwrap();
    assert_eq!(codecs.len(), 2);
    assert_eq!(codecs[0]["mimeType"], "audio/opus");
    assert_eq!(codecs[1]["mimeType"], "video/VP8");
}

#[tokio::test]
async fn test_router_without_codecs_is_rejected() {
    let engine = LoopbackEngine::new();
    let result = engine
        .create_router(&RouterConfig { media_codecs: vec![] })
        .await;
    assert!(matches!(result, Err(EngineError::Rejected(_))));
}

#[tokio::test]
async fn test_router_close_is_counted_once() {
    let engine = LoopbackEngine::new();
    let router = router(&engine).await;

    router.close();
    router.clone().close();

    assert!(router.is_closed());
    assert_eq!(engine.stats().routers_closed, 1);

    let result = router
        .create_webrtc_transport(&TransportOptions::default())
        .await;
    assert!(matches!(result, Err(EngineError::Closed(_))));
}

#[tokio::test]
async fn test_can_consume_requires_live_producer_and_matching_kind() {
    let engine = LoopbackEngine::new();
    let router = router(&engine).await;
    let transport = router
        .create_webrtc_transport(&TransportOptions::default())
        .await
        .unwrap();
    let producer = transport
        .produce(MediaKind::Audio, RtpParameters(json!({})))
        .await
        .unwrap();

    assert!(router.can_consume(producer.id(), &audio_caps()));
    let video_only =
        RtpCapabilities(json!({ "codecs": [{ "mimeType": "video/VP8" }] }));
    assert!(!router.can_consume(producer.id(), &video_only));
    assert!(!router.can_consume(&ProducerId::from("nope"), &audio_caps()));

    producer.close();
    assert!(!router.can_consume(producer.id(), &audio_caps()));
    assert_eq!(router.producer_count(), 0);
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_transport_params_are_synthesized() {
    let engine = LoopbackEngine::new();
    let router = router(&engine).await;
    let transport = router
        .create_webrtc_transport(&TransportOptions::default())
        .await
        .unwrap();

    let params = transport.connection_params();
    assert_eq!(&params.id, transport.id());
    assert_eq!(params.id.as_str().len(), 32);
    assert!(params.ice_parameters.0["usernameFragment"].is_string());
    assert_eq!(params.ice_candidates.0.as_array().unwrap().len(), 2);
    assert_eq!(
        params.dtls_parameters.0["fingerprints"][0]["algorithm"],
        "sha-256"
    );
}

#[tokio::test]
async fn test_transport_double_connect_is_rejected() {
    let engine = LoopbackEngine::new();
    let router = router(&engine).await;
    let transport = router
        .create_webrtc_transport(&TransportOptions::default())
        .await
        .unwrap();

    let dtls = DtlsParameters(json!({ "role": "client" }));
    transport.connect(dtls.clone()).await.unwrap();
    assert!(transport.is_connected());

    let again = transport.connect(dtls).await;
    assert!(matches!(again, Err(EngineError::Rejected(_))));
}

#[tokio::test]
async fn test_transport_failure_injection() {
    let engine = LoopbackEngine::new();
    let router = router(&engine).await;

    engine.fail_transports(true);
    let result = router
        .create_webrtc_transport(&TransportOptions::default())
        .await;
    assert!(matches!(result, Err(EngineError::Rejected(_))));

    engine.fail_transports(false);
    assert!(
        router
            .create_webrtc_transport(&TransportOptions::default())
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_closed_transport_refuses_produce() {
    let engine = LoopbackEngine::new();
    let router = router(&engine).await;
    let transport = router
        .create_webrtc_transport(&TransportOptions::default())
        .await
        .unwrap();

    transport.close();
    let result = transport
        .produce(MediaKind::Video, RtpParameters(json!({})))
        .await;
    assert!(matches!(result, Err(EngineError::Closed(_))));
    assert_eq!(engine.stats().transports_closed, 1);
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_consumer_starts_paused_and_resumes() {
    let engine = LoopbackEngine::new();
    let router = router(&engine).await;
    let send = router
        .create_webrtc_transport(&TransportOptions::default())
        .await
        .unwrap();
    let recv = router
        .create_webrtc_transport(&TransportOptions::default())
        .await
        .unwrap();
    let producer = send
        .produce(MediaKind::Audio, RtpParameters(json!({})))
        .await
        .unwrap();

    let consumer = recv
        .consume(producer.id().clone(), audio_caps(), true)
        .await
        .unwrap();
    assert!(consumer.is_paused());
    assert_eq!(consumer.producer_id(), producer.id());
    assert_eq!(consumer.kind(), MediaKind::Audio);
    assert_eq!(consumer.rtp_parameters().0["codecs"][0]["mimeType"], "audio/opus");

    consumer.resume().await.unwrap();
    assert!(!consumer.is_paused());
    assert_eq!(engine.stats().consumer_resumes, 1);
}

#[tokio::test]
async fn test_consume_unknown_producer_is_rejected() {
    let engine = LoopbackEngine::new();
    let router = router(&engine).await;
    let recv = router
        .create_webrtc_transport(&TransportOptions::default())
        .await
        .unwrap();

    let result = recv
        .consume(ProducerId::from("missing"), audio_caps(), true)
        .await;
    assert!(matches!(result, Err(EngineError::Rejected(_))));
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_kill_worker_resolves_worker_died() {
    let engine = LoopbackEngine::new();
    let watcher = engine.clone();
    let died = tokio::spawn(async move { watcher.worker_died().await });

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!died.is_finished());

    engine.kill_worker();
    tokio::time::timeout(Duration::from_secs(1), died)
        .await
        .expect("worker_died should resolve")
        .unwrap();

    assert!(!engine.is_worker_alive());
    let result = engine.create_router(&RouterConfig::default()).await;
    assert!(matches!(result, Err(EngineError::WorkerDied)));
}

#[tokio::test]
async fn test_latency_delays_engine_calls() {
    let engine = LoopbackEngine::new().with_latency(Duration::from_millis(30));
    let started = tokio::time::Instant::now();
    let _router = router(&engine).await;
    assert!(started.elapsed() >= Duration::from_millis(30));
}
