mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{routing::get, Router};
use reqwest::StatusCode;

use gatehouse::cache::CacheKey;
use gatehouse::http::DrainOutcome;
use gatehouse::lifecycle::{ConfigSource, Lifecycle, Phase};

use common::{client, fake_backend, lazy_registry, registry_at, test_config, TestServer, ALLOWED_ORIGIN};

fn sleeper(delay: Duration) -> Router<gatehouse::http::AppState> {
    Router::new().route(
        "/sleep",
        get(move || async move {
            tokio::time::sleep(delay).await;
            "done"
        }),
    )
}

const CACHES: [(&str, i64); 3] = [("default", 0), ("default", 1), ("sessions", 0)];

#[tokio::test]
async fn in_flight_requests_finish_and_every_cache_closes() {
    let server = TestServer::start(test_config(), lazy_registry(&CACHES), sleeper(Duration::from_millis(400))).await;
    let registry = server.registry.clone();
    let http = client();

    let mut requests = Vec::new();
    for _ in 0..3 {
        let request = http.get(server.url("/sleep")).header("origin", ALLOWED_ORIGIN).send();
        requests.push(tokio::spawn(request));
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    let report = server.stop(Duration::from_secs(3)).await;
    assert!(started.elapsed() < Duration::from_secs(2));

    for request in requests {
        let response = request.await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "done");
    }

    assert_eq!(report.listener, DrainOutcome::Drained);
    assert_eq!(report.cache.attempted(), CACHES.len());
    let expected: Vec<_> = {
        let mut keys: Vec<_> = CACHES.iter().map(|&(n, d)| CacheKey::new(n, d)).collect();
        keys.sort();
        keys
    };
    assert_eq!(report.cache.closed, expected);
    assert!(registry.lookup("default", 0).is_err());
}

#[tokio::test]
async fn stragglers_are_aborted_at_the_deadline() {
    let server = TestServer::start(test_config(), lazy_registry(&CACHES), sleeper(Duration::from_secs(30))).await;
    let http = client();

    let stuck = tokio::spawn(http.get(server.url("/sleep")).header("origin", ALLOWED_ORIGIN).send());
    tokio::time::sleep(Duration::from_millis(100)).await;

    let grace = Duration::from_millis(300);
    let started = Instant::now();
    let report = server.stop(grace).await;
    let elapsed = started.elapsed();

    // Drain and cache close share one grace period.
    assert!(elapsed >= grace);
    assert!(elapsed < grace * 2, "shutdown took {elapsed:?}");
    assert!(matches!(report.listener, DrainOutcome::Forced { aborted } if aborted >= 1));
    assert_eq!(report.cache.attempted(), CACHES.len());

    assert!(stuck.await.unwrap().is_err());
}

#[tokio::test]
async fn slow_drain_and_slow_cache_close_overlap() {
    const HOLD: Duration = Duration::from_millis(600);

    let backend = fake_backend().await;
    let registry = registry_at(backend, &[("default", 0), ("sessions", 0)]);
    let sessions = registry.lookup("sessions", 0).unwrap();
    sessions.ping().await.unwrap();
    assert_eq!(sessions.get("missing").await.unwrap(), None);

    // Keeps the sessions pool from closing until HOLD after close begins.
    let connection = sessions.connection().await.unwrap();
    let holder = {
        let sessions = sessions.clone();
        tokio::spawn(async move {
            while !sessions.is_closed() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            tokio::time::sleep(HOLD).await;
            drop(connection);
        })
    };

    let server = TestServer::start(test_config(), registry, sleeper(HOLD + Duration::from_millis(100))).await;
    let request = tokio::spawn(client().get(server.url("/sleep")).header("origin", ALLOWED_ORIGIN).send());
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    let report = server.stop(Duration::from_secs(5)).await;
    let elapsed = started.elapsed();

    // Each side alone takes about HOLD; run back to back they would take twice that.
    assert!(elapsed >= HOLD - Duration::from_millis(50), "shutdown took {elapsed:?}");
    assert!(elapsed < HOLD + Duration::from_millis(400), "shutdown took {elapsed:?}");
    assert_eq!(report.listener, DrainOutcome::Drained);
    assert_eq!(report.cache.closed.len(), 2);
    assert!(report.cache.abandoned.is_empty());

    assert_eq!(request.await.unwrap().unwrap().status(), StatusCode::OK);
    holder.await.unwrap();
}

#[tokio::test]
async fn listener_refuses_connections_after_stop() {
    let server = TestServer::start(test_config(), lazy_registry(&[]), Router::new()).await;
    let addr = server.addr;
    server.stop(Duration::from_millis(200)).await;

    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn lifecycle_serves_from_a_config_file() {
    let path = std::env::temp_dir().join(format!("gatehouse-test-{}.toml", std::process::id()));
    std::fs::write(
        &path,
        format!(
            r#"
            host = "127.0.0.1"
            port = 0

            [listener]
            shutdown_grace_secs = 1

            [cors]
            allow_origins = ["{ALLOWED_ORIGIN}"]

            [auth]
            client_id = "from-file"
            "#
        ),
    )
    .unwrap();

    let lifecycle = Arc::new(Lifecycle::new());
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let runner = lifecycle.clone();
    let source = ConfigSource::File {
        path: path.clone(),
        port_override: None,
    };
    let task = tokio::spawn(async move {
        runner
            .run(source, async move {
                let _ = stopped.await;
            })
            .await
    });

    assert_eq!(lifecycle.reached(Phase::Serving).await, Phase::Serving);
    let addr = lifecycle.local_addr().unwrap();

    let response = client()
        .get(format!("http://{addr}/health"))
        .header("origin", ALLOWED_ORIGIN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let _ = stop.send(());
    let report = task.await.unwrap().unwrap();
    assert_eq!(report.listener, DrainOutcome::Drained);
    assert_eq!(report.cache.attempted(), 0);
    assert_eq!(lifecycle.phase(), Phase::Stopped);

    let _ = std::fs::remove_file(path);
}
