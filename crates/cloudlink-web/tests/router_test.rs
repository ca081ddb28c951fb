//! Router tests: requests travel through the channel transport to a loop
//! thread owning the credential store, exactly as on a running host.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use pretty_assertions::assert_eq;
use tower::ServiceExt;

use cloudlink_core::credentials::REGION_SIZE;
use cloudlink_core::{
    channel_transport, ConfigPortal, CredentialStore, Credentials, MemoryRegion, PortalRequest,
    PortalTransport, RestartReason,
};
use cloudlink_web::{create_router, PortalState};

/// A stand-in control loop: services the transport until stopped and returns
/// the store and every restart requested.
struct LoopThread {
    stop: Arc<AtomicBool>,
    restarts: Arc<Mutex<Vec<RestartReason>>>,
    handle: thread::JoinHandle<CredentialStore<MemoryRegion>>,
}

impl LoopThread {
    fn finish(self) -> (CredentialStore<MemoryRegion>, Vec<RestartReason>) {
        self.stop.store(true, Ordering::SeqCst);
        let store = self.handle.join().unwrap();
        let restarts = self.restarts.lock().unwrap().clone();
        (store, restarts)
    }
}

fn start(initial: Credentials) -> (axum::Router, LoopThread) {
    let (client, mut transport) = channel_transport(4);
    let stop = Arc::new(AtomicBool::new(false));
    let restarts = Arc::new(Mutex::new(Vec::new()));

    let handle = {
        let stop = stop.clone();
        let restarts = restarts.clone();
        thread::spawn(move || {
            let mut store = CredentialStore::new(MemoryRegion::new(REGION_SIZE));
            store.save(&initial).unwrap();
            let portal = ConfigPortal::new("Test Portal", Duration::from_secs(2));

            while !stop.load(Ordering::SeqCst) {
                let serviced = transport.service(&mut |request: &PortalRequest| {
                    let response = portal.handle(&mut store, request);
                    if let Some(reason) = response.restart {
                        restarts.lock().unwrap().push(reason);
                    }
                    response
                });
                if !serviced {
                    thread::sleep(Duration::from_millis(2));
                }
            }
            store
        })
    };

    let router = create_router(PortalState::new(client));
    (
        router,
        LoopThread {
            stop,
            restarts,
            handle,
        },
    )
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_index_served_from_loop() {
    let (router, worker) = start(Credentials::new("HomeNet", "secret123", "dev-42"));

    let response = router.oneshot(get("/")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/html; charset=utf-8"
    );
    let body = body_text(response).await;
    assert!(body.contains("SSID: HomeNet"));
    assert!(body.contains("Test Portal"));

    let (_, restarts) = worker.finish();
    assert!(restarts.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_apply_through_router() {
    let (router, worker) = start(Credentials::default());

    let response = router
        .oneshot(get("/apply?ssid=New+Net&password=p%40ss&devid=id9"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "Credentials saved. Rebooting...");

    let (store, restarts) = worker.finish();
    assert_eq!(store.load(), Credentials::new("New Net", "p@ss", "id9"));
    assert_eq!(restarts, vec![RestartReason::CredentialsSaved]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reset_through_router() {
    let (router, worker) = start(Credentials::new("HomeNet", "secret123", "dev-42"));

    let response = router.oneshot(get("/reset")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (store, restarts) = worker.finish();
    assert_eq!(store.load(), Credentials::default());
    assert_eq!(restarts, vec![RestartReason::CredentialsWiped]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_path_and_method() {
    let (router, worker) = start(Credentials::default());

    let missing = router.clone().oneshot(get("/generate_204")).await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let post = Request::builder()
        .method("POST")
        .uri("/apply?ssid=x")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(post).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    let (store, _) = worker.finish();
    assert_eq!(store.load(), Credentials::default());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_no_loop_is_service_unavailable() {
    let (client, transport) = channel_transport(1);
    drop(transport);
    let router = create_router(PortalState::new(client).with_timeout(Duration::from_millis(50)));

    let response = router.oneshot(get("/")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
