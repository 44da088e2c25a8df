use keyledger_core::registry::MemoryLedger;
use keyledger_core::store::ContentStore;
use keyledger_core::{KeyledgerError, LifecycleManager, Principal};
use keyledger_ipfs::{PinataConfig, PinataStore};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{
    body_partial_json, body_string_contains, header, header_regex, method, path, path_regex,
};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const JWT: &str = "test-jwt";
const FILES_PATH: &str = "/v3/files";
const LEGACY_PATH: &str = "/pinning/pinJSONToIPFS";

fn store_for(base: &str) -> PinataStore {
    PinataStore::new(PinataConfig {
        jwt: JWT.into(),
        upload_url: format!("{base}{FILES_PATH}"),
        legacy_url: format!("{base}{LEGACY_PATH}"),
        gateway_url: format!("{base}/ipfs"),
        timeout: Duration::from_secs(5),
    })
    .unwrap()
}

#[tokio::test]
async fn files_api_upload_is_preferred() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(FILES_PATH))
        .and(header("authorization", "Bearer test-jwt"))
        .and(header_regex("content-type", "^multipart/form-data"))
        .and(body_string_contains("name=\"network\""))
        .and(body_string_contains("filename=\"kms-key-"))
        .and(body_string_contains(r#"{"version":"1.0"}"#))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"cid": "bafyfilesapi"}})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path(LEGACY_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let cid = store_for(&server.uri())
        .put(br#"{"version":"1.0"}"#.to_vec())
        .await
        .unwrap();
    assert_eq!(cid, "bafyfilesapi");

    let requests = server.received_requests().await.unwrap();
    let upload = String::from_utf8_lossy(&requests[0].body).to_string();
    assert!(upload.contains("public"));
}

#[tokio::test]
async fn legacy_endpoint_is_used_when_files_api_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(FILES_PATH))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({"error": "scoped key"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(LEGACY_PATH))
        .and(header("authorization", "Bearer test-jwt"))
        .and(body_partial_json(json!({"pinataContent": {"iv": "abc"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"IpfsHash": "QmLegacy"})))
        .expect(1)
        .mount(&server)
        .await;

    let cid = store_for(&server.uri())
        .put(br#"{"version":"1.0","iv":"abc"}"#.to_vec())
        .await
        .unwrap();
    assert_eq!(cid, "QmLegacy");

    let requests = server.received_requests().await.unwrap();
    let legacy = requests
        .iter()
        .find(|request| request.url.path() == LEGACY_PATH)
        .unwrap();
    let body: Value = legacy.body_json().unwrap();
    assert!(body["pinataMetadata"]["name"]
        .as_str()
        .unwrap()
        .starts_with("kms-key-"));
}

#[tokio::test]
async fn all_endpoints_failing_is_store_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "down"})))
        .expect(2)
        .mount(&server)
        .await;

    let err = store_for(&server.uri()).put(b"{}".to_vec()).await.unwrap_err();
    match err {
        KeyledgerError::StoreUnavailable(reason) => {
            assert!(reason.contains("files API"));
            assert!(reason.contains("legacy API"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn gateway_reads_map_status_codes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ipfs/QmPresent"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"hello":"world"}"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ipfs/QmBroken"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;
    let store = store_for(&server.uri());

    assert_eq!(
        store.get("QmPresent").await.unwrap(),
        br#"{"hello":"world"}"#.to_vec()
    );
    // Unmatched paths get a 404 from the mock server.
    assert!(matches!(
        store.get("QmMissing").await,
        Err(KeyledgerError::NotFound(_))
    ));
    assert!(matches!(
        store.get("QmBroken").await,
        Err(KeyledgerError::StoreUnavailable(_))
    ));
}

#[tokio::test]
async fn unreachable_host_is_store_unavailable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let store = PinataStore::new(PinataConfig {
        jwt: JWT.into(),
        upload_url: format!("http://{addr}{FILES_PATH}"),
        legacy_url: format!("http://{addr}{LEGACY_PATH}"),
        gateway_url: format!("http://{addr}/ipfs"),
        timeout: Duration::from_secs(2),
    })
    .unwrap();

    assert!(matches!(
        store.put(b"{}".to_vec()).await,
        Err(KeyledgerError::StoreUnavailable(_))
    ));
    assert!(matches!(
        store.get("QmAnything").await,
        Err(KeyledgerError::StoreUnavailable(_))
    ));
}

type Pins = Arc<Mutex<HashMap<String, String>>>;

/// Legacy pin endpoint that remembers what it pinned.
struct PinJson(Pins);

impl Respond for PinJson {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Ok(body) = request.body_json::<Value>() else {
            return ResponseTemplate::new(400);
        };
        let mut pins = self.0.lock().unwrap();
        let cid = format!("QmPinned{}", pins.len());
        pins.insert(cid.clone(), body["pinataContent"].to_string());
        ResponseTemplate::new(200).set_body_json(json!({ "IpfsHash": cid }))
    }
}

/// Gateway serving whatever [`PinJson`] pinned.
struct Gateway(Pins);

impl Respond for Gateway {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let cid = request.url.path().trim_start_matches("/ipfs/");
        match self.0.lock().unwrap().get(cid) {
            Some(content) => ResponseTemplate::new(200).set_body_string(content.clone()),
            None => ResponseTemplate::new(404),
        }
    }
}

#[tokio::test]
async fn lifecycle_round_trip_through_pinata() {
    let server = MockServer::start().await;
    let pins: Pins = Arc::default();
    Mock::given(method("POST"))
        .and(path(FILES_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "files API disabled"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(LEGACY_PATH))
        .respond_with(PinJson(Arc::clone(&pins)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/ipfs/"))
        .respond_with(Gateway(Arc::clone(&pins)))
        .mount(&server)
        .await;

    let ledger =
        MemoryLedger::new().connect(Principal::new("0x00000000000000000000000000000000000a11ce"));
    let manager = LifecycleManager::new(store_for(&server.uri()), ledger);

    let registration = manager
        .register_key("MyAppKey", "correcthorse123")
        .await
        .unwrap();
    assert_eq!(registration.content_ref, "QmPinned0");
    assert_eq!(pins.lock().unwrap().len(), 1);

    let unlocked = manager
        .unlock_by_name("MyAppKey", "correcthorse123")
        .await
        .unwrap();
    assert_eq!(unlocked, registration.raw_key);
}
