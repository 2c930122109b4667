use davsync_core::{EntryType, WebdavClient, WebdavError};
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// user:pass
const BASIC_AUTH: &str = "Basic dXNlcjpwYXNz";

fn make_client(server: &MockServer) -> WebdavClient {
    WebdavClient::new(&server.uri(), "user", "pass").unwrap()
}

fn multistatus_for(hrefs: &[(&str, bool)]) -> String {
    let responses: String = hrefs
        .iter()
        .map(|(href, is_dir)| {
            let resourcetype = if *is_dir {
                "<d:resourcetype><d:collection/></d:resourcetype>"
            } else {
                "<d:resourcetype/>"
            };
            format!(
                "<d:response><d:href>{href}</d:href><d:propstat><d:prop>{resourcetype}</d:prop>\
                 <d:status>HTTP/1.1 200 OK</d:status></d:propstat></d:response>"
            )
        })
        .collect();
    format!(
        "<?xml version=\"1.0\"?><d:multistatus xmlns:d=\"DAV:\">{responses}</d:multistatus>"
    )
}

#[tokio::test]
async fn put_file_sends_basic_auth_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/sync/a.json"))
        .and(header("authorization", BASIC_AUTH))
        .and(body_string("{\"v\":1}"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    let client = make_client(&server);
    client.put_file("/sync/a.json", "{\"v\":1}").await.unwrap();
}

#[tokio::test]
async fn put_file_accepts_replaced_status() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/sync/a.json"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let client = make_client(&server);
    client.put_file("/sync/a.json", "replaced").await.unwrap();
}

#[tokio::test]
async fn get_file_returns_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sync/a.json"))
        .and(header("authorization", BASIC_AUTH))
        .respond_with(ResponseTemplate::new(200).set_body_string("payload"))
        .mount(&server)
        .await;

    let client = make_client(&server);
    assert_eq!(client.get_file("/sync/a.json").await.unwrap(), "payload");
}

#[tokio::test]
async fn get_file_maps_missing_resource_to_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sync/missing.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = make_client(&server);
    let err = client.get_file("/sync/missing.json").await.unwrap_err();
    assert!(matches!(err, WebdavError::NotFound(_)));
}

#[tokio::test]
async fn delete_file_is_idempotent() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/sync/gone.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = make_client(&server);
    client.delete_file("/sync/gone.json").await.unwrap();
}

#[tokio::test]
async fn move_file_requests_overwrite() {
    let server = MockServer::start().await;
    Mock::given(method("MOVE"))
        .and(path("/sync/index.tmp"))
        .and(header("overwrite", "T"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    let client = make_client(&server);
    client
        .move_file("/sync/index.tmp", "/sync/index.json")
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let destination = requests[0]
        .headers
        .get("destination")
        .expect("destination header")
        .to_str()
        .unwrap();
    assert!(destination.ends_with("/sync/index.json"));
}

#[tokio::test]
async fn create_directory_treats_existing_as_success() {
    let server = MockServer::start().await;
    Mock::given(method("MKCOL"))
        .and(path("/sync"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;

    let client = make_client(&server);
    client.create_directory("/sync").await.unwrap();
}

#[tokio::test]
async fn list_directory_parses_children() {
    let server = MockServer::start().await;
    let body = multistatus_for(&[
        ("/sync/", true),
        ("/sync/a.json", false),
        ("/sync/chunks/", true),
    ]);
    Mock::given(method("PROPFIND"))
        .and(path("/sync"))
        .and(header("Depth", "1"))
        .respond_with(ResponseTemplate::new(207).set_body_string(body))
        .mount(&server)
        .await;

    let client = make_client(&server);
    let entries = client.list_directory("/sync").await.unwrap();

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].name, "a.json");
    assert_eq!(entries[0].entry_type, EntryType::File);
    assert_eq!(entries[1].name, "chunks");
    assert_eq!(entries[1].entry_type, EntryType::Collection);
}

#[tokio::test]
async fn exists_reports_presence_without_erroring() {
    let server = MockServer::start().await;
    Mock::given(method("PROPFIND"))
        .and(path("/sync/a.json"))
        .and(header("Depth", "0"))
        .respond_with(ResponseTemplate::new(207).set_body_string(multistatus_for(&[(
            "/sync/a.json",
            false,
        )])))
        .mount(&server)
        .await;
    Mock::given(method("PROPFIND"))
        .and(path("/sync/missing.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = make_client(&server);
    assert!(client.exists("/sync/a.json").await);
    assert!(!client.exists("/sync/missing.json").await);
}

#[tokio::test]
async fn test_connection_reports_missing_sync_path_without_failing() {
    let server = MockServer::start().await;
    Mock::given(method("PROPFIND"))
        .and(path("/"))
        .and(header("Depth", "0"))
        .respond_with(ResponseTemplate::new(207).set_body_string(multistatus_for(&[("/", true)])))
        .mount(&server)
        .await;
    Mock::given(method("PROPFIND"))
        .and(path("/"))
        .and(header("Depth", "1"))
        .respond_with(ResponseTemplate::new(207).set_body_string(multistatus_for(&[("/", true)])))
        .mount(&server)
        .await;
    Mock::given(method("PROPFIND"))
        .and(path("/sync"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = make_client(&server);
    let check = client.test_connection("/sync").await;

    assert!(check.success);
    assert!(!check.path_exists);
    assert!(check.error.is_none());
}

#[tokio::test]
async fn test_connection_distinguishes_auth_failure() {
    let server = MockServer::start().await;
    Mock::given(method("PROPFIND"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = make_client(&server);
    let check = client.test_connection("/sync").await;

    assert!(!check.success);
    assert!(!check.path_exists);
    assert!(check.error.unwrap().contains("authentication failed"));
}

#[tokio::test]
async fn test_connection_finds_existing_sync_path() {
    let server = MockServer::start().await;
    Mock::given(method("PROPFIND"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(207).set_body_string(multistatus_for(&[("/", true)])))
        .mount(&server)
        .await;
    Mock::given(method("PROPFIND"))
        .and(path("/sync"))
        .respond_with(ResponseTemplate::new(207).set_body_string(multistatus_for(&[(
            "/sync/",
            true,
        )])))
        .mount(&server)
        .await;

    let client = make_client(&server);
    let check = client.test_connection("/sync").await;

    assert!(check.success);
    assert!(check.path_exists);
}
