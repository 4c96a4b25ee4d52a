//! The sidecar over real sockets, in both deployment modes.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use gatehouse_config::{GatewayConfig, HandlerConf, SidecarMode, SidecarSection};
use gatehouse_handler::{AccessHandler, Collaborators, MemorySessionStore};
use gatehouse_rules::FunctionLibrary;
use gatehouse_sidecar::{ShutdownSignal, SidecarServer};
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use indexmap::IndexMap;
use serde_json::json;
use tokio::net::TcpListener;

const HOST: &str = "app.example.com";
const PORTAL: &str = "http://auth.example.com/";

fn handler_conf() -> HandlerConf {
    let mut rules = IndexMap::new();
    rules.insert("^/admin".to_string(), "$uid eq 'root'".to_string());
    rules.insert("default".to_string(), "accept".to_string());
    let mut headers = IndexMap::new();
    headers.insert("Auth-User".to_string(), "$uid".to_string());
    headers.insert("Auth-Mail".to_string(), "$mail".to_string());

    let mut conf = HandlerConf::default();
    conf.portal = PORTAL.to_string();
    conf.location_rules.insert(HOST.to_string(), rules);
    conf.exported_headers.insert(HOST.to_string(), headers);
    conf
}

fn handler() -> Arc<AccessHandler> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs();
    let store = Arc::new(MemorySessionStore::new());
    let session = json!({ "uid": "alice", "mail": "alice@example.com", "_utime": now });
    if let serde_json::Value::Object(map) = session {
        store.insert("alice-session", map);
    }

    let conf = handler_conf();
    let collaborators = Collaborators::from_conf(&conf, FunctionLibrary::new())
        .unwrap()
        .with_sessions(store);
    Arc::new(AccessHandler::new(conf, collaborators).unwrap())
}

struct Running {
    addr: SocketAddr,
    shutdown: ShutdownSignal,
    task: tokio::task::JoinHandle<gatehouse_sidecar::SidecarResult<()>>,
}

impl Running {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn stop(self) {
        self.shutdown.trigger();
        let result = tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server should stop")
            .expect("server task should not panic");
        assert!(result.is_ok());
    }
}

async fn start(sidecar: SidecarSection) -> Running {
    let config = GatewayConfig {
        sidecar: SidecarSection {
            listen_addr: "127.0.0.1:0".to_string(),
            shutdown_timeout_secs: 1,
            ..sidecar
        },
        handler: handler_conf(),
        ..Default::default()
    };
    let server = SidecarServer::new(&config, handler()).unwrap();
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = ShutdownSignal::new();
    let task = tokio::spawn(server.serve(listener, shutdown.clone()));
    Running {
        addr,
        shutdown,
        task,
    }
}

/// Upstream answering with the request headers it received, as JSON.
async fn echo_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let service = service_fn(|req: Request<Incoming>| async move {
                    let headers: BTreeMap<String, String> = req
                        .headers()
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                        .collect();
                    let body = serde_json::to_vec(&json!({
                        "path": req.uri().to_string(),
                        "headers": headers,
                    }))
                    .unwrap();
                    Ok::<_, Infallible>(
                        Response::builder()
                            .header("content-type", "application/json")
                            .header("x-upstream", "echo")
                            .body(Full::new(Bytes::from(body)))
                            .unwrap(),
                    )
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });
    addr
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_auth_request_mode() {
    let server = start(SidecarSection::default()).await;
    let client = client();

    let response = client
        .get(server.url("/page"))
        .header("host", HOST)
        .header("x-original-uri", "/page?x=1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let location = response.headers()["location"].to_str().unwrap();
    assert!(location.starts_with("http://auth.example.com/?url="));

    let response = client
        .get(server.url("/page"))
        .header("host", HOST)
        .header("cookie", "lemonldap=alice-session")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers["headername1"], "auth-user");
    assert_eq!(headers["headervalue1"], "alice");
    assert_eq!(headers["headername2"], "auth-mail");
    assert_eq!(headers["headervalue2"], "alice@example.com");
    assert_eq!(headers["lm-remote-user"], "alice");

    let response = client
        .get(server.url("/admin"))
        .header("host", HOST)
        .header("cookie", "lemonldap=alice-session")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = client
        .get(server.url("/page"))
        .header("host", "other.example.com")
        .header("cookie", "lemonldap=alice-session")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    server.stop().await;
}

#[tokio::test]
async fn test_internal_endpoints() {
    let server = start(SidecarSection::default()).await;
    let client = client();

    let response = client.get(server.url("/_gatehouse/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");

    let response = client.get(server.url("/_gatehouse/ready")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ready");

    let response = client.get(server.url("/_gatehouse/version")).send().await.unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["version"], gatehouse_sidecar::VERSION);

    let response = client.get(server.url("/_gatehouse/nope")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    server.stop().await;
}

#[tokio::test]
async fn test_proxy_mode_forwards_grants() {
    let upstream = echo_upstream().await;
    let server = start(SidecarSection {
        mode: SidecarMode::Proxy,
        upstream_url: Some(format!("http://{upstream}")),
        ..Default::default()
    })
    .await;
    let client = client();

    let response = client
        .get(server.url("/page?x=1"))
        .header("host", HOST)
        .header("cookie", "theme=dark; lemonldap=alice-session")
        .header("auth-user", "mallory")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-upstream"], "echo");
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["path"], "/page?x=1");
    let headers = &body["headers"];
    assert_eq!(headers["auth-user"], "alice");
    assert_eq!(headers["lm-remote-user"], "alice");
    assert_eq!(headers["cookie"], "theme=dark");
    assert_eq!(headers["x-forwarded-for"], "127.0.0.1");

    let response = client
        .get(server.url("/page"))
        .header("host", HOST)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(response.headers()["location"]
        .to_str()
        .unwrap()
        .starts_with(PORTAL));

    server.stop().await;
}

#[tokio::test]
async fn test_proxy_mode_upstream_down() {
    let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = unused.local_addr().unwrap();
    drop(unused);

    let server = start(SidecarSection {
        mode: SidecarMode::Proxy,
        upstream_url: Some(format!("http://{dead}")),
        ..Default::default()
    })
    .await;

    let response = client()
        .get(server.url("/page"))
        .header("host", HOST)
        .header("cookie", "lemonldap=alice-session")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    server.stop().await;
}

#[tokio::test]
async fn test_proxy_mode_authorizes_internal_paths() {
    let upstream = echo_upstream().await;
    let server = start(SidecarSection {
        mode: SidecarMode::Proxy,
        upstream_url: Some(format!("http://{upstream}")),
        ..Default::default()
    })
    .await;
    let client = client();

    for path in ["/_gatehouse/version", "/_gatehouse/metrics"] {
        let response = client
            .get(server.url(path))
            .header("host", HOST)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND, "{path}");
        assert!(response.headers()["location"]
            .to_str()
            .unwrap()
            .starts_with(PORTAL));
    }

    let response = client
        .get(server.url("/_gatehouse/version"))
        .header("host", HOST)
        .header("cookie", "lemonldap=alice-session")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-upstream"], "echo");
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["path"], "/_gatehouse/version");

    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_before_traffic() {
    let server = start(SidecarSection::default()).await;
    server.stop().await;
}

#[test]
fn test_proxy_mode_without_upstream_rejected() {
    let config = GatewayConfig {
        sidecar: SidecarSection {
            mode: SidecarMode::Proxy,
            ..Default::default()
        },
        ..Default::default()
    };
    assert!(SidecarServer::new(&config, handler()).is_err());
}
