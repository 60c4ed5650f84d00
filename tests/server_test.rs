//! 파일 프로바이더부터 리스너까지 전체 스택 테스트입니다.
//!
//! 설정 파일 변경이 디바운스를 거쳐 새 스냅샷으로 핫 스왑되는 것을
//! 검증합니다.

use std::collections::HashMap;
use std::convert::Infallible;
use std::io::Write;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};

use reverse_proxy_edge::server::ServerManager;
use reverse_proxy_edge::settings::{
    EntryPointProtocol, EntryPointSettings, FileProviderSettings, LogSettings, ProvidersSettings,
    Settings,
};

async fn spawn_backend(body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => break,
            };
            tokio::spawn(async move {
                let service = service_fn(move |_req: Request<Incoming>| async move {
                    Ok::<_, Infallible>(
                        Response::builder()
                            .status(StatusCode::OK)
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

fn pick_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn get(addr: SocketAddr, host: &str) -> StatusCode {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .unwrap();
    tokio::spawn(conn);

    let req = Request::builder()
        .uri("/")
        .header("host", host)
        .body(Empty::<Bytes>::new())
        .unwrap();

    let res = sender.send_request(req).await.unwrap();
    let status = res.status();
    let _ = res.into_body().collect().await;
    status
}

#[tokio::test]
async fn test_file_provider_hot_reload() {
    let backend = spawn_backend("ok").await;

    let mut config_file = tempfile::NamedTempFile::new().unwrap();
    write!(
        config_file,
        r#"
        [http.routers.foo]
        rule = "Host(`foo.bar`)"
        service = "foo-service"

        [[http.services.foo-service.loadBalancer.servers]]
        url = "http://{}"
    "#,
        backend
    )
    .unwrap();
    config_file.flush().unwrap();

    let port = pick_free_port();
    let mut entry_points = HashMap::new();
    entry_points.insert(
        "web".to_string(),
        EntryPointSettings {
            address: format!("127.0.0.1:{}", port),
            protocol: EntryPointProtocol::Http,
            read_timeout: 30,
            tls: None,
        },
    );

    let settings = Settings {
        entry_points,
        providers: ProvidersSettings {
            throttle: 1,
            file: Some(FileProviderSettings {
                path: config_file.path().to_string_lossy().to_string(),
                poll_interval: 1,
            }),
        },
        logging: LogSettings::default(),
        upstream_timeout: 5,
    };
    settings.validate().unwrap();

    let manager = ServerManager::new(settings);
    let published = manager.published();
    tokio::spawn(manager.start());

    // 첫 스냅샷 발행 대기 (프로바이더 폴링 + 디바운스)
    let mut waited = Duration::ZERO;
    while published.load().generation < 1 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        waited += Duration::from_millis(100);
        assert!(waited < Duration::from_secs(10), "첫 스냅샷 발행 타임아웃");
    }

    let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
    assert_eq!(get(addr, "foo.bar").await, StatusCode::OK);
    assert_eq!(get(addr, "new.bar").await, StatusCode::NOT_FOUND);

    // 설정 파일을 바꾸면 디바운스 이후 새 스냅샷이 발행된다
    let rewritten = format!(
        r#"
        [http.routers.renamed]
        rule = "Host(`new.bar`)"
        service = "foo-service"

        [[http.services.foo-service.loadBalancer.servers]]
        url = "http://{}"
    "#,
        backend
    );
    std::fs::write(config_file.path(), rewritten).unwrap();

    let mut waited = Duration::ZERO;
    while published.load().generation < 2 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        waited += Duration::from_millis(100);
        assert!(waited < Duration::from_secs(10), "핫 리로드 타임아웃");
    }

    // 진행 중 연결 없이 전체가 교체되었다: 이전 라우터는 사라지고 새 라우터가 동작
    assert_eq!(get(addr, "new.bar").await, StatusCode::OK);
    assert_eq!(get(addr, "foo.bar").await, StatusCode::NOT_FOUND);

    let runtime = published.load().runtime.clone();
    assert!(runtime.routers.contains_key("renamed@file"));
    assert!(!runtime.routers.contains_key("foo@file"));
}
