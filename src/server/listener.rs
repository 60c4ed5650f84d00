use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info};

use crate::provider::Snapshot;
use crate::settings::{EntryPointProtocol, EntryPointSettings};
use crate::tls;

use super::handler::RequestHandler;
use super::{Error, Result};

/// 엔트리포인트 하나의 리스너입니다.
pub struct EntryPointListener {
    name: String,
    listener: TcpListener,
    /// TCP 프로토콜 엔트리포인트는 SNI 디멀티플렉싱을 수행한다
    tcp_capable: bool,
    static_tls: Option<TlsAcceptor>,
    published: Arc<ArcSwap<Snapshot>>,
    handler: Arc<RequestHandler>,
}

impl EntryPointListener {
    pub async fn bind(
        name: &str,
        settings: &EntryPointSettings,
        published: Arc<ArcSwap<Snapshot>>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(&settings.address).await.map_err(|e| {
            error!(entry_point = %name, address = %settings.address, error = %e, "포트 바인딩 실패");
            Error::Io {
                message: format!("엔트리포인트 '{}' 바인딩 실패: {}", name, e),
                source: e,
            }
        })?;

        info!(entry_point = %name, address = %settings.address, "리스너 시작");

        let static_tls = match &settings.tls {
            Some(tls_settings) => Some(
                tls::build_acceptor(&tls_settings.cert_path, &tls_settings.key_path, None)
                    .map_err(|e| Error::Tls {
                        message: format!("엔트리포인트 '{}' TLS 설정 실패: {}", name, e),
                        source: Some(e),
                    })?,
            ),
            None => None,
        };

        let handler = Arc::new(RequestHandler::new(
            name.to_string(),
            published.clone(),
            std::time::Duration::from_secs(settings.read_timeout.max(1)),
        ));

        Ok(Self {
            name: name.to_string(),
            listener,
            tcp_capable: settings.protocol == EntryPointProtocol::Tcp,
            static_tls,
            published,
            handler,
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    /// 수락 루프입니다. 연결마다 태스크 하나를 띄웁니다.
    pub async fn run(self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let name = self.name.clone();
                    let tcp_capable = self.tcp_capable;
                    let static_tls = self.static_tls.clone();
                    let published = self.published.clone();
                    let handler = self.handler.clone();

                    tokio::spawn(async move {
                        handle_accepted(stream, peer, name, tcp_capable, static_tls, published, handler)
                            .await;
                    });
                }
                Err(e) => {
                    error!(entry_point = %self.name, error = %e, "연결 수락 실패");
                }
            }
        }
    }
}

/// 수락된 연결 하나를 처리합니다.
///
/// TCP 지원 엔트리포인트는 ClientHello의 SNI를 들여다보고 TCP 라우터
/// 트리에 먼저 묻습니다. 매칭이 없으면 HTTP 경로로 넘어갑니다.
async fn handle_accepted(
    stream: TcpStream,
    peer: SocketAddr,
    name: String,
    tcp_capable: bool,
    static_tls: Option<TlsAcceptor>,
    published: Arc<ArcSwap<Snapshot>>,
    handler: Arc<RequestHandler>,
) {
    // 연결당 스냅샷을 한 번만 읽는다
    let snapshot = published.load_full();

    if tcp_capable {
        if let Some(tree) = snapshot.tcp.get(&name) {
            if !tree.is_empty() {
                let sni = peek_sni(&stream).await;
                if let Some(route) = tree.route(sni.as_deref()) {
                    debug!(entry_point = %name, router = %route.name, sni = ?sni, "TCP 라우트 매칭");
                    route.service.handle(stream).await;
                    return;
                }
            }
        }
    }

    // HTTP 경로: 엔트리포인트에 TLS가 설정되어 있으면 여기서 종료한다.
    // 동적 인증서가 있으면 정적 인증서보다 우선한다.
    let acceptor = match &static_tls {
        Some(static_acceptor) => Some(
            snapshot
                .dynamic_tls
                .clone()
                .unwrap_or_else(|| static_acceptor.clone()),
        ),
        None => None,
    };

    match acceptor {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls_stream) => {
                if let Err(e) = handler
                    .handle_connection(TokioIo::new(tls_stream), Some(peer.ip()))
                    .await
                {
                    debug!(entry_point = %name, error = %e, "HTTPS 연결 처리 종료");
                }
            }
            Err(e) => {
                error!(entry_point = %name, error = %e, "TLS 핸드쉐이크 실패");
            }
        },
        None => {
            if let Err(e) = handler
                .handle_connection(TokioIo::new(stream), Some(peer.ip()))
                .await
            {
                debug!(entry_point = %name, error = %e, "HTTP 연결 처리 종료");
            }
        }
    }
}

/// TLS ClientHello를 소비하지 않고 들여다보고 SNI를 추출합니다.
async fn peek_sni(stream: &TcpStream) -> Option<String> {
    let mut buf = [0u8; 4096];
    let n = stream.peek(&mut buf).await.ok()?;
    parse_sni(&buf[..n])
}

/// TLS ClientHello 레코드에서 server_name 확장을 파싱합니다.
///
/// 형식이 어긋나면 (평문 등) None을 반환하고 HTTP 경로로 폴스루합니다.
fn parse_sni(buf: &[u8]) -> Option<String> {
    // TLS 레코드 헤더: type(1)=0x16 handshake, version(2), length(2)
    if buf.len() < 5 || buf[0] != 0x16 {
        return None;
    }

    // 핸드쉐이크 헤더: type(1)=0x01 ClientHello, length(3)
    let hs = &buf[5..];
    if hs.len() < 38 || hs[0] != 0x01 {
        return None;
    }

    // 4(헤더) + 2(버전) + 32(랜덤)
    let mut pos = 38;

    let session_len = *hs.get(pos)? as usize;
    pos += 1 + session_len;

    let cipher_len = u16_at(hs, pos)? as usize;
    pos += 2 + cipher_len;

    let compression_len = *hs.get(pos)? as usize;
    pos += 1 + compression_len;

    let extensions_len = u16_at(hs, pos)? as usize;
    pos += 2;
    let end = (pos + extensions_len).min(hs.len());

    while pos + 4 <= end {
        let ext_type = u16_at(hs, pos)?;
        let ext_len = u16_at(hs, pos + 2)? as usize;
        pos += 4;

        // server_name 확장 (type 0): list length(2), entry type(1)=0 host, name length(2)
        if ext_type == 0 {
            if *hs.get(pos + 2)? != 0 {
                return None;
            }
            let name_len = u16_at(hs, pos + 3)? as usize;
            let name = hs.get(pos + 5..pos + 5 + name_len)?;
            return String::from_utf8(name.to_vec()).ok();
        }
        pos += ext_len;
    }

    None
}

fn u16_at(buf: &[u8], pos: usize) -> Option<u16> {
    Some(u16::from_be_bytes([*buf.get(pos)?, *buf.get(pos + 1)?]))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// SNI 확장 하나를 담은 최소 ClientHello를 만든다
    fn client_hello_with_sni(host: &str) -> Vec<u8> {
        let name = host.as_bytes();

        // server_name 확장 본문
        let mut ext_body = Vec::new();
        ext_body.extend_from_slice(&((name.len() + 3) as u16).to_be_bytes()); // list length
        ext_body.push(0); // host_name type
        ext_body.extend_from_slice(&(name.len() as u16).to_be_bytes());
        ext_body.extend_from_slice(name);

        let mut extensions = Vec::new();
        extensions.extend_from_slice(&0u16.to_be_bytes()); // extension type: server_name
        extensions.extend_from_slice(&(ext_body.len() as u16).to_be_bytes());
        extensions.extend_from_slice(&ext_body);

        let mut hello_body = Vec::new();
        hello_body.extend_from_slice(&[0x03, 0x03]); // version
        hello_body.extend_from_slice(&[0u8; 32]); // random
        hello_body.push(0); // session id length
        hello_body.extend_from_slice(&2u16.to_be_bytes()); // cipher suites length
        hello_body.extend_from_slice(&[0x13, 0x01]);
        hello_body.push(1); // compression methods length
        hello_body.push(0);
        hello_body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
        hello_body.extend_from_slice(&extensions);

        let mut handshake = Vec::new();
        handshake.push(0x01); // ClientHello
        let len = hello_body.len();
        handshake.extend_from_slice(&[(len >> 16) as u8, (len >> 8) as u8, len as u8]);
        handshake.extend_from_slice(&hello_body);

        let mut record = Vec::new();
        record.push(0x16); // handshake record
        record.extend_from_slice(&[0x03, 0x01]);
        record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
        record.extend_from_slice(&handshake);
        record
    }

    #[test]
    fn test_parse_sni_from_client_hello() {
        let hello = client_hello_with_sni("db.example.com");
        assert_eq!(parse_sni(&hello), Some("db.example.com".to_string()));
    }

    #[test]
    fn test_plaintext_yields_none() {
        assert_eq!(parse_sni(b"GET / HTTP/1.1\r\nHost: foo.bar\r\n\r\n"), None);
        assert_eq!(parse_sni(&[]), None);
        assert_eq!(parse_sni(&[0x16, 0x03]), None);
    }

    #[test]
    fn test_truncated_hello_yields_none() {
        let hello = client_hello_with_sni("db.example.com");
        assert_eq!(parse_sni(&hello[..20]), None);
    }
}
