//! 엔트리포인트 TLS 종료 설정입니다.
//!
//! 엔트리포인트의 정적 인증서는 프로세스 시작 시, 프로바이더가 공급한
//! 동적 인증서는 스냅샷마다 어셉터로 변환됩니다.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use tokio_rustls::rustls::{self, Certificate, PrivateKey};
use tokio_rustls::TlsAcceptor;
use tracing::{error, warn};

use crate::config::TlsConfiguration;

/// 인증서/키 파일로부터 TLS 어셉터를 만듭니다.
///
/// `min_version`이 "1.3"이면 TLS 1.3만 허용하고, 그 외에는 안전 기본값
/// (1.2 이상)을 사용합니다.
pub fn build_acceptor(
    cert_path: &str,
    key_path: &str,
    min_version: Option<&str>,
) -> Result<TlsAcceptor, Box<dyn std::error::Error + Send + Sync>> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let builder = rustls::ServerConfig::builder();
    let config = if min_version == Some("1.3") {
        builder
            .with_safe_default_cipher_suites()
            .with_safe_default_kx_groups()
            .with_protocol_versions(&[&rustls::version::TLS13])?
            .with_no_client_auth()
            .with_single_cert(certs, key)?
    } else {
        builder
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(certs, key)?
    };

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// 동적 TLS 설정에서 어셉터를 만듭니다.
///
/// 인증서 관리는 외부 협력자의 영역이므로 첫 번째 유효한 인증서만
/// 사용합니다. 로드 실패는 로그로 남기고 None을 반환합니다.
pub fn build_dynamic_acceptor(tls: &TlsConfiguration) -> Option<TlsAcceptor> {
    let certificate = tls.certificates.first()?;
    if tls.certificates.len() > 1 {
        warn!(
            count = tls.certificates.len(),
            "동적 인증서가 여러 개이지만 첫 번째만 사용됨"
        );
    }

    let min_version = tls
        .options
        .iter()
        .find(|(name, _)| crate::config::local_name(name) == "default")
        .and_then(|(_, options)| options.min_version.as_deref());

    match build_acceptor(&certificate.cert_file, &certificate.key_file, min_version) {
        Ok(acceptor) => Some(acceptor),
        Err(e) => {
            error!(
                cert_file = %certificate.cert_file,
                error = %e,
                "동적 인증서 로드 실패"
            );
            None
        }
    }
}

fn load_certs(path: &str) -> Result<Vec<Certificate>, Box<dyn std::error::Error + Send + Sync>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)?
        .into_iter()
        .map(Certificate)
        .collect::<Vec<_>>();

    if certs.is_empty() {
        return Err(format!("{}에서 인증서를 찾을 수 없음", path).into());
    }
    Ok(certs)
}

fn load_private_key(path: &str) -> Result<PrivateKey, Box<dyn std::error::Error + Send + Sync>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    if let Some(key) = rustls_pemfile::pkcs8_private_keys(&mut reader)?.into_iter().next() {
        return Ok(PrivateKey(key));
    }

    // PKCS#8이 아니면 RSA 키로 재시도
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    if let Some(key) = rustls_pemfile::rsa_private_keys(&mut reader)?.into_iter().next() {
        return Ok(PrivateKey(key));
    }

    Err(format!("{}에서 개인키를 찾을 수 없음", path).into())
}
