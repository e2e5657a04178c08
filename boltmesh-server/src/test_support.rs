//! Shared fixtures for listener and adapter tests.

use boltmesh_protocol::{
    cmd_code, cmd_type, Command, CommandHeader, Decoder, Encoder, RequestCommand,
    ResponseCommand, PROTOCOL_CODE_V1,
};
use bytes::{Bytes, BytesMut};
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsConnector;

use crate::config::TlsConfig;

/// CA that signed [`SERVER_CERT`].
pub const CA_CERT: &str = include_str!("../testdata/ca.pem");
/// Leaf certificate for `localhost`.
pub const SERVER_CERT: &str = include_str!("../testdata/server.pem");
pub const SERVER_KEY: &str = include_str!("../testdata/server.key");

pub fn header(cmd_type: u8, cmd_code: i16, id: u32, content: &'static [u8]) -> CommandHeader {
    CommandHeader {
        protocol: PROTOCOL_CODE_V1,
        cmd_type,
        cmd_code,
        version: 1,
        request_id: id,
        codec: 1,
        class: Bytes::from_static(b"com.example.Echo"),
        header: Bytes::new(),
        content: Bytes::from_static(content),
    }
}

pub fn ping(id: u32) -> Bytes {
    let request = Command::Request(RequestCommand {
        common: header(cmd_type::REQUEST, cmd_code::RPC_REQUEST, id, b"ping"),
        timeout: 3000,
        arrive_time: None,
    });
    Encoder::encode_command(&request).unwrap().freeze()
}

fn pong(id: u32) -> Bytes {
    let reply = Command::Response(ResponseCommand {
        common: header(cmd_type::RESPONSE, cmd_code::RPC_RESPONSE, id, b"pong"),
        status: 0,
        response_time: None,
    });
    Encoder::encode_command(&reply).unwrap().freeze()
}

/// Upstream answering every request with "pong" under the same id.
///
/// With `hold_until_eof` the replies are withheld until the proxy closes
/// its write side, then sent before the upstream closes.
pub async fn pong_upstream(hold_until_eof: bool) -> SocketAddr {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = upstream.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut conn, _)) = upstream.accept().await {
            tokio::spawn(async move {
                let decoder = Decoder::new();
                let mut buf = BytesMut::new();
                let mut held = Vec::new();
                loop {
                    if conn.read_buf(&mut buf).await.unwrap() == 0 {
                        break;
                    }
                    while let Some(cmd) = decoder.decode_buf(&mut buf).unwrap() {
                        if hold_until_eof {
                            held.push(cmd.request_id());
                        } else {
                            conn.write_all(&pong(cmd.request_id())).await.unwrap();
                        }
                    }
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
                for id in held {
                    conn.write_all(&pong(id)).await.unwrap();
                }
                let _ = conn.shutdown().await;
            });
        }
    });
    addr
}

/// Reads frames until one full command is decoded.
pub async fn read_command<R: AsyncRead + Unpin>(reader: &mut R) -> Command {
    let decoder = Decoder::new();
    let mut buf = BytesMut::new();
    loop {
        if let Some(cmd) = decoder.decode_buf(&mut buf).unwrap() {
            return cmd;
        }
        assert_ne!(reader.read_buf(&mut buf).await.unwrap(), 0, "unexpected EOF");
    }
}

fn temp_pem(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

/// Server TLS settings backed by temp files; keep the files alive while
/// the settings are in use.
pub fn server_tls() -> (TlsConfig, [NamedTempFile; 2]) {
    let cert = temp_pem(SERVER_CERT);
    let key = temp_pem(SERVER_KEY);
    let config = TlsConfig {
        enabled: true,
        cert_path: Some(cert.path().to_path_buf()),
        key_path: Some(key.path().to_path_buf()),
        ..Default::default()
    };
    (config, [cert, key])
}

/// Client trusting only the test CA.
pub fn client_connector() -> TlsConnector {
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut CA_CERT.as_bytes()) {
        roots.add(cert.unwrap()).unwrap();
    }
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}
