//! The connection runtime: dials the TLS control channel and runs the
//! receive/send/ping loops that drive a [`Handler`]. Grounded on the
//! teacher's TLS setup (`main.rs::load_certs`/`load_keys`, pinned to the
//! same `rustls`/`rustls-pemfile` versions) and on the channel-bridged
//! spawned-task shape of `mitander-lockframe`'s `transport::connect`/
//! `run_connection`; the three-loops-under-one-supervisor structure and
//! the synthetic `connect`/`disconnect` events come from the original
//! Python core's `run_async` (a trio nursery running `ping_loop`,
//! `receive_loop`, `send_loop`, firing `on_disconnect` in a `finally`).

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::BytesMut;
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, Error as TlsError, PrivateKey, RootCertStore, ServerName};
use tokio::io::{split, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::error::{Result, TrumbleError};
use crate::handler::Handler;
use crate::message::{read_frame, Incoming, MessageKind};
use crate::response::{Outbound, Response};
use crate::voice::{decode_voice_packet, Clientbound, Serverbound, VoicePacket};

/// How often the ping loop sends a keepalive [`VoicePacket::Ping`], per the
/// data model's timing invariant.
const PING_INTERVAL: Duration = Duration::from_secs(10);

/// The outbound queue's bound: backpressure kicks in past this many
/// messages, matching the teacher's server-side `mpsc::channel(128)`
/// pattern scaled up for a client that also streams voice frames.
const OUTBOUND_QUEUE_CAPACITY: usize = 1024;

/// Connection parameters.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Verify the server's TLS certificate against the system root store.
    /// Mumble servers commonly present self-signed certificates, so this
    /// defaults to `true` but is routinely turned off by callers.
    pub verify: bool,
    /// Client certificate used for certificate-based authentication, as a
    /// `(cert_pem, key_pem)` pair.
    pub certificate_key_pair: Option<(Vec<u8>, Vec<u8>)>,
}

impl Config {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 64738,
            verify: true,
            certificate_key_pair: None,
        }
    }
}

fn load_certs(pem: &[u8]) -> Result<Vec<Certificate>> {
    let mut reader = BufReader::new(pem);
    rustls_pemfile::certs(&mut reader)
        .map_err(|_| TrumbleError::TlsHandshakeFailed("invalid client certificate".into()))
        .map(|certs| certs.into_iter().map(Certificate).collect())
}

fn load_key(pem: &[u8]) -> Result<PrivateKey> {
    let mut reader = BufReader::new(pem);
    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut reader)
        .map_err(|_| TrumbleError::TlsHandshakeFailed("invalid client key".into()))?;
    keys.drain(..)
        .next()
        .map(PrivateKey)
        .ok_or_else(|| TrumbleError::TlsHandshakeFailed("no private key found".into()))
}

/// Accepts any server certificate. Used when [`Config::verify`] is false,
/// which is the common case against Mumble servers' self-signed certs.
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> std::result::Result<ServerCertVerified, TlsError> {
        Ok(ServerCertVerified::assertion())
    }
}

fn build_tls_config(config: &Config) -> Result<ClientConfig> {
    let builder = ClientConfig::builder().with_safe_defaults();

    let builder = if config.verify {
        let mut roots = RootCertStore::empty();
        roots.add_server_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.0.iter().map(|anchor| {
            rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(anchor.subject, anchor.spki, anchor.name_constraints)
        }));
        builder.with_root_certificates(roots)
    } else {
        return Ok(finish_insecure_config(builder, config)?);
    };

    match &config.certificate_key_pair {
        Some((cert_pem, key_pem)) => {
            let certs = load_certs(cert_pem)?;
            let key = load_key(key_pem)?;
            builder
                .with_single_cert(certs, key)
                .map_err(|err| TrumbleError::TlsHandshakeFailed(err.to_string()))
        }
        None => Ok(builder.with_no_client_auth()),
    }
}

fn finish_insecure_config(
    builder: rustls::ConfigBuilder<ClientConfig, rustls::client::WantsVerifier>,
    config: &Config,
) -> Result<ClientConfig> {
    let builder = builder
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert));

    match &config.certificate_key_pair {
        Some((cert_pem, key_pem)) => {
            let certs = load_certs(cert_pem)?;
            let key = load_key(key_pem)?;
            builder
                .with_single_cert(certs, key)
                .map_err(|err| TrumbleError::TlsHandshakeFailed(err.to_string()))
        }
        None => Ok(builder.with_no_client_auth()),
    }
}

/// A live connection to a Mumble server, running the receive/send/ping
/// loops and dispatching frames to a [`Handler`].
pub struct Connection {
    outbound: mpsc::Sender<Response>,
    tasks: JoinSet<Result<()>>,
}

impl Connection {
    /// Dials `config.host:config.port`, performs the TLS handshake, and
    /// spawns the receive/send/ping loops against `handler`. Fires
    /// `handler.on_connect()` once the loops are running.
    pub async fn connect<H: Handler + 'static>(config: Config, handler: Arc<H>) -> Result<Self> {
        let tls_config = build_tls_config(&config)?;
        let connector = TlsConnector::from(Arc::new(tls_config));

        let tcp = TcpStream::connect((config.host.as_str(), config.port)).await?;
        tcp.set_nodelay(true)?;

        let server_name = ServerName::try_from(config.host.as_str())
            .map_err(|_| TrumbleError::TlsHandshakeFailed(format!("invalid server name: {}", config.host)))?;
        let stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|err| TrumbleError::TlsHandshakeFailed(err.to_string()))?;

        let (read, write) = split(stream);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);

        let mut tasks = JoinSet::new();
        tasks.spawn(receive_loop(read, handler.clone(), outbound_tx.clone()));
        tasks.spawn(send_loop(write, outbound_rx));
        tasks.spawn(ping_loop(outbound_tx.clone()));

        dispatch(handler.on_connect().await, &outbound_tx).await;

        Ok(Self { outbound: outbound_tx, tasks })
    }

    /// Queues a response (protobuf message or voice packet) for sending.
    pub async fn send(&self, response: Response) -> Result<()> {
        self.outbound.send(response).await.map_err(|_| TrumbleError::ConnectionClosed)
    }

    /// Runs until any loop exits (normally due to the peer closing the
    /// connection), returning the first error encountered, if any.
    pub async fn run(mut self) -> Result<()> {
        let result = match self.tasks.join_next().await {
            Some(Ok(result)) => result,
            Some(Err(join_error)) => Err(TrumbleError::Io(std::io::Error::new(std::io::ErrorKind::Other, join_error.to_string()))),
            None => Ok(()),
        };
        self.tasks.shutdown().await;
        result
    }
}

async fn dispatch(response: Response, outbound: &mpsc::Sender<Response>) {
    use futures::StreamExt;
    let mut flattened = response.flatten();
    while let Some(leaf) = flattened.next().await {
        if outbound.send(leaf).await.is_err() {
            break;
        }
    }
}

async fn receive_loop<H: Handler + 'static>(
    mut read: ReadHalf<TlsStream<TcpStream>>,
    handler: Arc<H>,
    outbound: mpsc::Sender<Response>,
) -> Result<()> {
    loop {
        let frame = match read_frame(&mut read).await {
            Ok(Incoming::Frame(frame)) => frame,
            Ok(Incoming::UnknownKind(kind)) => {
                tracing::warn!(kind, "skipped message with unknown type id");
                continue;
            }
            Err(TrumbleError::ConnectionClosed) => {
                dispatch(handler.on_disconnect().await, &outbound).await;
                return Ok(());
            }
            Err(err) => {
                dispatch(handler.on_disconnect().await, &outbound).await;
                return Err(err);
            }
        };

        let handler = handler.clone();
        let outbound = outbound.clone();
        tokio::spawn(async move {
            let response = dispatch_frame(&handler, &frame).await;
            match response {
                Ok(response) => dispatch(response, &outbound).await,
                Err(err) => tracing::warn!(error = %err, kind = %frame.kind, "failed to decode message"),
            }
        });
    }
}

async fn dispatch_frame<H: Handler>(handler: &H, frame: &crate::message::Frame) -> Result<Response> {
    use protobuf::Message as _;
    use crate::proto::mumble;

    if frame.kind == MessageKind::UDPTunnel {
        let packet: VoicePacket<Clientbound> = {
            let mut payload = BytesMut::from(frame.payload.as_ref());
            decode_voice_packet(&mut payload)?
        };
        return Ok(handler.on_udp_tunnel(packet).await);
    }

    macro_rules! dispatch_message {
        ($ty:ty, $method:ident) => {{
            let message = <$ty>::parse_from_bytes(&frame.payload)?;
            handler.$method(message).await
        }};
    }

    let response = match frame.kind {
        MessageKind::Version => dispatch_message!(mumble::Version, on_version),
        MessageKind::Authenticate => dispatch_message!(mumble::Authenticate, on_authenticate),
        MessageKind::Ping => dispatch_message!(mumble::Ping, on_ping),
        MessageKind::Reject => dispatch_message!(mumble::Reject, on_reject),
        MessageKind::ServerSync => dispatch_message!(mumble::ServerSync, on_server_sync),
        MessageKind::ChannelRemove => dispatch_message!(mumble::ChannelRemove, on_channel_remove),
        MessageKind::ChannelState => dispatch_message!(mumble::ChannelState, on_channel_state),
        MessageKind::UserRemove => dispatch_message!(mumble::UserRemove, on_user_remove),
        MessageKind::UserState => dispatch_message!(mumble::UserState, on_user_state),
        MessageKind::BanList => dispatch_message!(mumble::BanList, on_ban_list),
        MessageKind::TextMessage => dispatch_message!(mumble::TextMessage, on_text_message),
        MessageKind::PermissionDenied => dispatch_message!(mumble::PermissionDenied, on_permission_denied),
        MessageKind::ACL => dispatch_message!(mumble::ACL, on_acl),
        MessageKind::QueryUsers => dispatch_message!(mumble::QueryUsers, on_query_users),
        MessageKind::CryptSetup => dispatch_message!(mumble::CryptSetup, on_crypt_setup),
        MessageKind::ContextActionModify => dispatch_message!(mumble::ContextActionModify, on_context_action_modify),
        MessageKind::ContextAction => dispatch_message!(mumble::ContextAction, on_context_action),
        MessageKind::UserList => dispatch_message!(mumble::UserList, on_user_list),
        MessageKind::VoiceTarget => dispatch_message!(mumble::VoiceTarget, on_voice_target),
        MessageKind::PermissionQuery => dispatch_message!(mumble::PermissionQuery, on_permission_query),
        MessageKind::CodecVersion => dispatch_message!(mumble::CodecVersion, on_codec_version),
        MessageKind::UserStats => dispatch_message!(mumble::UserStats, on_user_stats),
        MessageKind::RequestBlob => dispatch_message!(mumble::RequestBlob, on_request_blob),
        MessageKind::ServerConfig => dispatch_message!(mumble::ServerConfig, on_server_config),
        MessageKind::SuggestConfig => dispatch_message!(mumble::SuggestConfig, on_suggest_config),
        MessageKind::UDPTunnel => unreachable!("handled above"),
    };

    Ok(response)
}

async fn send_loop(mut write: WriteHalf<TlsStream<TcpStream>>, mut outbound: mpsc::Receiver<Response>) -> Result<()> {
    while let Some(response) = outbound.recv().await {
        match response {
            Response::Message(Outbound { kind, payload }) => {
                let bytes = crate::message::frame_bytes(kind, &payload);
                write.write_all(&bytes).await?;
                write.flush().await?;
            }
            Response::Voice(packet) => {
                crate::message::write_voice_packet(&packet, &mut write).await?;
            }
            Response::None | Response::Many(_) | Response::Stream(_) => {
                tracing::debug!("non-leaf response reached send_loop; flatten() should have expanded it");
            }
        }
    }
    Ok(())
}

async fn ping_loop(outbound: mpsc::Sender<Response>) -> Result<()> {
    loop {
        tokio::time::sleep(PING_INTERVAL).await;
        let timestamp = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|duration| duration.as_millis() as i64)
            .unwrap_or(0);
        let packet = VoicePacket::<Serverbound>::Ping { timestamp };
        if outbound.send(Response::Voice(packet)).await.is_err() {
            return Ok(());
        }
    }
}

/// Loads a PEM file from disk, as used for `Config::certificate_key_pair`.
pub fn read_pem(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(TrumbleError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_to_the_standard_mumble_port_and_verification_on() {
        let config = Config::new("example.org");
        assert_eq!(config.port, 64738);
        assert!(config.verify);
        assert!(config.certificate_key_pair.is_none());
    }
}
