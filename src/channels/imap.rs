//! Minimal blocking IMAP client over rustls.
//!
//! Covers the handful of commands the email adapter needs. All methods block;
//! callers run them inside `spawn_blocking`.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, SignatureScheme, StreamOwned};

/// Socket read timeout.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for IMAP operations.
pub type ImapError = Box<dyn std::error::Error + Send + Sync>;

type TlsStream = StreamOwned<ClientConnection, TcpStream>;

/// How TLS is negotiated with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// Plain connect, then `STARTTLS`.
    StartTls,
    /// TLS from the first byte.
    Implicit,
}

/// Connection parameters.
#[derive(Debug, Clone)]
pub struct ImapTarget {
    pub host: String,
    pub port: u16,
    pub tls: TlsMode,
    pub accept_invalid_certs: bool,
}

/// Tagged response: untagged lines, literals in arrival order, and the final
/// status line.
#[derive(Debug, Default)]
pub struct ImapResponse {
    pub lines: Vec<String>,
    pub literals: Vec<Vec<u8>>,
    pub status: String,
}

impl ImapResponse {
    pub fn is_ok(&self) -> bool {
        self.status
            .split_whitespace()
            .nth(1)
            .is_some_and(|s| s.eq_ignore_ascii_case("OK"))
    }
}

/// An authenticated IMAP session.
pub struct ImapSession {
    stream: TlsStream,
    next_tag: u32,
}

impl ImapSession {
    /// Connect, negotiate TLS and log in.
    pub fn connect(target: &ImapTarget, username: &str, password: &str) -> Result<Self, ImapError> {
        let mut tcp = TcpStream::connect((target.host.as_str(), target.port))?;
        tcp.set_read_timeout(Some(READ_TIMEOUT))?;

        let tls_config = client_config(target.accept_invalid_certs)?;
        let server_name = ServerName::try_from(target.host.clone())?;

        let stream = match target.tls {
            TlsMode::Implicit => {
                let conn = ClientConnection::new(tls_config, server_name)?;
                let mut stream = StreamOwned::new(conn, tcp);
                read_line(&mut stream)?;
                stream
            }
            TlsMode::StartTls => {
                read_line(&mut tcp)?;
                tcp.write_all(b"S0 STARTTLS\r\n")?;
                tcp.flush()?;
                loop {
                    let line = read_line(&mut tcp)?;
                    if line.starts_with("S0 ") {
                        if !line.to_ascii_uppercase().starts_with("S0 OK") {
                            return Err(format!("STARTTLS refused: {}", line.trim()).into());
                        }
                        break;
                    }
                }
                let conn = ClientConnection::new(tls_config, server_name)?;
                StreamOwned::new(conn, tcp)
            }
        };

        let mut session = Self {
            stream,
            next_tag: 1,
        };
        let login = session.command(&format!(
            "LOGIN {} {}",
            quote(username),
            quote(password)
        ))?;
        if !login.is_ok() {
            return Err("IMAP login failed".into());
        }
        Ok(session)
    }

    /// `NOOP`; `true` when the session is still usable.
    pub fn noop(&mut self) -> bool {
        self.command("NOOP").map(|r| r.is_ok()).unwrap_or(false)
    }

    pub fn select(&mut self, folder: &str) -> Result<(), ImapError> {
        let resp = self.command(&format!("SELECT {}", quote(folder)))?;
        if resp.is_ok() {
            Ok(())
        } else {
            Err(format!("SELECT {} failed: {}", folder, resp.status.trim()).into())
        }
    }

    /// Sequence numbers of unseen messages in the selected folder.
    pub fn search_unseen(&mut self) -> Result<Vec<u32>, ImapError> {
        let resp = self.command("SEARCH UNSEEN")?;
        Ok(parse_search(&resp.lines))
    }

    /// Full RFC822 bytes of one message, `None` if the server sent no literal.
    pub fn fetch_rfc822(&mut self, seq: u32) -> Result<Option<Vec<u8>>, ImapError> {
        let resp = self.command(&format!("FETCH {} RFC822", seq))?;
        if !resp.is_ok() {
            return Err(format!("FETCH {} failed: {}", seq, resp.status.trim()).into());
        }
        Ok(resp.literals.into_iter().next())
    }

    pub fn mark_seen(&mut self, seq: u32) -> Result<(), ImapError> {
        self.command(&format!("STORE {} +FLAGS (\\Seen)", seq))?;
        Ok(())
    }

    /// Append a message to `folder` with the given flags.
    pub fn append(&mut self, folder: &str, flags: &str, message: &[u8]) -> Result<(), ImapError> {
        let tag = self.tag();
        let cmd = format!(
            "{} APPEND {} ({}) {{{}}}\r\n",
            tag,
            quote(folder),
            flags,
            message.len()
        );
        self.stream.write_all(cmd.as_bytes())?;
        self.stream.flush()?;

        let ready = read_line(&mut self.stream)?;
        if !ready.starts_with('+') {
            return Err(format!("APPEND not accepted: {}", ready.trim()).into());
        }
        self.stream.write_all(message)?;
        self.stream.write_all(b"\r\n")?;
        self.stream.flush()?;

        let resp = self.read_response(&tag)?;
        if resp.is_ok() {
            Ok(())
        } else {
            Err(format!("APPEND failed: {}", resp.status.trim()).into())
        }
    }

    pub fn logout(mut self) {
        let _ = self.command("LOGOUT");
    }

    fn tag(&mut self) -> String {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;
        tag
    }

    /// Send one command and read through its tagged completion.
    pub fn command(&mut self, cmd: &str) -> Result<ImapResponse, ImapError> {
        let tag = self.tag();
        self.stream.write_all(format!("{} {}\r\n", tag, cmd).as_bytes())?;
        self.stream.flush()?;
        self.read_response(&tag)
    }

    fn read_response(&mut self, tag: &str) -> Result<ImapResponse, ImapError> {
        let prefix = format!("{} ", tag);
        let mut resp = ImapResponse::default();
        loop {
            let line = read_line(&mut self.stream)?;
            if line.starts_with(&prefix) {
                resp.status = line;
                return Ok(resp);
            }
            if let Some(len) = literal_len(&line) {
                let mut buf = vec![0u8; len];
                self.stream.read_exact(&mut buf)?;
                resp.literals.push(buf);
            }
            resp.lines.push(line);
        }
    }
}

/// Read one CRLF-terminated line.
fn read_line<R: Read>(reader: &mut R) -> Result<String, ImapError> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => return Err("IMAP connection closed".into()),
            Ok(_) => {
                buf.push(byte[0]);
                if buf.ends_with(b"\r\n") {
                    return Ok(String::from_utf8_lossy(&buf).into_owned());
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Length of a `{N}` literal announced at the end of a response line.
fn literal_len(line: &str) -> Option<usize> {
    let line = line.trim_end();
    let open = line.strip_suffix('}')?.rfind('{')?;
    line[open + 1..line.len() - 1].parse().ok()
}

fn parse_search(lines: &[String]) -> Vec<u32> {
    lines
        .iter()
        .filter_map(|l| l.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().filter_map(|n| n.parse().ok()))
        .collect()
}

/// Quote an IMAP string argument.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn client_config(accept_invalid_certs: bool) -> Result<Arc<ClientConfig>, ImapError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;

    let config = if accept_invalid_certs {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert { provider }))
            .with_no_client_auth()
    } else {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder.with_root_certificates(roots).with_no_client_auth()
    };
    Ok(Arc::new(config))
}

/// Accepts any server certificate. Local mail bridges serve self-signed ones.
#[derive(Debug)]
struct AcceptAnyCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
