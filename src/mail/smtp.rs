//! Minimal SMTP relay client.
//!
//! Speaks plain SMTP (RFC 5321) to a trusted relay: greeting, EHLO,
//! optional AUTH PLAIN, one envelope, DATA, QUIT. Every read and write is
//! bounded by the configured timeout.

use super::{MailMessage, Mailer};
use crate::config::SmtpConfig;
use crate::errors::{MailError, OnboardingResult};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use secrecy::ExposeSecret;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Server reply.
#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    lines: Vec<String>,
}

impl Reply {
    fn message(&self) -> String {
        self.lines.join(" ")
    }
}

struct Session {
    stream: BufReader<TcpStream>,
    timeout: Duration,
}

impl Session {
    async fn connect(config: &SmtpConfig) -> OnboardingResult<Self> {
        let address = format!("{}:{}", config.host, config.port);
        let stream = timeout(config.timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| MailError::Connection(format!("Connect to {} timed out", address)))?
            .map_err(|e| MailError::Connection(format!("{}: {}", address, e)))?;
        stream.set_nodelay(true).ok();

        let mut session = Self {
            stream: BufReader::new(stream),
            timeout: config.timeout,
        };
        let greeting = session.read_reply().await?;
        expect("greeting", &greeting, &[220])?;
        Ok(session)
    }

    async fn read_reply(&mut self) -> OnboardingResult<Reply> {
        let mut lines = Vec::new();

        loop {
            let mut line = String::new();
            let read = timeout(self.timeout, self.stream.read_line(&mut line))
                .await
                .map_err(|_| MailError::Protocol("Read timed out".to_string()))?
                .map_err(|e| MailError::Protocol(format!("Read error: {}", e)))?;
            if read == 0 {
                return Err(MailError::Protocol("Server closed connection".to_string()).into());
            }

            let line = line.trim_end();
            if line.len() < 3 {
                return Err(MailError::Protocol(format!("Reply too short: {}", line)).into());
            }
            let code: u16 = line
                .get(..3)
                .and_then(|c| c.parse().ok())
                .ok_or_else(|| MailError::Protocol(format!("Invalid reply code: {}", line)))?;
            lines.push(line.get(4..).unwrap_or("").to_string());

            // Continuation lines carry a hyphen after the code.
            if line.as_bytes().get(3) != Some(&b'-') {
                return Ok(Reply { code, lines });
            }
        }
    }

    async fn write(&mut self, data: &[u8]) -> OnboardingResult<()> {
        let stream = self.stream.get_mut();
        timeout(self.timeout, stream.write_all(data))
            .await
            .map_err(|_| MailError::Protocol("Write timed out".to_string()))?
            .map_err(|e| MailError::Protocol(format!("Write error: {}", e)))?;
        timeout(self.timeout, stream.flush())
            .await
            .map_err(|_| MailError::Protocol("Flush timed out".to_string()))?
            .map_err(|e| MailError::Protocol(format!("Flush error: {}", e)))?;
        Ok(())
    }

    async fn command(&mut self, line: &str, label: &str, accepted: &[u16]) -> OnboardingResult<Reply> {
        debug!(command = label, "Sending SMTP command");
        self.write(format!("{}\r\n", line).as_bytes()).await?;
        let reply = self.read_reply().await?;
        expect(label, &reply, accepted)?;
        Ok(reply)
    }
}

fn expect(label: &str, reply: &Reply, accepted: &[u16]) -> OnboardingResult<()> {
    if accepted.contains(&reply.code) {
        Ok(())
    } else {
        Err(MailError::Rejected {
            command: label.to_string(),
            code: reply.code,
            message: reply.message(),
        }
        .into())
    }
}

/// Mailer delivering through an SMTP relay.
#[derive(Debug, Clone)]
pub struct SmtpMailer {
    config: SmtpConfig,
    client_name: String,
}

impl SmtpMailer {
    /// Creates a mailer for the given relay.
    pub fn new(config: SmtpConfig) -> Self {
        Self {
            config,
            client_name: "localhost".to_string(),
        }
    }

    /// Sets the name announced in EHLO.
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    fn auth_plain(&self) -> Option<String> {
        match (&self.config.username, &self.config.password) {
            (Some(user), Some(password)) => {
                let raw = format!("\0{}\0{}", user, password.expose_secret());
                Some(STANDARD.encode(raw.as_bytes()))
            }
            _ => None,
        }
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: &MailMessage) -> OnboardingResult<()> {
        let mut session = Session::connect(&self.config).await?;

        session
            .command(&format!("EHLO {}", self.client_name), "EHLO", &[250])
            .await?;

        if let Some(credentials) = self.auth_plain() {
            session
                .command(&format!("AUTH PLAIN {}", credentials), "AUTH", &[235])
                .await?;
        }

        session
            .command(&format!("MAIL FROM:<{}>", self.config.sender), "MAIL FROM", &[250])
            .await?;
        session
            .command(&format!("RCPT TO:<{}>", message.to), "RCPT TO", &[250, 251])
            .await?;
        session.command("DATA", "DATA", &[354]).await?;

        let content = render_message(&self.config.sender, message);
        session.write(&dot_stuff(content.as_bytes())).await?;
        let accepted = session.read_reply().await?;
        expect("message body", &accepted, &[250])?;

        // The message is already queued; a failed QUIT changes nothing.
        if let Err(e) = session.command("QUIT", "QUIT", &[221]).await {
            debug!(error = %e, "QUIT failed");
        }

        debug!(to = %message.to, "Notification delivered to relay");
        Ok(())
    }
}

fn render_message(sender: &str, message: &MailMessage) -> String {
    let mut out = String::new();
    out.push_str(&format!("From: <{}>\r\n", sender));
    out.push_str(&format!("To: <{}>\r\n", message.to));
    out.push_str(&format!("Subject: {}\r\n", encode_header(&message.subject)));
    out.push_str(&format!("Date: {}\r\n", chrono::Utc::now().to_rfc2822()));
    out.push_str("MIME-Version: 1.0\r\n");
    out.push_str("Content-Type: text/plain; charset=utf-8\r\n");
    out.push_str("Content-Transfer-Encoding: 8bit\r\n\r\n");
    for line in message.body.lines() {
        out.push_str(line);
        out.push_str("\r\n");
    }
    out
}

/// RFC 2047 encoded-word for non-ASCII header values.
fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(value.as_bytes()))
    }
}

/// Dot-stuffs DATA content and appends the terminating `.` line.
fn dot_stuff(content: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(content.len() + 8);
    let mut at_line_start = true;

    for &byte in content {
        if at_line_start && byte == b'.' {
            output.push(b'.');
        }
        output.push(byte);
        at_line_start = byte == b'\n';
    }

    if !output.ends_with(b"\r\n") {
        output.extend_from_slice(b"\r\n");
    }
    output.extend_from_slice(b".\r\n");
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::OnboardingError;
    use secrecy::SecretString;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    struct Transcript {
        commands: Vec<String>,
        data: String,
    }

    async fn fake_relay(reject_rcpt: bool) -> (u16, oneshot::Receiver<Transcript>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut stream = BufReader::new(socket);
            let mut commands = Vec::new();
            let mut data = String::new();
            stream.get_mut().write_all(b"220 relay ready\r\n").await.unwrap();

            loop {
                let mut line = String::new();
                if stream.read_line(&mut line).await.unwrap() == 0 {
                    break;
                }
                let line = line.trim_end().to_string();
                commands.push(line.clone());
                let reply: &[u8] = if line.starts_with("EHLO") {
                    b"250-relay\r\n250 AUTH PLAIN\r\n"
                } else if line.starts_with("AUTH") {
                    b"235 accepted\r\n"
                } else if line.starts_with("MAIL") {
                    b"250 ok\r\n"
                } else if line.starts_with("RCPT") && reject_rcpt {
                    b"550 no such user\r\n"
                } else if line.starts_with("RCPT") {
                    b"250 ok\r\n"
                } else if line == "DATA" {
                    stream.get_mut().write_all(b"354 go ahead\r\n").await.unwrap();
                    loop {
                        let mut body_line = String::new();
                        stream.read_line(&mut body_line).await.unwrap();
                        if body_line == ".\r\n" {
                            break;
                        }
                        data.push_str(&body_line);
                    }
                    b"250 queued\r\n"
                } else if line == "QUIT" {
                    stream.get_mut().write_all(b"221 bye\r\n").await.unwrap();
                    break;
                } else {
                    b"500 unknown\r\n"
                };
                stream.get_mut().write_all(reply).await.unwrap();
            }

            let mut rest = Vec::new();
            let _ = stream.read_to_end(&mut rest).await;
            let _ = tx.send(Transcript { commands, data });
        });

        (port, rx)
    }

    fn config(port: u16) -> SmtpConfig {
        SmtpConfig {
            host: "127.0.0.1".to_string(),
            port,
            sender: "noreply@example.com".to_string(),
            username: Some("relay-user".to_string()),
            password: Some(SecretString::new("secret".to_string())),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_delivers_message() {
        let (port, transcript) = fake_relay(false).await;
        let mailer = SmtpMailer::new(config(port));

        let message = MailMessage::new(
            "ops@example.com",
            "New onboarding application: Acme",
            "Project: Acme\n.hidden line",
        );
        mailer.send(&message).await.unwrap();
        drop(mailer);

        let transcript = transcript.await.unwrap();
        assert_eq!(transcript.commands[0], "EHLO localhost");
        assert_eq!(
            transcript.commands[1],
            format!("AUTH PLAIN {}", STANDARD.encode(b"\0relay-user\0secret"))
        );
        assert_eq!(transcript.commands[2], "MAIL FROM:<noreply@example.com>");
        assert_eq!(transcript.commands[3], "RCPT TO:<ops@example.com>");
        assert!(transcript.data.contains("Subject: New onboarding application: Acme\r\n"));
        assert!(transcript.data.contains("\r\n..hidden line\r\n"));
        assert_eq!(transcript.commands.last().map(String::as_str), Some("QUIT"));
    }

    #[tokio::test]
    async fn test_rejected_recipient() {
        let (port, _transcript) = fake_relay(true).await;
        let mut relay = config(port);
        relay.username = None;
        let err = SmtpMailer::new(relay)
            .send(&MailMessage::new("nobody@example.com", "s", "b"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OnboardingError::Mail(MailError::Rejected { code: 550, .. })
        ));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = SmtpMailer::new(config(port))
            .send(&MailMessage::new("a@b.c", "s", "b"))
            .await
            .unwrap_err();
        assert!(matches!(err, OnboardingError::Mail(MailError::Connection(_))));
    }

    #[test]
    fn test_dot_stuff() {
        let out = dot_stuff(b".start\r\nmiddle\r\n.end");
        assert_eq!(out, b"..start\r\nmiddle\r\n..end\r\n.\r\n".to_vec());
    }

    #[test]
    fn test_encode_header() {
        assert_eq!(encode_header("plain"), "plain");
        assert!(encode_header("Проект").starts_with("=?UTF-8?B?"));
    }
}
