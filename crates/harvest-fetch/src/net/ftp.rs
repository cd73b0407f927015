//! Minimal passive-mode FTP control channel.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::error::{FetchError, Result};

pub const DEFAULT_FTP_PORT: u16 = 21;

pub(crate) async fn with_timeout<T>(limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, fut).await.map_err(|_| FetchError::Timeout)?
}

/// One logged-in control connection.
#[derive(Debug)]
pub struct FtpSession {
    control: BufReader<TcpStream>,
    peer: IpAddr,
    timeout: Duration,
}

impl FtpSession {
    /// Connect and consume the server greeting.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let stream = with_timeout(timeout, async {
            TcpStream::connect((host, port))
                .await
                .map_err(|e| FetchError::Connect(format!("{host}:{port}: {e}")))
        })
        .await?;
        let peer = stream
            .peer_addr()
            .map_err(|e| FetchError::Connect(e.to_string()))?
            .ip();
        let mut session = Self {
            control: BufReader::new(stream),
            peer,
            timeout,
        };
        let greeting = session.read_reply().await?;
        expect(greeting, &[220])?;
        Ok(session)
    }

    pub async fn login(&mut self, user: &str, password: &str) -> Result<()> {
        let (code, message) = self.command(&format!("USER {user}")).await?;
        match code {
            230 => Ok(()),
            331 | 332 => {
                let reply = self.command(&format!("PASS {password}")).await?;
                expect(reply, &[230, 202]).map(|_| ())
            }
            _ => Err(FetchError::Ftp { code, message }),
        }
    }

    pub async fn binary(&mut self) -> Result<()> {
        let reply = self.command("TYPE I").await?;
        expect(reply, &[200]).map(|_| ())
    }

    /// Remote size, when the server supports `SIZE`.
    pub async fn size(&mut self, path: &str) -> Result<Option<u64>> {
        let (code, message) = self.command(&format!("SIZE {path}")).await?;
        if code == 213 {
            Ok(message.trim().parse().ok())
        } else {
            Ok(None)
        }
    }

    /// Open the data connection for `path`, starting at `offset`.
    ///
    /// The caller reads the stream to EOF and then calls
    /// [`finish_transfer`](Self::finish_transfer).
    pub async fn retrieve(&mut self, path: &str, offset: u64) -> Result<TcpStream> {
        let data_addr = self.passive().await?;
        let data = with_timeout(self.timeout, async {
            TcpStream::connect(data_addr)
                .await
                .map_err(|e| FetchError::Connect(format!("data connection {data_addr}: {e}")))
        })
        .await?;

        if offset > 0 {
            let reply = self.command(&format!("REST {offset}")).await?;
            expect(reply, &[350])?;
        }
        let reply = self.command(&format!("RETR {path}")).await?;
        expect(reply, &[125, 150])?;
        Ok(data)
    }

    pub async fn finish_transfer(&mut self) -> Result<()> {
        let reply = self.read_reply().await?;
        expect(reply, &[226, 250]).map(|_| ())
    }

    pub async fn quit(mut self) {
        // best effort; the transfer already succeeded or failed
        let _ = self.command("QUIT").await;
    }

    // Data address from a 227 reply; the host part is ignored in favour of
    // the control peer so a server cannot point us elsewhere.
    async fn passive(&mut self) -> Result<SocketAddr> {
        let (code, message) = self.command("PASV").await?;
        if code != 227 {
            return Err(FetchError::Ftp { code, message });
        }
        let port = parse_pasv_port(&message)
            .ok_or_else(|| FetchError::InvalidResponse(format!("unparseable PASV reply: {message}")))?;
        Ok(SocketAddr::new(self.peer, port))
    }

    async fn command(&mut self, line: &str) -> Result<(u16, String)> {
        let verb = line.split_whitespace().next().unwrap_or_default();
        tracing::trace!(verb, "ftp command");
        let timeout = self.timeout;
        with_timeout(timeout, async {
            let stream = self.control.get_mut();
            stream.write_all(line.as_bytes()).await?;
            stream.write_all(b"\r\n").await?;
            stream.flush().await?;
            Ok(())
        })
        .await?;
        self.read_reply().await
    }

    async fn read_reply(&mut self) -> Result<(u16, String)> {
        let timeout = self.timeout;
        let control = &mut self.control;
        with_timeout(timeout, async move {
            let first = read_line(control).await?;
            let (code, sep, text) = split_reply(&first)?;
            if sep != '-' {
                return Ok((code, text.to_string()));
            }
            let mut message = text.to_string();
            loop {
                let line = read_line(control).await?;
                if let Ok((next, ' ', text)) = split_reply(&line) {
                    if next == code {
                        message.push('\n');
                        message.push_str(text);
                        return Ok((code, message));
                    }
                }
                message.push('\n');
                message.push_str(&line);
            }
        })
        .await
    }
}

async fn read_line(control: &mut BufReader<TcpStream>) -> Result<String> {
    let mut line = String::new();
    let read = control.read_line(&mut line).await?;
    if read == 0 {
        return Err(FetchError::Connect("FTP control connection closed".into()));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn split_reply(line: &str) -> Result<(u16, char, &str)> {
    let invalid = || FetchError::InvalidResponse(format!("malformed FTP reply: {line:?}"));
    let code = line.get(..3).and_then(|c| c.parse().ok()).ok_or_else(invalid)?;
    let sep = line[3..].chars().next().unwrap_or(' ');
    let text = line.get(4..).unwrap_or_default();
    Ok((code, sep, text))
}

fn expect(reply: (u16, String), accepted: &[u16]) -> Result<(u16, String)> {
    if accepted.contains(&reply.0) {
        Ok(reply)
    } else {
        Err(FetchError::Ftp {
            code: reply.0,
            message: reply.1,
        })
    }
}

/// Port from `Entering Passive Mode (h1,h2,h3,h4,p1,p2)`.
pub fn parse_pasv_port(message: &str) -> Option<u16> {
    let start = message.find(|c: char| c.is_ascii_digit())?;
    let numbers: Vec<u16> = message[start..]
        .split(|c: char| !c.is_ascii_digit())
        .filter(|part| !part.is_empty())
        .take(6)
        .map(|part| part.parse().ok())
        .collect::<Option<_>>()?;
    match numbers.as_slice() {
        [_, _, _, _, hi, lo] if *hi < 256 && *lo < 256 => Some(hi * 256 + lo),
        _ => None,
    }
}
