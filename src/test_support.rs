//! Scripted upstream relay for async tests.

use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Accept one connection and answer like a small relay. The handle yields
/// every line received, with each DATA body collected as one entry.
///
/// With `ehlo_ok` false, EHLO is refused so the client falls back to HELO.
/// `RCPT` lines mentioning "reject" get a 550. `AUTH` walks through two 334
/// challenges before succeeding. `STARTTLS` is refused with 454 unless EHLO
/// was accepted; otherwise it gets a 220, and the client hello is answered
/// with plain text before the connection is dropped.
pub async fn fake_upstream(ehlo_ok: bool) -> (SocketAddr, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        let mut seen = Vec::new();
        let mut auth_steps = 0;
        write.write_all(b"220 fake.relay ESMTP\r\n").await.unwrap();
        while let Ok(Some(line)) = lines.next_line().await {
            seen.push(line.clone());
            if auth_steps > 0 {
                auth_steps -= 1;
                let reply: &[u8] = if auth_steps > 0 {
                    b"334 UGFzc3dvcmQ6\r\n"
                } else {
                    b"235 2.7.0 authenticated\r\n"
                };
                if write.write_all(reply).await.is_err() {
                    break;
                }
                continue;
            }
            let verb = line.split(' ').next().unwrap_or_default().to_ascii_uppercase();
            let reply: &[u8] = match verb.as_str() {
                "EHLO" if ehlo_ok => {
                    b"250-fake.relay\r\n250-PIPELINING\r\n250-CHUNKING\r\n250 STARTTLS\r\n"
                }
                "EHLO" => b"500 what\r\n",
                "HELO" => b"250 fake.relay\r\n",
                "AUTH" => {
                    auth_steps = 2;
                    b"334 VXNlcm5hbWU6\r\n"
                }
                "RCPT" if line.contains("reject") => b"550 5.1.1 unknown user\r\n",
                "STARTTLS" if ehlo_ok => {
                    if write.write_all(b"220 2.0.0 ready to start TLS\r\n").await.is_err() {
                        break;
                    }
                    let mut hello = [0u8; 512];
                    let _ = lines.get_mut().read(&mut hello).await;
                    let _ = write.write_all(b"this is not a TLS record\r\n").await;
                    break;
                }
                "STARTTLS" => b"454 4.7.0 TLS not available\r\n",
                "DATA" => {
                    if write.write_all(b"354 go ahead\r\n").await.is_err() {
                        break;
                    }
                    let mut body = Vec::new();
                    let mut terminated = false;
                    while let Ok(Some(l)) = lines.next_line().await {
                        if l == "." {
                            terminated = true;
                            break;
                        }
                        body.push(l);
                    }
                    seen.push(body.join("\r\n"));
                    if !terminated {
                        break;
                    }
                    b"250 2.0.0 queued as 42\r\n"
                }
                "QUIT" => {
                    let _ = write.write_all(b"221 bye\r\n").await;
                    break;
                }
                "MAIL" | "RCPT" | "RSET" | "NOOP" => b"250 2.0.0 ok\r\n",
                _ => b"502 5.5.2 not implemented\r\n",
            };
            if write.write_all(reply).await.is_err() {
                break;
            }
        }
        seen
    });
    (addr, handle)
}
