use crate::device::{DeviceReport, Observation};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const MAX_UDP: usize = 1460;

#[async_trait]
pub trait ReportHandler: Send {
    async fn on_report(&mut self, src: SocketAddr, report: DeviceReport) -> Result<()>;
}

#[async_trait]
impl ReportHandler for mpsc::Sender<DeviceReport> {
    async fn on_report(&mut self, _src: SocketAddr, report: DeviceReport) -> Result<()> {
        self.send(report)
            .await
            .map_err(|_| anyhow::anyhow!("report channel closed"))
    }
}

pub fn decode_report(buf: &[u8]) -> Result<DeviceReport> {
    if buf.is_empty() {
        bail!("empty datagram");
    }
    if buf.len() > MAX_UDP {
        bail!("datagram too large: {}", buf.len());
    }
    let report: DeviceReport = serde_json::from_slice(buf).context("malformed device report")?;
    if let Observation::Temperature(t) = report.observed {
        if !t.is_finite() {
            bail!("non-finite temperature from zone {}", report.zone);
        }
    }
    Ok(report)
}

/// Socket errors a UDP receive can report for a single bad datagram or
/// peer. The socket itself is still usable afterwards.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

/// Receives device reports as JSON datagrams and hands them to a handler.
pub struct ReportListener<H> {
    handler: H,
}

impl<H: ReportHandler> ReportListener<H> {
    pub fn new(handler: H) -> ReportListener<H> {
        ReportListener { handler }
    }

    /// Runs until `cancel` fires, the handler fails or the socket breaks.
    ///
    /// Undecodable datagrams and transient receive errors are logged and
    /// skipped.
    pub async fn main_loop(mut self, bind_addr: &str, cancel: CancellationToken) -> Result<()> {
        let socket = UdpSocket::bind(bind_addr)
            .await
            .with_context(|| format!("binding report listener to {}", bind_addr))?;
        info!(addr = %bind_addr, "device report listener started");

        // One spare byte so an oversized datagram is detected rather than truncated.
        let mut buf = [0u8; MAX_UDP + 1];
        loop {
            let (sz, src) = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("device report listener stopped");
                    return Ok(());
                }
                res = socket.recv_from(&mut buf) => match res {
                    Ok(received) => received,
                    Err(e) if is_transient(&e) => {
                        warn!(error = %e, "transient receive error on report socket");
                        continue;
                    }
                    Err(e) => return Err(anyhow::Error::new(e).context("report socket failed")),
                },
            };
            self.add_datagram(src, &buf[..sz]).await?;
        }
    }

    async fn add_datagram(&mut self, src: SocketAddr, buf: &[u8]) -> Result<()> {
        match decode_report(buf) {
            Ok(report) => self.handler.on_report(src, report).await,
            Err(e) => {
                warn!(%src, error = %format!("{:#}", e), "dropping device report");
                Ok(())
            }
        }
    }
}
