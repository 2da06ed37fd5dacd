//! Ping traffic between the two endpoints.
//!
//! The first endpoint sends ICMP echo requests; the upper layer of the second answers each one it
//! receives. Addresses follow the classic snullnet layout: `vnet0` is 192.168.0.1 and sees its
//! peer as 192.168.0.2, `vnet1` is 192.168.1.2 and sees its peer as 192.168.1.1. The subnet flip
//! applied by the pair turns one view into the other.

use std::time::Duration;

use anyhow::Context as _;
use vnet_pair::frame::{ipv4_header_checksum, ETHERTYPE_IPV4};
use vnet_pair::{build_frame, EndpointId, EndpointPair, FrameLog, ETH_HLEN};

use crate::config::RunOptions;

const ICMP_ECHO_REPLY: u8 = 0;
const ICMP_ECHO_REQUEST: u8 = 8;
const IPPROTO_ICMP: u8 = 1;
const ICMP_IDENT: u16 = 0x7663;

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct Summary {
    pub requests_sent: u32,
    pub replies_sent: u32,
    pub replies_received: u32,
    /// Transmits that had to wait for buffers.
    pub retries: u32,
}

/// `(local, peer)` IPv4 addresses as seen from `id`.
fn addresses(id: EndpointId) -> ([u8; 4], [u8; 4]) {
    match id {
        EndpointId::A => ([192, 168, 0, 1], [192, 168, 0, 2]),
        EndpointId::B => ([192, 168, 1, 2], [192, 168, 1, 1]),
    }
}

pub fn icmp_echo(id: EndpointId, kind: u8, seq: u16, payload: &[u8]) -> Vec<u8> {
    let mut icmp = Vec::with_capacity(8 + payload.len());
    icmp.extend_from_slice(&[kind, 0, 0, 0]);
    icmp.extend_from_slice(&ICMP_IDENT.to_be_bytes());
    icmp.extend_from_slice(&seq.to_be_bytes());
    icmp.extend_from_slice(payload);
    let csum = ipv4_header_checksum(&icmp);
    icmp[2..4].copy_from_slice(&csum.to_be_bytes());

    let (src, dst) = addresses(id);
    let mut ip = vec![0u8; 20];
    ip[0] = 0x45;
    ip[2..4].copy_from_slice(&((20 + icmp.len()) as u16).to_be_bytes());
    ip[4..6].copy_from_slice(&seq.to_be_bytes());
    ip[8] = 64;
    ip[9] = IPPROTO_ICMP;
    ip[12..16].copy_from_slice(&src);
    ip[16..20].copy_from_slice(&dst);
    let csum = ipv4_header_checksum(&ip);
    ip[10..12].copy_from_slice(&csum.to_be_bytes());
    ip.extend_from_slice(&icmp);

    build_frame(id.mac(), ETHERTYPE_IPV4, &ip)
}

/// Sequence number and payload of an ICMP echo request, if `frame` is one.
fn parse_echo_request(frame: &[u8]) -> Option<(u16, &[u8])> {
    let ip = frame.get(ETH_HLEN..)?;
    let header_len = usize::from(*ip.first()? & 0x0f) * 4;
    if *ip.get(9)? != IPPROTO_ICMP {
        return None;
    }
    let icmp = ip.get(header_len..)?;
    if *icmp.first()? != ICMP_ECHO_REQUEST || icmp.len() < 8 {
        return None;
    }
    Some((u16::from_be_bytes([icmp[6], icmp[7]]), &icmp[8..]))
}

/// Submit `frame`, waiting `delay` between attempts while the sender is out of buffers.
async fn transmit_with_retry(
    pair: &EndpointPair,
    id: EndpointId,
    frame: &[u8],
    delay: Duration,
    limit: u32,
) -> anyhow::Result<u32> {
    let mut retries = 0;
    loop {
        match pair.submit_transmit(id, frame) {
            Ok(()) => return Ok(retries),
            Err(err) if err.is_retryable() && retries < limit => {
                tracing::debug!(endpoint = %id, retries, "transmit refused: {err}");
                retries += 1;
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                return Err(err).with_context(|| format!("transmit on {id} failed"));
            }
        }
    }
}

pub async fn run(
    pair: &EndpointPair,
    log: &FrameLog,
    opts: &RunOptions,
    retry_delay: Duration,
    retry_limit: u32,
) -> anyhow::Result<Summary> {
    let mut summary = Summary::default();
    let payload: Vec<u8> = (0..opts.payload_len).map(|i| i as u8).collect();

    for seq in 0..opts.count {
        let request = icmp_echo(EndpointId::A, ICMP_ECHO_REQUEST, seq, &payload);
        summary.retries +=
            transmit_with_retry(pair, EndpointId::A, &request, retry_delay, retry_limit).await?;
        summary.requests_sent += 1;

        // Replies are delivered inline, so keep draining until nothing new arrives.
        loop {
            let received = log.take();
            if received.is_empty() {
                break;
            }
            for (id, frame) in received {
                match id {
                    EndpointId::B => {
                        let Some((seq, data)) = parse_echo_request(&frame) else {
                            tracing::warn!(len = frame.len(), "ignoring non-echo frame");
                            continue;
                        };
                        let reply = icmp_echo(EndpointId::B, ICMP_ECHO_REPLY, seq, data);
                        summary.retries +=
                            transmit_with_retry(pair, EndpointId::B, &reply, retry_delay, retry_limit)
                                .await?;
                        summary.replies_sent += 1;
                    }
                    EndpointId::A => {
                        tracing::trace!(len = frame.len(), "echo reply");
                        summary.replies_received += 1;
                    }
                }
            }
        }

        if !opts.hold_rx {
            for id in EndpointId::ALL {
                pair.complete_rx(id, usize::MAX);
            }
        }
    }

    Ok(summary)
}
