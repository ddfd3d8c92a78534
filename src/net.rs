//! TCP transport: pairwise connection mesh between the parties.
//!
//! The party with the lower id dials, the party with the higher id accepts;
//! every established stream starts with a `Hello` frame in each direction
//! carrying the sender's id and a random seed contribution. The pairwise
//! mask-generator seed is derived by hashing both contributions, so neither
//! endpoint controls it alone. Each stream is then handed to a dedicated
//! sender worker and a dedicated receiver worker moving length-prefixed
//! frames between the socket and the per-peer queues.

use std::{
    sync::{Arc, atomic::AtomicU64},
    time::Duration,
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::mpsc,
    time::{Instant, sleep, timeout},
};
use tracing::debug;

use crate::{
    channel::{Channel, FRAME_HEADER, Link, MsgTag, QUEUE_CAPACITY, decode_frame, encode_frame},
    wire::Phase,
};

/// Errors raised while establishing the connection mesh. No circuit
/// execution is attempted once any of these occurs.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The local listening socket could not be bound.
    #[error("could not bind to {addr}: {reason}")]
    Bind {
        /// The local address.
        addr: String,
        /// The underlying i/o error.
        reason: String,
    },
    /// A peer was not reachable within the connection budget.
    #[error("party {peer} at {addr} unreachable within the connection budget")]
    Unreachable {
        /// The peer that could not be reached.
        peer: usize,
        /// The address that was dialed.
        addr: String,
    },
    /// A peer did not complete the handshake as expected.
    #[error("handshake with party {peer} failed: {reason}")]
    Handshake {
        /// The peer on the other end of the stream.
        peer: usize,
        /// What went wrong.
        reason: String,
    },
    /// An i/o error during connection setup.
    #[error("i/o error during connection setup: {0}")]
    Io(String),
}

impl From<std::io::Error> for ConnectError {
    fn from(e: std::io::Error) -> Self {
        ConnectError::Io(e.to_string())
    }
}

/// One resolved peer entry: id, host and port.
#[derive(Debug, Clone)]
pub(crate) struct Endpoint {
    pub(crate) id: usize,
    pub(crate) host: String,
    pub(crate) port: u16,
}

impl Endpoint {
    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct Handshaken {
    stream: TcpStream,
    seed: [u8; 32],
}

/// Establishes the full mesh and returns this party's [`Channel`].
///
/// `endpoints` must contain one entry per party including our own, whose
/// port is used as the local bind port.
pub(crate) async fn connect_mesh(
    my_id: usize,
    endpoints: &[Endpoint],
    conn_timeout: Duration,
    max_frame: usize,
) -> Result<Channel, ConnectError> {
    let n = endpoints.len();
    let bind_addr = format!("0.0.0.0:{}", endpoints[my_id].port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| ConnectError::Bind {
            addr: bind_addr,
            reason: e.to_string(),
        })?;

    let higher: Vec<Endpoint> = endpoints.iter().filter(|p| p.id > my_id).cloned().collect();
    let (dialed, accepted) = futures::future::try_join(
        dial_all(my_id, &higher, conn_timeout),
        accept_all(my_id, &listener, conn_timeout),
    )
    .await?;

    let mut channel = Channel {
        my_id,
        links: (0..n).map(|_| None).collect(),
        inbound: (0..n).map(|_| None).collect(),
        seeds: vec![None; n],
    };
    for (peer, shaken) in dialed.into_iter().chain(accepted) {
        debug!(peer, "connection established");
        channel.seeds[peer] = Some(shaken.seed);
        let (link, inbound) = spawn_io_workers(shaken.stream, max_frame);
        channel.links[peer] = Some(link);
        channel.inbound[peer] = Some(inbound);
    }
    Ok(channel)
}

/// Dials every higher-id peer, retrying until the connection budget runs out.
async fn dial_all(
    my_id: usize,
    peers: &[Endpoint],
    conn_timeout: Duration,
) -> Result<Vec<(usize, Handshaken)>, ConnectError> {
    let mut connections = Vec::with_capacity(peers.len());
    for peer in peers {
        let addr = peer.addr();
        let start = Instant::now();
        let mut stream = loop {
            match timeout(conn_timeout, TcpStream::connect(&addr)).await {
                Ok(Ok(stream)) => break stream,
                _ if start.elapsed() > conn_timeout => {
                    return Err(ConnectError::Unreachable {
                        peer: peer.id,
                        addr,
                    });
                }
                _ => sleep(Duration::from_millis(50)).await,
            }
        };
        stream.set_nodelay(true)?;
        let seed = handshake(my_id, peer.id, &mut stream, conn_timeout).await?;
        connections.push((peer.id, Handshaken { stream, seed }));
    }
    Ok(connections)
}

/// Accepts one connection from every lower-id peer, in whatever order they
/// arrive.
async fn accept_all(
    my_id: usize,
    listener: &TcpListener,
    conn_timeout: Duration,
) -> Result<Vec<(usize, Handshaken)>, ConnectError> {
    let mut connections = Vec::with_capacity(my_id);
    let mut expected: Vec<bool> = (0..my_id).map(|_| true).collect();
    for _ in 0..my_id {
        let (mut stream, _) = timeout(conn_timeout, listener.accept())
            .await
            .map_err(|_| ConnectError::Io("timed out waiting for incoming connections".into()))??;
        stream.set_nodelay(true)?;
        let (peer, seed) = answer_handshake(my_id, &mut stream, conn_timeout).await?;
        if peer >= my_id || !std::mem::take(&mut expected[peer]) {
            return Err(ConnectError::Handshake {
                peer,
                reason: "unexpected or duplicate party id".into(),
            });
        }
        connections.push((peer, Handshaken { stream, seed }));
    }
    Ok(connections)
}

/// Dialer side: send our `Hello`, await the peer's, derive the seed.
async fn handshake(
    my_id: usize,
    peer: usize,
    stream: &mut TcpStream,
    deadline: Duration,
) -> Result<[u8; 32], ConnectError> {
    let my_contribution: [u8; 16] = rand::random();
    send_hello(stream, my_id, my_contribution).await?;
    let (claimed, theirs) = timeout(deadline, read_hello(stream))
        .await
        .map_err(|_| ConnectError::Handshake {
            peer,
            reason: "timed out waiting for the handshake reply".into(),
        })??;
    if claimed != peer {
        return Err(ConnectError::Handshake {
            peer,
            reason: format!("peer identified itself as party {claimed}"),
        });
    }
    Ok(derive_seed(my_id, my_contribution, peer, theirs))
}

/// Acceptor side: await the dialer's `Hello`, answer with ours.
async fn answer_handshake(
    my_id: usize,
    stream: &mut TcpStream,
    deadline: Duration,
) -> Result<(usize, [u8; 32]), ConnectError> {
    let (peer, theirs) = timeout(deadline, read_hello(stream))
        .await
        .map_err(|_| ConnectError::Handshake {
            peer: usize::MAX,
            reason: "timed out waiting for the handshake".into(),
        })??;
    let my_contribution: [u8; 16] = rand::random();
    send_hello(stream, my_id, my_contribution).await?;
    Ok((peer, derive_seed(my_id, my_contribution, peer, theirs)))
}

/// Both endpoints contribute randomness; the seed hashes the contributions
/// ordered by party id so both sides derive the same value.
fn derive_seed(my_id: usize, mine: [u8; 16], peer: usize, theirs: [u8; 16]) -> [u8; 32] {
    let (low, high) = if my_id < peer {
        (mine, theirs)
    } else {
        (theirs, mine)
    };
    let mut hasher = blake3::Hasher::new();
    hasher.update(&low);
    hasher.update(&high);
    *hasher.finalize().as_bytes()
}

async fn send_hello(
    stream: &mut TcpStream,
    my_id: usize,
    contribution: [u8; 16],
) -> Result<(), ConnectError> {
    let frame = encode_frame(
        MsgTag::Hello,
        Phase::Setup,
        0,
        &(my_id as u64, contribution),
    )
    .map_err(|e| ConnectError::Io(e.to_string()))?;
    stream.write_u32(frame.len() as u32).await?;
    stream.write_all(&frame).await?;
    Ok(())
}

async fn read_hello(stream: &mut TcpStream) -> Result<(usize, [u8; 16]), ConnectError> {
    let len = stream.read_u32().await? as usize;
    if len < FRAME_HEADER || len > 1024 {
        return Err(ConnectError::Io("malformed handshake frame".into()));
    }
    let mut bytes = vec![0u8; len];
    stream.read_exact(&mut bytes).await?;
    let frame = decode_frame(usize::MAX, bytes).map_err(|e| ConnectError::Io(e.to_string()))?;
    if frame.tag != MsgTag::Hello {
        return Err(ConnectError::Io("expected a Hello frame".into()));
    }
    let (id, contribution): (u64, [u8; 16]) =
        bincode::deserialize(&frame.payload).map_err(|e| ConnectError::Io(e.to_string()))?;
    Ok((id as usize, contribution))
}

/// Spawns the sender/receiver workers for one established stream.
fn spawn_io_workers(stream: TcpStream, max_frame: usize) -> (Link, mpsc::Receiver<Vec<u8>>) {
    let (rd, wr) = stream.into_split();
    let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(QUEUE_CAPACITY);
    let (in_tx, in_rx) = mpsc::channel::<Vec<u8>>(QUEUE_CAPACITY);
    tokio::spawn(write_loop(wr, out_rx));
    tokio::spawn(read_loop(rd, in_tx, max_frame));
    let link = Link {
        tx: out_tx,
        sent: Arc::new(AtomicU64::new(0)),
        received: Arc::new(AtomicU64::new(0)),
    };
    (link, in_rx)
}

async fn write_loop(mut wr: OwnedWriteHalf, mut out_rx: mpsc::Receiver<Vec<u8>>) {
    while let Some(frame) = out_rx.recv().await {
        if wr.write_u32(frame.len() as u32).await.is_err()
            || wr.write_all(&frame).await.is_err()
        {
            break;
        }
    }
    let _ = wr.shutdown().await;
}

async fn read_loop(mut rd: OwnedReadHalf, in_tx: mpsc::Sender<Vec<u8>>, max_frame: usize) {
    loop {
        let len = match rd.read_u32().await {
            Ok(len) => len as usize,
            Err(_) => break,
        };
        if len > max_frame {
            debug!(len, max_frame, "dropping connection: frame too large");
            break;
        }
        let mut frame = vec![0u8; len];
        if rd.read_exact(&mut frame).await.is_err() {
            break;
        }
        if in_tx.send(frame).await.is_err() {
            break;
        }
    }
    // Dropping the sender marks the link closed for the router.
}
