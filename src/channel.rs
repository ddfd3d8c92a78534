//! Per-peer communication channels used to send/receive protocol messages.
//!
//! Every peer pair is connected by a duplex link: an outbound queue drained
//! by a dedicated sender worker and an inbound queue fed by a dedicated
//! receiver worker. On top of the raw links sits a tag router: each frame
//! carries a message tag, a phase marker and a gate id, and is delivered to
//! whichever consumer is waiting for exactly that key. Within one peer pair
//! frames are delivered in send order; there is no ordering guarantee across
//! peers or tags.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use serde::{Serialize, de::DeserializeOwned};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};

use crate::wire::Phase;

/// Capacity of the per-peer outbound/inbound queues.
pub(crate) const QUEUE_CAPACITY: usize = 1024;

/// Errors related to sending / receiving / (de-)serializing messages.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The link to the peer was closed before the message could be
    /// delivered. A peer disconnecting mid-run is fatal for the whole run.
    #[error("connection to party {peer} is closed")]
    Closed {
        /// The peer whose link went down.
        peer: usize,
    },
    /// No matching message arrived before the configured receive deadline.
    #[error("timed out waiting for a message from party {peer}")]
    Timeout {
        /// The peer that failed to deliver in time.
        peer: usize,
    },
    /// A frame exceeded the configured maximum length.
    #[error("frame of {len} bytes exceeds the maximum of {max} bytes")]
    FrameTooLarge {
        /// Actual frame length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },
    /// A frame did not follow the tag/phase/gate header layout.
    #[error("malformed frame received from party {peer}")]
    MalformedFrame {
        /// The peer the frame came from.
        peer: usize,
    },
    /// A message could not be serialized or deserialized.
    #[error("could not (de-)serialize message: {0}")]
    Serde(String),
    /// A message is a sequence, but not of the expected length.
    #[error("message from party {peer} has length {actual}, expected {expected}")]
    InvalidLength {
        /// The sending peer.
        peer: usize,
        /// Received element count.
        actual: usize,
        /// Expected element count.
        expected: usize,
    },
}

/// The kind of payload a frame carries, used to route it to its consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum MsgTag {
    /// Connection handshake: party id plus a seed contribution.
    Hello,
    /// Mask shares sent to the owner of a garbled input.
    InputShare,
    /// A multiplication-triple share from the dealer.
    TripleShare,
    /// Conversion/garbling mask material.
    MaskShare,
    /// Masked-value exchange: Beaver openings and masked-wire broadcasts.
    Opening,
    /// A share sent to a designated revealing party.
    OutputReveal,
    /// Termination signal.
    Done,
}

impl MsgTag {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            MsgTag::Hello => 0,
            MsgTag::InputShare => 1,
            MsgTag::TripleShare => 2,
            MsgTag::MaskShare => 3,
            MsgTag::Opening => 4,
            MsgTag::OutputReveal => 5,
            MsgTag::Done => 6,
        }
    }

    pub(crate) fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(MsgTag::Hello),
            1 => Some(MsgTag::InputShare),
            2 => Some(MsgTag::TripleShare),
            3 => Some(MsgTag::MaskShare),
            4 => Some(MsgTag::Opening),
            5 => Some(MsgTag::OutputReveal),
            6 => Some(MsgTag::Done),
            _ => None,
        }
    }
}

/// Header layout: 1 byte tag, 1 byte phase, 8 bytes gate id (big-endian).
/// The length prefix is added by the transport where the byte stream needs
/// it; in-process queues deliver whole frames as-is.
pub(crate) const FRAME_HEADER: usize = 10;

/// Serializes a message into a routed frame.
pub(crate) fn encode_frame(
    tag: MsgTag,
    phase: Phase,
    gate: u64,
    msg: &impl Serialize,
) -> Result<Vec<u8>, Error> {
    let payload = bincode::serialize(msg).map_err(|e| Error::Serde(format!("{e:?}")))?;
    let mut frame = Vec::with_capacity(FRAME_HEADER + payload.len());
    frame.push(tag.to_byte());
    frame.push(phase.to_byte());
    frame.extend(gate.to_be_bytes());
    frame.extend(payload);
    Ok(frame)
}

/// A parsed frame header plus its raw payload.
pub(crate) struct Frame {
    pub(crate) tag: MsgTag,
    pub(crate) phase: Phase,
    pub(crate) gate: u64,
    pub(crate) payload: Vec<u8>,
}

pub(crate) fn decode_frame(peer: usize, mut bytes: Vec<u8>) -> Result<Frame, Error> {
    if bytes.len() < FRAME_HEADER {
        return Err(Error::MalformedFrame { peer });
    }
    let tag = MsgTag::from_byte(bytes[0]).ok_or(Error::MalformedFrame { peer })?;
    let phase = Phase::from_byte(bytes[1]).ok_or(Error::MalformedFrame { peer })?;
    let gate = u64::from_be_bytes(bytes[2..10].try_into().expect("checked header length"));
    let payload = bytes.split_off(FRAME_HEADER);
    Ok(Frame {
        tag,
        phase,
        gate,
        payload,
    })
}

/// The sending half of one duplex link, plus its transfer counters.
#[derive(Debug)]
pub(crate) struct Link {
    pub(crate) tx: mpsc::Sender<Vec<u8>>,
    pub(crate) sent: Arc<AtomicU64>,
    pub(crate) received: Arc<AtomicU64>,
}

/// All links of one party, as produced by a transport.
///
/// The inbound receivers are taken over by the router when a session starts;
/// the pairwise seeds feed the deterministic input-mask generators.
#[derive(Debug)]
pub struct Channel {
    pub(crate) my_id: usize,
    pub(crate) links: Vec<Option<Link>>,
    pub(crate) inbound: Vec<Option<mpsc::Receiver<Vec<u8>>>>,
    pub(crate) seeds: Vec<Option<[u8; 32]>>,
}

impl Channel {
    /// Creates fully connected in-process channels for `parties` parties,
    /// one [`Channel`] per party. Used by tests and local simulation.
    pub fn in_memory(parties: usize) -> Vec<Channel> {
        let mut channels: Vec<Channel> = (0..parties)
            .map(|id| Channel {
                my_id: id,
                links: (0..parties).map(|_| None).collect(),
                inbound: (0..parties).map(|_| None).collect(),
                seeds: vec![None; parties],
            })
            .collect();
        for a in 0..parties {
            for b in (a + 1)..parties {
                let (tx_a_to_b, rx_a_to_b) = mpsc::channel(QUEUE_CAPACITY);
                let (tx_b_to_a, rx_b_to_a) = mpsc::channel(QUEUE_CAPACITY);
                channels[a].links[b] = Some(Link {
                    tx: tx_a_to_b,
                    sent: Arc::new(AtomicU64::new(0)),
                    received: Arc::new(AtomicU64::new(0)),
                });
                channels[b].links[a] = Some(Link {
                    tx: tx_b_to_a,
                    sent: Arc::new(AtomicU64::new(0)),
                    received: Arc::new(AtomicU64::new(0)),
                });
                channels[a].inbound[b] = Some(rx_b_to_a);
                channels[b].inbound[a] = Some(rx_a_to_b);
                let seed = rand::random();
                channels[a].seeds[b] = Some(seed);
                channels[b].seeds[a] = Some(seed);
            }
        }
        channels
    }
}

/// Key under which a frame is handed to its consumer.
type MailKey = (usize, MsgTag, Phase, u64);

enum Slot {
    /// Frames that arrived before anyone asked for them.
    Ready(VecDeque<Vec<u8>>),
    /// Consumers that asked before the frame arrived.
    Waiting(VecDeque<oneshot::Sender<Result<Vec<u8>, Error>>>),
}

/// The tag router: owns the links, delivers inbound frames to consumers
/// waiting on their `(peer, tag, phase, gate)` key and tracks statistics.
pub(crate) struct Router {
    my_id: usize,
    links: Vec<Option<Link>>,
    mailbox: Mutex<HashMap<MailKey, Slot>>,
    closed: Mutex<HashSet<usize>>,
    recv_timeout: Duration,
    max_frame_length: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Router {
    /// Takes over a transport's links and spawns one routing worker per
    /// peer. Must be called from within a tokio runtime.
    pub(crate) fn start(
        mut channel: Channel,
        recv_timeout: Duration,
        max_frame_length: usize,
    ) -> Arc<Router> {
        let router = Arc::new(Router {
            my_id: channel.my_id,
            links: std::mem::take(&mut channel.links),
            mailbox: Mutex::new(HashMap::new()),
            closed: Mutex::new(HashSet::new()),
            recv_timeout,
            max_frame_length,
            workers: Mutex::new(Vec::new()),
        });
        let mut workers = Vec::new();
        for (peer, inbound) in channel.inbound.iter_mut().enumerate() {
            let Some(mut rx) = inbound.take() else {
                continue;
            };
            let router_for_peer = router.clone();
            workers.push(tokio::spawn(async move {
                while let Some(bytes) = rx.recv().await {
                    router_for_peer.deliver(peer, bytes);
                }
                router_for_peer.mark_closed(peer);
            }));
        }
        *router.workers.lock().expect("worker lock poisoned") = workers;
        router
    }

    fn deliver(&self, peer: usize, bytes: Vec<u8>) {
        if let Some(link) = self.links[peer].as_ref() {
            link.received.fetch_add(bytes.len() as u64, Ordering::Relaxed);
        }
        let frame = match decode_frame(peer, bytes) {
            Ok(frame) => frame,
            // An unparseable frame poisons the link: treat it like a
            // disconnect so waiting consumers fail instead of hanging.
            Err(_) => {
                self.mark_closed(peer);
                return;
            }
        };
        let key = (peer, frame.tag, frame.phase, frame.gate);
        let mut mailbox = self.mailbox.lock().expect("mailbox lock poisoned");
        match mailbox.remove(&key) {
            None => {
                mailbox.insert(key, Slot::Ready(VecDeque::from([frame.payload])));
            }
            Some(Slot::Ready(mut queue)) => {
                queue.push_back(frame.payload);
                mailbox.insert(key, Slot::Ready(queue));
            }
            Some(Slot::Waiting(mut waiters)) => {
                let waiter = waiters.pop_front().expect("waiting slots are non-empty");
                if !waiters.is_empty() {
                    mailbox.insert(key, Slot::Waiting(waiters));
                }
                // The consumer may have timed out in the meantime.
                let _ = waiter.send(Ok(frame.payload));
            }
        }
    }

    fn mark_closed(&self, peer: usize) {
        self.closed
            .lock()
            .expect("closed lock poisoned")
            .insert(peer);
        let mut mailbox = self.mailbox.lock().expect("mailbox lock poisoned");
        mailbox.retain(|(p, ..), slot| {
            if *p != peer {
                return true;
            }
            if let Slot::Waiting(waiters) = slot {
                for waiter in waiters.drain(..) {
                    let _ = waiter.send(Err(Error::Closed { peer }));
                }
                return false;
            }
            true
        });
    }

    /// Serializes a message and enqueues it on the link to `peer`. The
    /// enqueue only blocks if the outbound queue is full.
    pub(crate) async fn send_to(
        &self,
        peer: usize,
        tag: MsgTag,
        phase: Phase,
        gate: u64,
        msg: &impl Serialize,
    ) -> Result<(), Error> {
        let frame = encode_frame(tag, phase, gate, msg)?;
        if frame.len() > self.max_frame_length {
            return Err(Error::FrameTooLarge {
                len: frame.len(),
                max: self.max_frame_length,
            });
        }
        let link = self.links[peer]
            .as_ref()
            .unwrap_or_else(|| panic!("no link to party {peer}"));
        link.sent.fetch_add(frame.len() as u64, Ordering::Relaxed);
        link.tx.send(frame).await.map_err(|_| Error::Closed { peer })
    }

    /// Awaits the frame matching `(peer, tag, phase, gate)` and
    /// deserializes its payload. Fails once the receive deadline elapses.
    pub(crate) async fn recv_from<T: DeserializeOwned>(
        &self,
        peer: usize,
        tag: MsgTag,
        phase: Phase,
        gate: u64,
    ) -> Result<T, Error> {
        let bytes = self.recv_raw(peer, tag, phase, gate).await?;
        bincode::deserialize(&bytes).map_err(|e| Error::Serde(format!("{e:?}")))
    }

    /// Like [`Router::recv_from`] for `Vec` payloads, checking the length.
    pub(crate) async fn recv_vec_from<T: DeserializeOwned>(
        &self,
        peer: usize,
        tag: MsgTag,
        phase: Phase,
        gate: u64,
        expected: usize,
    ) -> Result<Vec<T>, Error> {
        let v: Vec<T> = self.recv_from(peer, tag, phase, gate).await?;
        if v.len() == expected {
            Ok(v)
        } else {
            Err(Error::InvalidLength {
                peer,
                actual: v.len(),
                expected,
            })
        }
    }

    async fn recv_raw(
        &self,
        peer: usize,
        tag: MsgTag,
        phase: Phase,
        gate: u64,
    ) -> Result<Vec<u8>, Error> {
        let key = (peer, tag, phase, gate);
        let rx = {
            // Lock order: the mailbox lock may be held while taking the
            // closed lock, never the other way around.
            let mut mailbox = self.mailbox.lock().expect("mailbox lock poisoned");
            match mailbox.remove(&key) {
                Some(Slot::Ready(mut queue)) => {
                    let bytes = queue.pop_front().expect("ready slots are non-empty");
                    if !queue.is_empty() {
                        mailbox.insert(key, Slot::Ready(queue));
                    }
                    return Ok(bytes);
                }
                parked => {
                    let closed = self
                        .closed
                        .lock()
                        .expect("closed lock poisoned")
                        .contains(&peer);
                    if closed {
                        if let Some(slot) = parked {
                            mailbox.insert(key, slot);
                        }
                        return Err(Error::Closed { peer });
                    } else {
                        let (tx, rx) = oneshot::channel();
                        let mut waiters = match parked {
                            Some(Slot::Waiting(waiters)) => waiters,
                            _ => VecDeque::new(),
                        };
                        waiters.push_back(tx);
                        mailbox.insert(key, Slot::Waiting(waiters));
                        rx
                    }
                }
            }
        };
        match timeout(self.recv_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Closed { peer }),
            Err(_) => Err(Error::Timeout { peer }),
        }
    }

    /// Bytes sent to / received from every peer, in peer-id order.
    pub(crate) fn stats(&self) -> Vec<(usize, u64, u64)> {
        self.links
            .iter()
            .enumerate()
            .filter_map(|(peer, link)| {
                link.as_ref().map(|link| {
                    (
                        peer,
                        link.sent.load(Ordering::Relaxed),
                        link.received.load(Ordering::Relaxed),
                    )
                })
            })
            .collect()
    }

    pub(crate) fn my_id(&self) -> usize {
        self.my_id
    }

    /// Stops the routing workers; links are dropped with the router.
    pub(crate) fn shutdown(&self) {
        for worker in self.workers.lock().expect("worker lock poisoned").drain(..) {
            worker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_roundtrip() {
        let frame = encode_frame(MsgTag::Opening, Phase::Online, 7, &vec![1u64, 2, 3]).unwrap();
        let parsed = decode_frame(1, frame).unwrap();
        assert_eq!(parsed.tag, MsgTag::Opening);
        assert_eq!(parsed.phase, Phase::Online);
        assert_eq!(parsed.gate, 7);
        let payload: Vec<u64> = bincode::deserialize(&parsed.payload).unwrap();
        assert_eq!(payload, vec![1, 2, 3]);
    }

    #[test]
    fn truncated_frame_is_rejected() {
        assert!(matches!(
            decode_frame(2, vec![0, 1, 2]),
            Err(Error::MalformedFrame { peer: 2 })
        ));
    }

    #[tokio::test]
    async fn routes_by_tag_and_gate_out_of_order() {
        let mut channels = Channel::in_memory(2);
        let b = channels.pop().unwrap();
        let a = channels.pop().unwrap();
        let a = Router::start(a, Duration::from_secs(5), 1 << 20);
        let b = Router::start(b, Duration::from_secs(5), 1 << 20);

        // Send two differently-keyed messages, receive them reversed.
        a.send_to(1, MsgTag::Opening, Phase::Online, 1, &10u32)
            .await
            .unwrap();
        a.send_to(1, MsgTag::Opening, Phase::Online, 2, &20u32)
            .await
            .unwrap();
        let second: u32 = b
            .recv_from(0, MsgTag::Opening, Phase::Online, 2)
            .await
            .unwrap();
        let first: u32 = b
            .recv_from(0, MsgTag::Opening, Phase::Online, 1)
            .await
            .unwrap();
        assert_eq!((first, second), (10, 20));
    }

    #[tokio::test]
    async fn closed_link_fails_waiters() {
        let mut channels = Channel::in_memory(2);
        let b = channels.pop().unwrap();
        let a = channels.pop().unwrap();
        let b = Router::start(b, Duration::from_secs(5), 1 << 20);
        drop(a);
        let res: Result<u32, Error> = b.recv_from(0, MsgTag::Opening, Phase::Online, 1).await;
        assert!(matches!(res, Err(Error::Closed { peer: 0 })));
    }
}
