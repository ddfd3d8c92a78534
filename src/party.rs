//! The party: top-level session object of one MPC participant.
//!
//! A party is constructed from a validated configuration, establishes one
//! duplex channel per peer, hands out input shares while the circuit is
//! built, executes the circuit with `run` and tears the session down with
//! `finish`. All configuration problems surface before any network
//! activity; a peer that is unreachable or disconnects mid-run fails the
//! whole session, since a partial MPC result is unusable.

use std::{future::Future, str::FromStr, sync::Arc, time::Duration};

use tokio::task::JoinSet;
use tracing::info;

use crate::{
    channel::{self, Channel, MsgTag, Router},
    net::{self, ConnectError, Endpoint},
    register::Backend,
    share::Share,
    wire::{Phase, Scheme},
};

/// Default deadline for a single receive; a peer that stays silent longer
/// aborts the run.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(10 * 60);
/// Default budget for establishing all peer connections.
pub const DEFAULT_CONN_TIMEOUT: Duration = Duration::from_secs(60);
/// Default upper bound on a single message frame.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 128 * 1024 * 1024;

/// Top-level error type of the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration, rejected before any network activity.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// A peer could not be reached during connection setup; no circuit
    /// execution was attempted.
    #[error("connection error: {0}")]
    Connect(#[from] ConnectError),
    /// Sending or receiving failed mid-protocol; fatal for the whole run.
    #[error("communication error: {0}")]
    Channel(#[from] channel::Error),
    /// The output was revealed to a different party.
    #[error("the output was revealed to a different party")]
    OutputHidden,
    /// The output is only readable after `run` has completed.
    #[error("the output is not available before the run completes")]
    OutputNotReady,
    /// `value` was called on a share that is not a revealed output.
    #[error("the share is not an output share")]
    NotAnOutput,
}

/// Configuration problems, raised at call time.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A peer specification did not follow the `id,host,port` pattern.
    #[error("malformed peer spec {spec:?}: {reason}")]
    MalformedPeer {
        /// The offending specification string.
        spec: String,
        /// Which part failed to parse.
        reason: String,
    },
    /// A party id is outside `0..parties`.
    #[error("party id {id} out of range for {parties} parties")]
    InvalidPartyId {
        /// The offending id.
        id: usize,
        /// The number of parties in the session.
        parties: usize,
    },
    /// Two peer entries claim the same id.
    #[error("duplicate peer entry for party {id}")]
    DuplicatePeer {
        /// The duplicated id.
        id: usize,
    },
    /// The peer list does not cover every id in `0..parties`.
    #[error("no peer entry for party {id}")]
    MissingPeer {
        /// The uncovered id.
        id: usize,
    },
    /// An MPC session needs at least two parties.
    #[error("at least two parties are required, got {parties}")]
    TooFewParties {
        /// The configured number of parties.
        parties: usize,
    },
    /// Invalid bit width for the chosen scheme.
    #[error("bit width {bits} is invalid for this scheme")]
    InvalidBitWidth {
        /// The offending width.
        bits: usize,
    },
    /// Input values must be provided by exactly the owning party.
    #[error("input values must be provided by the owner (party {owner}) and nobody else")]
    InputOwnerMismatch {
        /// The declared owner of the input.
        owner: usize,
    },
    /// The number of provided lanes disagrees with the SIMD width.
    #[error("got {actual} input lanes, expected {expected}")]
    WrongLaneCount {
        /// Provided lanes.
        actual: usize,
        /// Expected lanes.
        expected: usize,
    },
    /// An input value does not fit the declared bit width.
    #[error("input value does not fit into {bits} bits")]
    ValueOutOfRange {
        /// The declared width.
        bits: usize,
    },
}

/// One peer entry: party id, host and port. Parsed from the canonical
/// `id,host,port` notation used in configuration files and on the command
/// line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSpec {
    /// The party's id, `0`-based.
    pub id: usize,
    /// Host name or address.
    pub host: String,
    /// TCP port the party listens on.
    pub port: u16,
}

impl FromStr for PeerSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: &str| ConfigError::MalformedPeer {
            spec: s.to_string(),
            reason: reason.to_string(),
        };
        let mut parts = s.split(',');
        let (Some(id), Some(host), Some(port), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed("expected exactly `id,host,port`"));
        };
        let id = id
            .trim()
            .parse::<usize>()
            .map_err(|_| malformed("id is not a non-negative integer"))?;
        if host.is_empty() {
            return Err(malformed("host is empty"));
        }
        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|_| malformed("port is not a valid TCP port"))?;
        Ok(PeerSpec {
            id,
            host: host.to_string(),
            port,
        })
    }
}

/// Validated session configuration.
#[derive(Debug, Clone)]
pub struct PartyConfig {
    /// This party's id.
    pub my_id: usize,
    /// All parties of the session including this one, in id order.
    pub peers: Vec<PeerSpec>,
    /// Complete the setup phase of every gate before any online phase
    /// starts; turning this off interleaves the phases per gate.
    pub online_after_setup: bool,
    /// Log per-peer transfer statistics at teardown.
    pub logging: bool,
    /// Deadline for a single receive.
    pub recv_timeout: Duration,
    /// Budget for establishing all peer connections.
    pub conn_timeout: Duration,
    /// Upper bound on a single message frame.
    pub max_frame_length: usize,
}

impl PartyConfig {
    /// Validates ids and peer entries and fills in the defaults. Fails
    /// before any connection is attempted.
    pub fn new(my_id: usize, peers: Vec<PeerSpec>) -> Result<PartyConfig, ConfigError> {
        let parties = peers.len();
        if parties < 2 {
            return Err(ConfigError::TooFewParties { parties });
        }
        if my_id >= parties {
            return Err(ConfigError::InvalidPartyId { id: my_id, parties });
        }
        let mut sorted = peers;
        sorted.sort_by_key(|p| p.id);
        for (expected, peer) in sorted.iter().enumerate() {
            if peer.id >= parties {
                return Err(ConfigError::InvalidPartyId {
                    id: peer.id,
                    parties,
                });
            }
            if peer.id < expected {
                return Err(ConfigError::DuplicatePeer { id: peer.id });
            }
            if peer.id > expected {
                return Err(ConfigError::MissingPeer { id: expected });
            }
        }
        Ok(PartyConfig {
            my_id,
            peers: sorted,
            online_after_setup: true,
            logging: false,
            recv_timeout: DEFAULT_RECV_TIMEOUT,
            conn_timeout: DEFAULT_CONN_TIMEOUT,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        })
    }
}

/// One MPC participant: owns the backend and the communication layer.
pub struct Party {
    be: Arc<Backend>,
    logging: bool,
}

impl Party {
    /// Establishes the pairwise connection mesh described by `config` and
    /// returns the ready party. Fails if any peer is unreachable within
    /// the connection budget.
    pub async fn connect(config: PartyConfig) -> Result<Party, Error> {
        let endpoints: Vec<Endpoint> = config
            .peers
            .iter()
            .map(|p| Endpoint {
                id: p.id,
                host: p.host.clone(),
                port: p.port,
            })
            .collect();
        let channel = net::connect_mesh(
            config.my_id,
            &endpoints,
            config.conn_timeout,
            config.max_frame_length,
        )
        .await?;
        Ok(Party::from_channel(channel, &config))
    }

    /// Builds a set of locally connected parties exchanging messages over
    /// in-process queues. The workhorse of tests and simulations; must be
    /// called from within a tokio runtime.
    pub fn in_memory(parties: usize) -> Vec<Party> {
        Party::in_memory_with(parties, true)
    }

    /// Like [`Party::in_memory`], with control over phase interleaving.
    pub fn in_memory_with(parties: usize, online_after_setup: bool) -> Vec<Party> {
        Channel::in_memory(parties)
            .into_iter()
            .map(|channel| {
                let config = PartyConfig {
                    my_id: channel.my_id,
                    peers: vec![],
                    online_after_setup,
                    logging: false,
                    recv_timeout: DEFAULT_RECV_TIMEOUT,
                    conn_timeout: DEFAULT_CONN_TIMEOUT,
                    max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
                };
                Party::from_channel_n(channel, &config, parties)
            })
            .collect()
    }

    fn from_channel(channel: Channel, config: &PartyConfig) -> Party {
        let parties = config.peers.len();
        Party::from_channel_n(channel, config, parties)
    }

    fn from_channel_n(mut channel: Channel, config: &PartyConfig, parties: usize) -> Party {
        let seeds = std::mem::take(&mut channel.seeds);
        let router = Router::start(channel, config.recv_timeout, config.max_frame_length);
        let be = Backend::new(parties, config.online_after_setup, router, seeds);
        Party {
            be,
            logging: config.logging,
        }
    }

    /// This party's id.
    pub fn my_id(&self) -> usize {
        self.be.my_id
    }

    /// The number of parties in the session.
    pub fn parties(&self) -> usize {
        self.be.n_parties
    }

    /// Creates one input share for the circuit.
    ///
    /// `owner` contributes the value: it passes the cleartext lanes in
    /// `values`, every other party passes `None` and only shapes the share
    /// via `bits` and `simd`. Arithmetic shares are fixed at 64 bits;
    /// boolean and garbled shares take any width up to 64, packed
    /// least-significant-bit first.
    pub fn input(
        &self,
        scheme: Scheme,
        owner: usize,
        bits: usize,
        values: Option<Vec<u64>>,
        simd: usize,
    ) -> Result<Share, Error> {
        if owner >= self.be.n_parties {
            return Err(ConfigError::InvalidPartyId {
                id: owner,
                parties: self.be.n_parties,
            }
            .into());
        }
        let valid_bits = match scheme {
            Scheme::Arith => bits == 64,
            Scheme::Bool | Scheme::Garbled => (1..=64).contains(&bits),
        };
        if !valid_bits || simd == 0 {
            return Err(ConfigError::InvalidBitWidth { bits }.into());
        }
        if values.is_some() != (owner == self.be.my_id) {
            return Err(ConfigError::InputOwnerMismatch { owner }.into());
        }
        if let Some(values) = &values {
            if values.len() != simd {
                return Err(ConfigError::WrongLaneCount {
                    actual: values.len(),
                    expected: simd,
                }
                .into());
            }
            if bits < 64 && values.iter().any(|v| v >> bits != 0) {
                return Err(ConfigError::ValueOutOfRange { bits }.into());
            }
        }
        let wires: Vec<_> = match scheme {
            Scheme::Arith => vec![self.be.new_wire(scheme, simd, false)],
            Scheme::Bool | Scheme::Garbled => (0..bits)
                .map(|_| self.be.new_wire(scheme, simd, false))
                .collect(),
        };
        self.be.new_gate(
            crate::gate::Op::Input { owner, values },
            vec![],
            wires.clone(),
        );
        Ok(Share::new(self.be.clone(), wires, scheme, simd))
    }

    /// Executes the circuit built since the last run: the setup phase of
    /// every registered gate, then the online phase (or interleaved, per
    /// the configuration). Blocks until every gate finished or the run
    /// failed. The registered gates are consumed; revealed outputs stay
    /// readable.
    pub async fn run(&self) -> Result<(), Error> {
        self.be.run().await
    }

    /// Bytes sent to and received from every peer so far, as
    /// `(peer, sent, received)` in peer order.
    pub fn stats(&self) -> Vec<(usize, u64, u64)> {
        self.be.router.stats()
    }

    /// Graceful teardown: exchanges termination signals with every peer,
    /// reports transfer statistics and releases the communication
    /// workers. Consumes the party, so it runs once per instance.
    pub async fn finish(self) -> Result<(), Error> {
        for peer in self.be.peers() {
            self.be
                .router
                .send_to(peer, MsgTag::Done, Phase::Online, 0, &())
                .await?;
        }
        for peer in self.be.peers() {
            self.be
                .router
                .recv_from::<()>(peer, MsgTag::Done, Phase::Online, 0)
                .await?;
        }
        if self.logging {
            for (peer, sent, received) in self.stats() {
                info!(peer, sent, received, "channel statistics");
            }
        }
        self.be.router.shutdown();
        Ok(())
    }
}

/// Runs one closure per party over in-process channels and collects every
/// party's result, in party-id order. The standard harness for tests and
/// local experiments.
pub async fn simulate<T, F, Fut>(parties: usize, f: F) -> Result<Vec<T>, Error>
where
    F: Fn(Party) -> Fut,
    Fut: Future<Output = Result<T, Error>> + Send + 'static,
    T: Send + 'static,
{
    let mut set = JoinSet::new();
    for party in Party::in_memory(parties) {
        let id = party.my_id();
        let fut = f(party);
        set.spawn(async move { (id, fut.await) });
    }
    let mut results: Vec<Option<T>> = (0..parties).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((id, result)) => results[id] = Some(result?),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => unreachable!("simulation tasks are not cancelled"),
        }
    }
    Ok(results
        .into_iter()
        .map(|r| r.expect("every party produced a result"))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_peer_specs() {
        let peer: PeerSpec = "2,127.0.0.1,23002".parse().unwrap();
        assert_eq!(
            peer,
            PeerSpec {
                id: 2,
                host: "127.0.0.1".to_string(),
                port: 23002
            }
        );
    }

    #[test]
    fn rejects_malformed_peer_specs() {
        // Out-of-range port.
        assert!("9,not_an_ip,99999".parse::<PeerSpec>().is_err());
        // Missing pieces and junk.
        for spec in ["", "1", "1,host", "x,host,23000", "1,,23000", "1,h,2,3"] {
            assert!(spec.parse::<PeerSpec>().is_err(), "accepted {spec:?}");
        }
    }

    #[test]
    fn config_validation_precedes_networking() {
        let peers = |n: usize| {
            (0..n)
                .map(|id| PeerSpec {
                    id,
                    host: "localhost".to_string(),
                    port: 23000 + id as u16,
                })
                .collect::<Vec<_>>()
        };
        assert!(matches!(
            PartyConfig::new(0, peers(1)),
            Err(ConfigError::TooFewParties { parties: 1 })
        ));
        assert!(matches!(
            PartyConfig::new(3, peers(3)),
            Err(ConfigError::InvalidPartyId { id: 3, parties: 3 })
        ));
        let mut duplicated = peers(3);
        duplicated[2].id = 1;
        assert!(matches!(
            PartyConfig::new(0, duplicated),
            Err(ConfigError::DuplicatePeer { id: 1 })
        ));
        // An id far out of range, as in a `9,host,port` entry for a
        // three-party session.
        let mut out_of_range = peers(3);
        out_of_range[2].id = 9;
        assert!(matches!(
            PartyConfig::new(0, out_of_range),
            Err(ConfigError::InvalidPartyId { id: 9, parties: 3 })
        ));
        assert!(PartyConfig::new(0, peers(3)).is_ok());
    }
}
