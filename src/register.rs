//! The per-session backend: owns every wire and gate built since the last
//! run and drives their two-phase evaluation.
//!
//! There is no explicit topological sort. Every gate runs as its own task
//! and blocks on the readiness cells of its input wires, which self-orders
//! the DAG including diamonds (one wire read by many gates) and fan-in.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex},
};

use rand_chacha::{ChaCha20Rng, rand_core::SeedableRng};
use tokio::task::JoinSet;
use tracing::debug;

use crate::{
    channel::Router,
    gate::{Gate, Op},
    party::Error,
    wire::{Scheme, Wire},
};

/// Registry of the wires and gates of one circuit run.
#[derive(Default)]
pub(crate) struct Register {
    next_wire: u64,
    next_gate: u64,
    wires: HashMap<u64, Arc<Wire>>,
    gates: Vec<Arc<Gate>>,
}

/// One party's session state: identity, communication, randomness seeds and
/// the register. Created with the party, torn down by `finish`; passed
/// explicitly to every gate evaluation, never global.
pub(crate) struct Backend {
    pub(crate) my_id: usize,
    pub(crate) n_parties: usize,
    pub(crate) online_after_setup: bool,
    pub(crate) router: Arc<Router>,
    /// Pairwise seeds agreed during connection setup, indexed by peer.
    pub(crate) seeds: Vec<Option<[u8; 32]>>,
    pub(crate) reg: Mutex<Register>,
}

impl Backend {
    pub(crate) fn new(
        n_parties: usize,
        online_after_setup: bool,
        router: Arc<Router>,
        seeds: Vec<Option<[u8; 32]>>,
    ) -> Arc<Backend> {
        Arc::new(Backend {
            my_id: router.my_id(),
            n_parties,
            online_after_setup,
            router,
            seeds,
            reg: Mutex::new(Register::default()),
        })
    }

    /// All party ids except our own, in id order.
    pub(crate) fn peers(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.n_parties).filter(move |p| *p != self.my_id)
    }

    /// Registers a fresh wire. Colliding identities are a programming error
    /// and abort the session.
    pub(crate) fn new_wire(&self, scheme: Scheme, simd: usize, plain: bool) -> Arc<Wire> {
        let mut reg = self.reg.lock().expect("register lock poisoned");
        let id = reg.next_wire;
        reg.next_wire += 1;
        let wire = Arc::new(Wire::new(id, scheme, simd, plain));
        if reg.wires.insert(id, wire.clone()).is_some() {
            panic!("wire id {id} registered twice");
        }
        wire
    }

    /// Registers a gate consuming `ins` and exclusively producing `outs`.
    pub(crate) fn new_gate(&self, op: Op, ins: Vec<Arc<Wire>>, outs: Vec<Arc<Wire>>) {
        let mut reg = self.reg.lock().expect("register lock poisoned");
        let id = reg.next_gate;
        reg.next_gate += 1;
        reg.gates.push(Arc::new(Gate::new(id, op, ins, outs)));
    }

    /// The deterministic mask generator shared with `peer`, keyed by gate
    /// id so concurrently evaluating gates draw independent,
    /// order-independent values.
    pub(crate) fn mask_rng(&self, peer: usize, gate: u64) -> ChaCha20Rng {
        let seed = self.seeds[peer]
            .unwrap_or_else(|| panic!("no pairwise seed shared with party {peer}"));
        let mut hasher = blake3::Hasher::new();
        hasher.update(&seed);
        hasher.update(&gate.to_le_bytes());
        ChaCha20Rng::from_seed(*hasher.finalize().as_bytes())
    }

    /// Evaluates every registered gate: the setup phase of all gates, then
    /// the online phase (or both interleaved per gate when
    /// `online_after_setup` is off). Blocks until every gate finished or the
    /// run failed; the registered gates are consumed either way.
    pub(crate) async fn run(self: &Arc<Self>) -> Result<(), Error> {
        let gates: Vec<Arc<Gate>> = {
            let mut reg = self.reg.lock().expect("register lock poisoned");
            std::mem::take(&mut reg.gates)
        };
        debug!(gates = gates.len(), "starting circuit run");
        if self.online_after_setup {
            join_phase(gates.iter().map(|gate| {
                let (gate, be) = (gate.clone(), self.clone());
                async move { gate.evaluate_setup(&be).await }
            }))
            .await?;
            debug!("setup phase complete");
            join_phase(gates.iter().map(|gate| {
                let (gate, be) = (gate.clone(), self.clone());
                async move { gate.evaluate_online(&be).await }
            }))
            .await?;
        } else {
            join_phase(gates.iter().map(|gate| {
                let (gate, be) = (gate.clone(), self.clone());
                async move {
                    gate.evaluate_setup(&be).await?;
                    gate.evaluate_online(&be).await
                }
            }))
            .await?;
        }
        debug!("circuit run complete");
        Ok(())
    }
}

/// Spawns one task per gate and joins them all; the first failure fails the
/// run and aborts the remaining tasks.
async fn join_phase<F>(tasks: impl Iterator<Item = F>) -> Result<(), Error>
where
    F: Future<Output = Result<(), Error>> + Send + 'static,
{
    let mut set = JoinSet::new();
    for task in tasks {
        set.spawn(task);
    }
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(result) => result?,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => unreachable!("gate tasks are not cancelled while joining"),
        }
    }
    Ok(())
}
