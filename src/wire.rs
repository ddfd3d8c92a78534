//! Wires: the unit of data flow between gates.
//!
//! A wire carries one logical shared value, batched over a number of SIMD
//! lanes. Readiness is tracked separately for the setup and the online phase
//! via write-once cells: the producing gate fulfills a cell exactly once,
//! waking every consumer blocked on it, and the stored buffer is frozen from
//! that point on.

use tokio::sync::watch;

/// The sharing scheme under which a wire's value is secret-shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Additive sharing over `Z_2^64`, one `u64` per SIMD lane.
    Arith,
    /// XOR sharing, one bit per SIMD lane per wire.
    Bool,
    /// Masked-wire sharing: a secret XOR-shared mask fixed during setup and
    /// a public masked value that becomes known during the online phase.
    Garbled,
}

/// The evaluation phase a message or readiness flag belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Phase {
    /// Input-independent precomputation.
    Setup,
    /// Input-dependent computation and reveal.
    Online,
}

impl Phase {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            Phase::Setup => 0,
            Phase::Online => 1,
        }
    }

    pub(crate) fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Phase::Setup),
            1 => Some(Phase::Online),
            _ => None,
        }
    }
}

/// The per-party buffer a wire carries once it is online-ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Value {
    /// This party's additive share, or the cleartext of a revealed
    /// arithmetic output.
    Arith(Vec<u64>),
    /// This party's XOR share, or the cleartext bit of a revealed
    /// boolean/garbled output.
    Bool(Vec<bool>),
    /// The public masked value of a garbled wire, identical at all parties.
    Masked(Vec<bool>),
    /// An output wire whose reveal was addressed to a different party: the
    /// protocol ran, the result is deliberately absent here.
    Hidden,
}

/// Setup-phase material attached to a wire.
#[derive(Debug, Clone)]
pub(crate) enum Setup {
    /// No precomputed material, the wire is merely setup-ready.
    Done,
    /// This party's XOR share of a garbled wire's mask. `full` carries the
    /// reconstructed mask and is only present on the input owner.
    Mask {
        share: Vec<bool>,
        full: Option<Vec<bool>>,
    },
}

impl Setup {
    /// The mask share of a garbled wire; panics on a non-garbled wire's
    /// setup cell, which is a bug in gate construction.
    pub(crate) fn mask_share(&self) -> &[bool] {
        match self {
            Setup::Mask { share, .. } => share,
            Setup::Done => panic!("wire carries no mask share"),
        }
    }
}

/// A write-once cell combined with a wakeup for all waiting consumers.
///
/// The producing gate is the sole writer; fulfilling twice is a programming
/// error and aborts. Consumers receive a clone of the stored buffer, so the
/// original stays immutable for the rest of the run.
#[derive(Debug)]
pub(crate) struct Cell<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T: Clone> Cell<T> {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Cell { tx }
    }

    /// Stores the value and wakes all waiters. Panics if already fulfilled.
    pub(crate) fn fulfill(&self, value: T) {
        self.tx.send_modify(|slot| {
            if slot.is_some() {
                panic!("wire cell fulfilled twice");
            }
            *slot = Some(value);
        });
    }

    /// Blocks the calling task until the producing gate has fulfilled the
    /// cell, then returns a clone of the buffer.
    pub(crate) async fn wait(&self) -> T {
        let mut rx = self.tx.subscribe();
        let guard = rx
            .wait_for(|slot| slot.is_some())
            .await
            .expect("cell sender lives as long as the wire");
        guard.as_ref().expect("checked is_some").clone()
    }

    /// Returns the buffer if fulfilled, without blocking.
    pub(crate) fn get(&self) -> Option<T> {
        self.tx.borrow().clone()
    }
}

/// A single wire: one logical shared value across `simd` parallel lanes.
///
/// The scheme tag never changes after construction. Gates hold wires via
/// `Arc`: the producing gate owns the exclusive right to fulfill the two
/// phase cells, consuming gates only ever wait and read.
#[derive(Debug)]
pub(crate) struct Wire {
    pub(crate) id: u64,
    pub(crate) scheme: Scheme,
    pub(crate) simd: usize,
    /// Set for output wires: the online buffer holds cleartext and may be
    /// read back through the public API.
    pub(crate) plain: bool,
    pub(crate) setup: Cell<Setup>,
    pub(crate) online: Cell<Value>,
}

impl Wire {
    /// Ids are handed out by the session's register, never globally.
    pub(crate) fn new(id: u64, scheme: Scheme, simd: usize, plain: bool) -> Self {
        Wire {
            id,
            scheme,
            simd,
            plain,
            setup: Cell::new(),
            online: Cell::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cell_wakes_waiters_and_freezes() {
        let cell = std::sync::Arc::new(Cell::<Value>::new());
        let waiter = {
            let cell = cell.clone();
            tokio::spawn(async move { cell.wait().await })
        };
        cell.fulfill(Value::Arith(vec![42]));
        assert_eq!(waiter.await.unwrap(), Value::Arith(vec![42]));
        assert_eq!(cell.get(), Some(Value::Arith(vec![42])));
    }

    #[tokio::test]
    #[should_panic(expected = "fulfilled twice")]
    async fn double_fulfill_panics() {
        let cell = Cell::<Value>::new();
        cell.fulfill(Value::Hidden);
        cell.fulfill(Value::Hidden);
    }
}
