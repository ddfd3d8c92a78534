//! Gates: one operation of the circuit DAG and its two-phase evaluation.
//!
//! A gate reads its input wires (shared, read-only) and exclusively
//! produces its output wires. `evaluate_setup` runs the input-independent
//! part (readiness propagation, triple consumption, mask sampling),
//! `evaluate_online` the input-dependent part. Both begin by awaiting the
//! corresponding readiness cell of every input wire and end by fulfilling
//! the cells of every output wire, so a gate evaluates exactly once per run
//! and never before its dependencies.
//!
//! Dispatch is an exhaustive match over the closed [`Op`] type and the
//! wires' sharing scheme; adding a gate kind is a compile-checked change.

use std::sync::{Arc, OnceLock};

use rand::Rng;

use crate::{
    channel::{Error as ChannelError, MsgTag},
    dealer::{self, BitTriple, Triple},
    party::Error,
    register::Backend,
    wire::{Phase, Scheme, Setup, Value, Wire},
};

/// The closed set of primitive operations. Compound operations (compare,
/// mux, boolean ring arithmetic, conversions) are decomposed into these at
/// circuit-construction time.
#[derive(Debug, Clone)]
pub(crate) enum Op {
    /// Creates the sharing of one party's input value.
    Input {
        /// The party contributing the value.
        owner: usize,
        /// The cleartext lanes; present only on the owner.
        values: Option<Vec<u64>>,
    },
    /// Reveals a share to the designated party, or to everyone.
    Output {
        /// Receiver of the cleartext; `None` reveals to all parties.
        reveal_to: Option<usize>,
    },
    /// Lanewise wrapping addition of two arithmetic shares.
    Add,
    /// Lanewise wrapping subtraction.
    Sub,
    /// Lanewise wrapping multiplication by a public constant.
    Scale(u64),
    /// Secure multiplication, consuming one arithmetic triple.
    Mul,
    /// XOR of two boolean or garbled wires.
    Xor,
    /// Complement of a boolean or garbled wire.
    Not,
    /// Secure AND, consuming one bit triple.
    And,
    /// Re-shares `owner`'s boolean bit share as a trivial arithmetic share.
    Inject {
        /// The party whose local share is injected.
        owner: usize,
    },
    /// Re-shares the bits of `owner`'s arithmetic share as trivial boolean
    /// shares, least significant bit first.
    Decompose {
        /// The party whose local share is decomposed.
        owner: usize,
    },
    /// Boolean to garbled: attaches a fresh mask and opens the masked value.
    Hide,
    /// Garbled to boolean: locally re-shares the mask.
    Expose,
}

/// Material produced by a gate's setup phase for its own online phase.
#[derive(Debug)]
enum Stash {
    /// Arithmetic input: the pairwise masks (summed on the owner).
    Masks(Vec<u64>),
    /// Secure multiplication: this party's triple shares.
    Triple(Triple),
    /// Boolean AND: this party's bit-triple shares.
    BitTriple(BitTriple),
    /// Garbled AND: XOR share of the product of the input masks.
    MaskProd(Vec<bool>),
}

/// A single node of the circuit DAG.
#[derive(Debug)]
pub(crate) struct Gate {
    pub(crate) id: u64,
    pub(crate) op: Op,
    pub(crate) ins: Vec<Arc<Wire>>,
    pub(crate) outs: Vec<Arc<Wire>>,
    stash: OnceLock<Stash>,
}

impl Gate {
    pub(crate) fn new(id: u64, op: Op, ins: Vec<Arc<Wire>>, outs: Vec<Arc<Wire>>) -> Gate {
        Gate {
            id,
            op,
            ins,
            outs,
            stash: OnceLock::new(),
        }
    }

    fn simd(&self) -> usize {
        self.outs
            .first()
            .or_else(|| self.ins.first())
            .expect("gates have at least one wire")
            .simd
    }

    fn stash(&self, stash: Stash) {
        self.stash
            .set(stash)
            .expect("setup evaluates exactly once");
    }

    fn stashed(&self) -> &Stash {
        self.stash.get().expect("online runs after setup")
    }

    /// Input-independent precomputation. Awaits every input wire's setup
    /// readiness, then fulfills every output wire's setup cell.
    pub(crate) async fn evaluate_setup(&self, be: &Backend) -> Result<(), Error> {
        for wire in &self.ins {
            wire.setup.wait().await;
        }
        let simd = self.simd();
        match &self.op {
            Op::Input { owner, .. } => match self.outs[0].scheme {
                Scheme::Arith => {
                    // Masks come from the pairwise generators shared with
                    // the owner, so no round trip is needed.
                    if be.my_id == *owner {
                        let mut total = vec![0u64; simd];
                        for peer in be.peers() {
                            let mut rng = be.mask_rng(peer, self.id);
                            for lane in total.iter_mut() {
                                *lane = lane.wrapping_add(rng.random::<u64>());
                            }
                        }
                        self.stash(Stash::Masks(total));
                    } else {
                        let mut rng = be.mask_rng(*owner, self.id);
                        let mask: Vec<u64> = (0..simd).map(|_| rng.random()).collect();
                        self.stash(Stash::Masks(mask));
                    }
                    self.outs[0].setup.fulfill(Setup::Done);
                }
                Scheme::Bool => {
                    // The owner's share is the value itself, everyone
                    // else's share is deterministically zero.
                    for out in &self.outs {
                        out.setup.fulfill(Setup::Done);
                    }
                }
                Scheme::Garbled => self.setup_garbled_input(be, *owner, simd).await?,
            },
            Op::Hide => {
                let mut rng = rand::rng();
                let share: Vec<bool> = (0..simd).map(|_| rng.random()).collect();
                self.outs[0].setup.fulfill(Setup::Mask { share, full: None });
            }
            Op::Xor if self.outs[0].scheme == Scheme::Garbled => {
                let x = self.ins[0].setup.wait().await;
                let y = self.ins[1].setup.wait().await;
                let share = xor_bits(x.mask_share(), y.mask_share());
                self.outs[0].setup.fulfill(Setup::Mask { share, full: None });
            }
            Op::Not if self.outs[0].scheme == Scheme::Garbled => {
                // Complement flips the public value; the mask is unchanged.
                let x = self.ins[0].setup.wait().await;
                let share = x.mask_share().to_vec();
                self.outs[0].setup.fulfill(Setup::Mask { share, full: None });
            }
            Op::And if self.outs[0].scheme == Scheme::Garbled => {
                self.setup_garbled_and(be, simd).await?;
            }
            Op::Mul => {
                let triple = dealer::arith_triple(be, self.id, simd).await?;
                self.stash(Stash::Triple(triple));
                self.outs[0].setup.fulfill(Setup::Done);
            }
            Op::And => {
                let triple = dealer::bit_triple(be, self.id, simd).await?;
                self.stash(Stash::BitTriple(triple));
                self.outs[0].setup.fulfill(Setup::Done);
            }
            // Everything else is readiness propagation only.
            Op::Output { .. }
            | Op::Add
            | Op::Sub
            | Op::Scale(_)
            | Op::Xor
            | Op::Not
            | Op::Inject { .. }
            | Op::Decompose { .. }
            | Op::Expose => {
                for out in &self.outs {
                    out.setup.fulfill(Setup::Done);
                }
            }
        }
        Ok(())
    }

    /// Input-dependent evaluation. Awaits every input wire's online
    /// readiness, then fulfills every output wire's online cell.
    pub(crate) async fn evaluate_online(&self, be: &Backend) -> Result<(), Error> {
        let mut inputs = Vec::with_capacity(self.ins.len());
        for wire in &self.ins {
            inputs.push(wire.online.wait().await);
        }
        let simd = self.simd();
        match &self.op {
            Op::Input { owner, values } => match self.outs[0].scheme {
                Scheme::Arith => {
                    let Stash::Masks(masks) = self.stashed() else {
                        panic!("arithmetic input without masks");
                    };
                    let share = if be.my_id == *owner {
                        let values = values.as_ref().expect("input owner carries values");
                        values
                            .iter()
                            .zip(masks)
                            .map(|(v, m)| v.wrapping_sub(*m))
                            .collect()
                    } else {
                        masks.clone()
                    };
                    self.outs[0].online.fulfill(Value::Arith(share));
                }
                Scheme::Bool => {
                    for (bit, out) in self.outs.iter().enumerate() {
                        let share = if be.my_id == *owner {
                            let values = values.as_ref().expect("input owner carries values");
                            values.iter().map(|v| (v >> bit) & 1 == 1).collect()
                        } else {
                            vec![false; simd]
                        };
                        out.online.fulfill(Value::Bool(share));
                    }
                }
                Scheme::Garbled => {
                    self.online_garbled_input(be, *owner, values.as_deref(), simd)
                        .await?;
                }
            },
            Op::Output { reveal_to } => self.online_output(be, *reveal_to, inputs).await?,
            Op::Add => {
                let (x, y) = (as_arith(&inputs[0]), as_arith(&inputs[1]));
                let z = x
                    .iter()
                    .zip(y)
                    .map(|(x, y)| x.wrapping_add(*y))
                    .collect();
                self.outs[0].online.fulfill(Value::Arith(z));
            }
            Op::Sub => {
                let (x, y) = (as_arith(&inputs[0]), as_arith(&inputs[1]));
                let z = x
                    .iter()
                    .zip(y)
                    .map(|(x, y)| x.wrapping_sub(*y))
                    .collect();
                self.outs[0].online.fulfill(Value::Arith(z));
            }
            Op::Scale(factor) => {
                let x = as_arith(&inputs[0]);
                let z = x.iter().map(|x| x.wrapping_mul(*factor)).collect();
                self.outs[0].online.fulfill(Value::Arith(z));
            }
            Op::Mul => {
                let z = self.online_mul(be, &inputs).await?;
                self.outs[0].online.fulfill(Value::Arith(z));
            }
            Op::Xor => match self.outs[0].scheme {
                Scheme::Garbled => {
                    let (x, y) = (as_masked(&inputs[0]), as_masked(&inputs[1]));
                    self.outs[0].online.fulfill(Value::Masked(xor_bits(x, y)));
                }
                _ => {
                    let (x, y) = (as_bool(&inputs[0]), as_bool(&inputs[1]));
                    self.outs[0].online.fulfill(Value::Bool(xor_bits(x, y)));
                }
            },
            Op::Not => match self.outs[0].scheme {
                Scheme::Garbled => {
                    let x = as_masked(&inputs[0]);
                    let z = x.iter().map(|x| !x).collect();
                    self.outs[0].online.fulfill(Value::Masked(z));
                }
                _ => {
                    // A single party flips its share, which flips the XOR
                    // reconstruction.
                    let x = as_bool(&inputs[0]);
                    let z = if be.my_id == 0 {
                        x.iter().map(|x| !x).collect()
                    } else {
                        x.clone()
                    };
                    self.outs[0].online.fulfill(Value::Bool(z));
                }
            },
            Op::And => match self.outs[0].scheme {
                Scheme::Garbled => {
                    let z = self.online_garbled_and(be, &inputs).await?;
                    self.outs[0].online.fulfill(Value::Masked(z));
                }
                _ => {
                    let z = self.online_and(be, &inputs).await?;
                    self.outs[0].online.fulfill(Value::Bool(z));
                }
            },
            Op::Inject { owner } => {
                let x = as_bool(&inputs[0]);
                let z = if be.my_id == *owner {
                    x.iter().map(|b| *b as u64).collect()
                } else {
                    vec![0u64; simd]
                };
                self.outs[0].online.fulfill(Value::Arith(z));
            }
            Op::Decompose { owner } => {
                let x = as_arith(&inputs[0]);
                for (bit, out) in self.outs.iter().enumerate() {
                    let share = if be.my_id == *owner {
                        x.iter().map(|v| (v >> bit) & 1 == 1).collect()
                    } else {
                        vec![false; simd]
                    };
                    out.online.fulfill(Value::Bool(share));
                }
            }
            Op::Hide => {
                let x = as_bool(&inputs[0]);
                let mask = self.outs[0].setup.wait().await;
                let own = xor_bits(x, mask.mask_share());
                let masked = self.open_xor(be, Phase::Online, own).await?;
                self.outs[0].online.fulfill(Value::Masked(masked));
            }
            Op::Expose => {
                let masked = as_masked(&inputs[0]);
                let mask = self.ins[0].setup.wait().await;
                let mut share = mask.mask_share().to_vec();
                if be.my_id == 0 {
                    share = xor_bits(&share, masked);
                }
                self.outs[0].online.fulfill(Value::Bool(share));
            }
        }
        Ok(())
    }

    /// Garbled input, setup: everyone samples a mask share and sends it to
    /// the owner, who reconstructs the full mask.
    async fn setup_garbled_input(
        &self,
        be: &Backend,
        owner: usize,
        simd: usize,
    ) -> Result<(), Error> {
        let mine: Vec<Vec<bool>> = {
            let mut rng = rand::rng();
            self.outs
                .iter()
                .map(|_| (0..simd).map(|_| rng.random()).collect())
                .collect()
        };
        if be.my_id != owner {
            be.router
                .send_to(owner, MsgTag::InputShare, Phase::Setup, self.id, &mine)
                .await?;
            for (share, out) in mine.into_iter().zip(&self.outs) {
                out.setup.fulfill(Setup::Mask { share, full: None });
            }
        } else {
            let mut full = mine.clone();
            for peer in be.peers() {
                let theirs: Vec<Vec<bool>> = be
                    .router
                    .recv_vec_from(peer, MsgTag::InputShare, Phase::Setup, self.id, self.outs.len())
                    .await?;
                for (full, theirs) in full.iter_mut().zip(&theirs) {
                    check_lanes(peer, simd, theirs)?;
                    *full = xor_bits(full, theirs);
                }
            }
            for ((share, full), out) in mine.into_iter().zip(full).zip(&self.outs) {
                out.setup.fulfill(Setup::Mask {
                    share,
                    full: Some(full),
                });
            }
        }
        Ok(())
    }

    /// Garbled input, online: the owner publishes the masked value.
    async fn online_garbled_input(
        &self,
        be: &Backend,
        owner: usize,
        values: Option<&[u64]>,
        simd: usize,
    ) -> Result<(), Error> {
        if be.my_id == owner {
            let values = values.expect("input owner carries values");
            let mut masked = Vec::with_capacity(self.outs.len());
            for (bit, out) in self.outs.iter().enumerate() {
                let Setup::Mask {
                    full: Some(mask), ..
                } = out.setup.wait().await
                else {
                    panic!("garbled input owner reconstructs the full mask");
                };
                let lanes: Vec<bool> = values
                    .iter()
                    .zip(&mask)
                    .map(|(v, m)| ((v >> bit) & 1 == 1) ^ m)
                    .collect();
                masked.push(lanes);
            }
            for peer in be.peers() {
                be.router
                    .send_to(peer, MsgTag::Opening, Phase::Online, self.id, &masked)
                    .await?;
            }
            for (lanes, out) in masked.into_iter().zip(&self.outs) {
                out.online.fulfill(Value::Masked(lanes));
            }
        } else {
            let masked: Vec<Vec<bool>> = be
                .router
                .recv_vec_from(owner, MsgTag::Opening, Phase::Online, self.id, self.outs.len())
                .await?;
            for (lanes, out) in masked.into_iter().zip(&self.outs) {
                check_lanes(owner, simd, &lanes)?;
                out.online.fulfill(Value::Masked(lanes));
            }
        }
        Ok(())
    }

    /// Garbled AND, setup: a secure bit multiplication of the two input
    /// masks, plus a fresh mask for the output wire.
    async fn setup_garbled_and(&self, be: &Backend, simd: usize) -> Result<(), Error> {
        let triple = dealer::bit_triple(be, self.id, simd).await?;
        let x = self.ins[0].setup.wait().await;
        let y = self.ins[1].setup.wait().await;
        let (lx, ly) = (x.mask_share(), y.mask_share());
        let d_own = xor_bits(lx, &triple.a);
        let e_own = xor_bits(ly, &triple.b);
        let (d, e) = self
            .open_bit_pair(be, Phase::Setup, d_own, e_own)
            .await?;
        let mut prod: Vec<bool> = (0..simd)
            .map(|l| triple.c[l] ^ (d[l] & triple.b[l]) ^ (e[l] & triple.a[l]))
            .collect();
        if be.my_id == 0 {
            for lane in 0..simd {
                prod[lane] ^= d[lane] & e[lane];
            }
        }
        self.stash(Stash::MaskProd(prod));
        let mut rng = rand::rng();
        let share: Vec<bool> = (0..simd).map(|_| rng.random()).collect();
        self.outs[0].setup.fulfill(Setup::Mask { share, full: None });
        Ok(())
    }

    /// Garbled AND, online: one broadcast reconstructs the public masked
    /// value of the output wire.
    async fn online_garbled_and(&self, be: &Backend, inputs: &[Value]) -> Result<Vec<bool>, Error> {
        let (mx, my) = (as_masked(&inputs[0]), as_masked(&inputs[1]));
        let lx = self.ins[0].setup.wait().await;
        let ly = self.ins[1].setup.wait().await;
        let lz = self.outs[0].setup.wait().await;
        let Stash::MaskProd(prod) = self.stashed() else {
            panic!("garbled AND without mask product");
        };
        let simd = self.simd();
        let mut own: Vec<bool> = (0..simd)
            .map(|l| {
                prod[l]
                    ^ (mx[l] & ly.mask_share()[l])
                    ^ (my[l] & lx.mask_share()[l])
                    ^ lz.mask_share()[l]
            })
            .collect();
        if be.my_id == 0 {
            for lane in 0..simd {
                own[lane] ^= mx[lane] & my[lane];
            }
        }
        self.open_xor(be, Phase::Online, own).await
    }

    /// Beaver multiplication online step.
    async fn online_mul(&self, be: &Backend, inputs: &[Value]) -> Result<Vec<u64>, Error> {
        let (x, y) = (as_arith(&inputs[0]), as_arith(&inputs[1]));
        let Stash::Triple(triple) = self.stashed() else {
            panic!("multiplication without a triple");
        };
        let simd = self.simd();
        let d_own: Vec<u64> = (0..simd).map(|l| x[l].wrapping_sub(triple.a[l])).collect();
        let e_own: Vec<u64> = (0..simd).map(|l| y[l].wrapping_sub(triple.b[l])).collect();
        for peer in be.peers() {
            be.router
                .send_to(
                    peer,
                    MsgTag::Opening,
                    Phase::Online,
                    self.id,
                    &(&d_own, &e_own),
                )
                .await?;
        }
        let (mut d, mut e) = (d_own, e_own);
        for peer in be.peers() {
            let (dp, ep): (Vec<u64>, Vec<u64>) = be
                .router
                .recv_from(peer, MsgTag::Opening, Phase::Online, self.id)
                .await?;
            check_u64_lanes(peer, simd, &dp)?;
            check_u64_lanes(peer, simd, &ep)?;
            for lane in 0..simd {
                d[lane] = d[lane].wrapping_add(dp[lane]);
                e[lane] = e[lane].wrapping_add(ep[lane]);
            }
        }
        let mut z: Vec<u64> = (0..simd)
            .map(|l| {
                triple.c[l]
                    .wrapping_add(d[l].wrapping_mul(triple.b[l]))
                    .wrapping_add(e[l].wrapping_mul(triple.a[l]))
            })
            .collect();
        if be.my_id == 0 {
            for lane in 0..simd {
                z[lane] = z[lane].wrapping_add(d[lane].wrapping_mul(e[lane]));
            }
        }
        Ok(z)
    }

    /// Beaver AND online step, the bit analogue of [`Gate::online_mul`].
    async fn online_and(&self, be: &Backend, inputs: &[Value]) -> Result<Vec<bool>, Error> {
        let (x, y) = (as_bool(&inputs[0]), as_bool(&inputs[1]));
        let Stash::BitTriple(triple) = self.stashed() else {
            panic!("AND without a triple");
        };
        let simd = self.simd();
        let d_own = xor_bits(x, &triple.a);
        let e_own = xor_bits(y, &triple.b);
        let (d, e) = self
            .open_bit_pair(be, Phase::Online, d_own, e_own)
            .await?;
        let mut z: Vec<bool> = (0..simd)
            .map(|l| triple.c[l] ^ (d[l] & triple.b[l]) ^ (e[l] & triple.a[l]))
            .collect();
        if be.my_id == 0 {
            for lane in 0..simd {
                z[lane] ^= d[lane] & e[lane];
            }
        }
        Ok(z)
    }

    /// Reveals a share to its designated receivers and reconstructs there.
    async fn online_output(
        &self,
        be: &Backend,
        reveal_to: Option<usize>,
        inputs: Vec<Value>,
    ) -> Result<(), Error> {
        let scheme = self.ins[0].scheme;
        let receive = reveal_to.is_none() || reveal_to == Some(be.my_id);
        let recipients: Vec<usize> = match reveal_to {
            Some(party) => vec![party],
            None => (0..be.n_parties).collect(),
        };

        match scheme {
            Scheme::Arith => {
                let own = as_arith(&inputs[0]).clone();
                for peer in recipients.iter().filter(|p| **p != be.my_id) {
                    be.router
                        .send_to(*peer, MsgTag::OutputReveal, Phase::Online, self.id, &own)
                        .await?;
                }
                if receive {
                    let mut clear = own;
                    for peer in be.peers() {
                        let share: Vec<u64> = be
                            .router
                            .recv_vec_from(
                                peer,
                                MsgTag::OutputReveal,
                                Phase::Online,
                                self.id,
                                clear.len(),
                            )
                            .await?;
                        for lane in 0..clear.len() {
                            clear[lane] = clear[lane].wrapping_add(share[lane]);
                        }
                    }
                    self.outs[0].online.fulfill(Value::Arith(clear));
                } else {
                    self.outs[0].online.fulfill(Value::Hidden);
                }
            }
            Scheme::Bool => {
                let own: Vec<Vec<bool>> = inputs.iter().map(|v| as_bool(v).clone()).collect();
                self.reveal_bits(be, &recipients, receive, own, |_, clear| Value::Bool(clear))
                    .await?;
            }
            Scheme::Garbled => {
                // The mask shares are revealed; the receiver combines them
                // with the public masked values it already holds.
                let mut own = Vec::with_capacity(self.ins.len());
                for wire in &self.ins {
                    own.push(wire.setup.wait().await.mask_share().to_vec());
                }
                let masked: Vec<Vec<bool>> =
                    inputs.iter().map(|v| as_masked(v).clone()).collect();
                self.reveal_bits(be, &recipients, receive, own, move |wire, mask| {
                    Value::Bool(xor_bits(&masked[wire], &mask))
                })
                .await?;
            }
        }
        Ok(())
    }

    /// Shared reveal path for bit-carrying wires: sends this party's
    /// contribution per wire, XOR-reconstructs on the receivers and maps
    /// each wire's cleartext through `finish`.
    async fn reveal_bits(
        &self,
        be: &Backend,
        recipients: &[usize],
        receive: bool,
        own: Vec<Vec<bool>>,
        finish: impl Fn(usize, Vec<bool>) -> Value,
    ) -> Result<(), Error> {
        for peer in recipients.iter().filter(|p| **p != be.my_id) {
            be.router
                .send_to(*peer, MsgTag::OutputReveal, Phase::Online, self.id, &own)
                .await?;
        }
        if receive {
            let mut clear = own;
            for peer in be.peers() {
                let shares: Vec<Vec<bool>> = be
                    .router
                    .recv_vec_from(
                        peer,
                        MsgTag::OutputReveal,
                        Phase::Online,
                        self.id,
                        clear.len(),
                    )
                    .await?;
                for (clear, share) in clear.iter_mut().zip(&shares) {
                    check_lanes(peer, clear.len(), share)?;
                    *clear = xor_bits(clear, share);
                }
            }
            for (wire, (lanes, out)) in clear.into_iter().zip(&self.outs).enumerate() {
                out.online.fulfill(finish(wire, lanes));
            }
        } else {
            for out in &self.outs {
                out.online.fulfill(Value::Hidden);
            }
        }
        Ok(())
    }

    /// Broadcasts this party's XOR contribution and reconstructs the total.
    async fn open_xor(
        &self,
        be: &Backend,
        phase: Phase,
        own: Vec<bool>,
    ) -> Result<Vec<bool>, Error> {
        for peer in be.peers() {
            be.router
                .send_to(peer, MsgTag::Opening, phase, self.id, &own)
                .await?;
        }
        let mut total = own;
        for peer in be.peers() {
            let share: Vec<bool> = be
                .router
                .recv_vec_from(peer, MsgTag::Opening, phase, self.id, total.len())
                .await?;
            total = xor_bits(&total, &share);
        }
        Ok(total)
    }

    /// Opens a `(d, e)` bit pair as used by the triple-based operations.
    async fn open_bit_pair(
        &self,
        be: &Backend,
        phase: Phase,
        d_own: Vec<bool>,
        e_own: Vec<bool>,
    ) -> Result<(Vec<bool>, Vec<bool>), Error> {
        let simd = d_own.len();
        for peer in be.peers() {
            be.router
                .send_to(peer, MsgTag::Opening, phase, self.id, &(&d_own, &e_own))
                .await?;
        }
        let (mut d, mut e) = (d_own, e_own);
        for peer in be.peers() {
            let (dp, ep): (Vec<bool>, Vec<bool>) = be
                .router
                .recv_from(peer, MsgTag::Opening, phase, self.id)
                .await?;
            check_lanes(peer, simd, &dp)?;
            check_lanes(peer, simd, &ep)?;
            d = xor_bits(&d, &dp);
            e = xor_bits(&e, &ep);
        }
        Ok((d, e))
    }
}

fn xor_bits(a: &[bool], b: &[bool]) -> Vec<bool> {
    a.iter().zip(b).map(|(a, b)| a ^ b).collect()
}

fn as_arith(value: &Value) -> &Vec<u64> {
    match value {
        Value::Arith(lanes) => lanes,
        _ => panic!("expected an arithmetic share"),
    }
}

fn as_bool(value: &Value) -> &Vec<bool> {
    match value {
        Value::Bool(lanes) => lanes,
        _ => panic!("expected a boolean share"),
    }
}

fn as_masked(value: &Value) -> &Vec<bool> {
    match value {
        Value::Masked(lanes) => lanes,
        _ => panic!("expected a masked garbled value"),
    }
}

fn check_lanes(peer: usize, simd: usize, lanes: &[bool]) -> Result<(), Error> {
    if lanes.len() != simd {
        return Err(Error::Channel(ChannelError::InvalidLength {
            peer,
            actual: lanes.len(),
            expected: simd,
        }));
    }
    Ok(())
}

fn check_u64_lanes(peer: usize, simd: usize, lanes: &[u64]) -> Result<(), Error> {
    if lanes.len() != simd {
        return Err(Error::Channel(ChannelError::InvalidLength {
            peer,
            actual: lanes.len(),
            expected: simd,
        }));
    }
    Ok(())
}
