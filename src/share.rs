//! Shares: the distributed representation of one secret value, and the
//! operators that build the circuit.
//!
//! A share is an ordered sequence of wires under a single sharing scheme
//! and SIMD width: one wire for an arithmetic value, one wire per bit for a
//! boolean or garbled value (bit 0 is the least significant, everywhere).
//! Operators register new gates with the session's backend and return fresh
//! shares; nothing is evaluated until `run`.
//!
//! Comparison, equality, multiplexing, boolean ring arithmetic and the
//! scheme conversions are not opaque primitives: they are decomposed here,
//! at construction time, into the primitive gate set.

use std::{
    ops::{Add, BitAnd, BitOr, BitXor, Div, Mul, Not, Sub},
    sync::Arc,
};

use crate::{
    gate::Op,
    party::Error,
    register::Backend,
    wire::{Scheme, Value, Wire},
};

/// One secret value, shared across the parties of a session.
///
/// Shares are cheap to clone (the underlying wires are reference-counted
/// and may be read by many gates). Combining shares of different schemes,
/// widths or SIMD widths is a programming error and panics; convert first.
#[derive(Clone)]
pub struct Share {
    be: Arc<Backend>,
    wires: Vec<Arc<Wire>>,
    scheme: Scheme,
    simd: usize,
}

impl Share {
    pub(crate) fn new(be: Arc<Backend>, wires: Vec<Arc<Wire>>, scheme: Scheme, simd: usize) -> Share {
        debug_assert!(wires.iter().all(|w| w.scheme == scheme && w.simd == simd));
        Share {
            be,
            wires,
            scheme,
            simd,
        }
    }

    /// The sharing scheme of this share.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// The number of SIMD lanes batched on each wire.
    pub fn simd(&self) -> usize {
        self.simd
    }

    /// The number of wires: 1 for arithmetic shares, the bit width for
    /// boolean and garbled shares.
    pub fn width(&self) -> usize {
        self.wires.len()
    }

    /// Converts this share to another sharing scheme. Converting to the
    /// same scheme is a no-op aliasing the same wires; every cross-scheme
    /// pairing runs its own sub-protocol, and conversions through the
    /// arithmetic scheme are markedly more expensive than reshares.
    pub fn convert(&self, to: Scheme) -> Share {
        match (self.scheme, to) {
            (from, to) if from == to => self.clone(),
            (Scheme::Bool, Scheme::Garbled) => self.hide(),
            (Scheme::Garbled, Scheme::Bool) => self.expose(),
            (Scheme::Arith, Scheme::Bool) => self.decompose(),
            (Scheme::Bool, Scheme::Arith) => self.compose(),
            (Scheme::Arith, Scheme::Garbled) => self.decompose().hide(),
            (Scheme::Garbled, Scheme::Arith) => self.expose().compose(),
            _ => unreachable!("all scheme pairs handled"),
        }
    }

    /// Marks a reveal point: after `run`, the returned share holds the
    /// cleartext for the designated party (everyone when `None`). The
    /// receiver must match across all parties' circuits. Parties that are
    /// not designated still take part in the reveal protocol but end up
    /// with a hidden output.
    pub fn out(&self, reveal_to: Option<usize>) -> Result<Share, Error> {
        if let Some(party) = reveal_to {
            if party >= self.be.n_parties {
                return Err(crate::party::ConfigError::InvalidPartyId {
                    id: party,
                    parties: self.be.n_parties,
                }
                .into());
            }
        }
        let outs: Vec<Arc<Wire>> = self
            .wires
            .iter()
            .map(|_| self.be.new_wire(self.scheme, self.simd, true))
            .collect();
        self.be
            .new_gate(Op::Output { reveal_to }, self.wires.clone(), outs.clone());
        Ok(Share::new(self.be.clone(), outs, self.scheme, self.simd))
    }

    /// Reads the cleartext lanes of a revealed output share, once `run`
    /// has completed.
    pub fn value(&self) -> Result<Vec<u64>, Error> {
        let mut lanes = vec![0u64; self.simd];
        for (bit, wire) in self.wires.iter().enumerate() {
            if !wire.plain {
                return Err(Error::NotAnOutput);
            }
            match wire.online.get() {
                None => return Err(Error::OutputNotReady),
                Some(Value::Hidden) => return Err(Error::OutputHidden),
                Some(Value::Arith(values)) => lanes = values,
                Some(Value::Bool(bits)) => {
                    for (lane, bit_value) in bits.iter().enumerate() {
                        lanes[lane] |= (*bit_value as u64) << bit;
                    }
                }
                Some(Value::Masked(_)) => unreachable!("output wires hold cleartext"),
            }
        }
        Ok(lanes)
    }

    /// Greater-than comparison of two equal-width shares; returns a
    /// one-bit share. Arithmetic operands are first converted to boolean
    /// sharing, so the result is always of a boolean-structured scheme.
    pub fn gt(&self, other: &Share) -> Share {
        if self.scheme == Scheme::Arith {
            return self
                .convert(Scheme::Bool)
                .gt(&other.convert(Scheme::Bool));
        }
        self.check_compatible(other);
        // a > b is the missing carry of b + !a + 1, i.e. not (b >= a).
        let not_a: Vec<Arc<Wire>> = self.wires.iter().map(|w| self.unary(Op::Not, w)).collect();
        let (_, carry) = self.adder(&other.wires, &not_a, true);
        let gt = self.unary(Op::Not, &carry);
        Share::new(self.be.clone(), vec![gt], self.scheme, self.simd)
    }

    /// Bitwise equality of two equal-width shares; returns a one-bit share.
    pub fn is_equal(&self, other: &Share) -> Share {
        if self.scheme == Scheme::Arith {
            return self
                .convert(Scheme::Bool)
                .is_equal(&other.convert(Scheme::Bool));
        }
        self.check_compatible(other);
        let mut fold: Option<Arc<Wire>> = None;
        for (x, y) in self.wires.iter().zip(&other.wires) {
            let differ = self.binary(Op::Xor, x, y);
            let same = self.unary(Op::Not, &differ);
            fold = Some(match fold {
                None => same,
                Some(acc) => self.binary(Op::And, &acc, &same),
            });
        }
        let eq = fold.expect("shares have at least one wire");
        Share::new(self.be.clone(), vec![eq], self.scheme, self.simd)
    }

    /// Multiplexer: `self` is a one-bit selector choosing `if_true` when
    /// set, `if_false` otherwise. One AND per bit, not a free operation.
    pub fn mux(&self, if_true: &Share, if_false: &Share) -> Share {
        assert_eq!(self.width(), 1, "the selector must be a single bit");
        assert!(
            self.scheme != Scheme::Arith,
            "the selector must be a boolean or garbled share"
        );
        if_true.check_compatible(if_false);
        assert_eq!(
            self.scheme, if_true.scheme,
            "selector and branches must share a scheme"
        );
        let sel = &self.wires[0];
        let wires = if_true
            .wires
            .iter()
            .zip(&if_false.wires)
            .map(|(a, b)| self.mux_bit(sel, a, b))
            .collect();
        Share::new(self.be.clone(), wires, if_true.scheme, if_true.simd)
    }

    // ---- gadgets over single wires ----------------------------------

    fn unary(&self, op: Op, x: &Arc<Wire>) -> Arc<Wire> {
        let out = self.be.new_wire(x.scheme, x.simd, false);
        self.be.new_gate(op, vec![x.clone()], vec![out.clone()]);
        out
    }

    fn binary(&self, op: Op, x: &Arc<Wire>, y: &Arc<Wire>) -> Arc<Wire> {
        debug_assert_eq!(x.scheme, y.scheme);
        debug_assert_eq!(x.simd, y.simd);
        let out = self.be.new_wire(x.scheme, x.simd, false);
        self.be
            .new_gate(op, vec![x.clone(), y.clone()], vec![out.clone()]);
        out
    }

    /// A public constant bit: an input owned by party 0, whose value every
    /// party knows at construction time.
    fn constant_bit(&self, value: bool, simd: usize) -> Arc<Wire> {
        let out = self.be.new_wire(self.scheme, simd, false);
        let values = (self.be.my_id == 0).then(|| vec![value as u64; simd]);
        self.be
            .new_gate(Op::Input { owner: 0, values }, vec![], vec![out.clone()]);
        out
    }

    fn mux_bit(&self, sel: &Arc<Wire>, x: &Arc<Wire>, y: &Arc<Wire>) -> Arc<Wire> {
        let differ = self.binary(Op::Xor, x, y);
        let pick = self.binary(Op::And, sel, &differ);
        self.binary(Op::Xor, &pick, y)
    }

    /// Ripple-carry addition of two equal-width wire runs. Returns the sum
    /// wires and the carry-out; one AND per bit.
    fn adder(
        &self,
        a: &[Arc<Wire>],
        b: &[Arc<Wire>],
        carry_in: bool,
    ) -> (Vec<Arc<Wire>>, Arc<Wire>) {
        debug_assert_eq!(a.len(), b.len());
        let simd = a[0].simd;
        let mut carry = self.constant_bit(carry_in, simd);
        let mut sum = Vec::with_capacity(a.len());
        for (x, y) in a.iter().zip(b) {
            let xc = self.binary(Op::Xor, x, &carry);
            let yc = self.binary(Op::Xor, y, &carry);
            let s = self.binary(Op::Xor, &xc, y);
            let majority = self.binary(Op::And, &xc, &yc);
            sum.push(s);
            carry = self.binary(Op::Xor, &majority, &carry);
        }
        (sum, carry)
    }

    /// Subtraction as addition of the complement with carry-in 1.
    fn subtractor(&self, a: &[Arc<Wire>], b: &[Arc<Wire>]) -> Vec<Arc<Wire>> {
        let not_b: Vec<Arc<Wire>> = b.iter().map(|w| self.unary(Op::Not, w)).collect();
        self.adder(a, &not_b, true).0
    }

    /// Shift-and-add multiplication, truncated to the operand width.
    fn multiplier(&self, a: &[Arc<Wire>], b: &[Arc<Wire>]) -> Vec<Arc<Wire>> {
        let width = a.len();
        let mut acc: Vec<Arc<Wire>> = a.iter().map(|x| self.binary(Op::And, x, &b[0])).collect();
        for shift in 1..width {
            let partial: Vec<Arc<Wire>> = a[..width - shift]
                .iter()
                .map(|x| self.binary(Op::And, x, &b[shift]))
                .collect();
            let (sum, _) = self.adder(&acc[shift..], &partial, false);
            for (offset, wire) in sum.into_iter().enumerate() {
                acc[shift + offset] = wire;
            }
        }
        acc
    }

    /// Restoring long division: shift in one dividend bit at a time,
    /// compare against the divisor, conditionally subtract. A division by
    /// zero yields the all-ones quotient.
    fn divider(&self, a: &[Arc<Wire>], b: &[Arc<Wire>]) -> Vec<Arc<Wire>> {
        let width = a.len();
        let simd = a[0].simd;
        let zero = self.constant_bit(false, simd);
        // The remainder register needs one extra bit for the shifted-in
        // dividend bit before the conditional subtract.
        let mut rem: Vec<Arc<Wire>> = vec![zero.clone(); width + 1];
        let mut not_b_ext: Vec<Arc<Wire>> =
            b.iter().map(|w| self.unary(Op::Not, w)).collect();
        not_b_ext.push(self.unary(Op::Not, &zero));
        let mut quotient: Vec<Option<Arc<Wire>>> = vec![None; width];
        for bit in (0..width).rev() {
            let mut shifted = Vec::with_capacity(width + 1);
            shifted.push(a[bit].clone());
            shifted.extend(rem[..width].iter().cloned());
            let (diff, geq) = self.adder(&shifted, &not_b_ext, true);
            rem = diff
                .iter()
                .zip(&shifted)
                .map(|(d, s)| self.mux_bit(&geq, d, s))
                .collect();
            quotient[bit] = Some(geq);
        }
        quotient
            .into_iter()
            .map(|w| w.expect("every quotient bit is produced"))
            .collect()
    }

    // ---- conversions -------------------------------------------------

    /// Boolean to garbled: per bit, attach a fresh mask and open the
    /// masked value.
    fn hide(&self) -> Share {
        let wires = self
            .wires
            .iter()
            .map(|w| {
                let out = self.be.new_wire(Scheme::Garbled, self.simd, false);
                self.be.new_gate(Op::Hide, vec![w.clone()], vec![out.clone()]);
                out
            })
            .collect();
        Share::new(self.be.clone(), wires, Scheme::Garbled, self.simd)
    }

    /// Garbled to boolean: a local re-share of the mask, free of
    /// communication.
    fn expose(&self) -> Share {
        let wires = self
            .wires
            .iter()
            .map(|w| {
                let out = self.be.new_wire(Scheme::Bool, self.simd, false);
                self.be
                    .new_gate(Op::Expose, vec![w.clone()], vec![out.clone()]);
                out
            })
            .collect();
        Share::new(self.be.clone(), wires, Scheme::Bool, self.simd)
    }

    /// Arithmetic to boolean: every party re-shares the bits of its own
    /// additive share trivially, then an adder tree sums the operands
    /// mod 2^64.
    fn decompose(&self) -> Share {
        const BITS: usize = 64;
        let mut operands: Vec<Vec<Arc<Wire>>> = Vec::with_capacity(self.be.n_parties);
        for owner in 0..self.be.n_parties {
            let outs: Vec<Arc<Wire>> = (0..BITS)
                .map(|_| self.be.new_wire(Scheme::Bool, self.simd, false))
                .collect();
            self.be.new_gate(
                Op::Decompose { owner },
                vec![self.wires[0].clone()],
                outs.clone(),
            );
            operands.push(outs);
        }
        let bool_self = Share::new(
            self.be.clone(),
            operands[0].clone(),
            Scheme::Bool,
            self.simd,
        );
        let mut acc = operands[0].clone();
        for operand in &operands[1..] {
            acc = bool_self.adder(&acc, operand, false).0;
        }
        Share::new(self.be.clone(), acc, Scheme::Bool, self.simd)
    }

    /// Boolean to arithmetic: every party injects its bit shares as
    /// trivial arithmetic shares, XOR is emulated arithmetically
    /// (`x ^ y = x + y - 2xy`, one secure multiplication per fold) and the
    /// bits are recomposed as a weighted sum.
    fn compose(&self) -> Share {
        let mut weighted: Option<Arc<Wire>> = None;
        for (bit, wire) in self.wires.iter().enumerate() {
            let mut folded: Option<Arc<Wire>> = None;
            for owner in 0..self.be.n_parties {
                let injected = {
                    let out = self.be.new_wire(Scheme::Arith, self.simd, false);
                    self.be.new_gate(
                        Op::Inject { owner },
                        vec![wire.clone()],
                        vec![out.clone()],
                    );
                    out
                };
                folded = Some(match folded {
                    None => injected,
                    Some(acc) => {
                        let sum = self.binary(Op::Add, &acc, &injected);
                        let prod = self.binary(Op::Mul, &acc, &injected);
                        let twice = self.unary(Op::Scale(2), &prod);
                        self.binary(Op::Sub, &sum, &twice)
                    }
                });
            }
            let bit_share = folded.expect("sessions have at least one party");
            let term = if bit == 0 {
                bit_share
            } else {
                self.unary(Op::Scale(1u64 << bit), &bit_share)
            };
            weighted = Some(match weighted {
                None => term,
                Some(acc) => self.binary(Op::Add, &acc, &term),
            });
        }
        let wire = weighted.expect("shares have at least one wire");
        Share::new(self.be.clone(), vec![wire], Scheme::Arith, self.simd)
    }

    // ---- checks ------------------------------------------------------

    fn check_compatible(&self, other: &Share) {
        assert!(
            Arc::ptr_eq(&self.be, &other.be),
            "shares belong to different sessions"
        );
        assert_eq!(
            self.scheme, other.scheme,
            "mixed-scheme operands; convert one share first"
        );
        assert_eq!(self.simd, other.simd, "mismatched SIMD widths");
        assert_eq!(self.width(), other.width(), "mismatched share widths");
    }

    fn check_boolean(&self, op: &str) {
        assert!(
            self.scheme != Scheme::Arith,
            "`{op}` needs a boolean or garbled share; convert first"
        );
    }
}

impl Add for &Share {
    type Output = Share;

    fn add(self, rhs: Self) -> Share {
        self.check_compatible(rhs);
        match self.scheme {
            Scheme::Arith => {
                let out = self.binary(Op::Add, &self.wires[0], &rhs.wires[0]);
                Share::new(self.be.clone(), vec![out], self.scheme, self.simd)
            }
            _ => {
                let (sum, _) = self.adder(&self.wires, &rhs.wires, false);
                Share::new(self.be.clone(), sum, self.scheme, self.simd)
            }
        }
    }
}

impl Sub for &Share {
    type Output = Share;

    fn sub(self, rhs: Self) -> Share {
        self.check_compatible(rhs);
        match self.scheme {
            Scheme::Arith => {
                let out = self.binary(Op::Sub, &self.wires[0], &rhs.wires[0]);
                Share::new(self.be.clone(), vec![out], self.scheme, self.simd)
            }
            _ => {
                let diff = self.subtractor(&self.wires, &rhs.wires);
                Share::new(self.be.clone(), diff, self.scheme, self.simd)
            }
        }
    }
}

impl Mul for &Share {
    type Output = Share;

    fn mul(self, rhs: Self) -> Share {
        self.check_compatible(rhs);
        match self.scheme {
            Scheme::Arith => {
                let out = self.binary(Op::Mul, &self.wires[0], &rhs.wires[0]);
                Share::new(self.be.clone(), vec![out], self.scheme, self.simd)
            }
            _ => {
                let product = self.multiplier(&self.wires, &rhs.wires);
                Share::new(self.be.clone(), product, self.scheme, self.simd)
            }
        }
    }
}

impl Div for &Share {
    type Output = Share;

    fn div(self, rhs: Self) -> Share {
        self.check_compatible(rhs);
        assert!(
            self.scheme != Scheme::Arith,
            "division runs as a boolean circuit; convert both operands first"
        );
        let quotient = self.divider(&self.wires, &rhs.wires);
        Share::new(self.be.clone(), quotient, self.scheme, self.simd)
    }
}

impl BitXor for &Share {
    type Output = Share;

    fn bitxor(self, rhs: Self) -> Share {
        self.check_compatible(rhs);
        self.check_boolean("^");
        let wires = self
            .wires
            .iter()
            .zip(&rhs.wires)
            .map(|(x, y)| self.binary(Op::Xor, x, y))
            .collect();
        Share::new(self.be.clone(), wires, self.scheme, self.simd)
    }
}

impl BitAnd for &Share {
    type Output = Share;

    fn bitand(self, rhs: Self) -> Share {
        self.check_compatible(rhs);
        self.check_boolean("&");
        let wires = self
            .wires
            .iter()
            .zip(&rhs.wires)
            .map(|(x, y)| self.binary(Op::And, x, y))
            .collect();
        Share::new(self.be.clone(), wires, self.scheme, self.simd)
    }
}

impl BitOr for &Share {
    type Output = Share;

    fn bitor(self, rhs: Self) -> Share {
        self.check_compatible(rhs);
        self.check_boolean("|");
        // x | y = x ^ y ^ (x & y)
        let wires = self
            .wires
            .iter()
            .zip(&rhs.wires)
            .map(|(x, y)| {
                let both = self.binary(Op::And, x, y);
                let either = self.binary(Op::Xor, x, y);
                self.binary(Op::Xor, &either, &both)
            })
            .collect();
        Share::new(self.be.clone(), wires, self.scheme, self.simd)
    }
}

impl Not for &Share {
    type Output = Share;

    fn not(self) -> Share {
        self.check_boolean("~");
        let wires = self.wires.iter().map(|w| self.unary(Op::Not, w)).collect();
        Share::new(self.be.clone(), wires, self.scheme, self.simd)
    }
}
