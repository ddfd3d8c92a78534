//! Multiplication triples from a (semi-)trusted dealer.
//!
//! Party 0 doubles as the dealer: for every gate that consumes correlated
//! randomness it samples a triple `(a, b, c)` with `c = a * b` per SIMD
//! lane, splits each component into additive (respectively XOR) shares and
//! distributes one share per party during that gate's setup phase. Swapping
//! in an OT-based provider replaces this module only.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    channel::MsgTag,
    party::Error,
    register::Backend,
    wire::Phase,
};

/// The party acting as the correlated-randomness dealer.
pub(crate) const DEALER: usize = 0;

/// One party's additive shares of an arithmetic triple, one element per
/// SIMD lane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Triple {
    pub(crate) a: Vec<u64>,
    pub(crate) b: Vec<u64>,
    pub(crate) c: Vec<u64>,
}

/// One party's XOR shares of a bit triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct BitTriple {
    pub(crate) a: Vec<bool>,
    pub(crate) b: Vec<bool>,
    pub(crate) c: Vec<bool>,
}

/// Obtains this party's share of an arithmetic triple for `gate`: the
/// dealer samples, splits and distributes; everyone else receives.
pub(crate) async fn arith_triple(be: &Backend, gate: u64, simd: usize) -> Result<Triple, Error> {
    if be.my_id == DEALER {
        let mut shares = {
            let mut rng = rand::rng();
            let a: Vec<u64> = (0..simd).map(|_| rng.random()).collect();
            let b: Vec<u64> = (0..simd).map(|_| rng.random()).collect();
            let c: Vec<u64> = a
                .iter()
                .zip(&b)
                .map(|(a, b)| a.wrapping_mul(*b))
                .collect();
            split_sum(&mut rng, be.n_parties, &a, &b, &c)
        };
        for peer in be.peers() {
            be.router
                .send_to(peer, MsgTag::TripleShare, Phase::Setup, gate, &shares[peer])
                .await?;
        }
        Ok(shares.swap_remove(DEALER))
    } else {
        let triple: Triple = be
            .router
            .recv_from(DEALER, MsgTag::TripleShare, Phase::Setup, gate)
            .await?;
        check_lanes(simd, &[&triple.a, &triple.b, &triple.c])?;
        Ok(triple)
    }
}

/// Obtains this party's share of a bit triple for `gate`.
pub(crate) async fn bit_triple(be: &Backend, gate: u64, simd: usize) -> Result<BitTriple, Error> {
    if be.my_id == DEALER {
        let mut shares = {
            let mut rng = rand::rng();
            let a: Vec<bool> = (0..simd).map(|_| rng.random()).collect();
            let b: Vec<bool> = (0..simd).map(|_| rng.random()).collect();
            let c: Vec<bool> = a.iter().zip(&b).map(|(a, b)| *a & *b).collect();
            split_xor(&mut rng, be.n_parties, &a, &b, &c)
        };
        for peer in be.peers() {
            be.router
                .send_to(peer, MsgTag::TripleShare, Phase::Setup, gate, &shares[peer])
                .await?;
        }
        Ok(shares.swap_remove(DEALER))
    } else {
        let triple: BitTriple = be
            .router
            .recv_from(DEALER, MsgTag::TripleShare, Phase::Setup, gate)
            .await?;
        check_bit_lanes(simd, &[&triple.a, &triple.b, &triple.c])?;
        Ok(triple)
    }
}

/// Splits `(a, b, c)` into `parties` additive shares per lane; the shares
/// of party `i` end up at index `i`.
fn split_sum(
    rng: &mut impl Rng,
    parties: usize,
    a: &[u64],
    b: &[u64],
    c: &[u64],
) -> Vec<Triple> {
    let mut shares: Vec<Triple> = (0..parties)
        .map(|_| Triple {
            a: Vec::with_capacity(a.len()),
            b: Vec::with_capacity(a.len()),
            c: Vec::with_capacity(a.len()),
        })
        .collect();
    for lane in 0..a.len() {
        for (value, pick) in [
            (a[lane], 0usize),
            (b[lane], 1),
            (c[lane], 2),
        ] {
            let mut rest = value;
            for party in 1..parties {
                let share: u64 = rng.random();
                rest = rest.wrapping_sub(share);
                push_component(&mut shares[party], pick, share);
            }
            push_component(&mut shares[0], pick, rest);
        }
    }
    shares
}

fn push_component(triple: &mut Triple, pick: usize, share: u64) {
    match pick {
        0 => triple.a.push(share),
        1 => triple.b.push(share),
        _ => triple.c.push(share),
    }
}

/// Splits `(a, b, c)` into `parties` XOR shares per lane.
fn split_xor(
    rng: &mut impl Rng,
    parties: usize,
    a: &[bool],
    b: &[bool],
    c: &[bool],
) -> Vec<BitTriple> {
    let mut shares: Vec<BitTriple> = (0..parties)
        .map(|_| BitTriple {
            a: Vec::with_capacity(a.len()),
            b: Vec::with_capacity(a.len()),
            c: Vec::with_capacity(a.len()),
        })
        .collect();
    for lane in 0..a.len() {
        for (value, pick) in [
            (a[lane], 0usize),
            (b[lane], 1),
            (c[lane], 2),
        ] {
            let mut rest = value;
            for party in 1..parties {
                let share: bool = rng.random();
                rest ^= share;
                push_bit_component(&mut shares[party], pick, share);
            }
            push_bit_component(&mut shares[0], pick, rest);
        }
    }
    shares
}

fn push_bit_component(triple: &mut BitTriple, pick: usize, share: bool) {
    match pick {
        0 => triple.a.push(share),
        1 => triple.b.push(share),
        _ => triple.c.push(share),
    }
}

fn check_lanes(simd: usize, parts: &[&Vec<u64>]) -> Result<(), Error> {
    for part in parts {
        if part.len() != simd {
            return Err(Error::Channel(crate::channel::Error::InvalidLength {
                peer: DEALER,
                actual: part.len(),
                expected: simd,
            }));
        }
    }
    Ok(())
}

fn check_bit_lanes(simd: usize, parts: &[&Vec<bool>]) -> Result<(), Error> {
    for part in parts {
        if part.len() != simd {
            return Err(Error::Channel(crate::channel::Error::InvalidLength {
                peer: DEALER,
                actual: part.len(),
                expected: simd,
            }));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reconstructing the dealt shares must yield a consistent triple.
    #[test]
    fn arith_triples_reconstruct() {
        let mut rng = rand::rng();
        let a: Vec<u64> = (0..8).map(|_| rng.random()).collect();
        let b: Vec<u64> = (0..8).map(|_| rng.random()).collect();
        let c: Vec<u64> = a.iter().zip(&b).map(|(a, b)| a.wrapping_mul(*b)).collect();
        for parties in [2, 3, 5, 10] {
            let shares = split_sum(&mut rng, parties, &a, &b, &c);
            for lane in 0..a.len() {
                let sum = |pick: fn(&Triple) -> &Vec<u64>| {
                    shares
                        .iter()
                        .fold(0u64, |acc, s| acc.wrapping_add(pick(s)[lane]))
                };
                let (ra, rb, rc) = (sum(|s| &s.a), sum(|s| &s.b), sum(|s| &s.c));
                assert_eq!(ra, a[lane]);
                assert_eq!(rb, b[lane]);
                assert_eq!(rc, ra.wrapping_mul(rb));
            }
        }
    }

    #[test]
    fn bit_triples_reconstruct() {
        let mut rng = rand::rng();
        let a: Vec<bool> = (0..64).map(|_| rng.random()).collect();
        let b: Vec<bool> = (0..64).map(|_| rng.random()).collect();
        let c: Vec<bool> = a.iter().zip(&b).map(|(a, b)| *a & *b).collect();
        for parties in [2, 3, 5, 10] {
            let shares = split_xor(&mut rng, parties, &a, &b, &c);
            for lane in 0..a.len() {
                let xor = |pick: fn(&BitTriple) -> &Vec<bool>| {
                    shares.iter().fold(false, |acc, s| acc ^ pick(s)[lane])
                };
                let (ra, rb, rc) = (xor(|s| &s.a), xor(|s| &s.b), xor(|s| &s.c));
                assert_eq!(ra, a[lane]);
                assert_eq!(rb, b[lane]);
                assert_eq!(rc, ra & rb);
            }
        }
    }
}
