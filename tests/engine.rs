use quilt::{
    Scheme,
    party::{Error, Party, PartyConfig, PeerSpec, simulate},
};
use tokio::task::JoinSet;

/// A value input by one party and immediately revealed must come back
/// unchanged, for every scheme and for SIMD widths 1 and 1000.
#[tokio::test(flavor = "multi_thread")]
async fn input_output_identity() -> Result<(), Error> {
    for scheme in [Scheme::Arith, Scheme::Bool, Scheme::Garbled] {
        let bits = if scheme == Scheme::Arith { 64 } else { 16 };
        for simd in [1, 1000] {
            let values: Vec<u64> = (0..simd as u64).map(|l| (l * 37 + 11) % (1 << 16)).collect();
            let expected = values.clone();
            let outputs = simulate(3, |party| {
                let values = values.clone();
                async move {
                    let mine = (party.my_id() == 1).then_some(values);
                    let share = party.input(scheme, 1, bits, mine, simd)?;
                    let out = share.out(None)?;
                    party.run().await?;
                    let result = out.value()?;
                    party.finish().await?;
                    Ok(result)
                }
            })
            .await?;
            for output in outputs {
                assert_eq!(output, expected, "{scheme:?} identity, simd {simd}");
            }
        }
    }
    Ok(())
}

/// The sum circuit over additive shares reveals the wrapping sum of all
/// parties' inputs, for 2 to 10 parties.
#[tokio::test(flavor = "multi_thread")]
async fn additive_homomorphism() -> Result<(), Error> {
    for parties in [2, 3, 4, 5, 10] {
        let inputs: Vec<Vec<u64>> = (0..parties)
            .map(|i| vec![i as u64 * 1000 + 1, u64::MAX - i as u64, 7])
            .collect();
        let mut expected = vec![0u64; 3];
        for lanes in &inputs {
            for (lane, v) in lanes.iter().enumerate() {
                expected[lane] = expected[lane].wrapping_add(*v);
            }
        }
        let outputs = simulate(parties, |party| {
            let inputs = inputs.clone();
            async move {
                let mut sum: Option<quilt::share::Share> = None;
                for owner in 0..party.parties() {
                    let mine = (party.my_id() == owner).then(|| inputs[owner].clone());
                    let share = party.input(Scheme::Arith, owner, 64, mine, 3)?;
                    sum = Some(match sum {
                        None => share,
                        Some(acc) => &acc + &share,
                    });
                }
                let out = sum.expect("at least two parties").out(None)?;
                party.run().await?;
                let result = out.value()?;
                party.finish().await?;
                Ok(result)
            }
        })
        .await?;
        for output in outputs {
            assert_eq!(output, expected, "{parties} parties");
        }
    }
    Ok(())
}

/// The XOR circuit over boolean shares reveals the XOR reduction of all
/// parties' inputs.
#[tokio::test(flavor = "multi_thread")]
async fn xor_homomorphism() -> Result<(), Error> {
    for parties in [2, 3, 4, 5, 10] {
        let inputs: Vec<u64> = (0..parties)
            .map(|i| 0x0123_4567_89ab_cdefu64.rotate_left(i as u32 * 7) ^ i as u64)
            .collect();
        let expected = inputs.iter().fold(0u64, |acc, v| acc ^ v);
        let outputs = simulate(parties, |party| {
            let inputs = inputs.clone();
            async move {
                let mut folded: Option<quilt::share::Share> = None;
                for owner in 0..party.parties() {
                    let mine = (party.my_id() == owner).then(|| vec![inputs[owner]]);
                    let share = party.input(Scheme::Bool, owner, 64, mine, 1)?;
                    folded = Some(match folded {
                        None => share,
                        Some(acc) => &acc ^ &share,
                    });
                }
                let out = folded.expect("at least two parties").out(None)?;
                party.run().await?;
                let result = out.value()?;
                party.finish().await?;
                Ok(result)
            }
        })
        .await?;
        for output in outputs {
            assert_eq!(output, vec![expected], "{parties} parties");
        }
    }
    Ok(())
}

/// Secure multiplication consumes one triple per gate and reconstructs the
/// wrapping product, also over SIMD lanes.
#[tokio::test(flavor = "multi_thread")]
async fn arithmetic_multiplication() -> Result<(), Error> {
    for parties in [2, 3] {
        let a = vec![7u64, u64::MAX, 1 << 40];
        let b = vec![6u64, 3, 1 << 30];
        let expected: Vec<u64> = a.iter().zip(&b).map(|(a, b)| a.wrapping_mul(*b)).collect();
        let (a_in, b_in) = (a.clone(), b.clone());
        let outputs = simulate(parties, |party| {
            let (a, b) = (a_in.clone(), b_in.clone());
            async move {
                let a = party.input(Scheme::Arith, 0, 64, (party.my_id() == 0).then_some(a), 3)?;
                let b = party.input(Scheme::Arith, 1, 64, (party.my_id() == 1).then_some(b), 3)?;
                let out = (&a * &b).out(None)?;
                party.run().await?;
                let result = out.value()?;
                party.finish().await?;
                Ok(result)
            }
        })
        .await?;
        for output in outputs {
            assert_eq!(output, expected, "{parties} parties");
        }
    }
    Ok(())
}

/// An output addressed to a single party is cleartext there and hidden
/// everywhere else, even though every party runs the reveal protocol.
#[tokio::test(flavor = "multi_thread")]
async fn reveal_to_designated_party_only() -> Result<(), Error> {
    let outputs = simulate(3, |party| async move {
        let mine = (party.my_id() == 2).then(|| vec![99u64]);
        let share = party.input(Scheme::Arith, 2, 64, mine, 1)?;
        let out = share.out(Some(0))?;
        party.run().await?;
        let result = out.value();
        party.finish().await?;
        Ok(match result {
            Ok(lanes) => Some(lanes),
            Err(Error::OutputHidden) => None,
            Err(e) => return Err(e),
        })
    })
    .await?;
    assert_eq!(outputs[0], Some(vec![99]));
    assert_eq!(outputs[1], None);
    assert_eq!(outputs[2], None);
    Ok(())
}

/// Phase interleaving (no barrier between setup and online) produces the
/// same results as the default barriered execution.
#[tokio::test(flavor = "multi_thread")]
async fn interleaved_phases_match_barriered() -> Result<(), Error> {
    let parties = Party::in_memory_with(3, false);
    let mut set = JoinSet::new();
    for party in parties {
        set.spawn(async move {
            let a = party.input(
                Scheme::Arith,
                0,
                64,
                (party.my_id() == 0).then(|| vec![20u64]),
                1,
            )?;
            let b = party.input(
                Scheme::Arith,
                1,
                64,
                (party.my_id() == 1).then(|| vec![3u64]),
                1,
            )?;
            let c = party.input(
                Scheme::Arith,
                2,
                64,
                (party.my_id() == 2).then(|| vec![4u64]),
                1,
            )?;
            let out = (&(&a * &b) + &c).out(None)?;
            party.run().await?;
            let result = out.value()?;
            party.finish().await?;
            Ok::<_, Error>(result)
        });
    }
    while let Some(joined) = set.join_next().await {
        assert_eq!(joined.unwrap()?, vec![64]);
    }
    Ok(())
}

/// Transfer statistics count bytes in both directions on every link.
#[tokio::test(flavor = "multi_thread")]
async fn stats_track_both_directions() -> Result<(), Error> {
    let stats = simulate(2, |party| async move {
        let mine = (party.my_id() == 0).then(|| vec![1u64]);
        let share = party.input(Scheme::Arith, 0, 64, mine, 1)?;
        let out = share.out(None)?;
        party.run().await?;
        out.value()?;
        let stats = party.stats();
        party.finish().await?;
        Ok(stats)
    })
    .await?;
    for (party, stats) in stats.iter().enumerate() {
        // One reveal message in each direction, at the very least.
        for (peer, sent, received) in stats {
            assert!(*sent > 0, "party {party} sent nothing to {peer}");
            assert!(*received > 0, "party {party} received nothing from {peer}");
        }
    }
    Ok(())
}

/// Mixed-scheme operands are a usage error, not silently converted.
#[tokio::test(flavor = "multi_thread")]
#[should_panic(expected = "mixed-scheme operands")]
async fn mixed_scheme_operands_panic() {
    let mut parties = Party::in_memory(2);
    let party = parties.remove(0);
    let a = party
        .input(Scheme::Arith, 0, 64, Some(vec![1]), 1)
        .unwrap();
    let b = party.input(Scheme::Bool, 0, 64, Some(vec![1]), 1).unwrap();
    let _ = &a + &b;
}

/// The whole stack over real TCP sockets: handshake, framing, dealer
/// triples and reveal, between two local processes-worth of parties.
#[tokio::test(flavor = "multi_thread")]
async fn tcp_transport_end_to_end() -> Result<(), Error> {
    let specs = ["0,127.0.0.1,29871", "1,127.0.0.1,29872"];
    let mut set = JoinSet::new();
    for my_id in 0..2 {
        let peers: Vec<PeerSpec> = specs.iter().map(|s| s.parse().unwrap()).collect();
        set.spawn(async move {
            let mut config = PartyConfig::new(my_id, peers)?;
            config.conn_timeout = std::time::Duration::from_secs(10);
            let party = Party::connect(config).await?;
            let a = party.input(Scheme::Arith, 0, 64, (my_id == 0).then(|| vec![5u64]), 1)?;
            let b = party.input(Scheme::Arith, 1, 64, (my_id == 1).then(|| vec![8u64]), 1)?;
            let out = (&a * &b).out(None)?;
            party.run().await?;
            let result = out.value()?;
            party.finish().await?;
            Ok::<_, Error>(result)
        });
    }
    while let Some(joined) = set.join_next().await {
        assert_eq!(joined.unwrap()?, vec![40]);
    }
    Ok(())
}

/// Input shapes are validated at call time, before any protocol activity.
#[tokio::test(flavor = "multi_thread")]
async fn input_validation_fails_fast() {
    let mut parties = Party::in_memory(2);
    let party = parties.remove(0);
    // Non-owner passing values.
    assert!(party.input(Scheme::Arith, 1, 64, Some(vec![1]), 1).is_err());
    // Owner passing no values.
    assert!(party.input(Scheme::Arith, 0, 64, None, 1).is_err());
    // Owner out of range.
    assert!(party.input(Scheme::Arith, 7, 64, None, 1).is_err());
    // Wrong lane count.
    assert!(party.input(Scheme::Bool, 0, 8, Some(vec![1, 2]), 1).is_err());
    // Value does not fit the declared width.
    assert!(party.input(Scheme::Bool, 0, 8, Some(vec![256]), 1).is_err());
    // Invalid widths.
    assert!(party.input(Scheme::Arith, 0, 32, Some(vec![1]), 1).is_err());
    assert!(party.input(Scheme::Bool, 0, 0, Some(vec![1]), 1).is_err());
    assert!(party.input(Scheme::Bool, 0, 65, Some(vec![1]), 1).is_err());
}
