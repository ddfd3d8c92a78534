use proptest::prelude::*;
use quilt::{Scheme, party::Error, party::simulate};

/// Runs a two-party circuit where party 0 inputs `a` and party 1 inputs
/// `b` under `scheme`, applies `circuit` and reveals to everyone.
async fn eval2(
    scheme: Scheme,
    bits: usize,
    a: u64,
    b: u64,
    circuit: impl Fn(&quilt::share::Share, &quilt::share::Share) -> quilt::share::Share
    + Send
    + Sync
    + Copy
    + 'static,
) -> Result<u64, Error> {
    let outputs = simulate(2, |party| async move {
        let x = party.input(scheme, 0, bits, (party.my_id() == 0).then(|| vec![a]), 1)?;
        let y = party.input(scheme, 1, bits, (party.my_id() == 1).then(|| vec![b]), 1)?;
        let out = circuit(&x, &y).out(None)?;
        party.run().await?;
        let result = out.value()?;
        party.finish().await?;
        Ok(result[0])
    })
    .await?;
    assert_eq!(outputs[0], outputs[1]);
    Ok(outputs[0])
}

/// Converting to another scheme and back must reveal the original value,
/// for every ordered scheme pair.
#[tokio::test(flavor = "multi_thread")]
async fn conversion_round_trips() -> Result<(), Error> {
    let pairs = [
        (Scheme::Arith, Scheme::Bool),
        (Scheme::Arith, Scheme::Garbled),
        (Scheme::Bool, Scheme::Arith),
        (Scheme::Bool, Scheme::Garbled),
        (Scheme::Garbled, Scheme::Arith),
        (Scheme::Garbled, Scheme::Bool),
    ];
    for (from, to) in pairs {
        let bits = if from == Scheme::Arith { 64 } else { 8 };
        for value in [0u64, 1, 42, 200] {
            let outputs = simulate(3, |party| async move {
                let mine = (party.my_id() == 1).then(|| vec![value]);
                let share = party.input(from, 1, bits, mine, 1)?;
                let roamed = share.convert(to).convert(from);
                let out = roamed.out(None)?;
                party.run().await?;
                let result = out.value()?;
                party.finish().await?;
                Ok(result[0])
            })
            .await?;
            for output in outputs {
                assert_eq!(output, value, "{from:?} -> {to:?} -> {from:?}");
            }
        }
    }
    Ok(())
}

/// A converted share computes correctly in the target scheme: sum two
/// boolean inputs arithmetically after a boolean-to-arithmetic conversion.
#[tokio::test(flavor = "multi_thread")]
async fn converted_shares_compute() -> Result<(), Error> {
    let sum = eval2(Scheme::Bool, 8, 99, 101, |x, y| {
        &x.convert(Scheme::Arith) + &y.convert(Scheme::Arith)
    })
    .await?;
    assert_eq!(sum, 200);
    Ok(())
}

/// Greater-than matches plaintext comparison, including the boundary
/// cases, on boolean and garbled shares as well as on converted
/// arithmetic shares.
#[tokio::test(flavor = "multi_thread")]
async fn comparison_boundaries() -> Result<(), Error> {
    let cases = [
        (0u64, 0u64),
        (u16::MAX as u64, 0),
        (0, u16::MAX as u64),
        (1234, 1234),
        (40_000, 39_999),
        (1, 2),
    ];
    for scheme in [Scheme::Bool, Scheme::Garbled] {
        for (a, b) in cases {
            let gt = eval2(scheme, 16, a, b, |x, y| x.gt(y)).await?;
            assert_eq!(gt, (a > b) as u64, "{scheme:?}: {a} > {b}");
        }
    }
    let (a, b) = (1u64 << 63, 77);
    let gt = eval2(Scheme::Arith, 64, a, b, |x, y| x.gt(y)).await?;
    assert_eq!(gt, 1, "arithmetic comparison converts and compares");
    Ok(())
}

/// Equality is exact on equal inputs and zero otherwise.
#[tokio::test(flavor = "multi_thread")]
async fn equality() -> Result<(), Error> {
    for (a, b, expected) in [(7u64, 7u64, 1u64), (7, 8, 0), (0, 0, 1), (255, 0, 0)] {
        let eq = eval2(Scheme::Bool, 8, a, b, |x, y| x.is_equal(y)).await?;
        assert_eq!(eq, expected, "{a} == {b}");
    }
    Ok(())
}

/// The multiplexer selects the first branch on a set selector and the
/// second otherwise, and costs a round (it is not evaluated locally).
#[tokio::test(flavor = "multi_thread")]
async fn multiplexer_selects() -> Result<(), Error> {
    for scheme in [Scheme::Bool, Scheme::Garbled] {
        for (sel, expected) in [(1u64, 111u64), (0, 222)] {
            let outputs = simulate(2, |party| async move {
                let s = party.input(scheme, 0, 1, (party.my_id() == 0).then(|| vec![sel]), 1)?;
                let a = party.input(scheme, 0, 8, (party.my_id() == 0).then(|| vec![111]), 1)?;
                let b = party.input(scheme, 1, 8, (party.my_id() == 1).then(|| vec![222]), 1)?;
                let out = s.mux(&a, &b).out(None)?;
                party.run().await?;
                let result = out.value()?;
                party.finish().await?;
                Ok(result[0])
            })
            .await?;
            for output in outputs {
                assert_eq!(output, expected, "{scheme:?}, selector {sel}");
            }
        }
    }
    Ok(())
}

/// Boolean ring arithmetic (built from XOR/AND sub-circuits) matches
/// plaintext arithmetic mod 2^width.
#[tokio::test(flavor = "multi_thread")]
async fn boolean_ring_arithmetic() -> Result<(), Error> {
    // Addition wraps mod 2^16.
    let sum = eval2(Scheme::Bool, 16, 0xFFFF, 3, |x, y| x + y).await?;
    assert_eq!(sum, 2);
    // Subtraction borrows through zero.
    let diff = eval2(Scheme::Bool, 16, 5, 9, |x, y| x - y).await?;
    assert_eq!(diff, (5u64.wrapping_sub(9)) & 0xFFFF);
    // Multiplication truncates to the operand width.
    let prod = eval2(Scheme::Bool, 8, 13, 17, |x, y| x * y).await?;
    assert_eq!(prod, 221);
    let wrapped = eval2(Scheme::Bool, 8, 200, 3, |x, y| x * y).await?;
    assert_eq!(wrapped, 600 % 256);
    Ok(())
}

/// Restoring division yields the plaintext quotient.
#[tokio::test(flavor = "multi_thread")]
async fn boolean_division() -> Result<(), Error> {
    for (a, b) in [(100u64, 7u64), (15, 3), (5, 9), (42, 42), (255, 1)] {
        let q = eval2(Scheme::Bool, 8, a, b, |x, y| x / y).await?;
        assert_eq!(q, a / b, "{a} / {b}");
    }
    Ok(())
}

/// Bitwise operators and complement on boolean shares.
#[tokio::test(flavor = "multi_thread")]
async fn bitwise_operators() -> Result<(), Error> {
    let (a, b) = (0b1100u64, 0b1010u64);
    assert_eq!(eval2(Scheme::Bool, 4, a, b, |x, y| x ^ y).await?, a ^ b);
    assert_eq!(eval2(Scheme::Bool, 4, a, b, |x, y| x & y).await?, a & b);
    assert_eq!(eval2(Scheme::Bool, 4, a, b, |x, y| x | y).await?, a | b);
    assert_eq!(eval2(Scheme::Bool, 4, a, b, |x, _| !x).await?, !a & 0xF);
    // The same gadgets drive the garbled scheme.
    assert_eq!(eval2(Scheme::Garbled, 4, a, b, |x, y| x & y).await?, a & b);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Randomized comparison check against plaintext, 16-bit operands.
    #[test]
    fn comparison_matches_plaintext(a: u16, b: u16) {
        let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
        let gt = runtime
            .block_on(eval2(Scheme::Bool, 16, a as u64, b as u64, |x, y| x.gt(y)))
            .expect("comparison circuit");
        prop_assert_eq!(gt, (a > b) as u64);
    }
}
