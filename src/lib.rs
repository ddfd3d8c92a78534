//! A secret-sharing based secure multi-party computation (MPC) engine.
//!
//! This crate provides the orchestration core of an MPC system: shares and
//! wires, a gate DAG with a two-phase (setup/online) execution model, a
//! readiness-driven scheduler and a tagged per-peer communication layer.
//! Values can be shared under three schemes (additive arithmetic sharing,
//! XOR-based boolean sharing and a masked-wire garbled sharing) and
//! converted between them; circuits are built directly through share
//! operators, no circuit language or file format is involved.
//!
//! ## Main Components
//!
//! * [`party`]: the [`party::Party`] session object: connection setup,
//!   input shares, circuit execution and teardown.
//! * [`share`]: the [`share::Share`] type and the operators that build the
//!   circuit, including comparisons, multiplexers and scheme conversions.
//! * [`channel`]: per-peer duplex channels, message framing and routing.
//!
//! ## Basic Usage
//!
//! Each participating party:
//!
//! 1. Parses its [`party::PartyConfig`] and calls [`party::Party::connect`]
//! 2. Creates input shares with [`party::Party::input`]
//! 3. Combines shares through operators and marks reveal points with
//!    [`share::Share::out`]
//! 4. Calls [`party::Party::run`] and reads revealed outputs
//! 5. Tears the session down with [`party::Party::finish`]
//!
//! ## Example
//!
//! Two parties adding their secret inputs, simulated in-process:
//!
//! ```
//! use quilt::{Scheme, party::simulate};
//!
//! # #[tokio::main(flavor = "multi_thread")]
//! # async fn main() -> Result<(), quilt::party::Error> {
//! let outputs = simulate(2, |party| async move {
//!     let mine = (party.my_id() == 0).then(|| vec![20u64]);
//!     let a = party.input(Scheme::Arith, 0, 64, mine, 1)?;
//!     let mine = (party.my_id() == 1).then(|| vec![22u64]);
//!     let b = party.input(Scheme::Arith, 1, 64, mine, 1)?;
//!     let sum = (&a + &b).out(None)?;
//!     party.run().await?;
//!     let result = sum.value()?;
//!     party.finish().await?;
//!     Ok(result)
//! })
//! .await?;
//! assert_eq!(outputs, vec![vec![42], vec![42]]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Model
//!
//! The engine is an orchestration layer with semi-honest security: the
//! correlated randomness consumed by secure multiplications comes from a
//! trusted-dealer provider rather than an oblivious-transfer protocol, and
//! the garbled scheme carries masked wires without cryptographic labels.
//! Swapping in hardened providers does not change the execution core.
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod channel;
pub mod party;
pub mod share;

mod dealer;
mod gate;
mod net;
mod register;
mod wire;

pub use net::ConnectError;
pub use wire::Scheme;
