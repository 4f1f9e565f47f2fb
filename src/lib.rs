//! Crate root: public surface, shared error taxonomy, and engine-wide invariants
//!
//! This module is the **single canonical entry-point** for downstream users of
//! the library. It centralizes the error taxonomy, the vertex index alias, and
//! re-exports the submodules that implement the homomorphic DFA evaluation
//! engine.
//!
//! ## Invariants (engine-wide)
//!
//! - **Ciphertext forms.** Atomic-proposition bits travel as FFT-domain TRGSW
//!   ciphertexts ([`fhe::ApBit`]), packed accumulators as TRLWE polynomials
//!   ([`fhe::Trlwe`], N Boolean slots), and acceptance outputs as single-slot
//!   TLWE ciphertexts ([`fhe::Tlwe`]). Booleans are encoded on the torus as
//!   `b · q/4` and decoded by rounding with a `q/8` margin.
//!
//! - **Bit ordering.** Every plaintext byte is emitted LSB first, eight
//!   AP-bits per byte; a `k`-proposition alphabet symbol is `k` consecutive
//!   bits, least-significant proposition first. This convention is contractual
//!   and must match on the encryption and evaluation sides.
//!
//! - **Streaming discipline.** Input ciphertexts are consumed in strict stream
//!   order, exactly once. The reversed adapter is an end-to-start *view* over
//!   the same blob, never a buffered copy.
//!
//! - **Key ownership.** Key material is generated once, then only ever handed
//!   out as shared read-only borrows for an evaluator's lifetime. The graph is
//!   owned by its evaluator and immutable after construction.
//!
//! If any invariant is violated at runtime, the failure mode is a precise
//! [`Error`] (never UB); this crate forbids `unsafe` throughout.

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms)]

/// Key archives, ciphertext blob format, and input stream adapters.
pub mod archive;
/// The FHE interface layer: parameters, keys, ciphertext wrappers, primitives.
pub mod fhe;
/// The DFA intermediate representation and its graph algorithms.
pub mod graph;
/// External LTL→DFA translator invocation.
pub mod ltl;
/// Two-level batched look-up-table evaluator (windowed, bootstrap-amortizing).
pub mod lut;
/// Offline (right-to-left) evaluator over depth-indexed reachable sets.
pub mod offline;
/// Online evaluators: per-state forward DP and the reversed backstream fold.
pub mod online;
/// Tagged runner over the four evaluation strategies.
pub mod runner;

/// Index of a vertex in a [`graph::Graph`]. Vertices are contiguous from 0.
pub type VertexId = usize;

/// Shared error taxonomy, surfaced unchanged to the top-level caller.
///
/// Evaluators never catch and retry: everything here propagates. End-of-stream
/// is a normal termination signal, not an error, and has no variant.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed DFA spec text.
    #[error("bad DFA spec: {0}")]
    BadSpec(String),
    /// The external LTL translator failed or produced unparsable output.
    #[error("LTL translation failed: {0}")]
    BadLtl(String),
    /// Missing or mismatched key material for the requested mode.
    #[error("bad key material: {0}")]
    BadKey(String),
    /// Truncated or malformed ciphertext blob, or misaligned bit count.
    #[error("bad input: {0}")]
    BadInput(String),
    /// Invalid queue size, LUT depth out of range, zero bootstrap interval.
    #[error("bad configuration: {0}")]
    BadConfig(String),
    /// Failure reported by the underlying FHE primitives. Not recoverable.
    #[error("fatal FHE failure: {0}")]
    Fatal(String),
}

pub use crate::fhe::{BootKey, GateKey, Params, SecretKey};
pub use crate::graph::Graph;
pub use crate::runner::Runner;
