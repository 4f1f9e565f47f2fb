//! Tagged runner over the four evaluation strategies
//!
//! The strategies share a small capability set — feed one AP-bit, read the
//! current Acceptance-Bit, report how many steps remain until the next
//! meaningful result — and differ only in stream direction and bootstrap
//! policy. A closed sum type covers them; no further dispatch is needed.
//!
//! [`Runner::drive`] pumps a stream into the evaluator with a `stop` flag
//! checked between steps as the only cancellation point: in-flight parallel
//! work inside a step always completes.
#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};

use crate::fhe::{ApBit, Tlwe};
use crate::lut::BatchedLutEvaluator;
use crate::offline::OfflineEvaluator;
use crate::online::{BackstreamEvaluator, ForwardEvaluator};
use crate::Error;

/// One of the four evaluation strategies behind the common capability set.
pub enum Runner<'k> {
    /// Backward DP over a reversed stream of known length.
    Offline(OfflineEvaluator<'k>),
    /// Per-state forward DP (`qtrlwe`).
    Forward(ForwardEvaluator<'k>),
    /// Reversed-DFA fold (`reversed`).
    Backstream(BackstreamEvaluator<'k>),
    /// Two-level batched LUT (`qtrlwe2`).
    BatchedLut(BatchedLutEvaluator<'k>),
}

impl Runner<'_> {
    /// Consume one AP-bit in the strategy's stream order.
    pub fn step(&mut self, bit: ApBit) -> Result<(), Error> {
        match self {
            Runner::Offline(e) => e.step(bit),
            Runner::Forward(e) => e.step(bit),
            Runner::Backstream(e) => e.step(bit),
            Runner::BatchedLut(e) => e.step(bit),
        }
    }

    /// The current Acceptance-Bit, per the strategy's output policy.
    pub fn result(&self) -> Result<Tlwe, Error> {
        match self {
            Runner::Offline(e) => e.result(),
            Runner::Forward(e) => e.result(),
            Runner::Backstream(e) => e.result(),
            Runner::BatchedLut(e) => e.result(),
        }
    }

    /// Steps remaining until the next meaningful [`Runner::result`].
    pub fn size_hint(&self) -> usize {
        match self {
            Runner::Offline(e) => e.size_hint(),
            Runner::Forward(e) => e.size_hint(),
            Runner::Backstream(e) => e.size_hint(),
            Runner::BatchedLut(e) => e.size_hint(),
        }
    }

    /// Pump AP-bits from `next` until the stream ends or `stop` is raised.
    /// Returns whether the stream was fully consumed. End-of-stream is normal
    /// termination, never an error.
    pub fn drive(
        &mut self,
        stop: &AtomicBool,
        mut next: impl FnMut() -> Result<Option<ApBit>, Error>,
    ) -> Result<bool, Error> {
        loop {
            if stop.load(Ordering::Relaxed) {
                tracing::info!("evaluation cancelled between steps");
                return Ok(false);
            }
            match next()? {
                Some(bit) => self.step(bit)?,
                None => return Ok(true),
            }
        }
    }
}

/// Reject streams whose bit count is not a whole number of `k`-bit symbols.
pub fn check_symbol_alignment(bits: usize, num_ap: usize) -> Result<(), Error> {
    if num_ap == 0 {
        return Err(Error::BadConfig("alphabet width must be positive".into()));
    }
    if bits % num_ap != 0 {
        return Err(Error::BadInput(format!(
            "{bits} AP-bits is not a whole number of {num_ap}-bit symbols"
        )));
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fhe::tests::KEYS;
    use crate::fhe::Client;
    use crate::graph::Graph;

    const EVEN_ONES: &str = "2 0 1\n0\n0 0 1\n1 1 0\n";

    #[test]
    fn symbol_alignment_is_enforced() {
        assert!(check_symbol_alignment(8, 1).is_ok());
        assert!(check_symbol_alignment(8, 2).is_ok());
        assert!(matches!(
            check_symbol_alignment(7, 2),
            Err(Error::BadInput(_))
        ));
        assert!(matches!(
            check_symbol_alignment(4, 0),
            Err(Error::BadConfig(_))
        ));
    }

    #[test]
    fn drive_consumes_a_stream_and_honors_stop() {
        let (sk, bk) = &*KEYS;
        let mut client = Client::new();
        let graph = Graph::parse(EVEN_ONES).unwrap();
        let word = [true, false, true, true];
        let bits = client.encrypt_bits(sk, &word);

        let mut runner = Runner::Backstream(
            BackstreamEvaluator::new(&graph, sk.params(), &bk.gate, Some(4)).unwrap(),
        );
        let stop = AtomicBool::new(false);
        let mut it = bits.clone().into_iter();
        assert!(runner.drive(&stop, || Ok(it.next())).unwrap());
        assert_eq!(
            sk.decrypt_bit(&runner.result().unwrap()).unwrap(),
            graph.accept(&word)
        );

        let mut runner = Runner::Backstream(
            BackstreamEvaluator::new(&graph, sk.params(), &bk.gate, Some(4)).unwrap(),
        );
        let stop = AtomicBool::new(true);
        let mut it = bits.into_iter();
        assert!(!runner.drive(&stop, || Ok(it.next())).unwrap());
        assert_eq!(it.len(), 4, "cancellation precedes the first step");
    }
}
