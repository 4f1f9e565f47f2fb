//! Offline evaluator
//!
//! ## Overview
//! Backward dynamic programming over the depth-indexed reachable-state table.
//! The input length `N` must be known up front; the stream is consumed in
//! reverse (last AP-bit first).
//!
//! Invariant: at depth `d`, the evaluator holds one Weight-Vector `W_d[v]`
//! per vertex `v` reachable in exactly `d` steps, whose plaintext is the
//! indicator of "the suffix consumed so far is accepted when started from
//! `v`". The base case seeds `W_N[v]` with the final-set indicator; each step
//! applies
//!
//! ```text
//! W_d[v] = CMUX(x_d, W_{d+1}[child1(v)], W_{d+1}[child0(v)])
//! ```
//!
//! and the answer after all `N` steps is `W_0[q0]`.
//!
//! CMUXes for distinct vertices are independent and run on the worker pool,
//! partitioned by vertex ID. Bootstrapping is optional: with a gate key, all
//! live Weight-Vectors are refreshed every `interval` CMUX levels (default:
//! every level), and the final vector is always refreshed before extraction.
#![forbid(unsafe_code)]

use rayon::prelude::*;

use crate::fhe::{
    sample_extract, trivial_trlwe_const, ApBit, GateKey, Params, Tlwe, Trlwe, Workspace,
};
use crate::graph::Graph;
use crate::{Error, VertexId};

/// Backward evaluator over a reversed input stream of known length.
pub struct OfflineEvaluator<'k> {
    graph: Graph,
    params: Params,
    gate_key: Option<&'k GateKey>,
    interval: usize,
    /// `weights[v]` is populated exactly for `v` reachable at `depth`.
    weights: Vec<Option<Trlwe>>,
    depth: usize,
    levels_since_refresh: usize,
}

impl<'k> OfflineEvaluator<'k> {
    /// Build an evaluator for `input_len` AP-bits. The graph is minimized and
    /// its reachable-at-depth table is reserved here.
    ///
    /// `interval` is the number of CMUX levels between refreshes; passing one
    /// explicitly requires a gate key ([`Error::BadKey`] otherwise), and the
    /// default is every level with a key, never without.
    pub fn new(
        graph: &Graph,
        input_len: usize,
        params: &Params,
        gate_key: Option<&'k GateKey>,
        interval: Option<usize>,
    ) -> Result<Self, Error> {
        if interval == Some(0) {
            return Err(Error::BadConfig("bootstrap interval must be positive".into()));
        }
        if interval.is_some() && gate_key.is_none() {
            return Err(Error::BadKey(
                "bootstrapping requested but no gate key supplied".into(),
            ));
        }
        if let Some(gk) = gate_key {
            if gk.params() != params {
                return Err(Error::BadKey("gate key parameter set mismatch".into()));
            }
        }
        // Validates the parameter shapes once; worker pools rely on it below.
        Workspace::new(params)?;

        let mut graph = graph.minimized();
        graph.reserve_states_at_depth(input_len);

        let mut weights = vec![None; graph.size()];
        let deepest = graph
            .states_at_depth(input_len)
            .expect("table was reserved to input_len");
        for &v in deepest {
            weights[v] = Some(trivial_trlwe_const(params, graph.is_final(v)));
        }
        tracing::info!(
            vertices = graph.size(),
            input_len,
            bootstrap = gate_key.is_some(),
            "offline evaluator ready"
        );
        Ok(Self {
            graph,
            params: params.clone(),
            gate_key,
            interval: interval.unwrap_or(1),
            weights,
            depth: input_len,
            levels_since_refresh: 0,
        })
    }

    /// Consume the next AP-bit of the *reversed* stream, stepping from depth
    /// `d+1` to `d`.
    pub fn step(&mut self, bit: ApBit) -> Result<(), Error> {
        if self.depth == 0 {
            return Err(Error::BadInput(
                "stream longer than the declared input length".into(),
            ));
        }
        let d = self.depth - 1;
        self.levels_since_refresh += 1;
        let refresh = self.gate_key.is_some() && self.levels_since_refresh >= self.interval;

        let live: &[VertexId] = self
            .graph
            .states_at_depth(d)
            .expect("table covers every depth up to input_len");
        let next: Vec<(VertexId, Trlwe)> = live
            .par_iter()
            .map_init(
                || Workspace::new(&self.params).expect("params validated at construction"),
                |ws, &v| {
                    let w1 = self.weights[self.graph.child(v, true)]
                        .as_ref()
                        .expect("children of R_d lie in R_{d+1}");
                    let w0 = self.weights[self.graph.child(v, false)]
                        .as_ref()
                        .expect("children of R_d lie in R_{d+1}");
                    let mut w = ws.cmux(&bit, w1, w0);
                    if refresh {
                        let gk = self.gate_key.expect("refresh implies a gate key");
                        let slot0 = sample_extract(&self.params, &w, 0);
                        w = gk.refresh_trlwe(ws, &slot0)?;
                    }
                    Ok((v, w))
                },
            )
            .collect::<Result<_, Error>>()?;

        if refresh {
            self.levels_since_refresh = 0;
        }
        self.weights = vec![None; self.graph.size()];
        for (v, w) in next {
            self.weights[v] = Some(w);
        }
        self.depth = d;
        Ok(())
    }

    /// Depths still outstanding before [`OfflineEvaluator::result`] is valid.
    pub fn size_hint(&self) -> usize {
        self.depth
    }

    /// The acceptance bit `W_0[q0]`, refreshed before extraction when a gate
    /// key is present. Fails with [`Error::BadInput`] while input remains.
    pub fn result(&self) -> Result<Tlwe, Error> {
        if self.depth != 0 {
            return Err(Error::BadInput(format!(
                "offline evaluation incomplete: {} inputs outstanding",
                self.depth
            )));
        }
        let w0 = self.weights[self.graph.initial()]
            .as_ref()
            .expect("depth 0 holds the initial vertex");
        let slot0 = sample_extract(&self.params, w0, 0);
        match self.gate_key {
            Some(gk) => gk.refresh_tlwe(&slot0),
            None => Ok(slot0),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fhe::tests::KEYS;
    use crate::fhe::Client;

    const EVEN_ONES: &str = "2 0 1\n0\n0 0 1\n1 1 0\n";

    fn run_offline(word: &[bool], interval: Option<usize>, with_key: bool) -> bool {
        let (sk, bk) = &*KEYS;
        let mut client = Client::new();
        let graph = Graph::parse(EVEN_ONES).unwrap();
        let gk = with_key.then_some(&bk.gate);
        let mut eval =
            OfflineEvaluator::new(&graph, word.len(), sk.params(), gk, interval).unwrap();
        for &b in word.iter().rev() {
            eval.step(client.encrypt_ap_bit(sk, b)).unwrap();
        }
        sk.decrypt_bit(&eval.result().unwrap()).unwrap()
    }

    #[test]
    fn matches_the_plaintext_run() {
        let graph = Graph::parse(EVEN_ONES).unwrap();
        for word in [&[true, false, true, true][..], &[true, true][..]] {
            assert_eq!(run_offline(word, None, true), graph.accept(word));
        }
    }

    #[test]
    fn works_without_a_gate_key_at_shallow_depth() {
        let graph = Graph::parse(EVEN_ONES).unwrap();
        let word = [true, false, true];
        assert_eq!(run_offline(&word, None, false), graph.accept(&word));
    }

    #[test]
    fn empty_input_reports_initial_acceptance() {
        assert!(run_offline(&[], None, true));
        let (sk, bk) = &*KEYS;
        // Same automaton with a non-final initial vertex.
        let graph = Graph::parse("2 1 1\n0\n0 0 1\n1 1 0\n").unwrap();
        let eval = OfflineEvaluator::new(&graph, 0, sk.params(), Some(&bk.gate), None).unwrap();
        assert!(!sk.decrypt_bit(&eval.result().unwrap()).unwrap());
    }

    #[test]
    fn misuse_is_rejected() {
        let (sk, bk) = &*KEYS;
        let mut client = Client::new();
        let graph = Graph::parse(EVEN_ONES).unwrap();
        assert!(matches!(
            OfflineEvaluator::new(&graph, 4, sk.params(), Some(&bk.gate), Some(0)),
            Err(Error::BadConfig(_))
        ));
        assert!(matches!(
            OfflineEvaluator::new(&graph, 4, sk.params(), None, Some(2)),
            Err(Error::BadKey(_))
        ));
        let mut eval =
            OfflineEvaluator::new(&graph, 1, sk.params(), Some(&bk.gate), None).unwrap();
        assert!(matches!(eval.result(), Err(Error::BadInput(_))));
        eval.step(client.encrypt_ap_bit(sk, true)).unwrap();
        assert!(matches!(
            eval.step(client.encrypt_ap_bit(sk, true)),
            Err(Error::BadInput(_))
        ));
    }
}
