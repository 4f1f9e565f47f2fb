//! Online evaluators
//!
//! ## Forward evaluator
//! Streams input left-to-right keeping one Weight-Vector per vertex whose
//! plaintext is the indicator of "the run so far ended at `v`". A step
//! scatters every weight along both edges, routed by the encrypted bit:
//!
//! ```text
//! W'[v] = Σ_{u: child0(u)=v} CMUX(x, 0, W[u]) + Σ_{u: child1(u)=v} CMUX(x, W[u], 0)
//! ```
//!
//! Exactly one vertex holds a 1 at any time, so the slot-wise sums stay
//! Boolean. Every `interval` steps (default 1, the benchmark baseline) all
//! weights are refreshed through the gate key. The result is available on
//! demand as the extraction of `Σ_{v ∈ F} W[v]`.
//!
//! ## Backstream evaluator
//! Folds the reversed, determinized, minimized DFA while streaming forward.
//! With `M' = reverse(M)`, a prefix `p` is accepted by `M` exactly when
//! `reverse(p)` is accepted by `M'`, and prepending a bit to a reversed word
//! is a pure per-vertex CMUX:
//!
//! ```text
//! W'[v] = CMUX(x, W[child1'(v)], W[child0'(v)])
//! ```
//!
//! where `W[v]` is the indicator of "`M'` accepts the reversed prefix when
//! started from `v`". The prefix answer sits at the reversed initial vertex
//! after every step; bootstrap boundaries extract it as a fresh
//! Acceptance-Bit and refresh the whole vector.
#![forbid(unsafe_code)]

use rayon::prelude::*;

use crate::fhe::{
    sample_extract, trivial_trlwe_const, trlwe_add_assign, ApBit, GateKey, Params, Tlwe, Trlwe,
    Workspace,
};
use crate::graph::Graph;
use crate::{Error, VertexId};

fn check_interval(
    params: &Params,
    gate_key: &GateKey,
    interval: Option<usize>,
) -> Result<usize, Error> {
    if interval == Some(0) {
        return Err(Error::BadConfig("bootstrap interval must be positive".into()));
    }
    if gate_key.params() != params {
        return Err(Error::BadKey("gate key parameter set mismatch".into()));
    }
    Workspace::new(params)?;
    Ok(interval.unwrap_or(1))
}

// ============================================================================
// Forward evaluator (per-state forward DP)
// ============================================================================

/// Left-to-right evaluator holding one Weight-Vector per vertex.
pub struct ForwardEvaluator<'k> {
    graph: Graph,
    params: Params,
    gate_key: &'k GateKey,
    interval: usize,
    /// `incoming[v]` lists `(u, b)` with `child_b(u) = v`.
    incoming: Vec<Vec<(VertexId, bool)>>,
    weights: Vec<Trlwe>,
    steps: usize,
}

impl<'k> ForwardEvaluator<'k> {
    /// Build an evaluator; `interval` defaults to bootstrapping every step.
    pub fn new(
        graph: &Graph,
        params: &Params,
        gate_key: &'k GateKey,
        interval: Option<usize>,
    ) -> Result<Self, Error> {
        let interval = check_interval(params, gate_key, interval)?;
        let graph = graph.clone();
        let mut incoming = vec![Vec::new(); graph.size()];
        for u in 0..graph.size() {
            for b in [false, true] {
                incoming[graph.child(u, b)].push((u, b));
            }
        }
        let weights = (0..graph.size())
            .map(|v| trivial_trlwe_const(params, v == graph.initial()))
            .collect();
        Ok(Self {
            graph,
            params: params.clone(),
            gate_key,
            interval,
            incoming,
            weights,
            steps: 0,
        })
    }

    /// Consume the next AP-bit of the forward stream.
    pub fn step(&mut self, bit: ApBit) -> Result<(), Error> {
        let zero = trivial_trlwe_const(&self.params, false);
        let refresh = (self.steps + 1) % self.interval == 0;
        let next: Vec<Trlwe> = (0..self.graph.size())
            .into_par_iter()
            .map_init(
                || Workspace::new(&self.params).expect("params validated at construction"),
                |ws, v| {
                    let mut acc = zero.clone();
                    for &(u, b) in &self.incoming[v] {
                        let routed = if b {
                            ws.cmux(&bit, &self.weights[u], &zero)
                        } else {
                            ws.cmux(&bit, &zero, &self.weights[u])
                        };
                        trlwe_add_assign(&mut acc, &routed);
                    }
                    if refresh {
                        let slot0 = sample_extract(&self.params, &acc, 0);
                        acc = self.gate_key.refresh_trlwe(ws, &slot0)?;
                    }
                    Ok(acc)
                },
            )
            .collect::<Result<_, Error>>()?;
        self.weights = next;
        self.steps += 1;
        tracing::trace!(step = self.steps, refreshed = refresh, "forward step");
        Ok(())
    }

    /// Steps until the next noise refresh.
    pub fn size_hint(&self) -> usize {
        self.interval - self.steps % self.interval
    }

    /// The acceptance bit for the prefix consumed so far, on demand.
    pub fn result(&self) -> Result<Tlwe, Error> {
        let mut sum = trivial_trlwe_const(&self.params, false);
        for v in 0..self.graph.size() {
            if self.graph.is_final(v) {
                trlwe_add_assign(&mut sum, &self.weights[v]);
            }
        }
        Ok(sample_extract(&self.params, &sum, 0))
    }
}

// ============================================================================
// Backstream evaluator (reversed DFA fold)
// ============================================================================

/// Forward-streaming evaluator over the reversed DFA.
pub struct BackstreamEvaluator<'k> {
    rev: Graph,
    params: Params,
    gate_key: &'k GateKey,
    interval: usize,
    weights: Vec<Trlwe>,
    steps: usize,
    last: Option<Tlwe>,
}

impl<'k> BackstreamEvaluator<'k> {
    /// Build an evaluator; the reversed, minimized automaton is derived here.
    pub fn new(
        graph: &Graph,
        params: &Params,
        gate_key: &'k GateKey,
        interval: Option<usize>,
    ) -> Result<Self, Error> {
        let interval = check_interval(params, gate_key, interval)?;
        let rev = graph.reversed().minimized();
        let weights = (0..rev.size())
            .map(|v| trivial_trlwe_const(params, rev.is_final(v)))
            .collect();
        tracing::info!(
            reversed_vertices = rev.size(),
            interval,
            "backstream evaluator ready"
        );
        Ok(Self {
            rev,
            params: params.clone(),
            gate_key,
            interval,
            weights,
            steps: 0,
            last: None,
        })
    }

    /// Consume the next AP-bit of the forward stream. On bootstrap
    /// boundaries the prefix answer is extracted as a fresh Acceptance-Bit
    /// and every weight is refreshed.
    pub fn step(&mut self, bit: ApBit) -> Result<(), Error> {
        let next: Vec<Trlwe> = (0..self.rev.size())
            .into_par_iter()
            .map_init(
                || Workspace::new(&self.params).expect("params validated at construction"),
                |ws, v| {
                    ws.cmux(
                        &bit,
                        &self.weights[self.rev.child(v, true)],
                        &self.weights[self.rev.child(v, false)],
                    )
                },
            )
            .collect();
        self.weights = next;
        self.steps += 1;

        if self.steps % self.interval == 0 {
            let answer = sample_extract(
                &self.params,
                &self.weights[self.rev.initial()],
                0,
            );
            self.last = Some(self.gate_key.refresh_tlwe(&answer)?);
            let refreshed: Vec<Trlwe> = self
                .weights
                .par_iter()
                .map_init(
                    || Workspace::new(&self.params).expect("params validated at construction"),
                    |ws, w| {
                        let slot0 = sample_extract(&self.params, w, 0);
                        self.gate_key.refresh_trlwe(ws, &slot0)
                    },
                )
                .collect::<Result<_, Error>>()?;
            self.weights = refreshed;
            tracing::debug!(step = self.steps, "backstream boundary reached");
        }
        Ok(())
    }

    /// Steps until the next bootstrap boundary.
    pub fn size_hint(&self) -> usize {
        self.interval - self.steps % self.interval
    }

    /// The most recently extracted Acceptance-Bit; before the first boundary
    /// (including the empty prefix) the answer is extracted on demand.
    pub fn result(&self) -> Result<Tlwe, Error> {
        if let Some(last) = &self.last {
            return Ok(last.clone());
        }
        let answer = sample_extract(&self.params, &self.weights[self.rev.initial()], 0);
        self.gate_key.refresh_tlwe(&answer)
    }
}

// ============================================================================
// Tests
// ============================================================================
