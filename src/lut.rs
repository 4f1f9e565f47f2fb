//! Two-level batched look-up-table evaluator
//!
//! ## Overview
//! Buffers a window of `q = d1 + d2` AP-bits and evaluates the whole window
//! at once, amortizing the expensive bootstrapping work over `q` inputs.
//!
//! Per window and per live source vertex, the `2^q` leaves of the window's
//! decision tree are plaintext-enumerable (the automaton is public; only the
//! inputs are encrypted). They are evaluated in two levels:
//!
//! - **First level.** The leaves are packed `2^{d1}` per Weight-Vector, one
//!   packed vector per upper branch (`2^{d2}` of them), and the `d1` lowest
//!   tree levels are folded slot-wise: each fold CMUXes a vector against its
//!   own copy shifted down by the level stride, so slot 0 converges on the
//!   leaf selected by the encrypted low bits.
//! - **Second level.** The `d2` upper levels are folded across packed
//!   vectors, pairwise, halving the vector count per level until a single
//!   Weight-Vector remains.
//!
//! The encrypted live-state carry is the single-bit form: per-vertex slot-0
//! TLWEs survive a window collapse, and circuit bootstrapping (through the
//! packing keyswitch material of the [`BootKey`]) turns them back into the
//! TRGSW selectors that compose the next window's folds. Acceptance is
//! emitted per window: sample-extract, key-switch, gate bootstrap.
//!
//! Trailing inputs shorter than `q` stay queued and produce no output.
#![forbid(unsafe_code)]

use std::collections::{BTreeSet, HashMap, VecDeque};

use rayon::prelude::*;

use crate::fhe::{
    encode_bit, sample_extract, trivial_ap_bit, trivial_trlwe, trivial_trlwe_const,
    trlwe_shift_down, ApBit, BootKey, Params, Tlwe, Trlwe, Workspace,
};
use crate::graph::Graph;
use crate::{Error, VertexId};

/// Window geometry for the batched evaluator. All three quantities are fixed
/// at construction; `d2 = queue - first_depth`.
#[derive(Clone, Copy, Debug)]
pub struct LutConfig {
    /// Levels folded inside packed vectors (`d1`); `2^{d1}` slots per vector.
    pub first_depth: usize,
    /// Total window size `q`.
    pub queue: usize,
}

impl Default for LutConfig {
    fn default() -> Self {
        Self {
            first_depth: 8,
            queue: 12,
        }
    }
}

impl LutConfig {
    fn validate(&self, params: &Params) -> Result<usize, Error> {
        if self.first_depth == 0 {
            return Err(Error::BadConfig("first-level depth must be positive".into()));
        }
        let log_n = params.polynomial_size.trailing_zeros() as usize;
        if self.first_depth > log_n {
            return Err(Error::BadConfig(format!(
                "first-level depth {} exceeds the {}-slot packing capacity",
                self.first_depth, params.polynomial_size
            )));
        }
        if self.queue <= self.first_depth {
            return Err(Error::BadConfig(format!(
                "queue size {} leaves no second-level bits above depth {}",
                self.queue, self.first_depth
            )));
        }
        let second = self.queue - self.first_depth;
        if second > log_n {
            return Err(Error::BadConfig(format!(
                "second-level depth {second} would enumerate more than {} packed vectors",
                params.polynomial_size
            )));
        }
        Ok(second)
    }
}

/// Windowed evaluator with a bounded FIFO of AP-bits and an encrypted
/// live-state carry.
pub struct BatchedLutEvaluator<'k> {
    graph: Graph,
    params: Params,
    boot_key: &'k BootKey,
    cfg: LutConfig,
    second_depth: usize,
    fifo: VecDeque<ApBit>,
    /// Live vertices with their encrypted one-hot selectors.
    live: Vec<(VertexId, ApBit)>,
    ws: Workspace,
    last: Option<Tlwe>,
    processed: usize,
    #[cfg(feature = "debug-decrypt")]
    debug_key: Option<&'k crate::fhe::SecretKey>,
}

impl<'k> BatchedLutEvaluator<'k> {
    /// Build an evaluator; the graph is minimized here and the initial state
    /// carries a noiseless certain selector.
    pub fn new(
        graph: &Graph,
        params: &Params,
        boot_key: &'k BootKey,
        cfg: LutConfig,
    ) -> Result<Self, Error> {
        let second_depth = cfg.validate(params)?;
        if boot_key.params() != params {
            return Err(Error::BadKey("boot key parameter set mismatch".into()));
        }
        let graph = graph.minimized();
        let live = vec![(graph.initial(), trivial_ap_bit(params, true))];
        let ws = Workspace::new(params)?;
        tracing::info!(
            vertices = graph.size(),
            first_depth = cfg.first_depth,
            queue = cfg.queue,
            "batched LUT evaluator ready"
        );
        Ok(Self {
            graph,
            params: params.clone(),
            boot_key,
            cfg,
            second_depth,
            fifo: VecDeque::with_capacity(cfg.queue),
            live,
            ws,
            last: None,
            processed: 0,
            #[cfg(feature = "debug-decrypt")]
            debug_key: None,
        })
    }

    /// Attach a secret key for intermediate-value logging. Diagnostic builds
    /// only.
    #[cfg(feature = "debug-decrypt")]
    pub fn attach_debug_key(&mut self, key: &'k crate::fhe::SecretKey) {
        self.debug_key = Some(key);
    }

    /// Queue the next AP-bit; a full window triggers evaluation.
    pub fn step(&mut self, bit: ApBit) -> Result<(), Error> {
        self.fifo.push_back(bit);
        if self.fifo.len() == self.cfg.queue {
            self.evaluate_window()?;
        }
        Ok(())
    }

    /// AP-bits still needed before the next window emits.
    pub fn size_hint(&self) -> usize {
        self.cfg.queue - self.fifo.len()
    }

    /// The Acceptance-Bit of the last completed window. Inputs shorter than
    /// the queue produce no output by design.
    pub fn result(&self) -> Result<Tlwe, Error> {
        self.last
            .clone()
            .ok_or_else(|| Error::BadInput("no full window evaluated yet".into()))
    }

    /// Plaintext endpoint of the window path `pi` (root bit first in the
    /// index's most significant position) starting from `v`.
    fn endpoint(&self, v: VertexId, pi: usize) -> VertexId {
        let q = self.cfg.queue;
        (0..q).fold(v, |s, i| self.graph.child(s, (pi >> (q - 1 - i)) & 1 == 1))
    }

    fn evaluate_window(&mut self) -> Result<(), Error> {
        let q = self.cfg.queue;
        let window: Vec<ApBit> = self.fifo.drain(..).collect();
        let leaf_count = 1usize << q;

        // Plaintext leaf endpoints per live vertex, and the next live set.
        let endpoints: Vec<Vec<VertexId>> = self
            .live
            .iter()
            .map(|&(v, _)| (0..leaf_count).map(|pi| self.endpoint(v, pi)).collect())
            .collect();
        let targets: BTreeSet<VertexId> = endpoints.iter().flatten().copied().collect();

        // One fold job per (live vertex, objective): the acceptance tree plus
        // one target-indicator tree per next-window vertex.
        let objectives: Vec<Option<VertexId>> = std::iter::once(None)
            .chain(targets.iter().copied().map(Some))
            .collect();
        let jobs: Vec<(usize, Option<VertexId>)> = (0..self.live.len())
            .flat_map(|i| objectives.iter().map(move |&o| (i, o)))
            .collect();
        let folded: HashMap<(usize, Option<VertexId>), Trlwe> = jobs
            .par_iter()
            .map_init(
                || Workspace::new(&self.params).expect("params validated at construction"),
                |ws, &(i, obj)| {
                    let leaves: Vec<u64> = endpoints[i]
                        .iter()
                        .map(|&e| match obj {
                            None => encode_bit(self.graph.is_final(e)),
                            Some(w) => encode_bit(e == w),
                        })
                        .collect();
                    ((i, obj), self.fold_window(ws, &window, &leaves))
                },
            )
            .collect();

        // Compose each objective across the live set through the encrypted
        // selectors; exactly one selector holds a 1.
        let accept_acc = self.compose(&folded, None);
        let accept_tlwe = sample_extract(&self.params, &accept_acc, 0);

        #[cfg(feature = "debug-decrypt")]
        if let Some(sk) = self.debug_key {
            if let Ok(bit) = sk.decrypt_bit(&accept_tlwe) {
                tracing::debug!(processed = self.processed + q, bit, "window acceptance");
            }
        }

        // Circuit-bootstrap the collapsed per-target bits into the selectors
        // of the next window. This is the amortized bootstrap of the whole
        // strategy: once per live target per q inputs.
        let composed: Vec<(VertexId, Trlwe)> = targets
            .iter()
            .map(|&w| (w, self.compose(&folded, Some(w))))
            .collect();
        let next_live: Vec<(VertexId, ApBit)> = composed
            .par_iter()
            .map(|(w, acc)| {
                let slot0 = sample_extract(&self.params, acc, 0);
                let sel = self.boot_key.circuit_bootstrap(&slot0)?;
                Ok((*w, sel))
            })
            .collect::<Result<_, Error>>()?;

        self.live = next_live;
        self.last = Some(self.boot_key.gate.refresh_tlwe(&accept_tlwe)?);
        self.processed += q;
        tracing::debug!(
            processed = self.processed,
            live = self.live.len(),
            "window evaluated"
        );
        Ok(())
    }

    /// Fold one objective's `2^q` plaintext leaves down to a single
    /// Weight-Vector selected by the encrypted window bits.
    fn fold_window(&self, ws: &mut Workspace, window: &[ApBit], leaves: &[u64]) -> Trlwe {
        let d1 = self.cfg.first_depth;
        let d2 = self.second_depth;
        let width = 1usize << d1;

        // FIRST-LUT: pack 2^{d1} leaves per vector, one per upper branch,
        // then fold the low levels by strided slot shifts. Slot 0 of pack j
        // converges on leaf j·2^{d1} + s where s is the value read from the
        // encrypted low bits.
        let mut packed: Vec<Trlwe> = leaves
            .chunks(width)
            .map(|chunk| trivial_trlwe(&self.params, chunk))
            .collect();
        for t in 0..d1 {
            let sel = &window[window.len() - 1 - t];
            for p in packed.iter_mut() {
                let mut hi = p.clone();
                trlwe_shift_down(&mut hi, 1 << t);
                *p = ws.cmux(sel, &hi, p);
            }
        }

        // SECOND-LUT: halve the pack count once per upper bit, deepest
        // remaining bit first.
        for t in 0..d2 {
            let sel = &window[d2 - 1 - t];
            packed = packed
                .chunks(2)
                .map(|pair| ws.cmux(sel, &pair[1], &pair[0]))
                .collect();
        }
        debug_assert_eq!(packed.len(), 1);
        packed.pop().expect("one vector remains after d2 halvings")
    }

    /// `Σ_live selector ⊡ folded[(i, objective)]`.
    fn compose(
        &mut self,
        folded: &HashMap<(usize, Option<VertexId>), Trlwe>,
        objective: Option<VertexId>,
    ) -> Trlwe {
        let mut acc = trivial_trlwe_const(&self.params, false);
        for (i, (_, sel)) in self.live.iter().enumerate() {
            let t = &folded[&(i, objective)];
            self.ws.add_external_product(&mut acc, sel, t);
        }
        acc
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

    #[test]
    fn window_boundaries_match_the_plaintext_run() {
        let (sk, bk) = &*KEYS;
        let mut client = Client::new();
        let graph = Graph::parse(EVEN_ONES).unwrap();
        let cfg = LutConfig {
            first_depth: 1,
            queue: 2,
        };
        let mut eval = BatchedLutEvaluator::new(&graph, sk.params(), bk, cfg).unwrap();
        let word = [true, false, true, true];
        for (i, &b) in word.iter().enumerate() {
            eval.step(client.encrypt_ap_bit(sk, b)).unwrap();
            if (i + 1) % 2 == 0 {
                assert_eq!(
                    sk.decrypt_bit(&eval.result().unwrap()).unwrap(),
                    graph.accept(&word[..=i]),
                    "prefix of length {}",
                    i + 1
                );
            }
        }
    }

    #[test]
    fn short_input_emits_nothing() {
        let (sk, bk) = &*KEYS;
        let mut client = Client::new();
        let graph = Graph::parse(EVEN_ONES).unwrap();
        let cfg = LutConfig {
            first_depth: 2,
            queue: 4,
        };
        let mut eval = BatchedLutEvaluator::new(&graph, sk.params(), bk, cfg).unwrap();
        for b in [true, false, true] {
            eval.step(client.encrypt_ap_bit(sk, b)).unwrap();
        }
        assert_eq!(eval.size_hint(), 1);
        assert!(matches!(eval.result(), Err(Error::BadInput(_))));
    }

    #[test]
    fn geometry_is_validated() {
        let (sk, bk) = &*KEYS;
        let graph = Graph::parse(EVEN_ONES).unwrap();
        for cfg in [
            LutConfig { first_depth: 0, queue: 2 },
            LutConfig { first_depth: 2, queue: 2 },
            LutConfig { first_depth: 64, queue: 65 },
        ] {
            assert!(matches!(
                BatchedLutEvaluator::new(&graph, sk.params(), bk, cfg),
                Err(Error::BadConfig(_))
            ));
        }
    }
}
