//! End-to-end scenarios: every evaluation strategy against the plaintext run,
//! under a freshly generated (small, insecure) test key set shared by the
//! whole suite.

use hedfa::fhe::{ApBit, BootKey, Client, Params, SecretKey};
use hedfa::lut::{BatchedLutEvaluator, LutConfig};
use hedfa::offline::OfflineEvaluator;
use hedfa::online::{BackstreamEvaluator, ForwardEvaluator};
use hedfa::Graph;
use once_cell::sync::Lazy;

static KEYS: Lazy<(SecretKey, BootKey)> = Lazy::new(|| {
    let mut client = Client::new();
    let sk = client
        .gen_secret_key(&Params::unit_test())
        .expect("test parameters are valid");
    let bk = client.gen_boot_key(&sk).expect("boot key generation");
    (sk, bk)
});

/// `accepts strings with an even number of 1s`.
const EVEN_ONES: &str = "2 0 1\n0\n0 0 1\n1 1 0\n";

/// `accepts strings ending in 01`.
const ENDS_IN_01: &str = "3 0 1\n2\n0 1 0\n1 1 2\n2 1 0\n";

/// Two atomic propositions (k = 2): accepts `(ab)*` where symbol `a` is
/// `(AP0, AP1) = (0, 0)` and `b` is `(0, 1)`, i.e. exactly the bit stream
/// `(0001)*` under the LSB-first symbol convention.
const AB_STAR: &str = "5 0 1\n0\n0 1 4\n1 2 4\n2 3 4\n3 4 0\n4 4 4\n";

fn bits(s: &str) -> Vec<bool> {
    s.chars().map(|c| c == '1').collect()
}

fn encrypt(word: &[bool]) -> Vec<ApBit> {
    let (sk, _) = &*KEYS;
    Client::new().encrypt_bits(sk, word)
}

fn offline_accept(spec: &str, word: &[bool]) -> bool {
    let (sk, bk) = &*KEYS;
    let graph = Graph::parse(spec).unwrap();
    let mut eval =
        OfflineEvaluator::new(&graph, word.len(), sk.params(), Some(&bk.gate), None).unwrap();
    for bit in encrypt(word).into_iter().rev() {
        eval.step(bit).unwrap();
    }
    sk.decrypt_bit(&eval.result().unwrap()).unwrap()
}

#[test]
fn s1_offline_even_ones() {
    let word = bits("1011");
    let graph = Graph::parse(EVEN_ONES).unwrap();
    assert!(!graph.accept(&word), "three 1s is odd");
    assert!(!offline_accept(EVEN_ONES, &word));
}

#[test]
fn s2_offline_ends_in_01() {
    let word = bits("1101");
    let graph = Graph::parse(ENDS_IN_01).unwrap();
    assert!(graph.accept(&word));
    assert!(offline_accept(ENDS_IN_01, &word));
}

#[test]
fn s3_two_proposition_alphabet() {
    // Two symbols `a b` = four AP-bits `00 01`.
    let word = bits("0001");
    let graph = Graph::parse(AB_STAR).unwrap();
    assert!(graph.accept(&word));
    assert!(offline_accept(AB_STAR, &word));
    // One symbol alone is not a whole number of `ab` pairs.
    assert!(!offline_accept(AB_STAR, &bits("00")));
}

#[test]
fn s4_backstream_bootstrap_interval_four() {
    let (sk, bk) = &*KEYS;
    let graph = Graph::parse(EVEN_ONES).unwrap();
    let word = bits("11110000");
    let mut eval = BackstreamEvaluator::new(&graph, sk.params(), &bk.gate, Some(4)).unwrap();
    let mut observed = Vec::new();
    for (i, bit) in encrypt(&word).into_iter().enumerate() {
        eval.step(bit).unwrap();
        if (i + 1) % 4 == 0 {
            observed.push(sk.decrypt_bit(&eval.result().unwrap()).unwrap());
            assert_eq!(observed.last().copied().unwrap(), graph.accept(&word[..=i]));
        }
    }
    assert_eq!(observed, vec![true, true], "even count at both boundaries");
}

#[test]
fn s5_batched_lut_window_four() {
    let (sk, bk) = &*KEYS;
    let graph = Graph::parse(ENDS_IN_01).unwrap();
    let word = bits("11010001");
    let cfg = LutConfig {
        first_depth: 2,
        queue: 4,
    };
    let mut eval = BatchedLutEvaluator::new(&graph, sk.params(), bk, cfg).unwrap();
    for (i, bit) in encrypt(&word).into_iter().enumerate() {
        eval.step(bit).unwrap();
        if (i + 1) % 4 == 0 {
            assert_eq!(
                sk.decrypt_bit(&eval.result().unwrap()).unwrap(),
                graph.accept(&word[..=i]),
                "window boundary at position {}",
                i + 1
            );
        }
    }
}

#[test]
fn p1_offline_agrees_with_plaintext_on_random_words() {
    let mut rng = rand::thread_rng();
    use rand::Rng;
    for spec in [EVEN_ONES, ENDS_IN_01] {
        let graph = Graph::parse(spec).unwrap();
        let word: Vec<bool> = (0..5).map(|_| rng.gen()).collect();
        assert_eq!(offline_accept(spec, &word), graph.accept(&word), "word {word:?}");
    }
}

#[test]
fn p2_online_strategies_agree_at_boundaries() {
    let (sk, bk) = &*KEYS;
    let graph = Graph::parse(ENDS_IN_01).unwrap();
    let word = bits("0110");
    let encrypted = encrypt(&word);
    let expected = graph.accept(&word);

    let mut forward = ForwardEvaluator::new(&graph, sk.params(), &bk.gate, Some(4)).unwrap();
    let mut back = BackstreamEvaluator::new(&graph, sk.params(), &bk.gate, Some(4)).unwrap();
    let mut lut = BatchedLutEvaluator::new(
        &graph,
        sk.params(),
        bk,
        LutConfig {
            first_depth: 2,
            queue: 4,
        },
    )
    .unwrap();
    for bit in encrypted {
        forward.step(bit.clone()).unwrap();
        back.step(bit.clone()).unwrap();
        lut.step(bit).unwrap();
    }
    assert_eq!(sk.decrypt_bit(&forward.result().unwrap()).unwrap(), expected);
    assert_eq!(sk.decrypt_bit(&back.result().unwrap()).unwrap(), expected);
    assert_eq!(sk.decrypt_bit(&lut.result().unwrap()).unwrap(), expected);
}

#[test]
fn single_vertex_self_loop_is_constant() {
    let (sk, bk) = &*KEYS;
    let spec = "1 0 1\n0\n0 0 0\n";
    let graph = Graph::parse(spec).unwrap();
    let mut eval = ForwardEvaluator::new(&graph, sk.params(), &bk.gate, Some(1)).unwrap();
    assert!(sk.decrypt_bit(&eval.result().unwrap()).unwrap());
    for bit in encrypt(&bits("101")) {
        eval.step(bit).unwrap();
        assert!(sk.decrypt_bit(&eval.result().unwrap()).unwrap());
    }
}
