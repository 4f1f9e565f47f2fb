//! FHE interface layer
//!
//! ## Overview
//! The engine evaluates DFAs over TLWE / TRLWE / TRGSW ciphertexts but does
//! not implement the scheme: everything cryptographic is delegated to the
//! `tfhe` crate's `core_crypto` API. This module pins the calling
//! conventions — parameter sets, key material, the Boolean torus encoding —
//! and wraps the handful of primitives the evaluators use: CMUX, external
//! products, sample extraction, key switching, gate bootstrapping (to TLWE
//! and to TRLWE) and circuit bootstrapping (to TRGSW).
//!
//! ## Encoding
//! A Boolean `b` is the torus point `b · q/4` (`false` = 0, `true` = [`MU`]).
//! Decoding rounds to the nearest multiple of `q/4`, leaving a `q/8` noise
//! margin. Gate bootstrapping recenters to `±q/8` internally and shifts back,
//! so refreshed ciphertexts land exactly on `{0, q/4}` plus fresh noise.
//!
//! ## Keys
//! - [`SecretKey`] — LWE + GLWE secret keys (client side only).
//! - [`GateKey`] — FFT-domain bootstrapping key + LWE key-switching key;
//!   shared read-only by every evaluator in a run.
//! - [`LutKey`] — the circuit-bootstrap private functional packing keyswitch
//!   list (the TLWE→TRLWE switching material); only the batched-LUT
//!   evaluator needs it.
//! - [`BootKey`] — the composite record bundling both.
#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use tfhe::core_crypto::algorithms::polynomial_algorithms::polynomial_wrapping_monic_monomial_div_assign;
use tfhe::core_crypto::fft_impl::fft64::crypto::bootstrap::blind_rotate_assign_scratch;
use tfhe::core_crypto::fft_impl::fft64::crypto::ggsw::{
    add_external_product_assign, add_external_product_assign_scratch, cmux as fourier_cmux,
    cmux_scratch, FourierGgswCiphertext,
};
use tfhe::core_crypto::fft_impl::fft64::{c64, ABox};
use tfhe::core_crypto::prelude::*;

use crate::Error;

/// Owned FFT-domain GGSW ciphertext (the `tfhe` crate keeps its own alias
/// for this private, so we re-declare it from the same public pieces).
type FourierGgswCiphertextOwned = FourierGgswCiphertext<ABox<[c64]>>;

/// Torus encoding of `true`: `q/4`.
pub const MU: u64 = 1 << 62;
/// Recentering offset used around bootstraps: `q/8`.
const HALF_MU: u64 = 1 << 61;

/// Encode a Boolean on the torus.
#[inline]
pub fn encode_bit(bit: bool) -> u64 {
    if bit {
        MU
    } else {
        0
    }
}

/// Decode a torus point to a Boolean by rounding to the nearest multiple of
/// `q/4`. Tolerates up to `q/8` of accumulated noise.
#[inline]
pub fn decode_bit(torus: u64) -> bool {
    (torus.wrapping_add(HALF_MU) >> 62) & 0b11 == 1
}

// ============================================================================
// Parameters
// ============================================================================

/// The FHE parameter set shared by one key generation and every ciphertext
/// derived from it. Fixed at key generation; archives embed it so mismatched
/// key material is detected at load time rather than as garbage plaintexts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Params {
    /// Small-LWE dimension (bootstrap input key).
    pub lwe_dimension: usize,
    /// Gaussian noise standard deviation for small-LWE encryptions.
    pub lwe_noise_std: f64,
    /// GLWE mask dimension `k`.
    pub glwe_dimension: usize,
    /// TRLWE polynomial degree `N` (the number of Boolean slots).
    pub polynomial_size: usize,
    /// Gaussian noise standard deviation for GLWE/GGSW encryptions.
    pub glwe_noise_std: f64,
    /// Bootstrapping-key decomposition base (log2).
    pub pbs_base_log: usize,
    /// Bootstrapping-key decomposition level count.
    pub pbs_level: usize,
    /// Key-switching decomposition base (log2).
    pub ks_base_log: usize,
    /// Key-switching decomposition level count.
    pub ks_level: usize,
    /// TRGSW decomposition base (log2), shared by input AP-bits and
    /// circuit-bootstrap outputs.
    pub cbs_base_log: usize,
    /// TRGSW decomposition level count.
    pub cbs_level: usize,
    /// Private functional packing keyswitch decomposition base (log2).
    pub pfks_base_log: usize,
    /// Private functional packing keyswitch decomposition level count.
    pub pfks_level: usize,
}

impl Default for Params {
    /// Production-grade set: the classic 128-bit gate-bootstrapping shape with
    /// a `N = 2048` GLWE layer sized for circuit bootstrapping.
    fn default() -> Self {
        Self {
            lwe_dimension: 742,
            lwe_noise_std: 7.069849454709433e-6,
            glwe_dimension: 1,
            polynomial_size: 2048,
            glwe_noise_std: 2.845267479601915e-15,
            pbs_base_log: 15,
            pbs_level: 2,
            ks_base_log: 3,
            ks_level: 5,
            cbs_base_log: 6,
            cbs_level: 4,
            pfks_base_log: 15,
            pfks_level: 2,
        }
    }
}

impl Params {
    /// Small, fast, **insecure** parameters for unit and scenario tests.
    /// Noise is set far below the decoding margin so test failures point at
    /// logic, not at statistics.
    pub fn unit_test() -> Self {
        Self {
            lwe_dimension: 512,
            lwe_noise_std: 9.094947017729282e-13,
            glwe_dimension: 1,
            polynomial_size: 512,
            glwe_noise_std: 8.881784197001252e-16,
            pbs_base_log: 7,
            pbs_level: 3,
            ks_base_log: 4,
            ks_level: 8,
            cbs_base_log: 7,
            cbs_level: 3,
            pfks_base_log: 15,
            pfks_level: 2,
        }
    }

    /// Validate decomposition shapes. Everything else (dimensions, noise) is
    /// the scheme's business and checked by the underlying library.
    pub fn validate(&self) -> Result<(), Error> {
        let checks = [
            ("pbs", self.pbs_base_log, self.pbs_level),
            ("ks", self.ks_base_log, self.ks_level),
            ("cbs", self.cbs_base_log, self.cbs_level),
            ("pfks", self.pfks_base_log, self.pfks_level),
        ];
        for (name, base, level) in checks {
            if base == 0 || level == 0 || base * level >= 64 {
                return Err(Error::BadConfig(format!(
                    "{name} decomposition (base 2^{base}, {level} levels) out of range"
                )));
            }
        }
        if self.lwe_dimension == 0 || self.glwe_dimension == 0 {
            return Err(Error::BadConfig("zero key dimension".into()));
        }
        if !self.polynomial_size.is_power_of_two() {
            return Err(Error::BadConfig(format!(
                "polynomial size {} is not a power of two",
                self.polynomial_size
            )));
        }
        Ok(())
    }

    pub(crate) fn glwe_size(&self) -> GlweSize {
        GlweDimension(self.glwe_dimension).to_glwe_size()
    }

    pub(crate) fn poly(&self) -> PolynomialSize {
        PolynomialSize(self.polynomial_size)
    }

    /// Dimension of TLWEs extracted from a TRLWE slot (`k·N`).
    pub(crate) fn big_lwe_dimension(&self) -> usize {
        self.glwe_dimension * self.polynomial_size
    }

    fn lwe_noise(&self) -> DynamicDistribution<u64> {
        DynamicDistribution::new_gaussian_from_std_dev(StandardDev(self.lwe_noise_std))
    }

    fn glwe_noise(&self) -> DynamicDistribution<u64> {
        DynamicDistribution::new_gaussian_from_std_dev(StandardDev(self.glwe_noise_std))
    }
}

// ============================================================================
// Ciphertext forms
// ============================================================================

/// A single-slot TLWE ciphertext: the Acceptance-Bit form. Lives under the
/// small key (fresh encryptions, bootstrap inputs) or the extracted big key
/// (evaluator outputs); [`SecretKey::decrypt_bit`] handles both.
#[derive(Clone, Serialize, Deserialize)]
pub struct Tlwe(pub(crate) LweCiphertextOwned<u64>);

/// A TRLWE ciphertext: the Weight-Vector form, `N` Boolean slots packed in
/// one polynomial.
#[derive(Clone, Serialize, Deserialize)]
pub struct Trlwe(pub(crate) GlweCiphertextOwned<u64>);

/// An FFT-domain TRGSW ciphertext encrypting one atomic-proposition bit.
/// Consumed as a CMUX selector; immutable after construction.
#[derive(Clone, Serialize, Deserialize)]
pub struct ApBit(pub(crate) FourierGgswCiphertextOwned);

/// A noiseless TRLWE whose first `slots.len()` slots hold the given torus
/// points; remaining slots are zero.
pub(crate) fn trivial_trlwe(params: &Params, slots: &[u64]) -> Trlwe {
    let mut ct = GlweCiphertext::new(
        0u64,
        params.glwe_size(),
        params.poly(),
        CiphertextModulus::new_native(),
    );
    ct.get_mut_body().as_mut()[..slots.len()].copy_from_slice(slots);
    Trlwe(ct)
}

/// A noiseless TRLWE with every slot set to `bit`.
pub(crate) fn trivial_trlwe_const(params: &Params, bit: bool) -> Trlwe {
    let mut ct = GlweCiphertext::new(
        0u64,
        params.glwe_size(),
        params.poly(),
        CiphertextModulus::new_native(),
    );
    ct.get_mut_body().as_mut().fill(encode_bit(bit));
    Trlwe(ct)
}

/// A noiseless TRGSW of the constant `bit`, usable as a CMUX selector. The
/// gadget rows carry `bit · q/B^j` on the slot-0 coefficient of their own
/// component, which is exactly `bit · G` with zero encryption noise.
pub(crate) fn trivial_ap_bit(params: &Params, bit: bool) -> ApBit {
    let mut ggsw = GgswCiphertext::new(
        0u64,
        params.glwe_size(),
        params.poly(),
        DecompositionBaseLog(params.cbs_base_log),
        DecompositionLevelCount(params.cbs_level),
        CiphertextModulus::new_native(),
    );
    if bit {
        let n = params.polynomial_size;
        let rows_per_level = params.glwe_dimension + 1;
        for (row_idx, mut row) in ggsw.as_mut_glwe_list().iter_mut().enumerate() {
            let level = row_idx / rows_per_level + 1;
            let component = row_idx % rows_per_level;
            let delta = 1u64 << (64 - params.cbs_base_log * level);
            row.as_mut()[component * n] = delta;
        }
    }
    let mut fourier = FourierGgswCiphertext::new(
        params.glwe_size(),
        params.poly(),
        DecompositionBaseLog(params.cbs_base_log),
        DecompositionLevelCount(params.cbs_level),
    );
    convert_standard_ggsw_ciphertext_to_fourier(&ggsw, &mut fourier);
    ApBit(fourier)
}

/// `a += b`, slot-wise.
pub(crate) fn trlwe_add_assign(a: &mut Trlwe, b: &Trlwe) {
    glwe_ciphertext_add_assign(&mut a.0, &b.0);
}

/// Negacyclic slot shift: `ct ← ct · X^{-shift}`, moving slot `i + shift`
/// into slot `i`. Slots wrapping past the top pick up a sign and are treated
/// as garbage by callers.
pub(crate) fn trlwe_shift_down(ct: &mut Trlwe, shift: usize) {
    for mut poly in ct.0.as_mut_polynomial_list().iter_mut() {
        polynomial_wrapping_monic_monomial_div_assign(&mut poly, MonomialDegree(shift));
    }
}

/// Extract the TLWE encrypting slot `slot` of a TRLWE. Output is under the
/// big (`k·N`) extracted key.
pub(crate) fn sample_extract(params: &Params, ct: &Trlwe, slot: usize) -> Tlwe {
    let mut out = LweCiphertext::new(
        0u64,
        LweDimension(params.big_lwe_dimension()).to_lwe_size(),
        CiphertextModulus::new_native(),
    );
    extract_lwe_sample_from_glwe_ciphertext(&ct.0, &mut out, MonomialDegree(slot));
    Tlwe(out)
}

// ============================================================================
// Workspace (FFT plan + scratch memory)
// ============================================================================

/// Per-thread scratch for the FFT-domain primitives: one FFT plan plus a
/// computation buffer sized once for the largest operation. Parallel loops
/// create one per worker; a `Workspace` is never shared across threads.
pub struct Workspace {
    fft: Fft,
    buffers: ComputationBuffers,
}

impl Workspace {
    /// Build a workspace for `params`, pre-sizing scratch memory.
    pub fn new(params: &Params) -> Result<Self, Error> {
        let fft = Fft::new(params.poly());
        let fft_view = fft.as_view();
        let reqs = [
            cmux_scratch::<u64>(params.glwe_size(), params.poly(), fft_view),
            add_external_product_assign_scratch::<u64>(params.glwe_size(), params.poly(), fft_view),
            blind_rotate_assign_scratch::<u64>(params.glwe_size(), params.poly(), fft_view),
        ];
        let mut bytes = 0usize;
        for req in reqs {
            bytes = bytes.max(req.unaligned_bytes_required());
        }
        let mut buffers = ComputationBuffers::new();
        buffers.resize(bytes);
        Ok(Self { fft, buffers })
    }

    /// Homomorphic multiplexer: `if sel then on_true else on_false`.
    pub fn cmux(&mut self, sel: &ApBit, on_true: &Trlwe, on_false: &Trlwe) -> Trlwe {
        let mut c0 = on_false.clone();
        let mut c1 = on_true.clone();
        fourier_cmux(
            c0.0.as_mut_view(),
            c1.0.as_mut_view(),
            sel.0.as_view(),
            self.fft.as_view(),
            self.buffers.stack(),
        );
        c0
    }

    /// `acc += sel ⊡ ct` (external product). With a `{0,1}` selector this
    /// adds either `ct`'s plaintext or nothing.
    pub fn add_external_product(&mut self, acc: &mut Trlwe, sel: &ApBit, ct: &Trlwe) {
        add_external_product_assign(
            acc.0.as_mut_view(),
            sel.0.as_view(),
            ct.0.as_view(),
            self.fft.as_view(),
            self.buffers.stack(),
        );
    }
}

// ============================================================================
// Key material
// ============================================================================

/// Client-side secret key material.
#[derive(Serialize, Deserialize)]
pub struct SecretKey {
    pub(crate) params: Params,
    lwe: LweSecretKeyOwned<u64>,
    glwe: GlweSecretKeyOwned<u64>,
    /// The GLWE key flattened to its extracted-LWE form, kept alongside so
    /// evaluator outputs decrypt without re-deriving it.
    big_lwe: LweSecretKeyOwned<u64>,
}

/// Bootstrapping + key-switching material; read-only, shared by all
/// evaluators in a run.
#[derive(Serialize, Deserialize)]
pub struct GateKey {
    pub(crate) params: Params,
    pub(crate) bsk: FourierLweBootstrapKeyOwned,
    pub(crate) ksk: LweKeyswitchKeyOwned<u64>,
}

/// Circuit-bootstrap packing keyswitch material (TLWE→TRLWE); required only
/// by the batched-LUT evaluator.
#[derive(Serialize, Deserialize)]
pub struct LutKey {
    pub(crate) params: Params,
    pfpksk: LwePrivateFunctionalPackingKeyswitchKeyListOwned<u64>,
}

/// The composite bootstrapping-key record: gate material plus LUT material.
#[derive(Serialize, Deserialize)]
pub struct BootKey {
    /// Gate bootstrapping + key switching.
    pub gate: GateKey,
    /// Circuit-bootstrap packing keyswitch list.
    pub lut: LutKey,
}

impl SecretKey {
    /// The parameter set this key was generated under.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Decrypt an Acceptance-Bit, accepting either the small or the
    /// extracted key form.
    pub fn decrypt_bit(&self, ct: &Tlwe) -> Result<bool, Error> {
        let dim = ct.0.lwe_size().to_lwe_dimension().0;
        let pt = if dim == self.params.lwe_dimension {
            decrypt_lwe_ciphertext(&self.lwe, &ct.0)
        } else if dim == self.params.big_lwe_dimension() {
            decrypt_lwe_ciphertext(&self.big_lwe, &ct.0)
        } else {
            return Err(Error::BadKey(format!(
                "TLWE dimension {dim} matches neither key ({} / {})",
                self.params.lwe_dimension,
                self.params.big_lwe_dimension()
            )));
        };
        Ok(decode_bit(pt.0))
    }

    /// Decrypt one slot of a Weight-Vector.
    pub fn decrypt_slot(&self, ct: &Trlwe, slot: usize) -> Result<bool, Error> {
        if slot >= self.params.polynomial_size {
            return Err(Error::BadInput(format!(
                "slot {slot} out of range 0..{}",
                self.params.polynomial_size
            )));
        }
        let mut pts = PlaintextList::new(0u64, PlaintextCount(self.params.polynomial_size));
        decrypt_glwe_ciphertext(&self.glwe, &ct.0, &mut pts);
        Ok(decode_bit(pts.into_container()[slot]))
    }
}

impl GateKey {
    /// The parameter set this key was generated under.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Bring a TLWE under the small key, key-switching extracted ciphertexts
    /// and passing small ones through.
    fn to_small(&self, ct: &Tlwe) -> Result<Tlwe, Error> {
        let dim = ct.0.lwe_size().to_lwe_dimension().0;
        if dim == self.params.lwe_dimension {
            return Ok(ct.clone());
        }
        if dim != self.params.big_lwe_dimension() {
            return Err(Error::BadKey(format!(
                "TLWE dimension {dim} does not match this gate key"
            )));
        }
        let mut out = LweCiphertext::new(
            0u64,
            LweDimension(self.params.lwe_dimension).to_lwe_size(),
            CiphertextModulus::new_native(),
        );
        keyswitch_lwe_ciphertext(&self.ksk, &ct.0, &mut out);
        Ok(Tlwe(out))
    }

    /// Gate bootstrap: refresh a `{0, q/4}` TLWE to a fresh TLWE of the same
    /// bit under the extracted key.
    pub fn refresh_tlwe(&self, ct: &Tlwe) -> Result<Tlwe, Error> {
        let mut small = self.to_small(ct)?;
        lwe_ciphertext_plaintext_add_assign(&mut small.0, Plaintext(HALF_MU.wrapping_neg()));
        let acc = trivial_trlwe_const_raw(&self.params, HALF_MU);
        let mut out = LweCiphertext::new(
            0u64,
            LweDimension(self.params.big_lwe_dimension()).to_lwe_size(),
            CiphertextModulus::new_native(),
        );
        programmable_bootstrap_lwe_ciphertext(&small.0, &mut out, &acc.0, &self.bsk);
        lwe_ciphertext_plaintext_add_assign(&mut out, Plaintext(HALF_MU));
        Ok(Tlwe(out))
    }

    /// Gate bootstrap into the packed form: a fresh TRLWE carrying the
    /// refreshed bit in the low quarter of its slots (higher slots may flip
    /// from the negacyclic rotation and must not be read). This is how
    /// Weight-Vectors are re-seeded after a noise reset; every consumer reads
    /// slot 0.
    pub fn refresh_trlwe(&self, ws: &mut Workspace, ct: &Tlwe) -> Result<Trlwe, Error> {
        let mut small = self.to_small(ct)?;
        lwe_ciphertext_plaintext_add_assign(&mut small.0, Plaintext(HALF_MU.wrapping_neg()));
        let mut acc = trivial_trlwe_const_raw(&self.params, HALF_MU);
        let log_modulus = self.params.poly().to_blind_rotation_input_modulus_log();
        let msed = lwe_ciphertext_modulus_switch(small.0.as_view(), log_modulus);
        self.bsk.as_view().blind_rotate_assign(
            acc.0.as_mut_view(),
            &msed,
            ws.fft.as_view(),
            ws.buffers.stack(),
        );
        for c in acc.0.get_mut_body().as_mut() {
            *c = c.wrapping_add(HALF_MU);
        }
        Ok(acc)
    }
}

impl LutKey {
    /// The parameter set this key was generated under.
    pub fn params(&self) -> &Params {
        &self.params
    }
}

impl BootKey {
    /// The parameter set this key was generated under.
    pub fn params(&self) -> &Params {
        &self.gate.params
    }

    /// Circuit bootstrap: convert a `{0, q/4}` TLWE into a fresh FFT-domain
    /// TRGSW usable as a CMUX selector. One gate bootstrap per decomposition
    /// level plus one packing keyswitch per gadget row.
    pub fn circuit_bootstrap(&self, ct: &Tlwe) -> Result<ApBit, Error> {
        let p = &self.gate.params;
        let small = self.gate.to_small(ct)?;
        let mut ggsw = GgswCiphertext::new(
            0u64,
            p.glwe_size(),
            p.poly(),
            DecompositionBaseLog(p.cbs_base_log),
            DecompositionLevelCount(p.cbs_level),
            CiphertextModulus::new_native(),
        );
        {
            let mut rows = ggsw.as_mut_glwe_list();
            let mut row_iter = rows.iter_mut();
            for level in 1..=p.cbs_level {
                // Raise the bit to m · q/B^level via a sign bootstrap around
                // the half-step offset.
                let delta_half = 1u64 << (63 - p.cbs_base_log * level);
                let mut shifted = small.clone();
                lwe_ciphertext_plaintext_add_assign(
                    &mut shifted.0,
                    Plaintext(HALF_MU.wrapping_neg()),
                );
                let acc = trivial_trlwe_const_raw(p, delta_half);
                let mut leveled = LweCiphertext::new(
                    0u64,
                    LweDimension(p.big_lwe_dimension()).to_lwe_size(),
                    CiphertextModulus::new_native(),
                );
                programmable_bootstrap_lwe_ciphertext(
                    &shifted.0,
                    &mut leveled,
                    &acc.0,
                    &self.gate.bsk,
                );
                lwe_ciphertext_plaintext_add_assign(&mut leveled, Plaintext(delta_half));

                // Pack the leveled bit into each gadget row of this level:
                // the list's first k keys write `-s_i · m`, the last writes
                // `m` into the body row.
                for pfpksk in self.lut.pfpksk.iter() {
                    let mut row = row_iter.next().ok_or_else(|| {
                        Error::Fatal("gadget row count does not match pfpksk list".into())
                    })?;
                    private_functional_keyswitch_lwe_ciphertext_into_glwe_ciphertext(
                        &pfpksk,
                        &mut row,
                        &leveled,
                    );
                }
            }
        }
        let mut fourier = FourierGgswCiphertext::new(
            p.glwe_size(),
            p.poly(),
            DecompositionBaseLog(p.cbs_base_log),
            DecompositionLevelCount(p.cbs_level),
        );
        convert_standard_ggsw_ciphertext_to_fourier(&ggsw, &mut fourier);
        Ok(ApBit(fourier))
    }
}

/// Like [`trivial_trlwe_const`] but with a raw torus constant in every slot.
fn trivial_trlwe_const_raw(params: &Params, value: u64) -> Trlwe {
    let mut ct = GlweCiphertext::new(
        0u64,
        params.glwe_size(),
        params.poly(),
        CiphertextModulus::new_native(),
    );
    ct.get_mut_body().as_mut().fill(value);
    Trlwe(ct)
}

// ============================================================================
// Client (key generation + encryption)
// ============================================================================

/// Client-side randomness context for key generation and encryption. The
/// encryption generator pairs a publicly seeded mask CSPRNG with a privately
/// seeded noise CSPRNG, per the underlying library's design.
pub struct Client {
    secret_generator: SecretRandomGenerator<DefaultRandomGenerator>,
    encryption_generator: EncryptionRandomGenerator<DefaultRandomGenerator>,
}

impl Client {
    /// Build a client from the platform seeder.
    pub fn new() -> Self {
        let mut seeder = new_seeder();
        let seeder = seeder.as_mut();
        let secret_generator = SecretRandomGenerator::<DefaultRandomGenerator>::new(seeder.seed());
        let encryption_generator =
            EncryptionRandomGenerator::<DefaultRandomGenerator>::new(seeder.seed(), seeder);
        Self {
            secret_generator,
            encryption_generator,
        }
    }

    /// Generate a fresh secret key for `params`.
    pub fn gen_secret_key(&mut self, params: &Params) -> Result<SecretKey, Error> {
        params.validate()?;
        let lwe: LweSecretKeyOwned<u64> = allocate_and_generate_new_binary_lwe_secret_key(
            LweDimension(params.lwe_dimension),
            &mut self.secret_generator,
        );
        let glwe: GlweSecretKeyOwned<u64> = allocate_and_generate_new_binary_glwe_secret_key(
            GlweDimension(params.glwe_dimension),
            params.poly(),
            &mut self.secret_generator,
        );
        let big_lwe = glwe.clone().into_lwe_secret_key();
        Ok(SecretKey {
            params: params.clone(),
            lwe,
            glwe,
            big_lwe,
        })
    }

    /// Generate the composite bootstrapping-key record for a secret key.
    pub fn gen_boot_key(&mut self, sk: &SecretKey) -> Result<BootKey, Error> {
        let p = &sk.params;
        p.validate()?;

        let std_bsk: LweBootstrapKeyOwned<u64> = par_allocate_and_generate_new_lwe_bootstrap_key(
            &sk.lwe,
            &sk.glwe,
            DecompositionBaseLog(p.pbs_base_log),
            DecompositionLevelCount(p.pbs_level),
            p.glwe_noise(),
            CiphertextModulus::new_native(),
            &mut self.encryption_generator,
        );
        let mut bsk = FourierLweBootstrapKey::new(
            std_bsk.input_lwe_dimension(),
            std_bsk.glwe_size(),
            std_bsk.polynomial_size(),
            std_bsk.decomposition_base_log(),
            std_bsk.decomposition_level_count(),
        );
        convert_standard_lwe_bootstrap_key_to_fourier(&std_bsk, &mut bsk);

        let ksk = allocate_and_generate_new_lwe_keyswitch_key(
            &sk.big_lwe,
            &sk.lwe,
            DecompositionBaseLog(p.ks_base_log),
            DecompositionLevelCount(p.ks_level),
            p.lwe_noise(),
            CiphertextModulus::new_native(),
            &mut self.encryption_generator,
        );

        let pfpksk = par_allocate_and_generate_new_circuit_bootstrap_lwe_pfpksk_list(
            &sk.big_lwe,
            &sk.glwe,
            DecompositionBaseLog(p.pfks_base_log),
            DecompositionLevelCount(p.pfks_level),
            p.glwe_noise(),
            CiphertextModulus::new_native(),
            &mut self.encryption_generator,
        );

        Ok(BootKey {
            gate: GateKey {
                params: p.clone(),
                bsk,
                ksk,
            },
            lut: LutKey {
                params: p.clone(),
                pfpksk,
            },
        })
    }

    /// Encrypt one atomic-proposition bit as an FFT-domain TRGSW.
    pub fn encrypt_ap_bit(&mut self, sk: &SecretKey, bit: bool) -> ApBit {
        let p = &sk.params;
        let mut ggsw = GgswCiphertext::new(
            0u64,
            p.glwe_size(),
            p.poly(),
            DecompositionBaseLog(p.cbs_base_log),
            DecompositionLevelCount(p.cbs_level),
            CiphertextModulus::new_native(),
        );
        par_encrypt_constant_ggsw_ciphertext(
            &sk.glwe,
            &mut ggsw,
            Cleartext(u64::from(bit)),
            p.glwe_noise(),
            &mut self.encryption_generator,
        );
        let mut fourier = FourierGgswCiphertext::new(
            p.glwe_size(),
            p.poly(),
            DecompositionBaseLog(p.cbs_base_log),
            DecompositionLevelCount(p.cbs_level),
        );
        convert_standard_ggsw_ciphertext_to_fourier(&ggsw, &mut fourier);
        ApBit(fourier)
    }

    /// Encrypt a bit sequence, one TRGSW per bit, in stream order.
    pub fn encrypt_bits(&mut self, sk: &SecretKey, bits: &[bool]) -> Vec<ApBit> {
        bits.iter().map(|&b| self.encrypt_ap_bit(sk, b)).collect()
    }

    /// Encrypt one bit as a small-key TLWE (circuit-bootstrap input form).
    pub fn encrypt_bit(&mut self, sk: &SecretKey, bit: bool) -> Tlwe {
        let ct = allocate_and_encrypt_new_lwe_ciphertext(
            &sk.lwe,
            Plaintext(encode_bit(bit)),
            sk.params.lwe_noise(),
            CiphertextModulus::new_native(),
            &mut self.encryption_generator,
        );
        Tlwe(ct)
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use once_cell::sync::Lazy;

    pub(crate) static KEYS: Lazy<(SecretKey, BootKey)> = Lazy::new(|| {
        let mut client = Client::new();
        let sk = client.gen_secret_key(&Params::unit_test()).unwrap();
        let bk = client.gen_boot_key(&sk).unwrap();
        (sk, bk)
    });

    #[test]
    fn encode_decode_roundtrip_with_margin() {
        for bit in [false, true] {
            let enc = encode_bit(bit);
            assert_eq!(decode_bit(enc), bit);
            assert_eq!(decode_bit(enc.wrapping_add(1 << 59)), bit);
            assert_eq!(decode_bit(enc.wrapping_sub(1 << 59)), bit);
        }
    }

    #[test]
    fn tlwe_encrypt_decrypt_roundtrip() {
        let (sk, _) = &*KEYS;
        let mut client = Client::new();
        for bit in [false, true] {
            let ct = client.encrypt_bit(sk, bit);
            assert_eq!(sk.decrypt_bit(&ct).unwrap(), bit);
        }
    }

    #[test]
    fn trivial_weight_vectors_decode() {
        let (sk, _) = &*KEYS;
        let ct = trivial_trlwe(sk.params(), &[encode_bit(true), encode_bit(false), encode_bit(true)]);
        assert!(sk.decrypt_slot(&ct, 0).unwrap());
        assert!(!sk.decrypt_slot(&ct, 1).unwrap());
        assert!(sk.decrypt_slot(&ct, 2).unwrap());
        assert!(!sk.decrypt_slot(&ct, 3).unwrap());
    }

    #[test]
    fn cmux_selects_by_the_encrypted_bit() {
        let (sk, _) = &*KEYS;
        let mut client = Client::new();
        let mut ws = Workspace::new(sk.params()).unwrap();
        let t = trivial_trlwe_const(sk.params(), true);
        let f = trivial_trlwe_const(sk.params(), false);
        for bit in [false, true] {
            let sel = client.encrypt_ap_bit(sk, bit);
            let out = ws.cmux(&sel, &t, &f);
            assert_eq!(sk.decrypt_slot(&out, 0).unwrap(), bit);
        }
    }

    #[test]
    fn trivial_selector_behaves_like_an_encrypted_one() {
        let (sk, _) = &*KEYS;
        let mut ws = Workspace::new(sk.params()).unwrap();
        let t = trivial_trlwe_const(sk.params(), true);
        let f = trivial_trlwe_const(sk.params(), false);
        for bit in [false, true] {
            let sel = trivial_ap_bit(sk.params(), bit);
            let out = ws.cmux(&sel, &t, &f);
            assert_eq!(sk.decrypt_slot(&out, 0).unwrap(), bit);
        }
    }

    #[test]
    fn slot_shift_moves_packed_bits_down() {
        let (sk, _) = &*KEYS;
        let slots = [false, true, true, false, true];
        let raw: Vec<u64> = slots.iter().map(|&b| encode_bit(b)).collect();
        let mut ct = trivial_trlwe(sk.params(), &raw);
        trlwe_shift_down(&mut ct, 2);
        for (i, &b) in slots[2..].iter().enumerate() {
            assert_eq!(sk.decrypt_slot(&ct, i).unwrap(), b, "slot {i}");
        }
    }

    #[test]
    fn gate_bootstrap_refreshes_both_forms() {
        let (sk, bk) = &*KEYS;
        let mut client = Client::new();
        let mut ws = Workspace::new(sk.params()).unwrap();
        for bit in [false, true] {
            let ct = client.encrypt_bit(sk, bit);
            let fresh = bk.gate.refresh_tlwe(&ct).unwrap();
            assert_eq!(sk.decrypt_bit(&fresh).unwrap(), bit);
            let packed = bk.gate.refresh_trlwe(&mut ws, &ct).unwrap();
            assert_eq!(sk.decrypt_slot(&packed, 0).unwrap(), bit);
            assert_eq!(sk.decrypt_slot(&packed, 7).unwrap(), bit);
        }
    }

    #[test]
    fn extract_then_refresh_closes_the_loop() {
        let (sk, bk) = &*KEYS;
        let mut ws = Workspace::new(sk.params()).unwrap();
        let packed = trivial_trlwe(sk.params(), &[encode_bit(false), encode_bit(true)]);
        let slot1 = sample_extract(sk.params(), &packed, 1);
        assert!(sk.decrypt_bit(&slot1).unwrap());
        let refreshed = bk.gate.refresh_trlwe(&mut ws, &slot1).unwrap();
        assert!(sk.decrypt_slot(&refreshed, 0).unwrap());
    }

    #[test]
    fn circuit_bootstrap_yields_a_working_selector() {
        let (sk, bk) = &*KEYS;
        let mut client = Client::new();
        let mut ws = Workspace::new(sk.params()).unwrap();
        let t = trivial_trlwe_const(sk.params(), true);
        let f = trivial_trlwe_const(sk.params(), false);
        for bit in [false, true] {
            let ct = client.encrypt_bit(sk, bit);
            let sel = bk.circuit_bootstrap(&ct).unwrap();
            let out = ws.cmux(&sel, &t, &f);
            assert_eq!(sk.decrypt_slot(&out, 0).unwrap(), bit);
        }
    }

    #[test]
    fn mismatched_dimension_is_rejected() {
        let (sk, bk) = &*KEYS;
        let bogus = Tlwe(LweCiphertext::new(
            0u64,
            LweDimension(17).to_lwe_size(),
            CiphertextModulus::new_native(),
        ));
        assert!(matches!(sk.decrypt_bit(&bogus), Err(Error::BadKey(_))));
        assert!(matches!(bk.gate.refresh_tlwe(&bogus), Err(Error::BadKey(_))));
    }

    #[test]
    fn bad_decomposition_shapes_are_rejected() {
        let mut p = Params::unit_test();
        p.pbs_base_log = 16;
        p.pbs_level = 4; // 64 bits: out of range
        assert!(matches!(p.validate(), Err(Error::BadConfig(_))));
        let mut p = Params::unit_test();
        p.ks_level = 0;
        assert!(matches!(p.validate(), Err(Error::BadConfig(_))));
    }
}
