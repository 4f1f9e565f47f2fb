//! Engine CLI
//!
//! Subcommands (exit 0 on success, nonzero with a diagnostic on stderr):
//!
//! ```text
//! hedfa genkey   --out <key>            [--test-params]
//! hedfa genbkey  --key <key>  --out <bkey>
//! hedfa enc      --key <key>  --in <plaintext> --out <blob>
//! hedfa dec      --key <key>  --in <acceptance>
//! hedfa run      --mode offline|qtrlwe|reversed|qtrlwe2
//!                --spec <dfa> --in <blob> --out <acceptance>
//!                [--bkey <bkey>] [--ap <k>] [--bootstrap-interval <n>]
//!                [--first-lut-depth <d1>] [--queue-size <q>]
//! hedfa ltl2spec --formula <f> --ap <k> [--out <path>]
//! hedfa ltl2dot  --formula <f> --ap <k> [--minimized] [--reversed]
//!                [--negated] [--out <path>]
//! ```
//!
//! Logging goes through `tracing`; set `RUST_LOG` to adjust verbosity.

#![forbid(unsafe_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use anyhow::{anyhow, bail, Context};
use hedfa::archive::{
    self, encrypt_file, file_digest, read_boot_key, read_secret_key, write_boot_key,
    write_secret_key, ForwardStream, ReversedStream,
};
use hedfa::fhe::{Client, Params};
use hedfa::lut::{BatchedLutEvaluator, LutConfig};
use hedfa::offline::OfflineEvaluator;
use hedfa::online::{BackstreamEvaluator, ForwardEvaluator};
use hedfa::runner::{check_symbol_alignment, Runner};
use hedfa::Graph;

fn parse_flag(args: &[String], key: &str) -> Option<String> {
    let mut it = args.iter();
    while let Some(a) = it.next() {
        if a == key {
            return it.next().cloned();
        }
    }
    None
}

fn has_flag(args: &[String], key: &str) -> bool {
    args.iter().any(|a| a == key)
}

fn required(args: &[String], key: &str) -> anyhow::Result<String> {
    parse_flag(args, key).ok_or_else(|| anyhow!("missing required flag {key}"))
}

fn required_path(args: &[String], key: &str) -> anyhow::Result<PathBuf> {
    required(args, key).map(PathBuf::from)
}

fn parse_usize(args: &[String], key: &str) -> anyhow::Result<Option<usize>> {
    match parse_flag(args, key) {
        None => Ok(None),
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{key} must be a number (got `{s}`)")),
    }
}

fn hex32(digest: &[u8; 32]) -> String {
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

const USAGE: &str = "usage: hedfa <genkey|genbkey|enc|dec|run|ltl2spec|ltl2dot> [flags]";

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "hedfa=info".to_string()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(command) = args.get(1) else {
        bail!("{USAGE}");
    };
    match command.as_str() {
        "genkey" => cmd_genkey(&args),
        "genbkey" => cmd_genbkey(&args),
        "enc" => cmd_enc(&args),
        "dec" => cmd_dec(&args),
        "run" => cmd_run(&args),
        "ltl2spec" => cmd_ltl2spec(&args),
        "ltl2dot" => cmd_ltl2dot(&args),
        other => bail!("unknown subcommand `{other}`\n{USAGE}"),
    }
}

fn cmd_genkey(args: &[String]) -> anyhow::Result<()> {
    let out = required_path(args, "--out")?;
    let params = if has_flag(args, "--test-params") {
        eprintln!("WARNING: --test-params keys are NOT SECURE; testing only.");
        Params::unit_test()
    } else {
        Params::default()
    };
    let mut client = Client::new();
    let key = client.gen_secret_key(&params)?;
    write_secret_key(&out, &key)?;
    eprintln!("wrote secret key {} ({})", out.display(), hex32(&file_digest(&out)?));
    Ok(())
}

fn cmd_genbkey(args: &[String]) -> anyhow::Result<()> {
    let key_path = required_path(args, "--key")?;
    let out = required_path(args, "--out")?;
    let key = read_secret_key(&key_path)?;
    eprintln!("generating bootstrapping key (this can take a while)...");
    let boot = Client::new().gen_boot_key(&key)?;
    write_boot_key(&out, &boot)?;
    eprintln!("wrote boot key {} ({})", out.display(), hex32(&file_digest(&out)?));
    Ok(())
}

fn cmd_enc(args: &[String]) -> anyhow::Result<()> {
    let key = read_secret_key(&required_path(args, "--key")?)?;
    let input = required_path(args, "--in")?;
    let output = required_path(args, "--out")?;
    let mut client = Client::new();
    let bits = encrypt_file(&mut client, &key, &input, &output)?;
    eprintln!("encrypted {} -> {} ({bits} AP-bits)", input.display(), output.display());
    Ok(())
}

fn cmd_dec(args: &[String]) -> anyhow::Result<()> {
    let key = read_secret_key(&required_path(args, "--key")?)?;
    let ct = archive::read_acceptance(&required_path(args, "--in")?)?;
    let bit = key.decrypt_bit(&ct)?;
    println!("{}", u8::from(bit));
    Ok(())
}

fn cmd_run(args: &[String]) -> anyhow::Result<()> {
    let mode = required(args, "--mode")?;
    let spec = required_path(args, "--spec")?;
    let input = required_path(args, "--in")?;
    let output = required_path(args, "--out")?;
    let num_ap = parse_usize(args, "--ap")?.unwrap_or(1);
    let interval = parse_usize(args, "--bootstrap-interval")?;

    let graph = Graph::from_spec(&spec)?;
    let boot = match parse_flag(args, "--bkey") {
        Some(p) => Some(read_boot_key(Path::new(&p))?),
        None => None,
    };
    if mode != "offline" && boot.is_none() {
        bail!("--bkey is required for online modes");
    }

    let stop = AtomicBool::new(false);
    let started = std::time::Instant::now();
    let result = match mode.as_str() {
        "offline" => {
            let mut stream = ReversedStream::open(&input)?;
            check_symbol_alignment(stream.size(), num_ap)?;
            let params = stream.params().clone();
            if let Some(b) = &boot {
                if b.params() != &params {
                    bail!("boot key and ciphertext blob use different parameter sets");
                }
            }
            let eval = OfflineEvaluator::new(
                &graph,
                stream.size(),
                &params,
                boot.as_ref().map(|b| &b.gate),
                interval,
            )?;
            let mut runner = Runner::Offline(eval);
            runner.drive(&stop, || stream.next())?;
            runner.result()?
        }
        "qtrlwe" | "reversed" | "qtrlwe2" => {
            let boot = boot.as_ref().expect("checked above");
            let mut stream = ForwardStream::open(&input)?;
            check_symbol_alignment(stream.size(), num_ap)?;
            let params = stream.params().clone();
            if boot.params() != &params {
                bail!("boot key and ciphertext blob use different parameter sets");
            }
            let mut runner = match mode.as_str() {
                "qtrlwe" => {
                    Runner::Forward(ForwardEvaluator::new(&graph, &params, &boot.gate, interval)?)
                }
                "reversed" => Runner::Backstream(BackstreamEvaluator::new(
                    &graph,
                    &params,
                    &boot.gate,
                    interval,
                )?),
                _ => {
                    let mut cfg = LutConfig::default();
                    if let Some(d1) = parse_usize(args, "--first-lut-depth")? {
                        cfg.first_depth = d1;
                    }
                    if let Some(q) = parse_usize(args, "--queue-size")? {
                        cfg.queue = q;
                    }
                    Runner::BatchedLut(BatchedLutEvaluator::new(&graph, &params, boot, cfg)?)
                }
            };
            runner.drive(&stop, || stream.next())?;
            runner.result()?
        }
        other => bail!("unknown mode `{other}` (offline|qtrlwe|reversed|qtrlwe2)"),
    };

    archive::write_acceptance(&output, &result)?;
    eprintln!(
        "evaluated {} in {:.1?}; acceptance ciphertext -> {}",
        input.display(),
        started.elapsed(),
        output.display()
    );
    Ok(())
}

fn load_ltl_graph(args: &[String]) -> anyhow::Result<Graph> {
    let formula = required(args, "--formula")?;
    let num_ap = parse_usize(args, "--ap")?
        .ok_or_else(|| anyhow!("missing required flag --ap"))?;
    Ok(Graph::from_ltl(&formula, num_ap)?)
}

fn write_text_output(args: &[String], render: impl Fn(&mut dyn Write) -> std::io::Result<()>) -> anyhow::Result<()> {
    match parse_flag(args, "--out") {
        Some(path) => {
            let mut file = std::fs::File::create(&path)
                .with_context(|| format!("create {path}"))?;
            render(&mut file)?;
        }
        None => {
            let stdout = std::io::stdout();
            render(&mut stdout.lock())?;
        }
    }
    Ok(())
}

fn cmd_ltl2spec(args: &[String]) -> anyhow::Result<()> {
    let graph = load_ltl_graph(args)?;
    write_text_output(args, |mut out| graph.dump(&mut out))
}

fn cmd_ltl2dot(args: &[String]) -> anyhow::Result<()> {
    let mut graph = load_ltl_graph(args)?;
    if has_flag(args, "--reversed") {
        graph = graph.reversed();
    }
    if has_flag(args, "--negated") {
        graph = graph.negated();
    }
    if has_flag(args, "--minimized") {
        graph = graph.minimized();
    }
    write_text_output(args, |mut out| graph.dump_dot(&mut out))
}
