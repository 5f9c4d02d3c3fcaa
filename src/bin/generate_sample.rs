//! Writes a synthetic HSPICE transient listing for trying out the watcher
//! locally: an RC low-pass driven by a noisy pulse, printed over two pages.

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "generate_sample")]
#[command(about = "Write a synthetic HSPICE transient listing", long_about = None)]
struct Args {
    /// Listing to write
    #[arg(value_name = "OUTPUT", default_value = "sample_tran.lis")]
    output: PathBuf,

    /// Number of time points, split over two pages
    #[arg(value_name = "STEPS", default_value_t = 200)]
    steps: usize,
}

/// Column width of the printed table; every value fits with room for a gutter.
const WIDTH: usize = 14;

const SCALES: [(f64, &str); 9] = [
    (1e9, "G"),
    (1e3, "k"),
    (1.0, ""),
    (1e-3, "m"),
    (1e-6, "u"),
    (1e-9, "n"),
    (1e-12, "p"),
    (1e-15, "f"),
    (1e-18, "a"),
];

/// Format `v` the way HSPICE prints it: mantissa plus engineering suffix.
fn eng(v: f64) -> String {
    if v == 0.0 {
        return "0.".to_string();
    }
    let mag = v.abs();
    let (scale, suffix) = SCALES
        .iter()
        .copied()
        .find(|(scale, _)| mag >= *scale)
        .unwrap_or((1e-18, "a"));
    format!("{:.4}{suffix}", v / scale)
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

fn row(out: &mut String, cells: &[String]) {
    for cell in cells {
        let _ = write!(out, "{cell:<WIDTH$}");
    }
    out.push('\n');
}

fn main() -> Result<()> {
    let Args { output, steps } = Args::parse();

    let mut rng = SimpleRng::new(42);

    // RC low-pass, 1k / 1p, pulsed 0 -> 1.8 V at 5 ns
    let tau = 1e3 * 1e-12;
    let dt = 0.1e-9;
    let vdd = 1.8;

    let mut text = String::new();
    text.push_str(" ****** HSPICE -- synthetic transient listing\n");
    text.push_str(" ******\n");
    text.push_str(" * rc low-pass\n\n");
    text.push_str(" ****** transient analysis tnom=  25.000 temp=  25.000 *****\n");

    let mut v_out = 0.0;
    let page_len = steps.div_ceil(2).max(1);
    for page in 0..2 {
        text.push_str("x\n\n");
        row(&mut text, &["time".into(), "voltage".into(), "voltage".into(), "current".into()]);
        row(&mut text, &[String::new(), "in".into(), "out".into(), "vdd".into()]);

        let start = page * page_len;
        let end = ((page + 1) * page_len).min(steps);
        for step in start..end {
            let t = step as f64 * dt;
            let v_in = if t >= 5e-9 { vdd } else { 0.0 } + rng.gauss(0.0, 1e-3);
            v_out += (v_in - v_out) * (1.0 - (-dt / tau).exp());
            let i_vdd = -(v_in - v_out) / 1e3;
            row(&mut text, &[eng(t), eng(v_in), eng(v_out), eng(i_vdd)]);
        }
        text.push_str("y\n");
    }

    std::fs::write(&output, &text).with_context(|| format!("writing {}", output.display()))?;
    println!("Wrote {steps} time points over 2 pages to {}", output.display());
    Ok(())
}
