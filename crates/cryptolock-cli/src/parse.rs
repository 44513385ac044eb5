//! Argument parsers for values clap cannot read on its own.

use anyhow::{bail, Context};
use cryptolock_core::constants::FIXED_POINT_ONE;
use cryptolock_core::criterion::{CriterionDescriptor, CriterionSpec};
use cryptolock_core::types::{Address, Amount, Hash32};

const FIXED_POINT_DECIMALS: usize = 18;

/// Parse a decimal such as `1.25` into 1e18 fixed point.
pub fn parse_fixed(s: &str) -> anyhow::Result<Amount> {
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        bail!("empty decimal");
    }
    if frac.len() > FIXED_POINT_DECIMALS {
        bail!("{s}: more than {FIXED_POINT_DECIMALS} decimal places");
    }
    let whole: Amount = if whole.is_empty() {
        0
    } else {
        whole.parse().with_context(|| format!("invalid decimal {s}"))?
    };
    let frac: Amount = if frac.is_empty() {
        0
    } else {
        let padded = format!("{frac:0<width$}", width = FIXED_POINT_DECIMALS);
        padded.parse().with_context(|| format!("invalid decimal {s}"))?
    };
    whole
        .checked_mul(FIXED_POINT_ONE)
        .and_then(|w| w.checked_add(frac))
        .with_context(|| format!("{s} is out of range"))
}

/// Parse one `--criterion` argument into its wire descriptor.
///
/// Forms: `time:<secs>`, `burn:<sink>:<ratio>`, `price:<target>`,
/// `marketcap:<target>` and `multisig:<threshold>:<root>[:<signer,...>]`.
/// Ratios and targets are decimals in 1e18 fixed point.
pub fn parse_criterion(s: &str) -> anyhow::Result<CriterionDescriptor> {
    let parts: Vec<&str> = s.split(':').collect();
    let spec = match parts.as_slice() {
        ["time", secs] => CriterionSpec::Time {
            duration_secs: secs.parse().with_context(|| format!("invalid duration {secs}"))?,
        },
        ["burn", sink, ratio] => CriterionSpec::Burn {
            sink: parse_address(sink)?,
            target_ratio: parse_fixed(ratio)?,
        },
        ["price", target] => CriterionSpec::Price { target_price: parse_fixed(target)? },
        ["marketcap", target] => {
            CriterionSpec::MarketCap { target_market_cap: parse_fixed(target)? }
        }
        ["multisig", threshold, root, rest @ ..] if rest.len() <= 1 => {
            let announced_signers = match rest.first() {
                Some(list) if !list.is_empty() => {
                    list.split(',').map(parse_address).collect::<anyhow::Result<Vec<_>>>()?
                }
                _ => Vec::new(),
            };
            CriterionSpec::Multisig {
                threshold: threshold
                    .parse()
                    .with_context(|| format!("invalid threshold {threshold}"))?,
                announced_signers,
                whitelist_root: Hash32::from_hex(root)
                    .with_context(|| format!("invalid whitelist root {root}"))?,
                listing_type: 0,
            }
        }
        _ => bail!("unrecognised criterion {s:?}"),
    };
    Ok(spec.encode())
}

fn parse_address(s: &str) -> anyhow::Result<Address> {
    Address::from_hex(s).with_context(|| format!("invalid address {s}"))
}
