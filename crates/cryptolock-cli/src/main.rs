//! cryptolock: command-line front end for the lock ledger.
//!
//! Every invocation opens the state database, applies one command and exits.
//! The token ledger and price oracle are the local sled-backed ones, so a
//! full lock lifecycle can be driven from the shell:
//!
//!   cryptolock register-token --symbol TKN
//!   cryptolock --caller <addr> approve --token <t> --amount 100
//!   cryptolock --caller <addr> lock --token <t> --amount 100 \
//!       --expr "( c1 a c2 ) o c3" --criterion time:86400 ...
//!   cryptolock --caller <addr> unlock --id 0

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use cryptolock_core::lock::UnlockMode;
use cryptolock_core::types::{Address, Amount, CriterionId, Hash32, LockId, Timestamp};
use cryptolock_crypto::{random_address, MerkleTree};
use cryptolock_query::LockQuery;
use cryptolock_state::{
    EngineConfig, LocalLedger, LocalOracle, LockEngine, LockRequest, StateDb, TokenLedger,
};

mod parse;
use parse::{parse_criterion, parse_fixed};

type Engine = LockEngine<LocalLedger, LocalOracle>;

// ── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "cryptolock", version, about = "Conditional token locks")]
struct Args {
    /// Directory for the persistent state database.
    #[arg(long, global = true, default_value = "~/.cryptolock/data")]
    data_dir: PathBuf,

    /// Engine config JSON. Replaces the stored config when given.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Acting address for commands that need one.
    #[arg(long, global = true)]
    caller: Option<Address>,

    /// Override the current Unix time (seconds).
    #[arg(long, global = true)]
    now: Option<Timestamp>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a fresh random address.
    NewAddress,

    /// Register a token in the local ledger.
    RegisterToken {
        /// Token address. A random one is generated when omitted.
        #[arg(long)]
        token: Option<Address>,
        #[arg(long)]
        symbol: String,
        #[arg(long, default_value_t = 18)]
        decimals: u8,
    },

    /// Mint base units of a token to an address.
    Mint {
        #[arg(long)]
        token: Address,
        #[arg(long)]
        to: Address,
        #[arg(long)]
        amount: Amount,
    },

    /// Allow the custody address to pull the caller's tokens.
    Approve {
        #[arg(long)]
        token: Address,
        #[arg(long)]
        amount: Amount,
    },

    /// Send the caller's tokens to another address.
    Transfer {
        #[arg(long)]
        token: Address,
        #[arg(long)]
        to: Address,
        #[arg(long)]
        amount: Amount,
    },

    /// Print a token balance.
    Balance {
        #[arg(long)]
        token: Address,
        /// Holder. Defaults to the caller.
        #[arg(long)]
        holder: Option<Address>,
    },

    /// Set the oracle price of a token (decimal, e.g. `1.5`).
    SetPrice {
        #[arg(long)]
        token: Address,
        #[arg(long)]
        price: String,
    },

    /// Toggle whether an address is accepted as a burn sink.
    BurnSink {
        #[arg(long)]
        sink: Address,
    },

    /// Inspect or change the treasury settings.
    Fee {
        #[command(subcommand)]
        action: FeeAction,
    },

    /// Lock the caller's tokens behind a policy expression.
    Lock {
        #[arg(long)]
        token: Address,
        #[arg(long)]
        amount: Amount,
        /// Whitespace-separated expression, e.g. `( c1 a c2 ) o c3`.
        #[arg(long = "expr")]
        expression: String,
        /// One per placeholder, in order: `time:<secs>`, `burn:<sink>:<ratio>`,
        /// `price:<target>`, `marketcap:<target>`,
        /// `multisig:<threshold>:<root>[:<signer,...>]`.
        #[arg(long = "criterion")]
        criteria: Vec<String>,
    },

    /// Sign a multisig criterion as the caller.
    Sign {
        #[arg(long)]
        criterion: CriterionId,
        /// Merkle proof siblings (hex, comma-separated).
        #[arg(long, value_delimiter = ',')]
        proof: Vec<Hash32>,
    },

    /// Unlock a lock whose policy holds.
    Unlock {
        #[arg(long)]
        id: LockId,
        /// Recipient. Defaults to the caller.
        #[arg(long)]
        to: Option<Address>,
        /// Pay out only this fraction (decimal in (0, 1]).
        #[arg(long)]
        fraction: Option<String>,
    },

    /// Print whether a lock's policy currently holds.
    Check {
        #[arg(long)]
        id: LockId,
    },

    /// Describe one lock and its criteria.
    Show {
        #[arg(long)]
        id: LockId,
        /// Print the stored record as JSON instead.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// List locks as JSON, optionally only those of one owner.
    List {
        #[arg(long)]
        owner: Option<Address>,
    },

    /// Build a whitelist Merkle root and per-address proofs.
    Whitelist {
        /// Member addresses (comma-separated).
        #[arg(long, value_delimiter = ',', required = true)]
        addresses: Vec<Address>,
    },
}

#[derive(Subcommand, Debug)]
enum FeeAction {
    /// Print the current settings.
    Show,
    /// Set the treasury wallet. Omit the address to clear it.
    Wallet { address: Option<Address> },
    /// Set the flat-fee token. Omit the address to clear it.
    Token { address: Option<Address> },
    /// Set the flat fee in base units of the fee token.
    Amount { amount: Amount },
    /// Set the percentage fee (decimal fraction, e.g. `0.01`).
    Percent { percent: String },
    /// Switch a token between flat and percentage fees.
    Toggle { token: Address },
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,cryptolock=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Command::NewAddress = args.command {
        println!("{}", random_address());
        return Ok(());
    }
    if let Command::Whitelist { addresses } = &args.command {
        return cmd_whitelist(addresses);
    }

    let now = args.now.unwrap_or_else(|| chrono::Utc::now().timestamp());
    let mut engine = open_engine(&args)?;
    run(&mut engine, &args, now)
}

fn run(engine: &mut Engine, args: &Args, now: Timestamp) -> anyhow::Result<()> {
    match &args.command {
        Command::NewAddress | Command::Whitelist { .. } => Ok(()),

        Command::RegisterToken { token, symbol, decimals } => {
            let token = token.unwrap_or_else(random_address);
            engine.ledger().register_token(&token, symbol, *decimals)?;
            println!("{token}");
            Ok(())
        }

        Command::Mint { token, to, amount } => {
            engine.ledger().mint(token, to, *amount)?;
            Ok(())
        }

        Command::Approve { token, amount } => {
            let owner = require_caller(args)?;
            let custody = engine.custody_address();
            engine.ledger().approve(token, &owner, &custody, *amount)?;
            Ok(())
        }

        Command::Transfer { token, to, amount } => {
            let from = require_caller(args)?;
            engine.ledger_mut().transfer(token, &from, to, *amount)?;
            Ok(())
        }

        Command::Balance { token, holder } => {
            let holder = match holder {
                Some(h) => *h,
                None => require_caller(args)?,
            };
            println!("{}", engine.ledger().balance_of(token, &holder)?);
            Ok(())
        }

        Command::SetPrice { token, price } => {
            engine.oracle().set_price(token, parse_fixed(price)?)?;
            Ok(())
        }

        Command::BurnSink { sink } => {
            let authorised = engine.toggle_burn_authorise(sink)?;
            println!("{sink} authorised: {authorised}");
            Ok(())
        }

        Command::Fee { action } => cmd_fee(engine, action),

        Command::Lock { token, amount, expression, criteria } => {
            let owner = require_caller(args)?;
            let symbols: Vec<&str> = expression.split_whitespace().collect();
            let descriptors = criteria
                .iter()
                .map(|c| parse_criterion(c))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let req = LockRequest::new(*token, *amount, symbols.as_slice(), descriptors);
            let id = engine.create(&owner, &req, now)?;
            println!("{id}");
            Ok(())
        }

        Command::Sign { criterion, proof } => {
            let signer = require_caller(args)?;
            let status = engine.sign(&signer, *criterion, proof)?;
            println!("{status:?}");
            Ok(())
        }

        Command::Unlock { id, to, fraction } => {
            let caller = require_caller(args)?;
            let recipient = to.unwrap_or(caller);
            let mode = match fraction {
                Some(f) => UnlockMode::Fraction { ratio: parse_fixed(f)? },
                None => UnlockMode::Full,
            };
            let paid = engine.unlock_with(&caller, *id, &recipient, mode, now)?;
            println!("{paid}");
            Ok(())
        }

        Command::Check { id } => {
            println!("{}", LockQuery::new(&*engine).check_unlock(*id, now)?);
            Ok(())
        }

        Command::Show { id, json } => {
            let query = LockQuery::new(&*engine);
            if *json {
                let lock = query.lock_record(*id)?;
                println!("{}", serde_json::to_string_pretty(&lock)?);
            } else {
                println!("{}", query.describe(*id, now)?);
            }
            Ok(())
        }

        Command::List { owner } => {
            let query = LockQuery::new(&*engine);
            let locks = match owner {
                Some(o) => query.view_data(o)?,
                None => query.all_locks()?,
            };
            println!("{}", serde_json::to_string_pretty(&locks)?);
            Ok(())
        }
    }
}

fn cmd_fee(engine: &mut Engine, action: &FeeAction) -> anyhow::Result<()> {
    match action {
        FeeAction::Show => {
            println!("{}", serde_json::to_string_pretty(&engine.config().fee)?);
        }
        FeeAction::Wallet { address } => engine.set_fee_wallet(*address)?,
        FeeAction::Token { address } => engine.set_fee_token(*address)?,
        FeeAction::Amount { amount } => engine.set_fee_amount(*amount)?,
        FeeAction::Percent { percent } => engine.set_fee_percent(parse_fixed(percent)?)?,
        FeeAction::Toggle { token } => {
            let mode = engine.toggle_fee_type(token)?;
            println!("{token}: {mode:?}");
        }
    }
    Ok(())
}

fn cmd_whitelist(addresses: &[Address]) -> anyhow::Result<()> {
    let tree = MerkleTree::from_addresses(addresses);
    let mut proofs = BTreeMap::new();
    for address in addresses {
        let proof = tree
            .proof_for_address(address)
            .with_context(|| format!("no proof for {address}"))?;
        proofs.insert(address.to_hex(), proof);
    }
    let out = serde_json::json!({ "root": tree.root(), "proofs": proofs });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn require_caller(args: &Args) -> anyhow::Result<Address> {
    match args.caller {
        Some(c) => Ok(c),
        None => bail!("this command needs --caller"),
    }
}

// ── Engine setup ─────────────────────────────────────────────────────────────

fn open_engine(args: &Args) -> anyhow::Result<Engine> {
    let data_dir = expand_tilde(&args.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let db = Arc::new(StateDb::open(&data_dir).context("opening state database")?);
    let ledger = LocalLedger::new(Arc::clone(&db));
    let oracle = LocalOracle::new(Arc::clone(&db));

    match args.config.as_deref() {
        Some(path) => {
            let config = load_config(path)?;
            info!(path = %path.display(), "applying engine config");
            Ok(LockEngine::new(db, ledger, oracle, config)?)
        }
        None => {
            if db.get_config()?.is_none() {
                warn!("no stored engine config; using defaults");
            }
            Ok(LockEngine::open(db, ledger, oracle)?)
        }
    }
}

fn load_config(path: &Path) -> anyhow::Result<EngineConfig> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading engine config from {}", path.display()))?;
    serde_json::from_str(&json).context("parsing engine config JSON")
}

/// Expand a leading `~` to the user's home directory (`HOME` or `USERPROFILE`).
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
