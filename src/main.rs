use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand, error::ErrorKind};
use secrecy::{ExposeSecret, SecretString};
use tracing_subscriber::EnvFilter;

use fragment_seal::backup::{DEMO_BACKUP_CODE, DEMO_FRAGMENTS, INVALID_INPUTS};
use fragment_seal::config::{DEFAULT_ITERATIONS, MAX_ITERATIONS};
use fragment_seal::crypt::SALT_LEN;
use fragment_seal::{
    Error, Fragments, KdfParams, Retrieval, SaltStore, SealConfig, debug_retrieve,
    retrieve_backup_code, seal_backup_code,
};

/// Number of fragments the command line accepts.
const FRAGMENT_COUNT: usize = 3;

#[derive(Parser, Debug)]
#[command(author, version, about = "Seal a backup code behind several secret fragments")]
struct Cli {
    /// Directory holding the salt and the encrypted backup code.
    #[arg(long, value_name = "PATH", global = true, default_value = ".")]
    dir: PathBuf,

    /// Log debug output to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate the salt shared by every seal and retrieve run.
    Salt {
        /// Replace an existing salt. Blobs sealed with the old one become unrecoverable.
        #[arg(long)]
        force: bool,
    },
    /// Seal a backup code under three fragments.
    Seal(SealArgs),
    /// Recover the backup code.
    Retrieve(FragmentArgs),
    /// Recover the backup code while logging diagnostics.
    Debug(DebugArgs),
}

#[derive(Args, Debug)]
struct FragmentArgs {
    /// The three secret fragments, in order. Prompted for when omitted.
    #[arg(value_name = "FRAGMENT")]
    fragments: Vec<String>,
}

#[derive(Args, Debug)]
struct SealArgs {
    #[command(flatten)]
    fragments: FragmentArgs,

    /// Backup code to seal. Prompted for when omitted.
    #[arg(long, value_name = "CODE", conflicts_with = "demo")]
    code: Option<String>,

    /// Seal the demonstration backup code under the demonstration fragments.
    #[arg(long, conflicts_with = "fragments")]
    demo: bool,

    /// PBKDF2 iterations; recorded in the blob so retrieval needs no flag.
    #[arg(
        long,
        value_name = "N",
        default_value_t = DEFAULT_ITERATIONS,
        value_parser = clap::value_parser!(u32).range(DEFAULT_ITERATIONS as i64..=MAX_ITERATIONS as i64)
    )]
    iterations: u32,
}

#[derive(Args, Debug)]
struct DebugArgs {
    /// The three secret fragments, in order. The demonstration set is used when omitted.
    #[arg(value_name = "FRAGMENT")]
    fragments: Vec<String>,

    /// Also log the derived key. Never use this with real fragments.
    #[arg(long)]
    reveal_key: bool,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose || matches!(cli.command, Command::Debug(_)));

    let config = SealConfig::in_dir(&cli.dir);
    match cli.command {
        Command::Salt { force } => execute_salt(&config, force),
        Command::Seal(args) => execute_seal(config, args),
        Command::Retrieve(args) => execute_retrieve(&config, args),
        Command::Debug(args) => execute_debug(&config, args),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("fragment_seal=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .init();
}

fn execute_salt(config: &SealConfig, force: bool) -> Result<ExitCode> {
    let store = SaltStore::new(&config.salt_path);
    match store.generate(force) {
        Ok(_) => {}
        Err(err @ Error::SaltExists { .. }) => {
            eprintln!("{err}");
            eprintln!("Pass --force to replace it anyway.");
            return Ok(ExitCode::FAILURE);
        }
        Err(err) => return Err(err.into()),
    }

    println!("Salt generated and saved to '{}'", store.path().display());
    println!("Salt length: {SALT_LEN} bytes");

    let salt = store.load()?;
    println!("Verification: loaded salt with {} bytes", salt.as_bytes().len());
    Ok(ExitCode::SUCCESS)
}

fn execute_seal(config: SealConfig, args: SealArgs) -> Result<ExitCode> {
    let config = config.with_kdf(KdfParams::pbkdf2_sha256(args.iterations));

    let (fragments, code) = if args.demo {
        (
            Fragments::new(DEMO_FRAGMENTS),
            SecretString::from(DEMO_BACKUP_CODE.to_string()),
        )
    } else {
        let fragments = collect_fragments(args.fragments.fragments)?;
        let code = match args.code {
            Some(code) => code,
            None => prompt("Enter backup code")?,
        };
        (fragments, SecretString::from(code))
    };

    let blob = seal_backup_code(&config, &fragments, &code)?;

    println!(
        "Encrypted backup code written to '{}'",
        config.blob_path.display()
    );
    println!("Encrypted backup code (base64):");
    println!("{}", blob.to_base64()?);
    Ok(ExitCode::SUCCESS)
}

fn execute_retrieve(config: &SealConfig, args: FragmentArgs) -> Result<ExitCode> {
    let fragments = collect_fragments(args.fragments)?;
    report(retrieve_backup_code(config, &fragments)?)
}

fn execute_debug(config: &SealConfig, args: DebugArgs) -> Result<ExitCode> {
    let fragments = match args.fragments.len() {
        0 => {
            println!("Testing with the demonstration fragments");
            Fragments::new(DEMO_FRAGMENTS)
        }
        FRAGMENT_COUNT => Fragments::new(args.fragments),
        n => usage_error(n),
    };
    report(debug_retrieve(config, &fragments, args.reveal_key)?)
}

fn report(retrieval: Retrieval) -> Result<ExitCode> {
    match retrieval {
        Retrieval::Recovered(code) => {
            println!("Your backup code is: {}", code.expose_secret());
            Ok(ExitCode::SUCCESS)
        }
        Retrieval::InvalidInputs => {
            println!("{INVALID_INPUTS}");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Takes the fragments from the command line, or prompts for all of them
/// when none were given.
fn collect_fragments(given: Vec<String>) -> Result<Fragments> {
    match given.len() {
        0 => {
            let mut parts = Vec::with_capacity(FRAGMENT_COUNT);
            for i in 1..=FRAGMENT_COUNT {
                parts.push(prompt(&format!("Enter secret part {i}"))?);
            }
            Ok(Fragments::new(parts))
        }
        FRAGMENT_COUNT => Ok(Fragments::new(given)),
        n => usage_error(n),
    }
}

fn usage_error(given: usize) -> ! {
    Cli::command()
        .error(
            ErrorKind::WrongNumberOfValues,
            format!("expected {FRAGMENT_COUNT} fragments or none, got {given}"),
        )
        .exit()
}

/// Reads one line from stdin. Only the line terminator is removed.
fn prompt(label: &str) -> Result<String> {
    let mut stdout = io::stdout().lock();
    write!(stdout, "{label}: ")?;
    stdout.flush()?;

    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        bail!("unexpected end of input while reading '{label}'");
    }
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    Ok(line)
}
