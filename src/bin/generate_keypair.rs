//! Account keypair generation utility for registration.
//!
//! Generates a secp256k1 account keypair:
//! - Private key (0x-prefixed hex) written to file with 0600 permissions
//! - Account address printed to stdout
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin generate_keypair -- [--out <path>] [--force]
//! ```
//!
//! Without `--out` both halves are printed; use this only on a trusted
//! terminal.

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::io::Write;
use std::path::PathBuf;

use healthledger::domain::AccountKeys;

const USAGE: &str = "Usage: generate_keypair [--out <path>] [--force]";

fn main() {
    let mut args = std::env::args().skip(1);
    let mut out_path: Option<PathBuf> = None;
    let mut force = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--out" => {
                let p = args.next().unwrap_or_default();
                if p.is_empty() {
                    eprintln!("{USAGE}");
                    std::process::exit(2);
                }
                out_path = Some(PathBuf::from(p));
            }
            "--force" => force = true,
            "-h" | "--help" => {
                println!(
                    "{USAGE}\n\nGenerates an account keypair. With --out, writes the private key to <path> with 0600 permissions and prints only the address."
                );
                return;
            }
            _ => {
                eprintln!("Unknown arg: {arg}\n{USAGE}");
                std::process::exit(2);
            }
        }
    }

    let keys = AccountKeys::generate();

    let Some(out_path) = out_path else {
        println!("PUBLIC_KEY={}", keys.public_key());
        println!("PRIVATE_KEY={}", keys.private_key());
        return;
    };

    if out_path.exists() && !force {
        eprintln!("Refusing to overwrite existing file {out_path:?}. Use --force.");
        std::process::exit(3);
    }

    if let Some(parent) = out_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let mut opts = std::fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        opts.mode(0o600);
    }

    let mut file = opts.open(&out_path).unwrap_or_else(|e| {
        eprintln!("Failed to open {out_path:?}: {e}");
        std::process::exit(4);
    });

    if let Err(e) = file
        .write_all(keys.private_key().as_bytes())
        .and_then(|()| file.write_all(b"\n"))
    {
        eprintln!("Failed to write {out_path:?}: {e}");
        std::process::exit(4);
    }

    // Print only non-secret material.
    println!("Wrote private key to {out_path:?}");
    println!("PUBLIC_KEY={}", keys.public_key());
}
