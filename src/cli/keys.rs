//! API key management commands

use std::error::Error;
use std::io::{self, BufRead, IsTerminal, Write};

use crate::cli::default_resolver;
use crate::core::credentials::CredentialStoreError;
use crate::core::models::Provider;

pub fn store_key(provider: &str) -> Result<(), Box<dyn Error>> {
    let provider: Provider = provider.parse()?;

    let stdin = io::stdin();
    if stdin.is_terminal() {
        eprint!("Enter API key for {}: ", provider.display_name());
        io::stderr().flush()?;
    }
    let api_key = read_key(stdin.lock())?;

    match default_resolver().store(provider, &api_key) {
        Ok(()) => {
            println!("✅ Stored API key for {}", provider.display_name());
            Ok(())
        }
        Err(CredentialStoreError::EmptyValue) => {
            eprintln!("❌ No API key entered");
            std::process::exit(1);
        }
        Err(err) => Err(err.into()),
    }
}

pub fn remove_keys() -> Result<(), Box<dyn Error>> {
    default_resolver().remove_all()?;
    println!("✅ Removed all stored API keys");
    Ok(())
}

fn read_key(mut input: impl BufRead) -> io::Result<String> {
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_string())
}
