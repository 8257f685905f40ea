//! Address parsing.

use anyhow::Result;

pub fn run(address: &str, default_port: u16) -> Result<()> {
    let addr = strata_io::parse_address_with_default_port(address, default_port)?;
    println!("{addr}");
    Ok(())
}
