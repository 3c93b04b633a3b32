//! Serial port listing.

use anyhow::{Context, Result};
use console::style;
use mqflash::{NativePortEnumerator, PortEnumerator};

/// List available serial ports, optionally as JSON on stdout.
pub(crate) fn cmd_ports(json: bool) -> Result<()> {
    let ports =
        NativePortEnumerator::list_ports().context("failed to enumerate serial ports")?;

    if json {
        let values: Vec<_> = ports
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name,
                    "vid": p.vid,
                    "pid": p.pid,
                    "manufacturer": p.manufacturer,
                    "product": p.product,
                    "serial_number": p.serial_number,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&values)?);
        return Ok(());
    }

    if ports.is_empty() {
        eprintln!("No serial ports detected.");
        return Ok(());
    }

    for port in ports {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => {
                let product = port.product.as_deref().unwrap_or("unknown device");
                println!(
                    "{}  {vid:04x}:{pid:04x}  {}",
                    port.name,
                    style(product).dim()
                );
            }
            _ => println!("{}", port.name),
        }
    }
    Ok(())
}
