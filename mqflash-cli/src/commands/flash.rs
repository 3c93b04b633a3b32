//! Flash, check, and erase command implementations.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use mqflash::{chip, FlashImage, Port, ProgramOptions, Programmer};
use std::fs;
use std::path::Path;

use crate::{resolve_port, Cli};

/// Flash command implementation.
pub(crate) fn cmd_flash(cli: &Cli, image_path: &Path, options: &ProgramOptions) -> Result<()> {
    let bytes = fs::read(image_path)
        .with_context(|| format!("failed to read {}", image_path.display()))?;
    let image = FlashImage::new(bytes).context("firmware image rejected")?;

    if !cli.quiet {
        eprintln!(
            "{} {} ({} bytes, {} sectors)",
            style("ℹ").blue(),
            image_path.display(),
            image.len(),
            image.sector_count()
        );
    }

    let port_name = resolve_port(cli)?;
    let mut programmer =
        Programmer::open(&port_name).with_context(|| format!("failed to open {port_name}"))?;

    let bar = if cli.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(image.sector_count() as u64)
    };
    bar.set_style(ProgressStyle::with_template(
        "{bar:40.cyan/blue} {pos}/{len} sectors",
    )?);

    let result = programmer.initialize().and_then(|()| {
        programmer.program_with_progress(&image, options, |done, _| {
            bar.set_position(done as u64);
        })
    });
    bar.finish_and_clear();

    // Release the port on every exit path; a port left open blocks the
    // next run from acquiring it.
    let mut port = programmer.into_port();
    let _ = port.close();

    result.with_context(|| format!("programming failed on {port_name}"))?;

    if !cli.quiet {
        eprintln!(
            "{} Programmed {} bytes ({} sectors)",
            style("✓").green(),
            image.len(),
            image.sector_count()
        );
    }
    Ok(())
}

/// Check command implementation: pure validation, no hardware I/O.
pub(crate) fn cmd_check(image_path: &Path) -> Result<()> {
    let bytes = fs::read(image_path)
        .with_context(|| format!("failed to read {}", image_path.display()))?;
    mqflash::check_image(&bytes)
        .with_context(|| format!("{} rejected", image_path.display()))?;

    println!(
        "OK: {} bytes, {} sectors, capacity {} bytes",
        bytes.len(),
        bytes.len().div_ceil(chip::SECTOR_SIZE),
        chip::FLASH_CAPACITY
    );
    Ok(())
}

/// Erase command implementation: full-chip erase without programming.
pub(crate) fn cmd_erase(cli: &Cli) -> Result<()> {
    let port_name = resolve_port(cli)?;
    let mut programmer =
        Programmer::open(&port_name).with_context(|| format!("failed to open {port_name}"))?;

    let options = ProgramOptions::default();
    let result = programmer
        .initialize()
        .and_then(|()| programmer.erase_flash(&options));

    let mut port = programmer.into_port();
    let _ = port.close();

    result.with_context(|| format!("erase failed on {port_name}"))?;

    if !cli.quiet {
        eprintln!("{} Flash erased", style("✓").green());
    }
    Ok(())
}
