//! This module contains common utilities for simplifying the writing of
//! integration tests for this library.

#![cfg(test)]

use std::{fs::File, io::Read, rc::Rc};

use anyhow::anyhow;
use token_defect_explorer as tde;
use token_defect_explorer::{
    detector::{state::HasListing, Detector},
    source_map::{SourceMap, StaticSourceMap},
    vm,
    watchdog::LazyWatchdog,
};

/// Constructs a new detector for the assembly `lines`, which are laid out at
/// consecutive bytecode offsets.
///
/// It uses the default configuration and no source map.
#[allow(unused)] // It is actually
pub fn new_detector_from_lines(lines: &[&str]) -> Detector<HasListing> {
    new_detector_from_lines_with(lines, None, vm::Config::default())
}

/// Constructs a new detector for the assembly `lines` with the provided
/// `source_map` and `config`.
#[allow(unused)] // It is actually
pub fn new_detector_from_lines_with(
    lines: &[&str],
    source_map: Option<Rc<dyn SourceMap>>,
    config: vm::Config,
) -> Detector<HasListing> {
    init_logging();
    let listing = tde::disassembly::render_listing(lines);
    tde::new(listing, source_map, config, LazyWatchdog.in_rc())
}

/// Constructs a new detector for the contract whose listing is at
/// `<path>.asm` and whose source map is described in `<path>.json`.
#[allow(unused)] // It is actually
pub fn new_detector_from_path(
    path: impl Into<String>,
    config: vm::Config,
) -> anyhow::Result<Detector<HasListing>> {
    init_logging();
    let path = path.into();
    let listing = read_file(format!("{path}.asm"))?;
    let source_map = StaticSourceMap::from_json(&read_file(format!("{path}.json"))?)
        .map_err(|_| anyhow!("Could not parse source map"))?;

    Ok(tde::new(listing, Some(source_map.in_rc()), config, LazyWatchdog.in_rc()))
}

/// Reads the file at the provided `path` into a string.
#[allow(unused)] // It is actually
pub fn read_file(path: impl Into<String>) -> anyhow::Result<String> {
    let path = path.into();
    let mut file = File::open(&path).map_err(|_| anyhow!("File {path} not available"))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|_| anyhow!("File {path} could not be read"))?;

    Ok(contents)
}

/// Routes the library's logging to the test output, honouring `RUST_LOG`.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
