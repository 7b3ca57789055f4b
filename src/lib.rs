//! This library looks for defects in [EVM](https://ethereum.org/en/developers/docs/evm/)
//! token contracts by exploring their bytecode symbolically. It reports three
//! kinds of defect:
//!
//! - Transfers that do not check that `from` owns the token being moved.
//! - Privileged addresses, where the sender is compared against an owner-like
//!   storage variable that is not indexed by a mapping key.
//! - `Transfer` events that are emitted without any preceding storage write.
//!
//! It is a _best effort_ analysis. Gas is metered approximately, and calls
//! into other contracts are not followed.
//!
//! # How it Works
//!
//! From a very high level, the detection process is performed as follows:
//!
//! 1. A disassembly listing is normalized and tokenized into a sequence of
//!    [`disassembly::Instruction`]s, and related to the source map if one is
//!    provided.
//! 2. The instructions are partitioned into the basic blocks of a
//!    [`disassembly::cfg::Cfg`].
//! 3. The [`vm::explorer`] walks the graph depth-first from the entry block of
//!    each function of interest, interpreting every instruction over concrete
//!    and symbolic words, and forking at every branch that the solver cannot
//!    rule out.
//! 4. The [`defect`] trackers observe the execution as it happens, and raise
//!    the defect signals that end up in the [`report::AnalysisReport`].
//!
//! # Basic Usage
//!
//! For the most basic usage of the library, it is sufficient to construct a
//! detector and call the `.analyze` method.
//!
//! ```
//! use token_defect_explorer::{listing, vm, watchdog::LazyWatchdog};
//!
//! let listing = listing!["PUSH1 0x01", "PUSH1 0x02", "ADD", "STOP"];
//! let config = vm::Config::default();
//! let detector = token_defect_explorer::new(listing, None, config, LazyWatchdog.in_rc())
//!     .analyze()
//!     .unwrap();
//!
//! let report = detector.report();
//! assert_eq!(report.total_paths, 1);
//! assert!(!report.has_defects());
//! ```

#![warn(clippy::all, clippy::cargo, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)] // Allows for better API naming

pub mod constant;
pub mod defect;
pub mod detector;
pub mod disassembly;
pub mod error;
pub mod opcode;
pub mod pattern;
pub mod report;
pub mod source_map;
pub mod vm;
pub mod watchdog;

// Re-exports to provide the library interface.
pub use detector::new;
pub use report::AnalysisReport;
