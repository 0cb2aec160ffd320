#![warn(clippy::pedantic)]
// Noisy doc/signature lints — would require annotating hundreds of pub functions
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
// Style preference — keeping format!("{}", x) over format!("{x}") for readability with complex exprs
#![allow(clippy::uninlined_format_args)]
// Intentional casts throughout timing/score code (timestamps, sizes, token counts)
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
// Dispatch and scheduler loops are naturally long; splitting would be artificial
#![allow(clippy::too_many_lines)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod convo;
pub(crate) mod errors;
pub mod limiter;
pub mod queue;
pub mod registry;
pub mod transport;
pub mod utils;
pub mod vault;

pub use errors::{LatticeError, LatticeResult};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// `User-Agent` sent on every outbound platform request. Fixed at build time.
pub const USER_AGENT: &str = concat!("lattice/", env!("CARGO_PKG_VERSION"));
