//! Flag and environment configuration.
//!
//! Every option is declared once against a [`FlagSet`] and can then be set
//! either on the command line or through the environment. A declaration made
//! with the name parts `["listen", "addr"]` for the app `appd` answers to:
//!
//! - the flag `-listen.addr` (or `--listen.addr`), and
//! - the environment variable `APPD_LISTEN_ADDR`.
//!
//! Flags win over the environment; when neither is present, the value the
//! target held at declaration time is kept.
//!
//! ```
//! use svckit_core::flag::FlagSet;
//!
//! let mut addr = String::from("127.0.0.1:8080");
//! let mut fs = FlagSet::new("appd");
//! fs.string(&mut addr, "address on which to listen", &["listen", "addr"]);
//! fs.parse_from(["appd"], [("APPD_LISTEN_ADDR", "0.0.0.0:9090")])
//!     .expect("valid configuration");
//! assert_eq!(addr, "0.0.0.0:9090");
//! ```

mod flagset;
mod value;

pub use flagset::{FlagSet, env_name, flag_name};
