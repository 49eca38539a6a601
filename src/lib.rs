#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate log;

pub mod types;
pub mod util;
pub mod config;
pub mod acme;
pub mod ca;
pub mod ocsp;
pub mod validator;

pub use acme::Engine;
pub use ca::{CertificateAuthority, SetupError};
pub use config::Config;
