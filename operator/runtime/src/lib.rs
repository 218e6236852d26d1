#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use netsvc_operator_k8s_api as k8s;
pub use netsvc_operator_replicator as replicator;

mod args;
mod controller;
mod resources;

pub use self::args::Args;
