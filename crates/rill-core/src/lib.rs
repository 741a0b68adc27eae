#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod connection;
mod error;
mod row;
mod table;
mod trace;

pub use connection::Connection;
pub use error::{BoxedError, Error, ErrorKind, Result};
pub use row::Row;
pub use table::TableAddress;
pub use trace::{Trace, TraceFrame};
