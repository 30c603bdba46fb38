#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Shared data model, request parsing, configuration, and runtime context
//! for `mcall`.

pub mod config;
pub mod context;
pub mod item;
pub mod notify;
pub mod parse;
pub mod record;

pub use config::{Config, EncodingConfig, EsConfig, RequestConfig, WebServerConfig, WorkerConfig};
pub use context::{Context, hostname};
pub use item::{Batch, WorkItem, WorkKind};
pub use notify::{LogNotifier, Notifier};
pub use parse::{ParseError, console_items, parse_params};
pub use record::{ERROR_CODE_FAILED, ERROR_CODE_OK, Encoding, Format, ResultRecord};
