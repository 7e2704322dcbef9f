//! Environment-aware log routing.
//!
//! A [`LoggerFactory`] reads a [`Settings`] snapshot and wires each named
//! logger to a colored console sink plus either the Datadog remote sink
//! (non-test environments with credentials) or a rotating local file.
//! Records can be emitted directly through a [`Logger`] or through plain
//! `tracing` macros once [`init::install`] has run.

pub mod record;
pub mod env;
pub mod settings;
pub mod format;
pub mod sink;
pub mod console;
pub mod file;
pub mod remote;
pub mod datadog;
pub mod logger;
pub mod layer;
pub mod init;
pub mod error;

pub use logger::{Logger, LoggerError, LoggerFactory};
pub use record::{Level, LogRecord};
pub use settings::{EnvironmentKind, Settings};

/// Name of the enclosing function, for [`logger::EventBuilder::function`].
#[macro_export]
macro_rules! function_name {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            ::std::any::type_name::<T>()
        }
        let name = type_name_of(f);
        let name = name.strip_suffix("::f").unwrap_or(name);
        name.rsplit("::").next().unwrap_or(name)
    }};
}
