//! Chat commands defined at runtime by channel users.
//!
//! A [`CommandPlugin`](plugin::CommandPlugin) keeps a table of named script
//! snippets, persists it through a [`Store`](store::Store), and runs a
//! snippet in a restricted [`Sandbox`](sandbox::Sandbox) whenever someone
//! addresses the bot with the snippet's name. Everything chat-platform
//! specific sits behind the traits in [`host`].

#![deny(
    clippy::disallowed_methods,
    clippy::suspicious,
    clippy::style,
    clippy::clone_on_ref_ptr,
    missing_debug_implementations,
    missing_copy_implementations
)]
#![warn(clippy::pedantic, missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod grammar;
pub mod host;
pub mod plugin;
pub mod sandbox;
pub mod store;
pub mod table;

pub use plugin::CommandPlugin;

mod prelude {
    #![allow(unused_imports)]

    pub use std::{collections::BTreeMap, fmt, sync::Arc};

    pub use anyhow::{anyhow, bail, Context as _};
    pub use async_trait::async_trait;
    pub use tracing::{
        debug, debug_span, error, info, info_span, instrument, trace, warn, Instrument,
    };

    pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;
}
