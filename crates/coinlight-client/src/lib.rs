//! # Coinlight Client
//!
//! Async light client built on `coinlight-core`.
//!
//! A [`QueryFacade`] answers "what is stored under this key" with a value
//! proven against a header the [`Certifier`] has linked, signature by
//! signature, back to a trusted seed. Chain data comes from any
//! [`CheckpointSource`]; the usual one is a [`NetworkSource`] over a node,
//! wrapped in a [`CachedSource`].
//!
//! ```ignore
//! let config = ClientConfig::load(None)?;
//! coinlight_client::logging::init(config.log_format)?;
//! let facade = QueryFacade::connect(node, &config, 0).await?;
//! let account = facade.get_account("0x…", &CancelToken::never()).await?;
//! ```

pub mod cancel;
pub mod certifier;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod logging;
pub mod query;
pub mod source;
pub mod store;
pub mod trust;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use certifier::Certifier;
pub use config::ClientConfig;
pub use error::{
    FetchError, QueryError, SourceError, Stage, StageError, StoreError, TrustError,
};
pub use fetcher::ProofFetcher;
pub use query::{AccountResult, ExportAccount, ExportCoin, QueryFacade};
pub use source::{CachedSource, CheckpointSource, NetworkSource, NodeClient, NodeStatus};
pub use store::TrustLog;
pub use trust::{TrustChain, TrustEntry, TrustedCheckpoint};
