//! Object and call persistence client for weave.
//!
//! [`WeaveClient`] publishes values as content-addressed object versions,
//! fetches them back as trace proxies, and records op invocations as calls
//! whose parent links come from the call stack of the enclosing
//! [`WeaveClient::trace`] scope.
//!
//! # Quick Start
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//! use weave_client::{CallOptions, WeaveClient};
//! use weave_server::InMemoryTraceServer;
//! use weave_types::{ObjectRecord, Value};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let client = WeaveClient::new("team", "experiments", Arc::new(InMemoryTraceServer::new())).unwrap();
//!
//! let config = ObjectRecord::new("Config").with_field("lr", 0.1);
//! let reference = client.publish(&config.into(), "config").await.unwrap();
//! let fetched = client.get(reference).await.unwrap();
//! assert_eq!(fetched.as_object().unwrap().class_name(), "Config");
//!
//! client
//!     .trace(async {
//!         let train = client.create_call("train", BTreeMap::new(), CallOptions::default()).await.unwrap();
//!         let epoch = client.create_call("epoch", BTreeMap::new(), CallOptions::default()).await.unwrap();
//!         assert_eq!(epoch.parent_id(), Some(train.id()));
//!         client.finish_call(&epoch, None, None).await.unwrap();
//!         client.finish_call(&train, Some(Value::from(0.93)), None).await.unwrap();
//!     })
//!     .await;
//! # });
//! ```
//!
//! # Components
//!
//! - [`client`] -- publish, get, delete, and the call lifecycle
//! - [`summary`] -- call summary aggregation
//! - [`config`] -- TOML configuration with environment overrides
//! - [`logging`] -- `tracing-subscriber` setup

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod summary;

pub use client::{CallOptions, CallTarget, WeaveClient};
pub use config::{ClientConfig, LoggingConfig, TableConfig};
pub use error::{ClientError, ClientResult};
pub use summary::{llm_usage_summary, merge_into, sum_summaries, Summary};
