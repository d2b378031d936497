#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Apply and remove synthetic latency, loss and bandwidth caps on Linux interfaces.
//!
//! ```no_run
//! use linkshape::{Engine, EngineOptions, ImpairmentRequest};
//!
//! # async fn run() -> linkshape::Result<()> {
//! let engine = Engine::new(EngineOptions::default());
//!
//! let request = ImpairmentRequest::new().with_delay("50ms").with_loss(1).with_rate("10Mbit");
//! let profile = engine.apply_impairment("eth0", &request).await?;
//! println!("eth0: {profile}");
//!
//! engine.remove_impairment("eth0").await?;
//! # Ok(())
//! # }
//! ```

pub use linkshape_tc::*;
