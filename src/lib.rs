//! partfinder: electronic component search across vendor catalogs.
//!
//! Loosely specified criteria (category names, filter labels, free-text
//! descriptions) are resolved into a vendor's own identifiers by a
//! [`ResolutionEngine`], with a reasoning service as fuzzy matcher and a
//! disk cache making its answers repeatable.

pub mod cache;
pub mod category;
pub mod config;
pub mod engine;
pub mod error;
pub mod filters;
pub mod llm;
pub mod murata;
pub mod prompts;
pub mod query;
pub mod reasoning;
pub mod search;
pub mod vendor;

pub use config::Config;
pub use engine::ResolutionEngine;
pub use error::{ResolutionFailure, SearchError};
pub use filters::Criteria;
pub use search::{
    CrossReferenceRequest, CrossReferenceSearch, MpnRequest, MpnSearch, ParametricRequest,
    ParametricSearch, Search,
};
pub use vendor::{ProductRecord, VendorAdapter};
