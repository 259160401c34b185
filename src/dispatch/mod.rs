//! Subscription registry and inbound message routing
//!
//! - [`topic_matcher`] - pure wildcard matching and pattern validation
//! - [`dispatcher`] - the registry and the dispatch policy

pub mod dispatcher;
pub mod topic_matcher;

pub use dispatcher::{MessageHandler, TopicDispatcher};
pub use topic_matcher::{has_wildcard, matches, PatternError, TopicPattern};
