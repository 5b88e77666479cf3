//! Leaf search over JDS documents.
//!
//! A query is parsed into [`Token`]s (bare words, quoted phrases,
//! `/regex/flags` literals and `=exact` literals) and every leaf of the
//! document is tested against them. Results are split into exact and partial
//! matches, each entry keyed by the origin path of the leaf.
//!
//! ```
//! use jds_search::{find_matches, Query, SearchOptions};
//! use serde_json::json;
//!
//! let doc = json!({"items": [{"title": "Hello World"}, {"title": "hello again"}]});
//! let found = find_matches(&doc, &Query::from("=Hello World"), &SearchOptions::default()).unwrap();
//! assert_eq!(found.exact.len(), 1);
//! assert_eq!(found.exact[0].origin, "items[0].title");
//! ```

pub mod error;
pub mod matcher;
pub mod query;

pub use error::SearchError;
pub use matcher::{find_matches, Match, Matches, SearchOptions};
pub use query::{parse_query, Query, Token, TokenKind};
