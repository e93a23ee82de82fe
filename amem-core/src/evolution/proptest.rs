//! Property-based tests for the link graph.
//!
//! Random sequences of adds, updates and deletes run against an offline
//! memory system, then the graph is checked for:
//!
//! - symmetric links with no self-links
//! - no links to deleted notes
//! - at most `k` new links per pass
//! - re-evolution changing nothing
