//! Sidechain fork-rollback end-to-end test suite.
//!
//! Drives the harness against the in-process simulated cluster: partitions
//! the network, grows a fork per side and checks that everything only the
//! losing fork confirmed is gone once the network heals.
//!
//! Each test file can be run independently:
//!
//! ```bash
//! cargo test -p scfork-e2e-tests --test fork_rollback -- --nocapture
//! cargo test -p scfork-e2e-tests --test topology -- --nocapture
//! cargo test -p scfork-e2e-tests --test exclusivity -- --nocapture
//! ```

pub mod helpers;
