//! # Event Bus Test Suite
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── src/integration/   # Cross-module scenarios against the in-memory broker
//! │   ├── end_to_end.rs  # Producer → topic → subscription → handler
//! │   ├── dead_letter.rs # Failing handlers, redelivery, dead-lettering
//! │   ├── filtering.rs   # Event-type allow-lists
//! │   ├── malformed.rs   # Undecodable payloads
//! │   ├── ordering.rs    # Ordering keys
//! │   ├── lifecycle.rs   # Shutdown drain
//! │   └── telemetry.rs   # Metrics wiring
//! │
//! └── benches/           # Criterion benchmarks
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p bus-tests
//!
//! # By scenario
//! cargo test -p bus-tests integration::dead_letter::
//!
//! # Benchmarks
//! cargo bench -p bus-tests
//! ```

#![allow(dead_code)]
