//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises one component against
//! the recording mocks in `mock_ports`.  No device server, twin registry
//! or event hub is required.

mod escalation_tests;
mod mock_ports;
