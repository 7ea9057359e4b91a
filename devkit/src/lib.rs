/*!
# Jetson DevKit - Doublures et utilitaires de test

Support code for exercising the kernel without real nodes:
- Scripted transport standing in for node agents (reports, failures, hangs)
- Report builder for well-formed and malformed payloads
- Harness wiring an in-memory database, catalog, store and ingestor
*/

pub mod mock_transport;
pub mod report_builder;
pub mod test_utils;

pub use mock_transport::{MockTransport, Scripted};
pub use report_builder::ReportBuilder;
pub use test_utils::TestHarness;
