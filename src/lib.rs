//! Library exports for the dataset preparation binaries, benchmarks and tests.
/// Application directory resolution.
pub mod app_dirs;
/// Local, versioned artifact store and run records.
pub mod artifacts;
/// Dataset fetching, ingestion and split assignment.
pub mod dataset;
mod http_client;
/// Logging setup.
pub mod logging;
/// Pipeline parameters and config file loading.
pub mod params;
/// Column/row tables stored inside artifacts.
pub mod table;
