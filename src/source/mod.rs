//! Block sources. Real hardware lives behind the `BlockSource` trait; this
//! module provides the synthetic generator used when no instrument is
//! attached and throughout the test suite.
pub mod synthetic;

pub use synthetic::SyntheticSource;
