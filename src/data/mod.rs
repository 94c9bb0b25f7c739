//! Signal processing: scaling, filtering, and pre-trigger buffering.
pub mod filter;
pub mod processor;
pub mod ring_buffer;
