//! Live video frames rendered as a character grid.
//!
//! Frames flow capture → [`filter`] → [`sampler`] → [`sink`], driven by the
//! [`render_loop`] at a capped frame rate.

pub mod capture;
pub mod color;
pub mod config;
pub mod error;
pub mod filter;
pub mod frame;
pub mod palette;
pub mod render_loop;
pub mod sampler;
pub mod sink;

pub use error::{PipelineError, Result};
