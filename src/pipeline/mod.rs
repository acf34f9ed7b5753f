//! Transcoder pipeline
//!
//! Supervises the external transcoder subprocess and turns its raw output
//! stream into discrete image frames:
//!
//! 1. [`session_file`] writes the SDP the transcoder reads its RTP input
//!    from.
//! 2. [`transcoder`] spawns the subprocess, reads stdout in chunks, and
//!    drains stderr.
//! 3. [`extractor`] cuts complete frames out of the byte stream on the
//!    start/end-of-image markers, with bounded buffering.
//!
//! The pipeline runs at most once per channel and is torn down through a
//! cancellation token; reuse requires a fresh token.

pub mod extractor;
pub mod session_file;
pub mod transcoder;

pub use extractor::{FrameExtractor, EOI, SOI};
pub use session_file::{session_description, write_session_description};
pub use transcoder::{run, TranscoderConfig};
