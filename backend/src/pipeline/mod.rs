//! The generation pipeline: resource loading, the chunked render loop, the
//! render worker pool, archive staging and memory-pressure backoff.

pub mod archive;
pub mod job;
pub mod memory;
pub mod resources;
pub mod worker_pool;
