//! Device log capture
//!
//! A log-follow process appends the device log to `full.logcat`; the
//! demultiplexer tails that file and cuts it into per-test logs using the
//! same runner markers the instrumentation parser reads.

mod demux;
mod tail;

pub use demux::{demux_file, spawn_demux, DemuxTask, LogDemux, TestLog};
pub use tail::Tail;
