//! Console progress rendering.
//!
//! Presentation only: the engine emits snapshots, this sink draws them.
//! Writes to stderr so result payloads on stdout stay clean.

use std::io::{self, Write};

use fanrun::engine::{ProgressSink, ProgressSnapshot};

/// Renders an in-place status line on stderr, one update per poll iteration.
pub struct ConsoleProgressSink;

impl ProgressSink for ConsoleProgressSink {
    fn report(&self, snapshot: &ProgressSnapshot) {
        eprint!(
            "\r[fanrun] {}/{} done, {} active, {} pending, {} evicted, {} rejected ",
            snapshot.completed,
            snapshot.submitted,
            snapshot.active,
            snapshot.pending,
            snapshot.evicted,
            snapshot.rejected
        );
        let _ = io::stderr().flush();
    }
}
