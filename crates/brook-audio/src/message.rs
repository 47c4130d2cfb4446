use brook_core::{Params, SampleBuffer};

/// One packet travelling the pipe for a single traversal.
///
/// The supervisor prepares a message per pump request, loading it with the
/// parameters accumulated since the previous request. Each stage drains its
/// own entries from `params` before running and from `feedback` after.
#[derive(Debug, Default)]
pub struct Message {
    pub buffer: SampleBuffer,
    pub params: Params,
    pub feedback: Params,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }
}
