use thiserror::Error;

/// Error surface of a single component operation.
///
/// `EndOfStream` is a control signal: a pump returns it once its source is
/// exhausted and the runner turns it into an orderly flush. Every other
/// variant is fatal to the stage that produced it.
#[derive(Debug, Error)]
pub enum StageError {
    /// Clean end of the stream.
    #[error("end of stream")]
    EndOfStream,
    /// Stream shape rejected at bind time.
    #[error("invalid stream spec: sample_rate={sample_rate} channels={channels}")]
    InvalidSpec { sample_rate: u32, channels: u16 },
    /// Opaque component failure.
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl StageError {
    /// Builds a fatal error from a plain message.
    pub fn message(msg: impl Into<String>) -> Self {
        Self::Fatal(anyhow::Error::msg(msg.into()))
    }

    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }
}

impl From<String> for StageError {
    fn from(value: String) -> Self {
        Self::message(value)
    }
}

#[cfg(test)]
mod tests {
    use super::StageError;

    #[test]
    fn end_of_stream_is_distinguished() {
        assert!(StageError::EndOfStream.is_end_of_stream());
        assert!(!StageError::message("boom").is_end_of_stream());
    }

    #[test]
    fn fatal_payload_survives_downcast() {
        #[derive(Debug, thiserror::Error)]
        #[error("component exploded")]
        struct Boom;

        let err = StageError::Fatal(anyhow::Error::new(Boom));
        let StageError::Fatal(inner) = err else {
            panic!("expected fatal variant");
        };
        assert!(inner.downcast_ref::<Boom>().is_some());
    }
}
