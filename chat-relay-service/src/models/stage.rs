//! Lifecycle of one `/query` invocation.

use std::fmt;

/// Stage a query has reached; attached to every pipeline log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStage {
    SessionLoading,
    StreamOpening,
    Streaming,
    Persisting,
    Done,
    /// Terminal state of a failed invocation.
    Errored,
}

impl QueryStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStage::SessionLoading => "session_loading",
            QueryStage::StreamOpening => "stream_opening",
            QueryStage::Streaming => "streaming",
            QueryStage::Persisting => "persisting",
            QueryStage::Done => "done",
            QueryStage::Errored => "errored",
        }
    }
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_render_as_snake_case() {
        assert_eq!(QueryStage::SessionLoading.to_string(), "session_loading");
        assert_eq!(QueryStage::StreamOpening.to_string(), "stream_opening");
        assert_eq!(QueryStage::Errored.as_str(), "errored");
    }
}
