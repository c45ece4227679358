//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `queuechain` application.
//!
//! It centralizes the error taxonomy shared by the broker adapters, the queue
//! processor and the stages, and the logging bootstrap used by the binary.

pub mod error;
pub mod logging;

#[cfg(test)]
mod tests {
    use super::error::ProcessorError;
    use super::logging;

    #[test]
    fn logging_init_accepts_levels() {
        // Should not panic
        logging::init("info");
        logging::init("debug");
        logging::init("WARNING");
        logging::init("nonsense");
    }

    #[test]
    fn level_parsing_falls_back_to_info() {
        assert_eq!(logging::parse_level("error"), tracing::Level::ERROR);
        assert_eq!(logging::parse_level("Warning"), tracing::Level::WARN);
        assert_eq!(logging::parse_level("CRITICAL"), tracing::Level::ERROR);
        assert_eq!(logging::parse_level("trace"), tracing::Level::TRACE);
        assert_eq!(logging::parse_level(""), tracing::Level::INFO);
    }

    #[test]
    fn processor_errors_describe_caller_state() {
        for error in [ProcessorError::NotConnected, ProcessorError::ShuttingDown] {
            let expected = match &error {
                ProcessorError::NotConnected => "processor is not connected to the broker",
                ProcessorError::ShuttingDown => "processor is shutting down",
            };
            assert_eq!(error.to_string(), expected);
        }
    }
}
