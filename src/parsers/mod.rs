// Parsers for agent responses

pub mod structured_output;

pub use structured_output::extract_review_feedback;
