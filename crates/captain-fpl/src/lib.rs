// FPL captain pipeline stages.
//
// ingest -> normalize -> score -> context/prompt -> (model) -> parse.
// Every stage is a pure function of its inputs; orchestration, retries and
// fallback live in captain-app.

pub mod context;
pub mod ingest;
pub mod normalize;
pub mod parse;
pub mod prompt;
pub mod score;
