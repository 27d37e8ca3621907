pub mod ai_stream;
pub mod outbox;
pub mod sync;
