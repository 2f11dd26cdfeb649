//! End-to-end pipeline tests against a scripted exchange and an
//! in-memory (or temp-file) database.

mod mock_exchange;

mod learning;
mod pipeline;
mod settlement;
