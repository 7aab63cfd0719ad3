//! rag-server - HTTP surface for the retrieval-augmented QA pipeline
//!
//! [`RagService`] wires the store, providers, retriever, reranker and
//! synthesizer together from a [`RagConfig`](rag_core::RagConfig).
//! [`HttpServer`] exposes it over axum.
//!
//! # Endpoints
//!
//! - `GET /`, `GET /ping` - liveness
//! - `POST /api/ingest` - chunk, embed and store a document
//! - `GET /api/search` - ranked passages
//! - `GET /api/qa` - grounded answer with the context used
//! - `GET /api/chat` - single-turn chat
//! - `GET /api/chat/stream` - streamed single-turn chat (`text/plain`)
//! - `GET /api/stats` - document count

mod error;
mod handlers;
mod middleware;
mod routes;
mod server;
mod service;

pub use error::{status_for, ApiError};
pub use handlers::AppState;
pub use middleware::REQUEST_ID_HEADER;
pub use routes::create_router;
pub use server::{shutdown_signal, HttpServer};
pub use service::{QaOutcome, RagService};
