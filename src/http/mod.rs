//! Inbound HTTP/1.x handling.
//!
//! Just enough HTTP to frame the first request on a client connection,
//! replay it upstream, and answer with a 500 when an exchange cannot go
//! ahead. After that the connection is hijacked and the proxy stops
//! interpreting the bytes that flow over it.
//!
//! - **`connection`**: reads the first request, writes error responses, hands the raw stream over
//! - **`parser`**: parses a request from a byte buffer
//! - **`request`**: request representation
//! - **`capture`**: serializes a request back to wire format
//! - **`response`**: the proxy's own (error) responses and their wire form
//!
//! # Connection lifecycle
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for a complete request
//!        └──────┬──────┘
//!               │ Request received
//!               ▼
//!        ┌──────────────────┐
//!        │   Forwarding     │ ← Capture, select, dial
//!        └──────┬───────────┘
//!               ├─ failure → 500 response → Closed
//!               ▼
//!        ┌──────────────────┐
//!        │    Hijacked      │ ← Raw bytes relayed both ways
//!        └──────┬───────────┘
//!               ▼
//!             Closed
//! ```

pub mod capture;
pub mod connection;
pub mod parser;
pub mod request;
pub mod response;
