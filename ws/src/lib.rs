pub mod client;
pub mod framing;
pub mod handshake;

pub use client::{build_request as build_client_request, parse_client_frame, ClientFrame, FIXED_CLIENT_KEY, find_handshake_terminator};
pub use framing::{parse_frame, unmask, write_frame, ParsedFrame, MAX_FRAME_HEADER};
pub use handshake::{accept_key, build_response, looks_like_http_get, try_parse_handshake, HandshakeRequest};
