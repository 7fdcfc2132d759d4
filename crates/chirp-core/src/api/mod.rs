//! REST API client module for the social API.
//!
//! This module provides the `ApiClient` for calling the Authentication
//! Service (`/auth/*`) and any bearer-authenticated Resource Service path.
//!
//! The API uses JWT bearer tokens. Expired access tokens are renewed with
//! the refresh token through `/auth/refresh-token`.

pub mod client;
pub mod error;

pub use client::{ApiClient, ApiResponse, ClientEvent, RequestBody, DEFAULT_API_URL, REQUEST_TIMEOUT_SECS};
pub use error::{extract_detail, ApiError};
pub use reqwest::{header, header::HeaderMap, Method, StatusCode};
