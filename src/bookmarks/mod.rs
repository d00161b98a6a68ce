//! Bookmarks API
//!
//! JSON endpoints for the signed-in user's bookmarks plus a Server-Sent
//! Events stream that mirrors the user's rows live. Every route requires an
//! authenticated session and only ever touches rows owned by it.
//!
//! - `GET /me`
//! - `GET /bookmarks`
//! - `POST /bookmarks`
//! - `DELETE /bookmarks/:id`
//! - `GET /bookmarks/events` (`snapshot`, then `insert` / `delete` events)

mod handler;
mod routes;

pub use routes::routes;

#[cfg(test)]
mod tests;
