// Integration tests for alertmail
// End-to-end runs from mailbox to notifier over real HTTP mocks

#[path = "../common/mod.rs"]
mod common;

pub mod pipeline;
