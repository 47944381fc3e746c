//! Integration tests for Planboard
//!
//! These tests run against a real SQLite database in a temporary directory,
//! both through the data context directly and through the HTTP API.

mod audit_tests;
