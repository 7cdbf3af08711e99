//! Integration tests for hub-link

mod e2e_test;
mod support;
