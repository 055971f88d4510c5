//! Core types, workflow engine and trait definitions for the enrollment
//! novelty store.
//!
//! This crate is deliberately free of HTTP and database dependencies. The
//! engine is written against the [`ledger`] traits; backends supply the
//! transaction, the [`lock::LockService`] and the [`notify::Notifier`].

// `NoveltyStore` and `LockService` spell out `Send` on their futures.
#![allow(async_fn_in_trait)]

pub mod capacity;
pub mod case;
pub mod documents;
pub mod engine;
pub mod error;
pub mod execution;
pub mod ledger;
pub mod lock;
pub mod notify;
pub mod radicado;
pub mod school;
pub mod snapshot;
pub mod store;

pub use error::{Error, NoveltyError, Result};
