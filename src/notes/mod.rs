//! Per-user notes.

pub mod store;

pub use store::{InvalidNote, Note, NoteStore, NoteUpdate};
