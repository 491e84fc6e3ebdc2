// src/lib.rs

pub mod mazerunner_core;

pub use mazerunner_core::admission::{Admission, TriggerEnvelope};
pub use mazerunner_core::client_wrapper::{ChatBackend, Message, Role};
pub use mazerunner_core::error::{Error, ErrorKind};
pub use mazerunner_core::fake_store::FakeStore;
pub use mazerunner_core::scheduler::TurnLoopScheduler;
pub use mazerunner_core::store::{DataStore, Store};
pub use mazerunner_core::world::Maze;
