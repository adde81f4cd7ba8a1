//! End-to-end tests for the Moonbind bridge
//!
//! These tests run Lua scripts against the reference host and check the
//! bridge from both sides: guest code driving host objects, and the host
//! driving scripted objects through the engine.


mod classes;
mod debugger;
mod dispatch;
mod instances;
mod language;
mod lifetime;
mod marshal;
