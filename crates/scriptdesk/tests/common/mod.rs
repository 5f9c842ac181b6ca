//! Shared test utilities for scriptdesk integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring an orchestrator to a temp storage root, an
//!   in-memory database and a scripted language-model backend
//! - Builders for settings and analysis documents

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::{Reply, ScriptedBackend, TestHarness};

/// Two scenes, two speakers and three inline resource tags.
pub const HEIST: &str = "Title: Heist
Author: Sam Vale

INT. BANK - DAY
JOHN: Nobody move.
MARY: Where is the vault?
[PROP:mask] [SFX:alarm]

EXT. STREET - NIGHT
JOHN: Drive!
[PROP:getaway car]
";
