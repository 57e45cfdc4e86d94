//! soundboard-bot: a creator/manager bot pair that provisions soundboard
//! guilds from a template and keeps their autoroles in sync.
//!
//! - Provisioning: clone, invite, ownership hand-off
//! - Correlation: gateway events completing in-flight grants
//! - Reconciliation: main-guild roles mapped onto every soundboard

pub mod bot;
pub mod commands;
pub mod correlator;
pub mod db;
pub mod error;
pub mod grant;
pub mod output;
pub mod provision;
pub mod reconcile;
pub mod registry;
