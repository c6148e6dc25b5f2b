pub mod commands;
pub mod errors;
pub mod events;
pub mod ledger;
pub mod lifecycle;
pub mod platform;
pub mod policy;
pub mod reconcile;
pub mod store;

#[cfg(test)]
mod testing;

use crate::modules::{Module, ModuleDefinition};

pub const DEFINITION: ModuleDefinition = ModuleDefinition {
    id: "autorole",
    name: "Invite autorole",
    description: "Gives roles to new members depending on the invite they joined with.",
};

pub fn module() -> Module {
    Module {
        definition: DEFINITION,
        commands: commands::commands(),
        event_handlers: vec![events::handler],
    }
}
