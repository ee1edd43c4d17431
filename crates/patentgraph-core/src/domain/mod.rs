//! Domain types shared by the catalog, store and orchestrator

mod items;
mod results;

pub use items::{EntityItem, EntityType, ItemKind, PatentItem, WorkItem};
pub use results::{
    EntityLocation, GreenClassification, ResultBatch, ResultKind, TechClassification,
};
