//! fieldkit core library.
//!
//! Custom fields for projects, tasks, boards and users: typed definitions, value validation,
//! filter evaluation, formulas and cross-entity lookups.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod errors;
pub mod filter;
pub mod formula;
pub mod graph;
pub mod id;
pub mod lookup;
pub mod registry;
pub mod stats;
pub mod store;
pub mod templates;
pub mod types;
pub mod validator;
pub mod validators;

pub use catalog::{ConfigSchema, FieldConfig, FieldType, SelectOption};
pub use config::EngineSettings;
pub use engine::{FieldEngine, SearchResult, WrittenValues};
pub use errors::*;
pub use filter::{
    CustomFieldFilter, FilterCondition, FilterConfig, FilterEvaluator, FilterLogic, FilterOperator, FilterOutcome,
    FilterPatch, NewCustomFieldFilter,
};
pub use formula::FormulaEngine;
pub use graph::DependencyGraph;
pub use id::FieldId;
pub use lookup::{EntityAccessor, LookupResolver, NotFound};
pub use registry::{DeleteOutcome, FieldRegistry, NoStoredValues, ValueInspector};
pub use stats::CustomFieldStats;
pub use store::MemoryStore;
pub use templates::{FieldTemplate, NewFieldTemplate, TemplatePatch, TemplateStore};
pub use types::*;
pub use validator::Validator;
