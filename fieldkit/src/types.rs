use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Value, json};

#[cfg(feature = "utoipa")]
use utoipa::ToSchema;

use crate::catalog::{FieldConfig, FieldType};
use crate::errors::{EvaluationError, FieldError};
use crate::id::FieldId;

/// Category of domain object a custom field can attach to.
#[cfg_attr(feature = "utoipa", derive(ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Project,
    Task,
    Board,
    User,
}

impl EntityType {
    pub const ALL: [EntityType; 4] = [EntityType::Project, EntityType::Task, EntityType::Board, EntityType::User];

    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            EntityType::Project => "project",
            EntityType::Task => "task",
            EntityType::Board => "board",
            EntityType::User => "user",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| FieldError::InvalidRequest {
                message: format!("unknown entity type: {s}"),
            })
    }
}

/// Generic rule-based checks applied after the type-specific ones.
#[cfg_attr(feature = "utoipa", derive(ToSchema))]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationRules {
    #[serde(default)]
    pub required: bool,
    /// Signals the value store to perform a scoped existence check before writing.
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Name of a hook registered on the validator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_validation: Option<String>,
}

/// The schema and metadata describing one custom field for an entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomFieldDefinition {
    pub id: FieldId,
    pub name: String,
    pub field_type: FieldType,
    pub entity_type: EntityType,
    /// Scopes the field to one entity instance rather than the whole entity type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub required: bool,
    pub position: i32,
    pub configuration: FieldConfig,
    #[serde(default)]
    pub validation_rules: ValidationRules,
    /// Normalized JSON form of the default value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    pub is_active: bool,
    pub is_system: bool,
    pub archived: bool,
    pub show_in_list: bool,
    pub show_in_details: bool,
    pub searchable: bool,
    pub sortable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CustomFieldDefinition {
    /// Active fields take part in validation, resolution and search.
    #[inline]
    pub fn is_live(&self) -> bool {
        self.is_active && !self.archived
    }

    #[inline]
    pub fn is_required(&self) -> bool {
        self.required || self.validation_rules.required
    }

    /// Whether this field applies to the given entity instance (global or scoped to it).
    pub fn applies_to(&self, entity_id: Option<&str>) -> bool {
        match (&self.entity_id, entity_id) {
            (None, _) => true,
            (Some(scope), Some(id)) => scope == id,
            (Some(_), None) => false,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Input for `FieldRegistry::create`. Field type and configuration arrive loosely typed and
/// are checked against the field type catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFieldDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<FieldId>,
    pub name: String,
    pub field_type: String,
    pub entity_type: EntityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i32>,
    #[serde(default)]
    pub configuration: Value,
    #[serde(default)]
    pub validation_rules: ValidationRules,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default = "default_true")]
    pub show_in_list: bool,
    #[serde(default = "default_true")]
    pub show_in_details: bool,
    #[serde(default = "default_true")]
    pub searchable: bool,
    #[serde(default = "default_true")]
    pub sortable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl NewFieldDefinition {
    pub fn new(name: impl Into<String>, field_type: FieldType, entity_type: EntityType) -> Self {
        Self {
            id: None,
            name: name.into(),
            field_type: field_type.as_str().to_string(),
            entity_type,
            entity_id: None,
            description: None,
            required: false,
            position: None,
            configuration: Value::Null,
            validation_rules: ValidationRules::default(),
            default_value: None,
            is_system: false,
            show_in_list: true,
            show_in_details: true,
            searchable: true,
            sortable: true,
            created_by: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<FieldId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_configuration(mut self, configuration: Value) -> Self {
        self.configuration = configuration;
        self
    }

    pub fn with_rules(mut self, rules: ValidationRules) -> Self {
        self.validation_rules = rules;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn at_position(mut self, position: i32) -> Self {
        self.position = Some(position);
        self
    }

    pub fn scoped_to(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }
}

/// Partial update for `FieldRegistry::update`. `None` leaves a property untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefinitionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_rules: Option<ValidationRules>,
    /// `Some(Value::Null)` clears the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_in_list: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_in_details: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub searchable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sortable: Option<bool>,
}

impl DefinitionPatch {
    /// True when the patch can change which values are valid.
    pub fn touches_value_shape(&self) -> bool {
        self.configuration.is_some() || self.validation_rules.is_some()
    }
}

/// Latitude/longitude pair or a free-text place.
#[cfg_attr(feature = "utoipa", derive(ToSchema))]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Location {
    Coordinates { latitude: f64, longitude: f64 },
    Place(String),
}

/// Metadata of an attached file. Content is out of scope.
#[cfg_attr(feature = "utoipa", derive(ToSchema))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRef {
    pub name: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl FileRef {
    pub fn extension(&self) -> Option<&str> {
        self.name.rsplit_once('.').map(|(_, ext)| ext).filter(|ext| !ext.is_empty())
    }
}

/// A validated value in the canonical shape for its field type.
///
/// | Shape      | Field types                                              |
/// |------------|----------------------------------------------------------|
/// | `Text`     | text, url, email, phone, select, user, relation, color   |
/// | `Number`   | number, currency, percentage, rating, duration (seconds) |
/// | `Bool`     | checkbox                                                 |
/// | `Date`     | date (UTC)                                               |
/// | `List`     | multi_select, tags, multi_user                           |
/// | `Location` | location                                                 |
/// | `File`     | file                                                     |
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Date(DateTime<Utc>),
    List(Vec<String>),
    Location(Location),
    File(FileRef),
}

impl FieldValue {
    /// Natural JSON form; re-validating it yields the same value.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Text(text) => Value::String(text.clone()),
            FieldValue::Number(number) => json!(number),
            FieldValue::Bool(flag) => Value::Bool(*flag),
            FieldValue::Date(date) => Value::String(date.to_rfc3339()),
            FieldValue::List(items) => json!(items),
            FieldValue::Location(location) => json!(location),
            FieldValue::File(file) => json!(file),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(number) => Some(*number),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Human-readable rendering used by stats histograms and the CLI.
    pub fn display(&self) -> String {
        match self {
            FieldValue::Text(text) => text.clone(),
            FieldValue::Number(number) => format_number(*number),
            FieldValue::Bool(flag) => flag.to_string(),
            FieldValue::Date(date) => date.to_rfc3339(),
            FieldValue::List(items) => items.join(", "),
            FieldValue::Location(Location::Coordinates { latitude, longitude }) => format!("{latitude},{longitude}"),
            FieldValue::Location(Location::Place(place)) => place.clone(),
            FieldValue::File(file) => file.name.clone(),
        }
    }
}

/// Round half away from zero to `places` decimal places.
pub(crate) fn round_to(number: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    let scaled = number * factor;
    if !scaled.is_finite() {
        // Too large to carry that many fractional digits; already integral.
        return number;
    }
    scaled.round() / factor
}

pub(crate) fn format_number(number: f64) -> String {
    if number.fract() == 0.0 && number.abs() < 1e15 {
        format!("{}", number as i64)
    } else {
        number.to_string()
    }
}

/// A field's value after storage lookup plus any formula/lookup computation.
///
/// `Unavailable` marks a computation that failed, distinct from an intentionally empty `Null`.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedValue {
    Value(FieldValue),
    Null,
    Unavailable(EvaluationError),
}

impl ResolvedValue {
    pub fn as_value(&self) -> Option<&FieldValue> {
        match self {
            ResolvedValue::Value(value) => Some(value),
            _ => None,
        }
    }

    #[inline]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ResolvedValue::Unavailable(_))
    }

    pub fn display(&self) -> String {
        match self {
            ResolvedValue::Value(value) => value.display(),
            ResolvedValue::Null => String::new(),
            ResolvedValue::Unavailable(_) => "unavailable".to_string(),
        }
    }
}

impl From<Option<FieldValue>> for ResolvedValue {
    fn from(value: Option<FieldValue>) -> Self {
        value.map_or(ResolvedValue::Null, ResolvedValue::Value)
    }
}

impl Serialize for ResolvedValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            ResolvedValue::Value(value) => value.serialize(serializer),
            ResolvedValue::Null => serializer.serialize_none(),
            ResolvedValue::Unavailable(error) => json!({ "unavailable": error.to_string() }).serialize(serializer),
        }
    }
}

/// Field id to resolved value, for every live field of one entity.
pub type ResolvedValues = HashMap<FieldId, ResolvedValue>;

/// Stored (non-computed) values of one entity instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRecord {
    pub entity_type: EntityType,
    pub id: String,
    pub values: HashMap<FieldId, FieldValue>,
}

impl EntityRecord {
    pub fn new(entity_type: EntityType, id: impl Into<String>) -> Self {
        Self {
            entity_type,
            id: id.into(),
            values: HashMap::new(),
        }
    }

    pub fn with_value(mut self, field_id: impl Into<FieldId>, value: FieldValue) -> Self {
        self.values.insert(field_id.into(), value);
        self
    }
}

/// A stored value of one field on one entity instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomFieldValue {
    pub field_id: FieldId,
    pub entity_id: String,
    pub value: FieldValue,
}

/// Whole-entity atomic write. `null` clears a field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkFieldValueUpdate {
    pub values: BTreeMap<FieldId, Value>,
}

impl BulkFieldValueUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field_id: impl Into<FieldId>, value: Value) -> Self {
        self.values.insert(field_id.into(), value);
        self
    }
}

#[cfg_attr(feature = "utoipa", derive(ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[cfg_attr(feature = "utoipa", derive(ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FieldSortKey {
    Name,
    CreatedAt,
    #[default]
    Position,
}

/// Definition list/search parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSearchQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<EntityType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<FieldType>,
    #[serde(default)]
    pub include_archived: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<FieldSortKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<SortOrder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u64>,
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

impl<T> Page<T> {
    #[inline]
    pub fn has_more(&self) -> bool {
        self.page.saturating_mul(self.per_page) < self.total
    }
}
